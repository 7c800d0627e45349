//! Operation - 「operation 名 + data」をホストの handler に振り分ける

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::RegistryError;

/// One unit of non-durable compute work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolJob {
    pub operation: String,
    pub data: serde_json::Value,
}

impl PoolJob {
    pub fn new(operation: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            operation: operation.into(),
            data,
        }
    }
}

/// A handler for a specific operation name.
///
/// Errors are plain messages; the pool wraps them into `PoolError::Operation`
/// for the caller that issued the job.
#[async_trait]
pub trait Operation: Send + Sync {
    async fn run(&self, data: serde_json::Value) -> Result<serde_json::Value, String>;
}

/// Registry of operations (name -> handler), immutable once the pool runs.
#[derive(Default)]
pub struct OperationRegistry {
    operations: HashMap<String, Arc<dyn Operation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self {
            operations: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        operation: Arc<dyn Operation>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.operations.contains_key(&name) {
            return Err(RegistryError::DuplicateOperation(name));
        }
        self.operations.insert(name, operation);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Operation>> {
        self.operations.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.operations.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
