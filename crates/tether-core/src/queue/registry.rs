//! ExecutorRegistry - kind ごとの executor の登録と呼び出し
//!
//! - 未登録の kind、timeout、panic はすべて失敗 1 回として扱う

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use crate::domain::{ExecutorError, RegistryError, Task, TaskKind};
use crate::ports::Executor;

/// Registry of executors (kind -> executor).
///
/// Built during initialization (mutable), then shared read-only by the
/// queue, so lookups need no lock.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<TaskKind, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register the executor for `kind`. Registering a kind twice is an error.
    pub fn register(
        &mut self,
        kind: TaskKind,
        executor: Arc<dyn Executor>,
    ) -> Result<(), RegistryError> {
        if self.executors.contains_key(&kind) {
            return Err(RegistryError::DuplicateExecutor(kind));
        }
        self.executors.insert(kind, executor);
        Ok(())
    }

    pub fn get(&self, kind: TaskKind) -> Option<&Arc<dyn Executor>> {
        self.executors.get(&kind)
    }

    pub fn registered_kinds(&self) -> Vec<TaskKind> {
        let mut kinds: Vec<TaskKind> = self.executors.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Run one task through the executor for its kind.
    ///
    /// A missing executor, an elapsed timeout and a panic are reported as
    /// ordinary execution failures so they count as an attempt.
    pub async fn execute(
        &self,
        task: &Task,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value, ExecutorError> {
        let executor = self
            .get(task.kind)
            .ok_or(ExecutorError::NotRegistered(task.kind))?;

        let call = AssertUnwindSafe(executor.execute(&task.target, &task.payload)).catch_unwind();
        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| ExecutorError::TimedOut(limit))?,
            None => call.await,
        };
        outcome.unwrap_or_else(|panic| Err(ExecutorError::Panicked(panic_message(&*panic))))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
