//! Errors - エラー型
//!
//! 境界ごとに enum を 1 つ。`submit` / `process_queue` / `status` / `subscribe` からは
//! 返さず、イベント・ログ・pool の結果として表に出る。

use std::time::Duration;

use thiserror::Error;

use super::task::TaskKind;

/// Failure reported by (or on behalf of) a host executor.
///
/// Every variant counts as one failed attempt. Malformed input is not
/// special-cased by the queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    /// Payload is missing fields required for its kind.
    #[error("malformed task: {0}")]
    Malformed(String),

    /// The remote call itself failed (network blip, 5xx, ...).
    #[error("{0}")]
    Failed(String),

    #[error("no executor registered for kind={0}")]
    NotRegistered(TaskKind),

    #[error("execution timed out after {0:?}")]
    TimedOut(Duration),

    /// The executor panicked. Caught so it counts as one attempt.
    #[error("executor panicked: {0}")]
    Panicked(String),
}

impl ExecutorError {
    pub fn failed(message: impl Into<String>) -> Self {
        ExecutorError::Failed(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        ExecutorError::Malformed(message.into())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),

    #[error("store encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Outcome of a pool job that did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("operation '{operation}' failed: {message}")]
    Operation { operation: String, message: String },

    #[error("no operation registered under '{0}'")]
    UnknownOperation(String),

    #[error("pool job timed out after {0:?}")]
    Timeout(Duration),

    /// The pool was terminated before the job produced a result.
    #[error("worker pool terminated")]
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("duplicate executor for kind={0}")]
    DuplicateExecutor(TaskKind),

    #[error("duplicate operation '{0}'")]
    DuplicateOperation(String),
}
