//! Executor port - ホストが提供する実処理
//!
//! `TaskKind` ごとに executor を 1 つ。キューは振り分けるだけで、
//! insert や invoke が実際に何をするか（DB 書き込み、RPC）はホストが決める。

use async_trait::async_trait;

use crate::domain::ExecutorError;

/// Performs the operation a task describes.
///
/// Implementations should validate the payload before any remote call and
/// return `ExecutorError::Malformed` when required fields are missing.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        target: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, ExecutorError>;
}
