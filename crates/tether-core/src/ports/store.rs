//! TaskStore port - 永続化の正本（source of truth）
//!
//! 未完了タスクの全一覧を保持する。キューは構築時に一度だけ読み込み、
//! 変更のたびに一覧ごと書き直す。キュー以外は書き込まない。

use async_trait::async_trait;

use crate::domain::{StoreError, Task};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Load every persisted task in submission order. An empty or missing
    /// store is `Ok(vec![])`.
    async fn load(&self) -> Result<Vec<Task>, StoreError>;

    /// Replace the persisted contents with `tasks`.
    async fn save(&self, tasks: &[Task]) -> Result<(), StoreError>;
}
