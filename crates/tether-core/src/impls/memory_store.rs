//! InMemoryTaskStore - テスト・開発用の TaskStore
//!
//! `Vec<Task>` ではなく JSON 文字列を持つ。同じ store で作り直したキューは
//! `JsonFileTaskStore` での再起動と同じく encode/decode を通る。

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{StoreError, Task};
use crate::ports::TaskStore;

#[derive(Default)]
pub struct InMemoryTaskStore {
    snapshot: Mutex<Option<String>>,
    saves: Mutex<usize>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with already-persisted tasks.
    pub fn with_tasks(tasks: &[Task]) -> Result<Self, StoreError> {
        let mut store = Self::new();
        *store.snapshot.get_mut() = Some(serde_json::to_string(tasks)?);
        Ok(store)
    }

    /// Raw persisted JSON, if anything was ever saved.
    pub async fn raw(&self) -> Option<String> {
        self.snapshot.lock().await.clone()
    }

    /// Number of `save` calls so far.
    pub async fn save_count(&self) -> usize {
        *self.saves.lock().await
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn load(&self) -> Result<Vec<Task>, StoreError> {
        match self.snapshot.lock().await.as_deref() {
            Some(json) => Ok(serde_json::from_str(json)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, tasks: &[Task]) -> Result<(), StoreError> {
        let json = serde_json::to_string(tasks)?;
        *self.snapshot.lock().await = Some(json);
        *self.saves.lock().await += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewTask, TaskId};
    use chrono::Utc;
    use ulid::Ulid;

    #[tokio::test]
    async fn empty_store_loads_nothing() {
        let store = InMemoryTaskStore::new();
        assert!(store.load().await.unwrap().is_empty());
        assert_eq!(store.save_count().await, 0);
    }

    #[tokio::test]
    async fn save_then_load_returns_same_tasks() {
        let store = InMemoryTaskStore::new();
        let task = Task::new(
            TaskId::from_ulid(Ulid::new()),
            NewTask::update("orders", serde_json::json!({"id": "A", "status": "paid"})),
            3,
            Utc::now(),
        );

        store.save(std::slice::from_ref(&task)).await.unwrap();

        assert_eq!(store.load().await.unwrap(), vec![task]);
        assert_eq!(store.save_count().await, 1);
        assert!(store.raw().await.unwrap().starts_with('['));
    }
}
