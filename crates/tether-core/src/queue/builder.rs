//! QueueBuilder - キューの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - `expect_kinds()` で必要な kind を宣言
//! - `build()` 時に「期待集合 ⊆ 登録済み集合」をチェック
//! - 永続化済みの Task は `build()` で store から読み込む

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::durable::{DurableTaskQueue, QueueParts};
use super::registry::ExecutorRegistry;
use crate::config::TetherConfig;
use crate::domain::{DEFAULT_MAX_ATTEMPTS, RegistryError, StoreError, TaskKind};
use crate::impls::{InMemoryTaskStore, JsonFileTaskStore};
use crate::ports::{Clock, Executor, IdGenerator, SystemClock, TaskStore, UlidGenerator};

/// # 使用例
/// ```ignore
/// let queue = DurableTaskQueue::builder()
///     .store(Arc::new(JsonFileTaskStore::new("queue.json")))
///     .executor(TaskKind::Insert, InsertExecutor)?
///     .expect_kinds(&[TaskKind::Insert])
///     .build()
///     .await?;
/// ```
pub struct QueueBuilder {
    store: Option<Arc<dyn TaskStore>>,
    executors: ExecutorRegistry,
    expected_kinds: Option<Vec<TaskKind>>,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    default_max_attempts: u32,
    execution_timeout: Option<Duration>,
    online: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing executors for kinds: {0:?}")]
    MissingExecutors(Vec<TaskKind>),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("failed to load persisted tasks: {0}")]
    Store(#[from] StoreError),
}

impl QueueBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            executors: ExecutorRegistry::new(),
            expected_kinds: None,
            clock: Arc::new(SystemClock),
            ids: None,
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            execution_timeout: None,
            online: true,
        }
    }

    /// Apply queue-related settings from a loaded config. The store is a
    /// `JsonFileTaskStore` at `store_path`.
    pub fn with_config(mut self, config: &TetherConfig) -> Self {
        self.store = Some(Arc::new(JsonFileTaskStore::new(&config.store_path)));
        self.default_max_attempts = config.default_max_attempts;
        self.execution_timeout = config.execution_timeout();
        self
    }

    /// Without a store the queue keeps tasks in an `InMemoryTaskStore`.
    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn executor<E: Executor + 'static>(
        self,
        kind: TaskKind,
        executor: E,
    ) -> Result<Self, RegistryError> {
        self.shared_executor(kind, Arc::new(executor))
    }

    /// Register one executor instance for several kinds, or reuse an `Arc`.
    pub fn shared_executor(
        mut self,
        kind: TaskKind,
        executor: Arc<dyn Executor>,
    ) -> Result<Self, RegistryError> {
        self.executors.register(kind, executor)?;
        Ok(self)
    }

    pub fn expect_kinds(mut self, kinds: &[TaskKind]) -> Self {
        self.expected_kinds = Some(kinds.to_vec());
        self
    }

    pub fn default_max_attempts(mut self, max_attempts: u32) -> Self {
        self.default_max_attempts = max_attempts.max(1);
        self
    }

    /// Bound every executor call. A timed-out call counts as a failed attempt.
    pub fn execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    /// Initial connectivity. Defaults to online.
    pub fn online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub async fn build(self) -> Result<DurableTaskQueue, BuildError> {
        if let Some(expected) = &self.expected_kinds {
            let registered = self.executors.registered_kinds();
            let missing: Vec<TaskKind> = expected
                .iter()
                .filter(|kind| !registered.contains(kind))
                .copied()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingExecutors(missing));
            }
        }

        let store: Arc<dyn TaskStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryTaskStore::new()),
        };
        let tasks = store.load().await?;
        if !tasks.is_empty() {
            info!(count = tasks.len(), "restored pending tasks");
        }

        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(UlidGenerator::new(Arc::clone(&self.clock))),
        };

        Ok(DurableTaskQueue::from_parts(QueueParts {
            tasks,
            store,
            executors: self.executors,
            clock: self.clock,
            ids,
            default_max_attempts: self.default_max_attempts,
            execution_timeout: self.execution_timeout,
            online: self.online,
        }))
    }
}

impl Default for QueueBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExecutorError, NewTask};
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Executor for Noop {
        async fn execute(
            &self,
            _target: &str,
            _payload: &serde_json::Value,
        ) -> Result<serde_json::Value, ExecutorError> {
            Ok(serde_json::Value::Null)
        }
    }

    #[tokio::test]
    async fn build_succeeds_when_expected_kinds_are_registered() {
        let queue = QueueBuilder::new()
            .executor(TaskKind::Insert, Noop)
            .unwrap()
            .expect_kinds(&[TaskKind::Insert])
            .build()
            .await;
        assert!(queue.is_ok());
    }

    #[tokio::test]
    async fn build_reports_missing_kinds() {
        let queue = QueueBuilder::new()
            .executor(TaskKind::Insert, Noop)
            .unwrap()
            .expect_kinds(&[TaskKind::Insert, TaskKind::Invoke, TaskKind::Delete])
            .build()
            .await;
        let Err(BuildError::MissingExecutors(missing)) = queue else {
            panic!("expected missing executors");
        };
        assert_eq!(missing, vec![TaskKind::Invoke, TaskKind::Delete]);
    }

    #[test]
    fn duplicate_executor_is_rejected_at_registration() {
        let result = QueueBuilder::new()
            .executor(TaskKind::Update, Noop)
            .unwrap()
            .executor(TaskKind::Update, Noop);
        assert!(matches!(
            result,
            Err(RegistryError::DuplicateExecutor(TaskKind::Update))
        ));
    }

    #[tokio::test]
    async fn default_max_attempts_flows_into_new_tasks() {
        let queue = QueueBuilder::new()
            .default_max_attempts(5)
            .online(false)
            .build()
            .await
            .unwrap();

        queue
            .submit(NewTask::invoke("notify", serde_json::json!({})))
            .await;
        queue
            .submit(NewTask::invoke("notify", serde_json::json!({})).with_max_attempts(1))
            .await;

        let tasks = queue.tasks();
        assert_eq!(tasks[0].max_attempts, 5);
        assert_eq!(tasks[1].max_attempts, 1);
    }

    #[tokio::test]
    async fn build_fails_on_unreadable_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        std::fs::write(&path, "[{\"broken\":").unwrap();

        let result = QueueBuilder::new()
            .store(Arc::new(JsonFileTaskStore::new(&path)))
            .build()
            .await;
        assert!(matches!(result, Err(BuildError::Store(_))));
    }
}
