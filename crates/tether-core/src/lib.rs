//! tether-core
//!
//! 永続化されるクライアント側タスクキューと、並列数固定の WorkerPool。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, events, status, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, Executor, Clock, IdGenerator）
//! - **impls**: ports の実装（JsonFileTaskStore, InMemoryTaskStore）
//! - **queue**: DurableTaskQueue（永続化・sweep・retry 上限・購読）
//! - **pool**: WorkerPool（N 並列・FIFO 配送・retry なし）
//! - **config**: TOML + 環境変数による設定

pub mod config;
pub mod domain;
pub mod impls;
pub mod pool;
pub mod ports;
pub mod queue;

pub use config::TetherConfig;
pub use domain::{
    ExecutorError, NewTask, PoolError, QueueEvent, QueueStatus, Task, TaskId, TaskKind,
};
pub use pool::{Operation, OperationRegistry, PoolJob, WorkerPool};
pub use ports::{Executor, TaskStore};
pub use queue::{DurableTaskQueue, QueueBuilder, Subscription, SweepReport};
