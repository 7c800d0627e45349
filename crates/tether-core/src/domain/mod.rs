//! Domain - ドメインモデル（ids, task, events, status, errors）
//!
//! store・executor・tokio のどれにも依存しない。

pub mod errors;
pub mod events;
pub mod ids;
pub mod status;
pub mod task;

pub use self::errors::{ExecutorError, PoolError, RegistryError, StoreError};
pub use self::events::QueueEvent;
pub use self::ids::{Id, IdMarker, PoolTaskId, TaskId};
pub use self::status::QueueStatus;
pub use self::task::{DEFAULT_MAX_ATTEMPTS, NewTask, ParseTaskKindError, Task, TaskKind};
