//! Queue - 永続キュー
//!
//! submit・永続化・sweep・retry 上限・購読。

mod builder;
mod durable;
mod listeners;
mod registry;
mod retry;

pub use builder::{BuildError, QueueBuilder};
pub use durable::{DurableTaskQueue, SweepReport};
pub use listeners::{Listener, Subscription};
pub use registry::ExecutorRegistry;
pub use retry::RetryTimer;
