//! Ports - 抽象化レイヤー
//!
//! キュー/pool の中核とホストの境界（永続化・実行・時刻・ID）。

pub mod clock;
pub mod executor;
pub mod id_generator;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::executor::Executor;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::store::TaskStore;
