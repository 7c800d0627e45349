//! Pool - WorkerPool
//!
//! 固定 N 個の worker、FIFO 配送。永続化も retry もしない。

mod operation;
mod slot;
mod worker;

pub use operation::{Operation, OperationRegistry, PoolJob};
pub use slot::WorkerSlot;
pub use worker::WorkerPool;
