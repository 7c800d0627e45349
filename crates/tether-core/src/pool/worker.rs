//! WorkerPool - N 並列の worker と FIFO 配送
//!
//! - ジョブは共有 receiver から先着順に取り出す
//! - 結果はジョブごとの oneshot で返す
//! - `terminate` は即時停止、`shutdown_and_join` は残りを流し切ってから停止

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{join_all, try_join_all};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::operation::{OperationRegistry, PoolJob};
use super::slot::{SlotTable, WorkerSlot};
use crate::config::default_pool_size;
use crate::domain::{PoolError, PoolTaskId};
use crate::ports::{IdGenerator, SystemClock, UlidGenerator};

type JobResult = Result<serde_json::Value, PoolError>;

/// A job on its way to a worker, carrying its own result channel.
struct Dispatch {
    id: PoolTaskId,
    job: PoolJob,
    reply: oneshot::Sender<JobResult>,
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Dispatch>>>;

/// Fixed-size worker pool.
///
/// - 各 worker は同時に 1 件だけ実行する
/// - idle な worker は受信側 Mutex（公平）に並ぶので、投入順 = 配送順
/// - 完了順は保証しない。`parallel_process` は index で結果を戻す
/// - retry はしない。失敗は呼び出し元の Future にだけ届く
pub struct WorkerPool {
    size: usize,
    sender: Mutex<Option<mpsc::UnboundedSender<Dispatch>>>,
    joins: Mutex<Vec<JoinHandle<()>>>,
    slots: Arc<SlotTable>,
    ids: Arc<dyn IdGenerator>,
}

impl WorkerPool {
    /// Spawn `size` workers (at least 1) on the current tokio runtime.
    pub fn spawn(size: usize, operations: Arc<OperationRegistry>) -> Self {
        Self::spawn_with_timeout(size, operations, None)
    }

    /// One worker per available hardware thread.
    pub fn with_default_size(operations: Arc<OperationRegistry>) -> Self {
        Self::spawn(default_pool_size(), operations)
    }

    /// Like `spawn`, but every job is bounded by `timeout`.
    pub fn spawn_with_timeout(
        size: usize,
        operations: Arc<OperationRegistry>,
        timeout: Option<Duration>,
    ) -> Self {
        let size = size.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver: SharedReceiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let slots = Arc::new(SlotTable::new(size));

        let mut joins = Vec::with_capacity(size);
        for worker_id in 0..size {
            let rx = Arc::clone(&receiver);
            let ops = Arc::clone(&operations);
            let slots = Arc::clone(&slots);
            joins.push(tokio::spawn(async move {
                worker_loop(worker_id, rx, ops, slots, timeout).await;
            }));
        }
        info!(size, "worker pool started");

        Self {
            size,
            sender: Mutex::new(Some(sender)),
            joins: Mutex::new(joins),
            slots,
            ids: Arc::new(UlidGenerator::new(SystemClock)),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn slots(&self) -> Vec<WorkerSlot> {
        self.slots.snapshot()
    }

    pub fn busy_workers(&self) -> usize {
        self.slots().iter().filter(|s| s.is_busy()).count()
    }

    pub fn is_terminated(&self) -> bool {
        self.lock_sender().is_none()
    }

    fn lock_sender(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Dispatch>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Put a job at the back of the FIFO and hand back its result channel.
    fn enqueue(&self, job: PoolJob) -> Result<oneshot::Receiver<JobResult>, PoolError> {
        let (reply, rx) = oneshot::channel();
        let dispatch = Dispatch {
            id: self.ids.generate_pool_task_id(),
            job,
            reply,
        };
        let sender = self.lock_sender();
        let sender = sender.as_ref().ok_or(PoolError::Terminated)?;
        sender.send(dispatch).map_err(|_| PoolError::Terminated)?;
        Ok(rx)
    }

    async fn wait(rx: oneshot::Receiver<JobResult>) -> JobResult {
        // sender dropped without a reply: the pool was terminated
        rx.await.unwrap_or(Err(PoolError::Terminated))
    }

    /// Run one job on the first free worker.
    pub async fn execute(&self, job: PoolJob) -> JobResult {
        let rx = self.enqueue(job)?;
        Self::wait(rx).await
    }

    /// Run every job; output index `i` is the result of input `i`.
    ///
    /// Resolves with the first error observed, like an all-or-nothing join.
    /// Jobs already dispatched keep running; their results are discarded.
    pub async fn parallel_process(
        &self,
        jobs: Vec<PoolJob>,
    ) -> Result<Vec<serde_json::Value>, PoolError> {
        let pending = self.enqueue_all(jobs)?;
        try_join_all(pending.into_iter().map(Self::wait)).await
    }

    /// Run every job and keep each individual outcome, in input order.
    pub async fn parallel_settle(&self, jobs: Vec<PoolJob>) -> Vec<JobResult> {
        let pending: Vec<_> = jobs.into_iter().map(|job| self.enqueue(job)).collect();
        join_all(pending.into_iter().map(|rx| async move {
            match rx {
                Ok(rx) => Self::wait(rx).await,
                Err(e) => Err(e),
            }
        }))
        .await
    }

    // Enqueue up front so dispatch order is input order regardless of how
    // the join polls its futures.
    fn enqueue_all(
        &self,
        jobs: Vec<PoolJob>,
    ) -> Result<Vec<oneshot::Receiver<JobResult>>, PoolError> {
        jobs.into_iter().map(|job| self.enqueue(job)).collect()
    }

    /// Stop all workers and drop queued jobs.
    ///
    /// Running and queued jobs produce no result. Their result channels are
    /// dropped, so outstanding `execute` / `parallel_process` futures resolve
    /// to `PoolError::Terminated` instead of staying pending forever.
    pub fn terminate(&self) {
        let had_sender = self.lock_sender().take().is_some();
        let joins = std::mem::take(&mut *self.joins.lock().unwrap_or_else(PoisonError::into_inner));
        for join in &joins {
            join.abort();
        }
        if had_sender {
            warn!(workers = joins.len(), "worker pool terminated");
        }
    }

    /// Stop accepting jobs, let workers drain the FIFO, then wait for them.
    pub async fn shutdown_and_join(&self) {
        self.lock_sender().take();
        let joins = std::mem::take(&mut *self.joins.lock().unwrap_or_else(PoisonError::into_inner));
        for join in joins {
            let _ = join.await;
        }
        info!("worker pool drained");
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: SharedReceiver,
    operations: Arc<OperationRegistry>,
    slots: Arc<SlotTable>,
    timeout: Option<Duration>,
) {
    loop {
        // 受信側のロックは job を 1 件取ったら即解放（実行中は持たない）
        let next = {
            let mut rx = receiver.lock().await;
            rx.recv().await
        };
        let Some(dispatch) = next else {
            debug!(worker_id, "queue closed; worker exiting");
            break;
        };

        slots.set(worker_id, WorkerSlot::Busy(dispatch.id));
        debug!(
            worker_id,
            job_id = %dispatch.id,
            operation = %dispatch.job.operation,
            "job dispatched"
        );

        let result = run_job(&operations, dispatch.job, timeout).await;

        slots.set(worker_id, WorkerSlot::Idle);
        if let Err(e) = &result {
            debug!(worker_id, job_id = %dispatch.id, error = %e, "job failed");
        }
        // ignore send error: the caller stopped waiting
        let _ = dispatch.reply.send(result);
    }
}

async fn run_job(
    operations: &OperationRegistry,
    job: PoolJob,
    timeout: Option<Duration>,
) -> JobResult {
    let Some(operation) = operations.get(&job.operation) else {
        return Err(PoolError::UnknownOperation(job.operation));
    };

    let call = AssertUnwindSafe(operation.run(job.data)).catch_unwind();
    let outcome = match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| PoolError::Timeout(limit))?,
        None => call.await,
    };

    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(message)) => Err(PoolError::Operation {
            operation: job.operation,
            message,
        }),
        Err(_) => Err(PoolError::Operation {
            operation: job.operation,
            message: "operation panicked".to_string(),
        }),
    }
}
