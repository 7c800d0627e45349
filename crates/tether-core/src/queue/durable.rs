//! DurableTaskQueue - 永続キュー本体
//!
//! # フロー
//! 1. `submit` が Task を追加して store に書き込む（online なら sweep を起動）
//! 2. `process_queue` が開始時点のスナップショットを FIFO で 1 件ずつ実行
//! 3. 成功 → 削除 + `TaskSucceeded`、失敗 → attempts++（上限で削除 + `TaskFailed`）
//!
//! # ロック
//! - タスク一覧は `std::sync::Mutex` の中。`.await` をまたいで保持しない
//! - executor 呼び出しと store 書き込みはロックの外
//! - store 書き込みは `persist_lock` で直列化し、常に最新の一覧を書く
//! - 変更ごとに version を進め、listener には新しい順序でしか配らない

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::builder::QueueBuilder;
use super::listeners::{EventSubscribers, Listener, ListenerSet, Subscription};
use super::registry::ExecutorRegistry;
use super::retry::RetryTimer;
use crate::domain::{ExecutorError, NewTask, QueueEvent, QueueStatus, Task, TaskId};
use crate::ports::{Clock, IdGenerator, TaskStore};

/// Durable at-least-once task queue.
///
/// Cheap to clone; every clone is a handle to the same queue.
#[derive(Clone)]
pub struct DurableTaskQueue {
    inner: Arc<Inner>,
}

pub(crate) struct QueueParts {
    pub tasks: Vec<Task>,
    pub store: Arc<dyn TaskStore>,
    pub executors: ExecutorRegistry,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub default_max_attempts: u32,
    pub execution_timeout: Option<Duration>,
    pub online: bool,
}

/// Task list plus a counter bumped on every mutation.
struct Ledger {
    tasks: Vec<Task>,
    version: u64,
}

impl Ledger {
    /// Record a mutation and return the resulting snapshot.
    fn commit(&mut self) -> (u64, Vec<Task>) {
        self.version += 1;
        (self.version, self.tasks.clone())
    }
}

struct Inner {
    ledger: Mutex<Ledger>,
    processing: AtomicBool,
    online: AtomicBool,
    persist_lock: tokio::sync::Mutex<()>,
    store: Arc<dyn TaskStore>,
    executors: ExecutorRegistry,
    listeners: Arc<ListenerSet>,
    events: EventSubscribers,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    default_max_attempts: u32,
    execution_timeout: Option<Duration>,
}

/// What one call to `process_queue` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// `true` when another sweep was already running and this call did nothing.
    pub skipped: bool,
    pub attempted: usize,
    pub succeeded: usize,
    /// Tasks removed after exhausting their retry ceiling.
    pub failed: usize,
    /// Tasks that failed but stay queued for the next sweep.
    pub retrying: usize,
}

impl SweepReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

enum Settled {
    Retry(Task),
    Dead(Task),
}

/// Holds the "sweep running" flag and releases it on drop, including when
/// the sweep future is cancelled.
struct SweepGuard<'a>(&'a AtomicBool);

impl<'a> SweepGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SweepGuard(flag))
    }
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl DurableTaskQueue {
    pub fn builder() -> QueueBuilder {
        QueueBuilder::new()
    }

    pub(crate) fn from_parts(parts: QueueParts) -> Self {
        Self {
            inner: Arc::new(Inner {
                ledger: Mutex::new(Ledger {
                    tasks: parts.tasks,
                    version: 0,
                }),
                processing: AtomicBool::new(false),
                online: AtomicBool::new(parts.online),
                persist_lock: tokio::sync::Mutex::new(()),
                store: parts.store,
                executors: parts.executors,
                listeners: Arc::new(ListenerSet::default()),
                events: EventSubscribers::default(),
                clock: parts.clock,
                ids: parts.ids,
                default_max_attempts: parts.default_max_attempts,
                execution_timeout: parts.execution_timeout,
            }),
        }
    }

    fn lock_ledger(&self) -> MutexGuard<'_, Ledger> {
        self.inner
            .ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a task and persist it. If the queue is online a sweep is
    /// started in the background; `submit` never waits for execution.
    pub async fn submit(&self, new: NewTask) -> TaskId {
        let task = Task::new(
            self.inner.ids.generate_task_id(),
            new,
            self.inner.default_max_attempts,
            self.inner.clock.now(),
        );
        let id = task.id;
        debug!(task_id = %id, kind = %task.kind, target = %task.target, "task submitted");

        let (version, snapshot) = {
            let mut ledger = self.lock_ledger();
            ledger.tasks.push(task);
            ledger.commit()
        };
        self.persist().await;
        self.inner.listeners.notify(version, &snapshot);

        if self.is_online() {
            self.trigger_sweep();
        }
        id
    }

    /// Start a sweep on the current tokio runtime without waiting for it.
    ///
    /// Returns `None` when called outside a runtime.
    pub fn trigger_sweep(&self) -> Option<JoinHandle<SweepReport>> {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let queue = self.clone();
                Some(handle.spawn(async move { queue.process_queue().await }))
            }
            Err(_) => {
                warn!("no tokio runtime available; sweep not started");
                None
            }
        }
    }

    /// Run one sweep over the tasks present right now.
    ///
    /// Tasks submitted while the sweep runs wait for the next one. A call
    /// made while another sweep is running returns immediately with
    /// `skipped = true`.
    pub async fn process_queue(&self) -> SweepReport {
        let Some(_guard) = SweepGuard::acquire(&self.inner.processing) else {
            debug!("sweep already running; skipping");
            return SweepReport::skipped();
        };

        let snapshot = self.lock_ledger().tasks.clone();
        let mut report = SweepReport::default();
        debug!(tasks = snapshot.len(), "sweep started");

        for task in snapshot {
            // clear() may have dropped it mid-sweep
            if !self.contains(task.id) {
                continue;
            }
            report.attempted += 1;

            let result = self
                .inner
                .executors
                .execute(&task, self.inner.execution_timeout)
                .await;

            match result {
                Ok(_) => {
                    if self.settle_success(task.id).await {
                        report.succeeded += 1;
                    }
                }
                Err(err) => match self.settle_failure(task.id, &err).await {
                    Some(Settled::Dead(_)) => report.failed += 1,
                    Some(Settled::Retry(_)) => report.retrying += 1,
                    None => {}
                },
            }
        }

        debug!(?report, "sweep finished");
        report
    }

    async fn settle_success(&self, id: TaskId) -> bool {
        let (task, (version, snapshot)) = {
            let mut ledger = self.lock_ledger();
            let Some(pos) = ledger.tasks.iter().position(|t| t.id == id) else {
                return false;
            };
            let task = ledger.tasks.remove(pos);
            (task, ledger.commit())
        };

        self.persist().await;
        self.inner.listeners.notify(version, &snapshot);

        info!(task_id = %task.id, kind = %task.kind, target = %task.target, "task succeeded");
        self.emit(QueueEvent::TaskSucceeded { task });
        true
    }

    async fn settle_failure(&self, id: TaskId, err: &ExecutorError) -> Option<Settled> {
        let (settled, (version, snapshot)) = {
            let mut ledger = self.lock_ledger();
            let pos = ledger.tasks.iter().position(|t| t.id == id)?;
            let settled = if ledger.tasks[pos].record_failure() {
                Settled::Dead(ledger.tasks.remove(pos))
            } else {
                Settled::Retry(ledger.tasks[pos].clone())
            };
            (settled, ledger.commit())
        };

        self.persist().await;
        self.inner.listeners.notify(version, &snapshot);

        match &settled {
            Settled::Retry(task) => {
                warn!(
                    task_id = %task.id,
                    kind = %task.kind,
                    attempts = task.attempts,
                    max_attempts = task.max_attempts,
                    error = %err,
                    "task failed; will retry on next sweep"
                );
            }
            Settled::Dead(task) => {
                error!(
                    task_id = %task.id,
                    kind = %task.kind,
                    target = %task.target,
                    attempts = task.attempts,
                    error = %err,
                    "task failed permanently"
                );
                self.emit(QueueEvent::TaskFailed {
                    task: task.clone(),
                    error: err.to_string(),
                });
            }
        }
        Some(settled)
    }

    fn emit(&self, event: QueueEvent) {
        self.inner.events.emit(&event);
    }

    async fn persist(&self) {
        let _guard = self.inner.persist_lock.lock().await;
        let snapshot = self.lock_ledger().tasks.clone();
        if let Err(e) = self.inner.store.save(&snapshot).await {
            warn!(error = %e, tasks = snapshot.len(), "failed to persist task queue");
        }
    }

    fn contains(&self, id: TaskId) -> bool {
        self.lock_ledger().tasks.iter().any(|t| t.id == id)
    }

    /// Drop every queued task. No success or failure events are emitted.
    pub async fn clear(&self) {
        let (dropped, version) = {
            let mut ledger = self.lock_ledger();
            let dropped = std::mem::take(&mut ledger.tasks).len();
            (dropped, ledger.commit().0)
        };
        self.persist().await;
        self.inner.listeners.notify(version, &[]);
        info!(dropped, "task queue cleared");
    }

    /// Read-only snapshot. Never waits for a running sweep.
    pub fn status(&self) -> QueueStatus {
        let ledger = self.lock_ledger();
        QueueStatus::from_tasks(&ledger.tasks, self.inner.processing.load(Ordering::Acquire))
    }

    /// Current tasks in submission order.
    pub fn tasks(&self) -> Vec<Task> {
        self.lock_ledger().tasks.clone()
    }

    /// Register a snapshot listener. It is called once right away with the
    /// current tasks, then after every mutation.
    ///
    /// A listener never receives an older list after a newer one. If a
    /// mutation lands between registration and the initial call, the
    /// initial (older) list is skipped.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[Task]) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        // 登録とスナップショット取得を同じロック内で行う
        let (id, version, snapshot) = {
            let ledger = self.lock_ledger();
            let id = self.inner.listeners.insert(listener);
            (id, ledger.version, ledger.tasks.clone())
        };
        self.inner.listeners.notify_one(id, version, &snapshot);
        Subscription::new(&self.inner.listeners, id)
    }

    /// Terminal outcome stream (`TaskSucceeded` / `TaskFailed`).
    ///
    /// The receiver gets every event emitted after this call. The channel is
    /// unbounded, so a slow reader never misses an outcome. Dropping the
    /// receiver unsubscribes it.
    pub fn events(&self) -> mpsc::UnboundedReceiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::Acquire)
    }

    /// Record connectivity. An offline → online edge starts a sweep.
    pub fn set_online(&self, online: bool) {
        let was_online = self.inner.online.swap(online, Ordering::AcqRel);
        if online && !was_online {
            info!("connectivity restored; replaying queue");
            self.trigger_sweep();
        } else if !online && was_online {
            info!("connectivity lost; deferring tasks");
        }
    }

    /// Reconnect hook: mark online and run a sweep to completion.
    pub async fn connectivity_restored(&self) -> SweepReport {
        self.inner.online.store(true, Ordering::Release);
        self.process_queue().await
    }

    /// Opt-in periodic retry. Off unless a host asks for it.
    pub fn spawn_retry_timer(&self, interval: Duration) -> RetryTimer {
        RetryTimer::spawn(self.clone(), interval)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Live `events()` receivers.
    pub fn event_receiver_count(&self) -> usize {
        self.inner.events.len()
    }
}
