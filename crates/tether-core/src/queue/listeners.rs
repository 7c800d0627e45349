//! 購読者の管理（スナップショット listener と終端イベント）
//!
//! - listener はキューの変更ごとに全タスク一覧を受け取る
//! - スナップショットには version が付き、古いものは配らない
//! - 終端イベントは購読者ごとの unbounded channel で配る（取りこぼしなし）

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::mpsc;

use crate::domain::{QueueEvent, Task};

pub type Listener = Arc<dyn Fn(&[Task]) + Send + Sync>;

struct Entry {
    listener: Listener,
    /// Highest snapshot version delivered so far, plus one. 0 = none yet.
    seen: Arc<AtomicU64>,
}

impl Entry {
    /// Claim `version` for delivery. `false` if something newer already went out.
    fn claim(seen: &AtomicU64, version: u64) -> bool {
        seen.fetch_max(version + 1, Ordering::AcqRel) <= version
    }
}

#[derive(Default)]
pub(crate) struct ListenerSet {
    inner: Mutex<ListenerSetInner>,
}

#[derive(Default)]
struct ListenerSetInner {
    next_id: u64,
    listeners: BTreeMap<u64, Entry>,
}

impl ListenerSet {
    pub(crate) fn insert(&self, listener: Listener) -> u64 {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.insert(
            id,
            Entry {
                listener,
                seen: Arc::new(AtomicU64::new(0)),
            },
        );
        id
    }

    pub(crate) fn remove(&self, id: u64) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.listeners.remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.listeners.len()
    }

    /// Call every listener, in subscription order, with snapshot `version`.
    ///
    /// Listeners run outside the registry lock, so a listener may
    /// unsubscribe itself (or another one) from inside its callback.
    pub(crate) fn notify(&self, version: u64, tasks: &[Task]) {
        let targets: Vec<(Listener, Arc<AtomicU64>)> = {
            let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner
                .listeners
                .values()
                .map(|e| (Arc::clone(&e.listener), Arc::clone(&e.seen)))
                .collect()
        };
        for (listener, seen) in targets {
            if Entry::claim(&seen, version) {
                listener(tasks);
            }
        }
    }

    /// Deliver snapshot `version` to a single listener.
    pub(crate) fn notify_one(&self, id: u64, version: u64, tasks: &[Task]) {
        let target = {
            let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner
                .listeners
                .get(&id)
                .map(|e| (Arc::clone(&e.listener), Arc::clone(&e.seen)))
        };
        if let Some((listener, seen)) = target
            && Entry::claim(&seen, version)
        {
            listener(tasks);
        }
    }
}

/// Handle returned by `DurableTaskQueue::subscribe`.
///
/// Dropping it unsubscribes. `unsubscribe` may be called any number of
/// times; only the first call has an effect.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    set: Weak<ListenerSet>,
    id: u64,
}

impl Subscription {
    pub(crate) fn new(set: &Arc<ListenerSet>, id: u64) -> Self {
        Self {
            set: Arc::downgrade(set),
            id,
        }
    }

    /// Returns `true` if this call removed the listener.
    pub fn unsubscribe(&self) -> bool {
        match self.set.upgrade() {
            Some(set) => set.remove(self.id),
            None => false,
        }
    }

    /// Keep the listener registered for the lifetime of the queue.
    pub fn detach(self) {
        std::mem::forget(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Fan-out of terminal events, one unbounded channel per receiver.
#[derive(Default)]
pub(crate) struct EventSubscribers {
    senders: Mutex<Vec<mpsc::UnboundedSender<QueueEvent>>>,
}

impl EventSubscribers {
    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<QueueEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Send to every live receiver; dropped receivers are pruned.
    pub(crate) fn emit(&self, event: &QueueEvent) {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub(crate) fn len(&self) -> usize {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        senders.retain(|tx| !tx.is_closed());
        senders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewTask, TaskId};
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;
    use ulid::Ulid;

    fn counting(counter: &Arc<AtomicUsize>) -> Listener {
        let counter = Arc::clone(counter);
        Arc::new(move |_tasks: &[Task]| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn event() -> QueueEvent {
        QueueEvent::TaskSucceeded {
            task: Task::new(
                TaskId::from_ulid(Ulid::new()),
                NewTask::insert("orders", serde_json::json!({})),
                3,
                Utc::now(),
            ),
        }
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let set = Arc::new(ListenerSet::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let sub = Subscription::new(&set, set.insert(counting(&hits)));

        set.notify(1, &[]);
        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        set.notify(2, &[]);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn drop_unsubscribes_but_detach_keeps_listening() {
        let set = Arc::new(ListenerSet::default());
        let hits = Arc::new(AtomicUsize::new(0));

        drop(Subscription::new(&set, set.insert(counting(&hits))));
        Subscription::new(&set, set.insert(counting(&hits))).detach();

        set.notify(1, &[]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_may_unsubscribe_from_inside_its_callback() {
        let set = Arc::new(ListenerSet::default());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot_in = Arc::clone(&slot);
        let id = set.insert(Arc::new(move |_tasks: &[Task]| {
            if let Some(sub) = slot_in.lock().unwrap().take() {
                sub.unsubscribe();
            }
        }));
        *slot.lock().unwrap() = Some(Subscription::new(&set, id));

        set.notify(1, &[]);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn stale_snapshot_is_not_delivered_after_a_newer_one() {
        let set = Arc::new(ListenerSet::default());
        let seen: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);
        let id = set.insert(Arc::new(move |tasks: &[Task]| {
            seen_in.lock().unwrap().push(tasks.len());
        }));

        let newer = vec![event().task().clone()];
        set.notify(5, &newer);
        // 初回スナップショット（version 4）が後から届いても捨てる
        set.notify_one(id, 4, &[]);
        set.notify(6, &[]);

        assert_eq!(*seen.lock().unwrap(), vec![1, 0]);
    }

    #[test]
    fn every_receiver_gets_every_event_without_a_capacity_limit() {
        let subs = EventSubscribers::default();
        let mut a = subs.subscribe();
        let mut b = subs.subscribe();

        for _ in 0..5_000 {
            subs.emit(&event());
        }

        let mut got_a = 0;
        while a.try_recv().is_ok() {
            got_a += 1;
        }
        let mut got_b = 0;
        while b.try_recv().is_ok() {
            got_b += 1;
        }
        assert_eq!((got_a, got_b), (5_000, 5_000));
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let subs = EventSubscribers::default();
        let mut keep = subs.subscribe();
        drop(subs.subscribe());

        subs.emit(&event());

        assert_eq!(subs.len(), 1);
        assert!(keep.try_recv().is_ok());
    }
}
