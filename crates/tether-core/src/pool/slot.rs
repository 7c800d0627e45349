//! WorkerSlot - worker ごとの状態表（観測用。配送はこれを読まない）

use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::domain::PoolTaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "task", rename_all = "snake_case")]
pub enum WorkerSlot {
    Idle,
    Busy(PoolTaskId),
}

impl WorkerSlot {
    pub fn is_busy(&self) -> bool {
        matches!(self, WorkerSlot::Busy(_))
    }
}

pub(crate) struct SlotTable {
    slots: Mutex<Vec<WorkerSlot>>,
}

impl SlotTable {
    pub(crate) fn new(n: usize) -> Self {
        Self {
            slots: Mutex::new(vec![WorkerSlot::Idle; n]),
        }
    }

    pub(crate) fn set(&self, worker_id: usize, slot: WorkerSlot) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = slots.get_mut(worker_id) {
            *entry = slot;
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<WorkerSlot> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
