//! Status - キューの読み取り専用スナップショット

use serde::{Deserialize, Serialize};

use super::task::Task;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub total: usize,
    /// Tasks never attempted.
    pub pending: usize,
    /// Tasks that failed at least once and await the next sweep.
    pub retrying: usize,
    pub processing: bool,
}

impl QueueStatus {
    pub fn from_tasks(tasks: &[Task], processing: bool) -> Self {
        let retrying = tasks.iter().filter(|t| t.is_retrying()).count();
        Self {
            total: tasks.len(),
            pending: tasks.len() - retrying,
            retrying,
            processing,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.total == 0 && !self.processing
    }
}
