//! Events - 終端結果の通知
//!
//! タスクがキューを出るとき（成功、または retry 上限に到達）にちょうど 1 回だけ発行する。
//! `clear()` は何も発行しない。

use serde::{Deserialize, Serialize};

use super::task::Task;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum QueueEvent {
    TaskSucceeded { task: Task },
    TaskFailed { task: Task, error: String },
}

impl QueueEvent {
    pub fn task(&self) -> &Task {
        match self {
            QueueEvent::TaskSucceeded { task } | QueueEvent::TaskFailed { task, .. } => task,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::TaskSucceeded { .. } => "task-succeeded",
            QueueEvent::TaskFailed { .. } => "task-failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, QueueEvent::TaskFailed { .. })
    }
}
