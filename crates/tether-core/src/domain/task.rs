//! Task - 永続化されるタスク
//!
//! - `NewTask`: submit 時の入力（kind, target, payload, max_attempts）
//! - `Task`: store に書かれる形。attempts はここで数える

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;

/// Retry ceiling used when the caller does not pass one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Operation category of a deferred task.
///
/// `Invoke` is an arbitrary named remote call; the others are record writes
/// against the collection named by `Task::target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Insert,
    Update,
    Delete,
    Invoke,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [
        TaskKind::Insert,
        TaskKind::Update,
        TaskKind::Delete,
        TaskKind::Invoke,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Insert => "insert",
            TaskKind::Update => "update",
            TaskKind::Delete => "delete",
            TaskKind::Invoke => "invoke",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task kind '{0}' (expected insert, update, delete or invoke)")]
pub struct ParseTaskKindError(String);

impl FromStr for TaskKind {
    type Err = ParseTaskKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseTaskKindError(s.to_string()))
    }
}

/// What a caller hands to `DurableTaskQueue::submit`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub kind: TaskKind,
    pub target: String,
    pub payload: serde_json::Value,
    pub max_attempts: Option<u32>,
}

impl NewTask {
    pub fn new(kind: TaskKind, target: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind,
            target: target.into(),
            payload,
            max_attempts: None,
        }
    }

    pub fn insert(target: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(TaskKind::Insert, target, payload)
    }

    pub fn update(target: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(TaskKind::Update, target, payload)
    }

    pub fn delete(target: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(TaskKind::Delete, target, payload)
    }

    pub fn invoke(function: impl Into<String>, args: serde_json::Value) -> Self {
        Self::new(TaskKind::Invoke, function, args)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// A persisted, retryable unit of deferred side-effecting work.
///
/// This is exactly what lands in the store, so every field must stay
/// JSON-compatible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub target: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub max_attempts: u32,
}

impl Task {
    /// Build a fresh task. A ceiling of 0 is raised to 1 so every task gets
    /// at least one attempt and `attempts <= max_attempts` holds once settled.
    pub fn new(
        id: TaskId,
        new: NewTask,
        default_max_attempts: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        let max_attempts = new.max_attempts.unwrap_or(default_max_attempts).max(1);
        Self {
            id,
            kind: new.kind,
            target: new.target,
            payload: new.payload,
            created_at,
            attempts: 0,
            max_attempts,
        }
    }

    /// Never attempted yet.
    pub fn is_pending(&self) -> bool {
        self.attempts == 0
    }

    /// Failed at least once and still waiting for another sweep.
    pub fn is_retrying(&self) -> bool {
        self.attempts > 0
    }

    /// Count one failed attempt. Returns `true` when the ceiling is reached
    /// and the task must be removed.
    pub fn record_failure(&mut self) -> bool {
        self.attempts = self.attempts.saturating_add(1);
        self.is_exhausted()
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}
