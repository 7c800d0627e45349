//! Ids - 型付き ID
//!
//! # ULID ベースの ID
//! 48 bit のミリ秒タイムスタンプ + 80 bit のランダム部。
//! 生成順にソートでき、プロセス内での衝突は無視できる。
//!
//! `Id<T>` は PhantomData のマーカー型で、`TaskId` と `PoolTaskId` を
//! コンパイル時に区別します。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// Marker trait for each ID kind. Supplies the display prefix.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic ULID-backed identifier.
///
/// Serialized as the bare ULID string so persisted queues stay readable:
/// `"01HV2M6Z8X3K9Q4W7YB1C5N0TR"`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// Milliseconds since the Unix epoch encoded in the ULID.
    pub fn timestamp_ms(&self) -> u64 {
        self.ulid.timestamp_ms()
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ulid::DecodeError;

    /// Accepts both the bare ULID and the prefixed display form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw).map(Self::from_ulid)
    }
}

// ========================================
// マーカー型
// ========================================

/// Marker for durable queue tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueTask {}

impl IdMarker for QueueTask {
    fn prefix() -> &'static str {
        "task-"
    }
}

/// Marker for worker-pool jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PoolTask {}

impl IdMarker for PoolTask {
    fn prefix() -> &'static str {
        "pool-"
    }
}

/// Identifier of a durable queue task.
pub type TaskId = Id<QueueTask>;

/// Identifier of a worker-pool job (assigned internally, never persisted).
pub type PoolTaskId = Id<PoolTask>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_prefix() {
        let task = TaskId::from_ulid(Ulid::new());
        let job = PoolTaskId::from_ulid(Ulid::new());

        assert!(task.to_string().starts_with("task-"));
        assert!(job.to_string().starts_with("pool-"));
        // let _: TaskId = job; // <- does not compile
    }

    #[test]
    fn serializes_as_bare_ulid_string() {
        let ulid = Ulid::new();
        let id = TaskId::from_ulid(ulid);

        let json = serde_json::to_value(id).unwrap();
        assert_eq!(json, serde_json::Value::String(ulid.to_string()));

        let back: TaskId = serde_json::from_value(json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn parses_prefixed_and_bare_forms() {
        let id = TaskId::from_ulid(Ulid::new());

        let from_display: TaskId = id.to_string().parse().unwrap();
        let from_bare: TaskId = id.as_ulid().to_string().parse().unwrap();

        assert_eq!(from_display, id);
        assert_eq!(from_bare, id);
        assert!("task-not-a-ulid".parse::<TaskId>().is_err());
    }

    #[test]
    fn ids_sort_by_creation_time() {
        let a = TaskId::from_ulid(Ulid::from_parts(1_000, 99));
        let b = TaskId::from_ulid(Ulid::from_parts(2_000, 1));
        assert!(a < b);
        assert_eq!(a.timestamp_ms(), 1_000);
    }

    #[test]
    fn phantom_marker_is_zero_sized() {
        assert_eq!(std::mem::size_of::<TaskId>(), std::mem::size_of::<Ulid>());
        assert_eq!(std::mem::size_of::<PoolTaskId>(), 16);
    }
}
