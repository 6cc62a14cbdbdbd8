//! Typed events emitted by watcher nodes.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::stat::StatSnapshot;

/// The semantic kind of a filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// A path appeared.
    Create,
    /// A path's metadata or contents changed.
    Update,
    /// A path disappeared.
    Delete,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Create => write!(f, "create"),
            ChangeKind::Update => write!(f, "update"),
            ChangeKind::Delete => write!(f, "delete"),
        }
    }
}

/// A semantic change event for one absolute path.
///
/// The payload contract is stable: `current` is present for
/// create/update, `previous` for update/delete. The constructors below are
/// the only way events are built inside the crate, which keeps the
/// contract from drifting.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// What happened.
    pub kind: ChangeKind,
    /// The absolute path the event is about.
    pub path: PathBuf,
    /// Snapshot after the change.
    pub current: Option<StatSnapshot>,
    /// Snapshot before the change.
    pub previous: Option<StatSnapshot>,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// Event for a path that appeared.
    pub fn created(path: PathBuf, current: StatSnapshot) -> Self {
        Self {
            kind: ChangeKind::Create,
            path,
            current: Some(current),
            previous: None,
            timestamp: Utc::now(),
        }
    }

    /// Event for a path that changed in place.
    pub fn updated(path: PathBuf, current: StatSnapshot, previous: Option<StatSnapshot>) -> Self {
        Self {
            kind: ChangeKind::Update,
            path,
            current: Some(current),
            previous,
            timestamp: Utc::now(),
        }
    }

    /// Event for a path that disappeared.
    pub fn deleted(path: PathBuf, previous: Option<StatSnapshot>) -> Self {
        Self {
            kind: ChangeKind::Delete,
            path,
            current: None,
            previous,
            timestamp: Utc::now(),
        }
    }
}

/// Why a node closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// Caller-requested shutdown.
    Normal,
    /// The watched path disappeared.
    Deleted,
    /// The node failed and cannot continue.
    Failure,
    /// A child watcher failed during activation.
    ChildFailure,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Normal => write!(f, "normal"),
            CloseReason::Deleted => write!(f, "deleted"),
            CloseReason::Failure => write!(f, "failure"),
            CloseReason::ChildFailure => write!(f, "child failure"),
        }
    }
}

/// Everything a node can tell its subscribers.
///
/// One broadcast channel per node carries this enum; the variants are the
/// node's event channels.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// A semantic change on the node's path or a descendant.
    Change(ChangeEvent),
    /// Activation finished, successfully or not.
    Watching(Option<Error>),
    /// The node shut down.
    Close(CloseReason),
    /// Diagnostic message.
    Log(String),
    /// A non-fatal error surfaced outside activation.
    Error(Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stat::FileKind;

    fn snap(size: u64) -> StatSnapshot {
        StatSnapshot {
            kind: FileKind::File,
            size,
            mtime: None,
            birthtime: None,
            atime: None,
            ctime: None,
            ino: 1,
            mode: 0o644,
        }
    }

    #[test]
    fn create_carries_current_only() {
        let ev = ChangeEvent::created(PathBuf::from("/a"), snap(1));
        assert_eq!(ev.kind, ChangeKind::Create);
        assert!(ev.current.is_some());
        assert!(ev.previous.is_none());
    }

    #[test]
    fn update_carries_both_snapshots() {
        let ev = ChangeEvent::updated(PathBuf::from("/a"), snap(2), Some(snap(1)));
        assert_eq!(ev.kind, ChangeKind::Update);
        assert_eq!(ev.current.as_ref().unwrap().size, 2);
        assert_eq!(ev.previous.as_ref().unwrap().size, 1);
    }

    #[test]
    fn delete_carries_previous_only() {
        let ev = ChangeEvent::deleted(PathBuf::from("/a"), Some(snap(1)));
        assert_eq!(ev.kind, ChangeKind::Delete);
        assert!(ev.current.is_none());
        assert!(ev.previous.is_some());
    }

    #[test]
    fn close_reason_display() {
        assert_eq!(CloseReason::ChildFailure.to_string(), "child failure");
        assert_eq!(CloseReason::Deleted.to_string(), "deleted");
    }
}
