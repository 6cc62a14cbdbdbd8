//! Filesystem metadata snapshots and the change comparator.
//!
//! A [`StatSnapshot`] is an immutable record of one path's metadata at an
//! instant. The comparator deliberately excludes `atime` and `ctime`:
//! access/change-time jitter is pervasive and does not represent a
//! semantic content change.

use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Coarse classification of a filesystem object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link (only visible when links are not followed).
    Symlink,
    /// Sockets, fifos, devices, and anything else.
    Other,
}

impl FileKind {
    /// Whether this kind gets child watchers.
    pub fn is_directory(self) -> bool {
        matches!(self, FileKind::Directory)
    }
}

/// Immutable metadata snapshot of a single path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatSnapshot {
    /// Object kind.
    pub kind: FileKind,
    /// Size in bytes.
    pub size: u64,
    /// Modification time, nanosecond resolution where the platform has it.
    pub mtime: Option<SystemTime>,
    /// Creation time; `None` on filesystems that do not record it.
    pub birthtime: Option<SystemTime>,
    /// Access time. Excluded from the change comparison.
    pub atime: Option<SystemTime>,
    /// Inode change time. Excluded from the change comparison.
    pub ctime: Option<SystemTime>,
    /// Inode number (0 where the platform has none).
    pub ino: u64,
    /// Permission/mode bits.
    pub mode: u32,
}

impl StatSnapshot {
    /// Build a snapshot from already-fetched metadata.
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        let file_type = meta.file_type();
        let kind = if file_type.is_file() {
            FileKind::File
        } else if file_type.is_dir() {
            FileKind::Directory
        } else if file_type.is_symlink() {
            FileKind::Symlink
        } else {
            FileKind::Other
        };

        #[cfg(unix)]
        let (ino, mode, ctime) = {
            use std::os::unix::fs::MetadataExt;
            (
                meta.ino(),
                meta.mode(),
                unix_time(meta.ctime(), meta.ctime_nsec()),
            )
        };

        #[cfg(not(unix))]
        let (ino, mode, ctime) = (0u64, if meta.permissions().readonly() { 0o444 } else { 0o666 }, None);

        Self {
            kind,
            size: meta.len(),
            mtime: meta.modified().ok(),
            birthtime: meta.created().ok(),
            atime: meta.accessed().ok(),
            ctime,
            ino,
            mode,
        }
    }

    /// Whether this snapshot describes a directory.
    pub fn is_directory(&self) -> bool {
        self.kind.is_directory()
    }
}

/// Decide whether two optional snapshots represent a meaningful change.
///
/// Appearing or disappearing is always a change; two absent snapshots are
/// not. Present snapshots are compared field by field with `atime` and
/// `ctime` excluded.
pub fn changed(old: Option<&StatSnapshot>, current: Option<&StatSnapshot>) -> bool {
    match (old, current) {
        (None, None) => false,
        (Some(_), None) | (None, Some(_)) => true,
        (Some(old), Some(current)) => {
            old.kind != current.kind
                || old.size != current.size
                || old.mtime != current.mtime
                || old.birthtime != current.birthtime
                || old.ino != current.ino
                || old.mode != current.mode
        }
    }
}

/// Decide whether two snapshots refer to the same underlying object.
///
/// Used to detect a path being replaced by a different inode (the swap-file
/// save pattern). Prefers birthtime; falls back to inode identity on
/// filesystems that do not record creation times.
pub fn same_identity(old: &StatSnapshot, current: &StatSnapshot) -> bool {
    match (old.birthtime, current.birthtime) {
        (Some(a), Some(b)) => a == b,
        _ => old.ino == current.ino,
    }
}

/// Snapshot a path, following symlinks or not per `follow_links`.
pub async fn stat_path(path: &Path, follow_links: bool) -> io::Result<StatSnapshot> {
    let meta = if follow_links {
        tokio::fs::metadata(path).await?
    } else {
        tokio::fs::symlink_metadata(path).await?
    };
    Ok(StatSnapshot::from_metadata(&meta))
}

/// Test existence under the same link-following rule as [`stat_path`].
///
/// With `follow_links` a dangling symlink does not exist; without it the
/// watched object is the link itself, which exists until the link is
/// removed.
pub async fn path_exists(path: &Path, follow_links: bool) -> bool {
    if follow_links {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    } else {
        tokio::fs::symlink_metadata(path).await.is_ok()
    }
}

#[cfg(unix)]
fn unix_time(secs: i64, nsec: i64) -> Option<SystemTime> {
    if secs >= 0 {
        UNIX_EPOCH.checked_add(Duration::new(secs as u64, nsec as u32))
    } else {
        UNIX_EPOCH.checked_sub(Duration::from_secs(secs.unsigned_abs()))
    }
}
