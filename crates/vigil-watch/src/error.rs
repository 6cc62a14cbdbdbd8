//! Error types for the watcher.
//!
//! Errors are cloneable so a single failure can be delivered both to the
//! caller and to every event subscriber; underlying OS errors are shared
//! behind `Arc` and folded into the display message.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::WatchMethod;

/// Errors that can occur while watching a path.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Configuration error, raised before any backend is touched.
    #[error("configuration error: {0}")]
    Config(String),

    /// A single backend rejected the bind. Recovered internally by falling
    /// back to the next preferred method.
    #[error("failed to bind {method} backend for '{}': {source}", .path.display())]
    Bind {
        /// The backend that rejected the bind.
        method: WatchMethod,
        /// The path being bound.
        path: PathBuf,
        /// The underlying notify error.
        source: Arc<notify::Error>,
    },

    /// Every preferred backend rejected the bind.
    #[error("all watch backends failed for '{}': {}", .path.display(), format_attempts(.attempts))]
    AllBackendsFailed {
        /// The path being bound.
        path: PathBuf,
        /// Each attempted method with its failure message, in order.
        attempts: Vec<(WatchMethod, String)>,
    },

    /// Reading a path's metadata failed.
    #[error("failed to stat '{}': {source}", .path.display())]
    Stat {
        /// The path being inspected.
        path: PathBuf,
        /// The underlying I/O error.
        source: Arc<std::io::Error>,
    },

    /// Enumerating a directory's children failed.
    #[error("failed to read directory '{}': {source}", .path.display())]
    Readdir {
        /// The directory being listed.
        path: PathBuf,
        /// The underlying I/O error.
        source: Arc<std::io::Error>,
    },

    /// A child watcher could not be spawned during activation.
    #[error("failed to watch child '{}': {message}", .path.display())]
    ChildFailure {
        /// The child path that failed.
        path: PathBuf,
        /// Description of the child's activation failure.
        message: String,
    },

    /// An operation was invoked on a node that has already closed.
    #[error("watcher for '{}' is closed", .0.display())]
    Closed(PathBuf),

    /// An ignore pattern failed to compile.
    #[error("pattern error: {0}")]
    Pattern(String),

    /// IO error outside the stat/readdir paths.
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),
}

/// Result type for watcher operations.
pub type Result<T> = std::result::Result<T, Error>;

fn format_attempts(attempts: &[(WatchMethod, String)]) -> String {
    attempts
        .iter()
        .map(|(method, message)| format!("{method}: {message}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<vigil_scan::Error> for Error {
    fn from(err: vigil_scan::Error) -> Self {
        Error::Pattern(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_error_lists_every_attempt() {
        let err = Error::AllBackendsFailed {
            path: PathBuf::from("/srv/share"),
            attempts: vec![
                (WatchMethod::Event, "inotify unavailable".into()),
                (WatchMethod::Poll, "permission denied".into()),
            ],
        };
        let message = err.to_string();
        assert!(message.contains("/srv/share"));
        assert!(message.contains("event: inotify unavailable"));
        assert!(message.contains("poll: permission denied"));
    }

    #[test]
    fn stat_error_embeds_cause_in_message() {
        let err = Error::Stat {
            path: PathBuf::from("/x"),
            source: Arc::new(std::io::Error::from(std::io::ErrorKind::NotFound)),
        };
        assert!(err.to_string().contains("/x"));
    }

    #[test]
    fn errors_are_cloneable() {
        let err = Error::Closed(PathBuf::from("/gone"));
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }
}
