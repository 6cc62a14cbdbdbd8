//! Backend implementations for OS-level path watching.
//!
//! A backend binds one path and forwards raw notifications into the
//! owning node's pump channel. Raw payloads are hints only: event kinds
//! and attached paths from the OS are unreliable, and the node's
//! reconciliation pass re-derives the truth from stat and readdir.

mod event;
mod poll;

pub use event::EventBackend;
pub use poll::PollBackend;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use notify::Watcher as _;
use tracing::{debug, warn};

use crate::config::WatchConfig;
use crate::error::{Error, Result};
use crate::WatchMethod;

/// A raw notification from the OS, prior to any interpretation.
#[derive(Debug)]
pub struct RawNotification {
    /// Which backend produced the notification.
    pub method: WatchMethod,
    /// The payload, if the OS delivered one. Hint only.
    pub payload: Option<notify::Event>,
}

/// A successfully bound backend.
///
/// Owns the underlying watcher; dropping the handle (or calling
/// [`BackendHandle::unbind`]) stops delivery and releases the OS resources.
pub struct BackendHandle {
    method: WatchMethod,
    path: PathBuf,
    watcher: WatcherKind,
}

enum WatcherKind {
    Event(notify::RecommendedWatcher),
    Poll(notify::PollWatcher),
}

impl BackendHandle {
    fn new(method: WatchMethod, path: PathBuf, watcher: WatcherKind) -> Self {
        Self {
            method,
            path,
            watcher,
        }
    }

    /// The method this handle was bound with.
    pub fn method(&self) -> WatchMethod {
        self.method
    }

    /// Release the binding.
    pub fn unbind(mut self) {
        let result = match &mut self.watcher {
            WatcherKind::Event(w) => w.unwatch(&self.path),
            WatcherKind::Poll(w) => w.unwatch(&self.path),
        };
        if let Err(err) = result {
            debug!(path = %self.path.display(), %err, "unwatch failed during unbind");
        }
    }
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHandle")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish()
    }
}

/// One OS watching mechanism.
#[async_trait]
pub trait Backend: Send + Sync {
    /// The method this backend implements.
    fn method(&self) -> WatchMethod;

    /// Bind `path`, delivering raw notifications into `tx`.
    ///
    /// Binding is always non-recursive; recursion belongs to the node
    /// tree. A bind failure is recoverable by trying the next preferred
    /// method.
    async fn bind(
        &self,
        path: &Path,
        config: &WatchConfig,
        tx: flume::Sender<RawNotification>,
    ) -> Result<BackendHandle>;
}

/// Look up the backend implementing `method`.
pub fn backend_for(method: WatchMethod) -> &'static dyn Backend {
    match method {
        WatchMethod::Event => &EventBackend,
        WatchMethod::Poll => &PollBackend,
    }
}

/// Walk `config.preferred_methods`, binding the first backend that
/// accepts the path.
///
/// On exhaustion, the error aggregates every attempted method with its
/// failure message.
pub async fn bind_with_fallback(
    path: &Path,
    config: &WatchConfig,
    tx: flume::Sender<RawNotification>,
) -> Result<(WatchMethod, BackendHandle)> {
    if config.preferred_methods.is_empty() {
        return Err(Error::Config(
            "preferred_methods must name at least one backend".into(),
        ));
    }

    let mut attempts = Vec::new();
    for &method in &config.preferred_methods {
        match backend_for(method).bind(path, config, tx.clone()).await {
            Ok(handle) => {
                debug!(path = %path.display(), %method, "backend bound");
                return Ok((method, handle));
            }
            Err(err) => {
                warn!(path = %path.display(), %method, %err, "backend bind failed, falling back");
                attempts.push((method, err.to_string()));
            }
        }
    }

    Err(Error::AllBackendsFailed {
        path: path.to_path_buf(),
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fallback_rejects_empty_method_list() {
        let config = WatchConfig::new().with_preferred_methods(Vec::new());
        let (tx, _rx) = flume::unbounded();
        let dir = tempfile::tempdir().unwrap();

        let err = bind_with_fallback(dir.path(), &config, tx).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn fallback_aggregates_every_failed_attempt() {
        let config = WatchConfig::default();
        let (tx, _rx) = flume::unbounded();
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("not-there");

        let err = bind_with_fallback(&missing, &config, tx).await.unwrap_err();
        match err {
            Error::AllBackendsFailed { attempts, .. } => {
                assert_eq!(attempts.len(), 2);
                assert_eq!(attempts[0].0, WatchMethod::Event);
                assert_eq!(attempts[1].0, WatchMethod::Poll);
            }
            other => panic!("expected exhaustion error, got {other}"),
        }
    }

    #[tokio::test]
    async fn fallback_binds_first_working_method() {
        let config = WatchConfig::default();
        let (tx, _rx) = flume::unbounded();
        let dir = tempfile::tempdir().unwrap();

        let (method, handle) = bind_with_fallback(dir.path(), &config, tx).await.unwrap();
        assert_eq!(method, WatchMethod::Event);
        assert_eq!(handle.method(), WatchMethod::Event);
        handle.unbind();
    }
}
