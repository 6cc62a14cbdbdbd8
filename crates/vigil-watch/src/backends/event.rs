//! Push-notification backend.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::trace;

use super::{Backend, BackendHandle, RawNotification, WatcherKind};
use crate::config::WatchConfig;
use crate::error::{Error, Result};
use crate::WatchMethod;

/// OS push notifications (inotify, FSEvents, ReadDirectoryChangesW).
///
/// Fast, but the payloads are unreliable: kinds and attached paths vary by
/// platform and may describe a sibling rather than the bound path. The
/// payload is forwarded untouched; interpretation happens in the node's
/// reconciliation pass. Binding can fail outright on filesystems without
/// native notification support (network shares, some FUSE mounts), which
/// is what the poll fallback is for.
pub struct EventBackend;

#[async_trait]
impl Backend for EventBackend {
    fn method(&self) -> WatchMethod {
        WatchMethod::Event
    }

    async fn bind(
        &self,
        path: &Path,
        _config: &WatchConfig,
        tx: flume::Sender<RawNotification>,
    ) -> Result<BackendHandle> {
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| {
                let payload = match res {
                    Ok(event) => Some(event),
                    Err(err) => {
                        trace!(%err, "event backend delivered an error, poking anyway");
                        None
                    }
                };
                // A send failure means the node is gone; nothing to do.
                let _ = tx.send(RawNotification {
                    method: WatchMethod::Event,
                    payload,
                });
            },
            notify::Config::default(),
        )
        .map_err(|source| Error::Bind {
            method: WatchMethod::Event,
            path: path.to_path_buf(),
            source: Arc::new(source),
        })?;

        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|source| Error::Bind {
                method: WatchMethod::Event,
                path: path.to_path_buf(),
                source: Arc::new(source),
            })?;

        Ok(BackendHandle::new(
            WatchMethod::Event,
            path.to_path_buf(),
            WatcherKind::Event(watcher),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_delivers_raw_notifications() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = flume::unbounded();

        let handle = EventBackend
            .bind(dir.path(), &WatchConfig::default(), tx)
            .await
            .unwrap();

        tokio::fs::write(dir.path().join("new.txt"), b"hello")
            .await
            .unwrap();

        let raw = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv_async())
            .await
            .expect("notification within deadline")
            .expect("channel open");
        assert_eq!(raw.method, WatchMethod::Event);

        handle.unbind();
    }

    #[tokio::test]
    async fn bind_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = flume::unbounded();

        let err = EventBackend
            .bind(&dir.path().join("absent"), &WatchConfig::default(), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Bind { method: WatchMethod::Event, .. }));
    }
}
