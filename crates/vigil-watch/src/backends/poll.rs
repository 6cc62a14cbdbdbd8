//! Stat-polling backend.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use notify::{PollWatcher, RecursiveMode, Watcher};
use tracing::trace;

use super::{Backend, BackendHandle, RawNotification, WatcherKind};
use crate::config::WatchConfig;
use crate::error::{Error, Result};
use crate::WatchMethod;

/// Periodic stat comparison at the configured `interval`.
///
/// Works everywhere, at the cost of latency bounded by the interval and
/// memory proportional to the number of polled paths. The fallback of
/// choice when push notification is unavailable.
pub struct PollBackend;

#[async_trait]
impl Backend for PollBackend {
    fn method(&self) -> WatchMethod {
        WatchMethod::Poll
    }

    async fn bind(
        &self,
        path: &Path,
        config: &WatchConfig,
        tx: flume::Sender<RawNotification>,
    ) -> Result<BackendHandle> {
        let poll_config = notify::Config::default().with_poll_interval(config.interval);

        let mut watcher = PollWatcher::new(
            move |res: notify::Result<notify::Event>| {
                let payload = match res {
                    Ok(event) => Some(event),
                    Err(err) => {
                        trace!(%err, "poll backend delivered an error, poking anyway");
                        None
                    }
                };
                let _ = tx.send(RawNotification {
                    method: WatchMethod::Poll,
                    payload,
                });
            },
            poll_config,
        )
        .map_err(|source| Error::Bind {
            method: WatchMethod::Poll,
            path: path.to_path_buf(),
            source: Arc::new(source),
        })?;

        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|source| Error::Bind {
                method: WatchMethod::Poll,
                path: path.to_path_buf(),
                source: Arc::new(source),
            })?;

        Ok(BackendHandle::new(
            WatchMethod::Poll,
            path.to_path_buf(),
            WatcherKind::Poll(watcher),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn poll_detects_a_write() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        tokio::fs::write(&file, b"one").await.unwrap();

        let config = WatchConfig::new().with_interval(Duration::from_millis(50));
        let (tx, rx) = flume::unbounded();
        let handle = PollBackend.bind(&file, &config, tx).await.unwrap();

        // Give the poller a baseline scan before mutating.
        tokio::time::sleep(Duration::from_millis(120)).await;
        tokio::fs::write(&file, b"two-longer").await.unwrap();

        let raw = tokio::time::timeout(Duration::from_secs(5), rx.recv_async())
            .await
            .expect("notification within deadline")
            .expect("channel open");
        assert_eq!(raw.method, WatchMethod::Poll);

        handle.unbind();
    }
}
