//! # Vigil recursive filesystem watcher
//!
//! Watch a path and every descendant, and receive a clean stream of
//! semantic change events — `create`, `update`, `delete` — instead of the
//! raw, unreliable notifications the OS produces.
//!
//! ## Architecture Overview
//!
//! Every watched path gets a [`Node`], deduplicated process-wide by an
//! internal registry. A node binds one OS backend (push notifications
//! where the filesystem supports them, stat polling as the fallback),
//! debounces whatever that backend reports, and periodically reconciles
//! itself against the real state of the disk:
//!
//! ```text
//! ┌──────────┐    ┌────────────┐    ┌──────────────────┐
//! │ Registry │───▶│    Node    │───▶│  Watch Backend   │
//! │ (dedup)  │    │ (per path) │    │  (event | poll)  │
//! └──────────┘    └────────────┘    └──────────────────┘
//!                       │                    │ raw notifications
//!                       ▼                    ▼
//!                 ┌────────────┐    ┌──────────────────┐
//!                 │  Children  │    │ Debounce + diff  │
//!                 │ (bubbling) │◀───│  reconciliation  │
//!                 └────────────┘    └──────────────────┘
//! ```
//!
//! Directory nodes spawn a child node per entry and bubble child events
//! upward, so subscribing to the root is enough to observe the whole
//! tree.
//!
//! ## Quick Start
//!
//! ```no_run
//! use vigil_watch::{watch, NodeEvent, WatchConfig};
//!
//! # async fn demo() -> vigil_watch::Result<()> {
//! let node = watch("/var/data", WatchConfig::default()).await?;
//! let mut events = node.subscribe();
//! while let Ok(event) = events.recv().await {
//!     if let NodeEvent::Change(change) = event {
//!         println!("{} {}", change.kind, change.path.display());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod backends;
mod config;
mod error;
mod events;
mod node;
mod registry;
mod stat;

pub use config::{WatchConfig, DEFAULT_CATCHUP_DELAY, DEFAULT_INTERVAL};
pub use error::{Error, Result};
pub use events::{ChangeEvent, ChangeKind, CloseReason, NodeEvent};
pub use node::{Node, NodeState};
pub use stat::{changed, path_exists, same_identity, stat_path, FileKind, StatSnapshot};
pub use vigil_scan::{IgnoreMatcher, IgnoreOptions};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Available OS watching mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WatchMethod {
    /// OS push notifications; fast but unreliable in detail.
    Event,
    /// Periodic stat comparison; reliable but slower.
    Poll,
}

impl std::fmt::Display for WatchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchMethod::Event => write!(f, "event"),
            WatchMethod::Poll => write!(f, "poll"),
        }
    }
}

/// Watch `path` and all of its descendants.
///
/// Consults the process-wide registry: watching the same absolute path
/// twice yields the same [`Node`] with its configuration updated, and a
/// single backend binding. Relative paths are resolved against the
/// current working directory.
pub async fn watch(path: impl AsRef<Path>, config: WatchConfig) -> Result<Arc<Node>> {
    let path = absolute(path.as_ref())?;
    let (node, _created) = registry::obtain(path, config).await?;
    node.watch().await?;
    Ok(node)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Re-export of the common surface for glob imports.
pub mod prelude {
    pub use crate::{
        watch, ChangeEvent, ChangeKind, CloseReason, Node, NodeEvent, NodeState, Result,
        StatSnapshot, WatchConfig, WatchMethod,
    };
    pub use vigil_scan::IgnoreOptions;
}
