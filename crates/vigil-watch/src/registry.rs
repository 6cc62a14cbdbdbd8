//! Process-wide node registry.
//!
//! One node per absolute path, across every caller in the process. The
//! map is a lazily-initialised singleton and is never handed out; callers
//! go through [`obtain`], and nodes deregister themselves on close. The
//! lock is held only for map access — never while a node lock is taken —
//! so the registry sits at the bottom of the lock order.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use tokio::sync::Mutex;
use tracing::trace;

use crate::config::WatchConfig;
use crate::error::Result;
use crate::node::Node;

static NODES: OnceLock<Mutex<HashMap<PathBuf, Arc<Node>>>> = OnceLock::new();

fn nodes() -> &'static Mutex<HashMap<PathBuf, Arc<Node>>> {
    NODES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Fetch the node registered for `path`, creating one if absent.
///
/// An existing live node has its configuration replaced and is returned
/// as-is; the caller decides whether to re-watch. A terminal leftover
/// (closed but not yet deregistered) is evicted and replaced. The `bool`
/// reports whether a new node was created.
pub(crate) async fn obtain(path: PathBuf, config: WatchConfig) -> Result<(Arc<Node>, bool)> {
    loop {
        let existing = { nodes().lock().await.get(&path).cloned() };
        match existing {
            Some(node) if !node.state().await.is_terminal() => {
                node.reconfigure(config.clone()).await?;
                return Ok((node, false));
            }
            Some(stale) => {
                trace!(path = %path.display(), "evicting closed node from registry");
                forget(&stale).await;
            }
            None => {
                let node = Node::new(path.clone(), config.clone())?;
                let mut map = nodes().lock().await;
                if map.contains_key(&path) {
                    // Lost a race to another caller; retry with theirs.
                    continue;
                }
                map.insert(path, node.clone());
                return Ok((node, true));
            }
        }
    }
}

/// Drop `node`'s registration, if it is still the one registered.
///
/// The pointer check keeps a late deregistration from evicting a
/// replacement node that has since taken over the path.
pub(crate) async fn forget(node: &Node) {
    let mut map = nodes().lock().await;
    let node_ptr: *const Node = node;
    let matches = map
        .get(node.path())
        .is_some_and(|existing| std::ptr::eq(Arc::as_ptr(existing), node_ptr));
    if matches {
        map.remove(node.path());
    }
}
