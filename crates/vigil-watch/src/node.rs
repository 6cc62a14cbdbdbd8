//! Per-path watcher nodes.
//!
//! A [`Node`] owns everything about one absolute path: its last stat
//! snapshot, its backend binding, its children, and its debounced
//! reconciliation pipeline. All mutable state lives behind a single async
//! mutex, which makes each node a small serialising actor: state
//! transitions and children-map edits never interleave, and the
//! reconciliation pass needs no finer-grained locking.
//!
//! Raw OS notifications do not carry meaning here. Whatever the backend
//! reports, the node schedules a *catch-up*: after `catchup_delay` of
//! quiescence it re-checks existence, re-stats the path, and diffs
//! directory contents against its child map. That pass is the only thing
//! that emits semantic change events.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use futures::future::{join_all, BoxFuture};
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};
use vigil_scan::{list_dir, IgnoreMatcher};

use crate::backends::{bind_with_fallback, BackendHandle, RawNotification};
use crate::config::WatchConfig;
use crate::error::{Error, Result};
use crate::events::{ChangeEvent, ChangeKind, CloseReason, NodeEvent};
use crate::stat::{self, StatSnapshot};
use crate::{registry, WatchMethod};

/// Capacity of each node's broadcast channel. Subscribers that fall more
/// than this far behind see a lag notice, not a stall.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Outcome of one reconciliation batch, delivered to every caller whose
/// notification was folded into it.
pub type BatchResult = Result<()>;

/// Lifecycle state of a node.
///
/// Transitions are monotone: `Pending → Active → (Closed | Deleted)`, and
/// the terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Constructed but not yet activated.
    Pending,
    /// Backend bound, children enumerated, events flowing.
    Active,
    /// Shut down by a caller or a failure.
    Closed,
    /// Shut down because the watched path disappeared.
    Deleted,
}

impl NodeState {
    /// Whether this state can never be left.
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeState::Closed | NodeState::Deleted)
    }
}

/// A slot in the children map.
///
/// `Reserved` marks a child whose spawn is in flight; it is placed before
/// any suspension point so no concurrent pass can observe the name as
/// absent and spawn it twice. Every consumer of the map handles the
/// sentinel explicitly.
enum ChildSlot {
    Reserved,
    Ready(Arc<Node>),
}

/// The pending reconciliation for one debounce window.
struct PendingBatch {
    deadline: Instant,
    waiters: Vec<oneshot::Sender<BatchResult>>,
}

struct NodeInner {
    state: NodeState,
    config: WatchConfig,
    matcher: IgnoreMatcher,
    previous: Option<StatSnapshot>,
    method: Option<WatchMethod>,
    handle: Option<BackendHandle>,
    children: HashMap<String, ChildSlot>,
    batch: Option<PendingBatch>,
}

/// The per-path watcher.
///
/// Obtained from [`crate::watch`]; at most one node exists per absolute
/// path at any instant (registry dedup). Subscribe with
/// [`Node::subscribe`] to receive [`NodeEvent`]s for this path and, via
/// bubbling, every descendant.
pub struct Node {
    path: PathBuf,
    events: broadcast::Sender<NodeEvent>,
    /// Self-handle for spawned tasks and child bubbling; never upgraded
    /// into an ownership cycle.
    weak: Weak<Node>,
    inner: Mutex<NodeInner>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("path", &self.path).finish()
    }
}

impl Node {
    pub(crate) fn new(path: PathBuf, config: WatchConfig) -> Result<Arc<Self>> {
        let matcher = IgnoreMatcher::new(&config.ignore)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Arc::new_cyclic(|weak| Self {
            path,
            events,
            weak: weak.clone(),
            inner: Mutex::new(NodeInner {
                state: NodeState::Pending,
                config,
                matcher,
                previous: None,
                method: None,
                handle: None,
                children: HashMap::new(),
                batch: None,
            }),
        }))
    }

    /// The absolute path this node watches.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Subscribe to this node's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> NodeState {
        self.inner.lock().await.state
    }

    /// The backend method currently bound, if any.
    pub async fn method(&self) -> Option<WatchMethod> {
        self.inner.lock().await.method
    }

    /// The last stat snapshot this node observed.
    pub async fn last_snapshot(&self) -> Option<StatSnapshot> {
        self.inner.lock().await.previous.clone()
    }

    /// Names of the currently tracked children, sorted.
    pub async fn child_names(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut names: Vec<String> = inner.children.keys().cloned().collect();
        names.sort();
        names
    }

    /// Activate the node: bind a backend and, for directories, spawn a
    /// child node per surviving directory entry.
    ///
    /// Idempotent: on an already-active node this emits `Watching(None)`
    /// and returns without touching the binding. Completion is also
    /// announced on the event stream as `Watching`.
    pub async fn watch(&self) -> Result<()> {
        self.activate(false).await
    }

    /// Shut the node down, cascading to all children.
    ///
    /// With reason [`CloseReason::Deleted`] a final delete change event is
    /// emitted immediately before the close event. Closing a node that is
    /// already terminal is a no-op.
    pub async fn close(&self, reason: CloseReason) {
        let mut inner = self.inner.lock().await;
        self.close_with(&mut inner, reason).await;
    }

    /// Feed one raw notification into the debounce pipeline.
    ///
    /// Returns a receiver resolving when the batch this notification was
    /// folded into completes. Most callers drop it; the forwarded re-check
    /// awaits it so a parent batch only resolves after its fan-out does.
    pub(crate) async fn poke(&self) -> oneshot::Receiver<BatchResult> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock().await;

        if inner.state.is_terminal() {
            let _ = tx.send(Ok(()));
            return rx;
        }

        let deadline = Instant::now() + inner.config.catchup_delay;
        match &mut inner.batch {
            Some(batch) => {
                // Another notification inside the window: push the
                // deadline back and join the existing batch.
                batch.deadline = deadline;
                batch.waiters.push(tx);
            }
            None => {
                inner.batch = Some(PendingBatch {
                    deadline,
                    waiters: vec![tx],
                });
                self.spawn_batch_driver();
            }
        }
        rx
    }

    pub(crate) async fn reconfigure(&self, config: WatchConfig) -> Result<()> {
        let matcher = IgnoreMatcher::new(&config.ignore)?;
        let mut inner = self.inner.lock().await;
        if inner.state.is_terminal() {
            return Err(Error::Closed(self.path.clone()));
        }
        inner.config = config;
        inner.matcher = matcher;
        Ok(())
    }

    /// Boxed re-entry points; the node tree recurses through these, and
    /// the boxing is what keeps the future types finite.
    fn watch_boxed(&self, reset: bool) -> BoxFuture<'static, Result<()>> {
        let weak = self.weak.clone();
        Box::pin(async move {
            match weak.upgrade() {
                Some(node) => node.activate(reset).await,
                None => Ok(()),
            }
        })
    }

    fn close_boxed(&self, reason: CloseReason) -> BoxFuture<'static, ()> {
        let weak = self.weak.clone();
        Box::pin(async move {
            if let Some(node) = weak.upgrade() {
                node.close(reason).await;
            }
        })
    }

    // ------------------------------------------------------------------
    // Activation
    // ------------------------------------------------------------------

    async fn activate(&self, reset: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;

        match inner.state {
            NodeState::Closed | NodeState::Deleted => {
                return Err(Error::Closed(self.path.clone()));
            }
            NodeState::Active if !reset => {
                self.emit(NodeEvent::Watching(None));
                return Ok(());
            }
            _ => {}
        }

        if reset {
            self.emit_log("rebinding backend");
        }

        // Release any prior binding before re-binding.
        if let Some(handle) = inner.handle.take() {
            handle.unbind();
        }
        inner.method = None;

        let current = match stat::stat_path(&self.path, inner.config.follow_links).await {
            Ok(snapshot) => snapshot,
            Err(source) => {
                let err = Error::Stat {
                    path: self.path.clone(),
                    source: Arc::new(source),
                };
                return self.fail_activation(&mut inner, err).await;
            }
        };
        inner.previous = Some(current.clone());

        let (raw_tx, raw_rx) = flume::unbounded();
        let (method, handle) = match bind_with_fallback(&self.path, &inner.config, raw_tx).await {
            Ok(bound) => bound,
            Err(err) => return self.fail_activation(&mut inner, err).await,
        };
        inner.method = Some(method);
        inner.handle = Some(handle);
        self.spawn_pump(raw_rx);

        if current.is_directory() {
            let listing = match list_dir(&self.path, &inner.matcher).await {
                Ok(listing) => listing,
                Err(source) => {
                    let err = Error::Readdir {
                        path: self.path.clone(),
                        source: Arc::new(source),
                    };
                    return self.fail_activation(&mut inner, err).await;
                }
            };

            let config = inner.config.clone();
            for entry in listing {
                // On a reset, live children survive the re-enumeration;
                // re-spawning them would double up their event bridges.
                let existing = match inner.children.get(&entry.name) {
                    Some(ChildSlot::Ready(child)) => Some(Arc::clone(child)),
                    Some(ChildSlot::Reserved) => continue,
                    None => None,
                };
                if let Some(child) = existing {
                    if !child.state().await.is_terminal() {
                        continue;
                    }
                }
                inner
                    .children
                    .insert(entry.name.clone(), ChildSlot::Reserved);
                match self.spawn_child(&config, &entry.name, &entry.full_path).await {
                    Ok(Some(child)) => {
                        inner.children.insert(entry.name, ChildSlot::Ready(child));
                    }
                    Ok(None) => {
                        inner.children.remove(&entry.name);
                    }
                    Err(err) => {
                        let failure = Error::ChildFailure {
                            path: entry.full_path.clone(),
                            message: err.to_string(),
                        };
                        error!(
                            path = %self.path.display(),
                            child = %entry.full_path.display(),
                            %err,
                            "child activation failed"
                        );
                        self.close_with(&mut inner, CloseReason::ChildFailure).await;
                        self.emit(NodeEvent::Watching(Some(failure.clone())));
                        return Err(failure);
                    }
                }
            }
        }

        inner.state = NodeState::Active;
        self.emit_log(format!("watching via {method} backend"));
        self.emit(NodeEvent::Watching(None));
        Ok(())
    }

    async fn fail_activation(&self, inner: &mut NodeInner, err: Error) -> Result<()> {
        error!(path = %self.path.display(), %err, "activation failed");
        self.emit(NodeEvent::Error(err.clone()));
        self.close_with(inner, CloseReason::Failure).await;
        self.emit(NodeEvent::Watching(Some(err.clone())));
        Err(err)
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    async fn close_with(&self, inner: &mut NodeInner, reason: CloseReason) {
        if inner.state.is_terminal() {
            return;
        }
        inner.state = if reason == CloseReason::Deleted {
            NodeState::Deleted
        } else {
            NodeState::Closed
        };

        // Dropping the waiters cancels anything awaiting the batch; the
        // driver task finds no batch and exits.
        inner.batch = None;

        if let Some(handle) = inner.handle.take() {
            handle.unbind();
        }
        inner.method = None;

        // A deleted directory takes its children with it; any other
        // close cascades as a plain shutdown.
        let child_reason = if reason == CloseReason::Deleted {
            CloseReason::Deleted
        } else {
            CloseReason::Normal
        };
        for (name, slot) in std::mem::take(&mut inner.children) {
            match slot {
                ChildSlot::Ready(child) => child.close_boxed(child_reason).await,
                ChildSlot::Reserved => {
                    trace!(
                        path = %self.path.display(),
                        child = %name,
                        "discarding reserved child slot during close"
                    );
                }
            }
        }

        if reason == CloseReason::Deleted {
            let previous = inner.previous.take();
            self.emit(NodeEvent::Change(ChangeEvent::deleted(
                self.path.clone(),
                previous,
            )));
        }

        if matches!(reason, CloseReason::Failure | CloseReason::ChildFailure) {
            error!(path = %self.path.display(), %reason, "watcher shut down after failure");
        }
        self.emit_log(format!("closed ({reason})"));
        self.emit(NodeEvent::Close(reason));
        registry::forget(self).await;
    }

    // ------------------------------------------------------------------
    // Debounce pipeline
    // ------------------------------------------------------------------

    fn spawn_pump(&self, rx: flume::Receiver<RawNotification>) {
        let weak = self.weak.clone();
        tokio::spawn(async move {
            while let Ok(raw) = rx.recv_async().await {
                let Some(node) = weak.upgrade() else { break };
                trace!(
                    path = %node.path.display(),
                    method = %raw.method,
                    payload = ?raw.payload,
                    "raw notification"
                );
                let _ = node.poke().await;
            }
        });
    }

    fn spawn_batch_driver(&self) {
        let weak = self.weak.clone();
        tokio::spawn(async move {
            loop {
                let deadline = {
                    let Some(node) = weak.upgrade() else { return };
                    let inner = node.inner.lock().await;
                    match &inner.batch {
                        Some(batch) => batch.deadline,
                        None => return,
                    }
                };

                tokio::time::sleep_until(deadline).await;

                let Some(node) = weak.upgrade() else { return };
                let mut inner = node.inner.lock().await;
                let due = match &inner.batch {
                    Some(batch) => batch.deadline <= Instant::now(),
                    // Cleared by close.
                    None => return,
                };
                if !due {
                    // Pushed back by a newer notification; keep waiting.
                    drop(inner);
                    continue;
                }
                let waiters = match inner.batch.take() {
                    Some(batch) => batch.waiters,
                    None => return,
                };
                drop(inner);

                let result = node.reconcile().await;
                if let Err(err) = &result {
                    node.emit(NodeEvent::Error(err.clone()));
                }
                for waiter in waiters {
                    let _ = waiter.send(result.clone());
                }
                return;
            }
        });
    }

    /// The three-phase catch-up pass: existence, change check, diff.
    async fn reconcile(&self) -> BatchResult {
        let mut inner = self.inner.lock().await;
        if inner.state != NodeState::Active {
            return Ok(());
        }

        // Phase A: existence, under the same link-following rule as the
        // stat refresh below.
        let exists = stat::path_exists(&self.path, inner.config.follow_links).await;
        if !exists {
            debug!(path = %self.path.display(), "path disappeared");
            self.close_with(&mut inner, CloseReason::Deleted).await;
            return Ok(());
        }

        let current = stat::stat_path(&self.path, inner.config.follow_links)
            .await
            .map_err(|source| Error::Stat {
                path: self.path.clone(),
                source: Arc::new(source),
            })?;

        let previous = inner.previous.clone();
        if let Some(prev) = &previous {
            if !stat::same_identity(prev, &current) {
                // Same name, different inode: the path was replaced
                // underneath us. The old binding is stale, and the
                // replacement is a delete of the old object followed by
                // the appearance of a new one.
                self.emit_log("inode changed, rebuilding backend");
                self.emit(NodeEvent::Change(ChangeEvent::deleted(
                    self.path.clone(),
                    previous.clone(),
                )));
                drop(inner);
                self.activate(true).await?;
                if let Some(snapshot) = self.last_snapshot().await {
                    self.emit(NodeEvent::Change(ChangeEvent::created(
                        self.path.clone(),
                        snapshot,
                    )));
                }
                return Ok(());
            }
        }

        // Phase B: change check.
        inner.previous = Some(current.clone());
        if !stat::changed(previous.as_ref(), Some(&current)) {
            return Ok(());
        }

        // Phase C: diff.
        if !current.is_directory() {
            self.emit(NodeEvent::Change(ChangeEvent::updated(
                self.path.clone(),
                current,
                previous,
            )));
            return Ok(());
        }

        let listing = list_dir(&self.path, &inner.matcher)
            .await
            .map_err(|source| Error::Readdir {
                path: self.path.clone(),
                source: Arc::new(source),
            })?;
        let listed: HashMap<String, PathBuf> = listing
            .into_iter()
            .map(|entry| (entry.name, entry.full_path))
            .collect();

        // Partition the work while the lock is held, so new names are
        // reserved before anything else can observe their absence.
        let mut recheck = Vec::new();
        let mut removed = Vec::new();
        let mut created = Vec::new();

        let tracked: Vec<String> = inner.children.keys().cloned().collect();
        for name in tracked {
            if listed.contains_key(&name) {
                continue;
            }
            match inner.children.remove(&name) {
                Some(ChildSlot::Ready(child)) => removed.push(child),
                Some(ChildSlot::Reserved) => {
                    // An in-flight spawn for an entry that is already gone
                    // again; drop the reservation, the spawner will find
                    // it missing and discard its node.
                    self.emit_log(format!("discarding reserved child '{name}'"));
                }
                None => {}
            }
        }

        let forward = inner.method == Some(WatchMethod::Event);
        for (name, full_path) in &listed {
            let existing = match inner.children.get(name) {
                Some(ChildSlot::Ready(child)) => Some(Arc::clone(child)),
                // Spawn already in flight for this name.
                Some(ChildSlot::Reserved) => continue,
                None => None,
            };
            match existing {
                Some(child) => {
                    if child.state().await.is_terminal() {
                        // Stale entry whose close has not been reaped yet;
                        // the path is back on disk, so treat it as new.
                        inner.children.insert(name.clone(), ChildSlot::Reserved);
                        created.push((name.clone(), full_path.clone()));
                    } else if forward {
                        recheck.push(child);
                    }
                }
                None => {
                    inner.children.insert(name.clone(), ChildSlot::Reserved);
                    created.push((name.clone(), full_path.clone()));
                }
            }
        }

        let config = inner.config.clone();
        drop(inner);

        // The three arms run concurrently; the batch resolves only after
        // all of them settle.
        let recheck_arm = async {
            // Event payloads are unreliable about *which* path changed, so
            // push an empty batch down to every surviving child and let
            // each reconcile itself.
            join_all(recheck.iter().map(|child| async move {
                let done = child.poke().await;
                let _ = done.await;
            }))
            .await;
        };

        let removal_arm = async {
            join_all(removed.iter().map(|child| async move {
                child.close_boxed(CloseReason::Deleted).await;
            }))
            .await;
        };

        let creation_arm = async {
            join_all(created.iter().map(|(name, full_path)| {
                let config = config.clone();
                async move {
                    match self.spawn_child(&config, name, full_path).await {
                        Ok(Some(child)) => {
                            let snapshot = child.last_snapshot().await;
                            if self.fill_reservation(name, Arc::clone(&child)).await {
                                if let Some(snapshot) = snapshot {
                                    self.emit(NodeEvent::Change(ChangeEvent::created(
                                        full_path.clone(),
                                        snapshot,
                                    )));
                                }
                            } else {
                                // Reservation vanished while we were
                                // spawning; the node is ours to clean up.
                                child.close_boxed(CloseReason::Normal).await;
                            }
                        }
                        Ok(None) => {
                            self.clear_reservation(name).await;
                        }
                        Err(err) => {
                            // Not fatal mid-watch; the entry will be
                            // retried by the next pass that sees it.
                            self.emit_log(format!(
                                "failed to watch new child '{name}': {err}"
                            ));
                            self.clear_reservation(name).await;
                        }
                    }
                }
            }))
            .await;
        };

        tokio::join!(recheck_arm, removal_arm, creation_arm);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Recursion
    // ------------------------------------------------------------------

    /// Obtain and activate a child node, inheriting this node's
    /// configuration. Returns `Ok(None)` for children that must be
    /// skipped rather than failed (symlink cycles).
    async fn spawn_child(
        &self,
        config: &WatchConfig,
        name: &str,
        full_path: &Path,
    ) -> Result<Option<Arc<Node>>> {
        if config.follow_links {
            if let Ok(real) = tokio::fs::canonicalize(full_path).await {
                if self.path.starts_with(&real) {
                    // The entry resolves to one of our own ancestors;
                    // recursing into it would never terminate.
                    self.emit_log(format!(
                        "skipping symlink cycle at '{}'",
                        full_path.display()
                    ));
                    return Ok(None);
                }
            }
        }

        let (child, _created) = registry::obtain(full_path.to_path_buf(), config.clone()).await?;
        self.attach_child(name.to_string(), Arc::clone(&child));
        child.watch_boxed(false).await?;
        Ok(Some(child))
    }

    /// Bridge a child's event stream onto this node.
    ///
    /// Change events bubble upward; a bubbled self-delete triggers a
    /// proactive reap in case the child's own close lost a race; the
    /// child's close clears its map entry. The task holds only a weak
    /// parent handle, so the child never keeps its parent alive.
    fn attach_child(&self, name: String, child: Arc<Node>) {
        let mut rx = child.subscribe();
        let parent = self.weak.clone();
        let child_path = child.path().to_path_buf();
        tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            child = %child_path.display(),
                            skipped,
                            "child event stream lagged"
                        );
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(parent) = parent.upgrade() else { break };
                match event {
                    NodeEvent::Change(change) => {
                        let self_delete =
                            change.kind == ChangeKind::Delete && change.path == child_path;
                        parent.emit(NodeEvent::Change(change));
                        if self_delete {
                            parent.reap_child(&name, &child).await;
                        }
                    }
                    NodeEvent::Close(_) => {
                        parent.remove_child_entry(&name, &child).await;
                        break;
                    }
                    NodeEvent::Error(err) => {
                        // Child errors that did not kill the child are
                        // diagnostics here, not failures.
                        trace!(
                            child = %child_path.display(),
                            %err,
                            "child error (not re-raised)"
                        );
                    }
                    NodeEvent::Watching(_) | NodeEvent::Log(_) => {}
                }
            }
        });
    }

    /// Remove and close a child after its bubbled self-delete, guarding
    /// against a replacement that may already occupy the slot.
    async fn reap_child(&self, name: &str, child: &Arc<Node>) {
        self.remove_child_entry(name, child).await;
        child.close_boxed(CloseReason::Deleted).await;
    }

    async fn remove_child_entry(&self, name: &str, child: &Arc<Node>) {
        let mut inner = self.inner.lock().await;
        let matches = matches!(
            inner.children.get(name),
            Some(ChildSlot::Ready(existing)) if Arc::ptr_eq(existing, child)
        );
        if matches {
            inner.children.remove(name);
        }
    }

    /// Convert a reservation into a live entry. Refuses when the node is
    /// no longer active or the reservation was discarded meanwhile.
    async fn fill_reservation(&self, name: &str, child: Arc<Node>) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.state != NodeState::Active {
            return false;
        }
        match inner.children.get_mut(name) {
            Some(slot) if matches!(slot, ChildSlot::Reserved) => {
                *slot = ChildSlot::Ready(child);
                true
            }
            _ => false,
        }
    }

    async fn clear_reservation(&self, name: &str) {
        let mut inner = self.inner.lock().await;
        if matches!(inner.children.get(name), Some(ChildSlot::Reserved)) {
            inner.children.remove(name);
        }
    }

    // ------------------------------------------------------------------
    // Emission
    // ------------------------------------------------------------------

    fn emit(&self, event: NodeEvent) {
        // No subscribers is fine; bubbling may be the only consumer.
        let _ = self.events.send(event);
    }

    fn emit_log(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(path = %self.path.display(), "{message}");
        self.emit(NodeEvent::Log(message));
    }
}
