//! An in-process coordination service.
//!
//! [`MemoryEnsemble`] holds one shared node tree; every [`MemorySession`]
//! opened against it sees the same nodes, owns its own ephemerals and can be
//! disconnected, reconnected or expired on demand. It backs the test suite and
//! single-process deployments where several components share one pool.

use parking_lot::Mutex;
use portable_atomic::{AtomicU64, Ordering};
use slotflake::{TimeSource, UNIX_EPOCH_MILLIS, WallClock, wait_past_millis};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Weak},
};
use tracing::{debug, trace};

use crate::{
    coordinator::{
        ConnectionObserver, Connector, Coordinator, CreateMode, WatchEvent, WatchKind, Watcher,
        join_path, split_path, validate_path,
    },
    error::{CoordinationError, CoordinationResult},
};

struct Node {
    data: Vec<u8>,
    owner: Option<u64>,
    next_sequence: u64,
}

impl Node {
    fn new(data: &[u8], owner: Option<u64>) -> Self {
        Self {
            data: data.to_vec(),
            owner,
            next_sequence: 0,
        }
    }
}

type Fired = Vec<(Watcher, WatchEvent)>;

struct Tree {
    nodes: BTreeMap<String, Node>,
    child_watches: HashMap<String, Vec<Watcher>>,
    data_watches: HashMap<String, Vec<Watcher>>,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_owned(), Node::new(&[], None));
        Self {
            nodes,
            child_watches: HashMap::new(),
            data_watches: HashMap::new(),
        }
    }

    fn child_names(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_owned()
        } else {
            format!("{path}/")
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_owned())
            })
            .collect()
    }

    fn has_children(&self, path: &str) -> bool {
        !self.child_names(path).is_empty()
    }

    fn trigger(&mut self, path: &str, kind: WatchKind, event: WatchEvent, fired: &mut Fired) {
        let watches = match kind {
            WatchKind::Children => &mut self.child_watches,
            WatchKind::Data => &mut self.data_watches,
        };
        if let Some(watchers) = watches.remove(path) {
            fired.extend(watchers.into_iter().map(|w| (w, event.clone())));
        }
    }

    fn remove(&mut self, path: &str, parent: &str, fired: &mut Fired) {
        self.nodes.remove(path);
        self.trigger(path, WatchKind::Data, WatchEvent::Deleted(path.to_owned()), fired);
        self.trigger(path, WatchKind::Children, WatchEvent::Deleted(path.to_owned()), fired);
        self.trigger(
            parent,
            WatchKind::Children,
            WatchEvent::ChildrenChanged(parent.to_owned()),
            fired,
        );
    }

    fn purge_session(&mut self, session: u64, fired: &mut Fired) -> usize {
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        for path in &owned {
            if let Ok((parent, _)) = split_path(path) {
                self.remove(path, parent, fired);
            }
        }
        owned.len()
    }
}

/// Lets the current millisecond pass between telling observers a session is
/// gone and freeing its ephemeral nodes, as a real ensemble's session timeout
/// would.
fn settle() {
    let clock = WallClock::with_epoch(UNIX_EPOCH_MILLIS);
    wait_past_millis(&clock, clock.current_millis());
}

fn deliver(fired: Fired) {
    for (watcher, event) in fired {
        watcher(event);
    }
}

struct Ensemble {
    tree: Mutex<Tree>,
    next_session: AtomicU64,
}

/// A shared in-memory node tree that sessions connect to.
///
/// Cloning the ensemble shares the same tree.
#[derive(Clone)]
pub struct MemoryEnsemble {
    inner: Arc<Ensemble>,
}

impl Default for MemoryEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEnsemble {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Ensemble {
                tree: Mutex::new(Tree::new()),
                next_session: AtomicU64::new(1),
            }),
        }
    }

    /// Opens a new connected session.
    pub fn session(&self) -> MemorySession {
        MemorySession {
            ensemble: Arc::clone(&self.inner),
            status: Mutex::new(Status {
                id: self.inner.next_session.fetch_add(1, Ordering::Relaxed),
                connected: true,
                closed: false,
            }),
            observers: Mutex::new(Vec::new()),
        }
    }
}

impl Connector for MemoryEnsemble {
    /// Every endpoint resolves to this ensemble; each call opens a new session.
    fn connect(&self, endpoint: &str) -> CoordinationResult<Arc<dyn Coordinator>> {
        debug!(endpoint, "opening in-memory coordination session");
        Ok(Arc::new(self.session()))
    }
}

struct Status {
    id: u64,
    connected: bool,
    closed: bool,
}

/// One client session against a [`MemoryEnsemble`].
///
/// Dropping the session closes it, which removes its ephemeral nodes.
pub struct MemorySession {
    ensemble: Arc<Ensemble>,
    status: Mutex<Status>,
    observers: Mutex<Vec<Weak<dyn ConnectionObserver>>>,
}

impl MemorySession {
    pub fn session_id(&self) -> u64 {
        self.status.lock().id
    }

    pub fn is_connected(&self) -> bool {
        let status = self.status.lock();
        status.connected && !status.closed
    }

    /// Drops the connection without ending the session. Ephemeral nodes stay
    /// in place and every operation fails with
    /// [`CoordinationError::ConnectionLoss`] until [`MemorySession::reconnect`].
    pub fn disconnect(&self) {
        {
            let mut status = self.status.lock();
            if status.closed || !status.connected {
                return;
            }
            status.connected = false;
        }
        debug!(session = self.session_id(), "session disconnected");
        self.notify(false);
    }

    pub fn reconnect(&self) {
        {
            let mut status = self.status.lock();
            if status.closed || status.connected {
                return;
            }
            status.connected = true;
        }
        debug!(session = self.session_id(), "session reconnected");
        self.notify(true);
    }

    /// Expires the session the way a server would after a long partition: its
    /// ephemeral nodes are removed and the handle continues under a fresh
    /// session id. Observers see a disconnect followed by a connect.
    pub fn expire(&self) {
        if self.status.lock().closed {
            return;
        }
        self.notify(false);
        settle();

        let mut fired = Vec::new();
        let (old, new, removed) = {
            let mut status = self.status.lock();
            let mut tree = self.ensemble.tree.lock();
            let old = status.id;
            let removed = tree.purge_session(old, &mut fired);
            status.id = self.ensemble.next_session.fetch_add(1, Ordering::Relaxed);
            status.connected = true;
            (old, status.id, removed)
        };
        deliver(fired);
        debug!(old, new, removed, "session expired");

        self.notify(true);
    }

    /// Ends the session for good, removing its ephemeral nodes.
    pub fn close(&self) {
        let id = {
            let mut status = self.status.lock();
            if status.closed {
                return;
            }
            status.closed = true;
            status.connected = false;
            status.id
        };
        self.notify(false);
        settle();

        let mut fired = Vec::new();
        let removed = self.ensemble.tree.lock().purge_session(id, &mut fired);
        deliver(fired);
        debug!(session = id, removed, "session closed");
    }

    fn notify(&self, connected: bool) {
        let live: Vec<Arc<dyn ConnectionObserver>> = {
            let mut observers = self.observers.lock();
            observers.retain(|observer| observer.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in live {
            if connected {
                observer.connected();
            } else {
                observer.disconnected();
            }
        }
    }

    /// Runs `op` against the tree while the session is live, then delivers the
    /// watches it fired outside every lock.
    fn apply<R>(
        &self,
        op: impl FnOnce(u64, &mut Tree, &mut Fired) -> CoordinationResult<R>,
    ) -> CoordinationResult<R> {
        let mut fired = Vec::new();
        let result = {
            let status = self.status.lock();
            if status.closed {
                return Err(CoordinationError::SessionExpired);
            }
            if !status.connected {
                return Err(CoordinationError::ConnectionLoss);
            }
            let mut tree = self.ensemble.tree.lock();
            op(status.id, &mut *tree, &mut fired)
        };
        deliver(fired);
        result
    }
}

impl Coordinator for MemorySession {
    fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> CoordinationResult<String> {
        let (parent, name) = split_path(path)?;
        self.apply(|session, tree, fired| {
            let parent_node = tree
                .nodes
                .get_mut(parent)
                .ok_or_else(|| CoordinationError::NoNode(parent.to_owned()))?;
            let actual = if mode.is_sequential() {
                let sequence = parent_node.next_sequence;
                parent_node.next_sequence += 1;
                join_path(parent, &format!("{name}{sequence:010}"))
            } else {
                path.to_owned()
            };
            if tree.nodes.contains_key(&actual) {
                return Err(CoordinationError::NodeExists(actual));
            }

            let owner = mode.is_ephemeral().then_some(session);
            tree.nodes.insert(actual.clone(), Node::new(data, owner));
            trace!(path = %actual, ?mode, session, "created node");

            tree.trigger(&actual, WatchKind::Data, WatchEvent::Created(actual.clone()), fired);
            tree.trigger(
                parent,
                WatchKind::Children,
                WatchEvent::ChildrenChanged(parent.to_owned()),
                fired,
            );
            Ok(actual)
        })
    }

    fn children(&self, path: &str) -> CoordinationResult<Vec<String>> {
        validate_path(path)?;
        self.apply(|_, tree, _| {
            if !tree.nodes.contains_key(path) {
                return Err(CoordinationError::NoNode(path.to_owned()));
            }
            Ok(tree.child_names(path))
        })
    }

    fn get_data(&self, path: &str) -> CoordinationResult<Vec<u8>> {
        validate_path(path)?;
        self.apply(|_, tree, _| {
            tree.nodes
                .get(path)
                .map(|node| node.data.clone())
                .ok_or_else(|| CoordinationError::NoNode(path.to_owned()))
        })
    }

    fn set_data(&self, path: &str, data: &[u8]) -> CoordinationResult<()> {
        validate_path(path)?;
        self.apply(|_, tree, fired| {
            let node = tree
                .nodes
                .get_mut(path)
                .ok_or_else(|| CoordinationError::NoNode(path.to_owned()))?;
            node.data = data.to_vec();
            tree.trigger(path, WatchKind::Data, WatchEvent::DataChanged(path.to_owned()), fired);
            Ok(())
        })
    }

    fn delete(&self, path: &str) -> CoordinationResult<()> {
        let (parent, _) = split_path(path)?;
        self.apply(|session, tree, fired| {
            if !tree.nodes.contains_key(path) {
                return Err(CoordinationError::NoNode(path.to_owned()));
            }
            if tree.has_children(path) {
                return Err(CoordinationError::NotEmpty(path.to_owned()));
            }
            tree.remove(path, parent, fired);
            trace!(path, session, "deleted node");
            Ok(())
        })
    }

    fn exists(&self, path: &str) -> CoordinationResult<bool> {
        validate_path(path)?;
        self.apply(|_, tree, _| Ok(tree.nodes.contains_key(path)))
    }

    fn watch(&self, path: &str, kind: WatchKind, watcher: Watcher) -> CoordinationResult<()> {
        validate_path(path)?;
        self.apply(|_, tree, _| {
            let watches = match kind {
                WatchKind::Children => {
                    if !tree.nodes.contains_key(path) {
                        return Err(CoordinationError::NoNode(path.to_owned()));
                    }
                    &mut tree.child_watches
                }
                WatchKind::Data => &mut tree.data_watches,
            };
            watches.entry(path.to_owned()).or_default().push(watcher);
            Ok(())
        })
    }

    fn observe(&self, observer: Weak<dyn ConnectionObserver>) {
        self.observers.lock().push(observer);
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.close();
    }
}
