use std::sync::{Arc, Weak};

use crate::error::{CoordinationError, CoordinationResult};

/// How a node is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CreateMode {
    /// Survives the session that created it.
    Persistent,
    /// Removed automatically when the creating session ends.
    Ephemeral,
    /// Persistent, with a per-parent monotonically increasing suffix appended
    /// to the name.
    PersistentSequential,
    /// Ephemeral, with a per-parent monotonically increasing suffix appended
    /// to the name.
    EphemeralSequential,
}

impl CreateMode {
    pub const fn is_ephemeral(self) -> bool {
        matches!(self, Self::Ephemeral | Self::EphemeralSequential)
    }

    pub const fn is_sequential(self) -> bool {
        matches!(self, Self::PersistentSequential | Self::EphemeralSequential)
    }
}

/// What a watch is registered on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WatchKind {
    /// Fires when a child of the node is created or deleted.
    Children,
    /// Fires when the node's data changes, or when it is created or deleted.
    Data,
}

/// Delivered to a watcher exactly once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchEvent {
    ChildrenChanged(String),
    DataChanged(String),
    Created(String),
    Deleted(String),
}

impl WatchEvent {
    pub fn path(&self) -> &str {
        match self {
            Self::ChildrenChanged(path)
            | Self::DataChanged(path)
            | Self::Created(path)
            | Self::Deleted(path) => path,
        }
    }
}

/// One-shot watch callback. It runs on whichever thread applied the change
/// and must not block.
pub type Watcher = Box<dyn FnOnce(WatchEvent) + Send + 'static>;

/// Notified when a coordination session loses or regains its connection.
pub trait ConnectionObserver: Send + Sync {
    fn connected(&self);
    fn disconnected(&self);
}

/// A session against a hierarchical coordination service with ephemeral
/// nodes, sequential nodes and one-shot watches.
///
/// Paths are absolute, `/`-separated, and carry no trailing slash except for
/// the root `/`.
pub trait Coordinator: Send + Sync {
    /// Creates a node and returns its actual path, which differs from `path`
    /// for sequential modes.
    fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> CoordinationResult<String>;

    /// Names (not paths) of the node's direct children, in no particular order.
    fn children(&self, path: &str) -> CoordinationResult<Vec<String>>;

    fn get_data(&self, path: &str) -> CoordinationResult<Vec<u8>>;

    fn set_data(&self, path: &str, data: &[u8]) -> CoordinationResult<()>;

    fn delete(&self, path: &str) -> CoordinationResult<()>;

    fn exists(&self, path: &str) -> CoordinationResult<bool>;

    /// Registers a one-shot watch. A children watch requires the node to
    /// exist; a data watch may be placed on an absent node to learn when it
    /// appears.
    fn watch(&self, path: &str, kind: WatchKind, watcher: Watcher) -> CoordinationResult<()>;

    /// Subscribes to connection events. Observers that have been dropped are
    /// skipped and forgotten.
    fn observe(&self, observer: Weak<dyn ConnectionObserver>);
}

/// Opens coordination sessions by endpoint.
pub trait Connector: Send + Sync {
    /// # Errors
    ///
    /// Returns [`CoordinationError::ConnectionLoss`] when the endpoint is
    /// unreachable.
    fn connect(&self, endpoint: &str) -> CoordinationResult<Arc<dyn Coordinator>>;
}

/// Joins a child name onto a parent path.
pub fn join_path(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Splits an absolute path into its parent path and final name.
///
/// # Errors
///
/// [`CoordinationError::InvalidPath`] for the root, relative paths, trailing
/// slashes and empty segments.
pub fn split_path(path: &str) -> CoordinationResult<(&str, &str)> {
    validate_path(path)?;
    let index = path
        .rfind('/')
        .ok_or_else(|| CoordinationError::InvalidPath(path.to_owned()))?;
    let name = &path[index + 1..];
    if name.is_empty() {
        return Err(CoordinationError::InvalidPath(path.to_owned()));
    }
    let parent = if index == 0 { "/" } else { &path[..index] };
    Ok((parent, name))
}

/// # Errors
///
/// [`CoordinationError::InvalidPath`] unless `path` is `/` or an absolute path
/// with non-empty segments.
pub fn validate_path(path: &str) -> CoordinationResult<()> {
    if path == "/" {
        return Ok(());
    }
    let valid = path.starts_with('/') && path[1..].split('/').all(|segment| !segment.is_empty());
    if valid {
        Ok(())
    } else {
        Err(CoordinationError::InvalidPath(path.to_owned()))
    }
}

/// Creates `path` and any missing ancestors as persistent nodes.
///
/// # Errors
///
/// Any failure other than a node already existing.
pub fn ensure_path(coordinator: &dyn Coordinator, path: &str) -> CoordinationResult<()> {
    validate_path(path)?;
    let mut current = String::new();
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        current.push('/');
        current.push_str(segment);
        match coordinator.create(&current, &[], CreateMode::Persistent) {
            Ok(_) | Err(CoordinationError::NodeExists(_)) => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Deletes a node, treating an already-missing node as success.
///
/// # Errors
///
/// Any failure other than [`CoordinationError::NoNode`].
pub fn delete_if_exists(coordinator: &dyn Coordinator, path: &str) -> CoordinationResult<()> {
    match coordinator.delete(path) {
        Ok(()) | Err(CoordinationError::NoNode(_)) => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_path_handles_root_children() {
        assert_eq!(split_path("/pool"), Ok(("/", "pool")));
        assert_eq!(split_path("/a/b/c"), Ok(("/a/b", "c")));
    }

    #[test]
    fn split_path_rejects_malformed() {
        for path in ["/", "", "pool", "/a/", "/a//b"] {
            assert_eq!(
                split_path(path),
                Err(CoordinationError::InvalidPath(path.to_owned())),
                "{path:?}"
            );
        }
    }

    #[test]
    fn join_path_avoids_double_slash() {
        assert_eq!(join_path("/", "a"), "/a");
        assert_eq!(join_path("/a", "b"), "/a/b");
    }

    #[test]
    fn create_mode_flags() {
        assert!(CreateMode::EphemeralSequential.is_ephemeral());
        assert!(CreateMode::EphemeralSequential.is_sequential());
        assert!(!CreateMode::Persistent.is_ephemeral());
        assert!(CreateMode::PersistentSequential.is_sequential());
    }
}
