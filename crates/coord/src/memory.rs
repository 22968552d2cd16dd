//! In-process coordination store
//!
//! A single node tree shared by any number of sessions. Every write bumps a
//! store-wide revision which is broadcast to subscribers, so readers can
//! detect concurrent modification and wait for changes.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::path::{self, ROOT};
use crate::store::{CoordinationStore, CreateMode, SessionId, Stat};

#[derive(Debug, Clone)]
struct Node {
    data: Bytes,
    version: i32,
    created_revision: u64,
    modified_revision: u64,
    ephemeral_owner: Option<SessionId>,
    children: BTreeSet<String>,
    next_sequence: u64,
}

impl Node {
    fn new(data: Bytes, revision: u64, ephemeral_owner: Option<SessionId>) -> Self {
        Self {
            data,
            version: 0,
            created_revision: revision,
            modified_revision: revision,
            ephemeral_owner,
            children: BTreeSet::new(),
            next_sequence: 0,
        }
    }

    fn stat(&self) -> Stat {
        Stat {
            version: self.version,
            created_revision: self.created_revision,
            modified_revision: self.modified_revision,
            num_children: self.children.len(),
            data_length: self.data.len(),
            ephemeral_owner: self.ephemeral_owner,
        }
    }
}

struct Tree {
    nodes: HashMap<String, Node>,
    revision: u64,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT.to_string(), Node::new(Bytes::new(), 0, None));
        Self { nodes, revision: 0 }
    }

    fn create(
        &mut self,
        path: &str,
        data: Bytes,
        mode: CreateMode,
        owner: SessionId,
    ) -> StoreResult<String> {
        path::validate(path)?;
        let parent_path = match path::parent(path) {
            Some(p) => p,
            None => return Err(StoreError::NodeExists(ROOT.to_string())),
        };

        let actual = {
            let parent = self
                .nodes
                .get_mut(parent_path)
                .ok_or_else(|| StoreError::NoSuchPath(parent_path.to_string()))?;
            if parent.ephemeral_owner.is_some() {
                return Err(StoreError::NoChildrenForEphemerals(parent_path.to_string()));
            }
            if mode.is_sequential() {
                let seq = parent.next_sequence;
                parent.next_sequence += 1;
                format!("{}{:010}", path, seq)
            } else {
                path.to_string()
            }
        };

        if self.nodes.contains_key(&actual) {
            return Err(StoreError::NodeExists(actual));
        }

        self.revision += 1;
        let revision = self.revision;
        let owner = mode.is_ephemeral().then_some(owner);
        if let Some(parent) = self.nodes.get_mut(parent_path) {
            parent.children.insert(path::name(&actual).to_string());
        }
        self.nodes
            .insert(actual.clone(), Node::new(data, revision, owner));
        Ok(actual)
    }

    fn get(&self, path: &str) -> StoreResult<&Node> {
        path::validate(path)?;
        self.nodes
            .get(path)
            .ok_or_else(|| StoreError::NoSuchPath(path.to_string()))
    }

    fn set_data(
        &mut self,
        path: &str,
        data: Bytes,
        expected_version: Option<i32>,
    ) -> StoreResult<Stat> {
        path::validate(path)?;
        let node = self
            .nodes
            .get_mut(path)
            .ok_or_else(|| StoreError::NoSuchPath(path.to_string()))?;
        check_version(path, node, expected_version)?;

        self.revision += 1;
        node.data = data;
        node.version += 1;
        node.modified_revision = self.revision;
        Ok(node.stat())
    }

    fn delete(&mut self, path: &str, expected_version: Option<i32>) -> StoreResult<()> {
        path::validate(path)?;
        if path == ROOT {
            return Err(StoreError::invalid_path(path, "cannot delete the root"));
        }
        let node = self
            .nodes
            .get(path)
            .ok_or_else(|| StoreError::NoSuchPath(path.to_string()))?;
        if !node.children.is_empty() {
            return Err(StoreError::NotEmpty(path.to_string()));
        }
        check_version(path, node, expected_version)?;

        self.nodes.remove(path);
        if let Some(parent) = path::parent(path).and_then(|p| self.nodes.get_mut(p)) {
            parent.children.remove(path::name(path));
        }
        self.revision += 1;
        Ok(())
    }

    fn remove_ephemerals(&mut self, owner: SessionId) -> usize {
        let paths: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.ephemeral_owner == Some(owner))
            .map(|(p, _)| p.clone())
            .collect();
        let mut removed = 0;
        for p in paths {
            if self.delete(&p, None).is_ok() {
                removed += 1;
            }
        }
        removed
    }
}

fn check_version(path: &str, node: &Node, expected: Option<i32>) -> StoreResult<()> {
    match expected {
        Some(v) if v != node.version => Err(StoreError::BadVersion {
            path: path.to_string(),
            expected: v,
            actual: node.version,
        }),
        _ => Ok(()),
    }
}

struct Inner {
    tree: RwLock<Tree>,
    live_sessions: Mutex<HashSet<SessionId>>,
    next_session: AtomicU64,
    revision_tx: watch::Sender<u64>,
    latency: RwLock<Option<Duration>>,
    // (remaining, error) for injected failures
    faults: Mutex<Option<(usize, StoreError)>>,
}

impl Inner {
    fn publish(&self, revision: u64) {
        self.revision_tx.send_replace(revision);
    }

    fn end_session(&self, id: SessionId) -> bool {
        if !self.live_sessions.lock().remove(&id) {
            return false;
        }
        let (removed, revision) = {
            let mut tree = self.tree.write();
            let removed = tree.remove_ephemerals(id);
            (removed, tree.revision)
        };
        if removed > 0 {
            self.publish(revision);
        }
        debug!("Session {} ended, {} ephemeral nodes removed", id, removed);
        true
    }
}

/// In-process coordination store server
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_tree(Tree::new())
    }

    fn with_tree(tree: Tree) -> Self {
        let (revision_tx, _) = watch::channel(tree.revision);
        Self {
            inner: Arc::new(Inner {
                tree: RwLock::new(tree),
                live_sessions: Mutex::new(HashSet::new()),
                next_session: AtomicU64::new(1),
                revision_tx,
                latency: RwLock::new(None),
                faults: Mutex::new(None),
            }),
        }
    }

    /// Open a new session
    pub fn connect(&self) -> MemorySession {
        let id = self.inner.next_session.fetch_add(1, Ordering::SeqCst);
        self.inner.live_sessions.lock().insert(id);
        debug!("Session {} established", id);
        MemorySession {
            id,
            inner: self.inner.clone(),
        }
    }

    /// Expire a session as if its heartbeats stopped
    pub fn expire_session(&self, id: SessionId) -> bool {
        let expired = self.inner.end_session(id);
        if expired {
            info!("Session {} expired", id);
        }
        expired
    }

    /// Delay every session operation, used to exercise client timeouts
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.inner.latency.write() = latency;
    }

    /// Fail the next `count` session operations with `error`
    pub fn inject_failures(&self, count: usize, error: StoreError) {
        *self.inner.faults.lock() = (count > 0).then_some((count, error));
    }

    pub fn revision(&self) -> u64 {
        self.inner.tree.read().revision
    }

    pub fn node_count(&self) -> usize {
        self.inner.tree.read().nodes.len()
    }

    pub fn live_session_count(&self) -> usize {
        self.inner.live_sessions.lock().len()
    }

    /// Persistent contents of the tree; ephemeral nodes are left out
    pub fn to_image(&self) -> StoreImage {
        let tree = self.inner.tree.read();
        let mut nodes: Vec<NodeImage> = tree
            .nodes
            .iter()
            .filter(|(_, n)| n.ephemeral_owner.is_none())
            .map(|(p, n)| NodeImage {
                path: p.clone(),
                data: n.data.to_vec(),
                version: n.version,
                created_revision: n.created_revision,
                modified_revision: n.modified_revision,
                next_sequence: n.next_sequence,
            })
            .collect();
        nodes.sort_by(|a, b| a.path.cmp(&b.path));

        StoreImage {
            saved_at: Utc::now(),
            revision: tree.revision,
            nodes,
        }
    }

    /// Rebuild a store from an image; parents must precede their children
    pub fn from_image(image: StoreImage) -> StoreResult<Self> {
        let mut tree = Tree::new();
        tree.revision = image.revision;

        let mut images = image.nodes;
        images.sort_by(|a, b| a.path.cmp(&b.path));

        for img in images {
            path::validate(&img.path)?;
            let node = Node {
                data: Bytes::from(img.data),
                version: img.version,
                created_revision: img.created_revision,
                modified_revision: img.modified_revision,
                ephemeral_owner: None,
                children: BTreeSet::new(),
                next_sequence: img.next_sequence,
            };
            if img.path == ROOT {
                if let Some(root) = tree.nodes.get_mut(ROOT) {
                    root.next_sequence = node.next_sequence;
                }
                continue;
            }
            let parent_path = path::parent(&img.path).unwrap_or(ROOT);
            match tree.nodes.get_mut(parent_path) {
                Some(parent) => {
                    parent.children.insert(path::name(&img.path).to_string());
                }
                None => {
                    return Err(StoreError::Serialization(format!(
                        "image node {} has no parent",
                        img.path
                    )))
                }
            }
            tree.nodes.insert(img.path, node);
        }

        Ok(Self::with_tree(tree))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable store contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreImage {
    pub saved_at: DateTime<Utc>,
    pub revision: u64,
    pub nodes: Vec<NodeImage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeImage {
    pub path: String,
    pub data: Vec<u8>,
    pub version: i32,
    pub created_revision: u64,
    pub modified_revision: u64,
    #[serde(default)]
    pub next_sequence: u64,
}

/// A session on a [`MemoryStore`]
pub struct MemorySession {
    id: SessionId,
    inner: Arc<Inner>,
}

impl MemorySession {
    async fn enter(&self) -> StoreResult<()> {
        let latency = *self.inner.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if !self.inner.live_sessions.lock().contains(&self.id) {
            return Err(StoreError::NotConnected);
        }
        let mut faults = self.inner.faults.lock();
        if let Some((remaining, error)) = faults.take() {
            if remaining > 1 {
                *faults = Some((remaining - 1, error.clone()));
            }
            return Err(error);
        }
        Ok(())
    }

    fn write<T>(&self, f: impl FnOnce(&mut Tree) -> StoreResult<T>) -> StoreResult<T> {
        let (result, revision) = {
            let mut tree = self.inner.tree.write();
            let result = f(&mut tree);
            (result, tree.revision)
        };
        if result.is_ok() {
            self.inner.publish(revision);
        }
        result
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.inner.end_session(self.id);
    }
}

#[async_trait]
impl CoordinationStore for MemorySession {
    fn session_id(&self) -> SessionId {
        self.id
    }

    async fn exists(&self, path: &str) -> StoreResult<Option<Stat>> {
        self.enter().await?;
        path::validate(path)?;
        Ok(self.inner.tree.read().nodes.get(path).map(Node::stat))
    }

    async fn create(&self, path: &str, data: Bytes, mode: CreateMode) -> StoreResult<String> {
        self.enter().await?;
        let id = self.id;
        self.write(|tree| tree.create(path, data, mode, id))
    }

    async fn get_data(&self, path: &str) -> StoreResult<(Bytes, Stat)> {
        self.enter().await?;
        let tree = self.inner.tree.read();
        let node = tree.get(path)?;
        Ok((node.data.clone(), node.stat()))
    }

    async fn set_data(
        &self,
        path: &str,
        data: Bytes,
        expected_version: Option<i32>,
    ) -> StoreResult<Stat> {
        self.enter().await?;
        self.write(|tree| tree.set_data(path, data, expected_version))
    }

    async fn delete(&self, path: &str, expected_version: Option<i32>) -> StoreResult<()> {
        self.enter().await?;
        self.write(|tree| tree.delete(path, expected_version))
    }

    async fn get_children(&self, path: &str) -> StoreResult<Vec<String>> {
        self.enter().await?;
        let tree = self.inner.tree.read();
        Ok(tree.get(path)?.children.iter().cloned().collect())
    }

    async fn revision(&self) -> StoreResult<u64> {
        self.enter().await?;
        Ok(self.inner.tree.read().revision)
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision_tx.subscribe()
    }

    async fn close(&self) {
        self.inner.end_session(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_get_set_delete() {
        let store = MemoryStore::new();
        let s = store.connect();

        s.create("/configs", Bytes::new(), CreateMode::Persistent)
            .await
            .unwrap();
        s.create("/configs/a", Bytes::from_static(b"x"), CreateMode::Persistent)
            .await
            .unwrap();

        let (data, stat) = s.get_data("/configs/a").await.unwrap();
        assert_eq!(&data[..], b"x");
        assert_eq!(stat.version, 0);

        let stat = s
            .set_data("/configs/a", Bytes::from_static(b"y"), Some(0))
            .await
            .unwrap();
        assert_eq!(stat.version, 1);

        let err = s
            .set_data("/configs/a", Bytes::from_static(b"z"), Some(0))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::BadVersion { actual: 1, .. }));

        assert_eq!(
            s.delete("/configs", None).await.unwrap_err(),
            StoreError::NotEmpty("/configs".to_string())
        );
        s.delete("/configs/a", None).await.unwrap();
        assert!(s.exists("/configs/a").await.unwrap().is_none());
        assert!(s.get_children("/configs").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_parent_and_existing_node() {
        let store = MemoryStore::new();
        let s = store.connect();

        let err = s
            .create("/a/b", Bytes::new(), CreateMode::Persistent)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NoSuchPath("/a".to_string()));

        s.create("/a", Bytes::new(), CreateMode::Persistent)
            .await
            .unwrap();
        let err = s
            .create("/a", Bytes::new(), CreateMode::Persistent)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NodeExists("/a".to_string()));
    }

    #[tokio::test]
    async fn test_sequential_nodes_are_ordered() {
        let store = MemoryStore::new();
        let s = store.connect();
        s.create("/queue", Bytes::new(), CreateMode::Persistent)
            .await
            .unwrap();

        let first = s
            .create("/queue/qn-", Bytes::new(), CreateMode::PersistentSequential)
            .await
            .unwrap();
        let second = s
            .create("/queue/qn-", Bytes::new(), CreateMode::PersistentSequential)
            .await
            .unwrap();
        assert_eq!(first, "/queue/qn-0000000000");
        assert_eq!(second, "/queue/qn-0000000001");
        assert_eq!(
            s.get_children("/queue").await.unwrap(),
            vec!["qn-0000000000", "qn-0000000001"]
        );
    }

    #[tokio::test]
    async fn test_ephemeral_removed_with_session() {
        let store = MemoryStore::new();
        let owner = store.connect();
        let observer = store.connect();

        owner
            .create("/live", Bytes::new(), CreateMode::Ephemeral)
            .await
            .unwrap();
        assert!(observer.exists("/live").await.unwrap().is_some());

        let err = owner
            .create("/live/child", Bytes::new(), CreateMode::Persistent)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NoChildrenForEphemerals(_)));

        assert!(store.expire_session(owner.session_id()));
        assert!(observer.exists("/live").await.unwrap().is_none());
        assert_eq!(owner.exists("/").await.unwrap_err(), StoreError::NotConnected);
    }

    #[tokio::test]
    async fn test_revision_notifications() {
        let store = MemoryStore::new();
        let s = store.connect();
        let mut rx = s.subscribe();
        let before = s.revision().await.unwrap();

        s.create("/a", Bytes::new(), CreateMode::Persistent)
            .await
            .unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), before + 1);

        // reads do not bump the revision
        s.get_data("/a").await.unwrap();
        assert_eq!(s.revision().await.unwrap(), before + 1);
    }

    #[tokio::test]
    async fn test_image_round_trip_skips_ephemerals() {
        let store = MemoryStore::new();
        let s = store.connect();
        s.create("/a", Bytes::new(), CreateMode::Persistent)
            .await
            .unwrap();
        s.create("/a/b", Bytes::from_static(b"data"), CreateMode::Persistent)
            .await
            .unwrap();
        s.create("/eph", Bytes::new(), CreateMode::Ephemeral)
            .await
            .unwrap();

        let restored = MemoryStore::from_image(store.to_image()).unwrap();
        let r = restored.connect();
        assert_eq!(&r.get_data("/a/b").await.unwrap().0[..], b"data");
        assert!(r.exists("/eph").await.unwrap().is_none());
        assert_eq!(restored.revision(), store.revision());
    }

    #[tokio::test]
    async fn test_injected_failures_run_out() {
        let store = MemoryStore::new();
        let s = store.connect();
        store.inject_failures(2, StoreError::Io("disk".to_string()));

        assert_eq!(s.exists("/").await.unwrap_err(), StoreError::Io("disk".to_string()));
        assert_eq!(s.revision().await.unwrap_err(), StoreError::Io("disk".to_string()));
        assert!(s.exists("/").await.unwrap().is_some());
    }
}
