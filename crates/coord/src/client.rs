//! Chrooted coordination store client
//!
//! Wraps a session with a namespace root, bounded timeouts on every call and
//! the path conveniences the control plane needs: parent creation,
//! recursive delete and a printable layout of a subtree.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::path::{self, ConnectString, ROOT};
use crate::store::{CoordinationStore, CreateMode, SessionId, Stat};

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Namespace root, must already exist in the store
    pub chroot: Option<String>,
    /// Bound on establishing the session and checking the chroot
    pub connect_timeout: Duration,
    /// Bound on every individual store call
    pub operation_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            chroot: None,
            connect_timeout: Duration::from_secs(30),
            operation_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Build from a `host:port[,host:port][/chroot]` connect string
    pub fn from_connect_string(connect_string: &str) -> StoreResult<Self> {
        let cs = ConnectString::parse(connect_string)?;
        Ok(Self {
            chroot: cs.chroot,
            ..Default::default()
        })
    }
}

/// Result of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    Updated,
}

/// Coordination store client
pub struct StoreClient {
    store: Arc<dyn CoordinationStore>,
    chroot: Option<String>,
    operation_timeout: Duration,
}

impl StoreClient {
    /// Connect a session and verify the chroot exists
    pub async fn connect(
        store: Arc<dyn CoordinationStore>,
        config: &ClientConfig,
    ) -> StoreResult<Self> {
        if let Some(chroot) = &config.chroot {
            path::validate(chroot)?;
        }
        let chroot = config.chroot.clone().filter(|c| c != ROOT);

        let client = Self {
            store,
            chroot,
            operation_timeout: config.operation_timeout,
        };

        let root = client.chroot.clone().unwrap_or_else(|| ROOT.to_string());
        let exists = tokio::time::timeout(config.connect_timeout, client.store.exists(&root))
            .await
            .map_err(|_| StoreError::Timeout {
                op: "connect",
                path: root.clone(),
                timeout: config.connect_timeout,
            })??;
        if exists.is_none() {
            return Err(StoreError::ChrootMissing(root));
        }

        info!(
            "Connected to coordination store: session={}, chroot={}",
            client.store.session_id(),
            client.chroot.as_deref().unwrap_or(ROOT)
        );
        Ok(client)
    }

    pub fn session_id(&self) -> SessionId {
        self.store.session_id()
    }

    pub fn chroot(&self) -> Option<&str> {
        self.chroot.as_deref()
    }

    /// Fail with `ChrootMissing` if the namespace root has disappeared
    pub async fn check_chroot(&self) -> StoreResult<()> {
        let Some(chroot) = &self.chroot else {
            return Ok(());
        };
        let exists = self
            .timed("exists", chroot, self.store.exists(chroot))
            .await?;
        match exists {
            Some(_) => Ok(()),
            None => Err(StoreError::ChrootMissing(chroot.clone())),
        }
    }

    fn full_path(&self, p: &str) -> StoreResult<String> {
        path::validate(p)?;
        Ok(match &self.chroot {
            None => p.to_string(),
            Some(chroot) if p == ROOT => chroot.clone(),
            Some(chroot) => format!("{}{}", chroot, p),
        })
    }

    fn relative_path(&self, full: &str) -> String {
        match &self.chroot {
            Some(chroot) => match full.strip_prefix(chroot.as_str()) {
                Some("") => ROOT.to_string(),
                Some(rest) => rest.to_string(),
                None => full.to_string(),
            },
            None => full.to_string(),
        }
    }

    /// True for the chroot itself and every node above it
    fn at_or_above_chroot(&self, full: &str) -> bool {
        match &self.chroot {
            Some(chroot) => {
                full == chroot
                    || full == ROOT
                    || chroot
                        .strip_prefix(full)
                        .is_some_and(|rest| rest.starts_with('/'))
            }
            None => false,
        }
    }

    async fn timed<T, F>(&self, op: &'static str, p: &str, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                op,
                path: self.relative_path(p),
                timeout: self.operation_timeout,
            }),
        }
    }

    /// Map a chroot-absolute error path back to the caller's view
    fn localize(&self, err: StoreError) -> StoreError {
        match err {
            StoreError::NoSuchPath(p) => match &self.chroot {
                Some(chroot) if self.at_or_above_chroot(&p) => {
                    StoreError::ChrootMissing(chroot.clone())
                }
                _ => StoreError::NoSuchPath(self.relative_path(&p)),
            },
            StoreError::NodeExists(p) => StoreError::NodeExists(self.relative_path(&p)),
            StoreError::NotEmpty(p) => StoreError::NotEmpty(self.relative_path(&p)),
            StoreError::BadVersion {
                path,
                expected,
                actual,
            } => StoreError::BadVersion {
                path: self.relative_path(&path),
                expected,
                actual,
            },
            other => other,
        }
    }

    pub async fn stat(&self, p: &str) -> StoreResult<Option<Stat>> {
        let full = self.full_path(p)?;
        self.timed("exists", &full, self.store.exists(&full))
            .await
            .map_err(|e| self.localize(e))
    }

    pub async fn exists(&self, p: &str) -> StoreResult<bool> {
        Ok(self.stat(p).await?.is_some())
    }

    /// Create a node. With `create_parents`, missing intermediate nodes are
    /// created empty and existing ones are left untouched; the leaf itself
    /// still fails with `NodeExists`. Nothing at or above the chroot is ever
    /// created: a vanished chroot fails with `ChrootMissing`.
    pub async fn create(
        &self,
        p: &str,
        data: Bytes,
        mode: CreateMode,
        create_parents: bool,
    ) -> StoreResult<String> {
        let full = self.full_path(p)?;
        if self.chroot.is_some() && p == ROOT {
            self.check_chroot().await?;
            return Err(StoreError::NodeExists(ROOT.to_string()));
        }
        if create_parents {
            self.ensure_ancestors(&full).await?;
        }
        let created = self
            .timed("create", &full, self.store.create(&full, data, mode))
            .await
            .map_err(|e| self.localize(e))?;
        debug!("Created node {}", created);
        Ok(self.relative_path(&created))
    }

    async fn ensure_ancestors(&self, full: &str) -> StoreResult<()> {
        for ancestor in path::ancestors(full) {
            if self.at_or_above_chroot(ancestor) {
                continue;
            }
            let created = self
                .timed(
                    "create",
                    ancestor,
                    self.store.create(ancestor, Bytes::new(), CreateMode::Persistent),
                )
                .await;
            match created {
                Ok(_) | Err(StoreError::NodeExists(_)) => {}
                Err(e) => return Err(self.localize(e)),
            }
        }
        Ok(())
    }

    /// Make sure `p` and all its ancestors exist; existing nodes are untouched
    pub async fn make_path(&self, p: &str) -> StoreResult<()> {
        match self
            .create(p, Bytes::new(), CreateMode::Persistent, true)
            .await
        {
            Ok(_) | Err(StoreError::NodeExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Write `data` at `p`, creating it (and its parents) if needed
    pub async fn put(&self, p: &str, data: Bytes) -> StoreResult<PutOutcome> {
        match self
            .create(p, data.clone(), CreateMode::Persistent, true)
            .await
        {
            Ok(_) => Ok(PutOutcome::Created),
            Err(StoreError::NodeExists(_)) => {
                self.set_data(p, data, None).await?;
                Ok(PutOutcome::Updated)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_data(&self, p: &str) -> StoreResult<Bytes> {
        Ok(self.get_data_with_stat(p).await?.0)
    }

    pub async fn get_data_with_stat(&self, p: &str) -> StoreResult<(Bytes, Stat)> {
        let full = self.full_path(p)?;
        self.timed("get_data", &full, self.store.get_data(&full))
            .await
            .map_err(|e| self.localize(e))
    }

    pub async fn set_data(
        &self,
        p: &str,
        data: Bytes,
        expected_version: Option<i32>,
    ) -> StoreResult<Stat> {
        let full = self.full_path(p)?;
        self.timed(
            "set_data",
            &full,
            self.store.set_data(&full, data, expected_version),
        )
        .await
        .map_err(|e| self.localize(e))
    }

    pub async fn delete(&self, p: &str, expected_version: Option<i32>) -> StoreResult<()> {
        let full = self.full_path(p)?;
        self.timed("delete", &full, self.store.delete(&full, expected_version))
            .await
            .map_err(|e| self.localize(e))
    }

    /// Child names in lexicographic order
    pub async fn list_children(&self, p: &str) -> StoreResult<Vec<String>> {
        let full = self.full_path(p)?;
        self.timed("get_children", &full, self.store.get_children(&full))
            .await
            .map_err(|e| self.localize(e))
    }

    /// Every node under `p` (inclusive) in pre-order
    async fn walk(&self, p: &str) -> StoreResult<Vec<(String, usize)>> {
        let mut result = Vec::new();
        let mut stack = vec![(p.to_string(), 0usize)];
        while let Some((node, depth)) = stack.pop() {
            let children = self.list_children(&node).await?;
            for child in children.iter().rev() {
                stack.push((path::join(&node, child), depth + 1));
            }
            result.push((node, depth));
        }
        Ok(result)
    }

    /// Delete `p` and everything below it. Children of the chroot root are
    /// removed but the root itself is kept.
    pub async fn delete_recursive(&self, p: &str) -> StoreResult<()> {
        let nodes = self.walk(p).await?;
        for (node, _) in nodes.iter().rev() {
            if node == ROOT {
                continue;
            }
            match self.delete(node, None).await {
                Ok(()) | Err(StoreError::NoSuchPath(_)) => {}
                Err(e) => return Err(e),
            }
        }
        info!("Deleted {} ({} nodes)", p, nodes.len());
        Ok(())
    }

    /// Like `delete_recursive`, but a missing path is not an error
    pub async fn clean(&self, p: &str) -> StoreResult<()> {
        match self.delete_recursive(p).await {
            Ok(()) | Err(StoreError::NoSuchPath(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Indented dump of the subtree at `p`, with UTF-8 node data inline
    pub async fn print_layout(&self, p: &str) -> StoreResult<String> {
        let mut out = String::new();
        for (node, depth) in self.walk(p).await? {
            let indent = " ".repeat(depth * 2);
            let label = if node == ROOT { ROOT } else { path::name(&node) };
            out.push_str(&format!("{}{} ", indent, label));

            let data = self.get_data(&node).await?;
            if !data.is_empty() {
                match std::str::from_utf8(&data) {
                    Ok(text) => {
                        out.push_str(&format!("({})\n", data.len()));
                        for line in text.lines() {
                            out.push_str(&format!("{}  {}\n", indent, line));
                        }
                        continue;
                    }
                    Err(_) => out.push_str(&format!("({} bytes binary)", data.len())),
                }
            }
            out.push('\n');
        }
        Ok(out)
    }

    /// Current store revision
    pub async fn revision(&self) -> StoreResult<u64> {
        self.timed("revision", ROOT, self.store.revision()).await
    }

    /// Receiver observing every store revision change
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.store.subscribe()
    }

    pub async fn close(&self) {
        self.store.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    async fn client(store: &MemoryStore, chroot: Option<&str>) -> StoreResult<StoreClient> {
        let config = ClientConfig {
            chroot: chroot.map(str::to_string),
            ..Default::default()
        };
        StoreClient::connect(Arc::new(store.connect()), &config).await
    }

    #[tokio::test]
    async fn test_chroot_must_exist() {
        let store = MemoryStore::new();
        let err = client(&store, Some("/solr")).await.err().unwrap();
        assert_eq!(err, StoreError::ChrootMissing("/solr".to_string()));
        // nothing was written
        assert_eq!(store.revision(), 0);

        let root = client(&store, None).await.unwrap();
        root.make_path("/solr").await.unwrap();
        let chrooted = client(&store, Some("/solr")).await.unwrap();
        chrooted.make_path("/configs/a").await.unwrap();
        assert!(root.exists("/solr/configs/a").await.unwrap());
        assert_eq!(chrooted.list_children("/").await.unwrap(), vec!["configs"]);
    }

    #[tokio::test]
    async fn test_vanished_chroot_is_not_recreated() {
        let store = MemoryStore::new();
        let root = client(&store, None).await.unwrap();
        root.make_path("/a/solr").await.unwrap();
        let c = client(&store, Some("/a/solr")).await.unwrap();
        root.delete_recursive("/a").await.unwrap();

        let missing = StoreError::ChrootMissing("/a/solr".to_string());
        assert_eq!(c.make_path("/configs/x").await.unwrap_err(), missing);
        assert_eq!(
            c.put("/collections/c1", Bytes::from_static(b"{}")).await.unwrap_err(),
            missing
        );
        assert_eq!(
            c.create(
                "/overseer/queue/qn-",
                Bytes::new(),
                CreateMode::PersistentSequential,
                true
            )
            .await
            .unwrap_err(),
            missing
        );
        assert_eq!(c.make_path("/").await.unwrap_err(), missing);
        assert!(!root.exists("/a").await.unwrap());

        // back in place out of band, the same client works again
        root.make_path("/a/solr").await.unwrap();
        c.make_path("/").await.unwrap();
        c.make_path("/configs/x").await.unwrap();
        assert!(root.exists("/a/solr/configs/x").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_parents_is_idempotent() {
        let store = MemoryStore::new();
        let c = client(&store, None).await.unwrap();

        c.create("/a/b", Bytes::from_static(b"ab"), CreateMode::Persistent, true)
            .await
            .unwrap();
        c.create("/a/c", Bytes::from_static(b"ac"), CreateMode::Persistent, true)
            .await
            .unwrap();
        assert_eq!(&c.get_data("/a/b").await.unwrap()[..], b"ab");

        let err = c
            .create("/a/b", Bytes::new(), CreateMode::Persistent, true)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NodeExists("/a/b".to_string()));

        let err = c
            .create("/x/y", Bytes::new(), CreateMode::Persistent, false)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NoSuchPath("/x".to_string()));

        c.make_path("/a/b").await.unwrap();
        assert_eq!(&c.get_data("/a/b").await.unwrap()[..], b"ab");
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = MemoryStore::new();
        let c = client(&store, None).await.unwrap();
        assert_eq!(
            c.put("/conf/x", Bytes::from_static(b"1")).await.unwrap(),
            PutOutcome::Created
        );
        assert_eq!(
            c.put("/conf/x", Bytes::from_static(b"2")).await.unwrap(),
            PutOutcome::Updated
        );
        assert_eq!(&c.get_data("/conf/x").await.unwrap()[..], b"2");
    }

    #[tokio::test]
    async fn test_delete_recursive_and_clean() {
        let store = MemoryStore::new();
        let c = client(&store, None).await.unwrap();
        c.put("/a/b/c", Bytes::from_static(b"1")).await.unwrap();
        c.put("/a/d", Bytes::from_static(b"2")).await.unwrap();

        c.delete_recursive("/a").await.unwrap();
        assert!(!c.exists("/a").await.unwrap());

        let err = c.delete_recursive("/a").await.unwrap_err();
        assert_eq!(err, StoreError::NoSuchPath("/a".to_string()));
        c.clean("/a").await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_path_errors() {
        let store = MemoryStore::new();
        let c = client(&store, None).await.unwrap();
        assert_eq!(
            c.get_data("/nope").await.unwrap_err(),
            StoreError::NoSuchPath("/nope".to_string())
        );
        assert_eq!(
            c.delete("/nope", None).await.unwrap_err(),
            StoreError::NoSuchPath("/nope".to_string())
        );
    }

    #[tokio::test]
    async fn test_session_loss_and_timeout() {
        let store = MemoryStore::new();
        let session = Arc::new(store.connect());
        let id = session.session_id();
        let config = ClientConfig {
            operation_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let c = StoreClient::connect(session, &config).await.unwrap();

        store.set_latency(Some(Duration::from_millis(500)));
        let err = c.get_data("/").await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout { op: "get_data", .. }));

        store.set_latency(None);
        store.expire_session(id);
        assert_eq!(c.exists("/").await.unwrap_err(), StoreError::NotConnected);
    }

    #[tokio::test]
    async fn test_print_layout() {
        let store = MemoryStore::new();
        let c = client(&store, None).await.unwrap();
        c.put("/configs/myconf/schema.xml", Bytes::from_static(b"<b/>"))
            .await
            .unwrap();

        let layout = c.print_layout("/").await.unwrap();
        assert!(layout.starts_with("/ \n"));
        assert!(layout.contains("  configs \n"));
        assert!(layout.contains("      schema.xml (4)\n"));
        assert!(layout.contains("        <b/>\n"));
    }
}
