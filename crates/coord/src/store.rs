//! Session-level coordination store interface

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::StoreResult;

/// Session ID
pub type SessionId = u64;

/// Node creation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreateMode {
    /// Survives the creating session
    Persistent,
    /// Persistent, name suffixed with a per-parent sequence number
    PersistentSequential,
    /// Removed when the creating session ends
    Ephemeral,
    /// Ephemeral with sequence suffix
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_sequential(&self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }
}

impl Default for CreateMode {
    fn default() -> Self {
        Self::Persistent
    }
}

/// Node metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Data version, incremented on every `set_data`
    pub version: i32,
    /// Store revision that created the node
    pub created_revision: u64,
    /// Store revision of the last data change
    pub modified_revision: u64,
    /// Number of children
    pub num_children: usize,
    /// Length of the node data
    pub data_length: usize,
    /// Owning session for ephemeral nodes
    pub ephemeral_owner: Option<SessionId>,
}

/// A session against a hierarchical, linearizable node store
///
/// Paths given here are absolute within the store; chroot handling lives in
/// [`crate::StoreClient`].
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Session this handle belongs to
    fn session_id(&self) -> SessionId;

    /// Node metadata, `None` when absent
    async fn exists(&self, path: &str) -> StoreResult<Option<Stat>>;

    /// Create a node; the parent must exist. Returns the actual path,
    /// which differs from `path` for sequential modes.
    async fn create(&self, path: &str, data: Bytes, mode: CreateMode) -> StoreResult<String>;

    async fn get_data(&self, path: &str) -> StoreResult<(Bytes, Stat)>;

    /// Replace node data, optionally only if the current version matches
    async fn set_data(
        &self,
        path: &str,
        data: Bytes,
        expected_version: Option<i32>,
    ) -> StoreResult<Stat>;

    /// Delete a childless node, optionally only if the version matches
    async fn delete(&self, path: &str, expected_version: Option<i32>) -> StoreResult<()>;

    /// Child names in lexicographic order
    async fn get_children(&self, path: &str) -> StoreResult<Vec<String>>;

    /// Current store revision, bumped by every write
    async fn revision(&self) -> StoreResult<u64>;

    /// Receiver that observes every new store revision
    fn subscribe(&self) -> watch::Receiver<u64>;

    /// End the session, removing its ephemeral nodes
    async fn close(&self);
}
