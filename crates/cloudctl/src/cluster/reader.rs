//! Cluster state reader
//!
//! Rebuilds a whole [`ClusterState`] from the store on every refresh. The
//! store revision is sampled before and after the traversal; if anything
//! was written in between, the read is discarded and retried, so a
//! published snapshot never mixes two revisions.

use std::sync::Arc;
use std::time::Duration;

use coord::{path as node_path, StoreClient, StoreError};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, info};

use super::{ClusterState, DocCollection, Replica, ReplicaState, Slice};
use crate::error::{CloudError, Result};
use crate::layout::{
    collection_path, replica_path, replicas_path, shards_path, COLLECTIONS_ZKNODE,
    CONFIGNAME_PROP, LIVE_NODES_ZKNODE,
};

/// Cluster state reader
pub struct ClusterStateReader {
    client: Arc<StoreClient>,
    max_attempts: usize,
    latest: RwLock<Arc<ClusterState>>,
}

impl ClusterStateReader {
    pub fn new(client: Arc<StoreClient>, max_attempts: usize) -> Self {
        Self {
            client,
            max_attempts: max_attempts.max(1),
            latest: RwLock::new(Arc::new(ClusterState::default())),
        }
    }

    /// Last published snapshot (empty before the first refresh)
    pub fn latest(&self) -> Arc<ClusterState> {
        self.latest.read().clone()
    }

    /// Read a fresh, coherent snapshot and publish it
    pub async fn refresh(&self) -> Result<Arc<ClusterState>> {
        for attempt in 1..=self.max_attempts {
            let before = self.client.revision().await?;
            let state = match self.read_once(before).await {
                Ok(state) => state,
                // A node listed a moment ago is gone: concurrent write
                Err(CloudError::Store(StoreError::NoSuchPath(p))) => {
                    debug!("Node {} vanished during refresh (attempt {})", p, attempt);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let after = self.client.revision().await?;

            if before == after {
                let state = Arc::new(state);
                *self.latest.write() = state.clone();
                debug!(
                    "Cluster state refreshed at revision {}: {} collections, {} live nodes",
                    before,
                    state.collections.len(),
                    state.live_nodes.len()
                );
                return Ok(state);
            }
            debug!(
                "Revision moved {} -> {} during refresh (attempt {})",
                before, after, attempt
            );
        }

        Err(CloudError::InconsistentSnapshot {
            attempts: self.max_attempts,
        })
    }

    async fn children_or_empty(&self, p: &str) -> Result<Vec<String>> {
        match self.client.list_children(p).await {
            Ok(children) => Ok(children),
            Err(StoreError::NoSuchPath(_)) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_once(&self, revision: u64) -> Result<ClusterState> {
        let mut state = ClusterState {
            revision,
            ..Default::default()
        };

        for name in self.children_or_empty(COLLECTIONS_ZKNODE).await? {
            let coll_path = collection_path(&name);
            let data = self.client.get_data(&coll_path).await?;
            let props = parse_props(&coll_path, &data)?;
            let config_name = props
                .get(CONFIGNAME_PROP)
                .and_then(Value::as_str)
                .map(str::to_string);
            let mut collection = DocCollection::new(name.clone(), config_name);

            for shard in self.children_or_empty(&shards_path(&name)).await? {
                let mut slice = Slice::new(shard.clone());
                for replica_name in self.children_or_empty(&replicas_path(&name, &shard)).await? {
                    let path = replica_path(&name, &shard, &replica_name);
                    let data = self.client.get_data(&path).await?;
                    let mut replica: Replica = serde_json::from_slice(&data)
                        .map_err(|e| CloudError::malformed(&path, e))?;
                    // the path is authoritative for identity
                    replica.name = replica_name.clone();
                    replica.collection = name.clone();
                    replica.shard = shard.clone();
                    slice.replicas.insert(replica_name, replica);
                }
                collection.slices.insert(shard, slice);
            }
            state.collections.insert(name, collection);
        }

        state.live_nodes = self
            .children_or_empty(LIVE_NODES_ZKNODE)
            .await?
            .into_iter()
            .collect();

        Ok(state)
    }

    /// Refresh, then return the active replicas of `collection`
    pub async fn active_replicas(
        &self,
        collection: &str,
        shard: Option<&str>,
    ) -> Result<Vec<Replica>> {
        let state = self.refresh().await?;
        Ok(state
            .active_replicas(collection, shard)?
            .into_iter()
            .cloned()
            .collect())
    }

    /// Block until the replica is observed in `expected`, or time out
    pub async fn wait_for_replica_state(
        &self,
        collection: &str,
        shard: &str,
        replica: &str,
        expected: ReplicaState,
        timeout: Duration,
    ) -> Result<Arc<ClusterState>> {
        let deadline = Instant::now() + timeout;
        // subscribe before reading so no change slips in between
        let mut changes = self.client.subscribe();

        loop {
            let state = self.refresh().await?;
            if state
                .replica(collection, shard, replica)
                .map(|r| r.state)
                == Some(expected)
            {
                info!(
                    "Replica {}/{}/{} reached {}",
                    collection, shard, replica, expected
                );
                return Ok(state);
            }

            match tokio::time::timeout_at(deadline, changes.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return Err(StoreError::NotConnected.into()),
                Err(_) => {
                    return Err(StoreError::Timeout {
                        op: "wait_for_replica_state",
                        path: replica_path(collection, shard, replica),
                        timeout,
                    }
                    .into())
                }
            }
        }
    }
}

/// JSON property map stored on collection nodes; empty data is an empty map
pub(crate) fn parse_props(path: &str, data: &[u8]) -> Result<Map<String, Value>> {
    if data.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(data) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(CloudError::malformed(path, "expected a JSON object")),
        Err(e) => Err(CloudError::malformed(path, e)),
    }
}

/// Sanity check used by callers that build paths from user input
pub(crate) fn validate_name(kind: &str, name: &str) -> Result<()> {
    node_path::validate_name(name)
        .map_err(|_| CloudError::InvalidArguments(format!("invalid {} name '{}'", kind, name)))
}
