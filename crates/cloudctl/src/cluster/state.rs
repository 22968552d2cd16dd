//! Cluster state snapshot
//!
//! An immutable, point-in-time view of collections, their shard groups
//! ("slices") and replicas, plus the set of live nodes.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use super::Replica;
use crate::error::{CloudError, Result};

/// Shard group of a collection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Slice {
    pub name: String,
    pub replicas: BTreeMap<String, Replica>,
}

impl Slice {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replicas: BTreeMap::new(),
        }
    }

    /// First replica flagged as leader
    pub fn leader(&self) -> Option<&Replica> {
        self.replicas.values().find(|r| r.leader)
    }

    pub fn active_replicas(&self) -> impl Iterator<Item = &Replica> {
        self.replicas.values().filter(|r| r.is_active())
    }
}

/// Collection with its linked config set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocCollection {
    pub name: String,
    pub config_name: Option<String>,
    pub slices: BTreeMap<String, Slice>,
}

impl DocCollection {
    pub fn new(name: impl Into<String>, config_name: Option<String>) -> Self {
        Self {
            name: name.into(),
            config_name,
            slices: BTreeMap::new(),
        }
    }

    pub fn replica_count(&self) -> usize {
        self.slices.values().map(|s| s.replicas.len()).sum()
    }
}

/// Cluster state snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClusterState {
    /// Store revision the snapshot was read at
    pub revision: u64,
    pub collections: BTreeMap<String, DocCollection>,
    pub live_nodes: BTreeSet<String>,
}

impl ClusterState {
    pub fn collection(&self, name: &str) -> Option<&DocCollection> {
        self.collections.get(name)
    }

    pub fn collection_names(&self) -> Vec<&str> {
        self.collections.keys().map(String::as_str).collect()
    }

    pub fn slice(&self, collection: &str, shard: &str) -> Option<&Slice> {
        self.collections.get(collection)?.slices.get(shard)
    }

    pub fn replica(&self, collection: &str, shard: &str, replica: &str) -> Option<&Replica> {
        self.slice(collection, shard)?.replicas.get(replica)
    }

    pub fn leader(&self, collection: &str, shard: &str) -> Option<&Replica> {
        self.slice(collection, shard)?.leader()
    }

    pub fn is_live(&self, node_name: &str) -> bool {
        self.live_nodes.contains(node_name)
    }

    /// Replicas in the `Active` state. With `shard` omitted, every shard of
    /// the collection is included; an unknown shard yields nothing.
    pub fn active_replicas(&self, collection: &str, shard: Option<&str>) -> Result<Vec<&Replica>> {
        let coll = self
            .collections
            .get(collection)
            .ok_or_else(|| CloudError::UnknownCollection(collection.to_string()))?;

        Ok(coll
            .slices
            .values()
            .filter(|s| shard.map_or(true, |name| s.name == name))
            .flat_map(|s| s.active_replicas())
            .collect())
    }

    /// Active replicas whose node is also live, i.e. what routing may use
    pub fn servable_replicas(
        &self,
        collection: &str,
        shard: Option<&str>,
    ) -> Result<Vec<&Replica>> {
        Ok(self
            .active_replicas(collection, shard)?
            .into_iter()
            .filter(|r| self.is_live(&r.node_name))
            .collect())
    }
}

/// Replicas whose node host (port stripped) is exactly `host`
pub fn filter_by_host<'a, I>(replicas: I, host: &str) -> Vec<&'a Replica>
where
    I: IntoIterator<Item = &'a Replica>,
{
    replicas.into_iter().filter(|r| r.host() == host).collect()
}
