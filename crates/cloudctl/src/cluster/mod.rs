//! Cluster topology module
//!
//! Collections, shard groups and replicas as read from the store, plus the
//! ordered channel through which replica state is changed.

mod reader;
mod replica;
mod state;
mod state_machine;

pub use reader::ClusterStateReader;
pub(crate) use reader::{parse_props, validate_name};
pub use replica::{Replica, ReplicaState};
pub use state::{filter_by_host, ClusterState, DocCollection, Slice};
pub use state_machine::{ReplicaStateMachine, StateMessage, StateQueue};

use bytes::Bytes;
use coord::{CreateMode, StoreClient};
use tracing::info;

use crate::error::Result;
use crate::layout::live_node_path;

/// Announce `node_name` as live for the lifetime of the client's session
pub async fn register_live_node(client: &StoreClient, node_name: &str) -> Result<()> {
    validate_name("node", node_name)?;
    client
        .create(
            &live_node_path(node_name),
            Bytes::new(),
            CreateMode::Ephemeral,
            true,
        )
        .await?;
    info!("Node {} is live", node_name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use coord::{ClientConfig, MemoryStore};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_live_node_goes_away_with_session() {
        let store = MemoryStore::new();
        let node = StoreClient::connect(Arc::new(store.connect()), &ClientConfig::default())
            .await
            .unwrap();
        let observer = Arc::new(
            StoreClient::connect(Arc::new(store.connect()), &ClientConfig::default())
                .await
                .unwrap(),
        );
        register_live_node(&node, "hostA:8983_solr").await.unwrap();

        let reader = ClusterStateReader::new(observer.clone(), 3);
        assert!(reader.refresh().await.unwrap().is_live("hostA:8983_solr"));

        assert!(store.expire_session(node.session_id()));
        assert!(!reader.refresh().await.unwrap().is_live("hostA:8983_solr"));
    }
}
