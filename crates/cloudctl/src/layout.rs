//! Remote namespace layout, relative to the client chroot

pub const CONFIGS_ZKNODE: &str = "/configs";
pub const COLLECTIONS_ZKNODE: &str = "/collections";
pub const LIVE_NODES_ZKNODE: &str = "/live_nodes";
pub const STATE_QUEUE_ZKNODE: &str = "/overseer/queue";

/// Prefix of state queue items; the store appends a sequence number
pub const QUEUE_ITEM_PREFIX: &str = "qn-";

/// Collection property holding the linked config set name
pub const CONFIGNAME_PROP: &str = "configName";

pub fn config_path(name: &str) -> String {
    format!("{}/{}", CONFIGS_ZKNODE, name)
}

pub fn collection_path(collection: &str) -> String {
    format!("{}/{}", COLLECTIONS_ZKNODE, collection)
}

pub fn shards_path(collection: &str) -> String {
    format!("{}/shards", collection_path(collection))
}

pub fn shard_path(collection: &str, shard: &str) -> String {
    format!("{}/{}", shards_path(collection), shard)
}

pub fn replicas_path(collection: &str, shard: &str) -> String {
    format!("{}/replicas", shard_path(collection, shard))
}

pub fn replica_path(collection: &str, shard: &str, replica: &str) -> String {
    format!("{}/{}", replicas_path(collection, shard), replica)
}

pub fn live_node_path(node_name: &str) -> String {
    format!("{}/{}", LIVE_NODES_ZKNODE, node_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replica_path() {
        assert_eq!(
            replica_path("football", "shard1", "core_node1"),
            "/collections/football/shards/shard1/replicas/core_node1"
        );
        assert_eq!(config_path("myconf"), "/configs/myconf");
    }
}
