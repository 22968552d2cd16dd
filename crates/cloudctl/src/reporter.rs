//! Topology reporter
//!
//! Projects active replicas into core descriptors, the form nodes use to
//! recreate their core definitions.

use std::fmt::Write as _;

use serde::Serialize;

use crate::cluster::{filter_by_host, ClusterState, Replica};
use crate::error::Result;

/// One core of the active topology
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopologyEntry {
    pub shard: String,
    pub core_name: String,
    pub node_host: String,
    pub collection: String,
}

impl TopologyEntry {
    /// `<core .../>` element for a node's core list
    pub fn core_element(&self) -> String {
        format!(
            "    <core schema=\"schema.xml\" loadOnStartup=\"true\" shard=\"{}\" instanceDir=\"{}/\" transient=\"false\" name=\"{}\" config=\"solrconfig.xml\" collection=\"{}\"/>",
            self.shard, self.core_name, self.core_name, self.collection
        )
    }
}

/// Descriptors for `replicas`, in input order
pub fn describe<'a, I>(replicas: I) -> Vec<TopologyEntry>
where
    I: IntoIterator<Item = &'a Replica>,
{
    replicas
        .into_iter()
        .map(|r| TopologyEntry {
            shard: r.shard.clone(),
            core_name: r.core.clone(),
            node_host: r.host().to_string(),
            collection: r.collection.clone(),
        })
        .collect()
}

/// Active topology of every collection, optionally only the cores on `host`
pub fn topology(state: &ClusterState, host: Option<&str>) -> Result<Vec<TopologyEntry>> {
    let mut entries = Vec::new();
    for name in state.collection_names() {
        entries.extend(collection_topology(state, name, host)?);
    }
    Ok(entries)
}

pub fn collection_topology(
    state: &ClusterState,
    collection: &str,
    host: Option<&str>,
) -> Result<Vec<TopologyEntry>> {
    let active = state.active_replicas(collection, None)?;
    Ok(match host {
        Some(host) => describe(filter_by_host(active, host)),
        None => describe(active),
    })
}

/// One line per entry. Without a host filter each line is prefixed with
/// the node host and a tab.
pub fn render(entries: &[TopologyEntry], host_filtered: bool) -> String {
    let mut out = String::new();
    for entry in entries {
        if !host_filtered {
            let _ = write!(out, "{}\t", entry.node_host);
        }
        let _ = writeln!(out, "{}", entry.core_element());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{DocCollection, ReplicaState, Slice};

    fn state() -> ClusterState {
        let mut slice = Slice::new("shard1");
        for (name, node, st) in [
            ("r1", "hostA:8983_solr", ReplicaState::Active),
            ("r2", "hostB:8983_solr", ReplicaState::Down),
            ("r3", "hostB:7574_solr", ReplicaState::Active),
        ] {
            let mut r = Replica::new(name, "c", "shard1", format!("c_{}", name), node, "");
            r.state = st;
            slice.replicas.insert(name.to_string(), r);
        }
        let mut coll = DocCollection::new("c", None);
        coll.slices.insert("shard1".to_string(), slice);
        let mut state = ClusterState::default();
        state.collections.insert("c".to_string(), coll);
        state.collections.insert("empty".to_string(), DocCollection::new("empty", None));
        state
    }

    #[test]
    fn test_topology_by_host() {
        let state = state();
        let all = topology(&state, None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].node_host, "hostA");

        let on_b = topology(&state, Some("hostB")).unwrap();
        assert_eq!(
            on_b,
            vec![TopologyEntry {
                shard: "shard1".to_string(),
                core_name: "c_r3".to_string(),
                node_host: "hostB".to_string(),
                collection: "c".to_string(),
            }]
        );
    }

    #[test]
    fn test_render() {
        let state = state();
        let out = render(&topology(&state, Some("hostA")).unwrap(), true);
        assert_eq!(
            out,
            "    <core schema=\"schema.xml\" loadOnStartup=\"true\" shard=\"shard1\" instanceDir=\"c_r1/\" transient=\"false\" name=\"c_r1\" config=\"solrconfig.xml\" collection=\"c\"/>\n"
        );

        let out = render(&topology(&state, None).unwrap(), false);
        assert!(out.lines().all(|l| l.starts_with("host") && l.contains('\t')));
    }
}
