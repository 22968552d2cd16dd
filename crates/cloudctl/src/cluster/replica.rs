//! Replica definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Replica liveness state
///
/// ```text
/// DOWN -> RECOVERING -> ACTIVE
///         RECOVERING -> RECOVERY_FAILED -> RECOVERING
/// any -> DOWN
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaState {
    /// Not serving; initial state after registration
    Down,
    /// Catching up from the leader
    Recovering,
    /// Servable
    Active,
    /// Recovery gave up, waiting for a retry
    RecoveryFailed,
}

impl Default for ReplicaState {
    fn default() -> Self {
        Self::Down
    }
}

impl ReplicaState {
    /// Whether `self -> next` is a legal transition. Staying put is legal.
    pub fn can_transition_to(self, next: ReplicaState) -> bool {
        use ReplicaState::*;
        match (self, next) {
            (from, to) if from == to => true,
            (_, Down) => true,
            (Down, Recovering)
            | (Recovering, Active)
            | (Recovering, RecoveryFailed)
            | (RecoveryFailed, Recovering) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ReplicaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicaState::Down => write!(f, "down"),
            ReplicaState::Recovering => write!(f, "recovering"),
            ReplicaState::Active => write!(f, "active"),
            ReplicaState::RecoveryFailed => write!(f, "recovery_failed"),
        }
    }
}

impl FromStr for ReplicaState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "down" => Ok(ReplicaState::Down),
            "recovering" => Ok(ReplicaState::Recovering),
            "active" => Ok(ReplicaState::Active),
            "recovery_failed" => Ok(ReplicaState::RecoveryFailed),
            other => Err(format!("unknown replica state '{}'", other)),
        }
    }
}

/// Replica information, stored as the replica node's payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    /// Replica ID, unique within its shard
    pub name: String,
    pub collection: String,
    pub shard: String,
    /// Core name on the hosting node
    pub core: String,
    /// Hosting node, `host:port_context`
    pub node_name: String,
    /// Base address of the hosting node
    pub base_url: String,
    #[serde(default)]
    pub leader: bool,
    #[serde(default)]
    pub state: ReplicaState,
    pub registered_at: DateTime<Utc>,
}

impl Replica {
    /// New replica in the initial `Down` state
    pub fn new(
        name: impl Into<String>,
        collection: impl Into<String>,
        shard: impl Into<String>,
        core: impl Into<String>,
        node_name: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            collection: collection.into(),
            shard: shard.into(),
            core: core.into(),
            node_name: node_name.into(),
            base_url: base_url.into(),
            leader: false,
            state: ReplicaState::Down,
            registered_at: Utc::now(),
        }
    }

    /// Host component of the node name, port stripped
    pub fn host(&self) -> &str {
        self.node_name.split(':').next().unwrap_or(&self.node_name)
    }

    pub fn is_active(&self) -> bool {
        self.state == ReplicaState::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ReplicaState::*;

    #[test]
    fn test_transitions() {
        assert!(Down.can_transition_to(Recovering));
        assert!(Recovering.can_transition_to(Active));
        assert!(Recovering.can_transition_to(RecoveryFailed));
        assert!(RecoveryFailed.can_transition_to(Recovering));
        assert!(Active.can_transition_to(Down));
        assert!(RecoveryFailed.can_transition_to(Down));
        assert!(Active.can_transition_to(Active));

        assert!(!Down.can_transition_to(Active));
        assert!(!Active.can_transition_to(Recovering));
        assert!(!RecoveryFailed.can_transition_to(Active));
    }

    #[test]
    fn test_host_and_parse() {
        let r = Replica::new("core_node1", "c", "shard1", "c_shard1_replica1", "10.0.0.5:8983_solr", "http://10.0.0.5:8983/solr");
        assert_eq!(r.host(), "10.0.0.5");
        assert_eq!(r.state, Down);
        assert_eq!("recovery_failed".parse::<ReplicaState>().unwrap(), RecoveryFailed);
        assert!("bogus".parse::<ReplicaState>().is_err());
        assert_eq!(serde_json::to_string(&RecoveryFailed).unwrap(), "\"recovery_failed\"");
    }
}
