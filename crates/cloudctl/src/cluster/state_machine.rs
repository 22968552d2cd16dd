//! Replica state machine
//!
//! Producers never write replica nodes directly. They append a
//! [`StateMessage`] to the state queue (persistent sequential items under
//! `/overseer/queue`), and a single [`ReplicaStateMachine`] drains the queue
//! in sequence order, validating every transition and writing the replica
//! node with compare-and-set. Two messages for the same replica are thus
//! applied in the order they were submitted.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use coord::{CreateMode, StoreClient, StoreError};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Replica, ReplicaState};
use crate::error::{CloudError, Result};
use crate::layout::{
    collection_path, replica_path, replicas_path, QUEUE_ITEM_PREFIX, STATE_QUEUE_ZKNODE,
};

/// Pause before draining again after a failed drain
pub const DRAIN_RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// Message submitted to the state queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum StateMessage {
    /// A node registers a core for a shard; the replica starts `Down`
    Register {
        collection: String,
        shard: String,
        replica: String,
        core: String,
        node_name: String,
        base_url: String,
    },
    State {
        collection: String,
        shard: String,
        replica: String,
        state: ReplicaState,
    },
    /// Make `replica` the leader of its shard
    Leader {
        collection: String,
        shard: String,
        replica: String,
    },
    Unregister {
        collection: String,
        shard: String,
        replica: String,
    },
}

impl StateMessage {
    pub fn state(
        collection: impl Into<String>,
        shard: impl Into<String>,
        replica: impl Into<String>,
        state: ReplicaState,
    ) -> Self {
        StateMessage::State {
            collection: collection.into(),
            shard: shard.into(),
            replica: replica.into(),
            state,
        }
    }

    /// (collection, shard, replica) the message targets
    pub fn target(&self) -> (&str, &str, &str) {
        match self {
            StateMessage::Register {
                collection,
                shard,
                replica,
                ..
            }
            | StateMessage::State {
                collection,
                shard,
                replica,
                ..
            }
            | StateMessage::Leader {
                collection,
                shard,
                replica,
            }
            | StateMessage::Unregister {
                collection,
                shard,
                replica,
            } => (collection, shard, replica),
        }
    }

    fn replica_path(&self) -> String {
        let (collection, shard, replica) = self.target();
        replica_path(collection, shard, replica)
    }
}

/// Producer side of the state queue
#[derive(Clone)]
pub struct StateQueue {
    client: Arc<StoreClient>,
}

impl StateQueue {
    pub fn new(client: Arc<StoreClient>) -> Self {
        Self { client }
    }

    /// Append a message; returns the queue item path
    pub async fn offer(&self, message: &StateMessage) -> Result<String> {
        let data = serde_json::to_vec(message)
            .map_err(|e| CloudError::malformed(STATE_QUEUE_ZKNODE, e))?;
        let item = self
            .client
            .create(
                &format!("{}/{}", STATE_QUEUE_ZKNODE, QUEUE_ITEM_PREFIX),
                Bytes::from(data),
                CreateMode::PersistentSequential,
                true,
            )
            .await?;
        debug!("Queued {:?} as {}", message, item);
        Ok(item)
    }

    /// Number of items not yet consumed
    pub async fn pending(&self) -> Result<usize> {
        match self.client.list_children(STATE_QUEUE_ZKNODE).await {
            Ok(items) => Ok(items.len()),
            Err(StoreError::NoSuchPath(_)) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

/// Consumer side of the state queue, the only writer of replica nodes
pub struct ReplicaStateMachine {
    client: Arc<StoreClient>,
    // one drain at a time, even when process_pending is called concurrently
    drain: Mutex<()>,
}

impl ReplicaStateMachine {
    pub fn new(client: Arc<StoreClient>) -> Self {
        Self {
            client,
            drain: Mutex::new(()),
        }
    }

    /// Apply every queued message in sequence order. Returns how many
    /// messages changed a replica.
    pub async fn process_pending(&self) -> Result<usize> {
        let _guard = self.drain.lock().await;

        let items = match self.client.list_children(STATE_QUEUE_ZKNODE).await {
            Ok(items) => items,
            Err(StoreError::NoSuchPath(_)) => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut changed = 0;
        for item in items {
            let item_path = format!("{}/{}", STATE_QUEUE_ZKNODE, item);
            let data = match self.client.get_data(&item_path).await {
                Ok(data) => data,
                Err(StoreError::NoSuchPath(_)) => continue,
                Err(e) => return Err(e.into()),
            };

            match serde_json::from_slice::<StateMessage>(&data) {
                Ok(message) => match self.apply(&message).await {
                    Ok(true) => changed += 1,
                    Ok(false) => debug!("No-op state message {}: {:?}", item, message),
                    Err(e) if is_rejection(&e) => {
                        warn!("Rejected state message {}: {}", item, e);
                    }
                    // leave the item queued; the next drain retries it
                    Err(e) => return Err(e),
                },
                Err(e) => warn!("Dropping unreadable state message {}: {}", item, e),
            }

            match self.client.delete(&item_path, None).await {
                Ok(()) | Err(StoreError::NoSuchPath(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(changed)
    }

    /// Apply one message. `Ok(false)` means nothing had to change.
    pub async fn apply(&self, message: &StateMessage) -> Result<bool> {
        let path = message.replica_path();
        match message {
            StateMessage::Register {
                collection,
                shard,
                replica,
                core,
                node_name,
                base_url,
            } => {
                if !self.client.exists(&collection_path(collection)).await? {
                    return Err(CloudError::UnknownCollection(collection.clone()));
                }
                let registered =
                    Replica::new(replica, collection, shard, core, node_name, base_url);
                let data = encode(&path, &registered)?;
                match self
                    .client
                    .create(&path, data, CreateMode::Persistent, true)
                    .await
                {
                    Ok(_) => {
                        info!("Registered replica {} on {}", path, node_name);
                        Ok(true)
                    }
                    // re-registration after a restart: new location, back to Down
                    Err(StoreError::NodeExists(_)) => {
                        self.update_replica(&path, |r| {
                            r.core = core.clone();
                            r.node_name = node_name.clone();
                            r.base_url = base_url.clone();
                            r.state = ReplicaState::Down;
                            Ok(true)
                        })
                        .await
                    }
                    Err(e) => Err(e.into()),
                }
            }
            StateMessage::State { replica, state, .. } => {
                let next = *state;
                let changed = self
                    .update_replica(&path, |r| {
                        if r.state == next {
                            return Ok(false);
                        }
                        if !r.state.can_transition_to(next) {
                            return Err(CloudError::InvalidTransition {
                                replica: replica.clone(),
                                from: r.state,
                                to: next,
                            });
                        }
                        r.state = next;
                        Ok(true)
                    })
                    .await?;
                if changed {
                    info!("Replica {} is now {}", path, next);
                }
                Ok(changed)
            }
            StateMessage::Leader {
                collection,
                shard,
                replica,
            } => {
                // siblings lose the flag before the target gains it, so a
                // failure halfway never leaves two leaders behind
                if !self.client.exists(&path).await? {
                    return Err(StoreError::NoSuchPath(path).into());
                }
                let mut changed = false;
                for sibling in self.client.list_children(&replicas_path(collection, shard)).await? {
                    if &sibling == replica {
                        continue;
                    }
                    let sibling_path = replica_path(collection, shard, &sibling);
                    changed |= self
                        .update_replica(&sibling_path, |r| {
                            let was = r.leader;
                            r.leader = false;
                            Ok(was)
                        })
                        .await?;
                }
                changed |= self
                    .update_replica(&path, |r| {
                        let was = r.leader;
                        r.leader = true;
                        Ok(!was)
                    })
                    .await?;
                if changed {
                    info!("Replica {} is now leader of {}/{}", replica, collection, shard);
                }
                Ok(changed)
            }
            StateMessage::Unregister { .. } => match self.client.delete(&path, None).await {
                Ok(()) => {
                    info!("Unregistered replica {}", path);
                    Ok(true)
                }
                Err(StoreError::NoSuchPath(_)) => Ok(false),
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Read-modify-write of a replica node, retried on version conflicts
    async fn update_replica<F>(&self, path: &str, mut modify: F) -> Result<bool>
    where
        F: FnMut(&mut Replica) -> Result<bool>,
    {
        loop {
            let (data, stat) = self.client.get_data_with_stat(path).await?;
            let mut replica: Replica =
                serde_json::from_slice(&data).map_err(|e| CloudError::malformed(path, e))?;
            if !modify(&mut replica)? {
                return Ok(false);
            }
            let data = encode(path, &replica)?;
            match self.client.set_data(path, data, Some(stat.version)).await {
                Ok(_) => return Ok(true),
                Err(StoreError::BadVersion { .. }) => {
                    debug!("Version conflict on {}, retrying", path);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Drain whenever the store changes, until `shutdown` flips to true.
    /// After a failed drain the queue is re-checked every
    /// [`DRAIN_RETRY_INTERVAL`] even if the store stays idle.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut changes = self.client.subscribe();
        info!("Replica state machine started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            let failed = match self.process_pending().await {
                Ok(0) => false,
                Ok(n) => {
                    debug!("Applied {} state changes", n);
                    false
                }
                Err(e) if e.is_connection_error() => {
                    error!("Replica state machine lost its session: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("State queue drain failed, retrying: {}", e);
                    true
                }
            };

            let retry = async {
                if failed {
                    tokio::time::sleep(DRAIN_RETRY_INTERVAL).await
                } else {
                    std::future::pending().await
                }
            };

            tokio::select! {
                _ = retry => {}
                changed = changes.changed() => {
                    if changed.is_err() {
                        return Err(StoreError::NotConnected.into());
                    }
                }
                res = shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Replica state machine stopped");
        Ok(())
    }

    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}

fn encode(path: &str, replica: &Replica) -> Result<Bytes> {
    serde_json::to_vec(replica)
        .map(Bytes::from)
        .map_err(|e| CloudError::malformed(path, e))
}

/// Errors that drop the message instead of stalling the queue
fn is_rejection(e: &CloudError) -> bool {
    matches!(
        e,
        CloudError::InvalidTransition { .. }
            | CloudError::UnknownCollection(_)
            | CloudError::Malformed { .. }
            | CloudError::Store(StoreError::NoSuchPath(_))
    )
}
