//! Cloudctl - config set distribution and cluster topology
//!
//! Control plane substrate of a search cluster, on top of a hierarchical
//! coordination store.
//!
//! # Features
//! - Upload/download of config sets from and to local directory trees
//! - Linking collections to config sets, bootstrap from local cores
//! - Coherent cluster state snapshots and active replica filtering
//! - Ordered replica state changes through a single-writer queue
//! - Administrative command table with pluggable authorization
//!
//! # Usage Example
//! ```ignore
//! use cloudctl::{CloudControl, Command, Config, auth::AllowAll};
//!
//! let server = coord::EmbeddedServer::start("./zoo_data").await?;
//! let store = std::sync::Arc::new(server.store().connect());
//! let ctl = CloudControl::connect(store, &Config::default(), std::sync::Arc::new(AllowAll)).await?;
//! ctl.execute(Command::List).await?;
//! server.stop().await?;
//! ```

pub mod api;
pub mod auth;
pub mod cluster;
pub mod command;
pub mod config;
pub mod configset;
pub mod discovery;
pub mod error;
pub mod layout;
pub mod reporter;
pub mod sync;

// Re-export commonly used types
pub use cluster::{ClusterState, ClusterStateReader, ReplicaState, ReplicaStateMachine, StateMessage, StateQueue};
pub use command::{Command, CommandExecutor, CommandOutput};
pub use config::Config;
pub use configset::{BootstrapReport, ConfigSetRegistry};
pub use error::{CloudError, Result};
pub use sync::{CancelSignal, SyncOptions, SyncReport, TreeSynchronizer};

use std::sync::Arc;

use coord::{CoordinationStore, StoreClient};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use auth::Authorizer;
use discovery::{CoreDiscovery, DirectoryCoreDiscovery};

/// Control plane over one store session
pub struct CloudControl {
    client: Arc<StoreClient>,
    registry: ConfigSetRegistry,
    reader: Arc<ClusterStateReader>,
    queue: StateQueue,
    state_machine: Arc<ReplicaStateMachine>,
    executor: CommandExecutor,
    authz: Arc<dyn Authorizer>,
}

impl CloudControl {
    /// Connect with directory based core discovery
    pub async fn connect(
        store: Arc<dyn CoordinationStore>,
        config: &Config,
        authz: Arc<dyn Authorizer>,
    ) -> Result<Self> {
        Self::with_discovery(store, config, authz, Arc::new(DirectoryCoreDiscovery)).await
    }

    pub async fn with_discovery(
        store: Arc<dyn CoordinationStore>,
        config: &Config,
        authz: Arc<dyn Authorizer>,
        discovery: Arc<dyn CoreDiscovery>,
    ) -> Result<Self> {
        let client = Arc::new(StoreClient::connect(store, &config.store.client_config()?).await?);
        let reader = Arc::new(ClusterStateReader::new(
            client.clone(),
            config.cluster.refresh_attempts,
        ));
        let executor =
            CommandExecutor::new(client.clone(), reader.clone(), authz.clone(), discovery);

        info!(
            "Control plane ready: session={}, chroot={}",
            client.session_id(),
            client.chroot().unwrap_or("/")
        );

        Ok(Self {
            registry: ConfigSetRegistry::new(client.clone()),
            queue: StateQueue::new(client.clone()),
            state_machine: Arc::new(ReplicaStateMachine::new(client.clone())),
            client,
            reader,
            executor,
            authz,
        })
    }

    pub fn client(&self) -> &Arc<StoreClient> {
        &self.client
    }

    pub fn registry(&self) -> &ConfigSetRegistry {
        &self.registry
    }

    pub fn reader(&self) -> &Arc<ClusterStateReader> {
        &self.reader
    }

    /// Producer handle for replica state changes
    pub fn queue(&self) -> &StateQueue {
        &self.queue
    }

    pub fn state_machine(&self) -> &Arc<ReplicaStateMachine> {
        &self.state_machine
    }

    pub fn authorizer(&self) -> &Arc<dyn Authorizer> {
        &self.authz
    }

    /// Validate, authorize and run an administrative command
    pub async fn execute(&self, command: Command) -> Result<CommandOutput> {
        self.executor.execute(command).await
    }

    /// Start the replica state machine as a background task
    pub fn start_state_machine(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<Result<()>> {
        self.state_machine.clone().spawn(shutdown)
    }

    pub async fn close(&self) {
        self.client.close().await;
    }
}
