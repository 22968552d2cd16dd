//! Administrative commands
//!
//! The closed set of commands, each carrying its validated arguments. Every
//! command goes through [`CommandExecutor::execute`], which validates it,
//! asks the authorizer and only then dispatches to the handler.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use coord::{path as node_path, PutOutcome, StoreClient};
use serde::Serialize;
use tokio::fs;
use tracing::info;

use crate::auth::{authorized, Action, Authorizer, Scope};
use crate::cluster::{validate_name, ClusterStateReader};
use crate::configset::{BootstrapReport, ConfigSetRegistry};
use crate::discovery::CoreDiscovery;
use crate::error::{CloudError, Result};
use crate::reporter::{self, TopologyEntry};
use crate::sync::{SyncOptions, SyncReport};

/// Administrative command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Upload and link the config of every core under a local home
    Bootstrap { solr_home: PathBuf },
    UpConfig { conf_dir: PathBuf, conf_name: String },
    DownConfig { conf_name: String, conf_dir: PathBuf },
    LinkConfig { collection: String, conf_name: String },
    MakePath { path: String },
    Put { path: String, data: String },
    PutFile { path: String, file: PathBuf },
    Get { path: String },
    GetFile { path: String, file: PathBuf },
    /// Dump the whole tree
    List,
    /// Recursively delete a path
    Clear { path: String },
    /// Active cores, optionally only those on one host
    GetCollections { host: Option<String> },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Bootstrap { .. } => "bootstrap",
            Command::UpConfig { .. } => "upconfig",
            Command::DownConfig { .. } => "downconfig",
            Command::LinkConfig { .. } => "linkconfig",
            Command::MakePath { .. } => "makepath",
            Command::Put { .. } => "put",
            Command::PutFile { .. } => "putfile",
            Command::Get { .. } => "get",
            Command::GetFile { .. } => "getfile",
            Command::List => "list",
            Command::Clear { .. } => "clear",
            Command::GetCollections { .. } => "getcollections",
        }
    }

    pub fn action(&self) -> Action {
        match self {
            Command::DownConfig { .. }
            | Command::Get { .. }
            | Command::GetFile { .. }
            | Command::List
            | Command::GetCollections { .. } => Action::Read,
            Command::UpConfig { .. }
            | Command::LinkConfig { .. }
            | Command::MakePath { .. }
            | Command::Put { .. }
            | Command::PutFile { .. } => Action::Write,
            Command::Bootstrap { .. } | Command::Clear { .. } => Action::Admin,
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            Command::UpConfig { conf_name, .. } | Command::DownConfig { conf_name, .. } => {
                Scope::ConfigSet(conf_name.clone())
            }
            Command::LinkConfig { collection, .. } => Scope::Collection(collection.clone()),
            Command::MakePath { path }
            | Command::Put { path, .. }
            | Command::PutFile { path, .. }
            | Command::Get { path }
            | Command::GetFile { path, .. }
            | Command::Clear { path } => Scope::Path(path.clone()),
            Command::Bootstrap { .. } | Command::List | Command::GetCollections { .. } => {
                Scope::Cluster
            }
        }
    }

    /// Check argument shape before anything touches the store
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> Result<()> {
            Err(CloudError::InvalidArguments(format!("{}: {}", self.name(), msg)))
        };
        let check_path = |p: &str| {
            node_path::validate(p)
                .map_err(|e| CloudError::InvalidArguments(format!("{}: {}", self.name(), e)))
        };

        match self {
            Command::Bootstrap { solr_home } if solr_home.as_os_str().is_empty() => {
                invalid("solr home is required".to_string())
            }
            Command::UpConfig { conf_dir, conf_name }
            | Command::DownConfig { conf_name, conf_dir } => {
                if conf_dir.as_os_str().is_empty() {
                    return invalid("config directory is required".to_string());
                }
                validate_name("config set", conf_name)
            }
            Command::LinkConfig {
                collection,
                conf_name,
            } => {
                validate_name("collection", collection)?;
                validate_name("config set", conf_name)
            }
            Command::PutFile { path, file } | Command::GetFile { path, file } => {
                if file.as_os_str().is_empty() {
                    return invalid("local file is required".to_string());
                }
                check_path(path)
            }
            Command::MakePath { path }
            | Command::Put { path, .. }
            | Command::Get { path }
            | Command::Clear { path } => check_path(path),
            Command::GetCollections { host: Some(host) } if host.is_empty() => {
                invalid("host must not be empty".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Result of a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandOutput {
    Done,
    Data { data: Vec<u8> },
    Layout { text: String },
    Sync { report: SyncReport },
    Bootstrap { report: BootstrapReport },
    Topology {
        entries: Vec<TopologyEntry>,
        host_filtered: bool,
    },
}

impl fmt::Display for CommandOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutput::Done
            | CommandOutput::Sync { .. }
            | CommandOutput::Bootstrap { .. } => Ok(()),
            CommandOutput::Data { data } => writeln!(f, "{}", String::from_utf8_lossy(data)),
            CommandOutput::Layout { text } => write!(f, "{}", text),
            CommandOutput::Topology {
                entries,
                host_filtered,
            } => write!(f, "{}", reporter::render(entries, *host_filtered)),
        }
    }
}

/// Command dispatcher
pub struct CommandExecutor {
    client: Arc<StoreClient>,
    registry: ConfigSetRegistry,
    reader: Arc<ClusterStateReader>,
    authz: Arc<dyn Authorizer>,
    discovery: Arc<dyn CoreDiscovery>,
    options: SyncOptions,
}

impl CommandExecutor {
    pub fn new(
        client: Arc<StoreClient>,
        reader: Arc<ClusterStateReader>,
        authz: Arc<dyn Authorizer>,
        discovery: Arc<dyn CoreDiscovery>,
    ) -> Self {
        Self {
            registry: ConfigSetRegistry::new(client.clone()),
            client,
            reader,
            authz,
            discovery,
            options: SyncOptions::default(),
        }
    }

    /// Options used for upload/download walks, e.g. a cancel signal
    pub fn with_sync_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn execute(&self, command: Command) -> Result<CommandOutput> {
        command.validate()?;
        let action = command.action();
        let scope = command.scope();
        let name = command.name();
        let output = authorized(self.authz.as_ref(), action, scope, self.dispatch(command)).await?;
        info!("Command {} completed", name);
        Ok(output)
    }

    async fn dispatch(&self, command: Command) -> Result<CommandOutput> {
        match command {
            Command::Bootstrap { solr_home } => {
                let report = self
                    .registry
                    .bootstrap(&solr_home, self.discovery.as_ref(), &self.options)
                    .await?;
                Ok(CommandOutput::Bootstrap { report })
            }
            Command::UpConfig {
                conf_dir,
                conf_name,
            } => {
                let report = self
                    .registry
                    .upload(&conf_name, &conf_dir, &self.options)
                    .await?;
                Ok(CommandOutput::Sync { report })
            }
            Command::DownConfig {
                conf_name,
                conf_dir,
            } => {
                let report = self
                    .registry
                    .download(&conf_name, &conf_dir, &self.options)
                    .await?;
                Ok(CommandOutput::Sync { report })
            }
            Command::LinkConfig {
                collection,
                conf_name,
            } => {
                self.registry.link(&collection, &conf_name).await?;
                Ok(CommandOutput::Done)
            }
            Command::MakePath { path } => {
                self.client.make_path(&path).await?;
                Ok(CommandOutput::Done)
            }
            Command::Put { path, data } => {
                self.put(&path, Bytes::from(data)).await?;
                Ok(CommandOutput::Done)
            }
            Command::PutFile { path, file } => {
                let data = fs::read(&file)
                    .await
                    .map_err(|e| CloudError::sync_failed(&file, e))?;
                self.put(&path, Bytes::from(data)).await?;
                Ok(CommandOutput::Done)
            }
            Command::Get { path } => {
                let data = self.client.get_data(&path).await?;
                Ok(CommandOutput::Data {
                    data: data.to_vec(),
                })
            }
            Command::GetFile { path, file } => {
                let data = self.client.get_data(&path).await?;
                if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)
                        .await
                        .map_err(|e| CloudError::sync_failed(parent, e))?;
                }
                fs::write(&file, &data)
                    .await
                    .map_err(|e| CloudError::sync_failed(&file, e))?;
                Ok(CommandOutput::Done)
            }
            Command::List => Ok(CommandOutput::Layout {
                text: self.client.print_layout(node_path::ROOT).await?,
            }),
            Command::Clear { path } => {
                self.client.clean(&path).await?;
                Ok(CommandOutput::Done)
            }
            Command::GetCollections { host } => {
                let state = self.reader.refresh().await?;
                let entries = reporter::topology(&state, host.as_deref())?;
                Ok(CommandOutput::Topology {
                    entries,
                    host_filtered: host.is_some(),
                })
            }
        }
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        match self.client.put(path, data).await? {
            PutOutcome::Created => info!("Created {}", path),
            PutOutcome::Updated => info!("Updated {}", path),
        }
        Ok(())
    }
}
