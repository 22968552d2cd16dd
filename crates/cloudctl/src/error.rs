//! Control plane errors

use std::path::PathBuf;

use coord::StoreError;

use crate::auth::{Action, Scope};
use crate::cluster::ReplicaState;
use crate::config::ConfigError;

/// Control plane error
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    /// Store failures pass through unchanged; they carry their own path
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Config set {0} does not exist")]
    UnknownConfigSet(String),
    #[error("Collection {0} does not exist")]
    UnknownCollection(String),
    #[error("Sync failed at {path:?}: {cause}")]
    SyncFailed {
        path: PathBuf,
        #[source]
        cause: std::io::Error,
    },
    #[error("Cancelled before {0}")]
    Cancelled(String),
    #[error("Forbidden: {action} on {scope}")]
    Forbidden { action: Action, scope: Scope },
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("Invalid transition for replica {replica}: {from} -> {to}")]
    InvalidTransition {
        replica: String,
        from: ReplicaState,
        to: ReplicaState,
    },
    #[error("Cluster state changed during {attempts} consecutive reads")]
    InconsistentSnapshot { attempts: usize },
    #[error("Malformed data at {path}: {reason}")]
    Malformed { path: String, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CloudError {
    /// Session lost or store unreachable; retrying on this session is pointless
    pub fn is_connection_error(&self) -> bool {
        matches!(self, CloudError::Store(e) if e.is_connection_error())
    }

    pub(crate) fn malformed(path: &str, reason: impl ToString) -> Self {
        CloudError::Malformed {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn sync_failed(path: impl Into<PathBuf>, cause: std::io::Error) -> Self {
        CloudError::SyncFailed {
            path: path.into(),
            cause,
        }
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
