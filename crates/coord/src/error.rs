//! Coordination store errors

use std::time::Duration;

/// Coordination store error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Not connected to coordination store")]
    NotConnected,
    #[error("Timed out after {timeout:?} during {op} on {path}")]
    Timeout {
        op: &'static str,
        path: String,
        timeout: Duration,
    },
    #[error("No such path: {0}")]
    NoSuchPath(String),
    #[error("Node already exists: {0}")]
    NodeExists(String),
    #[error("Node has children: {0}")]
    NotEmpty(String),
    #[error("Version mismatch on {path}: expected {expected}, found {actual}")]
    BadVersion {
        path: String,
        expected: i32,
        actual: i32,
    },
    #[error("Chroot {0} does not exist, create it before first use")]
    ChrootMissing(String),
    #[error("Invalid path {path}: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("Ephemeral node {0} cannot have children")]
    NoChildrenForEphemerals(String),
    #[error("Store data dir {0} is in use by another server")]
    DataDirLocked(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub(crate) fn invalid_path(path: &str, reason: impl Into<String>) -> Self {
        StoreError::InvalidPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    /// Errors that say nothing about the node itself, only about the session
    pub fn is_connection_error(&self) -> bool {
        matches!(self, StoreError::NotConnected | StoreError::Timeout { .. })
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
