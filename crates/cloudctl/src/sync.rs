//! Tree synchronization between a local directory and a store subtree
//!
//! Upload copies directories as nodes holding [`DIR_MARKER`] and regular
//! files as nodes holding the file bytes; download is the inverse walk.
//! A childless node becomes a file unless it carries the marker, so empty
//! directories come back as directories. Symbolic links and other
//! non-regular entries are skipped with a warning.
//!
//! Uploads add and overwrite but never delete: a file removed locally stays
//! in the store until the subtree is cleared. Uploading into a fresh remote
//! root therefore yields an exact mirror, re-uploading into an existing one
//! yields a superset.
//!
//! Walks are sequential and stop at the first failure without rolling back;
//! both directions are idempotent, so the caller can simply re-run them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use coord::{path as node_path, CreateMode, StoreClient, StoreError};
use serde::Serialize;
use tokio::fs;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{CloudError, Result};

/// Payload of a node uploaded from a local directory
pub const DIR_MARKER: &[u8] = b"\0cloudctl:dir\0";

/// Cooperative cancellation, checked between file-level steps
#[derive(Clone)]
pub struct CancelSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk options
#[derive(Clone, Default)]
pub struct SyncOptions {
    pub cancel: Option<CancelSignal>,
}

impl SyncOptions {
    pub fn with_cancel(cancel: CancelSignal) -> Self {
        Self {
            cancel: Some(cancel),
        }
    }

    fn check(&self, step: &str) -> Result<()> {
        match &self.cancel {
            Some(c) if c.is_cancelled() => Err(CloudError::Cancelled(step.to_string())),
            _ => Ok(()),
        }
    }
}

/// What a walk did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub directories: usize,
    pub files_written: usize,
    pub files_unchanged: usize,
    pub skipped: Vec<String>,
    pub bytes: u64,
}

impl SyncReport {
    /// Number of remote or local writes performed
    pub fn writes(&self) -> usize {
        self.files_written
    }
}

#[derive(Debug)]
enum LocalEntry {
    Dir,
    File(PathBuf),
    Skipped,
}

/// Local tree <-> store subtree synchronizer
#[derive(Clone)]
pub struct TreeSynchronizer {
    client: Arc<StoreClient>,
}

impl TreeSynchronizer {
    pub fn new(client: Arc<StoreClient>) -> Self {
        Self { client }
    }

    /// Copy `local_root` into `remote_root`, overwriting changed files.
    /// Remote nodes with no local counterpart are left in place.
    pub async fn upload(
        &self,
        local_root: &Path,
        remote_root: &str,
        options: &SyncOptions,
    ) -> Result<SyncReport> {
        node_path::validate(remote_root)?;
        let meta = fs::metadata(local_root)
            .await
            .map_err(|e| CloudError::sync_failed(local_root, e))?;
        if !meta.is_dir() {
            return Err(CloudError::sync_failed(
                local_root,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
            ));
        }

        let entries = collect_local(local_root).await?;
        let mut report = SyncReport::default();

        options.check(remote_root)?;
        self.client.make_path(remote_root).await?;

        for (relative, entry) in entries {
            let remote = format!("{}/{}", remote_root.trim_end_matches('/'), relative);
            options.check(&remote)?;

            match entry {
                LocalEntry::Dir => {
                    match self
                        .client
                        .create(
                            &remote,
                            Bytes::from_static(DIR_MARKER),
                            CreateMode::Persistent,
                            true,
                        )
                        .await
                    {
                        Ok(_) | Err(StoreError::NodeExists(_)) => {}
                        Err(e) => return Err(e.into()),
                    }
                    report.directories += 1;
                }
                LocalEntry::File(local) => {
                    let data = fs::read(&local)
                        .await
                        .map_err(|e| CloudError::sync_failed(&local, e))?;
                    let data = Bytes::from(data);

                    let current = match self.client.get_data(&remote).await {
                        Ok(current) => Some(current),
                        Err(StoreError::NoSuchPath(_)) => None,
                        Err(e) => return Err(e.into()),
                    };
                    if current.as_ref() == Some(&data) {
                        report.files_unchanged += 1;
                        continue;
                    }

                    report.bytes += data.len() as u64;
                    self.client.put(&remote, data).await?;
                    report.files_written += 1;
                    debug!("Uploaded {:?} -> {}", local, remote);
                }
                LocalEntry::Skipped => {
                    warn!("Skipping non-regular file {}", relative);
                    report.skipped.push(relative);
                }
            }
        }

        info!(
            "Uploaded {:?} to {}: {} dirs, {} written, {} unchanged, {} skipped",
            local_root,
            remote_root,
            report.directories,
            report.files_written,
            report.files_unchanged,
            report.skipped.len()
        );
        Ok(report)
    }

    /// Mirror `remote_root` into `local_root`, overwriting local files
    pub async fn download(
        &self,
        remote_root: &str,
        local_root: &Path,
        options: &SyncOptions,
    ) -> Result<SyncReport> {
        node_path::validate(remote_root)?;
        let mut report = SyncReport::default();

        // A missing remote root fails before any local write
        let root_children = self.client.list_children(remote_root).await?;
        fs::create_dir_all(local_root)
            .await
            .map_err(|e| CloudError::sync_failed(local_root, e))?;

        let mut stack = vec![(remote_root.to_string(), local_root.to_path_buf(), root_children)];
        while let Some((remote, local, children)) = stack.pop() {
            for child in &children {
                let child_remote = node_path::join(&remote, child);
                let child_local = local.join(child);
                options.check(&child_remote)?;

                let grandchildren = self.client.list_children(&child_remote).await?;
                if grandchildren.is_empty() {
                    let data = self.client.get_data(&child_remote).await?;
                    if &data[..] == DIR_MARKER {
                        fs::create_dir_all(&child_local)
                            .await
                            .map_err(|e| CloudError::sync_failed(&child_local, e))?;
                        report.directories += 1;
                        continue;
                    }
                    fs::write(&child_local, &data)
                        .await
                        .map_err(|e| CloudError::sync_failed(&child_local, e))?;
                    report.bytes += data.len() as u64;
                    report.files_written += 1;
                    debug!("Downloaded {} -> {:?}", child_remote, child_local);
                } else {
                    fs::create_dir_all(&child_local)
                        .await
                        .map_err(|e| CloudError::sync_failed(&child_local, e))?;
                    report.directories += 1;
                    stack.push((child_remote, child_local, grandchildren));
                }
            }
        }

        info!(
            "Downloaded {} to {:?}: {} dirs, {} files",
            remote_root, local_root, report.directories, report.files_written
        );
        Ok(report)
    }
}

/// All entries below `root`, keyed by `/`-joined relative path, sorted
async fn collect_local(root: &Path) -> Result<Vec<(String, LocalEntry)>> {
    let mut entries = Vec::new();
    let mut stack = vec![(root.to_path_buf(), String::new())];

    while let Some((dir, prefix)) = stack.pop() {
        let mut read_dir = fs::read_dir(&dir)
            .await
            .map_err(|e| CloudError::sync_failed(&dir, e))?;
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| CloudError::sync_failed(&dir, e))?
        {
            let local = entry.path();
            let name = entry.file_name().into_string().map_err(|_| {
                CloudError::sync_failed(
                    &local,
                    std::io::Error::new(std::io::ErrorKind::InvalidData, "file name is not UTF-8"),
                )
            })?;
            node_path::validate_name(&name)?;

            let relative = if prefix.is_empty() {
                name
            } else {
                format!("{}/{}", prefix, name)
            };

            let meta = fs::symlink_metadata(&local)
                .await
                .map_err(|e| CloudError::sync_failed(&local, e))?;
            let file_type = meta.file_type();
            if file_type.is_dir() {
                stack.push((local, relative.clone()));
                entries.push((relative, LocalEntry::Dir));
            } else if file_type.is_file() {
                entries.push((relative, LocalEntry::File(local)));
            } else {
                entries.push((relative, LocalEntry::Skipped));
            }
        }
    }

    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}
