//! Embedded coordination server
//!
//! Hosts a [`MemoryStore`] in-process for single-machine clusters and tests,
//! persisting the tree to `<data_dir>/store.json` across restarts.
//!
//! A data dir belongs to one server at a time. `start` takes an exclusive
//! lock on `<data_dir>/store.lock` and fails with `DataDirLocked` while
//! another server holds it; the lock is released once the final image is
//! written.

use std::fs::{File, OpenOptions};
use std::future::Future;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tokio::fs;
use tracing::{info, warn};

use crate::error::{StoreError, StoreResult};
use crate::memory::{MemoryStore, StoreImage};

const IMAGE_FILE: &str = "store.json";
const LOCK_FILE: &str = "store.lock";

/// Embedded server handle
pub struct EmbeddedServer {
    data_dir: PathBuf,
    image_path: PathBuf,
    store: MemoryStore,
    lock: File,
}

impl EmbeddedServer {
    /// Start the server, loading a previously persisted tree if present
    pub async fn start<P: AsRef<Path>>(data_dir: P) -> StoreResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let image_path = data_dir.join(IMAGE_FILE);

        fs::create_dir_all(&data_dir).await?;
        let lock = lock_data_dir(&data_dir)?;

        let store = if fs::try_exists(&image_path).await? {
            let content = fs::read_to_string(&image_path).await?;
            let image: StoreImage = serde_json::from_str(&content)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            info!(
                "Loaded store image: {} nodes, revision {}, saved at {}",
                image.nodes.len(),
                image.revision,
                image.saved_at.to_rfc3339()
            );
            MemoryStore::from_image(image)?
        } else {
            info!("No store image in {:?}, starting empty", data_dir);
            MemoryStore::new()
        };

        info!("Embedded coordination server started: data_dir={:?}", data_dir);
        Ok(Self {
            data_dir,
            image_path,
            store,
            lock,
        })
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Persist the current tree
    pub async fn save(&self) -> StoreResult<()> {
        // Write to temp file first, then atomically rename
        let temp_path = self.image_path.with_extension("json.tmp");
        let image = self.store.to_image();
        let content = serde_json::to_string_pretty(&image)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &self.image_path).await?;

        info!(
            "Saved store image: {} nodes, revision {}",
            image.nodes.len(),
            image.revision
        );
        Ok(())
    }

    /// Persist and shut down
    pub async fn stop(self) -> StoreResult<()> {
        let saved = self.save().await;
        if let Err(e) = FileExt::unlock(&self.lock) {
            warn!("Failed to unlock {:?}: {}", self.data_dir, e);
        }
        saved?;
        info!("Embedded coordination server stopped");
        Ok(())
    }

    /// Run `f` against a started server; the server is stopped afterwards
    /// whether or not `f` succeeds.
    pub async fn scoped<P, F, Fut, T, E>(data_dir: P, f: F) -> Result<T, E>
    where
        P: AsRef<Path>,
        F: FnOnce(MemoryStore) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<StoreError>,
    {
        let server = Self::start(data_dir).await?;
        let result = f(server.store.clone()).await;
        let stopped = server.stop().await;

        match (result, stopped) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(stop_err)) => {
                warn!("Failed to stop embedded server after error: {}", stop_err);
                Err(e)
            }
        }
    }
}

fn lock_data_dir(data_dir: &Path) -> StoreResult<File> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(data_dir.join(LOCK_FILE))?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
            Err(StoreError::DataDirLocked(data_dir.display().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}
