//! Config set registry and collection linking
//!
//! Config sets live under `/configs/<name>` as mirrors of local directory
//! trees. A collection node (`/collections/<name>`) holds a JSON property
//! map whose `configName` entry references one config set.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use coord::{StoreClient, StoreError};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cluster::{parse_props, validate_name};
use crate::discovery::CoreDiscovery;
use crate::error::{CloudError, Result};
use crate::layout::{collection_path, config_path, CONFIGNAME_PROP, CONFIGS_ZKNODE};
use crate::sync::{SyncOptions, SyncReport, TreeSynchronizer};

/// What a bootstrap run did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    /// Config sets uploaded by this run
    pub uploaded: Vec<String>,
    /// Collections whose link was written by this run
    pub linked: Vec<String>,
    /// Cores left alone because they were already bootstrapped
    pub unchanged: Vec<String>,
    /// Cores without a config directory
    pub skipped: Vec<String>,
}

impl BootstrapReport {
    pub fn writes(&self) -> usize {
        self.uploaded.len() + self.linked.len()
    }
}

/// Config set registry
#[derive(Clone)]
pub struct ConfigSetRegistry {
    client: Arc<StoreClient>,
    sync: TreeSynchronizer,
}

impl ConfigSetRegistry {
    pub fn new(client: Arc<StoreClient>) -> Self {
        Self {
            sync: TreeSynchronizer::new(client.clone()),
            client,
        }
    }

    /// Upload `local_dir` as config set `name`
    pub async fn upload(
        &self,
        name: &str,
        local_dir: &Path,
        options: &SyncOptions,
    ) -> Result<SyncReport> {
        validate_name("config set", name)?;
        self.client.check_chroot().await?;
        let report = self.sync.upload(local_dir, &config_path(name), options).await?;
        info!("Config set {} uploaded from {:?}", name, local_dir);
        Ok(report)
    }

    /// Download config set `name` into `local_dir`
    pub async fn download(
        &self,
        name: &str,
        local_dir: &Path,
        options: &SyncOptions,
    ) -> Result<SyncReport> {
        validate_name("config set", name)?;
        if !self.exists(name).await? {
            return Err(CloudError::UnknownConfigSet(name.to_string()));
        }
        self.sync.download(&config_path(name), local_dir, options).await
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.client.exists(&config_path(name)).await?)
    }

    /// Names of all config sets, sorted
    pub async fn list(&self) -> Result<Vec<String>> {
        match self.client.list_children(CONFIGS_ZKNODE).await {
            Ok(names) => Ok(names),
            Err(StoreError::NoSuchPath(_)) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Point `collection` at config set `config_name`, creating the
    /// collection node if needed. Other collection properties are kept.
    /// Returns false when the link was already in place.
    pub async fn link(&self, collection: &str, config_name: &str) -> Result<bool> {
        validate_name("collection", collection)?;
        validate_name("config set", config_name)?;
        if !self.exists(config_name).await? {
            return Err(CloudError::UnknownConfigSet(config_name.to_string()));
        }

        let path = collection_path(collection);
        let mut props = match self.client.get_data(&path).await {
            Ok(data) => parse_props(&path, &data)?,
            Err(StoreError::NoSuchPath(_)) => Default::default(),
            Err(e) => return Err(e.into()),
        };

        let previous = props
            .insert(CONFIGNAME_PROP.to_string(), Value::String(config_name.to_string()));
        let was = previous.as_ref().and_then(Value::as_str);
        if was == Some(config_name) {
            debug!("Collection {} already linked to {}", collection, config_name);
            return Ok(false);
        }

        let data = serde_json::to_vec(&props).map_err(|e| CloudError::malformed(&path, e))?;
        self.client.put(&path, Bytes::from(data)).await?;
        info!(
            "Linked collection {} to config set {} (was {:?})",
            collection, config_name, was
        );
        Ok(true)
    }

    /// Config set the collection is linked to, if any
    pub async fn linked_config(&self, collection: &str) -> Result<Option<String>> {
        let path = collection_path(collection);
        let data = match self.client.get_data(&path).await {
            Ok(data) => data,
            Err(StoreError::NoSuchPath(_)) => {
                return Err(CloudError::UnknownCollection(collection.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(parse_props(&path, &data)?
            .get(CONFIGNAME_PROP)
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// Upload and link the config of every local core whose config set is
    /// not in the store yet. Re-running after success writes nothing.
    pub async fn bootstrap(
        &self,
        home: &Path,
        discovery: &dyn CoreDiscovery,
        options: &SyncOptions,
    ) -> Result<BootstrapReport> {
        self.client.check_chroot().await?;
        let cores = discovery.discover(home).await?;
        let mut report = BootstrapReport::default();

        for core in cores {
            let has_conf = tokio::fs::metadata(&core.config_dir)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);

            if !self.exists(&core.config_name).await? {
                if !has_conf {
                    warn!(
                        "Core {} has no config directory {:?}, skipping",
                        core.name, core.config_dir
                    );
                    report.skipped.push(core.name);
                    continue;
                }
                self.upload(&core.config_name, &core.config_dir, options).await?;
                report.uploaded.push(core.config_name.clone());
            }

            if self.link(&core.collection, &core.config_name).await? {
                report.linked.push(core.collection.clone());
            } else if !report.uploaded.contains(&core.config_name) {
                report.unchanged.push(core.name);
            }
        }

        info!(
            "Bootstrap from {:?}: {} uploaded, {} linked, {} unchanged, {} skipped",
            home,
            report.uploaded.len(),
            report.linked.len(),
            report.unchanged.len(),
            report.skipped.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{DirectoryCoreDiscovery, CORE_PROPERTIES};
    use coord::{ClientConfig, MemoryStore};

    async fn registry(store: &MemoryStore) -> (Arc<StoreClient>, ConfigSetRegistry) {
        let client = StoreClient::connect(Arc::new(store.connect()), &ClientConfig::default())
            .await
            .unwrap();
        let client = Arc::new(client);
        (client.clone(), ConfigSetRegistry::new(client))
    }

    fn conf_dir(root: &Path) {
        std::fs::create_dir_all(root).unwrap();
        std::fs::write(root.join("solrconfig.xml"), "<a/>").unwrap();
        std::fs::write(root.join("schema.xml"), "<b/>").unwrap();
    }

    #[tokio::test]
    async fn test_upload_link_download() {
        let store = MemoryStore::new();
        let (_client, registry) = registry(&store).await;
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        conf_dir(src.path());

        registry.upload("myconf", src.path(), &SyncOptions::default()).await.unwrap();
        assert!(registry.link("collection1", "myconf").await.unwrap());
        registry.download("myconf", dst.path(), &SyncOptions::default()).await.unwrap();

        assert_eq!(std::fs::read(dst.path().join("solrconfig.xml")).unwrap(), b"<a/>");
        assert_eq!(std::fs::read(dst.path().join("schema.xml")).unwrap(), b"<b/>");
        assert_eq!(
            registry.linked_config("collection1").await.unwrap().as_deref(),
            Some("myconf")
        );
        assert_eq!(registry.list().await.unwrap(), vec!["myconf"]);
    }

    #[tokio::test]
    async fn test_relink_keeps_old_config_and_props() {
        let store = MemoryStore::new();
        let (client, registry) = registry(&store).await;
        let src = tempfile::tempdir().unwrap();
        conf_dir(src.path());
        registry.upload("confA", src.path(), &SyncOptions::default()).await.unwrap();
        registry.upload("confB", src.path(), &SyncOptions::default()).await.unwrap();

        client
            .put("/collections/c", Bytes::from_static(br#"{"router":"compositeId"}"#))
            .await
            .unwrap();
        registry.link("c", "confA").await.unwrap();
        registry.link("c", "confB").await.unwrap();
        assert!(!registry.link("c", "confB").await.unwrap());

        assert_eq!(registry.linked_config("c").await.unwrap().as_deref(), Some("confB"));
        assert!(registry.exists("confA").await.unwrap());
        assert_eq!(client.list_children("/configs/confA").await.unwrap().len(), 2);

        let props = parse_props("/collections/c", &client.get_data("/collections/c").await.unwrap()).unwrap();
        assert_eq!(props["router"], "compositeId");
    }

    #[tokio::test]
    async fn test_link_and_download_unknown() {
        let store = MemoryStore::new();
        let (_client, registry) = registry(&store).await;
        let dst = tempfile::tempdir().unwrap();

        assert!(matches!(
            registry.link("c", "ghost").await,
            Err(CloudError::UnknownConfigSet(_))
        ));
        assert!(matches!(
            registry.download("ghost", dst.path(), &SyncOptions::default()).await,
            Err(CloudError::UnknownConfigSet(_))
        ));
        assert!(matches!(
            registry.linked_config("c").await,
            Err(CloudError::UnknownCollection(_))
        ));
        assert!(matches!(
            registry.link("c", "bad/name").await,
            Err(CloudError::InvalidArguments(_))
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let store = MemoryStore::new();
        let (client, registry) = registry(&store).await;
        let home = tempfile::tempdir().unwrap();
        let core = home.path().join("collection1");
        conf_dir(&core.join("conf"));
        std::fs::write(core.join(CORE_PROPERTIES), "").unwrap();
        let bare = home.path().join("bare");
        std::fs::create_dir_all(&bare).unwrap();
        std::fs::write(bare.join(CORE_PROPERTIES), "").unwrap();

        let first = registry
            .bootstrap(home.path(), &DirectoryCoreDiscovery, &SyncOptions::default())
            .await
            .unwrap();
        assert_eq!(first.uploaded, vec!["collection1"]);
        assert_eq!(first.linked, vec!["collection1"]);
        assert_eq!(first.skipped, vec!["bare"]);

        let revision = client.revision().await.unwrap();
        let second = registry
            .bootstrap(home.path(), &DirectoryCoreDiscovery, &SyncOptions::default())
            .await
            .unwrap();
        assert_eq!(second.writes(), 0);
        assert_eq!(second.unchanged, vec!["collection1"]);
        assert_eq!(client.revision().await.unwrap(), revision);
    }

    #[tokio::test]
    async fn test_missing_chroot_writes_nothing() {
        let store = MemoryStore::new();
        let (admin, _) = registry(&store).await;
        admin.make_path("/solr").await.unwrap();

        let config = ClientConfig::from_connect_string("localhost:9983/solr").unwrap();
        let client = StoreClient::connect(Arc::new(store.connect()), &config)
            .await
            .unwrap();
        let registry = ConfigSetRegistry::new(Arc::new(client));
        admin.delete("/solr", None).await.unwrap();

        let src = tempfile::tempdir().unwrap();
        conf_dir(src.path());
        let nodes = store.node_count();
        assert!(matches!(
            registry.upload("myconf", src.path(), &SyncOptions::default()).await,
            Err(CloudError::Store(StoreError::ChrootMissing(_)))
        ));
        assert!(matches!(
            registry
                .bootstrap(src.path(), &DirectoryCoreDiscovery, &SyncOptions::default())
                .await,
            Err(CloudError::Store(StoreError::ChrootMissing(_)))
        ));
        assert_eq!(store.node_count(), nodes);
    }
}
