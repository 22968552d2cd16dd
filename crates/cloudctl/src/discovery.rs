//! Local core discovery for bootstrap
//!
//! A core is a directory below the home directory that carries a
//! `core.properties` file. Its config files live in `<core>/conf`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{CloudError, Result};

pub const CORE_PROPERTIES: &str = "core.properties";
pub const CONF_DIR: &str = "conf";

/// A locally defined core and where its configuration comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreDescriptor {
    pub name: String,
    pub instance_dir: PathBuf,
    pub collection: String,
    /// Config set the collection should be linked to
    pub config_name: String,
    pub config_dir: PathBuf,
    pub shard: Option<String>,
}

/// Source of locally known cores
#[async_trait]
pub trait CoreDiscovery: Send + Sync {
    async fn discover(&self, home: &Path) -> Result<Vec<CoreDescriptor>>;
}

/// Scans the immediate sub-directories of the home directory
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryCoreDiscovery;

#[async_trait]
impl CoreDiscovery for DirectoryCoreDiscovery {
    async fn discover(&self, home: &Path) -> Result<Vec<CoreDescriptor>> {
        let mut read_dir = fs::read_dir(home)
            .await
            .map_err(|e| CloudError::sync_failed(home, e))?;

        let mut cores = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| CloudError::sync_failed(home, e))?
        {
            let instance_dir = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| CloudError::sync_failed(&instance_dir, e))?;
            if !file_type.is_dir() {
                continue;
            }
            let props_file = instance_dir.join(CORE_PROPERTIES);
            let text = match fs::read_to_string(&props_file).await {
                Ok(text) => text,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(CloudError::sync_failed(&props_file, e)),
            };

            let Some(dir_name) = entry.file_name().to_str().map(str::to_string) else {
                warn!("Skipping core directory with non UTF-8 name {:?}", instance_dir);
                continue;
            };
            let core = descriptor(&dir_name, instance_dir, &parse_properties(&text));
            debug!("Discovered core {} (collection {})", core.name, core.collection);
            cores.push(core);
        }

        cores.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(cores)
    }
}

fn descriptor(
    dir_name: &str,
    instance_dir: PathBuf,
    props: &HashMap<String, String>,
) -> CoreDescriptor {
    let name = props.get("name").cloned().unwrap_or_else(|| dir_name.to_string());
    let collection = props.get("collection").cloned().unwrap_or_else(|| name.clone());
    let config_name = props
        .get("configName")
        .cloned()
        .unwrap_or_else(|| collection.clone());

    CoreDescriptor {
        name,
        config_dir: instance_dir.join(CONF_DIR),
        instance_dir,
        collection,
        config_name,
        shard: props.get("shard").cloned(),
    }
}

/// `key=value` / `key: value` lines; `#` and `!` start comments
pub fn parse_properties(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .filter_map(|line| {
            let split = line.find(|c| c == '=' || c == ':')?;
            let key = line[..split].trim();
            let value = line[split + 1..].trim();
            (!key.is_empty()).then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_properties() {
        let props = parse_properties("# comment\nname=core1\ncollection : books\n! other\n\nbroken\n");
        assert_eq!(props.len(), 2);
        assert_eq!(props["name"], "core1");
        assert_eq!(props["collection"], "books");
    }

    #[tokio::test]
    async fn test_discover_cores() {
        let home = tempfile::tempdir().unwrap();
        let a = home.path().join("collection1");
        std::fs::create_dir_all(a.join("conf")).unwrap();
        std::fs::write(a.join(CORE_PROPERTIES), "").unwrap();

        let b = home.path().join("books_shard1");
        std::fs::create_dir_all(&b).unwrap();
        std::fs::write(
            b.join(CORE_PROPERTIES),
            "collection=books\nconfigName=shared\nshard=shard1\n",
        )
        .unwrap();

        std::fs::create_dir_all(home.path().join("not_a_core")).unwrap();
        std::fs::write(home.path().join("solr.xml"), "<solr/>").unwrap();

        let cores = DirectoryCoreDiscovery.discover(home.path()).await.unwrap();
        assert_eq!(cores.len(), 2);

        assert_eq!(cores[0].name, "books_shard1");
        assert_eq!(cores[0].collection, "books");
        assert_eq!(cores[0].config_name, "shared");
        assert_eq!(cores[0].shard.as_deref(), Some("shard1"));

        assert_eq!(cores[1].collection, "collection1");
        assert_eq!(cores[1].config_name, "collection1");
        assert_eq!(cores[1].config_dir, a.join("conf"));
    }

    #[tokio::test]
    async fn test_missing_home() {
        let home = tempfile::tempdir().unwrap();
        let missing = home.path().join("nope");
        assert!(matches!(
            DirectoryCoreDiscovery.discover(&missing).await,
            Err(CloudError::SyncFailed { .. })
        ));
    }
}
