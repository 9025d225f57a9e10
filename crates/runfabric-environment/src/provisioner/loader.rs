// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioner extension loading.
//!
//! An extension directory holds one JSON descriptor per provisioner instance:
//!
//! ```json
//! { "kind": "mock", "config": { "name": "mock-small", "create_polls": 2 } }
//! ```
//!
//! `kind` selects a factory from the static registration table and `config`
//! is handed to it unchanged. Each resulting provisioner is keyed by the name
//! in its own spec, so the loader never decides what a provisioner is called.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use runfabric_spi::Provisioner;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::default::{DEFAULT_PROVISIONER_NAME, DefaultProvisioner};

/// Source of the provisioner set published by the provisioning service.
#[async_trait]
pub trait ExtensionLoader: Send + Sync {
    /// Discover all provisioners, keyed by spec name.
    ///
    /// Problems with individual extensions are logged and skipped; a load
    /// always produces a (possibly empty) map.
    async fn load(&self) -> HashMap<String, Arc<dyn Provisioner>>;
}

/// One extension descriptor file.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtensionDescriptor {
    /// Factory kind.
    pub kind: String,
    /// Factory configuration.
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Loads provisioners from descriptor files in extension directories.
#[derive(Debug, Clone)]
pub struct ProvisionerExtensionLoader {
    dirs: Vec<PathBuf>,
    include_default: bool,
}

impl ProvisionerExtensionLoader {
    /// Create a loader over `dirs`, scanned in order.
    ///
    /// The built-in `default` provisioner is registered unless an extension
    /// already provides that name; see [`without_default`](Self::without_default).
    pub fn new(dirs: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            dirs: dirs.into_iter().map(Into::into).collect(),
            include_default: true,
        }
    }

    /// Do not register the built-in `default` provisioner.
    pub fn without_default(mut self) -> Self {
        self.include_default = false;
        self
    }

    /// Configured directories.
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    async fn descriptor_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") && entry.file_type().await?.is_file()
            {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    async fn instantiate(path: &Path) -> Result<Arc<dyn Provisioner>, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("unreadable: {}", e))?;
        let descriptor: ExtensionDescriptor =
            serde_json::from_str(&contents).map_err(|e| format!("malformed descriptor: {}", e))?;

        let factory = runfabric_spi::find_factory(&descriptor.kind)
            .ok_or_else(|| format!("unknown provisioner kind '{}'", descriptor.kind))?;

        (factory.create)(&descriptor.config).map_err(|e| e.to_string())
    }
}

#[async_trait]
impl ExtensionLoader for ProvisionerExtensionLoader {
    async fn load(&self) -> HashMap<String, Arc<dyn Provisioner>> {
        let mut provisioners: HashMap<String, Arc<dyn Provisioner>> = HashMap::new();

        for dir in &self.dirs {
            let files = match Self::descriptor_files(dir).await {
                Ok(files) => files,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Skipping provisioner extension directory");
                    continue;
                }
            };

            for path in files {
                let provisioner = match Self::instantiate(&path).await {
                    Ok(provisioner) => provisioner,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping provisioner extension");
                        continue;
                    }
                };

                let name = provisioner.spec().name.clone();
                if provisioners.contains_key(&name) {
                    warn!(
                        provisioner = %name,
                        path = %path.display(),
                        "Ignoring duplicate provisioner extension"
                    );
                    continue;
                }

                debug!(provisioner = %name, path = %path.display(), "Loaded provisioner extension");
                provisioners.insert(name, provisioner);
            }
        }

        if self.include_default && !provisioners.contains_key(DEFAULT_PROVISIONER_NAME) {
            provisioners.insert(
                DEFAULT_PROVISIONER_NAME.to_string(),
                Arc::new(DefaultProvisioner::new()),
            );
        }

        info!(count = provisioners.len(), "Provisioner extensions loaded");
        provisioners
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_directory_yields_default_only() {
        let loader = ProvisionerExtensionLoader::new(["/nonexistent/runfabric/provisioners"]);
        let provisioners = loader.load().await;
        assert_eq!(provisioners.len(), 1);
        assert!(provisioners.contains_key("default"));

        let provisioners = loader.clone().without_default().load().await;
        assert!(provisioners.is_empty());
    }
}
