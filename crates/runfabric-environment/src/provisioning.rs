// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioning service.
//!
//! Holds the current set of provisioners as one immutable
//! [`ProvisionerInfo`] snapshot. A reload builds a complete new snapshot and
//! publishes it in a single atomic pointer swap, so a reader sees either the
//! old generation or the new one, never a mix. Reads take no lock.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use runfabric_spi::{Provisioner, ProvisionerContext, ProvisionerSpec};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

use crate::cluster_lifecycle::ClusterLifecycle;
use crate::error::{Error, Result};
use crate::provisioner::ExtensionLoader;

/// One generation of loaded provisioners and their specs.
pub struct ProvisionerInfo {
    generation: u64,
    provisioners: HashMap<String, Arc<dyn Provisioner>>,
    specs: HashMap<String, ProvisionerSpec>,
}

impl ProvisionerInfo {
    fn empty() -> Self {
        Self {
            generation: 0,
            provisioners: HashMap::new(),
            specs: HashMap::new(),
        }
    }

    /// Monotonic generation number; 0 before the first load.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Provisioner registered under `name`.
    pub fn provisioner(&self, name: &str) -> Option<&Arc<dyn Provisioner>> {
        self.provisioners.get(name)
    }

    /// Spec of the provisioner registered under `name`.
    pub fn spec(&self, name: &str) -> Option<&ProvisionerSpec> {
        self.specs.get(name)
    }

    /// All specs, ordered by name.
    pub fn specs(&self) -> Vec<&ProvisionerSpec> {
        let mut specs: Vec<_> = self.specs.values().collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Number of provisioners.
    pub fn len(&self) -> usize {
        self.provisioners.len()
    }

    /// Whether no provisioner is loaded.
    pub fn is_empty(&self) -> bool {
        self.provisioners.is_empty()
    }
}

/// Service for provisioning related operations.
pub struct ProvisioningService {
    loader: Arc<dyn ExtensionLoader>,
    current: ArcSwap<ProvisionerInfo>,
    published: watch::Sender<Arc<ProvisionerInfo>>,
    reload_lock: Mutex<()>,
}

impl ProvisioningService {
    /// Create a service with an empty snapshot. Call [`start`](Self::start)
    /// or [`reload`](Self::reload) to load provisioners.
    pub fn new(loader: Arc<dyn ExtensionLoader>) -> Self {
        let empty = Arc::new(ProvisionerInfo::empty());
        let (published, _) = watch::channel(empty.clone());
        Self {
            loader,
            current: ArcSwap::new(empty),
            published,
            reload_lock: Mutex::new(()),
        }
    }

    /// Perform the initial load.
    pub async fn start(&self) -> Arc<ProvisionerInfo> {
        let info = self.reload().await;
        info!(
            provisioners = info.len(),
            generation = info.generation(),
            "Provisioning service started"
        );
        info
    }

    /// Reload provisioners from the extension loader and publish them as a
    /// new generation. Added provisioners become visible and removed ones
    /// disappear in the same step.
    pub async fn reload(&self) -> Arc<ProvisionerInfo> {
        // One reload at a time; readers are never blocked by it.
        let _guard = self.reload_lock.lock().await;

        let provisioners = self.loader.load().await;
        let mut specs = HashMap::with_capacity(provisioners.len());
        for (name, provisioner) in &provisioners {
            debug!(provisioner = %name, "Registering provisioner");
            specs.insert(name.clone(), provisioner.spec().clone());
        }

        let generation = self.current.load().generation + 1;
        let info = Arc::new(ProvisionerInfo {
            generation,
            provisioners,
            specs,
        });
        self.current.store(info.clone());
        self.published.send_replace(info.clone());

        info!(
            generation,
            provisioners = info.len(),
            "Provisioners reloaded"
        );
        info
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<ProvisionerInfo> {
        self.current.load_full()
    }

    /// Watch published snapshots.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ProvisionerInfo>> {
        self.published.subscribe()
    }

    /// Specs of all current provisioners, ordered by name.
    pub fn get_provisioner_specs(&self) -> Vec<ProvisionerSpec> {
        self.snapshot().specs().into_iter().cloned().collect()
    }

    /// Spec of the provisioner named `name`, if it exists.
    pub fn get_provisioner_spec(&self, name: &str) -> Option<ProvisionerSpec> {
        self.snapshot().spec(name).cloned()
    }

    /// Resolve the provisioner named `name`.
    pub fn provisioner(&self, name: &str) -> Result<Arc<dyn Provisioner>> {
        self.snapshot()
            .provisioner(name)
            .cloned()
            .ok_or_else(|| Error::ProvisionerNotFound(name.to_string()))
    }

    /// Validate `properties` for the provisioner named `name`.
    ///
    /// Fails with [`Error::ProvisionerNotFound`] for an unknown name and
    /// [`Error::InvalidArgument`] when validation fails.
    pub fn validate_properties(
        &self,
        name: &str,
        properties: &HashMap<String, String>,
    ) -> Result<()> {
        let provisioner = self.provisioner(name)?;
        provisioner.validate_properties(properties)?;
        Ok(())
    }

    /// Lifecycle driver for one run, bound to the provisioner named `name`
    /// as currently loaded.
    pub fn lifecycle(&self, name: &str, context: ProvisionerContext) -> Result<ClusterLifecycle> {
        Ok(ClusterLifecycle::new(self.provisioner(name)?, context))
    }
}
