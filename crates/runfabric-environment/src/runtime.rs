// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for runfabric-environment.
//!
//! [`EnvironmentRuntime`] loads provisioners, runs the run-record corrector
//! in the background and, on unix, reloads provisioners on SIGHUP.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use runfabric_core::SqliteRunRecordStore;
//! use runfabric_environment::provisioner::ProvisionerExtensionLoader;
//! use runfabric_environment::provisioning::ProvisioningService;
//! use runfabric_environment::runtime::EnvironmentRuntime;
//! use runfabric_environment::runtime_observer::LiveRunRegistry;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SqliteRunRecordStore::from_path(".data/runfabric.db").await?);
//!     let loader = Arc::new(ProvisionerExtensionLoader::new([".data/provisioners"]));
//!
//!     let runtime = EnvironmentRuntime::builder()
//!         .store(store)
//!         .observer(Arc::new(LiveRunRegistry::new()))
//!         .provisioning(Arc::new(ProvisioningService::new(loader)))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... run program controllers ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use runfabric_core::RunRecordStore;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::provisioning::ProvisioningService;
use crate::run_record_corrector::{RunRecordCorrector, RunRecordCorrectorConfig};
use crate::runtime_observer::RuntimeObserver;

/// Builder for creating an [`EnvironmentRuntime`].
pub struct EnvironmentRuntimeBuilder {
    store: Option<Arc<dyn RunRecordStore>>,
    observer: Option<Arc<dyn RuntimeObserver>>,
    provisioning: Option<Arc<ProvisioningService>>,
    corrector_config: RunRecordCorrectorConfig,
    reload_on_sighup: bool,
}

impl Default for EnvironmentRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            observer: None,
            provisioning: None,
            corrector_config: RunRecordCorrectorConfig::default(),
            reload_on_sighup: true,
        }
    }
}

impl EnvironmentRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the run-record store (required).
    pub fn store(mut self, store: Arc<dyn RunRecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the runtime observer (required).
    pub fn observer(mut self, observer: Arc<dyn RuntimeObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Set the provisioning service (required).
    pub fn provisioning(mut self, provisioning: Arc<ProvisioningService>) -> Self {
        self.provisioning = Some(provisioning);
        self
    }

    /// Set the run-record corrector configuration.
    ///
    /// Default: [`RunRecordCorrectorConfig::default()`].
    pub fn corrector_config(mut self, config: RunRecordCorrectorConfig) -> Self {
        self.corrector_config = config;
        self
    }

    /// Reload provisioners when the process receives SIGHUP (unix only).
    ///
    /// Default: `true`
    pub fn reload_on_sighup(mut self, enabled: bool) -> Self {
        self.reload_on_sighup = enabled;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<EnvironmentRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let observer = self
            .observer
            .ok_or_else(|| anyhow::anyhow!("observer is required"))?;
        let provisioning = self
            .provisioning
            .ok_or_else(|| anyhow::anyhow!("provisioning is required"))?;
        if self.corrector_config.batch_size == 0 {
            anyhow::bail!("corrector batch size must be positive");
        }

        Ok(EnvironmentRuntimeConfig {
            store,
            observer,
            provisioning,
            corrector_config: self.corrector_config,
            reload_on_sighup: self.reload_on_sighup,
        })
    }
}

/// Configuration for an [`EnvironmentRuntime`].
pub struct EnvironmentRuntimeConfig {
    store: Arc<dyn RunRecordStore>,
    observer: Arc<dyn RuntimeObserver>,
    provisioning: Arc<ProvisioningService>,
    corrector_config: RunRecordCorrectorConfig,
    reload_on_sighup: bool,
}

impl EnvironmentRuntimeConfig {
    /// Start the runtime: load provisioners and spawn the background tasks.
    pub async fn start(self) -> Result<EnvironmentRuntime> {
        self.provisioning.start().await;

        let corrector = Arc::new(RunRecordCorrector::new(
            self.store.clone(),
            self.observer.clone(),
            self.corrector_config,
        ));
        let corrector_shutdown = corrector.shutdown_handle();
        let corrector_task = corrector.clone();
        let corrector_handle = tokio::spawn(async move {
            corrector_task.run().await;
        });

        let reload_shutdown = Arc::new(Notify::new());
        let reload_handle = if self.reload_on_sighup {
            Some(spawn_reload_listener(
                self.provisioning.clone(),
                reload_shutdown.clone(),
            )?)
        } else {
            None
        };

        info!(
            corrector_enabled = corrector.config().enabled,
            reload_on_sighup = reload_handle.is_some(),
            "EnvironmentRuntime started"
        );

        Ok(EnvironmentRuntime {
            corrector_handle,
            reload_handle,
            corrector_shutdown,
            reload_shutdown,
            corrector,
            provisioning: self.provisioning,
            store: self.store,
        })
    }
}

#[cfg(unix)]
fn spawn_reload_listener(
    provisioning: Arc<ProvisioningService>,
    shutdown: Arc<Notify>,
) -> Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.notified() => break,

                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    info!("SIGHUP received, reloading provisioners");
                    provisioning.reload().await;
                }
            }
        }
    }))
}

#[cfg(not(unix))]
fn spawn_reload_listener(
    _provisioning: Arc<ProvisioningService>,
    shutdown: Arc<Notify>,
) -> Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move { shutdown.notified().await }))
}

/// A running runfabric environment that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct EnvironmentRuntime {
    corrector_handle: JoinHandle<()>,
    reload_handle: Option<JoinHandle<()>>,
    corrector_shutdown: Arc<Notify>,
    reload_shutdown: Arc<Notify>,
    corrector: Arc<RunRecordCorrector>,
    provisioning: Arc<ProvisioningService>,
    store: Arc<dyn RunRecordStore>,
}

impl EnvironmentRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> EnvironmentRuntimeBuilder {
        EnvironmentRuntimeBuilder::new()
    }

    /// The run-record corrector, e.g. to trigger a pass on demand.
    pub fn corrector(&self) -> &Arc<RunRecordCorrector> {
        &self.corrector
    }

    /// The provisioning service.
    pub fn provisioning(&self) -> &Arc<ProvisioningService> {
        &self.provisioning
    }

    /// The run-record store.
    pub fn store(&self) -> &Arc<dyn RunRecordStore> {
        &self.store
    }

    /// Gracefully shut down the runtime.
    pub async fn shutdown(self) -> Result<()> {
        info!("EnvironmentRuntime shutting down...");

        self.corrector_shutdown.notify_one();
        self.reload_shutdown.notify_one();

        if let Err(e) = self.corrector_handle.await {
            error!("Run-record corrector task panicked: {}", e);
        }

        if let Some(handle) = self.reload_handle
            && let Err(e) = handle.await
        {
            error!("Provisioner reload listener panicked: {}", e);
        }

        info!("EnvironmentRuntime shutdown complete");
        Ok(())
    }
}
