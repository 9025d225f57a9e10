// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runfabric Environment daemon
//!
//! Loads provisioner extensions, serves them to program controllers, and
//! keeps the run-record store consistent with the runtime.

use std::sync::Arc;
use tracing::{info, warn};

use runfabric_core::SqliteRunRecordStore;
use runfabric_environment::config::Config;
use runfabric_environment::provisioner::ProvisionerExtensionLoader;
use runfabric_environment::provisioning::ProvisioningService;
use runfabric_environment::runtime::EnvironmentRuntime;
use runfabric_environment::runtime_observer::LiveRunRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "runfabric_environment=info,runfabric_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        data_dir = %config.data_dir.display(),
        extension_dirs = ?config.extension_dirs,
        corrector_enabled = config.corrector.enabled,
        "Starting Runfabric Environment"
    );

    let store = match &config.database_url {
        Some(url) => SqliteRunRecordStore::connect(url).await?,
        None => SqliteRunRecordStore::from_path(config.database_path()).await?,
    };
    info!("Run-record store ready");

    let loader = Arc::new(ProvisionerExtensionLoader::new(config.extension_dirs.clone()));
    let provisioning = Arc::new(ProvisioningService::new(loader));

    // Program controllers embedded in this process register their runs here.
    let live_runs = Arc::new(LiveRunRegistry::new());

    let runtime = EnvironmentRuntime::builder()
        .store(Arc::new(store))
        .observer(live_runs)
        .provisioning(provisioning)
        .corrector_config(config.corrector.clone())
        .build()?
        .start()
        .await?;

    let specs = runtime.provisioning().get_provisioner_specs();
    info!(
        provisioners = ?specs.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
        "Environment ready"
    );

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Runfabric Environment shut down");

    Ok(())
}
