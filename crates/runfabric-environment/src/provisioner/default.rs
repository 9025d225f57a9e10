// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! No-op provisioner for programs that run in the environment itself.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use runfabric_spi::{
    Cluster, ClusterStatus, OperationStatus, Provisioner, ProvisionerContext, ProvisionerFactory,
    ProvisionerSpec, Result,
};

/// Name the default provisioner registers under.
pub const DEFAULT_PROVISIONER_NAME: &str = "default";

/// Provisioner that allocates nothing.
///
/// The "cluster" is the environment itself: creation and deletion succeed
/// immediately and the cluster has no nodes.
pub struct DefaultProvisioner {
    spec: ProvisionerSpec,
}

impl Default for DefaultProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultProvisioner {
    /// Create the default provisioner.
    pub fn new() -> Self {
        Self {
            spec: ProvisionerSpec::new(
                DEFAULT_PROVISIONER_NAME,
                "Default",
                "Runs the program in the environment without provisioning a cluster.",
            ),
        }
    }
}

#[async_trait]
impl Provisioner for DefaultProvisioner {
    fn spec(&self) -> &ProvisionerSpec {
        &self.spec
    }

    fn validate_properties(&self, _properties: &HashMap<String, String>) -> Result<()> {
        Ok(())
    }

    async fn request_create(&self, context: &ProvisionerContext) -> Result<Cluster> {
        Ok(Cluster::new(
            context.cluster_name(),
            ClusterStatus::Running,
            Vec::new(),
        ))
    }

    async fn get_create_status(
        &self,
        _context: &ProvisionerContext,
        _cluster: &Cluster,
    ) -> Result<OperationStatus> {
        Ok(OperationStatus::Successful)
    }

    async fn request_delete(&self, _context: &ProvisionerContext, _cluster: &Cluster) -> Result<()> {
        Ok(())
    }

    async fn get_delete_status(
        &self,
        _context: &ProvisionerContext,
        _cluster: &Cluster,
    ) -> Result<OperationStatus> {
        Ok(OperationStatus::Successful)
    }
}

fn create_default(_config: &serde_json::Value) -> Result<Arc<dyn Provisioner>> {
    Ok(Arc::new(DefaultProvisioner::new()))
}

static DEFAULT_FACTORY: ProvisionerFactory = ProvisionerFactory {
    kind: "default",
    description: "No-op provisioner running programs inside the environment",
    create: create_default,
};

inventory::submit! { &DEFAULT_FACTORY }
