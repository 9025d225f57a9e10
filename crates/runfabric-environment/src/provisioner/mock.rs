// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock provisioner for testing.
//!
//! Simulates a cluster backend in memory. Creation and deletion take a
//! configurable number of status polls to finish and can be made to fail,
//! which lets the lifecycle driver be exercised without real infrastructure.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use runfabric_spi::{
    Cluster, ClusterStatus, Node, OperationStatus, PropertyType, Provisioner, ProvisionerContext,
    ProvisionerError, ProvisionerFactory, ProvisionerProperty, ProvisionerSpec, Range, Result,
};
use serde::Deserialize;
use tokio::sync::Mutex;

/// Settings of a mock provisioner, as read from an extension descriptor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MockProvisionerConfig {
    /// Name to register under.
    pub name: String,
    /// Status polls before a create request finishes.
    pub create_polls: u32,
    /// Status polls before a delete request finishes.
    pub delete_polls: u32,
    /// Create requests finish as FAILED.
    pub fail_create: bool,
    /// Number of delete attempts that finish as FAILED before one succeeds.
    pub failing_delete_attempts: u32,
    /// Simulated latency of every request, in milliseconds.
    pub request_delay_ms: u64,
}

impl Default for MockProvisionerConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            create_polls: 1,
            delete_polls: 1,
            fail_create: false,
            failing_delete_attempts: 0,
            request_delay_ms: 0,
        }
    }
}

#[derive(Debug)]
struct MockCluster {
    cluster: Cluster,
    create_polls_left: u32,
    delete: Option<DeleteAttempt>,
    delete_attempts: u32,
}

#[derive(Debug, Clone, Copy)]
struct DeleteAttempt {
    polls_left: u32,
    fails: bool,
}

/// Mock provisioner for testing.
pub struct MockProvisioner {
    spec: ProvisionerSpec,
    config: MockProvisionerConfig,
    clusters: Mutex<HashMap<String, MockCluster>>,
    allocations: AtomicUsize,
}

impl Default for MockProvisioner {
    fn default() -> Self {
        Self::new(MockProvisionerConfig::default())
    }
}

impl MockProvisioner {
    /// Create a mock provisioner.
    pub fn new(config: MockProvisionerConfig) -> Self {
        let spec = ProvisionerSpec::new(
            config.name.clone(),
            "Mock",
            "Simulated cluster backend for testing.",
        )
        .with_property(
            ProvisionerProperty::new(
                "workerCount",
                "Worker count",
                "Number of worker nodes",
                PropertyType::Integer,
            )
            .required()
            .with_range(Range::with_bounds(1.0, 64.0, true, true)),
        )
        .with_property(
            ProvisionerProperty::new(
                "machineType",
                "Machine type",
                "Size of every node",
                PropertyType::String,
            )
            .with_values(["small", "medium", "large"]),
        )
        .with_property(ProvisionerProperty::new(
            "preemptible",
            "Preemptible",
            "Use preemptible machines",
            PropertyType::Boolean,
        ));

        Self {
            spec,
            config,
            clusters: Mutex::new(HashMap::new()),
            allocations: AtomicUsize::new(0),
        }
    }

    /// Create a mock provisioner whose create requests fail.
    pub fn failing_create() -> Self {
        Self::new(MockProvisionerConfig {
            fail_create: true,
            ..Default::default()
        })
    }

    /// Number of clusters actually allocated.
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    /// Current view of a cluster, if it was ever created.
    pub async fn cluster(&self, name: &str) -> Option<Cluster> {
        self.clusters
            .lock()
            .await
            .get(name)
            .map(|c| c.cluster.clone())
    }

    /// Number of delete attempts issued for a cluster.
    pub async fn delete_attempts(&self, name: &str) -> u32 {
        self.clusters
            .lock()
            .await
            .get(name)
            .map(|c| c.delete_attempts)
            .unwrap_or(0)
    }

    async fn simulate_latency(&self) {
        if self.config.request_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.request_delay_ms)).await;
        }
    }

    fn allocate(&self, context: &ProvisionerContext) -> Cluster {
        self.allocations.fetch_add(1, Ordering::SeqCst);

        let workers: usize = context
            .properties
            .get("workerCount")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);
        let machine_type = context
            .properties
            .get("machineType")
            .cloned()
            .unwrap_or_else(|| "small".to_string());

        let nodes = (0..workers)
            .map(|_| {
                Node::new(
                    uuid::Uuid::new_v4().to_string(),
                    Utc::now(),
                    HashMap::from([("machineType".to_string(), machine_type.clone())]),
                )
            })
            .collect();

        let mut cluster = Cluster::new(context.cluster_name(), ClusterStatus::Creating, nodes);
        cluster
            .properties
            .insert("program".to_string(), context.program_run.to_string());
        cluster
    }
}

#[async_trait]
impl Provisioner for MockProvisioner {
    fn spec(&self) -> &ProvisionerSpec {
        &self.spec
    }

    async fn request_create(&self, context: &ProvisionerContext) -> Result<Cluster> {
        self.simulate_latency().await;

        let name = context.cluster_name();
        let mut clusters = self.clusters.lock().await;
        if let Some(existing) = clusters.get(&name) {
            return Ok(existing.cluster.clone());
        }

        let cluster = self.allocate(context);
        clusters.insert(
            name,
            MockCluster {
                cluster: cluster.clone(),
                create_polls_left: self.config.create_polls,
                delete: None,
                delete_attempts: 0,
            },
        );
        Ok(cluster)
    }

    async fn get_create_status(
        &self,
        _context: &ProvisionerContext,
        cluster: &Cluster,
    ) -> Result<OperationStatus> {
        let mut clusters = self.clusters.lock().await;
        let entry = clusters.get_mut(&cluster.name).ok_or_else(|| {
            ProvisionerError::OperationFailed(format!("Cluster '{}' does not exist", cluster.name))
        })?;

        if entry.create_polls_left > 0 {
            entry.create_polls_left -= 1;
        }
        if entry.create_polls_left > 0 {
            return Ok(OperationStatus::InProgress);
        }

        if self.config.fail_create {
            entry.cluster.status = ClusterStatus::Orphaned;
            Ok(OperationStatus::Failed)
        } else {
            if entry.cluster.status == ClusterStatus::Creating {
                entry.cluster.status = ClusterStatus::Running;
            }
            Ok(OperationStatus::Successful)
        }
    }

    async fn request_delete(&self, _context: &ProvisionerContext, cluster: &Cluster) -> Result<()> {
        self.simulate_latency().await;

        let mut clusters = self.clusters.lock().await;
        let Some(entry) = clusters.get_mut(&cluster.name) else {
            return Ok(());
        };

        // A delete already in flight is left alone.
        if entry.delete.is_some_and(|d| d.polls_left > 0) {
            return Ok(());
        }
        if entry.cluster.status == ClusterStatus::NotExists {
            return Ok(());
        }

        entry.delete_attempts += 1;
        entry.delete = Some(DeleteAttempt {
            polls_left: self.config.delete_polls.max(1),
            fails: entry.delete_attempts <= self.config.failing_delete_attempts,
        });
        entry.cluster.status = ClusterStatus::Deleting;
        Ok(())
    }

    async fn get_delete_status(
        &self,
        _context: &ProvisionerContext,
        cluster: &Cluster,
    ) -> Result<OperationStatus> {
        let mut clusters = self.clusters.lock().await;
        let Some(entry) = clusters.get_mut(&cluster.name) else {
            return Ok(OperationStatus::Successful);
        };
        if entry.cluster.status == ClusterStatus::NotExists {
            return Ok(OperationStatus::Successful);
        }

        let Some(attempt) = entry.delete.as_mut() else {
            return Err(ProvisionerError::OperationFailed(format!(
                "Delete was never requested for cluster '{}'",
                cluster.name
            )));
        };

        if attempt.polls_left > 0 {
            attempt.polls_left -= 1;
        }
        if attempt.polls_left > 0 {
            return Ok(OperationStatus::InProgress);
        }

        if attempt.fails {
            entry.cluster.status = ClusterStatus::Orphaned;
            Ok(OperationStatus::Failed)
        } else {
            entry.cluster.status = ClusterStatus::NotExists;
            Ok(OperationStatus::Successful)
        }
    }
}

fn create_mock(config: &serde_json::Value) -> Result<Arc<dyn Provisioner>> {
    let config: MockProvisionerConfig = if config.is_null() {
        MockProvisionerConfig::default()
    } else {
        serde_json::from_value(config.clone())?
    };
    Ok(Arc::new(MockProvisioner::new(config)))
}

static MOCK_FACTORY: ProvisionerFactory = ProvisionerFactory {
    kind: "mock",
    description: "In-memory simulated cluster backend",
    create: create_mock,
};

inventory::submit! { &MOCK_FACTORY }
