// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster and node value types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a provisioned cluster as reported by its provisioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    /// Resources are being allocated.
    Creating,
    /// The cluster is ready to run programs.
    Running,
    /// Resources are being released.
    Deleting,
    /// The cluster does not exist (never created, or fully deleted).
    NotExists,
    /// The cluster exists but is no longer tracked by any program run.
    Orphaned,
}

/// Outcome of an asynchronous create or delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Still running; poll again later.
    InProgress,
    /// Completed successfully.
    Successful,
    /// Completed with failure.
    Failed,
}

impl OperationStatus {
    /// Whether the operation has finished, successfully or not.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::InProgress)
    }
}

/// One machine of a cluster.
///
/// Equality is structural over id, creation time and properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Backend-assigned node identifier.
    pub id: String,
    /// When the node was created.
    pub created_at: DateTime<Utc>,
    /// Backend-specific node properties (address, machine type, ...).
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl Node {
    /// Create a node.
    pub fn new(
        id: impl Into<String>,
        created_at: DateTime<Utc>,
        properties: HashMap<String, String>,
    ) -> Self {
        Self {
            id: id.into(),
            created_at,
            properties,
        }
    }
}

/// Compute cluster backing one program run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Cluster identifier, derived from the program run identifier.
    pub name: String,
    /// Last status reported by the provisioner.
    pub status: ClusterStatus,
    /// Nodes in creation order.
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Backend-specific cluster properties.
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl Cluster {
    /// Create a cluster with no properties.
    pub fn new(name: impl Into<String>, status: ClusterStatus, nodes: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            status,
            nodes,
            properties: HashMap::new(),
        }
    }

    /// Return a copy with a different status.
    pub fn with_status(&self, status: ClusterStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_equality_is_structural() {
        let now = Utc::now();
        let props: HashMap<String, String> = [("ip".to_string(), "10.0.0.1".to_string())].into();

        let a = Node::new("node-1", now, props.clone());
        let b = Node::new("node-1", now, props.clone());
        let c = Node::new("node-1", now + chrono::Duration::seconds(1), props);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_operation_status_terminal() {
        assert!(!OperationStatus::InProgress.is_terminal());
        assert!(OperationStatus::Successful.is_terminal());
        assert!(OperationStatus::Failed.is_terminal());
    }

    #[test]
    fn test_cluster_with_status_keeps_identity() {
        let cluster = Cluster::new("run-1", ClusterStatus::Creating, vec![]);
        let running = cluster.with_status(ClusterStatus::Running);
        assert_eq!(running.name, "run-1");
        assert_eq!(running.status, ClusterStatus::Running);
    }
}
