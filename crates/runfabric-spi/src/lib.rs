// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runfabric SPI - Provisioner Capability Contract
//!
//! Every cluster backend implements [`Provisioner`]. The environment drives
//! the create/poll/delete cycle; implementations never block on the
//! infrastructure they talk to.
//!
//! # Operation Flow
//!
//! ```text
//!   request_create ──► get_create_status (poll) ──► SUCCESSFUL ──► program runs
//!                              │                                        │
//!                              ▼                                        ▼
//!                           FAILED                              request_delete
//!                                                                       │
//!                                                                       ▼
//!                                                   get_delete_status (poll)
//! ```
//!
//! Every method may be retried after a process restart, so every method must
//! be idempotent.
//!
//! # Registration
//!
//! Implementations register a [`ProvisionerFactory`] with `inventory`. The
//! environment instantiates factories named by extension descriptors and keys
//! each instance by its own [`ProvisionerSpec::name`].
//!
//! ```ignore
//! static MY_FACTORY: ProvisionerFactory = ProvisionerFactory {
//!     kind: "my-backend",
//!     description: "Clusters on my backend",
//!     create: |config| Ok(Arc::new(MyProvisioner::from_config(config)?)),
//! };
//! inventory::submit! { &MY_FACTORY }
//! ```

#![deny(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

/// Cluster and node value types.
pub mod cluster;

/// Context passed to provisioner operations.
pub mod context;

/// Error types.
pub mod error;

/// Provisioner metadata and property schema.
pub mod spec;

pub use cluster::{Cluster, ClusterStatus, Node, OperationStatus};
pub use context::{ProgramRunInfo, ProvisionerContext};
pub use error::{ProvisionerError, Result};
pub use spec::{PropertyType, ProvisionerProperty, ProvisionerSpec, Range};

/// Trait for cluster provisioners.
///
/// Splitting "request" from "poll status" keeps callers from blocking on
/// slow infrastructure: requests return as soon as the backend has accepted
/// them, and the caller polls at its own pace.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Specification of this provisioner. Pure.
    fn spec(&self) -> &ProvisionerSpec;

    /// Check that the supplied properties are valid.
    ///
    /// Fails with [`ProvisionerError::InvalidArgument`]. The default
    /// implementation validates against the declared property schema.
    fn validate_properties(&self, properties: &HashMap<String, String>) -> Result<()> {
        self.spec().validate_properties(properties)
    }

    /// Request creation of the cluster for the context's program run.
    ///
    /// The cluster does not have to be operational when this returns. Must be
    /// idempotent: if a cluster named [`ProvisionerContext::cluster_name`]
    /// already exists, return it instead of allocating another one.
    async fn request_create(&self, context: &ProvisionerContext) -> Result<Cluster>;

    /// Status of a previous create request. Side-effect free.
    async fn get_create_status(
        &self,
        context: &ProvisionerContext,
        cluster: &Cluster,
    ) -> Result<OperationStatus>;

    /// Request deletion of the cluster. Fire-and-forget; safe to repeat.
    async fn request_delete(&self, context: &ProvisionerContext, cluster: &Cluster) -> Result<()>;

    /// Status of a previous delete request. Side-effect free.
    async fn get_delete_status(
        &self,
        context: &ProvisionerContext,
        cluster: &Cluster,
    ) -> Result<OperationStatus>;
}

/// Constructor for a provisioner from its extension descriptor config.
pub type ProvisionerFactoryFn = fn(&serde_json::Value) -> Result<Arc<dyn Provisioner>>;

/// Entry of the static provisioner registration table.
pub struct ProvisionerFactory {
    /// Factory kind referenced by extension descriptors (e.g., "default").
    pub kind: &'static str,
    /// Short description of the backend.
    pub description: &'static str,
    /// Constructor.
    pub create: ProvisionerFactoryFn,
}

// Register ProvisionerFactory with inventory
inventory::collect!(&'static ProvisionerFactory);

/// All factories registered in this binary.
pub fn registered_factories() -> impl Iterator<Item = &'static ProvisionerFactory> {
    inventory::iter::<&'static ProvisionerFactory>
        .into_iter()
        .copied()
}

/// Find a registered factory by kind.
pub fn find_factory(kind: &str) -> Option<&'static ProvisionerFactory> {
    registered_factories().find(|f| f.kind == kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticProvisioner {
        spec: ProvisionerSpec,
    }

    #[async_trait]
    impl Provisioner for StaticProvisioner {
        fn spec(&self) -> &ProvisionerSpec {
            &self.spec
        }

        async fn request_create(&self, context: &ProvisionerContext) -> Result<Cluster> {
            Ok(Cluster::new(
                context.cluster_name(),
                ClusterStatus::Running,
                vec![],
            ))
        }

        async fn get_create_status(
            &self,
            _context: &ProvisionerContext,
            _cluster: &Cluster,
        ) -> Result<OperationStatus> {
            Ok(OperationStatus::Successful)
        }

        async fn request_delete(
            &self,
            _context: &ProvisionerContext,
            _cluster: &Cluster,
        ) -> Result<()> {
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

    static STATIC_FACTORY: ProvisionerFactory = ProvisionerFactory {
        kind: "spi-test-static",
        description: "Static provisioner used by SPI tests",
        create: |_config| {
            Ok(Arc::new(StaticProvisioner {
                spec: ProvisionerSpec::new("static", "Static", "Test provisioner"),
            }))
        },
    };

    inventory::submit! { &STATIC_FACTORY }

    #[test]
    fn test_find_registered_factory() {
        let factory = find_factory("spi-test-static").expect("factory registered");
        let provisioner = (factory.create)(&serde_json::Value::Null).unwrap();
        assert_eq!(provisioner.spec().name, "static");
        assert!(find_factory("missing").is_none());
    }

    #[tokio::test]
    async fn test_default_validation_uses_spec() {
        let provisioner = StaticProvisioner {
            spec: ProvisionerSpec::new("static", "Static", "").with_property(
                ProvisionerProperty::new("zone", "Zone", "", PropertyType::String).required(),
            ),
        };
        assert!(provisioner.validate_properties(&HashMap::new()).is_err());

        let context = ProvisionerContext::new(
            ProgramRunInfo::new("default", "app", "svc", "run-1"),
            HashMap::new(),
        );
        let cluster = provisioner.request_create(&context).await.unwrap();
        assert_eq!(cluster.name, "run-1");
    }
}
