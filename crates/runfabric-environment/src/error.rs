// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for runfabric-environment.

use runfabric_spi::ProvisionerError;
use thiserror::Error;

use crate::cluster_lifecycle::ClusterState;

/// Environment errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Run-record store operation failed.
    #[error("Core error: {0}")]
    Core(#[from] runfabric_core::CoreError),

    /// Provisioner backend call failed for a reason other than validation or
    /// a reported operation failure.
    #[error("Provisioner error: {0}")]
    Provisioner(ProvisionerError),

    /// No provisioner is registered under the name.
    #[error("Provisioner not found: {0}")]
    ProvisionerNotFound(String),

    /// Provisioner properties failed validation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A provisioner reported a create or delete operation as failed.
    #[error("Operation failed: {0}")]
    OperationFailed(String),

    /// The cluster lifecycle does not allow the requested step.
    #[error("Cluster '{cluster}' cannot {operation} in state {state}")]
    InvalidTransition {
        /// Cluster name.
        cluster: String,
        /// Attempted operation.
        operation: &'static str,
        /// Current lifecycle state.
        state: ClusterState,
    },

    /// A reconciliation pass is already running.
    #[error("Run-record reconciliation already in progress")]
    ReconciliationInProgress,

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl From<ProvisionerError> for Error {
    fn from(err: ProvisionerError) -> Self {
        match err {
            ProvisionerError::InvalidArgument(msg) => Error::InvalidArgument(msg),
            ProvisionerError::OperationFailed(msg) => Error::OperationFailed(msg),
            other => Error::Provisioner(other),
        }
    }
}

/// Result type using Environment Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisioner_errors_keep_their_category() {
        let err: Error = ProvisionerError::InvalidArgument("workerCount".to_string()).into();
        assert!(matches!(err, Error::InvalidArgument(ref m) if m == "workerCount"));

        let err: Error = ProvisionerError::OperationFailed("quota".to_string()).into();
        assert!(matches!(err, Error::OperationFailed(_)));

        let err: Error = ProvisionerError::Config("bad".to_string()).into();
        assert!(matches!(err, Error::Provisioner(ProvisionerError::Config(_))));
    }
}
