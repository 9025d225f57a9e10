// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for provisioner implementations.

use thiserror::Error;

/// Errors raised by a [`Provisioner`](crate::Provisioner).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProvisionerError {
    /// Provisioner properties failed validation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The backend could not carry out a create/delete/status request.
    #[error("Operation failed: {0}")]
    OperationFailed(String),

    /// An extension descriptor could not configure the provisioner.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for ProvisionerError {
    fn from(err: serde_json::Error) -> Self {
        ProvisionerError::Config(err.to_string())
    }
}

/// Result type for provisioner operations.
pub type Result<T> = std::result::Result<T, ProvisionerError>;
