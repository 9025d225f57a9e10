// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for runfabric-core.

use thiserror::Error;

use crate::run::{ProgramRunStatus, SourceId};

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors returned by the run-record store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// No record exists for the program run.
    #[error("Program run '{program_run}' not found")]
    RunNotFound {
        /// The program run key.
        program_run: String,
    },

    /// A start event was appended twice for the same program run.
    #[error("Program run '{program_run}' already exists")]
    RunAlreadyExists {
        /// The program run key.
        program_run: String,
    },

    /// The appended event is not a legal successor of the current status.
    #[error("Program run '{program_run}' cannot transition from {from} to {to}")]
    InvalidTransition {
        /// The program run key.
        program_run: String,
        /// Current status of the record.
        from: ProgramRunStatus,
        /// Status the event tried to set.
        to: ProgramRunStatus,
    },

    /// The event carries an older version token than the record.
    #[error(
        "Program run '{program_run}' has newer state: event source {given} is older than recorded source {current}"
    )]
    StaleVersion {
        /// The program run key.
        program_run: String,
        /// Token carried by the rejected event.
        given: SourceId,
        /// Token currently recorded.
        current: SourceId,
    },

    /// Database operation failed.
    #[error("Database error during '{operation}': {details}")]
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::RunNotFound { .. } => "RUN_NOT_FOUND",
            Self::RunAlreadyExists { .. } => "RUN_ALREADY_EXISTS",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::StaleVersion { .. } => "STALE_VERSION",
            Self::Database { .. } => "DATABASE_ERROR",
        }
    }

    /// Whether the error means a concurrent writer got there first.
    ///
    /// Such errors resolve themselves: the next read observes the newer state.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. } | Self::StaleVersion { .. }
        )
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Database {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}
