// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runfabric Core - Program Run Records
//!
//! This crate owns the durable side of program runs: identifiers, the run
//! status machine, and the run-record store that records every lifecycle
//! event a runtime reports.
//!
//! # Status Machine
//!
//! ```text
//!   STARTING ──► RUNNING ◄──► SUSPENDED
//!      │            │             │
//!      └────────────┴─────────────┴──► COMPLETED | FAILED | KILLED
//! ```
//!
//! Terminal statuses are final. Every event carries a [`SourceId`]; the store
//! rejects events older than the one it last recorded, so a late or replayed
//! event can never overwrite newer state.
//!
//! # Backends
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`SqliteRunRecordStore`] | Durable storage for a single environment |
//! | [`InMemoryRunRecordStore`] | Tests and embedded development |

#![deny(missing_docs)]

/// Error types.
pub mod error;

/// Run-record store contract and backends.
pub mod persistence;

/// Program run identifiers, statuses and records.
pub mod run;

pub use error::{CoreError, Result};
pub use persistence::{
    InMemoryRunRecordStore, RunCursor, RunPage, RunRecordStore, SqliteRunRecordStore, StartRun,
};
pub use run::{
    ProgramId, ProgramRunId, ProgramRunStatus, ProgramType, RunRecord, SourceId, WorkflowLinkage,
};
