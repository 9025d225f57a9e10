// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runfabric Environment - Provisioning and Run-Record Reconciliation
//!
//! This crate is the control plane around program runs. It loads cluster
//! provisioners from extension descriptors, drives the cluster lifecycle of
//! individual runs, and periodically corrects run records that were left in a
//! non-terminal state by a crash.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                        Program controllers                           │
//! └──────────────────────────────────────────────────────────────────────┘
//!          │ lifecycle(name, ctx)                     │ register / unregister
//!          ▼                                          ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                runfabric-environment (This Crate)                    │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌──────────┐  │
//! │  │ Provisioning │  │   Cluster    │  │  Run-Record  │  │ Live Run │  │
//! │  │   Service    │─►│  Lifecycle   │  │  Corrector   │◄─│ Registry │  │
//! │  └──────────────┘  └──────────────┘  └──────────────┘  └──────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//!          │ load (startup, SIGHUP)       │             │ append_stop
//!          ▼                              ▼             ▼
//! ┌──────────────────┐      ┌──────────────────┐  ┌──────────────────────┐
//! │ Extension dirs   │      │  Provisioner     │  │  Run-record store    │
//! │ (*.json)         │      │  backends        │  │  (SQLite)            │
//! └──────────────────┘      └──────────────────┘  └──────────────────────┘
//! ```
//!
//! # Cluster State Machine
//!
//! ```text
//!   UNPROVISIONED ──► CREATING ──► CREATED ──► DELETING ──► DELETED
//!                        │                        │  ▲
//!                        ▼                        ▼  │
//!                  CREATE_FAILED             DELETE_FAILED
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `RUNFABRIC_DATABASE_URL` | No | - | SQLite URL of the run-record store |
//! | `DATA_DIR` | No | `.data` | Data directory; holds `runfabric.db` when no URL is set |
//! | `RUNFABRIC_PROVISIONER_EXTENSIONS_DIR` | No | `$DATA_DIR/provisioners` | Comma-separated extension directories |
//! | `RUNFABRIC_CORRECTOR_ENABLED` | No | `true` | Run the periodic corrector |
//! | `RUNFABRIC_CORRECTOR_INTERVAL_SECS` | No | `180` | Seconds between passes |
//! | `RUNFABRIC_CORRECTOR_INITIAL_DELAY_SECS` | No | `30` | Seconds before the first pass |
//! | `RUNFABRIC_CORRECTOR_BUFFER_SECS` | No | `120` | Minimum record age before correction |
//! | `RUNFABRIC_CORRECTOR_BATCH_SIZE` | No | `100` | Records per page and per write chunk |
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types for environment operations
//! - [`provisioner`]: Built-in provisioners and the extension loader
//! - [`provisioning`]: Provisioner snapshot and lookup
//! - [`cluster_lifecycle`]: Per-run cluster state machine
//! - [`runtime_observer`]: Live view of executing runs
//! - [`run_record_corrector`]: Background reconciliation of run records
//! - [`runtime`]: Embeddable runtime wiring everything together

#![deny(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;

/// Error types for environment operations.
pub mod error;

/// Built-in provisioners and provisioner extension loading.
pub mod provisioner;

/// Provisioning service holding the current provisioner snapshot.
pub mod provisioning;

/// Cluster lifecycle state machine for one program run.
pub mod cluster_lifecycle;

/// Runtime observer contract and live run registry.
pub mod runtime_observer;

/// Background worker correcting stale run records.
pub mod run_record_corrector;

/// Embeddable runtime for runfabric-environment.
pub mod runtime;

pub use cluster_lifecycle::{ClusterLifecycle, ClusterState, PollPolicy};
pub use config::Config;
pub use error::{Error, Result};
pub use provisioning::{ProvisionerInfo, ProvisioningService};
pub use run_record_corrector::{CorrectionReport, RunRecordCorrector, RunRecordCorrectorConfig};
pub use runtime::EnvironmentRuntime;
pub use runtime_observer::{LiveRun, LiveRunRegistry, RuntimeObserver};
