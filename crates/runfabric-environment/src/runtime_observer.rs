// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime observer contract and in-process live run registry.
//!
//! The observer is the authority on which program runs are actually
//! executing. The corrector compares run records against it.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use runfabric_core::{ProgramId, ProgramRunId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;

/// A run the runtime currently executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveRun {
    /// The run.
    pub program_run_id: ProgramRunId,
    /// Runtime-specific handle (container id, application id, ...).
    pub handle: Option<String>,
    /// When the runtime started tracking the run.
    pub registered_at: DateTime<Utc>,
}

/// Live view of the runtime.
#[async_trait]
pub trait RuntimeObserver: Send + Sync {
    /// Live runs of `program`, keyed by run id.
    async fn list_live(&self, program: &ProgramId) -> Result<HashMap<String, LiveRun>>;
}

/// In-process registry of live runs, updated by program controllers.
#[derive(Default)]
pub struct LiveRunRegistry {
    runs: RwLock<HashMap<ProgramId, HashMap<String, LiveRun>>>,
}

impl LiveRunRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a run is executing.
    pub async fn register(&self, program_run_id: ProgramRunId, handle: Option<String>) {
        debug!(program_run = %program_run_id, "Run registered as live");
        let live = LiveRun {
            program_run_id: program_run_id.clone(),
            handle,
            registered_at: Utc::now(),
        };
        self.runs
            .write()
            .await
            .entry(program_run_id.program)
            .or_default()
            .insert(program_run_id.run, live);
    }

    /// Record that a run stopped executing. Returns whether it was live.
    pub async fn unregister(&self, program_run_id: &ProgramRunId) -> bool {
        let mut runs = self.runs.write().await;
        let Some(program_runs) = runs.get_mut(&program_run_id.program) else {
            return false;
        };
        let removed = program_runs.remove(&program_run_id.run).is_some();
        if program_runs.is_empty() {
            runs.remove(&program_run_id.program);
        }
        if removed {
            debug!(program_run = %program_run_id, "Run unregistered");
        }
        removed
    }

    /// Whether a run is live.
    pub async fn is_live(&self, program_run_id: &ProgramRunId) -> bool {
        self.runs
            .read()
            .await
            .get(&program_run_id.program)
            .is_some_and(|runs| runs.contains_key(&program_run_id.run))
    }

    /// Total number of live runs.
    pub async fn len(&self) -> usize {
        self.runs.read().await.values().map(HashMap::len).sum()
    }

    /// Whether no run is live.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl RuntimeObserver for LiveRunRegistry {
    async fn list_live(&self, program: &ProgramId) -> Result<HashMap<String, LiveRun>> {
        Ok(self
            .runs
            .read()
            .await
            .get(program)
            .cloned()
            .unwrap_or_default())
    }
}
