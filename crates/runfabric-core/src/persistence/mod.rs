// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run-record store interface and backend implementations.
//!
//! The store is an append-event log per program run. Writers never overwrite
//! a record directly; they append a lifecycle event that the store accepts
//! only if it is a legal successor of the recorded status and carries a
//! version token at least as new as the recorded one.

pub mod memory;
pub mod sqlite;

pub use self::memory::InMemoryRunRecordStore;
pub use self::sqlite::SqliteRunRecordStore;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::run::{ProgramRunId, ProgramRunStatus, RunRecord, SourceId, WorkflowLinkage};

/// Start event for a new program run.
#[derive(Debug, Clone)]
pub struct StartRun {
    /// Run being started.
    pub program_run_id: ProgramRunId,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Parent workflow, for workflow nodes.
    pub workflow: Option<WorkflowLinkage>,
    /// Runtime arguments.
    pub properties: HashMap<String, String>,
    /// Version token of the start event.
    pub source_id: SourceId,
}

impl StartRun {
    /// Start event with no workflow linkage or properties.
    pub fn new(program_run_id: ProgramRunId, started_at: DateTime<Utc>, source_id: SourceId) -> Self {
        Self {
            program_run_id,
            started_at,
            workflow: None,
            properties: HashMap::new(),
            source_id,
        }
    }

    /// Mark the run as a node of a workflow run.
    pub fn in_workflow(mut self, workflow: WorkflowLinkage) -> Self {
        self.workflow = Some(workflow);
        self
    }
}

/// Position in a status scan: the key of the last record returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCursor(pub String);

impl RunCursor {
    /// Cursor positioned after the given record.
    pub fn after(record: &RunRecord) -> Self {
        Self(record.program_run_id.key())
    }

    /// The key this cursor points after.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of a status scan.
#[derive(Debug, Clone, Default)]
pub struct RunPage {
    /// Records ordered by key.
    pub records: Vec<RunRecord>,
    /// Cursor for the next page, or `None` when the scan is exhausted.
    pub next_cursor: Option<RunCursor>,
}

/// Read/write contract of the run-record store.
#[async_trait]
pub trait RunRecordStore: Send + Sync {
    /// Record the start of a program run.
    async fn append_start(&self, start: StartRun) -> Result<(), CoreError>;

    /// Record that a run is running (first time, or resumed from suspension).
    async fn append_running(
        &self,
        program_run_id: &ProgramRunId,
        running_at: DateTime<Utc>,
        source_id: SourceId,
    ) -> Result<(), CoreError>;

    /// Record that a running run was suspended.
    async fn append_suspend(
        &self,
        program_run_id: &ProgramRunId,
        suspended_at: DateTime<Utc>,
        source_id: SourceId,
    ) -> Result<(), CoreError>;

    /// Record that a run reached a terminal status.
    async fn append_stop(
        &self,
        program_run_id: &ProgramRunId,
        stopped_at: DateTime<Utc>,
        status: ProgramRunStatus,
        failure_cause: Option<&str>,
        source_id: SourceId,
    ) -> Result<(), CoreError>;

    /// Scan records in any of `statuses`, ordered by key, strictly after
    /// `cursor`, returning at most `limit` records.
    async fn query_by_status(
        &self,
        statuses: &[ProgramRunStatus],
        cursor: Option<&RunCursor>,
        limit: usize,
    ) -> Result<RunPage, CoreError>;

    /// Fetch one record.
    async fn get(&self, program_run_id: &ProgramRunId) -> Result<Option<RunRecord>, CoreError>;
}

/// Check that an event setting `target` with token `source_id` may be
/// appended to `record`.
pub(crate) fn check_append(
    record: &RunRecord,
    target: ProgramRunStatus,
    source_id: SourceId,
) -> Result<(), CoreError> {
    if !record.status.can_transition_to(target) {
        tracing::debug!(
            program_run = %record.program_run_id,
            from = %record.status,
            to = %target,
            "Rejected run-record event: illegal transition"
        );
        return Err(CoreError::InvalidTransition {
            program_run: record.program_run_id.key(),
            from: record.status,
            to: target,
        });
    }
    if source_id < record.source_id {
        tracing::debug!(
            program_run = %record.program_run_id,
            given = %source_id,
            current = %record.source_id,
            "Rejected run-record event: stale source"
        );
        return Err(CoreError::StaleVersion {
            program_run: record.program_run_id.key(),
            given: source_id,
            current: record.source_id,
        });
    }
    Ok(())
}

/// Next-page cursor for a page that returned `records` out of `limit`.
pub(crate) fn next_cursor(records: &[RunRecord], limit: usize) -> Option<RunCursor> {
    if limit > 0 && records.len() == limit {
        records.last().map(RunCursor::after)
    } else {
        None
    }
}
