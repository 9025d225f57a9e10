// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for runfabric-environment tests.
//!
//! Provides a write-counting run-record store, an observer that can be made
//! to fail per program, and helpers for seeding run records.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use runfabric_core::{
    CoreError, InMemoryRunRecordStore, ProgramId, ProgramRunId, ProgramRunStatus, ProgramType,
    RunCursor, RunPage, RunRecord, RunRecordStore, SourceId, StartRun, WorkflowLinkage,
};
use runfabric_environment::error::{Error, Result};
use runfabric_environment::run_record_corrector::RunRecordCorrectorConfig;
use runfabric_environment::runtime_observer::{LiveRun, LiveRunRegistry, RuntimeObserver};
use tokio::sync::RwLock;

pub const NAMESPACE: &str = "default";
pub const APPLICATION: &str = "app";

/// Run-record store that counts stop events.
#[derive(Default)]
pub struct CountingStore {
    inner: InMemoryRunRecordStore,
    stops: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of accepted stop events.
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RunRecordStore for CountingStore {
    async fn append_start(&self, start: StartRun) -> std::result::Result<(), CoreError> {
        self.inner.append_start(start).await
    }

    async fn append_running(
        &self,
        program_run_id: &ProgramRunId,
        running_at: DateTime<Utc>,
        source_id: SourceId,
    ) -> std::result::Result<(), CoreError> {
        self.inner
            .append_running(program_run_id, running_at, source_id)
            .await
    }

    async fn append_suspend(
        &self,
        program_run_id: &ProgramRunId,
        suspended_at: DateTime<Utc>,
        source_id: SourceId,
    ) -> std::result::Result<(), CoreError> {
        self.inner
            .append_suspend(program_run_id, suspended_at, source_id)
            .await
    }

    async fn append_stop(
        &self,
        program_run_id: &ProgramRunId,
        stopped_at: DateTime<Utc>,
        status: ProgramRunStatus,
        failure_cause: Option<&str>,
        source_id: SourceId,
    ) -> std::result::Result<(), CoreError> {
        self.inner
            .append_stop(program_run_id, stopped_at, status, failure_cause, source_id)
            .await?;
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn query_by_status(
        &self,
        statuses: &[ProgramRunStatus],
        cursor: Option<&RunCursor>,
        limit: usize,
    ) -> std::result::Result<RunPage, CoreError> {
        self.inner.query_by_status(statuses, cursor, limit).await
    }

    async fn get(
        &self,
        program_run_id: &ProgramRunId,
    ) -> std::result::Result<Option<RunRecord>, CoreError> {
        self.inner.get(program_run_id).await
    }
}

/// Run-record store in which a genuine stop event for one run lands just
/// before the first stop appended for it by anyone else.
pub struct RacingStore {
    inner: InMemoryRunRecordStore,
    run: ProgramRunId,
    genuine: ProgramRunStatus,
    raced: AtomicBool,
}

impl RacingStore {
    pub fn new(run: ProgramRunId, genuine: ProgramRunStatus) -> Self {
        Self {
            inner: InMemoryRunRecordStore::new(),
            run,
            genuine,
            raced: AtomicBool::new(false),
        }
    }

    /// Whether the genuine event has been appended.
    pub fn raced(&self) -> bool {
        self.raced.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RunRecordStore for RacingStore {
    async fn append_start(&self, start: StartRun) -> std::result::Result<(), CoreError> {
        self.inner.append_start(start).await
    }

    async fn append_running(
        &self,
        program_run_id: &ProgramRunId,
        running_at: DateTime<Utc>,
        source_id: SourceId,
    ) -> std::result::Result<(), CoreError> {
        self.inner
            .append_running(program_run_id, running_at, source_id)
            .await
    }

    async fn append_suspend(
        &self,
        program_run_id: &ProgramRunId,
        suspended_at: DateTime<Utc>,
        source_id: SourceId,
    ) -> std::result::Result<(), CoreError> {
        self.inner
            .append_suspend(program_run_id, suspended_at, source_id)
            .await
    }

    async fn append_stop(
        &self,
        program_run_id: &ProgramRunId,
        stopped_at: DateTime<Utc>,
        status: ProgramRunStatus,
        failure_cause: Option<&str>,
        source_id: SourceId,
    ) -> std::result::Result<(), CoreError> {
        if *program_run_id == self.run && !self.raced.swap(true, Ordering::SeqCst) {
            let current = self
                .inner
                .get(program_run_id)
                .await?
                .map_or(SourceId(0), |record| record.source_id);
            self.inner
                .append_stop(
                    program_run_id,
                    Utc::now(),
                    self.genuine,
                    None,
                    SourceId(current.0 + 1),
                )
                .await?;
        }
        self.inner
            .append_stop(program_run_id, stopped_at, status, failure_cause, source_id)
            .await
    }

    async fn query_by_status(
        &self,
        statuses: &[ProgramRunStatus],
        cursor: Option<&RunCursor>,
        limit: usize,
    ) -> std::result::Result<RunPage, CoreError> {
        self.inner.query_by_status(statuses, cursor, limit).await
    }

    async fn get(
        &self,
        program_run_id: &ProgramRunId,
    ) -> std::result::Result<Option<RunRecord>, CoreError> {
        self.inner.get(program_run_id).await
    }
}

/// Live run registry whose lookups can be made to fail per program.
#[derive(Default)]
pub struct FlakyObserver {
    pub registry: LiveRunRegistry,
    failing: RwLock<HashSet<ProgramId>>,
    lookups: AtomicUsize,
}

impl FlakyObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_program(&self, program: ProgramId) {
        self.failing.write().await.insert(program);
    }

    /// Number of `list_live` calls served.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RuntimeObserver for FlakyObserver {
    async fn list_live(&self, program: &ProgramId) -> Result<HashMap<String, LiveRun>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.failing.read().await.contains(program) {
            return Err(Error::Other(format!("runtime unreachable for {}", program)));
        }
        self.registry.list_live(program).await
    }
}

pub fn service(name: &str) -> ProgramId {
    ProgramId::new(NAMESPACE, APPLICATION, ProgramType::Service, name)
}

pub fn workflow(name: &str) -> ProgramId {
    ProgramId::new(NAMESPACE, APPLICATION, ProgramType::Workflow, name)
}

pub fn mapreduce(name: &str) -> ProgramId {
    ProgramId::new(NAMESPACE, APPLICATION, ProgramType::MapReduce, name)
}

/// A point in time well outside any correction buffer used in tests.
pub fn an_hour_ago() -> DateTime<Utc> {
    Utc::now() - ChronoDuration::hours(1)
}

/// Seed a run in STARTING.
pub async fn seed_starting(store: &dyn RunRecordStore, id: &ProgramRunId, at: DateTime<Utc>) {
    store
        .append_start(StartRun::new(id.clone(), at, SourceId(1)))
        .await
        .expect("Failed to seed start event");
}

/// Seed a run in RUNNING.
pub async fn seed_running(store: &dyn RunRecordStore, id: &ProgramRunId, at: DateTime<Utc>) {
    seed_starting(store, id, at).await;
    store
        .append_running(id, at, SourceId(2))
        .await
        .expect("Failed to seed running event");
}

/// Seed a workflow node run in RUNNING.
pub async fn seed_running_node(
    store: &dyn RunRecordStore,
    id: &ProgramRunId,
    parent: &ProgramRunId,
    node_id: &str,
    at: DateTime<Utc>,
) {
    let link = WorkflowLinkage::new(parent.program.program.clone(), parent.run.clone(), node_id);
    store
        .append_start(StartRun::new(id.clone(), at, SourceId(1)).in_workflow(link))
        .await
        .expect("Failed to seed node start event");
    store
        .append_running(id, at, SourceId(2))
        .await
        .expect("Failed to seed node running event");
}

pub async fn status_of(store: &dyn RunRecordStore, id: &ProgramRunId) -> ProgramRunStatus {
    store
        .get(id)
        .await
        .expect("Failed to read run record")
        .expect("Run record missing")
        .status
}

/// Corrector settings for tests: no initial delay, short interval.
pub fn corrector_config(buffer_secs: i64, batch_size: usize) -> RunRecordCorrectorConfig {
    RunRecordCorrectorConfig {
        enabled: true,
        interval: Duration::from_millis(20),
        initial_delay: Duration::ZERO,
        correction_buffer_secs: buffer_secs,
        batch_size,
    }
}

/// Write a provisioner extension descriptor.
pub fn write_descriptor(dir: &Path, file: &str, contents: &str) {
    std::fs::write(dir.join(file), contents).expect("Failed to write descriptor");
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
