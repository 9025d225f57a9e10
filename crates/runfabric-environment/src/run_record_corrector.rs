// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker that corrects run records left behind by crashes.
//!
//! A run record can stay in STARTING, RUNNING or SUSPENDED forever when the
//! process that would have appended its stop event dies. Each pass:
//!
//! 1. Scans every non-terminal record in pages of `batch_size`.
//! 2. Lists the live runs of every program involved (including the parent
//!    workflows of workflow nodes), once per program, grouped by namespace
//!    and application. This snapshot is fixed for the rest of the pass.
//! 3. Decides each record: live runs are left alone; records younger than
//!    the correction buffer are skipped; workflow nodes follow their parent
//!    workflow; everything else is stopped as FAILED.
//! 4. Appends the stop events in chunks of `batch_size`, carrying each
//!    record's own source id so that a genuine event that raced ahead wins.
//!
//! A failed write never aborts the pass. The next pass sees the record again
//! (or no longer sees it, if a genuine event made it terminal).

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use runfabric_core::{
    ProgramId, ProgramRunId, ProgramRunStatus, RunCursor, RunRecord, RunRecordStore,
};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::runtime_observer::RuntimeObserver;

/// Configuration for the run-record corrector.
#[derive(Debug, Clone)]
pub struct RunRecordCorrectorConfig {
    /// Whether the periodic corrector runs.
    pub enabled: bool,
    /// Time between passes.
    pub interval: Duration,
    /// Time before the first periodic pass.
    pub initial_delay: Duration,
    /// Minimum time since a record's last change before it may be corrected.
    /// Zero or negative corrects immediately.
    pub correction_buffer_secs: i64,
    /// Maximum records per scan page and per write chunk.
    pub batch_size: usize,
}

impl Default for RunRecordCorrectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(180),
            initial_delay: Duration::from_secs(30),
            correction_buffer_secs: 120,
            batch_size: 100,
        }
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrectionReport {
    /// Non-terminal records scanned.
    pub scanned: usize,
    /// Records left alone because the run is live.
    pub skipped_live: usize,
    /// Records younger than the correction buffer.
    pub skipped_buffer: usize,
    /// Workflow nodes left alone because their parent workflow is live.
    pub skipped_live_parent: usize,
    /// Workflow nodes whose parent has no outcome yet.
    pub deferred: usize,
    /// Records whose program could not be observed this pass.
    pub unobserved: usize,
    /// Runs corrected, with the status written.
    pub corrected: Vec<(ProgramRunId, ProgramRunStatus)>,
    /// Runs whose correction write failed.
    pub failed: Vec<ProgramRunId>,
    /// Failed writes that lost to a concurrent genuine event. These runs are
    /// also listed in `failed`.
    pub lost_races: usize,
}

impl CorrectionReport {
    /// Number of records written.
    pub fn corrected_count(&self) -> usize {
        self.corrected.len()
    }
}

/// Live runs of every observed program, captured once per pass.
#[derive(Debug, Default)]
struct LiveSnapshot {
    live: HashMap<ProgramId, HashSet<String>>,
    unobserved: HashSet<ProgramId>,
}

impl LiveSnapshot {
    fn is_live(&self, run: &ProgramRunId) -> bool {
        self.live
            .get(&run.program)
            .is_some_and(|runs| runs.contains(&run.run))
    }

    fn is_observed(&self, program: &ProgramId) -> bool {
        !self.unobserved.contains(program)
    }
}

#[derive(Debug)]
enum Decision {
    Live,
    Buffered,
    LiveParent,
    Deferred,
    Unobserved,
    Correct {
        status: ProgramRunStatus,
        cause: String,
    },
}

struct Correction {
    record: RunRecord,
    status: ProgramRunStatus,
    cause: String,
}

/// Background worker reconciling run records against the runtime.
pub struct RunRecordCorrector {
    store: Arc<dyn RunRecordStore>,
    observer: Arc<dyn RuntimeObserver>,
    config: RunRecordCorrectorConfig,
    pass_lock: Mutex<()>,
    shutdown: Arc<Notify>,
}

impl RunRecordCorrector {
    /// Create a new corrector.
    pub fn new(
        store: Arc<dyn RunRecordStore>,
        observer: Arc<dyn RuntimeObserver>,
        config: RunRecordCorrectorConfig,
    ) -> Self {
        Self {
            store,
            observer,
            config,
            pass_lock: Mutex::new(()),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Configuration in use.
    pub fn config(&self) -> &RunRecordCorrectorConfig {
        &self.config
    }

    /// Run the periodic correction loop until shutdown is signalled.
    pub async fn run(&self) {
        if !self.config.enabled {
            info!("Run-record corrector disabled");
            return;
        }

        info!(
            interval_secs = self.config.interval.as_secs(),
            initial_delay_secs = self.config.initial_delay.as_secs(),
            buffer_secs = self.config.correction_buffer_secs,
            batch_size = self.config.batch_size,
            "Run-record corrector started"
        );

        let mut delay = self.config.initial_delay;
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Run-record corrector received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(delay) => {
                    match self.run_once().await {
                        Ok(report) if report.corrected_count() > 0 || !report.failed.is_empty() => {
                            info!(
                                scanned = report.scanned,
                                corrected = report.corrected_count(),
                                failed = report.failed.len(),
                                "Run-record correction pass finished"
                            );
                        }
                        Ok(report) => {
                            debug!(scanned = report.scanned, "Run-record correction pass found nothing to fix");
                        }
                        Err(e) => {
                            error!(error = %e, "Run-record correction pass failed");
                        }
                    }
                }
            }
            delay = self.config.interval;
        }

        info!("Run-record corrector stopped");
    }

    /// Execute one reconciliation pass.
    ///
    /// Fails with [`Error::ReconciliationInProgress`] if another pass is
    /// running, and with the store's error if the scan itself fails.
    /// Failures of individual correction writes are reported, not returned.
    pub async fn run_once(&self) -> Result<CorrectionReport> {
        let _pass = self
            .pass_lock
            .try_lock()
            .map_err(|_| Error::ReconciliationInProgress)?;

        let now = Utc::now();
        let batch_size = self.config.batch_size.max(1);

        let candidates = self.scan(batch_size).await?;
        let mut report = CorrectionReport {
            scanned: candidates.len(),
            ..Default::default()
        };
        if candidates.is_empty() {
            return Ok(report);
        }

        let snapshot = self.observe(&candidates).await;

        // Workflows and plain programs first: a node's decision may depend on
        // what happened to its parent in this same pass.
        let (nodes, others): (Vec<RunRecord>, Vec<RunRecord>) =
            candidates.iter().cloned().partition(RunRecord::is_workflow_node);

        let mut corrections = Vec::new();
        for record in others {
            let decision = self.decide_unlinked(&record, &snapshot, now);
            self.collect(record, decision, &mut corrections, &mut report);
        }
        let parent_outcomes = self
            .write_corrections(corrections, batch_size, now, &mut report)
            .await;

        let pending: HashMap<String, &RunRecord> = candidates
            .iter()
            .map(|r| (r.program_run_id.key(), r))
            .collect();
        let mut parent_cache: HashMap<String, Option<ProgramRunStatus>> = HashMap::new();

        let mut corrections = Vec::new();
        for record in nodes {
            let decision = self
                .decide_node(
                    &record,
                    &snapshot,
                    now,
                    &parent_outcomes,
                    &pending,
                    &mut parent_cache,
                )
                .await;
            self.collect(record, decision, &mut corrections, &mut report);
        }
        self.write_corrections(corrections, batch_size, now, &mut report)
            .await;

        Ok(report)
    }

    /// Collect all non-terminal records, page by page.
    async fn scan(&self, batch_size: usize) -> Result<Vec<RunRecord>> {
        let mut records = Vec::new();
        let mut cursor: Option<RunCursor> = None;
        loop {
            let page = self
                .store
                .query_by_status(&ProgramRunStatus::NON_TERMINAL, cursor.as_ref(), batch_size)
                .await?;
            debug!(
                records = page.records.len(),
                more = page.next_cursor.is_some(),
                "Scanned run-record page"
            );
            records.extend(page.records);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(records)
    }

    /// Capture the live runs of every program the candidates refer to.
    async fn observe(&self, candidates: &[RunRecord]) -> LiveSnapshot {
        let mut by_application: BTreeMap<(String, String), BTreeSet<ProgramId>> = BTreeMap::new();
        for record in candidates {
            let mut programs = vec![record.program_run_id.program.clone()];
            if let Some(parent) = record.parent_workflow_run() {
                programs.push(parent.program);
            }
            for program in programs {
                by_application
                    .entry((program.namespace.clone(), program.application.clone()))
                    .or_default()
                    .insert(program);
            }
        }

        let mut snapshot = LiveSnapshot::default();
        for ((namespace, application), programs) in by_application {
            let lookups = programs.into_iter().map(|program| async move {
                let live = self.observer.list_live(&program).await;
                (program, live)
            });

            for (program, live) in join_all(lookups).await {
                match live {
                    Ok(runs) => {
                        snapshot.live.insert(program, runs.into_keys().collect());
                    }
                    Err(e) => {
                        warn!(
                            namespace = %namespace,
                            application = %application,
                            program = %program,
                            error = %e,
                            "Failed to list live runs; skipping program this pass"
                        );
                        snapshot.unobserved.insert(program);
                    }
                }
            }
        }
        snapshot
    }

    fn within_buffer(&self, record: &RunRecord, now: DateTime<Utc>) -> bool {
        let buffer = self.config.correction_buffer_secs;
        buffer > 0 && (now - record.updated_at).num_seconds() < buffer
    }

    fn decide_unlinked(
        &self,
        record: &RunRecord,
        snapshot: &LiveSnapshot,
        now: DateTime<Utc>,
    ) -> Decision {
        if self.within_buffer(record, now) {
            return Decision::Buffered;
        }
        if !snapshot.is_observed(&record.program_run_id.program) {
            return Decision::Unobserved;
        }
        if snapshot.is_live(&record.program_run_id) {
            return Decision::Live;
        }
        Decision::Correct {
            status: ProgramRunStatus::Failed,
            cause: format!(
                "Run-record corrector: {} run {} is not running in the runtime",
                record.status, record.program_run_id
            ),
        }
    }

    async fn decide_node(
        &self,
        record: &RunRecord,
        snapshot: &LiveSnapshot,
        now: DateTime<Utc>,
        parent_outcomes: &HashMap<String, ProgramRunStatus>,
        pending: &HashMap<String, &RunRecord>,
        parent_cache: &mut HashMap<String, Option<ProgramRunStatus>>,
    ) -> Decision {
        if self.within_buffer(record, now) {
            return Decision::Buffered;
        }
        if !snapshot.is_observed(&record.program_run_id.program) {
            return Decision::Unobserved;
        }
        if snapshot.is_live(&record.program_run_id) {
            return Decision::Live;
        }
        let Some(parent) = record.parent_workflow_run() else {
            return self.decide_unlinked(record, snapshot, now);
        };
        if !snapshot.is_observed(&parent.program) {
            return Decision::Unobserved;
        }
        if snapshot.is_live(&parent) {
            return Decision::LiveParent;
        }

        let key = parent.key();
        let parent_status = if let Some(status) = parent_outcomes.get(&key) {
            Some(*status)
        } else if let Some(parent_record) = pending.get(&key)
            && self.within_buffer(parent_record, now)
        {
            // The parent itself is still inside the buffer.
            return Decision::Deferred;
        } else {
            match parent_cache.get(&key) {
                Some(status) => *status,
                None => {
                    let status = match self.store.get(&parent).await {
                        Ok(found) => found.map(|r| r.status),
                        Err(e) => {
                            warn!(
                                program_run = %record.program_run_id,
                                parent = %parent,
                                error = %e,
                                "Failed to read parent workflow record"
                            );
                            return Decision::Deferred;
                        }
                    };
                    parent_cache.insert(key, status);
                    status
                }
            }
        };

        match parent_status {
            Some(ProgramRunStatus::Killed) => Decision::Correct {
                status: ProgramRunStatus::Killed,
                cause: format!("Run-record corrector: parent workflow run {} was killed", parent),
            },
            Some(status) if status.is_terminal() => Decision::Correct {
                status: ProgramRunStatus::Failed,
                cause: format!(
                    "Run-record corrector: parent workflow run {} ended as {} while node {} was {}",
                    parent,
                    status,
                    record.workflow.as_ref().map_or("?", |w| w.node_id.as_str()),
                    record.status
                ),
            },
            Some(_) => Decision::Deferred,
            None => Decision::Correct {
                status: ProgramRunStatus::Failed,
                cause: format!(
                    "Run-record corrector: parent workflow run {} does not exist",
                    parent
                ),
            },
        }
    }

    fn collect(
        &self,
        record: RunRecord,
        decision: Decision,
        corrections: &mut Vec<Correction>,
        report: &mut CorrectionReport,
    ) {
        match decision {
            Decision::Live => report.skipped_live += 1,
            Decision::Buffered => report.skipped_buffer += 1,
            Decision::LiveParent => report.skipped_live_parent += 1,
            Decision::Deferred => report.deferred += 1,
            Decision::Unobserved => report.unobserved += 1,
            Decision::Correct { status, cause } => corrections.push(Correction {
                record,
                status,
                cause,
            }),
        }
    }

    /// Append stop events in chunks of `batch_size`. Returns the status
    /// written for every run that was corrected, keyed by run key.
    async fn write_corrections(
        &self,
        corrections: Vec<Correction>,
        batch_size: usize,
        now: DateTime<Utc>,
        report: &mut CorrectionReport,
    ) -> HashMap<String, ProgramRunStatus> {
        let mut written = HashMap::new();

        for chunk in corrections.chunks(batch_size) {
            let writes = chunk.iter().map(|correction| async move {
                let record = &correction.record;
                let result = self
                    .store
                    .append_stop(
                        &record.program_run_id,
                        now,
                        correction.status,
                        Some(correction.cause.as_str()),
                        record.source_id,
                    )
                    .await;
                (correction, result)
            });

            for (correction, result) in join_all(writes).await {
                let run = &correction.record.program_run_id;
                match result {
                    Ok(()) => {
                        info!(
                            program_run = %run,
                            from = %correction.record.status,
                            to = %correction.status,
                            "Corrected stale run record"
                        );
                        written.insert(run.key(), correction.status);
                        report.corrected.push((run.clone(), correction.status));
                    }
                    Err(e) if e.is_conflict() => {
                        debug!(
                            program_run = %run,
                            error = %e,
                            "Run record changed concurrently; leaving it to the next pass"
                        );
                        report.lost_races += 1;
                        report.failed.push(run.clone());
                    }
                    Err(e) => {
                        warn!(program_run = %run, error = %e, "Failed to correct run record");
                        report.failed.push(run.clone());
                    }
                }
            }
        }

        written
    }
}
