// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory run-record store for development and testing.

use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::CoreError;
use crate::run::{ProgramRunId, ProgramRunStatus, RunRecord, SourceId};

use super::{RunCursor, RunPage, RunRecordStore, StartRun, check_append, next_cursor};

/// Run-record store keeping all records in an ordered map.
#[derive(Default)]
pub struct InMemoryRunRecordStore {
    records: RwLock<BTreeMap<String, RunRecord>>,
}

impl InMemoryRunRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records stored.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn apply(
        &self,
        program_run_id: &ProgramRunId,
        target: ProgramRunStatus,
        source_id: SourceId,
        update: impl FnOnce(&mut RunRecord),
    ) -> Result<(), CoreError> {
        let key = program_run_id.key();
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&key)
            .ok_or_else(|| CoreError::RunNotFound {
                program_run: key.clone(),
            })?;

        check_append(record, target, source_id)?;

        record.status = target;
        record.source_id = source_id;
        update(record);
        Ok(())
    }
}

#[async_trait]
impl RunRecordStore for InMemoryRunRecordStore {
    async fn append_start(&self, start: StartRun) -> Result<(), CoreError> {
        let key = start.program_run_id.key();
        let mut records = self.records.write().await;
        if records.contains_key(&key) {
            return Err(CoreError::RunAlreadyExists { program_run: key });
        }

        records.insert(
            key,
            RunRecord {
                program_run_id: start.program_run_id,
                status: ProgramRunStatus::Starting,
                started_at: start.started_at,
                running_at: None,
                suspended_at: None,
                stopped_at: None,
                updated_at: start.started_at,
                workflow: start.workflow,
                properties: start.properties,
                failure_cause: None,
                source_id: start.source_id,
            },
        );
        Ok(())
    }

    async fn append_running(
        &self,
        program_run_id: &ProgramRunId,
        running_at: DateTime<Utc>,
        source_id: SourceId,
    ) -> Result<(), CoreError> {
        self.apply(
            program_run_id,
            ProgramRunStatus::Running,
            source_id,
            |record| {
                record.running_at = Some(running_at);
                record.updated_at = running_at;
            },
        )
        .await
    }

    async fn append_suspend(
        &self,
        program_run_id: &ProgramRunId,
        suspended_at: DateTime<Utc>,
        source_id: SourceId,
    ) -> Result<(), CoreError> {
        self.apply(
            program_run_id,
            ProgramRunStatus::Suspended,
            source_id,
            |record| {
                record.suspended_at = Some(suspended_at);
                record.updated_at = suspended_at;
            },
        )
        .await
    }

    async fn append_stop(
        &self,
        program_run_id: &ProgramRunId,
        stopped_at: DateTime<Utc>,
        status: ProgramRunStatus,
        failure_cause: Option<&str>,
        source_id: SourceId,
    ) -> Result<(), CoreError> {
        let cause = failure_cause.map(str::to_string);
        self.apply(program_run_id, status, source_id, |record| {
            record.stopped_at = Some(stopped_at);
            record.updated_at = stopped_at;
            record.failure_cause = cause;
        })
        .await
    }

    async fn query_by_status(
        &self,
        statuses: &[ProgramRunStatus],
        cursor: Option<&RunCursor>,
        limit: usize,
    ) -> Result<RunPage, CoreError> {
        if statuses.is_empty() || limit == 0 {
            return Ok(RunPage::default());
        }

        let records = self.records.read().await;
        let lower = match cursor {
            Some(cursor) => Bound::Excluded(cursor.as_str().to_string()),
            None => Bound::Unbounded,
        };

        let page: Vec<RunRecord> = records
            .range((lower, Bound::Unbounded))
            .map(|(_, record)| record)
            .filter(|record| statuses.contains(&record.status))
            .take(limit)
            .cloned()
            .collect();

        let next_cursor = next_cursor(&page, limit);
        Ok(RunPage {
            records: page,
            next_cursor,
        })
    }

    async fn get(&self, program_run_id: &ProgramRunId) -> Result<Option<RunRecord>, CoreError> {
        Ok(self.records.read().await.get(&program_run_id.key()).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{ProgramId, ProgramType};

    fn run(name: &str) -> ProgramRunId {
        ProgramId::new("default", "app", ProgramType::Service, "svc").run(name)
    }

    #[tokio::test]
    async fn test_lifecycle_appends() {
        let store = InMemoryRunRecordStore::new();
        let id = run("r1");
        let now = Utc::now();

        store
            .append_start(StartRun::new(id.clone(), now, SourceId(1)))
            .await
            .unwrap();
        store.append_running(&id, now, SourceId(2)).await.unwrap();
        store.append_suspend(&id, now, SourceId(3)).await.unwrap();
        store.append_running(&id, now, SourceId(4)).await.unwrap();
        store
            .append_stop(&id, now, ProgramRunStatus::Completed, None, SourceId(5))
            .await
            .unwrap();

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, ProgramRunStatus::Completed);
        assert_eq!(record.source_id, SourceId(5));
        assert!(record.stopped_at.is_some());
    }

    #[tokio::test]
    async fn test_terminal_records_reject_further_events() {
        let store = InMemoryRunRecordStore::new();
        let id = run("r1");
        let now = Utc::now();

        store
            .append_start(StartRun::new(id.clone(), now, SourceId(1)))
            .await
            .unwrap();
        store
            .append_stop(&id, now, ProgramRunStatus::Killed, None, SourceId(2))
            .await
            .unwrap();

        let err = store
            .append_stop(&id, now, ProgramRunStatus::Failed, Some("late"), SourceId(3))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert_eq!(
            store.get(&id).await.unwrap().unwrap().status,
            ProgramRunStatus::Killed
        );
    }

    #[tokio::test]
    async fn test_stale_source_rejected() {
        let store = InMemoryRunRecordStore::new();
        let id = run("r1");
        let now = Utc::now();

        store
            .append_start(StartRun::new(id.clone(), now, SourceId(5)))
            .await
            .unwrap();
        let err = store
            .append_running(&id, now, SourceId(4))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::StaleVersion { .. }));

        // Same token is accepted.
        store.append_running(&id, now, SourceId(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_start_and_missing_run() {
        let store = InMemoryRunRecordStore::new();
        let id = run("r1");
        let now = Utc::now();

        store
            .append_start(StartRun::new(id.clone(), now, SourceId(1)))
            .await
            .unwrap();
        let err = store
            .append_start(StartRun::new(id.clone(), now, SourceId(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::RunAlreadyExists { .. }));

        let err = store
            .append_running(&run("missing"), now, SourceId(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::RunNotFound { .. }));
    }

    #[tokio::test]
    async fn test_query_by_status_pages() {
        let store = InMemoryRunRecordStore::new();
        let now = Utc::now();
        for i in 0..7 {
            let id = run(&format!("r{}", i));
            store
                .append_start(StartRun::new(id.clone(), now, SourceId(1)))
                .await
                .unwrap();
            if i % 2 == 0 {
                store.append_running(&id, now, SourceId(2)).await.unwrap();
            }
        }

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = store
                .query_by_status(&[ProgramRunStatus::Running], cursor.as_ref(), 2)
                .await
                .unwrap();
            assert!(page.records.len() <= 2);
            seen.extend(page.records.iter().map(|r| r.program_run_id.run.clone()));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        assert_eq!(seen, vec!["r0", "r2", "r4", "r6"]);
    }
}
