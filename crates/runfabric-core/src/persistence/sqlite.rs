// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed run-record store.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::error::CoreError;
use crate::run::{ProgramId, ProgramRunId, ProgramRunStatus, RunRecord, SourceId, WorkflowLinkage};

use super::{RunCursor, RunPage, RunRecordStore, StartRun, check_append, next_cursor};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// How long a connection waits for another writer before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Attempts at a conditional update before giving up on a record that keeps
/// changing underneath it.
const MAX_APPLY_ATTEMPTS: usize = 3;

const SELECT_COLUMNS: &str = r#"
    SELECT run_key, namespace, application, program_type, program, run_id, status,
           started_at, running_at, suspended_at, stopped_at, updated_at,
           workflow_name, workflow_run_id, workflow_node_id,
           properties, failure_cause, source_id
    FROM run_records
"#;

/// SQLite-backed run-record store.
#[derive(Clone)]
pub struct SqliteRunRecordStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct RunRecordRow {
    #[allow(dead_code)]
    run_key: String,
    namespace: String,
    application: String,
    program_type: String,
    program: String,
    run_id: String,
    status: String,
    started_at: DateTime<Utc>,
    running_at: Option<DateTime<Utc>>,
    suspended_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    workflow_name: Option<String>,
    workflow_run_id: Option<String>,
    workflow_node_id: Option<String>,
    properties: String,
    failure_cause: Option<String>,
    source_id: i64,
}

impl TryFrom<RunRecordRow> for RunRecord {
    type Error = CoreError;

    fn try_from(row: RunRecordRow) -> Result<Self, Self::Error> {
        let program_type = row.program_type.parse().map_err(corrupt_row)?;
        let status = row.status.parse().map_err(corrupt_row)?;
        let properties: HashMap<String, String> = serde_json::from_str(&row.properties)?;

        let workflow = match (row.workflow_name, row.workflow_run_id, row.workflow_node_id) {
            (Some(name), Some(run_id), Some(node_id)) => {
                Some(WorkflowLinkage::new(name, run_id, node_id))
            }
            _ => None,
        };

        Ok(RunRecord {
            program_run_id: ProgramId::new(
                row.namespace,
                row.application,
                program_type,
                row.program,
            )
            .run(row.run_id),
            status,
            started_at: row.started_at,
            running_at: row.running_at,
            suspended_at: row.suspended_at,
            stopped_at: row.stopped_at,
            updated_at: row.updated_at,
            workflow,
            properties,
            failure_cause: row.failure_cause,
            source_id: SourceId(row.source_id.max(0) as u64),
        })
    }
}

fn corrupt_row(details: String) -> CoreError {
    CoreError::Database {
        operation: "decode".to_string(),
        details,
    }
}

fn source_to_db(source_id: SourceId) -> Result<i64, CoreError> {
    i64::try_from(source_id.0).map_err(|_| CoreError::Database {
        operation: "encode".to_string(),
        details: format!("source id {} does not fit a 64-bit signed integer", source_id),
    })
}

impl SqliteRunRecordStore {
    /// Create a store from an existing pool. Migrations must already be applied.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `url`, creating the database if needed, and run migrations.
    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        // In-memory databases are per-connection.
        let in_memory = url.contains(":memory:");
        let max_connections = if in_memory { 1 } else { 5 };

        let mut options = SqliteConnectOptions::from_str(url)
            .map_err(|e| CoreError::Database {
                operation: "connect".to_string(),
                details: format!("Invalid SQLite URL {}: {}", url, e),
            })?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| CoreError::Database {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {}: {}", url, e),
            })?;

        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Open the database file at `path`, creating parent directories and the
    /// file itself when missing.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::Database {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        Self::connect(&format!("sqlite:{}?mode=rwc", path.to_string_lossy())).await
    }

    /// Apply pending migrations to `pool`.
    pub async fn migrate(pool: &SqlitePool) -> Result<(), CoreError> {
        MIGRATOR.run(pool).await.map_err(|e| CoreError::Database {
            operation: "migrate".to_string(),
            details: format!("Failed to run migrations: {}", e),
        })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch(
        &self,
        executor: impl sqlx::SqliteExecutor<'_>,
        key: &str,
    ) -> Result<Option<RunRecord>, CoreError> {
        let row = sqlx::query_as::<_, RunRecordRow>(&format!("{} WHERE run_key = ?", SELECT_COLUMNS))
            .bind(key)
            .fetch_optional(executor)
            .await?;
        row.map(RunRecord::try_from).transpose()
    }

    /// Apply one non-start event as a single conditional update.
    ///
    /// The update only matches while the record is in a legal predecessor
    /// status and its token is not newer than `source_id`, so concurrent
    /// appends never interleave a read and a write. When nothing matched, the
    /// record is re-read to report why.
    async fn apply(
        &self,
        program_run_id: &ProgramRunId,
        target: ProgramRunStatus,
        source_id: SourceId,
        at: DateTime<Utc>,
        failure_cause: Option<&str>,
    ) -> Result<(), CoreError> {
        let key = program_run_id.key();
        let source = source_to_db(source_id)?;

        let timestamp_column = match target {
            ProgramRunStatus::Running => "running_at",
            ProgramRunStatus::Suspended => "suspended_at",
            _ => "stopped_at",
        };

        let predecessors = ProgramRunStatus::predecessors_of(target);
        let sql = format!(
            r#"
            UPDATE run_records
            SET status = ?, {} = ?, updated_at = ?, source_id = ?,
                failure_cause = COALESCE(?, failure_cause)
            WHERE run_key = ? AND source_id <= ? AND status IN ({})
            "#,
            timestamp_column,
            vec!["?"; predecessors.len()].join(", ")
        );

        for attempt in 1..=MAX_APPLY_ATTEMPTS {
            let mut query = sqlx::query(&sql)
                .bind(target.as_str())
                .bind(at)
                .bind(at)
                .bind(source)
                .bind(failure_cause)
                .bind(&key)
                .bind(source);
            for status in &predecessors {
                query = query.bind(status.as_str());
            }

            if query.execute(&self.pool).await?.rows_affected() == 1 {
                return Ok(());
            }

            let record = self
                .fetch(&self.pool, &key)
                .await?
                .ok_or_else(|| CoreError::RunNotFound {
                    program_run: key.clone(),
                })?;
            check_append(&record, target, source_id)?;

            // The record moved to another legal predecessor in between.
            tracing::debug!(
                program_run = %program_run_id,
                attempt,
                "Run-record update raced a concurrent event; retrying"
            );
        }

        Err(CoreError::Database {
            operation: "update".to_string(),
            details: format!(
                "Program run '{}' kept changing during {} update attempts",
                key, MAX_APPLY_ATTEMPTS
            ),
        })
    }
}

#[async_trait::async_trait]
impl RunRecordStore for SqliteRunRecordStore {
    async fn append_start(&self, start: StartRun) -> Result<(), CoreError> {
        let key = start.program_run_id.key();
        let program = &start.program_run_id.program;
        let properties = serde_json::to_string(&start.properties)?;
        let workflow = start.workflow.as_ref();

        let result = sqlx::query(
            r#"
            INSERT INTO run_records (
                run_key, namespace, application, program_type, program, run_id, status,
                started_at, updated_at, workflow_name, workflow_run_id, workflow_node_id,
                properties, source_id
            )
            VALUES (?, ?, ?, ?, ?, ?, 'starting', ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (run_key) DO NOTHING
            "#,
        )
        .bind(&key)
        .bind(&program.namespace)
        .bind(&program.application)
        .bind(program.program_type.as_str())
        .bind(&program.program)
        .bind(&start.program_run_id.run)
        .bind(start.started_at)
        .bind(start.started_at)
        .bind(workflow.map(|w| w.workflow_name.as_str()))
        .bind(workflow.map(|w| w.workflow_run_id.as_str()))
        .bind(workflow.map(|w| w.node_id.as_str()))
        .bind(properties)
        .bind(source_to_db(start.source_id)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::RunAlreadyExists { program_run: key });
        }
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
            running_at,
            None,
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
            suspended_at,
            None,
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
        self.apply(program_run_id, status, source_id, stopped_at, failure_cause)
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

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_COLUMNS);
        builder.push(" WHERE status IN (");
        let mut separated = builder.separated(", ");
        for status in statuses {
            separated.push_bind(status.as_str());
        }
        separated.push_unseparated(")");

        if let Some(cursor) = cursor {
            builder.push(" AND run_key > ");
            builder.push_bind(cursor.as_str().to_string());
        }

        builder.push(" ORDER BY run_key LIMIT ");
        builder.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));

        let rows: Vec<RunRecordRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        let records = rows
            .into_iter()
            .map(RunRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let next_cursor = next_cursor(&records, limit);
        Ok(RunPage {
            records,
            next_cursor,
        })
    }

    async fn get(&self, program_run_id: &ProgramRunId) -> Result<Option<RunRecord>, CoreError> {
        self.fetch(&self.pool, &program_run_id.key()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::ProgramType;

    async fn test_store() -> SqliteRunRecordStore {
        SqliteRunRecordStore::connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite store")
    }

    #[tokio::test]
    async fn test_start_and_get_round_trips_linkage() {
        let store = test_store().await;
        let id = ProgramId::new("ns", "app", ProgramType::MapReduce, "mr").run("child");
        let mut start = StartRun::new(id.clone(), Utc::now(), SourceId(7))
            .in_workflow(WorkflowLinkage::new("wf", "parent", "mr"));
        start
            .properties
            .insert("input".to_string(), "/data".to_string());

        store.append_start(start).await.unwrap();

        let record = store.get(&id).await.unwrap().expect("record exists");
        assert_eq!(record.status, ProgramRunStatus::Starting);
        assert_eq!(record.source_id, SourceId(7));
        assert_eq!(record.properties.get("input").map(String::as_str), Some("/data"));
        assert_eq!(
            record.parent_workflow_run().unwrap().key(),
            "ns:app:workflow:wf:parent"
        );
    }

    #[tokio::test]
    async fn test_stop_records_failure_cause() {
        let store = test_store().await;
        let id = ProgramId::new("ns", "app", ProgramType::Service, "svc").run("r1");
        let now = Utc::now();

        store
            .append_start(StartRun::new(id.clone(), now, SourceId(1)))
            .await
            .unwrap();
        store
            .append_stop(&id, now, ProgramRunStatus::Failed, Some("gone"), SourceId(1))
            .await
            .unwrap();

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, ProgramRunStatus::Failed);
        assert_eq!(record.failure_cause.as_deref(), Some("gone"));
        assert!(record.stopped_at.is_some());
        assert!(record.running_at.is_none());
    }
}
