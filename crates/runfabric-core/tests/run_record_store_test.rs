// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Contract tests run against every run-record store backend.

use std::sync::Arc;

use chrono::Utc;
use runfabric_core::{
    CoreError, InMemoryRunRecordStore, ProgramId, ProgramRunId, ProgramRunStatus, ProgramType,
    RunCursor, RunRecordStore, SourceId, SqliteRunRecordStore, StartRun, WorkflowLinkage,
};

struct Backend {
    name: &'static str,
    store: Arc<dyn RunRecordStore>,
    _dir: Option<tempfile::TempDir>,
}

async fn backends() -> Vec<Backend> {
    let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let sqlite = SqliteRunRecordStore::from_path(dir.path().join("nested/runs.db"))
        .await
        .expect("Failed to open SQLite store");

    vec![
        Backend {
            name: "memory",
            store: Arc::new(InMemoryRunRecordStore::new()),
            _dir: None,
        },
        Backend {
            name: "sqlite",
            store: Arc::new(sqlite),
            _dir: Some(dir),
        },
    ]
}

fn service_run(run: &str) -> ProgramRunId {
    ProgramId::new("default", "app", ProgramType::Service, "svc").run(run)
}

#[tokio::test]
async fn test_status_machine_enforced() {
    for backend in backends().await {
        let store = &backend.store;
        let id = service_run("r1");
        let now = Utc::now();

        store
            .append_start(StartRun::new(id.clone(), now, SourceId(1)))
            .await
            .unwrap();

        let err = store
            .append_suspend(&id, now, SourceId(2))
            .await
            .unwrap_err();
        assert!(
            matches!(err, CoreError::InvalidTransition { .. }),
            "{}: {:?}",
            backend.name,
            err
        );

        store.append_running(&id, now, SourceId(2)).await.unwrap();
        store.append_suspend(&id, now, SourceId(3)).await.unwrap();
        store
            .append_stop(&id, now, ProgramRunStatus::Killed, None, SourceId(4))
            .await
            .unwrap();

        let err = store
            .append_running(&id, now, SourceId(5))
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "{}: {:?}", backend.name, err);

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, ProgramRunStatus::Killed, "{}", backend.name);
        assert_eq!(record.source_id, SourceId(4), "{}", backend.name);
    }
}

#[tokio::test]
async fn test_stale_event_never_overwrites_newer_state() {
    for backend in backends().await {
        let store = &backend.store;
        let id = service_run("r1");
        let now = Utc::now();

        store
            .append_start(StartRun::new(id.clone(), now, SourceId(10)))
            .await
            .unwrap();
        store.append_running(&id, now, SourceId(20)).await.unwrap();

        let err = store
            .append_stop(&id, now, ProgramRunStatus::Failed, Some("late"), SourceId(15))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "STALE_VERSION", "{}", backend.name);

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, ProgramRunStatus::Running, "{}", backend.name);
        assert!(record.failure_cause.is_none(), "{}", backend.name);
    }
}

#[tokio::test]
async fn test_duplicate_start_rejected() {
    for backend in backends().await {
        let store = &backend.store;
        let id = service_run("r1");

        store
            .append_start(StartRun::new(id.clone(), Utc::now(), SourceId(1)))
            .await
            .unwrap();
        let err = store
            .append_start(StartRun::new(id.clone(), Utc::now(), SourceId(2)))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "RUN_ALREADY_EXISTS", "{}", backend.name);
    }
}

#[tokio::test]
async fn test_missing_run() {
    for backend in backends().await {
        let store = &backend.store;
        let id = service_run("nope");

        assert!(store.get(&id).await.unwrap().is_none(), "{}", backend.name);
        let err = store
            .append_stop(&id, Utc::now(), ProgramRunStatus::Failed, None, SourceId(1))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "RUN_NOT_FOUND", "{}", backend.name);
    }
}

#[tokio::test]
async fn test_cursor_scan_visits_each_record_once() {
    for backend in backends().await {
        let store = &backend.store;
        let now = Utc::now();

        for i in 0..23 {
            let id = service_run(&format!("run-{:02}", i));
            store
                .append_start(StartRun::new(id.clone(), now, SourceId(1)))
                .await
                .unwrap();
            match i % 3 {
                0 => {}
                1 => store.append_running(&id, now, SourceId(2)).await.unwrap(),
                _ => store
                    .append_stop(&id, now, ProgramRunStatus::Completed, None, SourceId(2))
                    .await
                    .unwrap(),
            }
        }

        let mut seen = Vec::new();
        let mut cursor: Option<RunCursor> = None;
        let mut pages = 0;
        loop {
            let page = store
                .query_by_status(&ProgramRunStatus::NON_TERMINAL, cursor.as_ref(), 5)
                .await
                .unwrap();
            pages += 1;
            assert!(page.records.len() <= 5, "{}", backend.name);
            assert!(
                page.records.iter().all(|r| !r.status.is_terminal()),
                "{}",
                backend.name
            );
            seen.extend(page.records.iter().map(|r| r.program_run_id.run.clone()));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        // 23 records, 7 of which are completed: 16 non-terminal in 4 pages of 5.
        assert_eq!(seen.len(), 16, "{}", backend.name);
        let mut sorted = seen.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted, seen, "{}: scan must be ordered and unique", backend.name);
        assert_eq!(pages, 4, "{}", backend.name);
    }
}

#[tokio::test]
async fn test_workflow_linkage_persisted() {
    for backend in backends().await {
        let store = &backend.store;
        let workflow = ProgramId::new("default", "app", ProgramType::Workflow, "wf").run("wf-run");
        let node = ProgramId::new("default", "app", ProgramType::MapReduce, "mr").run("mr-run");
        let now = Utc::now();

        store
            .append_start(StartRun::new(workflow.clone(), now, SourceId(1)))
            .await
            .unwrap();
        store
            .append_start(
                StartRun::new(node.clone(), now, SourceId(1))
                    .in_workflow(WorkflowLinkage::new("wf", "wf-run", "mr")),
            )
            .await
            .unwrap();

        let record = store.get(&node).await.unwrap().unwrap();
        assert!(record.is_workflow_node(), "{}", backend.name);
        assert_eq!(record.parent_workflow_run(), Some(workflow), "{}", backend.name);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_all_land() {
    for backend in backends().await {
        let now = Utc::now();
        let runs: Vec<_> = (0..20).map(|i| service_run(&format!("run-{i:02}"))).collect();
        for run in &runs {
            backend
                .store
                .append_start(StartRun::new(run.clone(), now, SourceId(1)))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for run in runs.clone() {
            let store = backend.store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append_stop(&run, now, ProgramRunStatus::Failed, Some("lost"), SourceId(1))
                    .await
            }));
        }
        for handle in handles {
            let result = handle.await.unwrap();
            assert!(result.is_ok(), "{}: {:?}", backend.name, result);
        }

        for run in &runs {
            let record = backend.store.get(run).await.unwrap().unwrap();
            assert_eq!(record.status, ProgramRunStatus::Failed, "{}", backend.name);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stops_on_one_run_accept_exactly_one() {
    for backend in backends().await {
        let now = Utc::now();
        let id = service_run("contended");
        backend
            .store
            .append_start(StartRun::new(id.clone(), now, SourceId(1)))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for status in [
            ProgramRunStatus::Completed,
            ProgramRunStatus::Failed,
            ProgramRunStatus::Killed,
            ProgramRunStatus::Failed,
            ProgramRunStatus::Completed,
            ProgramRunStatus::Killed,
        ] {
            let store = backend.store.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store.append_stop(&id, now, status, None, SourceId(2)).await
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => accepted += 1,
                Err(e) => assert!(e.is_conflict(), "{}: {:?}", backend.name, e),
            }
        }
        assert_eq!(accepted, 1, "{}", backend.name);

        let record = backend.store.get(&id).await.unwrap().unwrap();
        assert!(record.status.is_terminal(), "{}", backend.name);
        assert_eq!(record.source_id, SourceId(2), "{}", backend.name);
    }
}

#[tokio::test]
async fn test_keys_with_separator_do_not_collide() {
    for backend in backends().await {
        let now = Utc::now();
        let a = ProgramId::new("a", "b:c", ProgramType::Service, "svc").run("r");
        let b = ProgramId::new("a:b", "c", ProgramType::Service, "svc").run("r");

        backend
            .store
            .append_start(StartRun::new(a.clone(), now, SourceId(1)))
            .await
            .unwrap();
        backend
            .store
            .append_start(StartRun::new(b.clone(), now, SourceId(1)))
            .await
            .unwrap();
        backend
            .store
            .append_stop(&a, now, ProgramRunStatus::Killed, None, SourceId(2))
            .await
            .unwrap();

        let record_a = backend.store.get(&a).await.unwrap().unwrap();
        let record_b = backend.store.get(&b).await.unwrap().unwrap();
        assert_eq!(record_a.program_run_id, a, "{}", backend.name);
        assert_eq!(record_a.status, ProgramRunStatus::Killed, "{}", backend.name);
        assert_eq!(record_b.program_run_id, b, "{}", backend.name);
        assert_eq!(record_b.status, ProgramRunStatus::Starting, "{}", backend.name);
    }
}
