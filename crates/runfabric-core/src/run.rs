// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Program run identifiers, statuses and run records.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgramType {
    /// Long running request handler.
    Service,
    /// Long running background worker.
    Worker,
    /// DAG of other programs.
    Workflow,
    /// Batch MapReduce job.
    MapReduce,
    /// Batch Spark job.
    Spark,
}

impl ProgramType {
    /// Stable string form used in keys and storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgramType::Service => "service",
            ProgramType::Worker => "worker",
            ProgramType::Workflow => "workflow",
            ProgramType::MapReduce => "mapreduce",
            ProgramType::Spark => "spark",
        }
    }
}

impl fmt::Display for ProgramType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProgramType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "service" => Ok(ProgramType::Service),
            "worker" => Ok(ProgramType::Worker),
            "workflow" => Ok(ProgramType::Workflow),
            "mapreduce" => Ok(ProgramType::MapReduce),
            "spark" => Ok(ProgramType::Spark),
            other => Err(format!("unknown program type '{}'", other)),
        }
    }
}

/// Identifies a program (not a run of it).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProgramId {
    /// Namespace the application is deployed in.
    pub namespace: String,
    /// Application name.
    pub application: String,
    /// Program type.
    pub program_type: ProgramType,
    /// Program name.
    pub program: String,
}

impl ProgramId {
    /// Create a program id.
    pub fn new(
        namespace: impl Into<String>,
        application: impl Into<String>,
        program_type: ProgramType,
        program: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            application: application.into(),
            program_type,
            program: program.into(),
        }
    }

    /// Id of a specific run of this program.
    pub fn run(&self, run: impl Into<String>) -> ProgramRunId {
        ProgramRunId {
            program: self.clone(),
            run: run.into(),
        }
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.namespace, self.application, self.program_type, self.program
        )
    }
}

/// Identifies one run of a program.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProgramRunId {
    /// The program this is a run of.
    pub program: ProgramId,
    /// Run identifier, unique across all runs.
    pub run: String,
}

impl ProgramRunId {
    /// Create a run id with a freshly generated run identifier.
    pub fn generate(program: &ProgramId) -> Self {
        program.run(uuid::Uuid::new_v4().to_string())
    }

    /// Stable key used for storage ordering and scan cursors.
    ///
    /// Components are joined with `:`; a `:` or `%` inside a component is
    /// percent-escaped so distinct runs never share a key.
    pub fn key(&self) -> String {
        let program = &self.program;
        [
            escape_key_part(&program.namespace),
            escape_key_part(&program.application),
            Cow::Borrowed(program.program_type.as_str()),
            escape_key_part(&program.program),
            escape_key_part(&self.run),
        ]
        .join(":")
    }
}

fn escape_key_part(part: &str) -> Cow<'_, str> {
    if part.contains([':', '%']) {
        Cow::Owned(part.replace('%', "%25").replace(':', "%3A"))
    } else {
        Cow::Borrowed(part)
    }
}

impl fmt::Display for ProgramRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.program, self.run)
    }
}

/// Lifecycle status of a program run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgramRunStatus {
    /// Start requested, not yet confirmed running.
    Starting,
    /// Running.
    Running,
    /// Suspended by a user.
    Suspended,
    /// Finished successfully.
    Completed,
    /// Finished with failure.
    Failed,
    /// Stopped by a user.
    Killed,
}

impl ProgramRunStatus {
    /// Every status.
    pub const ALL: [ProgramRunStatus; 6] = [
        ProgramRunStatus::Starting,
        ProgramRunStatus::Running,
        ProgramRunStatus::Suspended,
        ProgramRunStatus::Completed,
        ProgramRunStatus::Failed,
        ProgramRunStatus::Killed,
    ];

    /// Statuses the reconciliation scans for.
    pub const NON_TERMINAL: [ProgramRunStatus; 3] = [
        ProgramRunStatus::Starting,
        ProgramRunStatus::Running,
        ProgramRunStatus::Suspended,
    ];

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgramRunStatus::Completed | ProgramRunStatus::Failed | ProgramRunStatus::Killed
        )
    }

    /// Whether an event setting `target` may follow this status.
    pub fn can_transition_to(&self, target: ProgramRunStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match target {
            ProgramRunStatus::Starting => false,
            ProgramRunStatus::Running => matches!(
                self,
                ProgramRunStatus::Starting | ProgramRunStatus::Suspended
            ),
            ProgramRunStatus::Suspended => matches!(self, ProgramRunStatus::Running),
            ProgramRunStatus::Completed | ProgramRunStatus::Failed | ProgramRunStatus::Killed => {
                true
            }
        }
    }

    /// Statuses from which an event setting `target` is accepted.
    pub fn predecessors_of(target: ProgramRunStatus) -> Vec<ProgramRunStatus> {
        Self::ALL
            .into_iter()
            .filter(|status| status.can_transition_to(target))
            .collect()
    }

    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgramRunStatus::Starting => "starting",
            ProgramRunStatus::Running => "running",
            ProgramRunStatus::Suspended => "suspended",
            ProgramRunStatus::Completed => "completed",
            ProgramRunStatus::Failed => "failed",
            ProgramRunStatus::Killed => "killed",
        }
    }
}

impl fmt::Display for ProgramRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProgramRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(ProgramRunStatus::Starting),
            "running" => Ok(ProgramRunStatus::Running),
            "suspended" => Ok(ProgramRunStatus::Suspended),
            "completed" => Ok(ProgramRunStatus::Completed),
            "failed" => Ok(ProgramRunStatus::Failed),
            "killed" => Ok(ProgramRunStatus::Killed),
            other => Err(format!("unknown program run status '{}'", other)),
        }
    }
}

/// Monotonically increasing version token of a run record.
///
/// Every event carries the token of its source message. The store rejects
/// events older than what it already recorded.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Link from a workflow node's run to the workflow run containing it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowLinkage {
    /// Name of the parent workflow program.
    pub workflow_name: String,
    /// Run id of the parent workflow run.
    pub workflow_run_id: String,
    /// Node id of this program inside the workflow.
    pub node_id: String,
}

impl WorkflowLinkage {
    /// Create a linkage.
    pub fn new(
        workflow_name: impl Into<String>,
        workflow_run_id: impl Into<String>,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            workflow_run_id: workflow_run_id.into(),
            node_id: node_id.into(),
        }
    }

    /// Run id of the parent workflow. Nodes always live in the same
    /// namespace and application as their workflow.
    pub fn parent_run_id(&self, child: &ProgramRunId) -> ProgramRunId {
        ProgramId::new(
            child.program.namespace.clone(),
            child.program.application.clone(),
            ProgramType::Workflow,
            self.workflow_name.clone(),
        )
        .run(self.workflow_run_id.clone())
    }
}

/// Persisted lifecycle record of one program run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// The run this record describes.
    pub program_run_id: ProgramRunId,
    /// Current status.
    pub status: ProgramRunStatus,
    /// When the run was started.
    pub started_at: DateTime<Utc>,
    /// When the run was confirmed running.
    pub running_at: Option<DateTime<Utc>>,
    /// When the run was last suspended.
    pub suspended_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal status.
    pub stopped_at: Option<DateTime<Utc>>,
    /// Time of the last state change.
    pub updated_at: DateTime<Utc>,
    /// Parent workflow, when this run is a workflow node.
    pub workflow: Option<WorkflowLinkage>,
    /// Runtime arguments the run was started with.
    pub properties: HashMap<String, String>,
    /// Failure cause recorded with a failed stop event.
    pub failure_cause: Option<String>,
    /// Version token of the last accepted event.
    pub source_id: SourceId,
}

impl RunRecord {
    /// Whether this run is a node of a workflow run.
    pub fn is_workflow_node(&self) -> bool {
        self.workflow.is_some()
    }

    /// Run id of the parent workflow, for workflow nodes.
    pub fn parent_workflow_run(&self) -> Option<ProgramRunId> {
        self.workflow
            .as_ref()
            .map(|link| link.parent_run_id(&self.program_run_id))
    }
}
