// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster lifecycle driver for one program run.
//!
//! ```text
//!   UNPROVISIONED ──► CREATING ──► CREATED ──► DELETING ──► DELETED
//!                        │                        │  ▲
//!                        ▼                        ▼  │ request_delete
//!                  CREATE_FAILED             DELETE_FAILED
//! ```
//!
//! The driver never blocks on the backend: every step is a single request or
//! a single status poll. The `await_*` helpers loop over polls with a
//! [`PollPolicy`] and only ever sleep the calling task.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use runfabric_spi::{Cluster, OperationStatus, Provisioner, ProvisionerContext};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Lifecycle state of a run's cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterState {
    /// Nothing requested yet.
    Unprovisioned,
    /// Create requested, not yet finished.
    Creating,
    /// Cluster is ready.
    Created,
    /// The provisioner reported the create as failed.
    CreateFailed,
    /// Delete requested, not yet finished.
    Deleting,
    /// Cluster is gone.
    Deleted,
    /// The provisioner reported the delete as failed. Delete may be re-issued.
    DeleteFailed,
}

impl ClusterState {
    /// Whether no further progress happens without a new request.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClusterState::CreateFailed | ClusterState::Deleted | ClusterState::DeleteFailed
        )
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClusterState::Unprovisioned => "UNPROVISIONED",
            ClusterState::Creating => "CREATING",
            ClusterState::Created => "CREATED",
            ClusterState::CreateFailed => "CREATE_FAILED",
            ClusterState::Deleting => "DELETING",
            ClusterState::Deleted => "DELETED",
            ClusterState::DeleteFailed => "DELETE_FAILED",
        };
        f.write_str(name)
    }
}

/// Exponential backoff between status polls.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Delay before the second poll.
    pub initial_delay: Duration,
    /// Upper bound of any single delay.
    pub max_delay: Duration,
    /// Maximum number of polls before giving up; `None` polls forever.
    pub max_polls: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_polls: None,
        }
    }
}

impl PollPolicy {
    /// Create a policy.
    pub fn new(initial_delay: Duration, max_delay: Duration, max_polls: Option<u32>) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_polls,
        }
    }

    /// Delay after the given poll (1-indexed): doubles each time, capped at
    /// `max_delay`.
    pub fn delay_after(&self, poll: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(poll.saturating_sub(1));
        self.initial_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }
}

/// Drives the create/poll/delete cycle of one run's cluster.
///
/// Holds the provisioner instance it was built with for its whole life, so a
/// provisioner reload in the middle of a cycle does not affect it.
pub struct ClusterLifecycle {
    provisioner: Arc<dyn Provisioner>,
    context: ProvisionerContext,
    state: ClusterState,
    cluster: Option<Cluster>,
}

impl ClusterLifecycle {
    /// Create a driver in the `Unprovisioned` state.
    pub fn new(provisioner: Arc<dyn Provisioner>, context: ProvisionerContext) -> Self {
        Self {
            provisioner,
            context,
            state: ClusterState::Unprovisioned,
            cluster: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> ClusterState {
        self.state
    }

    /// Last cluster returned by the provisioner.
    pub fn cluster(&self) -> Option<&Cluster> {
        self.cluster.as_ref()
    }

    /// Context of the run.
    pub fn context(&self) -> &ProvisionerContext {
        &self.context
    }

    /// Name of the provisioner driving this cluster.
    pub fn provisioner_name(&self) -> &str {
        &self.provisioner.spec().name
    }

    fn reject(&self, operation: &'static str) -> Error {
        Error::InvalidTransition {
            cluster: self.context.cluster_name(),
            operation,
            state: self.state,
        }
    }

    fn current_cluster(&self, operation: &'static str) -> Result<Cluster> {
        self.cluster.clone().ok_or_else(|| self.reject(operation))
    }

    /// Request creation. Accepted in `Unprovisioned`, and re-issuable in
    /// `Creating` since the provisioner returns the same cluster.
    pub async fn request_create(&mut self) -> Result<&Cluster> {
        match self.state {
            ClusterState::Unprovisioned => {
                self.provisioner
                    .validate_properties(&self.context.properties)?;
            }
            ClusterState::Creating => {}
            _ => return Err(self.reject("request create")),
        }

        let cluster = self.provisioner.request_create(&self.context).await?;
        debug!(
            cluster = %cluster.name,
            provisioner = %self.provisioner_name(),
            "Cluster create requested"
        );

        self.state = ClusterState::Creating;
        Ok(self.cluster.insert(cluster))
    }

    /// Poll the create request once.
    pub async fn poll_create(&mut self) -> Result<ClusterState> {
        if self.state != ClusterState::Creating {
            return Err(self.reject("poll create"));
        }
        let cluster = self.current_cluster("poll create")?;

        match self
            .provisioner
            .get_create_status(&self.context, &cluster)
            .await?
        {
            OperationStatus::InProgress => {}
            OperationStatus::Successful => {
                info!(cluster = %cluster.name, "Cluster created");
                self.state = ClusterState::Created;
            }
            OperationStatus::Failed => {
                warn!(cluster = %cluster.name, "Cluster create failed");
                self.state = ClusterState::CreateFailed;
            }
        }
        Ok(self.state)
    }

    /// Request deletion. Accepted in `Created`, `Deleting` and
    /// `DeleteFailed`. Rejected while `Creating`: create has to finish first.
    pub async fn request_delete(&mut self) -> Result<()> {
        if !matches!(
            self.state,
            ClusterState::Created | ClusterState::Deleting | ClusterState::DeleteFailed
        ) {
            return Err(self.reject("request delete"));
        }
        let cluster = self.current_cluster("request delete")?;

        self.provisioner
            .request_delete(&self.context, &cluster)
            .await?;
        debug!(cluster = %cluster.name, "Cluster delete requested");

        self.state = ClusterState::Deleting;
        Ok(())
    }

    /// Poll the delete request once.
    pub async fn poll_delete(&mut self) -> Result<ClusterState> {
        if self.state != ClusterState::Deleting {
            return Err(self.reject("poll delete"));
        }
        let cluster = self.current_cluster("poll delete")?;

        match self
            .provisioner
            .get_delete_status(&self.context, &cluster)
            .await?
        {
            OperationStatus::InProgress => {}
            OperationStatus::Successful => {
                info!(cluster = %cluster.name, "Cluster deleted");
                self.state = ClusterState::Deleted;
            }
            OperationStatus::Failed => {
                warn!(cluster = %cluster.name, "Cluster delete failed");
                self.state = ClusterState::DeleteFailed;
            }
        }
        Ok(self.state)
    }

    /// Poll until create finishes. Fails with `OperationFailed` when the
    /// provisioner reports failure or the policy runs out of polls.
    pub async fn await_created(&mut self, policy: &PollPolicy) -> Result<&Cluster> {
        let mut polls = 0;
        loop {
            polls += 1;
            match self.poll_create().await? {
                ClusterState::Created => break,
                ClusterState::CreateFailed => {
                    return Err(Error::OperationFailed(format!(
                        "Provisioner '{}' failed to create cluster '{}'",
                        self.provisioner_name(),
                        self.context.cluster_name()
                    )));
                }
                _ => self.wait(policy, polls, "create").await?,
            }
        }
        self.cluster
            .as_ref()
            .ok_or_else(|| self.reject("await created"))
    }

    /// Poll until delete finishes. Fails with `OperationFailed` when the
    /// provisioner reports failure or the policy runs out of polls.
    pub async fn await_deleted(&mut self, policy: &PollPolicy) -> Result<()> {
        let mut polls = 0;
        loop {
            polls += 1;
            match self.poll_delete().await? {
                ClusterState::Deleted => return Ok(()),
                ClusterState::DeleteFailed => {
                    return Err(Error::OperationFailed(format!(
                        "Provisioner '{}' failed to delete cluster '{}'",
                        self.provisioner_name(),
                        self.context.cluster_name()
                    )));
                }
                _ => self.wait(policy, polls, "delete").await?,
            }
        }
    }

    async fn wait(&self, policy: &PollPolicy, polls: u32, operation: &str) -> Result<()> {
        if let Some(max) = policy.max_polls
            && polls >= max
        {
            return Err(Error::OperationFailed(format!(
                "Cluster '{}' {} did not finish after {} polls",
                self.context.cluster_name(),
                operation,
                polls
            )));
        }
        tokio::time::sleep(policy.delay_after(polls)).await;
        Ok(())
    }

    /// Request creation and wait for it to finish.
    pub async fn provision(&mut self, policy: &PollPolicy) -> Result<Cluster> {
        self.request_create().await?;
        Ok(self.await_created(policy).await?.clone())
    }

    /// Request deletion and wait for it to finish.
    pub async fn deprovision(&mut self, policy: &PollPolicy) -> Result<()> {
        self.request_delete().await?;
        self.await_deleted(policy).await
    }

    /// Tear the cluster down from whatever state it is in.
    ///
    /// A create still in flight is driven to its outcome first; a cluster
    /// that never got created has nothing to delete.
    pub async fn teardown(&mut self, policy: &PollPolicy) -> Result<ClusterState> {
        if self.state == ClusterState::Creating {
            match self.await_created(policy).await.map(|_| ()) {
                Ok(()) => {}
                Err(Error::OperationFailed(_)) if self.state == ClusterState::CreateFailed => {}
                Err(e) => return Err(e),
            }
        }

        match self.state {
            ClusterState::Created | ClusterState::Deleting | ClusterState::DeleteFailed => {
                if self.state != ClusterState::Deleting {
                    self.request_delete().await?;
                }
                self.await_deleted(policy).await?;
            }
            ClusterState::Unprovisioned
            | ClusterState::CreateFailed
            | ClusterState::Deleted
            | ClusterState::Creating => {}
        }
        Ok(self.state)
    }
}
