// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Context handed to every provisioner call.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The program run a cluster is provisioned for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgramRunInfo {
    /// Namespace the application is deployed in.
    pub namespace: String,
    /// Application name.
    pub application: String,
    /// Program name within the application.
    pub program: String,
    /// Unique run identifier.
    pub run: String,
}

impl ProgramRunInfo {
    /// Create program run info.
    pub fn new(
        namespace: impl Into<String>,
        application: impl Into<String>,
        program: impl Into<String>,
        run: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            application: application.into(),
            program: program.into(),
            run: run.into(),
        }
    }
}

impl fmt::Display for ProgramRunInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.namespace, self.application, self.program, self.run
        )
    }
}

/// Input to the create/delete/status operations of a provisioner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionerContext {
    /// Run the cluster belongs to.
    pub program_run: ProgramRunInfo,
    /// Validated provisioner properties for this run.
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl ProvisionerContext {
    /// Create a context.
    pub fn new(program_run: ProgramRunInfo, properties: HashMap<String, String>) -> Self {
        Self {
            program_run,
            properties,
        }
    }

    /// Cluster identifier for this run.
    ///
    /// Stable for the lifetime of the run, and unique across runs because run
    /// ids are never reused. Provisioners use it to find a cluster they
    /// already created.
    pub fn cluster_name(&self) -> String {
        self.program_run.run.clone()
    }
}
