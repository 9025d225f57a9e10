// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Built-in provisioners and extension loading.

pub mod default;
pub mod loader;
pub mod mock;

pub use default::{DEFAULT_PROVISIONER_NAME, DefaultProvisioner};
pub use loader::{ExtensionDescriptor, ExtensionLoader, ProvisionerExtensionLoader};
pub use mock::{MockProvisioner, MockProvisionerConfig};
