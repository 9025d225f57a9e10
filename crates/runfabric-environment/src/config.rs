// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for runfabric-environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::run_record_corrector::RunRecordCorrectorConfig;

/// Environment configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Run-record store URL. When unset, a SQLite file under `data_dir` is used.
    pub database_url: Option<String>,
    /// Data directory.
    pub data_dir: PathBuf,
    /// Directories scanned for provisioner extension descriptors, in order.
    pub extension_dirs: Vec<PathBuf>,
    /// Run-record corrector settings.
    pub corrector: RunRecordCorrectorConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Path of the SQLite run-record database used when no URL is set.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("runfabric.db")
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("RUNFABRIC_DATABASE_URL").filter(|url| !url.is_empty());

        let data_dir = lookup("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".data"));

        let extension_dirs = match lookup("RUNFABRIC_PROVISIONER_EXTENSIONS_DIR") {
            Some(dirs) => dirs
                .split(',')
                .map(str::trim)
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from)
                .collect(),
            None => vec![data_dir.join("provisioners")],
        };

        let defaults = RunRecordCorrectorConfig::default();
        let corrector = RunRecordCorrectorConfig {
            enabled: lookup("RUNFABRIC_CORRECTOR_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.enabled),
            interval: parse_var(&lookup, "RUNFABRIC_CORRECTOR_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.interval),
            initial_delay: parse_var(&lookup, "RUNFABRIC_CORRECTOR_INITIAL_DELAY_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.initial_delay),
            correction_buffer_secs: parse_var(&lookup, "RUNFABRIC_CORRECTOR_BUFFER_SECS")?
                .unwrap_or(defaults.correction_buffer_secs),
            batch_size: match parse_var::<usize>(&lookup, "RUNFABRIC_CORRECTOR_BATCH_SIZE")? {
                Some(0) => {
                    return Err(ConfigError::InvalidValue {
                        var: "RUNFABRIC_CORRECTOR_BATCH_SIZE",
                        value: "0".to_string(),
                    });
                }
                Some(size) => size,
                None => defaults.batch_size,
            },
        };

        Ok(Self {
            database_url,
            data_dir,
            extension_dirs,
            corrector,
        })
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set to a value that cannot be used.
    #[error("Invalid value '{value}' for environment variable {var}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.database_url, None);
        assert_eq!(config.database_path(), PathBuf::from(".data/runfabric.db"));
        assert_eq!(config.extension_dirs, vec![PathBuf::from(".data/provisioners")]);
        assert!(config.corrector.enabled);
        assert_eq!(config.corrector.interval, Duration::from_secs(180));
        assert_eq!(config.corrector.initial_delay, Duration::from_secs(30));
        assert_eq!(config.corrector.correction_buffer_secs, 120);
        assert_eq!(config.corrector.batch_size, 100);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("DATA_DIR", "/var/lib/runfabric"),
            ("RUNFABRIC_PROVISIONER_EXTENSIONS_DIR", "/etc/a, /opt/b,"),
            ("RUNFABRIC_CORRECTOR_ENABLED", "false"),
            ("RUNFABRIC_CORRECTOR_BUFFER_SECS", "-1"),
            ("RUNFABRIC_CORRECTOR_BATCH_SIZE", "5"),
        ]))
        .unwrap();
        assert_eq!(
            config.extension_dirs,
            vec![PathBuf::from("/etc/a"), PathBuf::from("/opt/b")]
        );
        assert_eq!(
            config.database_path(),
            PathBuf::from("/var/lib/runfabric/runfabric.db")
        );
        assert!(!config.corrector.enabled);
        assert_eq!(config.corrector.correction_buffer_secs, -1);
        assert_eq!(config.corrector.batch_size, 5);
    }

    #[test]
    fn test_invalid_values() {
        let err = Config::from_lookup(lookup(&[("RUNFABRIC_CORRECTOR_INTERVAL_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { var: "RUNFABRIC_CORRECTOR_INTERVAL_SECS", .. }
        ));

        let err = Config::from_lookup(lookup(&[("RUNFABRIC_CORRECTOR_BATCH_SIZE", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
