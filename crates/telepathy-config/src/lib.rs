//! Layered configuration shared by connection managers built on
//! `telepathy-service`.
//!
//! Values resolve through `ortho_config` in increasing precedence: built-in
//! defaults, a configuration file, `TELEPATHY_*` environment variables and
//! finally command-line flags. The resulting [`Config`] feeds telemetry set-up
//! and the naming of connection objects on the bus.

mod defaults;
mod logging;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_CONNECTION_MANAGER, DEFAULT_LOG_FILTER, DEFAULT_ROSTER_QUEUE_LIMIT,
    default_connection_manager, default_log_filter, default_log_filter_string,
    default_log_format, default_roster_queue_limit,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Runtime configuration for a connection manager process.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "TELEPATHY")]
pub struct Config {
    #[ortho_config(default = default_log_filter_string())]
    log_filter: String,
    #[ortho_config(default = default_log_format())]
    log_format: LogFormat,
    #[ortho_config(default = default_connection_manager())]
    connection_manager: String,
    #[ortho_config(default = default_roster_queue_limit())]
    roster_queue_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            connection_manager: default_connection_manager(),
            roster_queue_limit: default_roster_queue_limit(),
        }
    }
}

impl Config {
    /// Tracing `EnvFilter` directive.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Output format for the telemetry subscriber.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Connection manager name embedded in bus names and object paths.
    #[must_use]
    pub fn connection_manager(&self) -> &str {
        &self.connection_manager
    }

    /// Maximum number of contact-list requests held until the roster arrives.
    #[must_use]
    pub const fn roster_queue_limit(&self) -> usize {
        self.roster_queue_limit
    }

    /// Replaces the connection manager name.
    #[must_use]
    pub fn with_connection_manager(mut self, name: impl Into<String>) -> Self {
        self.connection_manager = name.into();
        self
    }

    /// Replaces the roster queue limit.
    #[must_use]
    pub const fn with_roster_queue_limit(mut self, limit: usize) -> Self {
        self.roster_queue_limit = limit;
        self
    }

    /// Checks values that the loader cannot validate structurally.
    ///
    /// Connection manager names appear verbatim inside D-Bus bus names, so
    /// they must start with an ASCII letter and contain only ASCII
    /// alphanumerics and underscores.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_manager_name(&self.connection_manager)
    }
}

/// Errors reported by [`Config::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The connection manager name cannot be used in a bus name.
    #[error("invalid connection manager name '{name}': {reason}")]
    InvalidManagerName {
        /// Rejected name.
        name: String,
        /// Human readable rejection reason.
        reason: &'static str,
    },
}

fn validate_manager_name(name: &str) -> Result<(), ConfigError> {
    let reject = |reason| ConfigError::InvalidManagerName {
        name: name.to_owned(),
        reason,
    };
    let mut chars = name.chars();
    match chars.next() {
        None => return Err(reject("name is empty")),
        Some(first) if !first.is_ascii_alphabetic() => {
            return Err(reject("name must start with an ASCII letter"));
        }
        Some(_) => {}
    }
    if chars.any(|ch| !(ch.is_ascii_alphanumeric() || ch == '_')) {
        return Err(reject("only ASCII letters, digits and '_' are allowed"));
    }
    Ok(())
}
