use crate::logging::LogFormat;

/// Default tracing filter directive.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Connection manager name used when none is configured.
pub const DEFAULT_CONNECTION_MANAGER: &str = "rust";

/// Contact-list requests accepted before the roster has been received.
pub const DEFAULT_ROSTER_QUEUE_LIMIT: usize = 256;

/// Default tracing filter directive.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Owned connection manager name.
#[must_use]
pub fn default_connection_manager() -> String {
    DEFAULT_CONNECTION_MANAGER.to_owned()
}

/// Default limit for requests queued ahead of the roster.
#[must_use]
pub const fn default_roster_queue_limit() -> usize {
    DEFAULT_ROSTER_QUEUE_LIMIT
}
