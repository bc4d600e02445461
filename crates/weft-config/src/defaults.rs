use crate::logging::LogFormat;
use crate::workspace::WorkspaceFoldersMode;

/// Default log filter expression used by the client telemetry.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log filter expression used by the client telemetry.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the client telemetry.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Servers are assumed to handle a single root unless configured otherwise.
#[must_use]
pub fn default_workspace_folders() -> WorkspaceFoldersMode {
    WorkspaceFoldersMode::Unsupported
}
