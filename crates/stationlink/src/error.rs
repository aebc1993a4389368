//! CLI error types with miette diagnostics.
//!
//! Maps core and config errors into user-facing errors with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use stationlink_config::ConfigError;
use stationlink_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to telemetry server at {url}")]
    #[diagnostic(
        code(stationlink::connection_failed),
        help(
            "Check that the telemetry server is running and reachable.\n\
             Try: stationlink diagnose {url}"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Timed out after {seconds}s waiting for {waiting_for}")]
    #[diagnostic(
        code(stationlink::timeout),
        help("Raise the limit with --timeout, or check the server with: stationlink diagnose")
    )]
    Timeout { seconds: u64, waiting_for: String },

    // ── Server responses ─────────────────────────────────────────────
    #[error("Command rejected by server: {message}")]
    #[diagnostic(code(stationlink::rejected))]
    Rejected { message: String },

    #[error("Station {station} is not known to the server")]
    #[diagnostic(
        code(stationlink::machine_not_found),
        help("Check the station id; the server answered 'machine not found'.")
    )]
    MachineNotFound { station: u64 },

    #[error("An operator session is already active on station {station}")]
    #[diagnostic(
        code(stationlink::session_active),
        help("End it first with: stationlink send end-session --station {station}")
    )]
    SessionAlreadyActive { station: u64 },

    // ── Cache ────────────────────────────────────────────────────────
    #[error("Station {station} has no fresh cached data")]
    #[diagnostic(
        code(stationlink::not_cached),
        help("Cached records expire after the configured max age. Run: stationlink watch {station}")
    )]
    NotCached { station: u64 },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid {field}: {reason}")]
    #[diagnostic(code(stationlink::validation))]
    Validation { field: String, reason: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(
        code(stationlink::config_error),
        help("Check the file named by --config or STATIONLINK_CONFIG.")
    )]
    Config { message: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(code(stationlink::io_error))]
    Io(#[from] std::io::Error),

    #[error("Failed to render output: {0}")]
    #[diagnostic(code(stationlink::render_error))]
    Render(String),

    #[error("{0}")]
    #[diagnostic(code(stationlink::internal))]
    Internal(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::MachineNotFound { .. } | Self::NotCached { .. } => exit_code::NOT_FOUND,
            Self::SessionAlreadyActive { .. } => exit_code::CONFLICT,
            Self::Validation { .. } | Self::Config { .. } => exit_code::USAGE,
            Self::Rejected { .. } | Self::Io(_) | Self::Render(_) | Self::Internal(_) => {
                exit_code::GENERAL
            }
        }
    }
}

// ── Conversions ─────────────────────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => Self::ConnectionFailed { url, reason },
            CoreError::NotConnected => Self::ConnectionFailed {
                url: String::new(),
                reason: "not connected".into(),
            },
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::Io(e) => Self::Io(e),
            other => Self::Config {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_stable_exit_codes() {
        let err = CliError::from(CoreError::ConnectionFailed {
            url: "ws://10.0.0.1:8765".into(),
            reason: "refused".into(),
        });
        assert_eq!(err.exit_code(), exit_code::CONNECTION);
        assert_eq!(CliError::from(CoreError::NotConnected).exit_code(), exit_code::CONNECTION);
        assert_eq!(
            CliError::from(CoreError::OutboxFull { capacity: 32 }).exit_code(),
            exit_code::GENERAL
        );
    }

    #[test]
    fn cache_errors_keep_their_message() {
        let err = CliError::from(CoreError::Cache {
            message: "cannot write station_cache.json".into(),
        });
        assert!(matches!(&err, CliError::Internal(m) if m.contains("station_cache.json")));
        assert_eq!(err.exit_code(), exit_code::GENERAL);
    }

    #[test]
    fn config_validation_is_a_usage_error() {
        let err = CliError::from(ConfigError::Validation {
            field: "server.url".into(),
            reason: "bad".into(),
        });
        assert_eq!(err.exit_code(), exit_code::USAGE);
    }
}
