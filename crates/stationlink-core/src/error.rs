// ── Core error types ──
//
// Domain-facing errors from stationlink-core. Consumers never see raw
// socket or JSON failures directly; `From<stationlink_api::Error>`
// translates transport-layer errors into these variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to telemetry server at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// No socket is open or opening; the command was not queued.
    #[error("Not connected to the telemetry server")]
    NotConnected,

    #[error("Too many commands waiting for the connection to open ({capacity} queued)")]
    OutboxFull { capacity: usize },

    // ── Cache errors ─────────────────────────────────────────────────
    #[error("Station cache error: {message}")]
    Cache { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Returns `true` when retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::NotConnected | Self::OutboxFull { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<stationlink_api::Error> for CoreError {
    fn from(err: stationlink_api::Error) -> Self {
        match err {
            stationlink_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason,
            },
            stationlink_api::Error::UnsupportedScheme(scheme) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("unsupported scheme '{scheme}'"),
            },
            stationlink_api::Error::LinkClosed => CoreError::NotConnected,
            stationlink_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
            stationlink_api::Error::Serialization(e) => {
                CoreError::Internal(format!("Serialization error: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_map_to_connection_failures() {
        let err = CoreError::from(stationlink_api::Error::WebSocketConnect("refused".into()));
        assert!(matches!(err, CoreError::ConnectionFailed { ref reason, .. } if reason == "refused"));
        assert!(err.is_transient());
    }

    #[test]
    fn codec_errors_are_internal() {
        let err = CoreError::from(stationlink_api::Error::Deserialization {
            message: "expected value".into(),
            body: "{".into(),
        });
        assert!(matches!(err, CoreError::Internal(_)));
        assert!(!err.is_transient());
    }
}
