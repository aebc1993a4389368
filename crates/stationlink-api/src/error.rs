use thiserror::Error;

/// Top-level error type for the `stationlink-api` crate.
///
/// Covers the transport and codec failure modes of the telemetry link.
/// `stationlink-core` maps these into domain-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// WebSocket connection failed (refused, DNS, TLS handshake, protocol error).
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// The target address does not use a WebSocket scheme.
    #[error("Unsupported URL scheme '{0}' (expected ws or wss)")]
    UnsupportedScheme(String),

    /// The socket pump stopped before the frame could be queued.
    #[error("WebSocket link is closed")]
    LinkClosed,

    // ── Data ────────────────────────────────────────────────────────
    /// Inbound frame could not be decoded, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// Outbound command could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::WebSocketConnect(_) | Self::LinkClosed)
    }

    /// Returns `true` if the error came from a malformed payload rather than the link.
    pub fn is_codec(&self) -> bool {
        matches!(self, Self::Deserialization { .. } | Self::Serialization(_))
    }
}
