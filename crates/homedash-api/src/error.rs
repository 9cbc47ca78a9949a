use thiserror::Error;

/// Top-level error type for the `homedash-api` crate.
///
/// Every probe failure lands in one of two families: transport problems
/// (the request never produced a usable response) and validation problems
/// (a well-formed 2xx response missing a field the service kind requires).
/// `homedash-core` downgrades both to "offline".
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The probe did not complete within its deadline and was aborted.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The service answered with a non-success status code.
    #[error("Unexpected HTTP status {status}")]
    Status { status: u16 },

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    Client(String),

    // ── Data ────────────────────────────────────────────────────────
    /// Body was not JSON at all, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// Body was JSON but lacked a field required for this service kind.
    #[error("Validation failed: {message}")]
    Validation { message: String },
}

impl Error {
    /// Returns `true` for failures where no usable response arrived.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout { .. } | Self::Status { .. }
        )
    }

    /// Returns `true` when the service responded but failed validation.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::Deserialization { .. })
    }
}
