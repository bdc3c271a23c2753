//! Error taxonomy (§7). Decision points in the engine match on [`EngineError`]; everything
//! else propagates as `anyhow::Error`, matching the split the source repository keeps between
//! its typed `BackendError` and plain `anyhow::Result` call sites.

/// Kinds of failure the reply pipeline and HTTP client must distinguish between, because each
/// one has a different propagation rule (retry, terminal skip, or fallback).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Connection reset, DNS failure, or a 5xx response. Retried inside the HTTP client.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// HTTP 429. The caller already slept until `reset + 5s`; this signals "try once more".
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds the caller should have already waited before seeing this error.
        retry_after_secs: u64,
    },

    /// HTTP 4xx other than 429. Not retried.
    #[error("client error {status}: {body}")]
    ClientError {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated/parsed where possible.
        body: String,
    },

    /// `users/by/username` returned 404 or a suspended/invalid marker.
    #[error("target user is absent")]
    AbsentTarget,

    /// The configured style image URL failed a HEAD validation.
    #[error("style image URL failed validation: {0}")]
    BadStyleUrl(String),

    /// The resolved target profile image URL failed a HEAD validation.
    #[error("target image URL failed validation: {0}")]
    BadTargetUrl(String),

    /// The transform service errored or timed out across all attempts.
    #[error("image transform failed: {0}")]
    TransformFailure(String),

    /// Media upload or post-reply terminally failed; the mention is left unprocessed.
    #[error("post failed: {0}")]
    PostFailure(String),

    /// Ledger disk I/O failed; fatal for the current batch iteration.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            EngineError::TransientNetwork(err.to_string())
        } else if let Some(status) = err.status() {
            if status.as_u16() == 429 {
                EngineError::RateLimited {
                    retry_after_secs: 0,
                }
            } else if status.is_server_error() {
                EngineError::TransientNetwork(err.to_string())
            } else {
                EngineError::ClientError {
                    status: status.as_u16(),
                    body: err.to_string(),
                }
            }
        } else {
            EngineError::TransientNetwork(err.to_string())
        }
    }
}

/// Failure reading or writing `processed_ids.json` / `since_id.json`.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Underlying filesystem operation failed.
    #[error("ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The persisted file did not parse as the expected JSON shape.
    #[error("ledger file corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}
