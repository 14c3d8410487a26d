/// Error taxonomy for the collector fleet (kinds, not type hierarchies).
///
/// `TransientNetwork` and `ProviderUnavailable` are retried inside `fetch()`;
/// they only surface here once the retry budget is exhausted. `StoreError`
/// from `put()` fails a run; the same kind from `set_meta()` is swallowed by
/// the store itself and never reaches a collector.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("provider unavailable ({status}): {message}")]
    ProviderUnavailable { status: u16, message: String },

    #[error("provider rejected request ({status}): {message}")]
    ProviderRejected { status: u16, message: String },

    #[error("decode error: {0}")]
    DecodeError(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("store error: {0}")]
    StoreError(String),

    #[error("cancelled")]
    Cancelled,
}

impl CollectorError {
    /// §4.2: 5xx and transport errors are retryable, 4xx is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CollectorError::TransientNetwork(_) | CollectorError::ProviderUnavailable { .. }
        )
    }
}
