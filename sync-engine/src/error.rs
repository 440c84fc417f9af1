//! Sync error taxonomy.
//!
//! Every failure mode a run can hit maps to one variant, and the engine
//! chooses retry/defer/abort per variant rather than per call site:
//!
//! - `MissingCredentials` / `AuthRefreshFailed` — fatal for the run, never
//!   retried automatically; the user must reconnect
//! - `AuthExpired` — recoverable: the engine refreshes and retries once
//! - `RateLimited` — not an error from the user's perspective: the current
//!   cursor is re-enqueued after the provider's retry-after
//! - `Transient` — network-level failure that survived the HTTP wrapper's
//!   bounded retries; fails the run
//! - `ProviderData` — one malformed item; skipped and logged, the page
//!   continues
//! - `Structural` — the whole page/response is unusable; fails the run

use std::time::Duration;

/// Errors surfaced by the sync engine and provider adapters.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// No usable token or API key stored for the group.
    #[error("no credentials stored for {service}; reconnect required")]
    MissingCredentials { service: String },

    /// The provider rejected the access token (expired or revoked).
    #[error("access token rejected by {service}")]
    AuthExpired { service: String },

    /// The refresh token itself was rejected; a human must re-authenticate.
    #[error("token refresh failed for {service}: {reason}")]
    AuthRefreshFailed { service: String, reason: String },

    /// Provider throttled the call. The paginator defers the same cursor.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Network-level failure after the wrapper's retry budget was spent.
    #[error("transient network failure: {0}")]
    Transient(String),

    /// One item in a page is malformed; skip it, keep the page.
    #[error("malformed provider item: {0}")]
    ProviderData(String),

    /// The response as a whole is unusable (parse failure, unexpected
    /// status); the run fails.
    #[error("structural provider error: {0}")]
    Structural(String),

    /// Storage-layer failure.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl SyncError {
    /// True for errors that abort the run (as opposed to deferring it or
    /// skipping a single item).
    pub fn is_fatal_for_run(&self) -> bool {
        !matches!(
            self,
            SyncError::RateLimited { .. } | SyncError::ProviderData(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality_classification() {
        assert!(!SyncError::RateLimited { retry_after: None }.is_fatal_for_run());
        assert!(!SyncError::ProviderData("bad field".into()).is_fatal_for_run());
        assert!(SyncError::Transient("connection reset".into()).is_fatal_for_run());
        assert!(SyncError::AuthRefreshFailed {
            service: "oura".into(),
            reason: "invalid_grant".into()
        }
        .is_fatal_for_run());
        assert!(SyncError::MissingCredentials {
            service: "monzo".into()
        }
        .is_fatal_for_run());
    }
}
