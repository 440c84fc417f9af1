use crate::error::SyncError;
use crate::http::ApiClient;
use crate::types::{AccountProfile, AuthScheme, Cursor, FetchedPage, SyncContext};
use async_trait::async_trait;
use lifelog::NormalizedRecord;
use serde_json::Value;
use std::time::Duration;

/// Provider adapter interface.
///
/// Each external service implements this trait once; the engine is written
/// against it and never against a concrete provider. Adapters are stateless:
/// credentials, cursors and run bookkeeping live outside.
///
/// # Lifecycle
/// 1. The OAuth boundary uses `auth()` to drive authorization and
///    `fetch_account_profile()` to fill in the group's account id
/// 2. The scheduler gate decides a run is due and asks `initial_cursor()`
///    where to start
/// 3. The engine repeatedly calls `fetch_page()` and feeds each raw item
///    through `normalize()` into the idempotent writer
/// 4. Rate limits and pagination are reported through the page result and
///    error taxonomy, never handled by sleeping inside the adapter
#[async_trait]
pub trait Provider: Send + Sync {
    /// Unique service identifier, lowercase (e.g. "oura", "monzo").
    fn service(&self) -> &str;

    /// How calls to this provider authenticate.
    fn auth(&self) -> AuthScheme;

    /// Sync instance kinds this provider offers (e.g. "daily_activity").
    /// One integration row is created per kind at onboarding.
    fn instance_types(&self) -> &[&str];

    /// Where a fresh run starts for the given instance.
    fn initial_cursor(&self, ctx: &SyncContext) -> Cursor;

    /// Fetches one page at `cursor`.
    ///
    /// Returns the page's raw items and the next cursor, or `None` when the
    /// provider is exhausted. Rate limiting surfaces as
    /// [`SyncError::RateLimited`] so the engine can defer the same cursor;
    /// adapters never sleep.
    async fn fetch_page(
        &self,
        client: &ApiClient,
        ctx: &SyncContext,
        cursor: &Cursor,
    ) -> Result<FetchedPage, SyncError>;

    /// Maps one raw provider item into a canonical record.
    ///
    /// `Ok(None)` skips the item silently (e.g. a kind the instance does not
    /// ingest); [`SyncError::ProviderData`] skips it with a warning.
    fn normalize(&self, ctx: &SyncContext, raw: &Value) -> Result<Option<NormalizedRecord>, SyncError>;

    /// Fetches the provider-side account identity after onboarding.
    async fn fetch_account_profile(&self, client: &ApiClient) -> Result<AccountProfile, SyncError>;

    /// Fallback deferral when a 429 carries no Retry-After guidance.
    fn default_retry_after(&self) -> Duration {
        Duration::from_secs(60)
    }

    /// Base URL for calls made outside any sync run (account profile fetch
    /// at onboarding).
    fn default_base_url(&self) -> String;

    /// Base URL for sync-run calls. Providers with self-hosted deployments
    /// override this to read the instance configuration.
    fn base_url(&self, _ctx: &SyncContext) -> String {
        self.default_base_url()
    }
}
