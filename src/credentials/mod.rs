//! Integration groups and encrypted credential storage.
//!
//! An **integration group** is one external account connection — one Oura
//! account, one bank connected through an aggregator. The group owns the
//! credential set (OAuth access/refresh token or long-lived API key) shared
//! by every sync instance beneath it.
//!
//! Tokens are encrypted at rest with AES-256-GCM, each with its own nonce,
//! in a SQLite database. The master key is provided from the environment and
//! never written to disk.
//!
//! # Lifecycle
//!
//! - a group row is created when the OAuth flow starts (no tokens yet)
//! - onboarding completes with tokens plus the provider's account id; if a
//!   live group already exists for the same `(user_id, service, account_id)`
//!   the connection collapses onto that row instead of duplicating it
//! - every token refresh overwrites the stored tokens (store-then-use)
//! - disconnecting soft-deletes the group

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod encryption;
mod storage;

pub use encryption::{decrypt, encrypt, validate_key};
pub use storage::GroupStore;

/// Credential set for one external account connection.
///
/// For OAuth services `access_token`/`refresh_token`/`expires_at` follow the
/// provider's grant. For API-key services the key is stored as the access
/// token with no expiry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    /// True when the access token's expiry is within `threshold_secs` of now
    /// (or already past). Credentials without an expiry never report expired.
    pub fn expires_within(&self, threshold_secs: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= Utc::now() + chrono::Duration::seconds(threshold_secs),
            None => false,
        }
    }
}

/// One external account connection, decrypted for use.
#[derive(Clone, Debug)]
pub struct IntegrationGroup {
    pub id: i64,
    pub user_id: String,
    /// Service identifier (e.g. "oura", "monzo")
    pub service: String,
    /// Provider-side account/user id, populated at onboarding
    pub account_id: Option<String>,
    /// Empty access token means the group was created but never authorized
    pub credentials: Credentials,
}

impl IntegrationGroup {
    /// True once the group holds a usable access token.
    pub fn is_authorized(&self) -> bool {
        !self.credentials.access_token.is_empty()
    }
}
