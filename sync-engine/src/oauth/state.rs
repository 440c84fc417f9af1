//! Signed OAuth state tokens.
//!
//! The `state` parameter round-tripped through the provider carries
//! everything the callback needs — group id, user id, CSRF token and (for
//! PKCE flows) the code verifier — as an HMAC-SHA256-signed, time-limited
//! token. Tamper-evident without server-side session affinity; a small
//! in-memory consumed-set makes each token single-use within its lifetime.

use crate::error::SyncError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use dashmap::DashSet;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// State tokens expire after this many seconds.
const STATE_TTL_SECS: i64 = 600;

/// Payload carried inside the signed state parameter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatePayload {
    pub group_id: i64,
    pub user_id: String,
    pub csrf_token: String,
    pub code_verifier: Option<String>,
    /// Unix seconds after which the token is rejected
    pub expires_at: i64,
}

/// Signs and verifies state tokens with a process-wide key.
pub struct StateSigner {
    key: Vec<u8>,
    consumed: DashSet<String>,
}

impl StateSigner {
    /// `key_base64` is a base64-encoded secret of at least 32 bytes.
    pub fn new(key_base64: &str) -> Result<Self, SyncError> {
        let key = base64::engine::general_purpose::STANDARD
            .decode(key_base64)
            .map_err(|e| SyncError::Structural(format!("invalid state key: {}", e)))?;
        if key.len() < 32 {
            return Err(SyncError::Structural(
                "state signing key must be at least 32 bytes".to_string(),
            ));
        }
        Ok(Self {
            key,
            consumed: DashSet::new(),
        })
    }

    /// Builds a payload for a new authorization round trip.
    pub fn new_payload(group_id: i64, user_id: &str, code_verifier: Option<String>) -> StatePayload {
        StatePayload {
            group_id,
            user_id: user_id.to_string(),
            csrf_token: Uuid::new_v4().to_string(),
            code_verifier,
            expires_at: (Utc::now() + chrono::Duration::seconds(STATE_TTL_SECS)).timestamp(),
        }
    }

    /// Encodes and signs a payload: `base64url(json) . base64url(hmac)`.
    pub fn sign(&self, payload: &StatePayload) -> Result<String, SyncError> {
        let body = serde_json::to_vec(payload)
            .map_err(|e| SyncError::Structural(format!("state serialization failed: {}", e)))?;
        let encoded = URL_SAFE_NO_PAD.encode(&body);

        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| SyncError::Structural(format!("bad state key: {}", e)))?;
        mac.update(encoded.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", encoded, signature))
    }

    /// Verifies signature, expiry and single-use, returning the payload.
    pub fn verify_and_consume(&self, token: &str) -> Result<StatePayload, SyncError> {
        let (encoded, signature) = token
            .split_once('.')
            .ok_or_else(|| SyncError::Structural("malformed state token".to_string()))?;

        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| SyncError::Structural(format!("bad state key: {}", e)))?;
        mac.update(encoded.as_bytes());
        let signature_bytes = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| SyncError::Structural("malformed state signature".to_string()))?;
        mac.verify_slice(&signature_bytes)
            .map_err(|_| SyncError::Structural("state signature mismatch".to_string()))?;

        let body = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| SyncError::Structural("malformed state payload".to_string()))?;
        let payload: StatePayload = serde_json::from_slice(&body)
            .map_err(|e| SyncError::Structural(format!("unparseable state payload: {}", e)))?;

        if payload.expires_at < Utc::now().timestamp() {
            return Err(SyncError::Structural("state token expired".to_string()));
        }

        // Single-use: a replayed token is rejected even inside its TTL
        if !self.consumed.insert(payload.csrf_token.clone()) {
            return Err(SyncError::Structural("state token already used".to_string()));
        }

        Ok(payload)
    }

    /// Drops consumed-token entries; call periodically so the set does not
    /// grow without bound. Safe to clear wholesale because expiry rejects
    /// anything older than the TTL anyway once clocks move past it.
    pub fn cleanup_consumed(&self) {
        self.consumed.clear();
    }
}
