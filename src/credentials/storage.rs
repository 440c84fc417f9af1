//! SQLite-backed integration group storage.
//!
//! Tokens are encrypted column-wise with unique nonces before they reach the
//! database; rows are soft-deleted so disconnects keep their history.

use super::{encryption, Credentials, IntegrationGroup};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::Mutex;

/// Encrypted integration group storage.
///
/// # Schema
/// ```sql
/// CREATE TABLE integration_groups (
///     id INTEGER PRIMARY KEY,
///     user_id TEXT NOT NULL,
///     service TEXT NOT NULL,
///     account_id TEXT,                  -- provider-side account id
///     access_token TEXT NOT NULL,       -- encrypted ("" before onboarding)
///     access_token_nonce TEXT NOT NULL,
///     refresh_token TEXT,               -- encrypted (optional)
///     refresh_token_nonce TEXT,
///     expires_at TEXT,                  -- ISO 8601
///     created_at TEXT NOT NULL,
///     updated_at TEXT NOT NULL,
///     deleted_at TEXT                   -- soft delete marker
/// );
/// ```
///
/// At most one live (non-deleted) row exists per
/// `(user_id, service, account_id)`; [`GroupStore::complete_onboarding`]
/// collapses re-connections onto the existing row.
pub struct GroupStore {
    conn: Mutex<Connection>,
    encryption_key: Vec<u8>,
}

impl GroupStore {
    /// Creates or opens a group store.
    ///
    /// `encryption_key` is the base64-encoded 32-byte master key.
    pub fn new<P: AsRef<Path>>(db_path: P, encryption_key: &str) -> Result<Self> {
        let key_bytes =
            encryption::validate_key(encryption_key).context("Invalid encryption key")?;

        let conn = Connection::open(db_path).context("Failed to open group database")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS integration_groups (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                service TEXT NOT NULL,
                account_id TEXT,
                access_token TEXT NOT NULL,
                access_token_nonce TEXT NOT NULL,
                refresh_token TEXT,
                refresh_token_nonce TEXT,
                expires_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            )
            "#,
            [],
        )
        .context("Failed to create integration_groups table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_groups_identity
             ON integration_groups(user_id, service, account_id)",
            [],
        )
        .context("Failed to create group index")?;

        Ok(Self {
            conn: Mutex::new(conn),
            encryption_key: key_bytes,
        })
    }

    /// Creates a pre-authorization group row (no tokens yet).
    ///
    /// Called when the OAuth flow starts so the signed state token can carry
    /// a concrete group id.
    pub fn create(&self, user_id: &str, service: &str) -> Result<i64> {
        let (empty_token, nonce) = encryption::encrypt("", &self.encryption_key)
            .context("Failed to encrypt placeholder token")?;
        let now = Utc::now().to_rfc3339();

        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO integration_groups (
                user_id, service, access_token, access_token_nonce,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            "#,
            params![user_id, service, empty_token, nonce, now],
        )
        .context("Failed to create integration group")?;

        Ok(conn.last_insert_rowid())
    }

    /// Fetches and decrypts a live group by id.
    pub fn get(&self, group_id: i64) -> Result<Option<IntegrationGroup>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, user_id, service, account_id,
                       access_token, access_token_nonce,
                       refresh_token, refresh_token_nonce, expires_at
                FROM integration_groups
                WHERE id = ?1 AND deleted_at IS NULL
                "#,
            )
            .context("Failed to prepare group query")?;

        let mut rows = stmt
            .query(params![group_id])
            .context("Failed to query group")?;

        match rows.next().context("Failed to read group row")? {
            Some(row) => Ok(Some(self.decrypt_row(row)?)),
            None => Ok(None),
        }
    }

    /// Completes onboarding: stores tokens and the provider's account id.
    ///
    /// If another live group already exists for the same
    /// `(user_id, service, account_id)` the tokens land on that row, the
    /// placeholder row is soft-deleted, and the existing row's id is
    /// returned. Re-connecting an account therefore never duplicates it.
    pub fn complete_onboarding(
        &self,
        group_id: i64,
        account_id: &str,
        credentials: &Credentials,
    ) -> Result<i64> {
        let group = self
            .get(group_id)?
            .ok_or_else(|| anyhow!("Integration group {} not found", group_id))?;

        let existing_id: Option<i64> = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                r#"
                SELECT id FROM integration_groups
                WHERE user_id = ?1 AND service = ?2 AND account_id = ?3
                  AND deleted_at IS NULL AND id != ?4
                "#,
                params![group.user_id, group.service, account_id, group_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
            .context("Failed to check for existing group")?
        };

        let canonical_id = match existing_id {
            Some(existing) => {
                self.soft_delete(group_id)?;
                existing
            }
            None => group_id,
        };

        self.write_tokens(canonical_id, Some(account_id), credentials)?;
        Ok(canonical_id)
    }

    /// Persists refreshed tokens for a group (store-then-use).
    pub fn update_tokens(&self, group_id: i64, credentials: &Credentials) -> Result<()> {
        self.write_tokens(group_id, None, credentials)
    }

    /// Soft-deletes a group. Returns false when no live row matched.
    pub fn soft_delete(&self, group_id: i64) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE integration_groups SET deleted_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND deleted_at IS NULL",
                params![now, group_id],
            )
            .context("Failed to soft-delete group")?;
        Ok(affected > 0)
    }

    /// Lists all live, authorized groups (used on startup to resume syncing).
    pub fn list_authorized(&self) -> Result<Vec<IntegrationGroup>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, user_id, service, account_id,
                       access_token, access_token_nonce,
                       refresh_token, refresh_token_nonce, expires_at
                FROM integration_groups
                WHERE deleted_at IS NULL
                ORDER BY id
                "#,
            )
            .context("Failed to prepare group listing")?;

        let mut groups = Vec::new();
        let mut rows = stmt.query([]).context("Failed to query groups")?;
        while let Some(row) = rows.next().context("Failed to read group row")? {
            let group = self.decrypt_row(row)?;
            if group.is_authorized() {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    fn write_tokens(
        &self,
        group_id: i64,
        account_id: Option<&str>,
        credentials: &Credentials,
    ) -> Result<()> {
        let (access_encrypted, access_nonce) =
            encryption::encrypt(&credentials.access_token, &self.encryption_key)
                .context("Failed to encrypt access token")?;

        let (refresh_encrypted, refresh_nonce) = match &credentials.refresh_token {
            Some(token) => {
                let (encrypted, nonce) = encryption::encrypt(token, &self.encryption_key)
                    .context("Failed to encrypt refresh token")?;
                (Some(encrypted), Some(nonce))
            }
            None => (None, None),
        };

        let expires_at = credentials.expires_at.map(|dt| dt.to_rfc3339());
        let now = Utc::now().to_rfc3339();

        let affected = self
            .conn
            .lock()
            .unwrap()
            .execute(
                r#"
                UPDATE integration_groups SET
                    account_id = COALESCE(?1, account_id),
                    access_token = ?2,
                    access_token_nonce = ?3,
                    refresh_token = ?4,
                    refresh_token_nonce = ?5,
                    expires_at = ?6,
                    updated_at = ?7
                WHERE id = ?8 AND deleted_at IS NULL
                "#,
                params![
                    account_id,
                    access_encrypted,
                    access_nonce,
                    refresh_encrypted,
                    refresh_nonce,
                    expires_at,
                    now,
                    group_id,
                ],
            )
            .context("Failed to store tokens")?;

        if affected == 0 {
            return Err(anyhow!("Integration group {} not found", group_id));
        }
        Ok(())
    }

    fn decrypt_row(&self, row: &Row<'_>) -> Result<IntegrationGroup> {
        let access_encrypted: String = row.get(4)?;
        let access_nonce: String = row.get(5)?;
        let access_token =
            encryption::decrypt(&access_encrypted, &access_nonce, &self.encryption_key)
                .context("Failed to decrypt access token")?;

        let refresh_encrypted: Option<String> = row.get(6)?;
        let refresh_nonce: Option<String> = row.get(7)?;
        let refresh_token = match (refresh_encrypted, refresh_nonce) {
            (Some(encrypted), Some(nonce)) => Some(
                encryption::decrypt(&encrypted, &nonce, &self.encryption_key)
                    .context("Failed to decrypt refresh token")?,
            ),
            _ => None,
        };

        let expires_at: Option<String> = row.get(8)?;
        let expires_at = expires_at
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
            .transpose()
            .context("Failed to parse expires_at timestamp")?;

        Ok(IntegrationGroup {
            id: row.get(0)?,
            user_id: row.get(1)?,
            service: row.get(2)?,
            account_id: row.get(3)?,
            credentials: Credentials {
                access_token,
                refresh_token,
                expires_at,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use chrono::Duration;

    fn make_store() -> GroupStore {
        let key = BASE64.encode([0u8; 32]);
        GroupStore::new(":memory:", &key).expect("Failed to create test store")
    }

    fn make_credentials() -> Credentials {
        Credentials {
            access_token: "access-12345".to_string(),
            refresh_token: Some("refresh-67890".to_string()),
            expires_at: Some(Utc::now() + Duration::hours(1)),
        }
    }

    #[test]
    fn test_create_and_get() {
        let store = make_store();
        let id = store.create("user1", "oura").unwrap();

        let group = store.get(id).unwrap().unwrap();
        assert_eq!(group.user_id, "user1");
        assert_eq!(group.service, "oura");
        assert!(group.account_id.is_none());
        assert!(!group.is_authorized());
    }

    #[test]
    fn test_onboarding_stores_tokens() {
        let store = make_store();
        let id = store.create("user1", "oura").unwrap();

        let canonical = store
            .complete_onboarding(id, "oura-acct-1", &make_credentials())
            .unwrap();
        assert_eq!(canonical, id);

        let group = store.get(id).unwrap().unwrap();
        assert!(group.is_authorized());
        assert_eq!(group.account_id.as_deref(), Some("oura-acct-1"));
        assert_eq!(group.credentials.access_token, "access-12345");
        assert_eq!(
            group.credentials.refresh_token.as_deref(),
            Some("refresh-67890")
        );
    }

    #[test]
    fn test_reconnect_collapses_onto_existing_group() {
        let store = make_store();
        let first = store.create("user1", "oura").unwrap();
        store
            .complete_onboarding(first, "oura-acct-1", &make_credentials())
            .unwrap();

        // User re-runs the OAuth flow for the same provider account
        let second = store.create("user1", "oura").unwrap();
        let fresh = Credentials {
            access_token: "access-NEW".to_string(),
            refresh_token: None,
            expires_at: None,
        };
        let canonical = store
            .complete_onboarding(second, "oura-acct-1", &fresh)
            .unwrap();

        assert_eq!(canonical, first);
        // Placeholder row is gone, tokens landed on the original
        assert!(store.get(second).unwrap().is_none());
        let group = store.get(first).unwrap().unwrap();
        assert_eq!(group.credentials.access_token, "access-NEW");
    }

    #[test]
    fn test_update_tokens() {
        let store = make_store();
        let id = store.create("user1", "monzo").unwrap();
        store
            .complete_onboarding(id, "acc_1", &make_credentials())
            .unwrap();

        let rotated = Credentials {
            access_token: "rotated".to_string(),
            refresh_token: Some("rotated-refresh".to_string()),
            expires_at: Some(Utc::now() + Duration::hours(6)),
        };
        store.update_tokens(id, &rotated).unwrap();

        let group = store.get(id).unwrap().unwrap();
        assert_eq!(group.credentials.access_token, "rotated");
        // account_id is untouched by token refreshes
        assert_eq!(group.account_id.as_deref(), Some("acc_1"));
    }

    #[test]
    fn test_soft_delete_hides_group() {
        let store = make_store();
        let id = store.create("user1", "outline").unwrap();
        store
            .complete_onboarding(id, "team-1", &make_credentials())
            .unwrap();

        assert!(store.soft_delete(id).unwrap());
        assert!(store.get(id).unwrap().is_none());
        assert!(store.list_authorized().unwrap().is_empty());
        // Second delete is a no-op
        assert!(!store.soft_delete(id).unwrap());
    }

    #[test]
    fn test_list_authorized_skips_placeholders() {
        let store = make_store();
        let pending = store.create("user1", "oura").unwrap();
        let done = store.create("user1", "monzo").unwrap();
        store
            .complete_onboarding(done, "acc_1", &make_credentials())
            .unwrap();

        let groups = store.list_authorized().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, done);
        assert_ne!(groups[0].id, pending);
    }

    #[test]
    fn test_tokens_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("groups.db");
        let key = BASE64.encode([3u8; 32]);

        let id = {
            let store = GroupStore::new(&db_path, &key).unwrap();
            let id = store.create("user1", "oura").unwrap();
            store
                .complete_onboarding(id, "oura-acct-1", &make_credentials())
                .unwrap();
            id
        };

        // A fresh store over the same file decrypts the same tokens
        let reopened = GroupStore::new(&db_path, &key).unwrap();
        let group = reopened.get(id).unwrap().unwrap();
        assert_eq!(group.credentials.access_token, "access-12345");

        // The wrong master key cannot read them
        let wrong_key = BASE64.encode([4u8; 32]);
        let wrong = GroupStore::new(&db_path, &wrong_key).unwrap();
        assert!(wrong.get(id).is_err());
    }

    #[test]
    fn test_expires_within() {
        let mut creds = make_credentials();
        creds.expires_at = Some(Utc::now() + Duration::seconds(30));
        assert!(creds.expires_within(90));

        creds.expires_at = Some(Utc::now() + Duration::hours(2));
        assert!(!creds.expires_within(90));

        creds.expires_at = None;
        assert!(!creds.expires_within(90));
    }
}
