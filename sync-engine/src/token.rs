//! OAuth token lifecycle.
//!
//! [`TokenRefresher`] is invoked lazily before authenticated calls: if the
//! group's access token is near expiry it exchanges the refresh token for a
//! fresh one, persists it (store-then-use, so concurrent instances racing on
//! a just-expired token both end up with a usable one), and returns it.
//! Refresh failure is fatal for the run and surfaces as "reconnect
//! required" — it is never retried automatically.
//!
//! Client credentials come from the environment:
//! `LIFELOG_OAUTH_{SERVICE}_CLIENT_ID` / `LIFELOG_OAUTH_{SERVICE}_CLIENT_SECRET`.

use crate::error::SyncError;
use crate::provider::Provider;
use crate::types::AuthScheme;
use chrono::Utc;
use lifelog::credentials::{Credentials, IntegrationGroup};
use lifelog::{logging, GroupStore};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Refresh when the token expires within this many seconds.
const REFRESH_THRESHOLD_SECS: i64 = 90;

/// Standard OAuth 2.0 token endpoint response.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

pub struct TokenRefresher {
    http: reqwest::Client,
    groups: Arc<GroupStore>,
}

impl TokenRefresher {
    pub fn new(groups: Arc<GroupStore>) -> Self {
        Self {
            http: reqwest::Client::new(),
            groups,
        }
    }

    /// Returns usable credentials for the group, refreshing first when the
    /// access token is expired or about to expire.
    pub async fn ensure_valid(
        &self,
        provider: &dyn Provider,
        group: &IntegrationGroup,
    ) -> Result<Credentials, SyncError> {
        if !group.is_authorized() {
            return Err(SyncError::MissingCredentials {
                service: provider.service().to_string(),
            });
        }

        let token_url = match provider.auth() {
            // API keys have no refresh lifecycle
            AuthScheme::ApiKey => return Ok(group.credentials.clone()),
            AuthScheme::OAuth(config) => config.token_url,
        };

        if !group.credentials.expires_within(REFRESH_THRESHOLD_SECS) {
            return Ok(group.credentials.clone());
        }

        match &group.credentials.refresh_token {
            Some(_) => self.refresh(provider, group, &token_url).await,
            None => Err(SyncError::AuthRefreshFailed {
                service: provider.service().to_string(),
                reason: "token expired and no refresh token stored".to_string(),
            }),
        }
    }

    /// Unconditionally exchanges the refresh token, persisting the result
    /// before returning it. Used when the provider rejects a token that
    /// looked valid by timestamp.
    pub async fn force_refresh(
        &self,
        provider: &dyn Provider,
        group: &IntegrationGroup,
    ) -> Result<Credentials, SyncError> {
        let token_url = match provider.auth() {
            AuthScheme::OAuth(config) => config.token_url,
            AuthScheme::ApiKey => {
                return Err(SyncError::AuthRefreshFailed {
                    service: provider.service().to_string(),
                    reason: "API key rejected; reconnect required".to_string(),
                })
            }
        };
        if group.credentials.refresh_token.is_none() {
            return Err(SyncError::AuthRefreshFailed {
                service: provider.service().to_string(),
                reason: "no refresh token stored".to_string(),
            });
        }
        self.refresh(provider, group, &token_url).await
    }

    async fn refresh(
        &self,
        provider: &dyn Provider,
        group: &IntegrationGroup,
        token_url: &str,
    ) -> Result<Credentials, SyncError> {
        let service = provider.service();
        let refresh_token = group
            .credentials
            .refresh_token
            .clone()
            .ok_or_else(|| SyncError::AuthRefreshFailed {
                service: service.to_string(),
                reason: "no refresh token stored".to_string(),
            })?;

        let mut form: HashMap<&str, String> = HashMap::new();
        form.insert("grant_type", "refresh_token".to_string());
        form.insert("refresh_token", refresh_token);
        let (client_id, client_secret) = client_credentials_from_env(service);
        if let Some(client_id) = client_id {
            form.insert("client_id", client_id);
        }
        if let Some(client_secret) = client_secret {
            form.insert("client_secret", client_secret);
        }

        info!(service = %service, group_id = group.id, "Refreshing OAuth token");

        let token_response = self
            .token_call(service, token_url, &form)
            .await
            .map_err(|e| match e {
                SyncError::Transient(reason) => SyncError::AuthRefreshFailed {
                    service: service.to_string(),
                    reason,
                },
                other => other,
            })?;

        // Keep the old refresh token when the provider did not rotate it
        let credentials = Credentials {
            access_token: token_response.access_token,
            refresh_token: token_response
                .refresh_token
                .or_else(|| group.credentials.refresh_token.clone()),
            expires_at: token_response
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        };

        // Store-then-use: never hand out a token that was not persisted
        self.groups
            .update_tokens(group.id, &credentials)
            .map_err(SyncError::Storage)?;

        info!(service = %service, group_id = group.id, "OAuth token refreshed");
        Ok(credentials)
    }

    /// Exchanges an authorization code for tokens (OAuth callback path).
    /// Persistence is the caller's job — onboarding decides which group row
    /// the tokens land on.
    pub async fn exchange_code(
        &self,
        provider: &dyn Provider,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<Credentials, SyncError> {
        let service = provider.service();
        let token_url = match provider.auth() {
            AuthScheme::OAuth(config) => config.token_url,
            AuthScheme::ApiKey => {
                return Err(SyncError::Structural(format!(
                    "{} does not use an OAuth code flow",
                    service
                )))
            }
        };

        let mut form: HashMap<&str, String> = HashMap::new();
        form.insert("grant_type", "authorization_code".to_string());
        form.insert("code", code.to_string());
        form.insert("redirect_uri", redirect_uri.to_string());
        let (client_id, client_secret) = client_credentials_from_env(service);
        if let Some(client_id) = client_id {
            form.insert("client_id", client_id);
        }
        if let Some(client_secret) = client_secret {
            form.insert("client_secret", client_secret);
        }
        if let Some(verifier) = code_verifier {
            form.insert("code_verifier", verifier.to_string());
        }

        let token_response = self
            .token_call(service, &token_url, &form)
            .await
            .map_err(|e| match e {
                SyncError::Transient(reason) => SyncError::AuthRefreshFailed {
                    service: service.to_string(),
                    reason,
                },
                other => other,
            })?;

        Ok(Credentials {
            access_token: token_response.access_token,
            refresh_token: token_response.refresh_token,
            expires_at: token_response
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        })
    }

    /// One form-encoded POST against a token endpoint, logged sanitized on
    /// both sides.
    async fn token_call(
        &self,
        service: &str,
        token_url: &str,
        form: &HashMap<&str, String>,
    ) -> Result<TokenResponse, SyncError> {
        let form_as_json: serde_json::Value = form
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.clone())))
            .collect::<serde_json::Map<_, _>>()
            .into();
        logging::log_request(service, "POST", token_url, &[], Some(&form_as_json), None);

        let response = self
            .http
            .post(token_url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| SyncError::Transient(format!("token request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SyncError::Transient(format!("failed to read token response: {}", e)))?;
        let body: serde_json::Value = serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);
        logging::log_response(service, token_url, status.as_u16(), Some(&body), None);

        if !status.is_success() {
            return Err(SyncError::AuthRefreshFailed {
                service: service.to_string(),
                reason: format!("token endpoint returned {}", status),
            });
        }

        serde_json::from_value(body).map_err(|e| SyncError::AuthRefreshFailed {
            service: service.to_string(),
            reason: format!("unparseable token response: {}", e),
        })
    }
}

fn client_credentials_from_env(service: &str) -> (Option<String>, Option<String>) {
    let prefix = service.to_uppercase();
    (
        std::env::var(format!("LIFELOG_OAUTH_{}_CLIENT_ID", prefix)).ok(),
        std::env::var(format!("LIFELOG_OAUTH_{}_CLIENT_SECRET", prefix)).ok(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ApiClient;
    use crate::types::{AccountProfile, Cursor, FetchedPage, OAuthConfig, SyncContext};
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use chrono::Duration;
    use lifelog::NormalizedRecord;

    /// Provider whose token endpoint can point at a mock server.
    struct FakeOAuthProvider {
        token_url: String,
    }

    #[async_trait]
    impl Provider for FakeOAuthProvider {
        fn service(&self) -> &str {
            "fakeservice"
        }
        fn auth(&self) -> AuthScheme {
            AuthScheme::OAuth(OAuthConfig {
                auth_url: "https://example.com/authorize".to_string(),
                token_url: self.token_url.clone(),
                scopes: vec![],
                pkce: false,
            })
        }
        fn instance_types(&self) -> &[&str] {
            &["things"]
        }
        fn initial_cursor(&self, _: &SyncContext) -> Cursor {
            Cursor::Start
        }
        async fn fetch_page(
            &self,
            _: &ApiClient,
            _: &SyncContext,
            _: &Cursor,
        ) -> Result<FetchedPage, SyncError> {
            Ok(FetchedPage {
                items: vec![],
                next: None,
            })
        }
        fn normalize(
            &self,
            _: &SyncContext,
            _: &serde_json::Value,
        ) -> Result<Option<NormalizedRecord>, SyncError> {
            Ok(None)
        }
        async fn fetch_account_profile(&self, _: &ApiClient) -> Result<AccountProfile, SyncError> {
            Ok(AccountProfile {
                account_id: "acct".to_string(),
                display_name: None,
            })
        }
        fn default_base_url(&self) -> String {
            "https://example.com".to_string()
        }
    }

    fn make_groups() -> Arc<GroupStore> {
        let key = BASE64.encode([0u8; 32]);
        Arc::new(GroupStore::new(":memory:", &key).unwrap())
    }

    fn onboarded_group(groups: &GroupStore, expires_in_secs: i64) -> IntegrationGroup {
        let id = groups.create("user1", "fakeservice").unwrap();
        groups
            .complete_onboarding(
                id,
                "acct-1",
                &Credentials {
                    access_token: "old-access".to_string(),
                    refresh_token: Some("my-refresh".to_string()),
                    expires_at: Some(Utc::now() + Duration::seconds(expires_in_secs)),
                },
            )
            .unwrap();
        groups.get(id).unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_valid_token_is_reused() {
        let groups = make_groups();
        let group = onboarded_group(&groups, 3600);
        let refresher = TokenRefresher::new(Arc::clone(&groups));
        let provider = FakeOAuthProvider {
            token_url: "http://localhost:1/token".to_string(),
        };

        // Far from expiry: no refresh call is attempted (the dead endpoint
        // would fail if it were)
        let creds = refresher.ensure_valid(&provider, &group).await.unwrap();
        assert_eq!(creds.access_token, "old-access");
    }

    #[tokio::test]
    async fn test_expiring_token_is_refreshed_and_persisted() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"new-access","expires_in":3600}"#)
            .create_async()
            .await;

        let groups = make_groups();
        let group = onboarded_group(&groups, 30);
        let refresher = TokenRefresher::new(Arc::clone(&groups));
        let provider = FakeOAuthProvider {
            token_url: format!("{}/token", server.url()),
        };

        let creds = refresher.ensure_valid(&provider, &group).await.unwrap();
        assert_eq!(creds.access_token, "new-access");
        // Provider did not rotate the refresh token — the old one is kept
        assert_eq!(creds.refresh_token.as_deref(), Some("my-refresh"));

        // Store-then-use: the new token is already persisted
        let stored = groups.get(group.id).unwrap().unwrap();
        assert_eq!(stored.credentials.access_token, "new-access");

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_refresh_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let groups = make_groups();
        let group = onboarded_group(&groups, 30);
        let refresher = TokenRefresher::new(Arc::clone(&groups));
        let provider = FakeOAuthProvider {
            token_url: format!("{}/token", server.url()),
        };

        let err = refresher.ensure_valid(&provider, &group).await.unwrap_err();
        assert!(matches!(err, SyncError::AuthRefreshFailed { .. }));

        // Old credentials are untouched after the failed refresh
        let stored = groups.get(group.id).unwrap().unwrap();
        assert_eq!(stored.credentials.access_token, "old-access");
    }

    #[tokio::test]
    async fn test_unauthorized_group_is_missing_credentials() {
        let groups = make_groups();
        let id = groups.create("user1", "fakeservice").unwrap();
        let group = groups.get(id).unwrap().unwrap();

        let refresher = TokenRefresher::new(Arc::clone(&groups));
        let provider = FakeOAuthProvider {
            token_url: "http://localhost:1/token".to_string(),
        };

        assert!(matches!(
            refresher.ensure_valid(&provider, &group).await.unwrap_err(),
            SyncError::MissingCredentials { .. }
        ));
    }
}
