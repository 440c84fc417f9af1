pub mod api;
pub mod normalize;

use crate::error::SyncError;
use crate::http::ApiClient;
use crate::provider::Provider;
use crate::types::{AccountProfile, AuthScheme, Cursor, FetchedPage, SyncContext};
use async_trait::async_trait;
use lifelog::NormalizedRecord;
use serde_json::{json, Value};

use self::api::{
    AuthInfoResponse, DocumentsListResponse, AUTH_INFO_PATH, BASE_URL, DOCUMENTS_LIST_PATH,
    PAGE_LIMIT,
};
use self::normalize::normalize_document;

/// Outline connector — walks the documents collection over `nextPath`
/// tokens and extracts tasks from each document into reconciled blocks.
pub struct OutlineProvider;

impl OutlineProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OutlineProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for OutlineProvider {
    fn service(&self) -> &str {
        "outline"
    }

    fn auth(&self) -> AuthScheme {
        // Outline issues long-lived API tokens, sent as a bearer header
        AuthScheme::ApiKey
    }

    fn instance_types(&self) -> &[&str] {
        &["documents"]
    }

    fn initial_cursor(&self, _ctx: &SyncContext) -> Cursor {
        Cursor::Start
    }

    async fn fetch_page(
        &self,
        client: &ApiClient,
        _ctx: &SyncContext,
        cursor: &Cursor,
    ) -> Result<FetchedPage, SyncError> {
        let path = match cursor {
            Cursor::Start => DOCUMENTS_LIST_PATH.to_string(),
            Cursor::Path { next_path } => next_path.clone(),
            other => {
                return Err(SyncError::Structural(format!(
                    "outline cannot resume from cursor {:?}",
                    other
                )))
            }
        };

        let body = client
            .post_json(&path, &json!({ "limit": PAGE_LIMIT }))
            .await?
            .ok_body()?;
        let response: DocumentsListResponse = serde_json::from_value(body)
            .map_err(|e| SyncError::Structural(format!("bad documents.list response: {}", e)))?;

        // An empty page ends the walk even if a nextPath is present
        let next = if response.data.is_empty() {
            None
        } else {
            response
                .pagination
                .and_then(|p| p.next_path)
                .map(|next_path| Cursor::Path { next_path })
        };

        Ok(FetchedPage {
            items: response.data,
            next,
        })
    }

    fn normalize(&self, ctx: &SyncContext, raw: &Value) -> Result<Option<NormalizedRecord>, SyncError> {
        let doc = serde_json::from_value(raw.clone())
            .map_err(|e| SyncError::ProviderData(format!("bad document: {}", e)))?;
        Ok(Some(normalize_document(ctx, &doc)?))
    }

    async fn fetch_account_profile(&self, client: &ApiClient) -> Result<AccountProfile, SyncError> {
        let body = client.post_json(AUTH_INFO_PATH, &json!({})).await?.ok_body()?;
        let info: AuthInfoResponse = serde_json::from_value(body)
            .map_err(|e| SyncError::Structural(format!("bad auth.info response: {}", e)))?;
        Ok(AccountProfile {
            account_id: info.data.user.id,
            display_name: info.data.user.name,
        })
    }

    fn default_base_url(&self) -> String {
        BASE_URL.to_string()
    }

    /// Self-hosted instances put their URL in the instance config.
    fn base_url(&self, ctx: &SyncContext) -> String {
        ctx.config
            .provider
            .get("base_url")
            .and_then(|v| v.as_str())
            .unwrap_or(BASE_URL)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::AuthHeader;
    use crate::types::IntegrationConfig;
    use chrono::Utc;
    use mockito::Server;

    fn ctx() -> SyncContext {
        SyncContext {
            integration_id: 5,
            user_id: "user1".to_string(),
            instance_type: "documents".to_string(),
            account_id: Some("outline-user".to_string()),
            config: IntegrationConfig::default(),
            now: Utc::now(),
        }
    }

    #[test]
    fn test_base_url_override() {
        let provider = OutlineProvider::new();
        let mut ctx = ctx();
        assert_eq!(provider.base_url(&ctx), BASE_URL);

        ctx.config.provider.insert(
            "base_url".to_string(),
            serde_json::json!("https://notes.example.com"),
        );
        assert_eq!(provider.base_url(&ctx), "https://notes.example.com");
    }

    #[tokio::test]
    async fn test_fetch_page_follows_next_path() {
        let mut server = Server::new_async().await;
        let _first = server
            .mock("POST", "/api/documents.list")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "data": [{"id": "doc1", "title": "A", "text": ""}],
                    "pagination": {"nextPath": "/api/documents.list?offset=25&limit=25"}
                }"#,
            )
            .create_async()
            .await;

        let provider = OutlineProvider::new();
        let client = ApiClient::new("outline", &server.url(), AuthHeader::Bearer("key".into()));

        let page = provider
            .fetch_page(&client, &ctx(), &Cursor::Start)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(
            page.next,
            Some(Cursor::Path {
                next_path: "/api/documents.list?offset=25&limit=25".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_empty_page_terminates_walk() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/documents.list")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "data": [],
                    "pagination": {"nextPath": "/api/documents.list?offset=50&limit=25"}
                }"#,
            )
            .create_async()
            .await;

        let provider = OutlineProvider::new();
        let client = ApiClient::new("outline", &server.url(), AuthHeader::Bearer("key".into()));

        let page = provider
            .fetch_page(&client, &ctx(), &Cursor::Start)
            .await
            .unwrap();
        assert!(page.items.is_empty());
        // nextPath present but the empty page still ends the run
        assert!(page.next.is_none());
    }

    #[tokio::test]
    async fn test_fetch_account_profile() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/auth.info")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data": {"user": {"id": "u-77", "name": "Alice"}}}"#)
            .create_async()
            .await;

        let provider = OutlineProvider::new();
        let client = ApiClient::new("outline", &server.url(), AuthHeader::Bearer("key".into()));
        let profile = provider.fetch_account_profile(&client).await.unwrap();
        assert_eq!(profile.account_id, "u-77");
        assert_eq!(profile.display_name.as_deref(), Some("Alice"));
    }
}
