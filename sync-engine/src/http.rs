//! Outbound HTTP wrapper.
//!
//! Every provider call goes through [`ApiClient`]: it attaches the resolved
//! credential, bounds connect/total time, retries network-level failures a
//! small fixed number of times, and passes request and response through the
//! sanitizing logger. Throttling and auth rejection are mapped onto the
//! error taxonomy for the caller to handle — the wrapper never sleeps on a
//! 429, since deferral is the paginator's job.

use crate::error::SyncError;
use lifelog::logging;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

/// Connect timeout for provider calls.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Total per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(25);

/// Bounded retries for network-level failures (not HTTP statuses).
const TRANSIENT_RETRIES: u32 = 2;

/// Fixed delay between transient retries.
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Credential attached to every request.
#[derive(Clone, Debug)]
pub enum AuthHeader {
    /// `Authorization: Bearer <token>` (OAuth tokens and bearer-style keys)
    Bearer(String),
    /// A custom header, e.g. `X-API-Key`
    Header { name: String, value: String },
    /// Unauthenticated (used for public endpoints and some profile calls)
    None,
}

/// Response handed back to providers: status plus parsed JSON body.
#[derive(Clone, Debug)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body on 2xx, [`SyncError::Structural`] otherwise. For providers where
    /// any non-2xx (past the 429/401 mapping) is fatal for the page.
    pub fn ok_body(self) -> Result<Value, SyncError> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(SyncError::Structural(format!(
                "unexpected status {}: {}",
                self.status,
                logging::truncate_body(&self.body.to_string())
            )))
        }
    }
}

/// HTTP client bound to one provider + credential.
pub struct ApiClient {
    http: reqwest::Client,
    service: String,
    base_url: String,
    auth: AuthHeader,
    integration_id: Option<i64>,
}

impl ApiClient {
    pub fn new(service: &str, base_url: &str, auth: AuthHeader) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .user_agent("lifelog-sync/0.1")
            .build()
            .expect("Failed to build HTTP client");
        Self {
            http,
            service: service.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            integration_id: None,
        }
    }

    /// Tags requests with the integration they serve, for log correlation.
    pub fn for_integration(mut self, integration_id: i64) -> Self {
        self.integration_id = Some(integration_id);
        self
    }

    /// GET `base_url + path` with query parameters.
    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<ApiResponse, SyncError> {
        self.request(reqwest::Method::GET, path, query, None).await
    }

    /// POST `base_url + path` with a JSON body.
    pub async fn post_json(&self, path: &str, body: &Value) -> Result<ApiResponse, SyncError> {
        self.request(reqwest::Method::POST, path, &[], Some(body)).await
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<ApiResponse, SyncError> {
        let url = format!("{}{}", self.base_url, path);

        logging::log_request(
            &self.service,
            method.as_str(),
            path,
            &self.logged_headers(),
            body,
            self.integration_id,
        );

        let mut last_error = None;
        for attempt in 0..=TRANSIENT_RETRIES {
            let mut builder = self.http.request(method.clone(), &url);
            builder = match &self.auth {
                AuthHeader::Bearer(token) => builder.bearer_auth(token),
                AuthHeader::Header { name, value } => builder.header(name.as_str(), value.as_str()),
                AuthHeader::None => builder,
            };
            builder = builder.header("Accept", "application/json");
            if !query.is_empty() {
                builder = builder.query(query);
            }
            if let Some(body) = body {
                builder = builder.json(body);
            }

            match builder.send().await {
                Ok(response) => return self.handle_response(path, response).await,
                Err(e) => {
                    warn!(
                        service = %self.service,
                        endpoint = %path,
                        attempt = attempt + 1,
                        error = %e,
                        "Request failed at network level"
                    );
                    last_error = Some(e);
                    if attempt < TRANSIENT_RETRIES {
                        tokio::time::sleep(RETRY_BACKOFF).await;
                    }
                }
            }
        }

        Err(SyncError::Transient(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "request failed".to_string()),
        ))
    }

    async fn handle_response(
        &self,
        path: &str,
        response: reqwest::Response,
    ) -> Result<ApiResponse, SyncError> {
        let status = response.status();
        let retry_after = parse_retry_after(&response);

        let text = response
            .text()
            .await
            .map_err(|e| SyncError::Transient(format!("failed to read response body: {}", e)))?;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        logging::log_response(
            &self.service,
            path,
            status.as_u16(),
            Some(&body),
            self.integration_id,
        );

        match status {
            StatusCode::TOO_MANY_REQUESTS => Err(SyncError::RateLimited { retry_after }),
            StatusCode::UNAUTHORIZED => Err(SyncError::AuthExpired {
                service: self.service.clone(),
            }),
            _ => Ok(ApiResponse {
                status: status.as_u16(),
                body,
            }),
        }
    }

    fn logged_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![("Accept".to_string(), "application/json".to_string())];
        match &self.auth {
            AuthHeader::Bearer(token) => {
                headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
            }
            AuthHeader::Header { name, value } => {
                headers.push((name.clone(), value.clone()));
            }
            AuthHeader::None => {}
        }
        headers
    }
}

fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[tokio::test]
    async fn test_success_returns_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/v2/usercollection/daily_activity")
            .match_query(mockito::Matcher::UrlEncoded(
                "start_date".into(),
                "2025-01-01".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data": [{"day": "2025-01-01"}]}"#)
            .create_async()
            .await;

        let client = ApiClient::new("oura", &server.url(), AuthHeader::Bearer("tok".into()));
        let response = client
            .get(
                "/v2/usercollection/daily_activity",
                &[("start_date", "2025-01-01".to_string())],
            )
            .await
            .unwrap();

        assert!(response.is_success());
        assert_eq!(response.body["data"][0]["day"], "2025-01-01");
    }

    #[tokio::test]
    async fn test_429_maps_to_rate_limited_with_retry_after() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/accounts")
            .with_status(429)
            .with_header("Retry-After", "30")
            .with_body(r#"{"error": "rate_limited"}"#)
            .create_async()
            .await;

        let client = ApiClient::new("monzo", &server.url(), AuthHeader::Bearer("tok".into()));
        let err = client.get("/accounts", &[]).await.unwrap_err();
        match err {
            SyncError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_secs(30)));
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_429_without_header() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/accounts")
            .with_status(429)
            .create_async()
            .await;

        let client = ApiClient::new("monzo", &server.url(), AuthHeader::Bearer("tok".into()));
        match client.get("/accounts", &[]).await.unwrap_err() {
            SyncError::RateLimited { retry_after } => assert!(retry_after.is_none()),
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_401_maps_to_auth_expired() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/ping/whoami")
            .with_status(401)
            .with_body(r#"{"error": "unauthorized"}"#)
            .create_async()
            .await;

        let client = ApiClient::new("monzo", &server.url(), AuthHeader::Bearer("bad".into()));
        assert!(matches!(
            client.get("/ping/whoami", &[]).await.unwrap_err(),
            SyncError::AuthExpired { .. }
        ));
    }

    #[tokio::test]
    async fn test_other_statuses_returned_to_caller() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .with_body(r#"{"error": "not_found"}"#)
            .create_async()
            .await;

        let client = ApiClient::new("oura", &server.url(), AuthHeader::None);
        let response = client.get("/missing", &[]).await.unwrap();
        assert_eq!(response.status, 404);
        assert!(response.ok_body().is_err());
    }

    #[tokio::test]
    async fn test_custom_auth_header() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/data")
            .match_header("x-api-key", "key-123")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client = ApiClient::new(
            "generic",
            &server.url(),
            AuthHeader::Header {
                name: "X-API-Key".to_string(),
                value: "key-123".to_string(),
            },
        );
        assert!(client.get("/data", &[]).await.unwrap().is_success());
    }
}
