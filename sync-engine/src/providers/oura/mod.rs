pub mod api;
pub mod normalize;

use crate::error::SyncError;
use crate::http::ApiClient;
use crate::provider::Provider;
use crate::types::{AccountProfile, AuthScheme, Cursor, FetchedPage, OAuthConfig, SyncContext};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use lifelog::NormalizedRecord;
use serde_json::Value;

use self::api::{
    endpoint_for, is_intraday, PersonalInfo, AUTH_URL, BASE_URL, INTRADAY_WINDOW_HOURS, SCOPES,
    TOKEN_URL, WINDOW_DAYS,
};
use self::normalize::{
    normalize_daily_activity, normalize_daily_sleep, normalize_heart_rate, normalize_sleep_record,
};

/// Oura Ring connector — daily activity and sleep summaries plus individual
/// sleep records, paged over date windows; intraday heart rate paged over
/// datetime windows.
pub struct OuraProvider {
    base_url: String,
}

impl OuraProvider {
    /// Create a connector using the real Oura API base URL.
    pub fn new() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
        }
    }

    /// Create a connector with a custom API base URL (for testing).
    pub fn with_base_url(base_url: String) -> Self {
        Self { base_url }
    }

    /// Shifts a finished window forward. The next window starts the day
    /// after the previous one ended and never reaches past today.
    fn advance_window(end: NaiveDate, today: NaiveDate) -> Option<Cursor> {
        if end >= today {
            return None;
        }
        let start = end + Duration::days(1);
        Some(Cursor::DateWindow {
            start,
            end: (start + Duration::days(WINDOW_DAYS)).min(today),
        })
    }

    /// Datetime-window variant for intraday series.
    fn advance_intraday_window(end: DateTime<Utc>, now: DateTime<Utc>) -> Option<Cursor> {
        if end >= now {
            return None;
        }
        Some(Cursor::DateTimeWindow {
            start: end,
            end: (end + Duration::hours(INTRADAY_WINDOW_HOURS)).min(now),
        })
    }
}

impl Default for OuraProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for OuraProvider {
    fn service(&self) -> &str {
        "oura"
    }

    fn auth(&self) -> AuthScheme {
        AuthScheme::OAuth(OAuthConfig {
            auth_url: AUTH_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            scopes: SCOPES.iter().map(|s| s.to_string()).collect(),
            pkce: false,
        })
    }

    fn instance_types(&self) -> &[&str] {
        &["daily_activity", "daily_sleep", "sleep_records", "heart_rate"]
    }

    fn initial_cursor(&self, ctx: &SyncContext) -> Cursor {
        if is_intraday(&ctx.instance_type) {
            let start = ctx.now - Duration::days(ctx.config.days_back);
            return Cursor::DateTimeWindow {
                start,
                end: (start + Duration::hours(INTRADAY_WINDOW_HOURS)).min(ctx.now),
            };
        }
        let today = ctx.now.date_naive();
        let start = today - Duration::days(ctx.config.days_back);
        Cursor::DateWindow {
            start,
            end: (start + Duration::days(WINDOW_DAYS)).min(today),
        }
    }

    async fn fetch_page(
        &self,
        client: &ApiClient,
        ctx: &SyncContext,
        cursor: &Cursor,
    ) -> Result<FetchedPage, SyncError> {
        let endpoint = endpoint_for(&ctx.instance_type)?;

        // Daily resources page over date windows, intraday series over
        // datetime windows
        let (query, next) = match cursor {
            Cursor::DateWindow { start, end } => (
                vec![
                    ("start_date", start.format("%Y-%m-%d").to_string()),
                    ("end_date", end.format("%Y-%m-%d").to_string()),
                ],
                Self::advance_window(*end, ctx.now.date_naive()),
            ),
            Cursor::DateTimeWindow { start, end } => (
                vec![
                    ("start_datetime", start.to_rfc3339()),
                    ("end_datetime", end.to_rfc3339()),
                ],
                Self::advance_intraday_window(*end, ctx.now),
            ),
            other => {
                return Err(SyncError::Structural(format!(
                    "oura cannot resume from cursor {:?}",
                    other
                )))
            }
        };

        let body = client.get(endpoint, &query).await?.ok_body()?;

        let items = body["data"]
            .as_array()
            .cloned()
            .ok_or_else(|| SyncError::Structural("response is missing 'data' array".to_string()))?;

        Ok(FetchedPage { items, next })
    }

    fn normalize(&self, ctx: &SyncContext, raw: &Value) -> Result<Option<NormalizedRecord>, SyncError> {
        let record = match ctx.instance_type.as_str() {
            "daily_activity" => {
                let activity = serde_json::from_value(raw.clone())
                    .map_err(|e| SyncError::ProviderData(format!("bad daily_activity: {}", e)))?;
                normalize_daily_activity(ctx, &activity)?
            }
            "daily_sleep" => {
                let sleep = serde_json::from_value(raw.clone())
                    .map_err(|e| SyncError::ProviderData(format!("bad daily_sleep: {}", e)))?;
                normalize_daily_sleep(ctx, &sleep)?
            }
            "sleep_records" => {
                let record = serde_json::from_value(raw.clone())
                    .map_err(|e| SyncError::ProviderData(format!("bad sleep record: {}", e)))?;
                normalize_sleep_record(ctx, &record)?
            }
            "heart_rate" => {
                let sample = serde_json::from_value(raw.clone())
                    .map_err(|e| SyncError::ProviderData(format!("bad heart rate sample: {}", e)))?;
                normalize_heart_rate(ctx, &sample)?
            }
            other => {
                return Err(SyncError::Structural(format!(
                    "unknown oura instance type '{}'",
                    other
                )))
            }
        };
        Ok(Some(record))
    }

    async fn fetch_account_profile(&self, client: &ApiClient) -> Result<AccountProfile, SyncError> {
        let body = client
            .get("/v2/usercollection/personal_info", &[])
            .await?
            .ok_body()?;
        let info: PersonalInfo = serde_json::from_value(body)
            .map_err(|e| SyncError::Structural(format!("bad personal_info response: {}", e)))?;
        Ok(AccountProfile {
            account_id: info.id,
            display_name: info.email,
        })
    }

    fn default_base_url(&self) -> String {
        self.base_url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::AuthHeader;
    use crate::types::IntegrationConfig;
    use chrono::{TimeZone, Utc};
    use mockito::Server;

    fn ctx_at(now: chrono::DateTime<Utc>, instance_type: &str) -> SyncContext {
        SyncContext {
            integration_id: 3,
            user_id: "user1".to_string(),
            instance_type: instance_type.to_string(),
            account_id: Some("oura-acct".to_string()),
            config: IntegrationConfig::default(),
            now,
        }
    }

    #[test]
    fn test_provider_metadata() {
        let provider = OuraProvider::new();
        assert_eq!(provider.service(), "oura");
        assert_eq!(provider.instance_types().len(), 4);
        match provider.auth() {
            AuthScheme::OAuth(config) => {
                assert!(config.auth_url.contains("ouraring.com"));
                assert!(!config.pkce);
            }
            AuthScheme::ApiKey => panic!("oura is an OAuth provider"),
        }
    }

    #[test]
    fn test_initial_cursor_spans_days_back() {
        let provider = OuraProvider::new();
        let now = Utc.with_ymd_and_hms(2025, 1, 27, 12, 0, 0).unwrap();
        let mut ctx = ctx_at(now, "daily_activity");
        ctx.config.days_back = 10;

        match provider.initial_cursor(&ctx) {
            Cursor::DateWindow { start, end } => {
                assert_eq!(start, NaiveDate::from_ymd_opt(2025, 1, 17).unwrap());
                // 10 days back fits inside one window, capped at today
                assert_eq!(end, NaiveDate::from_ymd_opt(2025, 1, 27).unwrap());
            }
            other => panic!("expected date window, got {:?}", other),
        }
    }

    #[test]
    fn test_window_advances_until_today() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();

        // Window ending before today shifts forward
        let next =
            OuraProvider::advance_window(NaiveDate::from_ymd_opt(2025, 1, 30).unwrap(), today);
        match next {
            Some(Cursor::DateWindow { start, end }) => {
                assert_eq!(start, NaiveDate::from_ymd_opt(2025, 1, 31).unwrap());
                assert_eq!(end, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
            }
            other => panic!("expected next window, got {:?}", other),
        }

        // Window reaching today ends the run
        assert!(OuraProvider::advance_window(today, today).is_none());
    }

    #[test]
    fn test_intraday_cursor_uses_datetime_windows() {
        let provider = OuraProvider::new();
        let now = Utc.with_ymd_and_hms(2025, 1, 27, 12, 0, 0).unwrap();
        let mut ctx = ctx_at(now, "heart_rate");
        ctx.config.days_back = 2;

        let first = match provider.initial_cursor(&ctx) {
            Cursor::DateTimeWindow { start, end } => {
                assert_eq!(start, Utc.with_ymd_and_hms(2025, 1, 25, 12, 0, 0).unwrap());
                assert_eq!(end, Utc.with_ymd_and_hms(2025, 1, 26, 12, 0, 0).unwrap());
                end
            }
            other => panic!("expected datetime window, got {:?}", other),
        };

        // Advances in 24h slices, capped at now
        match OuraProvider::advance_intraday_window(first, now) {
            Some(Cursor::DateTimeWindow { start, end }) => {
                assert_eq!(start, first);
                assert_eq!(end, now);
            }
            other => panic!("expected next window, got {:?}", other),
        }
        assert!(OuraProvider::advance_intraday_window(now, now).is_none());
    }

    #[tokio::test]
    async fn test_fetch_page_requests_window() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/v2/usercollection/daily_activity")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("start_date".into(), "2025-01-01".into()),
                mockito::Matcher::UrlEncoded("end_date".into(), "2025-01-30".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"data": [{"day": "2025-01-27", "score": 82, "contributors": {"stay_active": 80}, "steps": 10432}], "next_token": null}"#,
            )
            .create_async()
            .await;

        let provider = OuraProvider::new();
        let now = Utc.with_ymd_and_hms(2025, 2, 15, 8, 0, 0).unwrap();
        let ctx = ctx_at(now, "daily_activity");
        let client = ApiClient::new("oura", &server.url(), AuthHeader::Bearer("tok".into()));

        let cursor = Cursor::DateWindow {
            start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2025, 1, 30).unwrap(),
        };
        let page = provider.fetch_page(&client, &ctx, &cursor).await.unwrap();

        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0]["day"], "2025-01-27");
        // More history remains before 2025-02-15
        match page.next {
            Some(Cursor::DateWindow { start, .. }) => {
                assert_eq!(start, NaiveDate::from_ymd_opt(2025, 1, 31).unwrap());
            }
            other => panic!("expected next window, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_account_profile() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/v2/usercollection/personal_info")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": "abc-123", "age": 33, "email": "user@example.com"}"#)
            .create_async()
            .await;

        let provider = OuraProvider::new();
        let client = ApiClient::new("oura", &server.url(), AuthHeader::Bearer("tok".into()));
        let profile = provider.fetch_account_profile(&client).await.unwrap();
        assert_eq!(profile.account_id, "abc-123");
        assert_eq!(profile.display_name.as_deref(), Some("user@example.com"));
    }
}
