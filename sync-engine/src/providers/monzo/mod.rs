pub mod api;
pub mod normalize;

use crate::error::SyncError;
use crate::http::ApiClient;
use crate::provider::Provider;
use crate::types::{AccountProfile, AuthScheme, Cursor, FetchedPage, OAuthConfig, SyncContext};
use async_trait::async_trait;
use lifelog::NormalizedRecord;
use serde_json::{json, Value};

use self::api::{
    Account, AccountsResponse, WhoAmI, AUTH_URL, BASE_URL, TOKEN_URL, TRANSACTION_PAGE_LIMIT,
};
use self::normalize::{normalize_balance, normalize_transaction};

/// Monzo connector — daily balance snapshots and transactions, iterating
/// every open account and paging each until an empty page.
pub struct MonzoProvider {
    base_url: String,
}

impl MonzoProvider {
    /// Create a connector using the real Monzo API base URL.
    pub fn new() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
        }
    }

    /// Create a connector with a custom API base URL (for testing).
    pub fn with_base_url(base_url: String) -> Self {
        Self { base_url }
    }

    async fn fetch_accounts(&self, client: &ApiClient) -> Result<Vec<Account>, SyncError> {
        let body = client.get("/accounts", &[]).await?.ok_body()?;
        let response: AccountsResponse = serde_json::from_value(body)
            .map_err(|e| SyncError::Structural(format!("bad accounts response: {}", e)))?;
        Ok(response.accounts.into_iter().filter(|a| !a.closed).collect())
    }
}

impl Default for MonzoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MonzoProvider {
    fn service(&self) -> &str {
        "monzo"
    }

    fn auth(&self) -> AuthScheme {
        AuthScheme::OAuth(OAuthConfig {
            auth_url: AUTH_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            scopes: vec![],
            pkce: false,
        })
    }

    fn instance_types(&self) -> &[&str] {
        &["balance", "transactions"]
    }

    fn initial_cursor(&self, _ctx: &SyncContext) -> Cursor {
        Cursor::Indexed { index: 0, page: 0 }
    }

    async fn fetch_page(
        &self,
        client: &ApiClient,
        ctx: &SyncContext,
        cursor: &Cursor,
    ) -> Result<FetchedPage, SyncError> {
        let (index, page) = match cursor {
            Cursor::Indexed { index, page } => (*index, *page),
            other => {
                return Err(SyncError::Structural(format!(
                    "monzo cannot resume from cursor {:?}",
                    other
                )))
            }
        };

        let accounts = self.fetch_accounts(client).await?;
        if index >= accounts.len() {
            return Ok(FetchedPage {
                items: vec![],
                next: None,
            });
        }
        let account = &accounts[index];

        match ctx.instance_type.as_str() {
            "balance" => {
                // One snapshot per account; page is unused
                let balance = client
                    .get("/balance", &[("account_id", account.id.clone())])
                    .await?
                    .ok_body()?;
                let item = json!({
                    "account": { "id": account.id, "description": account.description },
                    "balance": balance,
                });
                let next = (index + 1 < accounts.len())
                    .then_some(Cursor::Indexed { index: index + 1, page: 0 });
                Ok(FetchedPage {
                    items: vec![item],
                    next,
                })
            }
            "transactions" => {
                let body = client
                    .get(
                        "/transactions",
                        &[
                            ("account_id", account.id.clone()),
                            ("limit", TRANSACTION_PAGE_LIMIT.to_string()),
                            ("offset", (page as usize * TRANSACTION_PAGE_LIMIT).to_string()),
                        ],
                    )
                    .await?
                    .ok_body()?;
                let transactions = body["transactions"].as_array().cloned().ok_or_else(|| {
                    SyncError::Structural("response is missing 'transactions' array".to_string())
                })?;

                // Full page → keep paging this account; short page → next one
                let next = if transactions.len() == TRANSACTION_PAGE_LIMIT {
                    Some(Cursor::Indexed {
                        index,
                        page: page + 1,
                    })
                } else if index + 1 < accounts.len() {
                    Some(Cursor::Indexed {
                        index: index + 1,
                        page: 0,
                    })
                } else {
                    None
                };

                Ok(FetchedPage {
                    items: transactions,
                    next,
                })
            }
            other => Err(SyncError::Structural(format!(
                "unknown monzo instance type '{}'",
                other
            ))),
        }
    }

    fn normalize(&self, ctx: &SyncContext, raw: &Value) -> Result<Option<NormalizedRecord>, SyncError> {
        match ctx.instance_type.as_str() {
            "balance" => {
                let account: Account = serde_json::from_value(raw["account"].clone())
                    .map_err(|e| SyncError::ProviderData(format!("bad balance account: {}", e)))?;
                let balance = serde_json::from_value(raw["balance"].clone())
                    .map_err(|e| SyncError::ProviderData(format!("bad balance: {}", e)))?;
                Ok(Some(normalize_balance(ctx, &account, &balance)?))
            }
            "transactions" => {
                let tx = serde_json::from_value(raw.clone())
                    .map_err(|e| SyncError::ProviderData(format!("bad transaction: {}", e)))?;
                Ok(Some(normalize_transaction(ctx, &tx)?))
            }
            other => Err(SyncError::Structural(format!(
                "unknown monzo instance type '{}'",
                other
            ))),
        }
    }

    async fn fetch_account_profile(&self, client: &ApiClient) -> Result<AccountProfile, SyncError> {
        let body = client.get("/ping/whoami", &[]).await?.ok_body()?;
        let whoami: WhoAmI = serde_json::from_value(body)
            .map_err(|e| SyncError::Structural(format!("bad whoami response: {}", e)))?;
        if !whoami.authenticated {
            return Err(SyncError::AuthExpired {
                service: "monzo".to_string(),
            });
        }
        Ok(AccountProfile {
            account_id: whoami.user_id,
            display_name: None,
        })
    }

    fn default_base_url(&self) -> String {
        self.base_url.clone()
    }
}
