//! Monzo API payload types and endpoints.

use serde::Deserialize;

pub const BASE_URL: &str = "https://api.monzo.com";
pub const AUTH_URL: &str = "https://auth.monzo.com/";
pub const TOKEN_URL: &str = "https://api.monzo.com/oauth2/token";

/// Transactions requested per page.
pub const TRANSACTION_PAGE_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct Account {
    pub id: String,
    pub description: Option<String>,
    #[serde(default)]
    pub closed: bool,
}

#[derive(Debug, Deserialize)]
pub struct AccountsResponse {
    #[serde(default)]
    pub accounts: Vec<Account>,
}

/// Balance in minor units (pence/cents).
#[derive(Debug, Deserialize)]
pub struct Balance {
    pub balance: i64,
    pub currency: String,
    pub spend_today: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct Merchant {
    pub name: Option<String>,
}

/// One transaction; `amount` is in minor units, negative for spending.
#[derive(Debug, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub created: Option<String>,
    pub description: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub category: Option<String>,
    pub merchant: Option<Merchant>,
}

#[derive(Debug, Deserialize)]
pub struct WhoAmI {
    pub authenticated: bool,
    pub user_id: String,
}
