//! Outline API payload types.
//!
//! Outline is commonly self-hosted; the base URL comes from the instance
//! configuration with the hosted service as fallback. All endpoints are
//! POST with JSON bodies; list responses carry a `pagination.nextPath`
//! token pointing at the next page.

use serde::Deserialize;

pub const BASE_URL: &str = "https://app.getoutline.com";
pub const DOCUMENTS_LIST_PATH: &str = "/api/documents.list";
pub const AUTH_INFO_PATH: &str = "/api/auth.info";

/// Page size requested per documents.list call.
pub const PAGE_LIMIT: u32 = 25;

#[derive(Debug, Deserialize)]
pub struct DocumentAuthor {
    pub name: Option<String>,
}

/// One Outline document.
#[derive(Debug, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: Option<String>,
    #[serde(rename = "createdBy")]
    pub created_by: Option<DocumentAuthor>,
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(rename = "nextPath")]
    pub next_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DocumentsListResponse {
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
pub struct AuthInfoUser {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuthInfoData {
    pub user: AuthInfoUser,
}

#[derive(Debug, Deserialize)]
pub struct AuthInfoResponse {
    pub data: AuthInfoData,
}
