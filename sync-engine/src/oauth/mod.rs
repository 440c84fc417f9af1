//! OAuth boundary and connection API.
//!
//! Authorization code flow for OAuth providers:
//! 1. `GET /oauth/{service}/start?user_id=…` — creates a placeholder group,
//!    signs a state token and redirects to the provider's consent page
//! 2. Provider redirects back to `GET /oauth/{service}/callback`
//! 3. The callback verifies the signed state, exchanges the code, fetches
//!    the account profile to fill in the group's account id, and creates the
//!    provider's default sync instances
//!
//! API-key providers skip the dance: `POST /connect/{service}` takes the key
//! directly, validates it with a profile call, and onboards the same way.
//!
//! `GET /integrations/status` exposes run bookkeeping;
//! `DELETE /groups/{id}` disconnects an account (soft-deletes the group and
//! its instances).

mod state;

pub use state::{StatePayload, StateSigner};

use crate::engine::SyncEngine;
use crate::http::{ApiClient, AuthHeader};
use crate::registry::ProviderRegistry;
use crate::scheduler;
use crate::token::TokenRefresher;
use crate::types::{AuthScheme, IntegrationConfig};
use chrono::Utc;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Redirect, Response},
    routing::{delete, get, post},
    Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use lifelog::credentials::Credentials;
use lifelog::{GroupStore, TimelineStore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types for the connection API
enum AppError {
    BadRequest(String),
    NotFound(String),
    ServerError(String),
    BadGateway(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Shared state for the connection API
#[derive(Clone)]
pub struct OAuthAppState {
    pub groups: Arc<GroupStore>,
    pub store: Arc<TimelineStore>,
    pub registry: Arc<ProviderRegistry>,
    pub refresher: Arc<TokenRefresher>,
    pub signer: Arc<StateSigner>,
    pub engine: SyncEngine,
    /// External base URL this server is reachable on (for redirect URIs)
    pub callback_base_url: String,
}

#[derive(Deserialize)]
pub struct StartParams {
    user_id: String,
}

#[derive(Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Deserialize)]
pub struct ConnectRequest {
    user_id: String,
    api_key: String,
    /// Self-hosted deployments point at their own instance
    base_url: Option<String>,
}

#[derive(Serialize)]
pub struct ConnectResponse {
    success: bool,
    service: String,
    group_id: i64,
    account_id: String,
}

#[derive(Serialize)]
pub struct IntegrationStatusRow {
    integration_id: i64,
    group_id: i64,
    instance_type: String,
    last_triggered_at: Option<String>,
    last_successful_update_at: Option<String>,
    runs_completed: u64,
    runs_failed: u64,
    events_written: u64,
    last_error: Option<String>,
}

#[derive(Serialize)]
pub struct DisconnectResponse {
    success: bool,
    integrations_removed: usize,
}

#[derive(Serialize)]
pub struct TriggerResponse {
    success: bool,
}

/// Create the connection API router
pub fn create_router(state: OAuthAppState) -> Router {
    Router::new()
        .route("/oauth/:service/start", get(oauth_start))
        .route("/oauth/:service/callback", get(oauth_callback))
        .route("/connect/:service", post(connect_api_key))
        .route("/integrations/status", get(integration_status))
        .route("/integrations/:id/trigger", post(force_trigger))
        .route("/groups/:id", delete(disconnect_group))
        .with_state(Arc::new(state))
}

/// GET /oauth/:service/start — redirect the user to the provider's consent
/// page with a signed state token.
async fn oauth_start(
    State(state): State<Arc<OAuthAppState>>,
    Path(service): Path<String>,
    Query(params): Query<StartParams>,
) -> Result<Redirect, AppError> {
    let provider = state
        .registry
        .get(&service)
        .ok_or_else(|| AppError::NotFound(format!("Unknown service '{}'", service)))?;

    let oauth_config = match provider.auth() {
        AuthScheme::OAuth(config) => config,
        AuthScheme::ApiKey => {
            return Err(AppError::BadRequest(format!(
                "'{}' uses an API key; POST /connect/{} instead",
                service, service
            )))
        }
    };

    let client_id = std::env::var(format!(
        "LIFELOG_OAUTH_{}_CLIENT_ID",
        service.to_uppercase()
    ))
    .map_err(|_| {
        AppError::ServerError(format!(
            "OAuth not configured for '{}': set LIFELOG_OAUTH_{}_CLIENT_ID",
            service,
            service.to_uppercase()
        ))
    })?;

    let group_id = state
        .groups
        .create(&params.user_id, &service)
        .map_err(|e| AppError::ServerError(format!("Failed to create group: {}", e)))?;

    let code_verifier = oauth_config
        .pkce
        .then(|| format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple()));

    let payload = StateSigner::new_payload(group_id, &params.user_id, code_verifier.clone());
    let state_token = state
        .signer
        .sign(&payload)
        .map_err(|e| AppError::ServerError(format!("Failed to sign state: {}", e)))?;

    let redirect_uri = format!("{}/oauth/{}/callback", state.callback_base_url, service);
    let url = build_authorize_url(
        &oauth_config.auth_url,
        &client_id,
        &redirect_uri,
        &oauth_config.scopes,
        &state_token,
        code_verifier.as_deref(),
    );

    info!(service = %service, group_id, "Starting OAuth flow");
    Ok(Redirect::temporary(&url))
}

/// GET /oauth/:service/callback — verify state, exchange the code, onboard.
async fn oauth_callback(
    State(state): State<Arc<OAuthAppState>>,
    Path(service): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<ConnectResponse>, AppError> {
    if let Some(error) = params.error {
        let description = params.error_description.unwrap_or_default();
        warn!(service = %service, error = %error, "Provider returned OAuth error");
        return Err(AppError::BadGateway(format!(
            "Provider rejected authorization: {} {}",
            error, description
        )));
    }

    let code = params
        .code
        .ok_or_else(|| AppError::BadRequest("Missing 'code' parameter".to_string()))?;
    let state_token = params
        .state
        .ok_or_else(|| AppError::BadRequest("Missing 'state' parameter".to_string()))?;

    let payload = state
        .signer
        .verify_and_consume(&state_token)
        .map_err(|e| AppError::BadRequest(format!("Invalid state: {}", e)))?;

    let provider = state
        .registry
        .get(&service)
        .ok_or_else(|| AppError::NotFound(format!("Unknown service '{}'", service)))?;

    let redirect_uri = format!("{}/oauth/{}/callback", state.callback_base_url, service);
    let credentials = state
        .refresher
        .exchange_code(
            provider.as_ref(),
            &code,
            &redirect_uri,
            payload.code_verifier.as_deref(),
        )
        .await
        .map_err(|e| AppError::BadGateway(format!("Code exchange failed: {}", e)))?;

    // One profile call fills in the provider-side account id
    let client = ApiClient::new(
        &service,
        &provider.default_base_url(),
        AuthHeader::Bearer(credentials.access_token.clone()),
    );
    let profile = provider
        .fetch_account_profile(&client)
        .await
        .map_err(|e| AppError::BadGateway(format!("Profile fetch failed: {}", e)))?;

    let group_id = state
        .groups
        .complete_onboarding(payload.group_id, &profile.account_id, &credentials)
        .map_err(|e| AppError::ServerError(format!("Failed to store credentials: {}", e)))?;

    let created = ensure_default_instances(&state.store, group_id, provider.instance_types())
        .map_err(|e| AppError::ServerError(format!("Failed to create instances: {}", e)))?;

    info!(
        service = %service,
        group_id,
        account_id = %profile.account_id,
        instances_created = created,
        "OAuth onboarding complete"
    );

    Ok(Json(ConnectResponse {
        success: true,
        service,
        group_id,
        account_id: profile.account_id,
    }))
}

/// POST /connect/:service — onboard an API-key provider.
async fn connect_api_key(
    State(state): State<Arc<OAuthAppState>>,
    Path(service): Path<String>,
    Json(request): Json<ConnectRequest>,
) -> Result<Json<ConnectResponse>, AppError> {
    let provider = state
        .registry
        .get(&service)
        .ok_or_else(|| AppError::NotFound(format!("Unknown service '{}'", service)))?;

    if !matches!(provider.auth(), AuthScheme::ApiKey) {
        return Err(AppError::BadRequest(format!(
            "'{}' uses OAuth; GET /oauth/{}/start instead",
            service, service
        )));
    }

    let base_url = request
        .base_url
        .clone()
        .unwrap_or_else(|| provider.default_base_url());

    // Validate the key with a profile call before storing anything
    let client = ApiClient::new(
        &service,
        &base_url,
        AuthHeader::Bearer(request.api_key.clone()),
    );
    let profile = provider
        .fetch_account_profile(&client)
        .await
        .map_err(|e| AppError::BadGateway(format!("API key validation failed: {}", e)))?;

    let group_id = state
        .groups
        .create(&request.user_id, &service)
        .map_err(|e| AppError::ServerError(format!("Failed to create group: {}", e)))?;
    let credentials = Credentials {
        access_token: request.api_key,
        refresh_token: None,
        expires_at: None,
    };
    let group_id = state
        .groups
        .complete_onboarding(group_id, &profile.account_id, &credentials)
        .map_err(|e| AppError::ServerError(format!("Failed to store credentials: {}", e)))?;

    let instance_config = match &request.base_url {
        Some(base_url) => serde_json::json!({"provider": {"base_url": base_url}}),
        None => serde_json::json!({}),
    };
    let created = ensure_default_instances_with_config(
        &state.store,
        group_id,
        provider.instance_types(),
        &instance_config,
    )
    .map_err(|e| AppError::ServerError(format!("Failed to create instances: {}", e)))?;

    info!(
        service = %service,
        group_id,
        account_id = %profile.account_id,
        instances_created = created,
        "API-key onboarding complete"
    );

    Ok(Json(ConnectResponse {
        success: true,
        service,
        group_id,
        account_id: profile.account_id,
    }))
}

/// GET /integrations/status — run bookkeeping for every live instance.
async fn integration_status(
    State(state): State<Arc<OAuthAppState>>,
) -> Result<Json<Vec<IntegrationStatusRow>>, AppError> {
    let integrations = state
        .store
        .list_integrations()
        .map_err(|e| AppError::ServerError(format!("Failed to list integrations: {}", e)))?;

    let rows = integrations
        .into_iter()
        .map(|integration| {
            let status = state.engine.run_status(integration.id).unwrap_or_default();
            IntegrationStatusRow {
                integration_id: integration.id,
                group_id: integration.group_id,
                instance_type: integration.instance_type,
                last_triggered_at: integration.last_triggered_at.map(|t| t.to_rfc3339()),
                last_successful_update_at: integration
                    .last_successful_update_at
                    .map(|t| t.to_rfc3339()),
                runs_completed: status.runs_completed,
                runs_failed: status.runs_failed,
                events_written: status.events_written,
                last_error: status.last_error,
            }
        })
        .collect();

    Ok(Json(rows))
}

/// POST /integrations/:id/trigger — start a run now, skipping the
/// due-check. A paused or still-processing instance stays blocked.
async fn force_trigger(
    State(state): State<Arc<OAuthAppState>>,
    Path(integration_id): Path<i64>,
) -> Result<Json<TriggerResponse>, AppError> {
    let integration = state
        .store
        .get_integration(integration_id)
        .map_err(|e| AppError::ServerError(format!("Failed to load integration: {}", e)))?
        .ok_or_else(|| AppError::NotFound(format!("Integration {} not found", integration_id)))?;

    let config = IntegrationConfig::from_value(&integration.config)
        .map_err(|e| AppError::ServerError(format!("Invalid integration config: {}", e)))?;

    let allowed = scheduler::should_trigger(&integration, &config, Utc::now(), true)
        .map_err(|e| AppError::ServerError(format!("Gate check failed: {}", e)))?;
    if !allowed {
        return Err(AppError::BadRequest(
            "Integration is paused or still processing".to_string(),
        ));
    }

    state
        .engine
        .trigger(integration_id, None)
        .await
        .map_err(|e| AppError::ServerError(format!("Failed to trigger: {}", e)))?;

    info!(integration_id, "Forced sync trigger");
    Ok(Json(TriggerResponse { success: true }))
}

/// DELETE /groups/:id — disconnect an account.
async fn disconnect_group(
    State(state): State<Arc<OAuthAppState>>,
    Path(group_id): Path<i64>,
) -> Result<Json<DisconnectResponse>, AppError> {
    let deleted = state
        .groups
        .soft_delete(group_id)
        .map_err(|e| AppError::ServerError(format!("Failed to delete group: {}", e)))?;
    if !deleted {
        return Err(AppError::NotFound(format!("Group {} not found", group_id)));
    }

    let removed = state
        .store
        .delete_integrations_for_group(group_id)
        .map_err(|e| AppError::ServerError(format!("Failed to delete integrations: {}", e)))?;

    info!(group_id, integrations_removed = removed, "Group disconnected");
    Ok(Json(DisconnectResponse {
        success: true,
        integrations_removed: removed,
    }))
}

/// Builds the provider authorization URL, PKCE challenge included when a
/// verifier is present.
fn build_authorize_url(
    auth_url: &str,
    client_id: &str,
    redirect_uri: &str,
    scopes: &[String],
    state_token: &str,
    code_verifier: Option<&str>,
) -> String {
    let mut url = format!(
        "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
        auth_url,
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(&scopes.join(" ")),
        urlencoding::encode(state_token),
    );
    if let Some(verifier) = code_verifier {
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        url.push_str(&format!(
            "&code_challenge={}&code_challenge_method=S256",
            urlencoding::encode(&challenge)
        ));
    }
    url
}

/// Creates the provider's default sync instances, skipping kinds the group
/// already has (re-connections must not duplicate instances).
fn ensure_default_instances(
    store: &TimelineStore,
    group_id: i64,
    instance_types: &[&str],
) -> anyhow::Result<usize> {
    ensure_default_instances_with_config(store, group_id, instance_types, &serde_json::json!({}))
}

fn ensure_default_instances_with_config(
    store: &TimelineStore,
    group_id: i64,
    instance_types: &[&str],
    config: &serde_json::Value,
) -> anyhow::Result<usize> {
    let existing: Vec<String> = store
        .list_integrations()?
        .into_iter()
        .filter(|i| i.group_id == group_id)
        .map(|i| i.instance_type)
        .collect();

    let mut created = 0;
    for instance_type in instance_types {
        if !existing.iter().any(|t| t == instance_type) {
            store.create_integration(group_id, instance_type, config)?;
            created += 1;
        }
    }
    Ok(created)
}
