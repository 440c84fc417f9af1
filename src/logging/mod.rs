//! Sanitizing request/response logging.
//!
//! Every outbound API call is logged before it is sent and after it returns.
//! Sanitization happens here, before anything reaches a log sink: credential
//! material is redacted from JSON bodies and headers, and oversized response
//! bodies are truncated.

use serde_json::Value;
use tracing::info;

/// Replacement for redacted values.
const REDACTED: &str = "[REDACTED]";

/// Body-key fragments that mark a value as sensitive (case-insensitive).
const SENSITIVE_KEY_FRAGMENTS: &[&str] = &["password", "token", "secret", "key", "auth"];

/// Header names whose values are always redacted (case-insensitive).
const SENSITIVE_HEADERS: &[&str] = &["authorization", "x-api-key", "x-auth-token"];

/// Maximum body size persisted to logs.
const MAX_LOGGED_BODY_BYTES: usize = 10 * 1024;

/// Redacts sensitive values from a JSON body, recursively.
///
/// A value is redacted when its key contains `password`, `token`, `secret`,
/// `key` or `auth`, in any casing. Arrays and nested objects are walked;
/// scalars pass through.
pub fn sanitize_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                if is_sensitive_key(key) {
                    out.insert(key.clone(), Value::String(REDACTED.to_string()));
                } else {
                    out.insert(key.clone(), sanitize_json(val));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_json).collect()),
        other => other.clone(),
    }
}

/// Redacts sensitive header values.
pub fn sanitize_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let lowered = name.to_lowercase();
            if SENSITIVE_HEADERS.iter().any(|h| *h == lowered) {
                (name.clone(), REDACTED.to_string())
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}

/// Truncates a body string to the logging size limit, marking the cut.
pub fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_LOGGED_BODY_BYTES {
        return body.to_string();
    }
    // Cut on a char boundary at or below the limit
    let mut cut = MAX_LOGGED_BODY_BYTES;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}… [truncated {} bytes]", &body[..cut], body.len() - cut)
}

/// Logs an outbound request, sanitized.
pub fn log_request(
    service: &str,
    method: &str,
    endpoint: &str,
    headers: &[(String, String)],
    body: Option<&Value>,
    integration_id: Option<i64>,
) {
    let headers = sanitize_headers(headers);
    let body = body.map(|b| sanitize_json(b).to_string()).unwrap_or_default();
    info!(
        service = %service,
        method = %method,
        endpoint = %endpoint,
        integration_id = ?integration_id,
        headers = ?headers,
        body = %truncate_body(&body),
        "API request"
    );
}

/// Logs a response, sanitized and truncated.
pub fn log_response(
    service: &str,
    endpoint: &str,
    status: u16,
    body: Option<&Value>,
    integration_id: Option<i64>,
) {
    let body = body.map(|b| sanitize_json(b).to_string()).unwrap_or_default();
    info!(
        service = %service,
        endpoint = %endpoint,
        status = status,
        integration_id = ?integration_id,
        body = %truncate_body(&body),
        "API response"
    );
}

fn is_sensitive_key(key: &str) -> bool {
    let lowered = key.to_lowercase();
    SENSITIVE_KEY_FRAGMENTS
        .iter()
        .any(|fragment| lowered.contains(fragment))
}
