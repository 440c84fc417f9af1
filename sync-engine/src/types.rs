use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::SyncError;

/// OAuth 2.0 endpoints and scopes for a provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Authorization endpoint URL
    pub auth_url: String,

    /// Token exchange endpoint URL
    pub token_url: String,

    /// Required scopes
    pub scopes: Vec<String>,

    /// Whether the provider requires PKCE (code verifier/challenge)
    #[serde(default)]
    pub pkce: bool,
}

/// How a provider authenticates outbound calls.
#[derive(Clone, Debug)]
pub enum AuthScheme {
    /// Full OAuth 2.0 flow with refreshable tokens
    OAuth(OAuthConfig),
    /// Long-lived key sent as a bearer token (no refresh lifecycle)
    ApiKey,
}

/// Resumable pagination position.
///
/// One run walks a sequence of cursors; each step fetches exactly one page
/// and yields the cursor for the next. The engine treats cursors as opaque
/// apart from the page cap applied to path cursors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cursor {
    /// First page of a run
    Start,

    /// Opaque next-page path returned by the provider (e.g. Outline's
    /// `nextPath`). Subject to the per-run page cap.
    Path { next_path: String },

    /// Date window for daily-metric providers; advancing shifts the window
    /// forward until it reaches today.
    DateWindow { start: NaiveDate, end: NaiveDate },

    /// Datetime window for intraday series.
    DateTimeWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// Collection-then-page iteration (e.g. per-account transaction pages):
    /// page through collection `index` until an empty page, then advance to
    /// the next collection.
    Indexed { index: usize, page: u32 },
}

/// One fetched page: raw items plus the cursor for the next page, if any.
#[derive(Clone, Debug)]
pub struct FetchedPage {
    pub items: Vec<Value>,
    pub next: Option<Cursor>,
}

/// Everything a provider adapter needs to know about the run it is serving.
#[derive(Clone, Debug)]
pub struct SyncContext {
    pub integration_id: i64,
    pub user_id: String,
    pub instance_type: String,
    /// Provider-side account id from the group (set after onboarding)
    pub account_id: Option<String>,
    pub config: IntegrationConfig,
    /// "Now" for this run; injected so date windows are testable
    pub now: DateTime<Utc>,
}

/// Provider account identity fetched right after onboarding.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountProfile {
    pub account_id: String,
    pub display_name: Option<String>,
}

/// Typed per-integration configuration.
///
/// Stored as JSON on the integration row; unknown provider-specific knobs go
/// under `provider` rather than loosening the typed fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntegrationConfig {
    /// Interval due-check: due when this many minutes passed since the last
    /// success. Ignored when `use_schedule` is set.
    #[serde(default = "default_update_frequency")]
    pub update_frequency_minutes: i64,

    /// Switch to fixed daily trigger times instead of an interval
    #[serde(default)]
    pub use_schedule: bool,

    /// Daily trigger times as "HH:MM" in `schedule_timezone`
    #[serde(default)]
    pub schedule_times: Vec<String>,

    /// Fixed UTC offset for `schedule_times`: "Z", "+02:00", "-05:30"
    #[serde(default = "default_timezone")]
    pub schedule_timezone: String,

    /// Paused integrations are never due and enqueue no further steps
    #[serde(default, deserialize_with = "bool_or_int")]
    pub paused: bool,

    /// How much history each run re-requests, to tolerate provider-side
    /// late data
    #[serde(default = "default_days_back")]
    pub days_back: i64,

    /// Provider-specific escape hatch (e.g. Outline's base_url)
    #[serde(default)]
    pub provider: serde_json::Map<String, Value>,
}

fn default_update_frequency() -> i64 {
    60
}

fn default_timezone() -> String {
    "Z".to_string()
}

fn default_days_back() -> i64 {
    29
}

/// Accepts `true`/`false` as well as `0`/`1` for the paused flag.
fn bool_or_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Number(n) => Ok(n.as_i64().unwrap_or(0) != 0),
        other => Err(serde::de::Error::custom(format!(
            "expected bool or 0/1, got {}",
            other
        ))),
    }
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            update_frequency_minutes: default_update_frequency(),
            use_schedule: false,
            schedule_times: Vec::new(),
            schedule_timezone: default_timezone(),
            paused: false,
            days_back: default_days_back(),
            provider: serde_json::Map::new(),
        }
    }
}

impl IntegrationConfig {
    /// Parses the raw JSON config off an integration row, validating
    /// schedule fields eagerly so bad configuration fails at load, not
    /// mid-run.
    pub fn from_value(raw: &Value) -> Result<Self, SyncError> {
        let config: IntegrationConfig = serde_json::from_value(raw.clone())
            .map_err(|e| SyncError::Structural(format!("invalid integration config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.update_frequency_minutes < 1 {
            return Err(SyncError::Structural(
                "update_frequency_minutes must be >= 1".to_string(),
            ));
        }
        if self.days_back < 1 {
            return Err(SyncError::Structural("days_back must be >= 1".to_string()));
        }
        if self.use_schedule {
            if self.schedule_times.is_empty() {
                return Err(SyncError::Structural(
                    "use_schedule set but schedule_times is empty".to_string(),
                ));
            }
            self.parsed_schedule_times()?;
            self.timezone_offset()?;
        }
        Ok(())
    }

    /// `schedule_times` parsed to naive times, sorted.
    pub fn parsed_schedule_times(&self) -> Result<Vec<NaiveTime>, SyncError> {
        let mut times = self
            .schedule_times
            .iter()
            .map(|raw| {
                NaiveTime::parse_from_str(raw, "%H:%M").map_err(|_| {
                    SyncError::Structural(format!("invalid schedule time '{}'", raw))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        times.sort();
        Ok(times)
    }

    /// `schedule_timezone` parsed to a fixed offset.
    pub fn timezone_offset(&self) -> Result<FixedOffset, SyncError> {
        parse_utc_offset(&self.schedule_timezone).ok_or_else(|| {
            SyncError::Structural(format!(
                "invalid schedule_timezone '{}': expected Z or +HH:MM",
                self.schedule_timezone
            ))
        })
    }
}

/// Parses "Z", "+HH:MM" or "-HH:MM" into a fixed offset.
fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    if raw == "Z" || raw == "z" || raw == "+00:00" || raw == "-00:00" {
        return FixedOffset::east_opt(0);
    }
    let sign = match raw.chars().next()? {
        '+' => 1i32,
        '-' => -1i32,
        _ => return None,
    };
    let rest = &raw[1..];
    let (hours, minutes) = rest.split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
