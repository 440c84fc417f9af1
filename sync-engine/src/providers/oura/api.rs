//! Oura API v2 payload types and endpoint map.

use crate::error::SyncError;
use serde::Deserialize;
use std::collections::BTreeMap;

pub const BASE_URL: &str = "https://api.ouraring.com";
pub const AUTH_URL: &str = "https://cloud.ouraring.com/oauth/authorize";
pub const TOKEN_URL: &str = "https://api.ouraring.com/oauth/token";
pub const SCOPES: &[&str] = &["personal", "daily"];

/// Days covered by one date-window page.
pub const WINDOW_DAYS: i64 = 29;

/// Hours covered by one datetime-window page (intraday series).
pub const INTRADAY_WINDOW_HOURS: i64 = 24;

/// Maps an instance type to its usercollection path.
pub fn endpoint_for(instance_type: &str) -> Result<&'static str, SyncError> {
    match instance_type {
        "daily_activity" => Ok("/v2/usercollection/daily_activity"),
        "daily_sleep" => Ok("/v2/usercollection/daily_sleep"),
        "sleep_records" => Ok("/v2/usercollection/sleep"),
        "heart_rate" => Ok("/v2/usercollection/heartrate"),
        other => Err(SyncError::Structural(format!(
            "unknown oura instance type '{}'",
            other
        ))),
    }
}

/// True for instances paged over datetime windows instead of date windows.
pub fn is_intraday(instance_type: &str) -> bool {
    instance_type == "heart_rate"
}

/// Daily activity summary.
///
/// Contributor keys vary by account; they are kept as a map rather than
/// fixed fields.
#[derive(Debug, Deserialize)]
pub struct DailyActivity {
    pub day: String,
    pub score: Option<f64>,
    #[serde(default)]
    pub contributors: BTreeMap<String, Option<f64>>,
    pub steps: Option<f64>,
    pub active_calories: Option<f64>,
}

/// Daily sleep summary.
#[derive(Debug, Deserialize)]
pub struct DailySleep {
    pub day: String,
    pub score: Option<f64>,
    #[serde(default)]
    pub contributors: BTreeMap<String, Option<f64>>,
}

/// One sleep period (a night can have several).
#[derive(Debug, Deserialize)]
pub struct SleepRecord {
    pub id: Option<String>,
    pub day: String,
    pub bedtime_start: Option<String>,
    pub total_sleep_duration: Option<f64>,
    pub efficiency: Option<f64>,
    pub average_heart_rate: Option<f64>,
    pub deep_sleep_duration: Option<f64>,
    pub light_sleep_duration: Option<f64>,
    pub rem_sleep_duration: Option<f64>,
    pub awake_time: Option<f64>,
}

/// One intraday heart-rate sample.
#[derive(Debug, Deserialize)]
pub struct HeartRateSample {
    pub bpm: Option<f64>,
    pub source: Option<String>,
    pub timestamp: String,
}

/// Personal info, used to populate the group's account id at onboarding.
#[derive(Debug, Deserialize)]
pub struct PersonalInfo {
    pub id: String,
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_map() {
        assert_eq!(
            endpoint_for("daily_activity").unwrap(),
            "/v2/usercollection/daily_activity"
        );
        assert_eq!(
            endpoint_for("sleep_records").unwrap(),
            "/v2/usercollection/sleep"
        );
        assert!(endpoint_for("heart_rate_intraday").is_err());
    }

    #[test]
    fn test_daily_activity_deserializes() {
        let raw = serde_json::json!({
            "day": "2025-01-27",
            "score": 82,
            "contributors": {"stay_active": 80, "training_volume": null},
            "steps": 10432,
            "active_calories": 520,
            "class_5_min": "ignored-extra-field"
        });
        let activity: DailyActivity = serde_json::from_value(raw).unwrap();
        assert_eq!(activity.day, "2025-01-27");
        assert_eq!(activity.score, Some(82.0));
        assert_eq!(activity.contributors["stay_active"], Some(80.0));
        assert_eq!(activity.contributors["training_volume"], None);
        assert_eq!(activity.steps, Some(10432.0));
    }
}
