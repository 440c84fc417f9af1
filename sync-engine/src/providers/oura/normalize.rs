//! Oura payload normalization.
//!
//! Source id conventions:
//! - `oura_activity_{integration}_{day}`
//! - `oura_sleep_{integration}_{day}`
//! - `oura_sleep_record_{integration}_{id}` (id falls back to
//!   `{day}_{duration}` when the provider omits one)

use super::api::{DailyActivity, DailySleep, HeartRateSample, SleepRecord};
use chrono::{DateTime, Utc};
use crate::error::SyncError;
use crate::providers::{day_to_utc, timestamp_or_day, title_case};
use crate::types::SyncContext;
use lifelog::{encode_value, BlockDraft, EventDraft, NormalizedRecord, ObjectDraft};
use serde_json::json;

/// The user's Oura account object — the actor of every Oura event.
fn account_object(ctx: &SyncContext) -> ObjectDraft {
    ObjectDraft {
        concept: "account".to_string(),
        object_type: "oura_account".to_string(),
        title: "Oura".to_string(),
        content: None,
        metadata: json!({ "account_id": ctx.account_id }),
        time: None,
    }
}

fn contributor_blocks(contributors: &std::collections::BTreeMap<String, Option<f64>>) -> Vec<BlockDraft> {
    contributors
        .iter()
        .filter_map(|(key, raw)| {
            let (value, multiplier) = encode_value(*raw);
            value?;
            Some(BlockDraft {
                block_type: "contributor".to_string(),
                title: title_case(key),
                value,
                value_multiplier: multiplier,
                value_unit: Some("percent".to_string()),
                metadata: json!({}),
                time: None,
            })
        })
        .collect()
}

fn measurement_block(title: &str, raw: Option<f64>, unit: &str) -> Option<BlockDraft> {
    let (value, multiplier) = encode_value(raw);
    value?;
    Some(BlockDraft {
        block_type: "measurement".to_string(),
        title: title.to_string(),
        value,
        value_multiplier: multiplier,
        value_unit: Some(unit.to_string()),
        metadata: json!({}),
        time: None,
    })
}

pub fn normalize_daily_activity(
    ctx: &SyncContext,
    activity: &DailyActivity,
) -> Result<NormalizedRecord, SyncError> {
    let time = day_to_utc(&activity.day)?;
    let (value, value_multiplier) = encode_value(activity.score);

    let mut blocks = contributor_blocks(&activity.contributors);
    blocks.extend(measurement_block("Steps", activity.steps, "count"));
    blocks.extend(measurement_block(
        "Active Calories",
        activity.active_calories,
        "kcal",
    ));

    Ok(NormalizedRecord {
        event: EventDraft {
            source_id: format!("oura_activity_{}_{}", ctx.integration_id, activity.day),
            time,
            service: "oura".to_string(),
            domain: "fitness".to_string(),
            action: "had_activity_score".to_string(),
            value,
            value_multiplier,
            value_unit: Some("percent".to_string()),
            metadata: json!({ "day": activity.day }),
        },
        actor: account_object(ctx),
        target: Some(ObjectDraft {
            concept: "activity".to_string(),
            object_type: "daily_activity".to_string(),
            title: format!("Activity {}", activity.day),
            content: None,
            metadata: json!({}),
            time: Some(time),
        }),
        blocks,
        reconcile_blocks: false,
    })
}

pub fn normalize_daily_sleep(
    ctx: &SyncContext,
    sleep: &DailySleep,
) -> Result<NormalizedRecord, SyncError> {
    let time = day_to_utc(&sleep.day)?;
    let (value, value_multiplier) = encode_value(sleep.score);

    Ok(NormalizedRecord {
        event: EventDraft {
            source_id: format!("oura_sleep_{}_{}", ctx.integration_id, sleep.day),
            time,
            service: "oura".to_string(),
            domain: "fitness".to_string(),
            action: "had_sleep_score".to_string(),
            value,
            value_multiplier,
            value_unit: Some("percent".to_string()),
            metadata: json!({ "day": sleep.day }),
        },
        actor: account_object(ctx),
        target: Some(ObjectDraft {
            concept: "sleep".to_string(),
            object_type: "daily_sleep".to_string(),
            title: format!("Sleep {}", sleep.day),
            content: None,
            metadata: json!({}),
            time: Some(time),
        }),
        blocks: contributor_blocks(&sleep.contributors),
        reconcile_blocks: false,
    })
}

pub fn normalize_sleep_record(
    ctx: &SyncContext,
    record: &SleepRecord,
) -> Result<NormalizedRecord, SyncError> {
    let time = timestamp_or_day(record.bedtime_start.as_deref(), &record.day)?;
    let (value, value_multiplier) = encode_value(record.total_sleep_duration);

    // Stable key: provider id, else date + duration
    let record_key = match &record.id {
        Some(id) => id.clone(),
        None => format!(
            "{}_{}",
            record.day,
            record.total_sleep_duration.unwrap_or(0.0) as i64
        ),
    };

    let mut blocks = Vec::new();
    for (title, raw) in [
        ("Deep Sleep", record.deep_sleep_duration),
        ("Light Sleep", record.light_sleep_duration),
        ("REM Sleep", record.rem_sleep_duration),
        ("Awake", record.awake_time),
    ] {
        let (value, multiplier) = encode_value(raw);
        if value.is_some() {
            blocks.push(BlockDraft {
                block_type: "sleep_stage".to_string(),
                title: title.to_string(),
                value,
                value_multiplier: multiplier,
                value_unit: Some("seconds".to_string()),
                metadata: json!({}),
                time: None,
            });
        }
    }
    blocks.extend(measurement_block("Efficiency", record.efficiency, "percent"));
    blocks.extend(measurement_block(
        "Average Heart Rate",
        record.average_heart_rate,
        "bpm",
    ));

    Ok(NormalizedRecord {
        event: EventDraft {
            source_id: format!("oura_sleep_record_{}_{}", ctx.integration_id, record_key),
            time,
            service: "oura".to_string(),
            domain: "fitness".to_string(),
            action: "slept".to_string(),
            value,
            value_multiplier,
            value_unit: Some("seconds".to_string()),
            metadata: json!({ "day": record.day }),
        },
        actor: account_object(ctx),
        target: Some(ObjectDraft {
            concept: "sleep".to_string(),
            object_type: "sleep_record".to_string(),
            title: format!("Sleep record {}", record_key),
            content: None,
            metadata: json!({}),
            time: Some(time),
        }),
        blocks,
        reconcile_blocks: false,
    })
}

pub fn normalize_heart_rate(
    ctx: &SyncContext,
    sample: &HeartRateSample,
) -> Result<NormalizedRecord, SyncError> {
    let time = DateTime::parse_from_rfc3339(&sample.timestamp)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            SyncError::ProviderData(format!("unparseable timestamp '{}'", sample.timestamp))
        })?;
    let (value, value_multiplier) = encode_value(sample.bpm);

    Ok(NormalizedRecord {
        event: EventDraft {
            source_id: format!("oura_heart_rate_{}_{}", ctx.integration_id, sample.timestamp),
            time,
            service: "oura".to_string(),
            domain: "fitness".to_string(),
            action: "had_heart_rate".to_string(),
            value,
            value_multiplier,
            value_unit: Some("bpm".to_string()),
            metadata: json!({ "source": sample.source }),
        },
        actor: account_object(ctx),
        target: Some(ObjectDraft {
            concept: "measurement".to_string(),
            object_type: "heart_rate_series".to_string(),
            title: "Heart Rate".to_string(),
            content: None,
            metadata: json!({}),
            time: Some(time),
        }),
        blocks: vec![],
        reconcile_blocks: false,
    })
}
