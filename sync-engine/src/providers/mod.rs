//! Concrete provider adapters.
//!
//! Each service lives in its own module with the same split: `mod.rs`
//! implements [`crate::provider::Provider`], `api.rs` holds the endpoint map
//! and typed payload structs, `normalize.rs` maps raw items onto the
//! canonical model.

pub mod monzo;
pub mod oura;
pub mod outline;

use crate::error::SyncError;
use chrono::{DateTime, NaiveDate, Utc};

/// "stay_active" → "Stay Active". Used for block titles derived from
/// provider field names.
pub(crate) fn title_case(snake: &str) -> String {
    snake
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses a provider "YYYY-MM-DD" day into a midnight-UTC timestamp.
pub(crate) fn day_to_utc(day: &str) -> Result<DateTime<Utc>, SyncError> {
    let date = NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|_| SyncError::ProviderData(format!("unparseable day '{}'", day)))?;
    Ok(DateTime::from_naive_utc_and_offset(
        date.and_hms_opt(0, 0, 0).expect("midnight is valid"),
        Utc,
    ))
}

/// Parses an RFC 3339 timestamp, falling back to the day field.
pub(crate) fn timestamp_or_day(timestamp: Option<&str>, day: &str) -> Result<DateTime<Utc>, SyncError> {
    if let Some(raw) = timestamp {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Ok(parsed.with_timezone(&Utc));
        }
    }
    day_to_utc(day)
}
