//! Scheduler gate.
//!
//! Decides, per integration instance, whether a sync run is due before
//! anything is fetched. The state machine is
//! `Idle → Triggered → (Succeeded | Failed) → Idle`, with the bookkeeping
//! columns on the integration row:
//!
//! - a run may start when the instance is not paused, not still inside the
//!   processing window of a previous trigger, and either its interval has
//!   elapsed since the last success or a configured schedule time has passed
//! - `force` bypasses the due-check but still respects "already processing"
//! - failure clears the trigger marker without touching
//!   `last_successful_update_at`, so the due-check keeps measuring from the
//!   last real success
//!
//! The processing window is one consistent rule everywhere:
//! `max(30 minutes, 2 × update_frequency_minutes)`.

use crate::engine::SyncEngine;
use crate::error::SyncError;
use crate::types::IntegrationConfig;
use anyhow::Result;
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use lifelog::{Integration, TimelineStore};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Floor of the "still processing" window.
const MIN_PROCESSING_WINDOW_MINUTES: i64 = 30;

/// How long a trigger marker blocks re-triggering before it is considered
/// stale (a crashed run).
pub fn processing_window(config: &IntegrationConfig) -> Duration {
    Duration::minutes(MIN_PROCESSING_WINDOW_MINUTES.max(2 * config.update_frequency_minutes))
}

/// True while a previous trigger is recent enough to mean "currently
/// processing".
pub fn is_processing(
    integration: &Integration,
    config: &IntegrationConfig,
    now: DateTime<Utc>,
) -> bool {
    match integration.last_triggered_at {
        Some(triggered_at) => now - triggered_at < processing_window(config),
        None => false,
    }
}

/// Interval / schedule due-check. Paused instances are never due; an
/// instance that has never succeeded is always due.
pub fn is_due(
    integration: &Integration,
    config: &IntegrationConfig,
    now: DateTime<Utc>,
) -> Result<bool, SyncError> {
    if config.paused {
        return Ok(false);
    }
    let last_success = match integration.last_successful_update_at {
        None => return Ok(true),
        Some(last) => last,
    };

    if config.use_schedule {
        let times = config.parsed_schedule_times()?;
        let offset = config.timezone_offset()?;
        let next = next_occurrence_after(last_success, &times, offset);
        Ok(now >= next)
    } else {
        Ok(now - last_success >= Duration::minutes(config.update_frequency_minutes))
    }
}

/// Full gate: due-check plus the processing window, with the `force`
/// override. Force skips the due-check only — a paused or still-processing
/// instance stays blocked.
pub fn should_trigger(
    integration: &Integration,
    config: &IntegrationConfig,
    now: DateTime<Utc>,
    force: bool,
) -> Result<bool, SyncError> {
    if is_processing(integration, config, now) {
        return Ok(false);
    }
    if force {
        return Ok(!config.paused);
    }
    is_due(integration, config, now)
}

/// First configured schedule occurrence strictly after `last`, in UTC.
fn next_occurrence_after(
    last: DateTime<Utc>,
    times: &[NaiveTime],
    offset: FixedOffset,
) -> DateTime<Utc> {
    let local_last = last.with_timezone(&offset);
    let last_date = local_last.date_naive();

    // Today's remaining times, then tomorrow's first — times are sorted
    for day in 0..=1 {
        let date = last_date + Duration::days(day);
        for time in times {
            if let Some(candidate) = offset.from_local_datetime(&date.and_time(*time)).single() {
                if candidate > local_last {
                    return candidate.with_timezone(&Utc);
                }
            }
        }
    }
    last + Duration::days(1)
}

/// Periodic sweep that applies the gate to every live integration and
/// triggers the due ones.
pub struct Scheduler {
    engine: SyncEngine,
    store: Arc<TimelineStore>,
    tick: std::time::Duration,
}

impl Scheduler {
    pub fn new(engine: SyncEngine, store: Arc<TimelineStore>, tick: std::time::Duration) -> Self {
        Self { engine, store, tick }
    }

    /// Starts the sweep loop (non-blocking).
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(tick_secs = self.tick.as_secs(), "Scheduler started");
            let mut ticker = tokio::time::interval(self.tick);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep().await {
                    error!(error = %e, "Scheduler sweep failed");
                }
            }
        })
    }

    async fn sweep(&self) -> Result<()> {
        let now = Utc::now();
        for integration in self.store.list_integrations()? {
            let config = match IntegrationConfig::from_value(&integration.config) {
                Ok(config) => config,
                Err(e) => {
                    warn!(
                        integration_id = integration.id,
                        error = %e,
                        "Skipping integration with invalid config"
                    );
                    continue;
                }
            };

            match should_trigger(&integration, &config, now, false) {
                Ok(true) => {
                    info!(
                        integration_id = integration.id,
                        instance_type = %integration.instance_type,
                        "Integration due, triggering sync"
                    );
                    if let Err(e) = self.engine.trigger(integration.id, None).await {
                        warn!(
                            integration_id = integration.id,
                            error = %e,
                            "Failed to trigger integration"
                        );
                    }
                }
                Ok(false) => {
                    debug!(integration_id = integration.id, "Integration not due");
                }
                Err(e) => {
                    warn!(
                        integration_id = integration.id,
                        error = %e,
                        "Due-check failed"
                    );
                }
            }
        }
        Ok(())
    }
}
