//! Paginator / cursor engine.
//!
//! A sync run is not a loop inside one task — it is a chain of discrete
//! work items on a queue. Each item fetches exactly one page, normalizes and
//! writes its items (write-then-fetch-next, so a crash mid-run leaves a
//! consistent, resumable position), then enqueues its continuation and
//! exits. Rate limits re-enqueue the *same* cursor after the provider's
//! retry-after instead of sleeping in place, so a backoff of tens of seconds
//! never occupies a worker.
//!
//! Termination rules:
//! - an empty page with no next cursor ends the run cleanly and advances
//!   `last_successful_update_at`
//! - path-cursor providers stop after [`MAX_PATH_PAGES`] fetches with a
//!   warning; the remainder is picked up by the next scheduled run
//! - a `timebox_until` deadline, checked at the top of each step, stops a
//!   bounded backfill without rescheduling
//! - run-level errors clear the trigger marker and leave the last success
//!   timestamp untouched

use crate::error::SyncError;
use crate::http::{ApiClient, AuthHeader};
use crate::registry::ProviderRegistry;
use crate::token::TokenRefresher;
use crate::types::{Cursor, IntegrationConfig, SyncContext};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lifelog::{GroupStore, TimelineStore, WriteOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Hard cap on fetches per run for path-cursor pagination. Bounds runtime
/// for providers whose next-page chain could run unbounded; the warning
/// makes truncated backfills visible to operators.
const MAX_PATH_PAGES: u32 = 10;

/// Work queue depth.
const QUEUE_CAPACITY: usize = 256;

/// One schedulable pagination step.
#[derive(Clone, Debug)]
pub struct WorkItem {
    pub integration_id: i64,
    /// `Cursor::Start` is resolved through the provider at step time
    pub cursor: Cursor,
    /// Fetches already made in this run
    pub pages_fetched: u32,
    /// Hard deadline for bounded one-off backfills
    pub timebox_until: Option<DateTime<Utc>>,
}

/// Per-integration run counters, kept in memory for the status surface.
#[derive(Clone, Debug, Default)]
pub struct RunStatus {
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub events_written: u64,
}

enum StepOutcome {
    /// More pages remain; successor carries the next cursor
    Continue(WorkItem),
    /// Rate limited; the same cursor was re-enqueued with a delay
    Deferred,
    /// Clean termination
    Finished,
    /// Stopped without completing (paused, timebox); not a failure
    Stopped(&'static str),
}

/// The sync engine: consumes work items, drives providers, writes records.
#[derive(Clone)]
pub struct SyncEngine {
    registry: Arc<ProviderRegistry>,
    groups: Arc<GroupStore>,
    store: Arc<TimelineStore>,
    refresher: Arc<TokenRefresher>,
    tx: mpsc::Sender<WorkItem>,
    status: Arc<DashMap<i64, RunStatus>>,
}

impl SyncEngine {
    /// Creates the engine and its work queue. Pass the receiver back into
    /// [`SyncEngine::start`].
    pub fn new(
        registry: Arc<ProviderRegistry>,
        groups: Arc<GroupStore>,
        store: Arc<TimelineStore>,
    ) -> (Self, mpsc::Receiver<WorkItem>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let refresher = Arc::new(TokenRefresher::new(Arc::clone(&groups)));
        (
            Self {
                registry,
                groups,
                store,
                refresher,
                tx,
                status: Arc::new(DashMap::new()),
            },
            rx,
        )
    }

    /// Starts the consumer loop. Steps for different integrations run
    /// concurrently; within one integration the chain structure keeps pages
    /// strictly ordered (a continuation only exists once its predecessor
    /// finished writing).
    pub fn start(&self, mut rx: mpsc::Receiver<WorkItem>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            info!("Sync engine started");
            while let Some(item) = rx.recv().await {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine.run_step(item).await;
                });
            }
            info!("Sync engine stopped");
        })
    }

    /// Starts a run for an integration: marks it triggered and enqueues the
    /// first step. The caller (scheduler gate or a forced trigger) has
    /// already decided the run should happen.
    pub async fn trigger(
        &self,
        integration_id: i64,
        timebox_until: Option<DateTime<Utc>>,
    ) -> Result<(), SyncError> {
        self.store
            .mark_triggered(integration_id, Utc::now())
            .map_err(SyncError::Storage)?;
        self.enqueue(WorkItem {
            integration_id,
            cursor: Cursor::Start,
            pages_fetched: 0,
            timebox_until,
        })
        .await
    }

    /// Snapshot of one integration's run counters.
    pub fn run_status(&self, integration_id: i64) -> Option<RunStatus> {
        self.status.get(&integration_id).map(|s| s.value().clone())
    }

    /// Snapshot of all run counters, for the status API.
    pub fn all_statuses(&self) -> Vec<(i64, RunStatus)> {
        self.status
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    async fn enqueue(&self, item: WorkItem) -> Result<(), SyncError> {
        self.tx
            .send(item)
            .await
            .map_err(|_| SyncError::Structural("work queue closed".to_string()))
    }

    /// Re-enqueues an item after a delay without holding a worker: the wait
    /// lives in its own timer task.
    fn enqueue_after(&self, item: WorkItem, delay: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(item).await.is_err() {
                error!("Work queue closed, dropping deferred step");
            }
        });
    }

    async fn run_step(&self, item: WorkItem) {
        let integration_id = item.integration_id;
        match self.step(&item).await {
            Ok(StepOutcome::Continue(next)) => {
                if let Err(e) = self.enqueue(next).await {
                    error!(integration_id, error = %e, "Failed to enqueue continuation");
                }
            }
            Ok(StepOutcome::Deferred) => {}
            Ok(StepOutcome::Finished) => {
                let now = Utc::now();
                if let Err(e) = self.store.mark_succeeded(integration_id, now) {
                    error!(integration_id, error = %e, "Failed to record run success");
                    return;
                }
                let mut status = self.status.entry(integration_id).or_default();
                status.last_success = Some(now);
                status.last_error = None;
                status.runs_completed += 1;
                info!(integration_id, "Sync run completed");
            }
            Ok(StepOutcome::Stopped(reason)) => {
                if let Err(e) = self.store.mark_failed(integration_id) {
                    error!(integration_id, error = %e, "Failed to clear trigger marker");
                }
                info!(integration_id, reason, "Sync run stopped");
            }
            Err(e) => {
                if let Err(e2) = self.store.mark_failed(integration_id) {
                    error!(integration_id, error = %e2, "Failed to clear trigger marker");
                }
                let mut status = self.status.entry(integration_id).or_default();
                status.last_error = Some(e.to_string());
                status.runs_failed += 1;
                error!(integration_id, error = %e, "Sync run failed");
            }
        }
    }

    /// One pagination step: fetch a page, write its items, hand back what
    /// happens next.
    async fn step(&self, item: &WorkItem) -> Result<StepOutcome, SyncError> {
        let now = Utc::now();

        // Time-box check happens before any call is made
        if let Some(deadline) = item.timebox_until {
            if now >= deadline {
                return Ok(StepOutcome::Stopped("timebox reached"));
            }
        }

        let integration = self
            .store
            .get_integration(item.integration_id)
            .map_err(SyncError::Storage)?
            .ok_or_else(|| {
                SyncError::Structural(format!("integration {} no longer exists", item.integration_id))
            })?;
        let config = IntegrationConfig::from_value(&integration.config)?;
        if config.paused {
            return Ok(StepOutcome::Stopped("paused"));
        }

        let group = self
            .groups
            .get(integration.group_id)
            .map_err(SyncError::Storage)?
            .ok_or_else(|| {
                SyncError::Structural(format!("group {} no longer exists", integration.group_id))
            })?;
        let provider = self.registry.get(&group.service).ok_or_else(|| {
            SyncError::Structural(format!("no provider registered for '{}'", group.service))
        })?;

        let ctx = SyncContext {
            integration_id: integration.id,
            user_id: group.user_id.clone(),
            instance_type: integration.instance_type.clone(),
            account_id: group.account_id.clone(),
            config,
            now,
        };

        let cursor = match &item.cursor {
            Cursor::Start => provider.initial_cursor(&ctx),
            other => other.clone(),
        };

        if matches!(cursor, Cursor::Path { .. }) && item.pages_fetched >= MAX_PATH_PAGES {
            warn!(
                integration_id = integration.id,
                pages = item.pages_fetched,
                "Pagination cap reached; remainder continues next run"
            );
            return Ok(StepOutcome::Finished);
        }

        let credentials = self.refresher.ensure_valid(provider.as_ref(), &group).await?;
        let client = ApiClient::new(
            provider.service(),
            &provider.base_url(&ctx),
            AuthHeader::Bearer(credentials.access_token),
        )
        .for_integration(integration.id);

        let fetched = match provider.fetch_page(&client, &ctx, &cursor).await {
            Err(SyncError::AuthExpired { .. }) => {
                // Token looked valid by timestamp but the provider rejected
                // it: refresh once and retry this page. A second rejection
                // fails the run.
                let refreshed = self.refresher.force_refresh(provider.as_ref(), &group).await?;
                let client = ApiClient::new(
                    provider.service(),
                    &provider.base_url(&ctx),
                    AuthHeader::Bearer(refreshed.access_token),
                )
                .for_integration(integration.id);
                provider.fetch_page(&client, &ctx, &cursor).await
            }
            other => other,
        };

        let page = match fetched {
            Ok(page) => page,
            Err(SyncError::RateLimited { retry_after }) => {
                let delay = retry_after.unwrap_or_else(|| provider.default_retry_after());
                warn!(
                    integration_id = integration.id,
                    delay_secs = delay.as_secs(),
                    "Rate limited; deferring this cursor"
                );
                self.enqueue_after(
                    WorkItem {
                        integration_id: item.integration_id,
                        cursor,
                        pages_fetched: item.pages_fetched,
                        timebox_until: item.timebox_until,
                    },
                    delay,
                );
                return Ok(StepOutcome::Deferred);
            }
            Err(e) => return Err(e),
        };

        // Write this page before the next page can be fetched
        let mut written = 0u64;
        for raw in &page.items {
            match provider.normalize(&ctx, raw) {
                Ok(Some(record)) => {
                    let outcome = self
                        .store
                        .write(integration.id, &ctx.user_id, &record)
                        .map_err(SyncError::Storage)?;
                    if matches!(outcome, WriteOutcome::Created) {
                        written += 1;
                    }
                }
                Ok(None) => {}
                Err(SyncError::ProviderData(reason)) => {
                    // One bad item does not abort the page
                    warn!(
                        integration_id = integration.id,
                        reason = %reason,
                        "Skipping malformed provider item"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        if written > 0 {
            self.status.entry(integration.id).or_default().events_written += written;
        }
        debug!(
            integration_id = integration.id,
            items = page.items.len(),
            written,
            "Processed page"
        );

        match page.next {
            Some(next) => {
                // A pause that landed mid-run stops the chain here: the
                // in-flight step finished, no successor is enqueued.
                if self.is_paused_now(integration.id)? {
                    return Ok(StepOutcome::Stopped("paused"));
                }
                Ok(StepOutcome::Continue(WorkItem {
                    integration_id: item.integration_id,
                    cursor: next,
                    pages_fetched: item.pages_fetched + 1,
                    timebox_until: item.timebox_until,
                }))
            }
            None => Ok(StepOutcome::Finished),
        }
    }

    fn is_paused_now(&self, integration_id: i64) -> Result<bool, SyncError> {
        let integration = self
            .store
            .get_integration(integration_id)
            .map_err(SyncError::Storage)?;
        match integration {
            Some(integration) => {
                Ok(IntegrationConfig::from_value(&integration.config)?.paused)
            }
            None => Ok(true),
        }
    }
}
