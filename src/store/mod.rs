//! SQLite timeline store.
//!
//! Holds the canonical tables every integration writes into:
//!
//! - `integrations` — sync instances (one per data kind under a group) with
//!   their JSON configuration and run bookkeeping timestamps
//! - `events` — normalized occurrences, unique per
//!   `(integration_id, source_id)`
//! - `event_objects` — actor/target entities, unique per
//!   `(user_id, concept, object_type, title)`
//! - `blocks` — sub-measurements attached to events
//!
//! The idempotent writer lives in [`writer`]; run bookkeeping
//! (`mark_triggered` / `mark_succeeded` / `mark_failed`) is here because the
//! scheduler gate drives it.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

mod writer;

pub use writer::{BlockRow, WriteOutcome};

/// One sync instance: a data kind under an integration group
/// (e.g. "daily_activity" under an Oura connection).
#[derive(Clone, Debug)]
pub struct Integration {
    pub id: i64,
    pub group_id: i64,
    pub instance_type: String,
    /// Raw JSON configuration; the engine parses it into a typed struct
    pub config: serde_json::Value,
    /// Set while a run is in flight; cleared on success and on failure
    pub last_triggered_at: Option<DateTime<Utc>>,
    /// Advanced only on clean run termination
    pub last_successful_update_at: Option<DateTime<Utc>>,
}

/// The canonical timeline database.
pub struct TimelineStore {
    conn: Mutex<Connection>,
}

impl TimelineStore {
    /// Creates or opens the timeline database.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open timeline database")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS integrations (
                id INTEGER PRIMARY KEY,
                group_id INTEGER NOT NULL,
                instance_type TEXT NOT NULL,
                config TEXT NOT NULL DEFAULT '{}',
                last_triggered_at TEXT,
                last_successful_update_at TEXT,
                created_at TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY,
                integration_id INTEGER NOT NULL,
                source_id TEXT NOT NULL,
                time TEXT NOT NULL,
                actor_id INTEGER NOT NULL,
                target_id INTEGER,
                service TEXT NOT NULL,
                domain TEXT NOT NULL,
                action TEXT NOT NULL,
                value INTEGER,
                value_multiplier INTEGER,
                value_unit TEXT,
                event_metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                deleted_at TEXT,
                UNIQUE(integration_id, source_id)
            );

            CREATE TABLE IF NOT EXISTS event_objects (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                concept TEXT NOT NULL,
                object_type TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                time TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT,
                UNIQUE(user_id, concept, object_type, title)
            );

            CREATE TABLE IF NOT EXISTS blocks (
                id INTEGER PRIMARY KEY,
                event_id INTEGER NOT NULL,
                block_type TEXT NOT NULL,
                title TEXT NOT NULL,
                value INTEGER,
                value_multiplier INTEGER,
                value_unit TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                time TEXT,
                created_at TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_events_source
                ON events(integration_id, source_id);
            CREATE INDEX IF NOT EXISTS idx_blocks_event
                ON blocks(event_id);
            "#,
        )
        .context("Failed to create timeline schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates a sync instance under a group.
    pub fn create_integration(
        &self,
        group_id: i64,
        instance_type: &str,
        config: &serde_json::Value,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO integrations (group_id, instance_type, config, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![group_id, instance_type, config.to_string(), now],
        )
        .context("Failed to create integration")?;
        Ok(conn.last_insert_rowid())
    }

    /// Fetches a live integration by id.
    pub fn get_integration(&self, integration_id: i64) -> Result<Option<Integration>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, group_id, instance_type, config,
                       last_triggered_at, last_successful_update_at
                FROM integrations
                WHERE id = ?1 AND deleted_at IS NULL
                "#,
            )
            .context("Failed to prepare integration query")?;

        let mut rows = stmt
            .query(params![integration_id])
            .context("Failed to query integration")?;

        match rows.next().context("Failed to read integration row")? {
            Some(row) => Ok(Some(read_integration(row)?)),
            None => Ok(None),
        }
    }

    /// Lists all live integrations, for the scheduler's due-check sweep.
    pub fn list_integrations(&self) -> Result<Vec<Integration>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, group_id, instance_type, config,
                       last_triggered_at, last_successful_update_at
                FROM integrations
                WHERE deleted_at IS NULL
                ORDER BY id
                "#,
            )
            .context("Failed to prepare integration listing")?;

        let mut integrations = Vec::new();
        let mut rows = stmt.query([]).context("Failed to query integrations")?;
        while let Some(row) = rows.next().context("Failed to read integration row")? {
            integrations.push(read_integration(row)?);
        }
        Ok(integrations)
    }

    /// Records that a run started. The marker blocks re-triggering until it
    /// is cleared by `mark_succeeded` / `mark_failed` or ages out of the
    /// processing window.
    pub fn mark_triggered(&self, integration_id: i64, now: DateTime<Utc>) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE integrations SET last_triggered_at = ?1
                 WHERE id = ?2 AND deleted_at IS NULL",
                params![now.to_rfc3339(), integration_id],
            )
            .context("Failed to mark integration triggered")?;
        Ok(())
    }

    /// Clean termination: advances the success timestamp and clears the
    /// trigger marker.
    pub fn mark_succeeded(&self, integration_id: i64, now: DateTime<Utc>) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE integrations
                 SET last_successful_update_at = ?1, last_triggered_at = NULL
                 WHERE id = ?2 AND deleted_at IS NULL",
                params![now.to_rfc3339(), integration_id],
            )
            .context("Failed to mark integration succeeded")?;
        Ok(())
    }

    /// Failed termination: clears the trigger marker and leaves the success
    /// timestamp alone, so the due-check keeps honoring the last real
    /// success.
    pub fn mark_failed(&self, integration_id: i64) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE integrations SET last_triggered_at = NULL
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![integration_id],
            )
            .context("Failed to mark integration failed")?;
        Ok(())
    }

    /// Soft-deletes every integration under a group (user disconnected).
    pub fn delete_integrations_for_group(&self, group_id: i64) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE integrations SET deleted_at = ?1
                 WHERE group_id = ?2 AND deleted_at IS NULL",
                params![now, group_id],
            )
            .context("Failed to delete integrations for group")?;
        Ok(affected)
    }

    /// Reads one event row back.
    pub fn get_event(&self, event_id: i64) -> Result<Option<EventRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, integration_id, source_id, time, actor_id, target_id,
                       service, domain, action, value, value_multiplier, value_unit,
                       event_metadata
                FROM events
                WHERE id = ?1 AND deleted_at IS NULL
                "#,
            )
            .context("Failed to prepare event query")?;
        let mut rows = stmt.query(params![event_id]).context("Failed to query event")?;
        match rows.next().context("Failed to read event row")? {
            Some(row) => Ok(Some(read_event(row)?)),
            None => Ok(None),
        }
    }

    /// Live events for an integration, oldest first.
    pub fn list_events(&self, integration_id: i64) -> Result<Vec<EventRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, integration_id, source_id, time, actor_id, target_id,
                       service, domain, action, value, value_multiplier, value_unit,
                       event_metadata
                FROM events
                WHERE integration_id = ?1 AND deleted_at IS NULL
                ORDER BY time, id
                "#,
            )
            .context("Failed to prepare event listing")?;
        let mut events = Vec::new();
        let mut rows = stmt
            .query(params![integration_id])
            .context("Failed to query events")?;
        while let Some(row) = rows.next().context("Failed to read event row")? {
            events.push(read_event(row)?);
        }
        Ok(events)
    }

    /// Number of live events for an integration (test and status helper).
    pub fn count_events(&self, integration_id: i64) -> Result<i64> {
        self.conn
            .lock()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM events
                 WHERE integration_id = ?1 AND deleted_at IS NULL",
                params![integration_id],
                |row| row.get(0),
            )
            .context("Failed to count events")
    }
}

/// One stored event, as read back for queries and tests.
#[derive(Clone, Debug)]
pub struct EventRow {
    pub id: i64,
    pub integration_id: i64,
    pub source_id: String,
    pub time: DateTime<Utc>,
    pub actor_id: i64,
    pub target_id: Option<i64>,
    pub service: String,
    pub domain: String,
    pub action: String,
    pub value: Option<i64>,
    pub value_multiplier: Option<i64>,
    pub value_unit: Option<String>,
    pub metadata: serde_json::Value,
}

fn read_event(row: &rusqlite::Row<'_>) -> Result<EventRow> {
    let time_raw: String = row.get(3)?;
    let metadata_raw: String = row.get(12)?;
    Ok(EventRow {
        id: row.get(0)?,
        integration_id: row.get(1)?,
        source_id: row.get(2)?,
        time: DateTime::parse_from_rfc3339(&time_raw)
            .context("Invalid stored event time")?
            .with_timezone(&Utc),
        actor_id: row.get(4)?,
        target_id: row.get(5)?,
        service: row.get(6)?,
        domain: row.get(7)?,
        action: row.get(8)?,
        value: row.get(9)?,
        value_multiplier: row.get(10)?,
        value_unit: row.get(11)?,
        metadata: serde_json::from_str(&metadata_raw).context("Invalid event metadata JSON")?,
    })
}

fn read_integration(row: &rusqlite::Row<'_>) -> Result<Integration> {
    let config_raw: String = row.get(3)?;
    let config = serde_json::from_str(&config_raw).context("Invalid integration config JSON")?;
    Ok(Integration {
        id: row.get(0)?,
        group_id: row.get(1)?,
        instance_type: row.get(2)?,
        config,
        last_triggered_at: parse_timestamp(row.get(4)?)?,
        last_successful_update_at: parse_timestamp(row.get(5)?)?,
    })
}

fn parse_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .context("Invalid stored timestamp")
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> TimelineStore {
        TimelineStore::new(":memory:").expect("Failed to create test store")
    }

    #[test]
    fn test_create_and_get_integration() {
        let store = make_store();
        let config = serde_json::json!({"update_frequency_minutes": 120});
        let id = store.create_integration(1, "daily_activity", &config).unwrap();

        let integration = store.get_integration(id).unwrap().unwrap();
        assert_eq!(integration.group_id, 1);
        assert_eq!(integration.instance_type, "daily_activity");
        assert_eq!(integration.config["update_frequency_minutes"], 120);
        assert!(integration.last_triggered_at.is_none());
        assert!(integration.last_successful_update_at.is_none());
    }

    #[test]
    fn test_run_bookkeeping() {
        let store = make_store();
        let id = store
            .create_integration(1, "daily_activity", &serde_json::json!({}))
            .unwrap();

        let t0 = Utc::now();
        store.mark_triggered(id, t0).unwrap();
        let integration = store.get_integration(id).unwrap().unwrap();
        assert!(integration.last_triggered_at.is_some());

        store.mark_succeeded(id, t0).unwrap();
        let integration = store.get_integration(id).unwrap().unwrap();
        assert!(integration.last_triggered_at.is_none());
        assert!(integration.last_successful_update_at.is_some());
    }

    #[test]
    fn test_failure_preserves_last_success() {
        let store = make_store();
        let id = store
            .create_integration(1, "transactions", &serde_json::json!({}))
            .unwrap();

        let success_time = Utc::now();
        store.mark_succeeded(id, success_time).unwrap();

        store.mark_triggered(id, Utc::now()).unwrap();
        store.mark_failed(id).unwrap();

        let integration = store.get_integration(id).unwrap().unwrap();
        assert!(integration.last_triggered_at.is_none());
        let preserved = integration.last_successful_update_at.unwrap();
        assert_eq!(preserved.to_rfc3339(), success_time.to_rfc3339());
    }

    #[test]
    fn test_group_disconnect_removes_instances() {
        let store = make_store();
        let a = store
            .create_integration(7, "balance", &serde_json::json!({}))
            .unwrap();
        let b = store
            .create_integration(7, "transactions", &serde_json::json!({}))
            .unwrap();
        let other = store
            .create_integration(8, "documents", &serde_json::json!({}))
            .unwrap();

        assert_eq!(store.delete_integrations_for_group(7).unwrap(), 2);
        assert!(store.get_integration(a).unwrap().is_none());
        assert!(store.get_integration(b).unwrap().is_none());
        assert!(store.get_integration(other).unwrap().is_some());
    }
}
