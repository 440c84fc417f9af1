//! Idempotent event writer.
//!
//! Persists a [`NormalizedRecord`] in one transaction: actor and target
//! objects are upserted first (so foreign keys are valid and repeats are
//! harmless), then the event is created unless its
//! `(integration_id, source_id)` already exists, then child blocks.
//!
//! Re-ingesting a provider item is a no-op by default. Records flagged
//! `reconcile_blocks` instead reconcile the block list against what is
//! already stored: new blocks are created, vanished blocks are soft-deleted
//! with a `removed`/`removed_at` marker, unchanged blocks keep their row.

use super::TimelineStore;
use crate::event::{validate_record, BlockDraft, NormalizedRecord, ObjectDraft};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Transaction};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// What the writer did with a record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Event did not exist; event and blocks were created
    Created,
    /// Event already existed; nothing was written
    SkippedExisting,
    /// Event already existed; block list was reconciled
    Reconciled { added: usize, removed: usize },
}

impl TimelineStore {
    /// Persists one normalized record idempotently.
    ///
    /// Safe under concurrent runs: object upserts are keyed by natural
    /// identity (identity columns are never mutated, non-identity fields are
    /// last-write-wins), and the event uniqueness constraint turns races on
    /// the same source item into skips.
    pub fn write(
        &self,
        integration_id: i64,
        user_id: &str,
        record: &NormalizedRecord,
    ) -> Result<WriteOutcome> {
        validate_record(record).context("Normalized record failed validation")?;

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().context("Failed to begin transaction")?;

        let actor_id = upsert_object(&tx, user_id, &record.actor)?;
        let target_id = record
            .target
            .as_ref()
            .map(|target| upsert_object(&tx, user_id, target))
            .transpose()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM events
                 WHERE integration_id = ?1 AND source_id = ?2",
                params![integration_id, record.event.source_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(no_rows_as_none)
            .context("Failed to check for existing event")?;

        let outcome = match existing {
            Some(event_id) if record.reconcile_blocks => {
                let (added, removed) = reconcile_blocks(&tx, event_id, &record.blocks)?;
                debug!(
                    source_id = %record.event.source_id,
                    added, removed,
                    "Reconciled blocks for existing event"
                );
                WriteOutcome::Reconciled { added, removed }
            }
            Some(_) => {
                debug!(
                    source_id = %record.event.source_id,
                    "Event already ingested, skipping"
                );
                WriteOutcome::SkippedExisting
            }
            None => {
                let event = &record.event;
                let now = Utc::now().to_rfc3339();
                // DO NOTHING turns a race between concurrent runs on the
                // same source item into a skip instead of an error
                let inserted = tx
                    .execute(
                        r#"
                        INSERT INTO events (
                            integration_id, source_id, time, actor_id, target_id,
                            service, domain, action,
                            value, value_multiplier, value_unit,
                            event_metadata, created_at
                        )
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                        ON CONFLICT(integration_id, source_id) DO NOTHING
                        "#,
                        params![
                            integration_id,
                            event.source_id,
                            event.time.to_rfc3339(),
                            actor_id,
                            target_id,
                            event.service,
                            event.domain,
                            event.action,
                            event.value,
                            event.value_multiplier,
                            event.value_unit,
                            event.metadata.to_string(),
                            now,
                        ],
                    )
                    .context("Failed to insert event")?;

                if inserted == 0 {
                    WriteOutcome::SkippedExisting
                } else {
                    let event_id = tx.last_insert_rowid();
                    for block in &record.blocks {
                        insert_block(&tx, event_id, block)?;
                    }
                    WriteOutcome::Created
                }
            }
        };

        tx.commit().context("Failed to commit write")?;
        Ok(outcome)
    }

    /// Live blocks for an event as `(block_type, title, deleted)` rows,
    /// including soft-deleted ones. Test and status helper.
    pub fn list_blocks(&self, event_id: i64) -> Result<Vec<BlockRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, block_type, title, value, value_multiplier, metadata, deleted_at
                 FROM blocks WHERE event_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare block listing")?;

        let mut blocks = Vec::new();
        let mut rows = stmt
            .query(params![event_id])
            .context("Failed to query blocks")?;
        while let Some(row) = rows.next().context("Failed to read block row")? {
            let metadata_raw: String = row.get(5)?;
            blocks.push(BlockRow {
                id: row.get(0)?,
                block_type: row.get(1)?,
                title: row.get(2)?,
                value: row.get(3)?,
                value_multiplier: row.get(4)?,
                metadata: serde_json::from_str(&metadata_raw)
                    .context("Invalid block metadata JSON")?,
                deleted: {
                    let deleted_at: Option<String> = row.get(6)?;
                    deleted_at.is_some()
                },
            });
        }
        Ok(blocks)
    }

    /// Event id for `(integration_id, source_id)`, if ingested.
    pub fn find_event(&self, integration_id: i64, source_id: &str) -> Result<Option<i64>> {
        self.conn
            .lock()
            .unwrap()
            .query_row(
                "SELECT id FROM events
                 WHERE integration_id = ?1 AND source_id = ?2 AND deleted_at IS NULL",
                params![integration_id, source_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(no_rows_as_none)
            .context("Failed to look up event")
    }
}

/// A stored block, as read back for reconciliation checks.
#[derive(Clone, Debug)]
pub struct BlockRow {
    pub id: i64,
    pub block_type: String,
    pub title: String,
    pub value: Option<i64>,
    pub value_multiplier: Option<i64>,
    pub metadata: serde_json::Value,
    pub deleted: bool,
}

fn no_rows_as_none<T>(e: rusqlite::Error) -> Result<Option<T>, rusqlite::Error> {
    match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    }
}

/// Upsert an object by natural key and return its row id.
///
/// Identity columns are never updated; content, metadata and time are
/// last-write-wins. A previously soft-deleted object is revived.
fn upsert_object(tx: &Transaction<'_>, user_id: &str, draft: &ObjectDraft) -> Result<i64> {
    let now = Utc::now().to_rfc3339();
    tx.execute(
        r#"
        INSERT INTO event_objects (
            user_id, concept, object_type, title,
            content, metadata, time, created_at, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
        ON CONFLICT(user_id, concept, object_type, title) DO UPDATE SET
            content = excluded.content,
            metadata = excluded.metadata,
            time = excluded.time,
            updated_at = excluded.updated_at,
            deleted_at = NULL
        "#,
        params![
            user_id,
            draft.concept,
            draft.object_type,
            draft.title,
            draft.content,
            draft.metadata.to_string(),
            draft.time.map(|t| t.to_rfc3339()),
            now,
        ],
    )
    .context("Failed to upsert event object")?;

    tx.query_row(
        "SELECT id FROM event_objects
         WHERE user_id = ?1 AND concept = ?2 AND object_type = ?3 AND title = ?4",
        params![user_id, draft.concept, draft.object_type, draft.title],
        |row| row.get(0),
    )
    .context("Failed to read back upserted object")
}

fn insert_block(tx: &Transaction<'_>, event_id: i64, block: &BlockDraft) -> Result<i64> {
    let now = Utc::now().to_rfc3339();
    tx.execute(
        r#"
        INSERT INTO blocks (
            event_id, block_type, title,
            value, value_multiplier, value_unit,
            metadata, time, created_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            event_id,
            block.block_type,
            block.title,
            block.value,
            block.value_multiplier,
            block.value_unit,
            block.metadata.to_string(),
            block.time.map(|t| t.to_rfc3339()),
            now,
        ],
    )
    .context("Failed to insert block")?;
    Ok(tx.last_insert_rowid())
}

/// Reconcile an existing event's blocks against a fresh draft list.
///
/// Identity is `(block_type, title)`. Returns `(added, removed)` counts.
fn reconcile_blocks(
    tx: &Transaction<'_>,
    event_id: i64,
    drafts: &[BlockDraft],
) -> Result<(usize, usize)> {
    let mut existing: HashMap<(String, String), i64> = HashMap::new();
    {
        let mut stmt = tx
            .prepare(
                "SELECT id, block_type, title FROM blocks
                 WHERE event_id = ?1 AND deleted_at IS NULL",
            )
            .context("Failed to prepare block query")?;
        let mut rows = stmt
            .query(params![event_id])
            .context("Failed to query blocks")?;
        while let Some(row) = rows.next().context("Failed to read block row")? {
            let id: i64 = row.get(0)?;
            let block_type: String = row.get(1)?;
            let title: String = row.get(2)?;
            existing.insert((block_type, title), id);
        }
    }

    let wanted: HashSet<(String, String)> = drafts
        .iter()
        .map(|b| (b.block_type.clone(), b.title.clone()))
        .collect();

    let mut added = 0;
    for draft in drafts {
        let key = (draft.block_type.clone(), draft.title.clone());
        if !existing.contains_key(&key) {
            insert_block(tx, event_id, draft)?;
            added += 1;
        }
    }

    let now = Utc::now();
    let mut removed = 0;
    for (key, block_id) in &existing {
        if !wanted.contains(key) {
            soft_delete_block(tx, *block_id, now)?;
            removed += 1;
        }
    }

    Ok((added, removed))
}

/// Soft-delete a block, stamping a removal marker into its metadata.
fn soft_delete_block(tx: &Transaction<'_>, block_id: i64, now: DateTime<Utc>) -> Result<()> {
    let metadata_raw: String = tx
        .query_row(
            "SELECT metadata FROM blocks WHERE id = ?1",
            params![block_id],
            |row| row.get(0),
        )
        .context("Failed to read block metadata")?;

    let mut metadata: serde_json::Value =
        serde_json::from_str(&metadata_raw).unwrap_or_else(|_| serde_json::json!({}));
    if let Some(map) = metadata.as_object_mut() {
        map.insert("removed".to_string(), serde_json::json!(true));
        map.insert(
            "removed_at".to_string(),
            serde_json::json!(now.to_rfc3339()),
        );
    }

    tx.execute(
        "UPDATE blocks SET deleted_at = ?1, metadata = ?2 WHERE id = ?3",
        params![now.to_rfc3339(), metadata.to_string(), block_id],
    )
    .context("Failed to soft-delete block")?;
    Ok(())
}
