//! Canonical event model.
//!
//! Every provider item is normalized into the same three-level shape before
//! it touches storage:
//!
//! - an **Event**: one occurrence ("had an activity score", "spent money"),
//!   carrying a deterministic `source_id` so re-ingesting the same provider
//!   item never creates a duplicate
//! - two **EventObjects**: the actor (usually the user's account on the
//!   service) and the target (the activity record, document, bank account…),
//!   upserted by natural key rather than inserted
//! - zero or more **Blocks**: sub-measurements attached to the event (sleep
//!   stages, contributor scores, extracted tasks)
//!
//! Numeric values are stored losslessly as `value / value_multiplier`; see
//! [`encode_value`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

mod encoding;
mod validation;
#[cfg(test)]
mod tests;

pub use encoding::{encode_value, encode_value_with};
pub use validation::{validate_record, ValidationError};

/// Draft of a canonical event, produced by a provider's normalizer and
/// handed to the idempotent writer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventDraft {
    /// Deterministic idempotency key, unique per integration
    /// (e.g. `oura_activity_3_2025-01-27`). Never derived from wall-clock
    /// processing time or insertion order.
    pub source_id: String,

    /// When the thing happened (provider time, not ingestion time)
    pub time: DateTime<Utc>,

    /// Service identifier (e.g. "oura", "monzo")
    pub service: String,

    /// Broad domain of the occurrence (e.g. "fitness", "finance", "notes")
    pub domain: String,

    /// What happened, as a verb phrase (e.g. "had_activity_score")
    pub action: String,

    /// Encoded numeric value; `value / value_multiplier` is the true value
    pub value: Option<i64>,

    /// Multiplier for `value`, >= 1 when `value` is present
    pub value_multiplier: Option<i64>,

    /// Unit for `value` (e.g. "percent", "count", "GBP")
    pub value_unit: Option<String>,

    /// Provider-specific extras, kept as JSON
    #[serde(default)]
    pub metadata: Value,
}

/// Draft of an actor or target entity.
///
/// Identity for upsert purposes is `(user_id, concept, object_type, title)` —
/// recurring entities like "the user's Oura account" resolve to the same row
/// on every sync.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObjectDraft {
    /// Broad category (e.g. "account", "document", "merchant")
    pub concept: String,

    /// Specific subtype (e.g. "oura_account", "outline_document")
    pub object_type: String,

    /// Human-readable identity within the subtype
    pub title: String,

    /// Optional body text (document excerpt, description…)
    pub content: Option<String>,

    /// Provider-specific extras, kept as JSON
    #[serde(default)]
    pub metadata: Value,

    /// Entity's own timestamp, where the provider has one
    pub time: Option<DateTime<Utc>>,
}

/// Draft of a sub-measurement attached to an event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockDraft {
    /// Kind of sub-measurement (e.g. "contributor", "sleep_stage", "task")
    pub block_type: String,

    /// Identity within the event, together with `block_type`
    pub title: String,

    pub value: Option<i64>,
    pub value_multiplier: Option<i64>,
    pub value_unit: Option<String>,

    #[serde(default)]
    pub metadata: Value,

    pub time: Option<DateTime<Utc>>,
}

/// Everything the writer needs to persist one normalized provider item.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub event: EventDraft,
    pub actor: ObjectDraft,
    pub target: Option<ObjectDraft>,
    pub blocks: Vec<BlockDraft>,

    /// When true and the event already exists, the writer reconciles the
    /// block list instead of skipping: new blocks are created, vanished
    /// blocks are soft-deleted with a removal marker, unchanged blocks are
    /// left alone. Used for living checklists (extracted tasks).
    #[serde(default)]
    pub reconcile_blocks: bool,
}

impl NormalizedRecord {
    /// Convenience constructor for the common case: event + actor + target,
    /// no blocks, no reconciliation.
    pub fn new(event: EventDraft, actor: ObjectDraft, target: Option<ObjectDraft>) -> Self {
        Self {
            event,
            actor,
            target,
            blocks: Vec::new(),
            reconcile_blocks: false,
        }
    }
}
