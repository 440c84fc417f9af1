//! Outline document normalization.
//!
//! A document becomes one `updated_document` event whose blocks are the
//! markdown tasks extracted from its text. Documents are living checklists,
//! so records are flagged for block reconciliation: tasks that disappear
//! from a document are soft-deleted with a removal marker on the next sync,
//! tasks that appear are added, and untouched tasks keep their rows.

use super::api::Document;
use crate::error::SyncError;
use crate::types::SyncContext;
use chrono::{DateTime, Utc};
use lifelog::{BlockDraft, EventDraft, NormalizedRecord, ObjectDraft};
use serde_json::json;

/// Maximum stored excerpt length for the document object.
const EXCERPT_CHARS: usize = 280;

/// One extracted markdown task.
#[derive(Debug, PartialEq)]
pub struct ExtractedTask {
    pub text: String,
    pub complete: bool,
}

/// Pulls `- [ ]` / `- [x]` items out of markdown. `*` bullets count too;
/// indentation is ignored so nested tasks are included.
pub fn extract_tasks(markdown: &str) -> Vec<ExtractedTask> {
    let mut tasks = Vec::new();
    for line in markdown.lines() {
        let trimmed = line.trim_start();
        let rest = match trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* ")) {
            Some(rest) => rest,
            None => continue,
        };
        let (complete, text) = if let Some(text) = rest.strip_prefix("[ ] ") {
            (false, text)
        } else if let Some(text) = rest
            .strip_prefix("[x] ")
            .or_else(|| rest.strip_prefix("[X] "))
        {
            (true, text)
        } else {
            continue;
        };
        let text = text.trim();
        if !text.is_empty() {
            tasks.push(ExtractedTask {
                text: text.to_string(),
                complete,
            });
        }
    }
    tasks
}

pub fn normalize_document(ctx: &SyncContext, doc: &Document) -> Result<NormalizedRecord, SyncError> {
    let time = doc
        .updated_at
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(ctx.now);

    let blocks = extract_tasks(&doc.text)
        .into_iter()
        .map(|task| BlockDraft {
            block_type: "task".to_string(),
            title: task.text,
            value: Some(if task.complete { 1 } else { 0 }),
            value_multiplier: Some(1),
            value_unit: Some("boolean".to_string()),
            metadata: json!({}),
            time: Some(time),
        })
        .collect();

    let excerpt: String = doc.text.chars().take(EXCERPT_CHARS).collect();
    let author = doc
        .created_by
        .as_ref()
        .and_then(|a| a.name.clone())
        .unwrap_or_else(|| "Outline".to_string());

    Ok(NormalizedRecord {
        event: EventDraft {
            source_id: format!("outline_document_{}_{}", ctx.integration_id, doc.id),
            time,
            service: "outline".to_string(),
            domain: "notes".to_string(),
            action: "updated_document".to_string(),
            value: None,
            value_multiplier: None,
            value_unit: None,
            metadata: json!({ "document_id": doc.id, "author": author }),
        },
        actor: ObjectDraft {
            concept: "account".to_string(),
            object_type: "outline_account".to_string(),
            title: "Outline".to_string(),
            content: None,
            metadata: json!({ "account_id": ctx.account_id }),
            time: None,
        },
        target: Some(ObjectDraft {
            concept: "document".to_string(),
            object_type: "outline_document".to_string(),
            title: doc.title.clone(),
            content: (!excerpt.is_empty()).then_some(excerpt),
            metadata: json!({ "document_id": doc.id }),
            time: Some(time),
        }),
        blocks,
        reconcile_blocks: true,
    })
}
