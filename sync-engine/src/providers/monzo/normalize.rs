//! Monzo payload normalization.
//!
//! Source id conventions:
//! - `monzo_balance_{account_id}_{date}` — one balance snapshot per account
//!   per day
//! - `monzo_transaction_{integration}_{tx_id}`
//!
//! Amounts arrive in minor units; they are converted to major units before
//! value encoding, so £12.34 stores as `(12340, 1000)` and a whole £15 as
//! `(15, 1)`.

use super::api::{Account, Balance, Transaction};
use crate::error::SyncError;
use crate::types::SyncContext;
use chrono::{DateTime, Utc};
use lifelog::{encode_value, EventDraft, NormalizedRecord, ObjectDraft};
use serde_json::json;

/// The user's Monzo account object, shared by the balance and transaction
/// instances (concurrent runs upsert the same row by natural key).
fn account_object(ctx: &SyncContext) -> ObjectDraft {
    ObjectDraft {
        concept: "account".to_string(),
        object_type: "monzo_account".to_string(),
        title: "Monzo".to_string(),
        content: None,
        metadata: json!({ "account_id": ctx.account_id }),
        time: None,
    }
}

fn minor_to_major(minor: i64) -> f64 {
    minor as f64 / 100.0
}

pub fn normalize_balance(
    ctx: &SyncContext,
    account: &Account,
    balance: &Balance,
) -> Result<NormalizedRecord, SyncError> {
    let date = ctx.now.date_naive();
    let (value, value_multiplier) = encode_value(Some(minor_to_major(balance.balance)));

    Ok(NormalizedRecord {
        event: EventDraft {
            source_id: format!("monzo_balance_{}_{}", account.id, date.format("%Y-%m-%d")),
            time: ctx.now,
            service: "monzo".to_string(),
            domain: "finance".to_string(),
            action: "had_balance".to_string(),
            value,
            value_multiplier,
            value_unit: Some(balance.currency.clone()),
            metadata: json!({
                "account_id": account.id,
                "spend_today_minor": balance.spend_today,
            }),
        },
        actor: account_object(ctx),
        target: Some(ObjectDraft {
            concept: "account".to_string(),
            object_type: "bank_account".to_string(),
            title: account
                .description
                .clone()
                .unwrap_or_else(|| account.id.clone()),
            content: None,
            metadata: json!({ "account_id": account.id }),
            time: None,
        }),
        blocks: vec![],
        reconcile_blocks: false,
    })
}

pub fn normalize_transaction(
    ctx: &SyncContext,
    tx: &Transaction,
) -> Result<NormalizedRecord, SyncError> {
    let time = tx
        .created
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(ctx.now);

    let action = if tx.amount < 0 {
        "spent_money"
    } else {
        "received_money"
    };
    let (value, value_multiplier) = encode_value(Some(minor_to_major(tx.amount.abs())));

    let counterparty = tx
        .merchant
        .as_ref()
        .and_then(|m| m.name.clone())
        .or_else(|| tx.description.clone())
        .unwrap_or_else(|| "Unknown".to_string());

    Ok(NormalizedRecord {
        event: EventDraft {
            source_id: format!("monzo_transaction_{}_{}", ctx.integration_id, tx.id),
            time,
            service: "monzo".to_string(),
            domain: "finance".to_string(),
            action: action.to_string(),
            value,
            value_multiplier,
            value_unit: Some(tx.currency.clone()),
            metadata: json!({
                "transaction_id": tx.id,
                "category": tx.category,
                "description": tx.description,
            }),
        },
        actor: account_object(ctx),
        target: Some(ObjectDraft {
            concept: "merchant".to_string(),
            object_type: "monzo_merchant".to_string(),
            title: counterparty,
            content: None,
            metadata: json!({ "category": tx.category }),
            time: None,
        }),
        blocks: vec![],
        reconcile_blocks: false,
    })
}
