use super::*;
use chrono::TimeZone;

fn make_record() -> NormalizedRecord {
    let (value, multiplier) = encode_value(Some(82.0));
    NormalizedRecord {
        event: EventDraft {
            source_id: "oura_activity_1_2025-01-27".to_string(),
            time: Utc.with_ymd_and_hms(2025, 1, 27, 0, 0, 0).unwrap(),
            service: "oura".to_string(),
            domain: "fitness".to_string(),
            action: "had_activity_score".to_string(),
            value,
            value_multiplier: multiplier,
            value_unit: Some("percent".to_string()),
            metadata: serde_json::json!({}),
        },
        actor: ObjectDraft {
            concept: "account".to_string(),
            object_type: "oura_account".to_string(),
            title: "Oura".to_string(),
            content: None,
            metadata: serde_json::json!({}),
            time: None,
        },
        target: Some(ObjectDraft {
            concept: "activity".to_string(),
            object_type: "daily_activity".to_string(),
            title: "Activity 2025-01-27".to_string(),
            content: None,
            metadata: serde_json::json!({}),
            time: None,
        }),
        blocks: vec![BlockDraft {
            block_type: "contributor".to_string(),
            title: "Stay Active".to_string(),
            value: Some(80),
            value_multiplier: Some(1),
            value_unit: Some("percent".to_string()),
            metadata: serde_json::json!({}),
            time: None,
        }],
        reconcile_blocks: false,
    }
}

#[test]
fn test_valid_record_passes() {
    assert!(validate_record(&make_record()).is_ok());
}

#[test]
fn test_missing_source_id_rejected() {
    let mut record = make_record();
    record.event.source_id = String::new();
    assert_eq!(
        validate_record(&record),
        Err(ValidationError::MissingSourceId)
    );
}

#[test]
fn test_invalid_action_rejected() {
    let mut record = make_record();
    record.event.action = "Had Activity Score".to_string();
    assert!(matches!(
        validate_record(&record),
        Err(ValidationError::InvalidActionFormat(_))
    ));
}

#[test]
fn test_value_without_multiplier_rejected() {
    let mut record = make_record();
    record.event.value = Some(82);
    record.event.value_multiplier = None;
    assert_eq!(
        validate_record(&record),
        Err(ValidationError::ValueWithoutMultiplier)
    );
}

#[test]
fn test_zero_multiplier_rejected() {
    let mut record = make_record();
    record.event.value_multiplier = Some(0);
    assert_eq!(
        validate_record(&record),
        Err(ValidationError::InvalidMultiplier(0))
    );
}

#[test]
fn test_anonymous_target_rejected() {
    let mut record = make_record();
    record.target.as_mut().unwrap().title = String::new();
    assert!(matches!(
        validate_record(&record),
        Err(ValidationError::MissingObjectIdentity(_))
    ));
}

#[test]
fn test_bad_block_multiplier_rejected() {
    let mut record = make_record();
    record.blocks[0].value_multiplier = Some(-1);
    assert!(matches!(
        validate_record(&record),
        Err(ValidationError::InvalidBlockMultiplier(_, -1))
    ));
}

#[test]
fn test_record_serialization_round_trip() {
    let record = make_record();
    let json = serde_json::to_string(&record).unwrap();
    let back: NormalizedRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(back.event.source_id, record.event.source_id);
    assert_eq!(back.event.value, Some(82));
    assert_eq!(back.blocks.len(), 1);
    assert!(!back.reconcile_blocks);
}
