use super::NormalizedRecord;
use std::fmt;

/// Validation errors for a normalized record
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    MissingSourceId,
    MissingService,
    MissingDomain,
    MissingAction,
    InvalidActionFormat(String),
    InvalidMultiplier(i64),
    ValueWithoutMultiplier,
    MissingObjectIdentity(String),
    InvalidBlockMultiplier(String, i64),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingSourceId => write!(f, "source_id is required"),
            ValidationError::MissingService => write!(f, "service is required"),
            ValidationError::MissingDomain => write!(f, "domain is required"),
            ValidationError::MissingAction => write!(f, "action is required"),
            ValidationError::InvalidActionFormat(a) => {
                write!(
                    f,
                    "invalid action '{}': must be lowercase with optional underscores",
                    a
                )
            }
            ValidationError::InvalidMultiplier(m) => {
                write!(f, "value_multiplier must be >= 1, got {}", m)
            }
            ValidationError::ValueWithoutMultiplier => {
                write!(f, "value is set but value_multiplier is missing")
            }
            ValidationError::MissingObjectIdentity(which) => {
                write!(
                    f,
                    "{} object needs non-empty concept, object_type and title",
                    which
                )
            }
            ValidationError::InvalidBlockMultiplier(title, m) => {
                write!(
                    f,
                    "block '{}': value_multiplier must be >= 1, got {}",
                    title, m
                )
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validates a normalized record before it reaches the writer.
///
/// Validation rules:
/// - `source_id`, `service`, `domain`, `action` are non-empty
/// - `action` is lowercase snake_case (e.g. "had_activity_score")
/// - a present `value` carries a multiplier >= 1 (and vice versa)
/// - actor/target identity columns are non-empty
/// - each block with a value carries a multiplier >= 1
pub fn validate_record(record: &NormalizedRecord) -> Result<(), ValidationError> {
    let event = &record.event;

    if event.source_id.is_empty() {
        return Err(ValidationError::MissingSourceId);
    }
    if event.service.is_empty() {
        return Err(ValidationError::MissingService);
    }
    if event.domain.is_empty() {
        return Err(ValidationError::MissingDomain);
    }
    if event.action.is_empty() {
        return Err(ValidationError::MissingAction);
    }
    if !is_valid_action(&event.action) {
        return Err(ValidationError::InvalidActionFormat(event.action.clone()));
    }

    match (event.value, event.value_multiplier) {
        (Some(_), Some(m)) if m < 1 => return Err(ValidationError::InvalidMultiplier(m)),
        (Some(_), None) => return Err(ValidationError::ValueWithoutMultiplier),
        _ => {}
    }

    let actor = &record.actor;
    if actor.concept.is_empty() || actor.object_type.is_empty() || actor.title.is_empty() {
        return Err(ValidationError::MissingObjectIdentity("actor".to_string()));
    }
    if let Some(target) = &record.target {
        if target.concept.is_empty() || target.object_type.is_empty() || target.title.is_empty() {
            return Err(ValidationError::MissingObjectIdentity("target".to_string()));
        }
    }

    for block in &record.blocks {
        if let (Some(_), Some(m)) = (block.value, block.value_multiplier) {
            if m < 1 {
                return Err(ValidationError::InvalidBlockMultiplier(
                    block.title.clone(),
                    m,
                ));
            }
        }
    }

    Ok(())
}

/// Valid actions: lowercase letters, numbers, underscores, no leading or
/// trailing underscore.
fn is_valid_action(action: &str) -> bool {
    if action.starts_with('_') || action.ends_with('_') {
        return false;
    }
    action
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
