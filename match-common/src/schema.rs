//! Structural validation of submitted events, run before anything is
//! published. Fields are checked for presence and JSON type only, no value
//! is coerced or normalized.
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Object,
}

impl FieldKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Object => value.is_object(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Object => "object",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FieldRule {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("event must be a JSON object")]
    NotAnObject,
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("field '{field}' must be of type {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}

/// Fixed contract every submitted event must satisfy.
///
/// `match_id` is typed here but its presence is enforced by the producer,
/// which reports it with a dedicated message.
pub const MATCH_EVENT_FIELDS: &[FieldRule] = &[
    FieldRule {
        name: "match_id",
        kind: FieldKind::String,
        required: false,
    },
    FieldRule {
        name: "event_type",
        kind: FieldKind::String,
        required: true,
    },
    FieldRule {
        name: "event_id",
        kind: FieldKind::String,
        required: false,
    },
    FieldRule {
        name: "player_id",
        kind: FieldKind::String,
        required: false,
    },
    FieldRule {
        name: "team_id",
        kind: FieldKind::String,
        required: false,
    },
    FieldRule {
        name: "timestamp",
        kind: FieldKind::String,
        required: false,
    },
    FieldRule {
        name: "event_timestamp",
        kind: FieldKind::String,
        required: false,
    },
    FieldRule {
        name: "details",
        kind: FieldKind::Object,
        required: false,
    },
];

#[derive(Clone, Debug)]
pub struct EventSchema {
    fields: &'static [FieldRule],
}

impl Default for EventSchema {
    fn default() -> Self {
        Self {
            fields: MATCH_EVENT_FIELDS,
        }
    }
}

impl EventSchema {
    pub fn new(fields: &'static [FieldRule]) -> Self {
        Self { fields }
    }

    pub fn validate(&self, candidate: &Value) -> Result<(), ValidationError> {
        let object = candidate.as_object().ok_or(ValidationError::NotAnObject)?;

        for rule in self.fields {
            match object.get(rule.name) {
                None if rule.required => return Err(ValidationError::MissingField(rule.name)),
                None => {}
                // Optional string fields may be sent as explicit nulls
                Some(Value::Null) if !rule.required && rule.kind == FieldKind::String => {}
                Some(value) if !rule.kind.matches(value) => {
                    return Err(ValidationError::WrongType {
                        field: rule.name,
                        expected: rule.kind.name(),
                    })
                }
                Some(_) => {}
            }
        }

        Ok(())
    }

    pub fn is_valid(&self, candidate: &Value) -> bool {
        match self.validate(candidate) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("event validation failed: {}", err);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_complete_event() {
        let schema = EventSchema::default();
        let event = json!({
            "match_id": "m1",
            "event_type": "goal",
            "player_id": "p1",
            "team_id": "t1",
            "timestamp": "2023-08-15T14:30:00Z",
            "details": {"minute": 42}
        });

        assert_eq!(schema.validate(&event), Ok(()));
        assert!(schema.is_valid(&event));
    }

    #[test]
    fn accepts_unknown_fields_and_nulls() {
        let schema = EventSchema::default();
        let event = json!({"match_id": "m1", "event_type": "pass", "player_id": null, "venue": "home"});

        assert_eq!(schema.validate(&event), Ok(()));
    }

    #[test]
    fn rejects_non_objects() {
        let schema = EventSchema::default();

        assert_eq!(
            schema.validate(&json!(["goal"])),
            Err(ValidationError::NotAnObject)
        );
        assert!(!schema.is_valid(&json!("goal")));
    }

    #[test]
    fn rejects_missing_event_type() {
        let schema = EventSchema::default();

        assert_eq!(
            schema.validate(&json!({"match_id": "m1"})),
            Err(ValidationError::MissingField("event_type"))
        );
    }

    #[test]
    fn rejects_wrong_types_without_coercion() {
        let schema = EventSchema::default();

        assert_eq!(
            schema.validate(&json!({"match_id": 42, "event_type": "goal"})),
            Err(ValidationError::WrongType {
                field: "match_id",
                expected: "string"
            })
        );
        assert_eq!(
            schema.validate(&json!({"match_id": "m1", "event_type": "goal", "details": "late"})),
            Err(ValidationError::WrongType {
                field: "details",
                expected: "object"
            })
        );
        assert_eq!(
            schema.validate(&json!({"match_id": "m1", "event_type": null})),
            Err(ValidationError::WrongType {
                field: "event_type",
                expected: "string"
            })
        );
    }
}
