//! Mapping between JSON values and DynamoDB attribute values. Nested
//! `details` become native maps and lists so they stay queryable.
use std::collections::HashMap;

use aws_sdk_dynamodb::types::AttributeValue;
use serde_json::{Map, Number, Value};

use crate::event::StoredEvent;
use crate::store::StoreError;

pub type Item = HashMap<String, AttributeValue>;

pub fn to_attribute(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(values) => AttributeValue::L(values.iter().map(to_attribute).collect()),
        Value::Object(map) => AttributeValue::M(
            map.iter()
                .map(|(k, v)| (k.clone(), to_attribute(v)))
                .collect(),
        ),
    }
}

pub fn from_attribute(attribute: &AttributeValue) -> Result<Value, StoreError> {
    match attribute {
        AttributeValue::Null(_) => Ok(Value::Null),
        AttributeValue::Bool(b) => Ok(Value::Bool(*b)),
        AttributeValue::S(s) => Ok(Value::String(s.clone())),
        AttributeValue::N(n) => parse_number(n).map(Value::Number),
        AttributeValue::L(values) => values
            .iter()
            .map(from_attribute)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        AttributeValue::M(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), from_attribute(v)?)))
            .collect::<Result<Map<_, _>, StoreError>>()
            .map(Value::Object),
        AttributeValue::Ss(values) => Ok(Value::Array(
            values.iter().cloned().map(Value::String).collect(),
        )),
        AttributeValue::Ns(values) => values
            .iter()
            .map(|n| parse_number(n).map(Value::Number))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Err(StoreError::Decode(format!(
            "unsupported attribute type: {other:?}"
        ))),
    }
}

fn parse_number(n: &str) -> Result<Number, StoreError> {
    serde_json::from_str(n).map_err(|e| StoreError::Decode(format!("bad number {n}: {e}")))
}

pub fn to_item(event: &StoredEvent) -> Result<Item, StoreError> {
    match serde_json::to_value(event) {
        Ok(Value::Object(map)) => Ok(map
            .iter()
            .map(|(k, v)| (k.clone(), to_attribute(v)))
            .collect()),
        Ok(_) => Err(StoreError::Decode("event is not a JSON object".to_owned())),
        Err(e) => Err(StoreError::Decode(e.to_string())),
    }
}

pub fn from_item(item: &Item) -> Result<StoredEvent, StoreError> {
    let map = item
        .iter()
        .map(|(k, v)| Ok((k.clone(), from_attribute(v)?)))
        .collect::<Result<Map<_, _>, StoreError>>()?;

    serde_json::from_value(Value::Object(map)).map_err(|e| StoreError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::event::MatchEvent;

    #[test]
    fn details_become_native_attributes() {
        let details = json!({"minute": 42, "penalty": false, "assist": null, "tags": ["header", 1.5]});

        let attribute = to_attribute(&details);
        let AttributeValue::M(map) = &attribute else {
            panic!("expected a map, got {attribute:?}");
        };
        assert_eq!(map.get("minute"), Some(&AttributeValue::N("42".to_owned())));
        assert_eq!(map.get("penalty"), Some(&AttributeValue::Bool(false)));
        assert_eq!(map.get("assist"), Some(&AttributeValue::Null(true)));
        assert_eq!(
            map.get("tags"),
            Some(&AttributeValue::L(vec![
                AttributeValue::S("header".to_owned()),
                AttributeValue::N("1.5".to_owned())
            ]))
        );

        assert_eq!(from_attribute(&attribute).unwrap(), details);
    }

    #[test]
    fn item_carries_keys_and_derived_fields() {
        let event: MatchEvent = serde_json::from_value(json!({
            "match_id": "match-123",
            "event_type": "goal",
            "player_id": "player-456",
            "timestamp": "2023-08-15T14:30:00Z",
            "details": {"minute": 42},
            "venue": "home"
        }))
        .unwrap();
        let stored = event.enrich().unwrap();

        let item = to_item(&stored).unwrap();
        assert_eq!(item.get("match_id"), Some(&AttributeValue::S("match-123".to_owned())));
        assert_eq!(
            item.get("event_type_timestamp"),
            Some(&AttributeValue::S("goal#2023-08-15T14:30:00Z".to_owned()))
        );
        assert_eq!(item.get("season"), Some(&AttributeValue::S("2023/2024".to_owned())));
        assert_eq!(item.get("venue"), Some(&AttributeValue::S("home".to_owned())));
        assert!(!item.contains_key("team_id"));

        assert_eq!(from_item(&item).unwrap(), stored);
    }

    #[test]
    fn binary_attributes_are_rejected() {
        let blob = AttributeValue::B(aws_sdk_dynamodb::primitives::Blob::new(vec![1, 2]));

        assert!(matches!(from_attribute(&blob), Err(StoreError::Decode(_))));
    }
}
