//! JSON row body codec.
//!
//! Rows store one JSON object per record. Scalars map onto plain JSON so
//! that `json_extract` expression indexes see comparable values: dates and
//! integers are numbers, UUIDs and references are strings, binary data is
//! lowercase hex. Decoding is driven by the model, never by the JSON shape.

use crate::db::{DbError, DbResult};
use crate::record::ObjectId;
use crate::schema::{AttributeDescription, AttributeType, EntityDescription, PropertyDescription};
use crate::value::Value;
use serde_json::{Map, Number, Value as JsonValue};
use std::collections::BTreeMap;
use uuid::Uuid;

pub(crate) fn encode_body(
    entity: &EntityDescription,
    values: &BTreeMap<String, Value>,
) -> DbResult<String> {
    let mut body = Map::new();
    for (name, value) in values {
        let json = match value {
            Value::Null => continue,
            Value::Bool(flag) => JsonValue::Bool(*flag),
            Value::Integer(number) | Value::Date(number) => JsonValue::from(*number),
            Value::Double(number) => Number::from_f64(*number)
                .map(JsonValue::Number)
                .ok_or_else(|| {
                    DbError::InvalidData(format!(
                        "`{}.{name}` holds a non-finite double",
                        entity.name()
                    ))
                })?,
            Value::String(text) => JsonValue::String(text.clone()),
            Value::Uuid(id) => JsonValue::String(id.to_string()),
            Value::Binary(bytes) => JsonValue::String(encode_hex(bytes)),
            Value::Reference(target) => JsonValue::String(target.key().to_string()),
        };
        body.insert(name.clone(), json);
    }
    Ok(serde_json::to_string(&JsonValue::Object(body))?)
}

/// Decodes a stored body against `entity`.
///
/// Keys for properties the model no longer declares are skipped.
pub(crate) fn decode_body(
    entity: &EntityDescription,
    body: &str,
) -> DbResult<BTreeMap<String, Value>> {
    let parsed: Map<String, JsonValue> = serde_json::from_str(body)?;
    let mut values = BTreeMap::new();
    for (name, json) in parsed {
        if json.is_null() {
            continue;
        }
        let value = match entity.property(&name) {
            Some(PropertyDescription::Attribute(attribute)) => {
                decode_attribute(entity, attribute, &json)?
            }
            Some(PropertyDescription::Relationship(relationship))
                if !relationship.is_to_many() =>
            {
                let key = json
                    .as_str()
                    .and_then(|text| Uuid::parse_str(text).ok())
                    .ok_or_else(|| {
                        DbError::InvalidData(format!(
                            "`{}.{name}` is not an object key",
                            entity.name()
                        ))
                    })?;
                Value::Reference(ObjectId::new(relationship.destination, key))
            }
            _ => continue,
        };
        values.insert(name, value);
    }
    Ok(values)
}

fn decode_attribute(
    entity: &EntityDescription,
    attribute: &AttributeDescription,
    json: &JsonValue,
) -> DbResult<Value> {
    let decoded = match attribute.attribute_type {
        AttributeType::Boolean => json.as_bool().map(Value::Bool),
        AttributeType::Integer => json.as_i64().map(Value::Integer),
        AttributeType::Double => json.as_f64().map(Value::Double),
        AttributeType::String => json.as_str().map(|text| Value::String(text.to_string())),
        AttributeType::Uuid => json
            .as_str()
            .and_then(|text| Uuid::parse_str(text).ok())
            .map(Value::Uuid),
        AttributeType::Date => json.as_i64().map(Value::Date),
        AttributeType::Binary => json.as_str().and_then(decode_hex).map(Value::Binary),
    };
    decoded.ok_or_else(|| {
        DbError::InvalidData(format!(
            "`{}.{}` does not decode as {:?}",
            entity.name(),
            attribute.name,
            attribute.attribute_type
        ))
    })
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    text.as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 16).ok())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{decode_body, encode_body};
    use crate::db::DbError;
    use crate::record::ObjectId;
    use crate::schema::{AttributeType, ModelBuilder};
    use crate::value::Value;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    #[test]
    fn body_keeps_types_the_model_declares() {
        let mut builder = ModelBuilder::new("Codec");
        let team = builder.describe("Team", |_| {});
        let player = builder.describe("Player", |entity| {
            entity.add_attribute("nickname", AttributeType::String);
            entity.add_attribute("rating", AttributeType::Double);
            entity.add_attribute("avatar", AttributeType::Binary);
            entity.belongs_to(team, "team", "players");
        });
        let model = builder.build();
        let entity = model.entity(player);

        let team_key = Uuid::new_v4();
        let values = BTreeMap::from([
            ("nickname".to_string(), Value::from("ace")),
            ("rating".to_string(), Value::Double(4.5)),
            ("avatar".to_string(), Value::Binary(vec![0x00, 0xab, 0xff])),
            ("created_at".to_string(), Value::Date(1_700_000_000_000)),
            (
                "team".to_string(),
                Value::Reference(ObjectId::new(team, team_key)),
            ),
            ("local_id".to_string(), Value::Null),
        ]);

        let body = encode_body(entity, &values).expect("encode");
        assert!(body.contains("\"avatar\":\"00abff\""));
        assert!(!body.contains("local_id"));

        let decoded = decode_body(entity, &body).expect("decode");
        let mut expected = values;
        expected.remove("local_id");
        assert_eq!(decoded, expected);
    }

    #[test]
    fn undeclared_keys_are_skipped_and_bad_shapes_rejected() {
        let mut builder = ModelBuilder::new("Codec");
        let note = builder.describe("Note", |entity| {
            entity.add_attribute("pinned", AttributeType::Boolean);
        });
        let model = builder.build();
        let entity = model.entity(note);

        let decoded = decode_body(entity, r#"{"pinned":true,"legacy":"x"}"#).expect("decode");
        assert_eq!(decoded.len(), 1);

        let error = decode_body(entity, r#"{"pinned":"yes"}"#).expect_err("must reject");
        assert!(matches!(error, DbError::InvalidData(message) if message.contains("pinned")));
    }
}
