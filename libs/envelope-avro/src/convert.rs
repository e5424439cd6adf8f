use std::collections::HashMap;

use apache_avro::schema::NamesRef;
use apache_avro::types::Value;
use apache_avro::Schema;
use base64::Engine;
use bridge_api::BridgeError;

// ═══════════════════════════════════════════════════════════════
//  Avro → JSON conversion
// ═══════════════════════════════════════════════════════════════

/// Render a decoded datum as JSON. Values JSON has no lossless form for
/// (`decimal` bytes, `duration`) are errors rather than guesses.
pub(crate) fn avro_to_value(value: &Value) -> Result<serde_json::Value, BridgeError> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::json!(i),
        Value::Long(l) => serde_json::json!(l),
        Value::Float(f) => serde_json::json!(f),
        Value::Double(d) => serde_json::json!(d),
        Value::Bytes(b) | Value::Fixed(_, b) => serde_json::Value::String(base64_encode(b)),
        Value::String(s) | Value::Enum(_, s) => serde_json::Value::String(s.clone()),
        Value::Union(_, inner) => avro_to_value(inner)?,
        Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(avro_to_value).collect::<Result<_, _>>()?)
        }
        Value::Map(entries) => serde_json::Value::Object(
            entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), avro_to_value(v)?)))
                .collect::<Result<_, BridgeError>>()?,
        ),
        Value::Record(fields) => serde_json::Value::Object(
            fields
                .iter()
                .map(|(k, v)| Ok((k.clone(), avro_to_value(v)?)))
                .collect::<Result<_, BridgeError>>()?,
        ),
        Value::Date(d) => serde_json::json!(d),
        Value::TimeMillis(t) => serde_json::json!(t),
        Value::TimeMicros(t) => serde_json::json!(t),
        Value::TimestampMillis(t) => serde_json::json!(t),
        Value::TimestampMicros(t) => serde_json::json!(t),
        Value::TimestampNanos(t) => serde_json::json!(t),
        Value::Decimal(_) => return Err(BridgeError::encode("cannot render avro decimal as json")),
        Value::Duration(_) => return Err(BridgeError::encode("cannot render avro duration as json")),
        Value::BigDecimal(d) => serde_json::Value::String(d.to_string()),
        Value::Uuid(u) => serde_json::Value::String(u.to_string()),
        Value::LocalTimestampMillis(t) => serde_json::json!(t),
        Value::LocalTimestampMicros(t) => serde_json::json!(t),
        Value::LocalTimestampNanos(t) => serde_json::json!(t),
    })
}

// ═══════════════════════════════════════════════════════════════
//  JSON → Avro conversion
// ═══════════════════════════════════════════════════════════════

/// Convert a JSON value into an Avro value shaped by `schema`.
///
/// `names` resolves `Schema::Ref` to the named types declared elsewhere
/// in the same schema. Fields present in the JSON but not in a record
/// schema are ignored.
pub(crate) fn value_to_avro(
    val: &serde_json::Value,
    schema: &Schema,
    names: &NamesRef<'_>,
) -> Result<Value, BridgeError> {
    use serde_json::Value as Json;

    match (schema, val) {
        (Schema::Ref { name }, _) => {
            let target = names
                .get(name)
                .ok_or_else(|| BridgeError::encode(format!("unresolved schema reference '{name}'")))?;
            value_to_avro(val, target, names)
        }
        (Schema::Union(union_schema), _) => {
            for (idx, variant) in union_schema.variants().iter().enumerate() {
                if let Ok(v) = value_to_avro(val, variant, names) {
                    return Ok(Value::Union(idx as u32, Box::new(v)));
                }
            }
            Err(mismatch(val, "union"))
        }
        (Schema::Null, Json::Null) => Ok(Value::Null),
        (Schema::Boolean, Json::Bool(b)) => Ok(Value::Boolean(*b)),
        (Schema::Int, Json::Number(n)) => n
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .map(Value::Int)
            .ok_or_else(|| mismatch(val, "int")),
        (Schema::Long, Json::Number(n)) => {
            n.as_i64().map(Value::Long).ok_or_else(|| mismatch(val, "long"))
        }
        (Schema::Float, Json::Number(n)) => n
            .as_f64()
            .map(|f| Value::Float(f as f32))
            .ok_or_else(|| mismatch(val, "float")),
        (Schema::Double, Json::Number(n)) => {
            n.as_f64().map(Value::Double).ok_or_else(|| mismatch(val, "double"))
        }
        (Schema::String, Json::String(s)) => Ok(Value::String(s.clone())),
        (Schema::Bytes, Json::String(s)) => Ok(Value::Bytes(base64_decode(s)?)),
        (Schema::Fixed(fixed), Json::String(s)) => {
            let bytes = base64_decode(s)?;
            if bytes.len() != fixed.size {
                return Err(BridgeError::encode(format!(
                    "fixed '{}': expected {} bytes, got {}",
                    fixed.name,
                    fixed.size,
                    bytes.len()
                )));
            }
            Ok(Value::Fixed(fixed.size, bytes))
        }
        (Schema::Enum(enum_schema), Json::String(s)) => enum_schema
            .symbols
            .iter()
            .position(|sym| sym == s)
            .map(|idx| Value::Enum(idx as u32, s.clone()))
            .ok_or_else(|| mismatch(val, "enum")),
        (Schema::Date, Json::Number(n)) => n
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .map(Value::Date)
            .ok_or_else(|| mismatch(val, "date")),
        (Schema::TimeMillis, Json::Number(n)) => n
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .map(Value::TimeMillis)
            .ok_or_else(|| mismatch(val, "time-millis")),
        (Schema::TimeMicros, Json::Number(n)) => {
            n.as_i64().map(Value::TimeMicros).ok_or_else(|| mismatch(val, "time-micros"))
        }
        (Schema::TimestampMillis, Json::Number(n)) => n
            .as_i64()
            .map(Value::TimestampMillis)
            .ok_or_else(|| mismatch(val, "timestamp-millis")),
        (Schema::TimestampMicros, Json::Number(n)) => n
            .as_i64()
            .map(Value::TimestampMicros)
            .ok_or_else(|| mismatch(val, "timestamp-micros")),
        (Schema::TimestampNanos, Json::Number(n)) => n
            .as_i64()
            .map(Value::TimestampNanos)
            .ok_or_else(|| mismatch(val, "timestamp-nanos")),
        (Schema::Array(inner), Json::Array(items)) => {
            let avro_items: Result<Vec<Value>, BridgeError> = items
                .iter()
                .map(|item| value_to_avro(item, &inner.items, names))
                .collect();
            Ok(Value::Array(avro_items?))
        }
        (Schema::Map(inner), Json::Object(map)) => {
            let mut entries = HashMap::with_capacity(map.len());
            for (k, v) in map {
                entries.insert(k.clone(), value_to_avro(v, &inner.types, names)?);
            }
            Ok(Value::Map(entries))
        }
        (Schema::Record(record_schema), Json::Object(map)) => {
            let mut fields = Vec::with_capacity(record_schema.fields.len());
            for field in &record_schema.fields {
                let field_val = match (map.get(&field.name), &field.default) {
                    (Some(v), _) => v,
                    (None, Some(default)) => default,
                    (None, None) => &Json::Null,
                };
                let avro_val = value_to_avro(field_val, &field.schema, names).map_err(|e| {
                    BridgeError::encode(format!("field '{}': {e}", field.name))
                })?;
                fields.push((field.name.clone(), avro_val));
            }
            Ok(Value::Record(fields))
        }
        (other, _) => Err(mismatch(val, &format!("{:?}", apache_avro::schema::SchemaKind::from(other)))),
    }
}

fn mismatch(val: &serde_json::Value, expected: &str) -> BridgeError {
    let mut shown = val.to_string();
    if shown.len() > 64 {
        let cut = (0..=64).rev().find(|i| shown.is_char_boundary(*i)).unwrap_or(0);
        shown.truncate(cut);
        shown.push('…');
    }
    BridgeError::encode(format!("cannot convert {shown} to {expected}"))
}

// ═══════════════════════════════════════════════════════════════
//  Base64
// ═══════════════════════════════════════════════════════════════

fn base64_encode(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

fn base64_decode(s: &str) -> Result<Vec<u8>, BridgeError> {
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| BridgeError::encode(format!("base64: {e}")))
}
