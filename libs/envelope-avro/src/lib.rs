//! Avro envelope codec.
//!
//! Turns a JSON sensor payload into an [`Envelope`]: the Confluent
//! marker byte, the schema id and the Avro binary datum of the payload,
//! validated against the registry schema.

mod convert;

use apache_avro::schema::ResolvedSchema;
use apache_avro::Schema;
use bridge_api::{resolve_path, BridgeError, Envelope, PartitionKey, SchemaDefinition};

use convert::{avro_to_value, value_to_avro};

/// Default field path for the partition key: the entity id every
/// entity carries.
pub const DEFAULT_KEY_FIELD: &str = "@iot.id";

/// Stateless apart from its configuration; safe to share across workers.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    key_field: String,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_FIELD)
    }
}

impl EnvelopeCodec {
    pub fn new(key_field: impl Into<String>) -> Self {
        Self { key_field: key_field.into() }
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    /// Encode `payload` (JSON) with `schema` into an envelope stamped
    /// with the schema's id.
    pub fn encode(&self, payload: &[u8], schema: &SchemaDefinition) -> Result<Envelope, BridgeError> {
        let avro_schema = parse_schema(schema)?;
        let json: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| BridgeError::encode(format!("payload is not valid JSON: {e}")))?;

        let resolved = ResolvedSchema::try_from(&avro_schema)
            .map_err(|e| BridgeError::encode(format!("schema {}: {e}", schema.id())))?;
        let avro_value = value_to_avro(&json, &avro_schema, resolved.get_names())?;
        let body = apache_avro::to_avro_datum(&avro_schema, avro_value)
            .map_err(|e| BridgeError::encode(format!("avro encode: {e}")))?;

        Ok(Envelope::new(schema.id(), body))
    }

    /// Decode an envelope back to JSON. The envelope must carry the id
    /// of `schema`.
    pub fn decode(&self, envelope: &Envelope, schema: &SchemaDefinition) -> Result<serde_json::Value, BridgeError> {
        if envelope.schema_id() != schema.id() {
            return Err(BridgeError::encode(format!(
                "envelope schema {} does not match schema {}",
                envelope.schema_id(),
                schema.id()
            )));
        }
        let avro_schema = parse_schema(schema)?;
        let mut reader = envelope.body();
        let avro_value = apache_avro::from_avro_datum(&avro_schema, &mut reader, None)
            .map_err(|e| BridgeError::encode(format!("avro decode: {e}")))?;
        avro_to_value(&avro_value)
    }

    /// Derive the partition key from the payload's key field.
    pub fn extract_key(&self, payload: &[u8]) -> Result<PartitionKey, BridgeError> {
        let json: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| BridgeError::key_missing(&self.key_field, format!("payload is not valid JSON: {e}")))?;

        let key = match resolve_path(&json, &self.key_field) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            Some(serde_json::Value::Null) | None => {
                return Err(BridgeError::key_missing(&self.key_field, "field absent"));
            }
            Some(other) => {
                return Err(BridgeError::key_missing(
                    &self.key_field,
                    format!("unsupported key value {other}"),
                ));
            }
        };

        PartitionKey::new(key).ok_or_else(|| BridgeError::key_missing(&self.key_field, "empty value"))
    }
}

fn parse_schema(schema: &SchemaDefinition) -> Result<Schema, BridgeError> {
    Schema::parse_str(schema.text())
        .map_err(|e| BridgeError::encode(format!("schema {} is not a valid Avro schema: {e}", schema.id())))
}
