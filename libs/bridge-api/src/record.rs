use bytes::Bytes;

use crate::error::BridgeError;
use crate::schema::SchemaId;
use crate::topic::EntityTopic;

/// Inbound payload together with the topic it arrived on.
#[derive(Debug, Clone)]
pub struct RawMessage {
    topic: EntityTopic,
    payload: Bytes,
}

impl RawMessage {
    pub fn new(topic: EntityTopic, payload: impl Into<Bytes>) -> Self {
        Self { topic, payload: payload.into() }
    }

    pub fn topic(&self) -> EntityTopic {
        self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Broker routing key derived from the payload. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey(String);

impl PartitionKey {
    /// `None` for an empty key.
    pub fn new(key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        if key.is_empty() { None } else { Some(Self(key)) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Binary record published to the broker.
///
/// Wire layout: `0x00` | schema id (4-byte BE) | Avro datum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    schema_id: SchemaId,
    body: Vec<u8>,
}

impl Envelope {
    pub const MAGIC: u8 = 0x00;
    pub const HEADER_LEN: usize = 5;

    pub fn new(schema_id: SchemaId, body: Vec<u8>) -> Self {
        Self { schema_id, body }
    }

    pub fn schema_id(&self) -> SchemaId {
        self.schema_id
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Total encoded length in bytes.
    pub fn len(&self) -> usize {
        Self::HEADER_LEN + self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.push(Self::MAGIC);
        out.extend_from_slice(&self.schema_id.get().to_be_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    pub fn parse(data: &[u8]) -> Result<Self, BridgeError> {
        if data.len() < Self::HEADER_LEN {
            return Err(BridgeError::encode(format!(
                "envelope too short: {} bytes",
                data.len()
            )));
        }
        if data[0] != Self::MAGIC {
            return Err(BridgeError::encode(format!(
                "envelope marker: expected {:#04x}, got {:#04x}",
                Self::MAGIC,
                data[0]
            )));
        }
        let id = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
        Ok(Self {
            schema_id: SchemaId::new(id),
            body: data[Self::HEADER_LEN..].to_vec(),
        })
    }
}

/// Record accepted into the publisher's outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub topic: String,
    pub bytes: usize,
}
