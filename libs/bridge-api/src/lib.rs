pub mod error;
pub mod record;
pub mod schema;
pub mod topic;
pub mod util;

use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;

pub use error::{BridgeError, Severity};
pub use record::{Ack, Envelope, PartitionKey, RawMessage};
pub use schema::{SchemaDefinition, SchemaId, SchemaIds};
pub use topic::{EntityTopic, VERSION_PREFIX};
pub use util::resolve_path;

// ════════════════════════════════════════════════════════════════
//  Overflow Policy
// ════════════════════════════════════════════════════════════════

/// Behavior when a bounded queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// try_send(): drop the new message and log it.
    Drop,
    /// .send().await: wait for room (back-pressure on the producer side).
    #[default]
    #[serde(alias = "backpressure")]
    BackPressure,
}

// ════════════════════════════════════════════════════════════════
//  Component seams
// ════════════════════════════════════════════════════════════════

/// Resolves a schema id to its definition.
///
/// Implementations must be safe to call concurrently from independent
/// dispatch workers.
pub trait SchemaLookup: Send + Sync {
    fn fetch(
        &self,
        id: SchemaId,
    ) -> Pin<Box<dyn Future<Output = Result<SchemaDefinition, BridgeError>> + Send + '_>>;
}

/// Outbound side of the bridge: owns the broker connection.
///
/// `send` hands the record over for asynchronous delivery and returns
/// once it is queued. Synchronous rejections surface as
/// `BridgeError::Send`. `disconnect` flushes and is idempotent.
pub trait RecordPublisher: Send + Sync {
    fn send(&self, topic: &str, key: &PartitionKey, value: &Envelope) -> Result<Ack, BridgeError>;

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>>;
}
