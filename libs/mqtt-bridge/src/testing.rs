//! In-memory collaborators for dispatcher and bridge tests.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use bridge_api::{
    Ack, BridgeError, Envelope, PartitionKey, RecordPublisher, SchemaDefinition, SchemaId, SchemaIds,
    SchemaLookup,
};
use envelope_avro::EnvelopeCodec;

use crate::dispatch::DispatchContext;

pub(crate) const OBSERVATION_SCHEMA: &str = r#"{
    "type": "record",
    "name": "Observation",
    "fields": [
        {"name": "sensorId", "type": "string"},
        {"name": "seq", "type": "long"},
        {"name": "result", "type": "double"}
    ]
}"#;

pub(crate) fn observation(sensor: &str, seq: i64) -> Vec<u8> {
    serde_json::json!({ "sensorId": sensor, "seq": seq, "result": 21.5 })
        .to_string()
        .into_bytes()
}

/// Registry with a fixed set of schemas.
#[derive(Default)]
pub(crate) struct FakeLookup {
    schemas: HashMap<SchemaId, String>,
    /// Number of upcoming fetches that fail with `NotFound`.
    fail_next: AtomicUsize,
    /// While locked by a test, fetches park here.
    pub(crate) gate: Arc<tokio::sync::Mutex<()>>,
    pub(crate) entered: Arc<Notify>,
    pub(crate) fetches: AtomicUsize,
}

impl FakeLookup {
    pub(crate) fn with_schema(mut self, id: u32, text: &str) -> Self {
        self.schemas.insert(SchemaId::new(id), text.to_string());
        self
    }

    pub(crate) fn failing_next(self, n: usize) -> Self {
        self.fail_next.store(n, Ordering::SeqCst);
        self
    }
}

impl SchemaLookup for FakeLookup {
    fn fetch(
        &self,
        id: SchemaId,
    ) -> Pin<Box<dyn Future<Output = Result<SchemaDefinition, BridgeError>> + Send + '_>> {
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            let _open = self.gate.lock().await;

            let failing = self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(BridgeError::NotFound(id));
            }
            self.schemas
                .get(&id)
                .map(|text| SchemaDefinition::new(id, text.clone()))
                .ok_or(BridgeError::NotFound(id))
        })
    }
}

/// Publisher that records every send.
#[derive(Default)]
pub(crate) struct RecordingPublisher {
    pub(crate) sent: Mutex<Vec<(String, PartitionKey, Envelope)>>,
}

impl RecordingPublisher {
    pub(crate) fn sent(&self) -> Vec<(String, PartitionKey, Envelope)> {
        self.sent.lock().unwrap().clone()
    }
}

impl RecordPublisher for RecordingPublisher {
    fn send(&self, topic: &str, key: &PartitionKey, value: &Envelope) -> Result<Ack, BridgeError> {
        self.sent
            .lock()
            .unwrap()
            .push((topic.to_string(), key.clone(), value.clone()));
        Ok(Ack { topic: topic.to_string(), bytes: value.len() })
    }

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

pub(crate) fn context(lookup: Arc<FakeLookup>, publisher: Arc<RecordingPublisher>) -> Arc<DispatchContext> {
    Arc::new(DispatchContext::new(
        lookup,
        publisher,
        EnvelopeCodec::new("sensorId"),
        SchemaIds::new(SchemaId::new(7)),
    ))
}
