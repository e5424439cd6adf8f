use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use bridge_api::{
    Ack, BridgeError, EntityTopic, OverflowPolicy, RawMessage, RecordPublisher, SchemaIds, SchemaLookup,
};
use envelope_avro::EnvelopeCodec;

/// Everything a worker needs to turn a RawMessage into a published
/// record. Shared read-only by all workers.
pub struct DispatchContext {
    lookup: Arc<dyn SchemaLookup>,
    publisher: Arc<dyn RecordPublisher>,
    codec: EnvelopeCodec,
    schema_ids: SchemaIds,
}

impl DispatchContext {
    pub fn new(
        lookup: Arc<dyn SchemaLookup>,
        publisher: Arc<dyn RecordPublisher>,
        codec: EnvelopeCodec,
        schema_ids: SchemaIds,
    ) -> Self {
        Self { lookup, publisher, codec, schema_ids }
    }

    /// schema id → lookup → encode → key → send.
    pub async fn process(&self, msg: &RawMessage) -> Result<Ack, BridgeError> {
        let topic = msg.topic();
        let schema_id = self.schema_ids.for_topic(topic);
        let schema = self.lookup.fetch(schema_id).await?;
        let envelope = self.codec.encode(msg.payload(), &schema)?;
        let key = self.codec.extract_key(msg.payload())?;
        self.publisher.send(topic.name(), &key, &envelope)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Dispatcher
// ═══════════════════════════════════════════════════════════════

/// One bounded FIFO queue plus one worker per entity topic.
///
/// Messages on the same topic are processed in submission order; topics
/// never wait on each other. Per-message errors are logged and the
/// worker moves on.
pub struct Dispatcher {
    queues: HashMap<EntityTopic, mpsc::Sender<RawMessage>>,
    workers: Vec<JoinHandle<()>>,
    overflow: OverflowPolicy,
}

impl Dispatcher {
    pub fn spawn(ctx: Arc<DispatchContext>, buffer: usize, overflow: OverflowPolicy) -> Self {
        let mut queues = HashMap::with_capacity(EntityTopic::ALL.len());
        let mut workers = Vec::with_capacity(EntityTopic::ALL.len());

        for topic in EntityTopic::ALL {
            let (tx, rx) = mpsc::channel(buffer.max(1));
            queues.insert(topic, tx);
            workers.push(tokio::spawn(run_worker(topic, rx, ctx.clone())));
        }

        tracing::debug!(buffer, ?overflow, "dispatcher started");
        Self { queues, workers, overflow }
    }

    /// Queue `msg` on its topic's worker. Returns `false` if the message
    /// was dropped.
    pub async fn submit(&self, msg: RawMessage) -> bool {
        let topic = msg.topic();
        let Some(tx) = self.queues.get(&topic) else {
            return false;
        };
        match self.overflow {
            OverflowPolicy::Drop => match tx.try_send(msg) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(topic = %topic, "dispatch queue full, dropping message");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::warn!(topic = %topic, "dispatch worker gone, dropping message");
                    false
                }
            },
            OverflowPolicy::BackPressure => {
                if tx.send(msg).await.is_err() {
                    tracing::warn!(topic = %topic, "dispatch worker gone, dropping message");
                    return false;
                }
                true
            }
        }
    }

    /// Close all queues and wait until every queued message is processed.
    pub async fn drain(self) {
        let Dispatcher { queues, workers, .. } = self;
        drop(queues);
        for handle in workers {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "dispatch worker panicked");
            }
        }
        tracing::debug!("dispatcher drained");
    }
}

async fn run_worker(topic: EntityTopic, mut rx: mpsc::Receiver<RawMessage>, ctx: Arc<DispatchContext>) {
    while let Some(msg) = rx.recv().await {
        match ctx.process(&msg).await {
            Ok(ack) => {
                tracing::debug!(topic = %ack.topic, bytes = ack.bytes, "record queued");
            }
            Err(e @ (BridgeError::Send { .. } | BridgeError::Transport(_))) => {
                tracing::error!(topic = %topic, error = %e, "message dropped");
            }
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "message dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use bridge_api::{PartitionKey, SchemaDefinition, SchemaId};

    use crate::testing::{context, observation, FakeLookup, RecordingPublisher, OBSERVATION_SCHEMA};

    #[tokio::test]
    async fn observation_is_published_under_its_entity_name() {
        let lookup = Arc::new(FakeLookup::default().with_schema(7, OBSERVATION_SCHEMA));
        let publisher = Arc::new(RecordingPublisher::default());
        let ctx = context(lookup, publisher.clone());

        let payload = observation("S42", 1);
        let msg = RawMessage::new(EntityTopic::from_inbound("v1.0/Observations").unwrap(), payload.clone());
        let ack = ctx.process(&msg).await.unwrap();
        assert_eq!(ack.topic, "Observations");

        let sent = publisher.sent();
        assert_eq!(sent.len(), 1);
        let (topic, key, envelope) = &sent[0];
        assert_eq!(topic, "Observations");
        assert_eq!(key, &PartitionKey::new("S42").unwrap());
        assert_eq!(envelope.schema_id(), SchemaId::new(7));

        let schema = SchemaDefinition::new(SchemaId::new(7), OBSERVATION_SCHEMA);
        let decoded = EnvelopeCodec::new("sensorId").decode(envelope, &schema).unwrap();
        let input: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(decoded, input);
    }

    #[tokio::test]
    async fn schema_not_found_skips_send_but_not_later_messages() {
        let lookup = Arc::new(FakeLookup::default().with_schema(7, OBSERVATION_SCHEMA).failing_next(1));
        let publisher = Arc::new(RecordingPublisher::default());
        let dispatcher = Dispatcher::spawn(context(lookup, publisher.clone()), 16, OverflowPolicy::BackPressure);

        assert!(dispatcher.submit(RawMessage::new(EntityTopic::Observations, observation("S1", 1))).await);
        assert!(dispatcher.submit(RawMessage::new(EntityTopic::Observations, observation("S2", 2))).await);
        dispatcher.drain().await;

        let sent = publisher.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.as_str(), "S2");
    }

    #[tokio::test]
    async fn bad_payloads_are_dropped_individually() {
        let lookup = Arc::new(FakeLookup::default().with_schema(7, OBSERVATION_SCHEMA));
        let publisher = Arc::new(RecordingPublisher::default());
        let dispatcher = Dispatcher::spawn(context(lookup, publisher.clone()), 16, OverflowPolicy::BackPressure);

        dispatcher.submit(RawMessage::new(EntityTopic::Things, b"not json".to_vec())).await;
        dispatcher
            .submit(RawMessage::new(EntityTopic::Things, br#"{"sensorId": "", "seq": 1, "result": 1.0}"#.to_vec()))
            .await;
        dispatcher.submit(RawMessage::new(EntityTopic::Things, observation("T1", 3))).await;
        dispatcher.drain().await;

        let sent = publisher.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "Things");
    }

    #[tokio::test]
    async fn per_topic_order_is_preserved() {
        let lookup = Arc::new(FakeLookup::default().with_schema(7, OBSERVATION_SCHEMA));
        let publisher = Arc::new(RecordingPublisher::default());
        let dispatcher = Dispatcher::spawn(context(lookup, publisher.clone()), 4, OverflowPolicy::BackPressure);

        for seq in 0..50 {
            dispatcher
                .submit(RawMessage::new(EntityTopic::Observations, observation(&format!("O{seq}"), seq)))
                .await;
            dispatcher
                .submit(RawMessage::new(EntityTopic::Datastreams, observation(&format!("D{seq}"), seq)))
                .await;
        }
        dispatcher.drain().await;

        let sent = publisher.sent();
        assert_eq!(sent.len(), 100);
        for (topic, prefix) in [("Observations", "O"), ("Datastreams", "D")] {
            let keys: Vec<String> = sent
                .iter()
                .filter(|(t, _, _)| t == topic)
                .map(|(_, k, _)| k.to_string())
                .collect();
            let expected: Vec<String> = (0..50).map(|i| format!("{prefix}{i}")).collect();
            assert_eq!(keys, expected, "{topic}");
        }
    }

    #[tokio::test]
    async fn schema_override_applies_per_topic() {
        let lookup = Arc::new(
            FakeLookup::default()
                .with_schema(7, OBSERVATION_SCHEMA)
                .with_schema(9, OBSERVATION_SCHEMA),
        );
        let publisher = Arc::new(RecordingPublisher::default());
        let ctx = Arc::new(DispatchContext::new(
            lookup,
            publisher.clone(),
            EnvelopeCodec::new("sensorId"),
            SchemaIds::new(SchemaId::new(7)).with_override(EntityTopic::Sensors, SchemaId::new(9)),
        ));

        ctx.process(&RawMessage::new(EntityTopic::Sensors, observation("A", 1))).await.unwrap();
        ctx.process(&RawMessage::new(EntityTopic::Things, observation("B", 1))).await.unwrap();

        let ids: Vec<u32> = publisher.sent().iter().map(|(_, _, e)| e.schema_id().get()).collect();
        assert_eq!(ids, vec![9, 7]);
    }

    #[tokio::test]
    async fn drop_policy_discards_when_queue_is_full() {
        let lookup = Arc::new(FakeLookup::default().with_schema(7, OBSERVATION_SCHEMA));
        let publisher = Arc::new(RecordingPublisher::default());
        let dispatcher = Dispatcher::spawn(context(lookup.clone(), publisher.clone()), 1, OverflowPolicy::Drop);

        let gate = lookup.gate.clone();
        let held = gate.lock().await;

        // First message parks the worker inside the lookup.
        assert!(dispatcher.submit(RawMessage::new(EntityTopic::Sensors, observation("S1", 1))).await);
        tokio::time::timeout(Duration::from_secs(1), lookup.entered.notified())
            .await
            .unwrap();

        // Second fills the queue, third has nowhere to go.
        assert!(dispatcher.submit(RawMessage::new(EntityTopic::Sensors, observation("S2", 2))).await);
        assert!(!dispatcher.submit(RawMessage::new(EntityTopic::Sensors, observation("S3", 3))).await);

        drop(held);
        dispatcher.drain().await;

        let keys: Vec<String> = publisher.sent().iter().map(|(_, k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["S1", "S2"]);
        assert_eq!(lookup.fetches.load(Ordering::SeqCst), 2);
    }
}
