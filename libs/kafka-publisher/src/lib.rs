//! Kafka publisher.
//!
//! [`KafkaPublisher`] implements [`RecordPublisher`] over rdkafka's
//! `FutureProducer`. `send` enqueues and returns immediately; the
//! delivery report is awaited on a detached task and logged.

mod config;

use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;
use std::time::Duration;

use rdkafka::producer::{FutureProducer, FutureRecord, Producer};

use bridge_api::{Ack, BridgeError, Envelope, PartitionKey, RecordPublisher};

pub use config::PublisherConfig;

pub struct KafkaPublisher {
    /// `None` once disconnected.
    producer: RwLock<Option<FutureProducer>>,
    brokers: String,
    flush_timeout: Duration,
}

impl KafkaPublisher {
    /// Create the producer and, if configured, probe the cluster.
    pub async fn open(config: &PublisherConfig) -> Result<Self, BridgeError> {
        tracing::info!(brokers = %config.brokers, probe = config.probe, "opening kafka publisher");

        let producer: FutureProducer = config
            .to_client_config()
            .create()
            .map_err(|e| BridgeError::connect(&config.brokers, format!("failed to create producer: {e}")))?;

        if config.probe {
            let probe = producer.clone();
            let timeout = config.connect_timeout;
            let metadata = tokio::task::spawn_blocking(move || probe.client().fetch_metadata(None, timeout))
                .await
                .map_err(|e| BridgeError::connect(&config.brokers, format!("metadata probe task: {e}")))?
                .map_err(|e| BridgeError::connect(&config.brokers, format!("metadata probe: {e}")))?;
            tracing::info!(
                brokers = %config.brokers,
                cluster_brokers = metadata.brokers().len(),
                "kafka cluster reachable"
            );
        }

        Ok(Self {
            producer: RwLock::new(Some(producer)),
            brokers: config.brokers.clone(),
            flush_timeout: config.flush_timeout,
        })
    }

    pub fn is_open(&self) -> bool {
        self.producer.read().map(|p| p.is_some()).unwrap_or(false)
    }
}

impl RecordPublisher for KafkaPublisher {
    fn send(&self, topic: &str, key: &PartitionKey, value: &Envelope) -> Result<Ack, BridgeError> {
        let guard = self
            .producer
            .read()
            .map_err(|_| BridgeError::send(topic, "publisher lock poisoned"))?;
        let producer = guard
            .as_ref()
            .ok_or_else(|| BridgeError::send(topic, "publisher closed"))?;

        let payload = value.to_bytes();
        let record = FutureRecord::to(topic).key(key.as_str()).payload(&payload);
        let delivery = producer
            .send_result(record)
            .map_err(|(e, _)| BridgeError::send(topic, e))?;

        let topic_name = topic.to_string();
        let key_name = key.to_string();
        tokio::spawn(async move {
            match delivery.await {
                Ok(Ok((partition, offset))) => {
                    tracing::debug!(topic = %topic_name, key = %key_name, partition, offset, "delivered");
                }
                Ok(Err((e, _))) => {
                    tracing::error!(topic = %topic_name, key = %key_name, error = %e, "delivery failed");
                }
                Err(_) => {
                    tracing::warn!(topic = %topic_name, key = %key_name, "delivery report dropped");
                }
            }
        });

        Ok(Ack {
            topic: topic.to_string(),
            bytes: payload.len(),
        })
    }

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>> {
        Box::pin(async move {
            let producer = match self.producer.write() {
                Ok(mut slot) => slot.take(),
                Err(_) => return Err(BridgeError::send(&self.brokers, "publisher lock poisoned")),
            };
            let Some(producer) = producer else {
                tracing::debug!(brokers = %self.brokers, "kafka publisher already closed");
                return Ok(());
            };

            let timeout = self.flush_timeout;
            tracing::info!(in_flight = producer.in_flight_count(), "flushing kafka publisher");
            tokio::task::spawn_blocking(move || producer.flush(timeout))
                .await
                .map_err(|e| BridgeError::send(&self.brokers, format!("flush task: {e}")))?
                .map_err(|e| BridgeError::send(&self.brokers, format!("flush: {e}")))?;

            tracing::info!(brokers = %self.brokers, "kafka publisher closed");
            Ok(())
        })
    }
}

impl std::fmt::Debug for KafkaPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaPublisher")
            .field("brokers", &self.brokers)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_api::SchemaId;

    /// Broker address nothing listens on.
    fn dead_address() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr.to_string()
    }

    fn unprobed(brokers: String) -> PublisherConfig {
        let mut cfg = PublisherConfig::new(brokers);
        cfg.probe = false;
        cfg.properties.insert("message.timeout.ms".into(), "200".into());
        cfg
    }

    #[tokio::test]
    async fn probe_failure_is_a_connect_error() {
        let mut cfg = PublisherConfig::new(dead_address());
        cfg.connect_timeout = Duration::from_millis(500);
        let err = KafkaPublisher::open(&cfg).await.unwrap_err();
        assert!(matches!(err, BridgeError::Connect { .. }), "{err}");
    }

    #[tokio::test]
    async fn invalid_property_is_a_connect_error() {
        let mut cfg = unprobed(dead_address());
        cfg.properties.insert("no.such.property".into(), "1".into());
        assert!(matches!(KafkaPublisher::open(&cfg).await, Err(BridgeError::Connect { .. })));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let publisher = KafkaPublisher::open(&unprobed(dead_address())).await.unwrap();
        assert!(publisher.is_open());
        publisher.disconnect().await.unwrap();
        assert!(!publisher.is_open());
        publisher.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn send_after_disconnect_is_a_send_error() {
        let publisher = KafkaPublisher::open(&unprobed(dead_address())).await.unwrap();
        publisher.disconnect().await.unwrap();

        let key = PartitionKey::new("S42").unwrap();
        let envelope = Envelope::new(SchemaId::new(7), vec![1, 2, 3]);
        let err = publisher.send("Observations", &key, &envelope).unwrap_err();
        assert!(matches!(&err, BridgeError::Send { topic, .. } if topic == "Observations"), "{err}");
    }

    #[tokio::test]
    async fn send_enqueues_without_waiting_for_delivery() {
        let publisher = KafkaPublisher::open(&unprobed(dead_address())).await.unwrap();
        let key = PartitionKey::new("S42").unwrap();
        let envelope = Envelope::new(SchemaId::new(7), vec![1, 2, 3]);

        let ack = publisher.send("Observations", &key, &envelope).unwrap();
        assert_eq!(ack.topic, "Observations");
        assert_eq!(ack.bytes, Envelope::HEADER_LEN + 3);

        let _ = publisher.disconnect().await;
        assert!(!publisher.is_open());
    }
}
