use std::collections::BTreeMap;
use std::time::Duration;

use rdkafka::ClientConfig;

/// Producer settings.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// `host:port[,host:port...]`.
    pub brokers: String,
    /// Upper bound for draining buffered records on disconnect.
    pub flush_timeout: Duration,
    /// Upper bound for the metadata probe in `open`.
    pub connect_timeout: Duration,
    /// Probe the cluster before reporting the publisher as open.
    pub probe: bool,
    /// Extra librdkafka properties, applied last.
    pub properties: BTreeMap<String, String>,
}

impl PublisherConfig {
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            flush_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            probe: true,
            properties: BTreeMap::new(),
        }
    }

    /// Build the rdkafka client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.brokers);
        for (key, value) in &self.properties {
            config.set(key, value);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_properties_override_defaults() {
        let mut cfg = PublisherConfig::new("localhost:9092");
        cfg.properties.insert("acks".into(), "all".into());
        cfg.properties.insert("bootstrap.servers".into(), "kafka:9093".into());

        let client = cfg.to_client_config();
        assert_eq!(client.get("acks"), Some("all"));
        assert_eq!(client.get("bootstrap.servers"), Some("kafka:9093"));
    }

    #[test]
    fn defaults() {
        let cfg = PublisherConfig::new("localhost:9092");
        assert!(cfg.probe);
        assert_eq!(cfg.flush_timeout, Duration::from_secs(10));
        assert_eq!(cfg.to_client_config().get("bootstrap.servers"), Some("localhost:9092"));
    }
}
