use std::collections::BTreeMap;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use bridge_api::{EntityTopic, OverflowPolicy, SchemaId, SchemaIds};
use kafka_publisher::PublisherConfig;
use mqtt_bridge::{MAX_PACKET_SIZE, MqttSettings, qos_from_level};

use crate::error::ServerError;

pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_KAFKA_PORT: u16 = 9092;
pub const DEFAULT_REGISTRY_PORT: u16 = 8081;

#[derive(Parser)]
#[command(name = "mqtt-kafka-bridge", about = "Bridge SensorThings MQTT topics into Kafka as Avro records")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bridge until SIGINT/SIGTERM or connection loss
    Run(RunArgs),
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "bridge.toml", env = "BRIDGE_CONFIG")]
    pub config: String,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct BridgeConfig {
    #[serde(alias = "frostServerURI")]
    pub mqtt_uri: String,
    #[serde(alias = "kafkaBrokerURI")]
    pub kafka_broker_uri: String,
    #[serde(alias = "schemaRegistryURI")]
    pub schema_registry_uri: String,
    /// Schema id used for every topic without an override.
    #[serde(alias = "schemaId")]
    pub schema_id: SchemaId,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Payload field path the partition key is read from.
    #[serde(default = "default_key_field")]
    pub key_field: String,
    #[serde(default = "default_true")]
    pub cache_schemas: bool,
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    /// Per-topic schema id overrides, keyed by entity name.
    #[serde(default)]
    pub schema_ids: BTreeMap<String, SchemaId>,
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub kafka: KafkaSection,
    #[serde(default)]
    pub registry: RegistrySection,
}

#[derive(Debug, Deserialize)]
pub struct MqttSection {
    #[serde(default = "default_qos")]
    pub qos: u8,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Largest MQTT packet accepted or sent, in bytes.
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            qos: default_qos(),
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_ms: default_timeout_ms(),
            capacity: default_capacity(),
            max_packet_size: default_max_packet_size(),
        }
    }
}

/// Per-topic dispatch queues.
#[derive(Debug, Deserialize)]
pub struct DispatchSection {
    #[serde(default = "default_buffer")]
    pub buffer: usize,
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self { buffer: default_buffer(), overflow: OverflowPolicy::default() }
    }
}

#[derive(Debug, Deserialize)]
pub struct KafkaSection {
    #[serde(default = "default_timeout_ms")]
    pub flush_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub probe: bool,
    /// Extra librdkafka client properties.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Default for KafkaSection {
    fn default() -> Self {
        Self {
            flush_timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_timeout_ms(),
            probe: true,
            properties: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegistrySection {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self { timeout_ms: default_timeout_ms() }
    }
}

fn default_client_id() -> String {
    mqtt_bridge::DEFAULT_CLIENT_ID.to_string()
}
fn default_key_field() -> String {
    envelope_avro::DEFAULT_KEY_FIELD.to_string()
}
fn default_true() -> bool {
    true
}
fn default_drain_timeout_ms() -> u64 {
    5_000
}
fn default_qos() -> u8 {
    1
}
fn default_keep_alive_secs() -> u64 {
    30
}
fn default_timeout_ms() -> u64 {
    10_000
}
fn default_capacity() -> usize {
    64
}
fn default_max_packet_size() -> usize {
    MAX_PACKET_SIZE
}
fn default_buffer() -> usize {
    1024
}

impl BridgeConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::config("read", format!("'{path}': {e}")))?;
        Self::parse(&content).map_err(|e| match e {
            ServerError::Config { context, detail } => {
                ServerError::Config { context, detail: format!("'{path}': {detail}") }
            }
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Self, ServerError> {
        let config: Self = toml::from_str(content).map_err(|e| ServerError::config("parse", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ServerError> {
        if self.client_id.trim().is_empty() {
            return Err(ServerError::config("client_id", "must not be empty"));
        }
        if self.key_field.is_empty() {
            return Err(ServerError::config("key_field", "must not be empty"));
        }
        if qos_from_level(self.mqtt.qos).is_none() {
            return Err(ServerError::config("mqtt.qos", format!("{} is not 0, 1 or 2", self.mqtt.qos)));
        }
        if self.mqtt.keep_alive_secs == 0 {
            return Err(ServerError::config("mqtt.keep_alive_secs", "must be at least 1"));
        }
        if self.mqtt.max_packet_size == 0 || self.mqtt.max_packet_size > MAX_PACKET_SIZE {
            return Err(ServerError::config(
                "mqtt.max_packet_size",
                format!("must be between 1 and {MAX_PACKET_SIZE}"),
            ));
        }
        if self.dispatch.buffer == 0 {
            return Err(ServerError::config("dispatch.buffer", "must be at least 1"));
        }
        self.schema_ids()?;
        Ok(())
    }

    /// Default schema id plus validated per-topic overrides.
    pub fn schema_ids(&self) -> Result<SchemaIds, ServerError> {
        let mut ids = SchemaIds::new(self.schema_id);
        for (name, id) in &self.schema_ids {
            let topic: EntityTopic = name.parse().map_err(|e| ServerError::config("schema_ids", e))?;
            ids = ids.with_override(topic, *id);
        }
        Ok(ids)
    }

    pub fn mqtt_settings(&self) -> Result<MqttSettings, ServerError> {
        let endpoint = normalize_uri(&self.mqtt_uri, "tcp", DEFAULT_MQTT_PORT)
            .map_err(|e| ServerError::config("mqtt_uri", e))?;
        if !matches!(endpoint.scheme.as_str(), "tcp" | "mqtt") {
            return Err(ServerError::config(
                "mqtt_uri",
                format!("unsupported scheme '{}'", endpoint.scheme),
            ));
        }
        let qos = qos_from_level(self.mqtt.qos)
            .ok_or_else(|| ServerError::config("mqtt.qos", format!("{} is not 0, 1 or 2", self.mqtt.qos)))?;

        let mut settings = MqttSettings::new(endpoint.host, endpoint.port);
        settings.client_id = self.client_id.clone();
        settings.keep_alive = Duration::from_secs(self.mqtt.keep_alive_secs);
        settings.connect_timeout = Duration::from_millis(self.mqtt.connect_timeout_ms);
        settings.capacity = self.mqtt.capacity;
        settings.max_packet_size = self.mqtt.max_packet_size;
        settings.qos = qos;
        Ok(settings)
    }

    pub fn publisher_config(&self) -> Result<PublisherConfig, ServerError> {
        let endpoint = normalize_uri(&self.kafka_broker_uri, "http", DEFAULT_KAFKA_PORT)
            .map_err(|e| ServerError::config("kafka_broker_uri", e))?;
        let mut config = PublisherConfig::new(endpoint.host_port());
        config.flush_timeout = Duration::from_millis(self.kafka.flush_timeout_ms);
        config.connect_timeout = Duration::from_millis(self.kafka.connect_timeout_ms);
        config.probe = self.kafka.probe;
        config.properties = self.kafka.properties.clone();
        Ok(config)
    }

    pub fn registry_url(&self) -> Result<String, ServerError> {
        normalize_uri(&self.schema_registry_uri, "http", DEFAULT_REGISTRY_PORT)
            .map(|endpoint| endpoint.url())
            .map_err(|e| ServerError::config("schema_registry_uri", e))
    }

    pub fn registry_timeout(&self) -> Duration {
        Duration::from_millis(self.registry.timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

// ---- Address normalization ----

/// A network address split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// Everything after the authority, including the leading `/`.
    pub path: String,
}

impl Endpoint {
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn url(&self) -> String {
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
    }
}

/// Fill in a missing scheme and port. A missing port falls back to
/// `default_port` with a warning.
pub fn normalize_uri(raw: &str, default_scheme: &str, default_port: u16) -> Result<Endpoint, String> {
    let raw = raw.trim();
    let (scheme, rest) = match raw.split_once("://") {
        Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
        None => (default_scheme.to_string(), raw),
    };
    if scheme.is_empty() {
        return Err(format!("'{raw}': empty scheme"));
    }

    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], rest[idx..].trim_end_matches('/')),
        None => (rest, ""),
    };
    if authority.is_empty() {
        return Err(format!("'{raw}': missing host"));
    }

    // Bracketed IPv6 literal keeps its colons.
    let (host, port) = match authority.strip_prefix('[') {
        Some(inner) => {
            let (addr, tail) = inner
                .split_once(']')
                .ok_or_else(|| format!("'{raw}': unterminated IPv6 literal"))?;
            let port = match tail {
                "" => None,
                t => Some(t.strip_prefix(':').ok_or_else(|| format!("'{raw}': invalid authority"))?),
            };
            (format!("[{addr}]"), port)
        }
        None => match authority.rsplit_once(':') {
            Some((host, port)) => (host.to_string(), Some(port)),
            None => (authority.to_string(), None),
        },
    };
    if host.is_empty() || host == "[]" {
        return Err(format!("'{raw}': missing host"));
    }

    let port = match port {
        Some(p) => p.parse::<u16>().map_err(|e| format!("'{raw}': invalid port '{p}': {e}"))?,
        None => {
            tracing::warn!(uri = %raw, port = default_port, "no port given, using default");
            default_port
        }
    };

    Ok(Endpoint { scheme, host, port, path: path.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        mqtt_uri = "localhost"
        kafka_broker_uri = "kafka:9093"
        schema_registry_uri = "registry"
        schema_id = 7
    "#;

    #[test]
    fn minimal_config_takes_defaults() {
        let cfg = BridgeConfig::parse(MINIMAL).unwrap();
        assert_eq!(cfg.client_id, "mqttconsumer1");
        assert_eq!(cfg.key_field, "@iot.id");
        assert!(cfg.cache_schemas);
        assert_eq!(cfg.drain_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.dispatch.buffer, 1024);
        assert_eq!(cfg.dispatch.overflow, OverflowPolicy::BackPressure);
        assert!(cfg.kafka.probe);
        assert_eq!(cfg.registry_timeout(), Duration::from_secs(10));

        let mqtt = cfg.mqtt_settings().unwrap();
        assert_eq!(mqtt.host, "localhost");
        assert_eq!(mqtt.port, DEFAULT_MQTT_PORT);
        assert_eq!(mqtt.qos, mqtt_bridge::QoS::AtLeastOnce);
        assert_eq!(mqtt.keep_alive, Duration::from_secs(30));
        assert_eq!(mqtt.max_packet_size, MAX_PACKET_SIZE);

        assert_eq!(cfg.publisher_config().unwrap().brokers, "kafka:9093");
        assert_eq!(cfg.registry_url().unwrap(), "http://registry:8081");

        let ids = cfg.schema_ids().unwrap();
        for topic in EntityTopic::ALL {
            assert_eq!(ids.for_topic(topic), SchemaId::new(7));
        }
    }

    #[test]
    fn property_file_names_are_accepted() {
        let cfg = BridgeConfig::parse(
            r#"
            frostServerURI = "tcp://frost:1884"
            kafkaBrokerURI = "localhost"
            schemaRegistryURI = "https://registry.local:8443/api/"
            schemaId = 3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.schema_id, SchemaId::new(3));
        let mqtt = cfg.mqtt_settings().unwrap();
        assert_eq!((mqtt.host.as_str(), mqtt.port), ("frost", 1884));
        assert_eq!(cfg.publisher_config().unwrap().brokers, "localhost:9092");
        assert_eq!(cfg.registry_url().unwrap(), "https://registry.local:8443/api");
    }

    #[test]
    fn full_config() {
        let cfg = BridgeConfig::parse(
            r#"
            mqtt_uri = "mqtt://frost:1883"
            kafka_broker_uri = "kafka:9092"
            schema_registry_uri = "http://registry:8081"
            schema_id = 7
            client_id = "bridge-2"
            key_field = "Datastream.@iot.id"
            cache_schemas = false
            drain_timeout_ms = 250

            [schema_ids]
            Observations = 9

            [mqtt]
            qos = 0
            keep_alive_secs = 5
            connect_timeout_ms = 500
            capacity = 8
            max_packet_size = 1048576

            [dispatch]
            buffer = 16
            overflow = "drop"

            [kafka]
            flush_timeout_ms = 2000
            probe = false
            [kafka.properties]
            "message.timeout.ms" = "30000"

            [registry]
            timeout_ms = 1500
            "#,
        )
        .unwrap();

        assert!(!cfg.cache_schemas);
        assert_eq!(cfg.dispatch.overflow, OverflowPolicy::Drop);
        let ids = cfg.schema_ids().unwrap();
        assert_eq!(ids.for_topic(EntityTopic::Observations), SchemaId::new(9));
        assert_eq!(ids.for_topic(EntityTopic::Things), SchemaId::new(7));

        let mqtt = cfg.mqtt_settings().unwrap();
        assert_eq!(mqtt.client_id, "bridge-2");
        assert_eq!(mqtt.qos, mqtt_bridge::QoS::AtMostOnce);
        assert_eq!(mqtt.connect_timeout, Duration::from_millis(500));
        assert_eq!(mqtt.capacity, 8);
        assert_eq!(mqtt.max_packet_size, 1_048_576);

        let kafka = cfg.publisher_config().unwrap();
        assert!(!kafka.probe);
        assert_eq!(kafka.flush_timeout, Duration::from_secs(2));
        assert_eq!(kafka.properties.get("message.timeout.ms").map(String::as_str), Some("30000"));
        assert_eq!(cfg.registry_timeout(), Duration::from_millis(1500));
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let cases = [
            // unknown topic override
            format!("{MINIMAL}\n[schema_ids]\nWidgets = 4\n"),
            // qos out of range
            format!("{MINIMAL}\n[mqtt]\nqos = 3\n"),
            format!("{MINIMAL}\n[mqtt]\nmax_packet_size = 0\n"),
            format!("{MINIMAL}\n[dispatch]\nbuffer = 0\n"),
            format!("{MINIMAL}\n[dispatch]\noverflow = \"block\"\n"),
            // missing schema id
            "mqtt_uri = \"a\"\nkafka_broker_uri = \"b\"\nschema_registry_uri = \"c\"\n".to_string(),
        ];
        for case in cases {
            let err = BridgeConfig::parse(&case).unwrap_err();
            assert!(matches!(err, ServerError::Config { .. }), "{case}: {err}");
        }
    }

    #[test]
    fn unsupported_mqtt_scheme() {
        let cfg = BridgeConfig::parse(&MINIMAL.replace("\"localhost\"", "\"ssl://frost:8883\"")).unwrap();
        assert!(matches!(cfg.mqtt_settings(), Err(ServerError::Config { .. })));
    }

    #[test]
    fn normalize_adds_scheme_and_port() {
        let e = normalize_uri("localhost", "tcp", 1883).unwrap();
        assert_eq!(e.url(), "tcp://localhost:1883");

        let e = normalize_uri("  broker:9093 ", "http", 9092).unwrap();
        assert_eq!(e.host_port(), "broker:9093");
        assert_eq!(e.scheme, "http");

        let e = normalize_uri("HTTP://reg/", "http", 8081).unwrap();
        assert_eq!(e.url(), "http://reg:8081");

        let e = normalize_uri("tcp://[::1]:1884", "tcp", 1883).unwrap();
        assert_eq!(e.host, "[::1]");
        assert_eq!(e.port, 1884);

        let e = normalize_uri("[fe80::1]", "tcp", 1883).unwrap();
        assert_eq!(e.host_port(), "[fe80::1]:1883");
    }

    #[test]
    fn normalize_rejects_garbage() {
        for raw in ["", "tcp://", "host:port", "host:70000", "://host", "[::1", "tcp://:1883"] {
            assert!(normalize_uri(raw, "tcp", 1883).is_err(), "{raw:?}");
        }
    }
}
