use std::time::Duration;

use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish, QoS, SubscribeFilter};
use tokio::task::JoinHandle;

use bridge_api::{BridgeError, EntityTopic, RawMessage};

use crate::dispatch::Dispatcher;
use crate::state::{ConnectionMonitor, ConnectionState};

pub const DEFAULT_CLIENT_ID: &str = "mqttconsumer1";
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Largest packet MQTT 3.1.1 can encode (remaining length 268 435 455).
pub const MAX_PACKET_SIZE: usize = 268_435_455;

/// Inbound connection parameters.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub qos: QoS,
    /// Capacity of the client request channel.
    pub capacity: usize,
    pub connect_timeout: Duration,
    /// Incoming and outgoing packet size limit. A larger packet ends the
    /// connection, so keep this above the largest expected payload.
    pub max_packet_size: usize,
}

impl MqttSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            keep_alive: DEFAULT_KEEP_ALIVE,
            qos: QoS::AtLeastOnce,
            capacity: 64,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_packet_size: MAX_PACKET_SIZE,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }
}

/// Map a numeric QoS level (0, 1, 2) to the client's QoS.
pub fn qos_from_level(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════
//  SubscriptionBridge
// ═══════════════════════════════════════════════════════════════

/// Owns the inbound MQTT connection.
///
/// A background task drives the event loop and feeds every PUBLISH on a
/// known entity topic into the [`Dispatcher`]. The task ends when the
/// connection reaches a terminal state, after draining the dispatcher.
pub struct SubscriptionBridge {
    client: AsyncClient,
    monitor: ConnectionMonitor,
    endpoint: String,
}

impl SubscriptionBridge {
    /// Connect, wait for CONNACK and subscribe to all entity topics in
    /// one batch. Returns the bridge and the event-loop task handle.
    pub async fn open(
        settings: &MqttSettings,
        dispatcher: Dispatcher,
    ) -> Result<(Self, JoinHandle<()>), BridgeError> {
        let endpoint = settings.endpoint();
        tracing::info!(endpoint = %endpoint, client_id = %settings.client_id, "connecting to mqtt broker");

        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_clean_session(true);
        options.set_keep_alive(settings.keep_alive);
        options.set_max_packet_size(settings.max_packet_size, settings.max_packet_size);
        let (client, mut eventloop) = AsyncClient::new(options, settings.capacity.max(1));

        let connack = tokio::time::timeout(settings.connect_timeout, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => return Ok(ack),
                    Ok(_) => continue,
                    Err(e) => return Err(e),
                }
            }
        })
        .await;

        match connack {
            Ok(Ok(ack)) => {
                tracing::info!(endpoint = %endpoint, session_present = ack.session_present, "mqtt connected");
            }
            Ok(Err(e)) => return Err(BridgeError::connect(&endpoint, e)),
            Err(_) => {
                return Err(BridgeError::connect(
                    &endpoint,
                    format!("no CONNACK within {:?}", settings.connect_timeout),
                ));
            }
        }

        let monitor = ConnectionMonitor::new();
        monitor.transition(ConnectionState::on_connected);

        let filters = EntityTopic::ALL
            .into_iter()
            .map(|topic| SubscribeFilter::new(topic.inbound(), settings.qos));
        client
            .subscribe_many(filters)
            .await
            .map_err(|e| BridgeError::connect(&endpoint, format!("subscribe: {e}")))?;
        tracing::info!(topics = EntityTopic::ALL.len(), qos = ?settings.qos, "subscription requested");

        let handle = tokio::spawn(run_event_loop(eventloop, dispatcher, monitor.clone(), endpoint.clone()));

        Ok((Self { client, monitor, endpoint }, handle))
    }

    pub fn monitor(&self) -> &ConnectionMonitor {
        &self.monitor
    }

    pub fn state(&self) -> ConnectionState {
        self.monitor.state()
    }

    /// Unsubscribe all topics and send DISCONNECT. A no-op unless the
    /// connection is currently up.
    pub async fn disconnect(&self) -> Result<(), BridgeError> {
        if !self.monitor.begin_close() {
            tracing::debug!(state = %self.monitor.state(), "mqtt disconnect skipped");
            return Ok(());
        }

        tracing::info!(endpoint = %self.endpoint, "disconnecting from mqtt broker");
        for topic in EntityTopic::ALL {
            if let Err(e) = self.client.unsubscribe(topic.inbound()).await {
                tracing::warn!(topic = %topic, error = %e, "unsubscribe failed");
            }
        }
        self.client
            .disconnect()
            .await
            .map_err(|e| BridgeError::TransportLoss(format!("disconnect: {e}")))
    }
}

impl std::fmt::Debug for SubscriptionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionBridge")
            .field("endpoint", &self.endpoint)
            .field("state", &self.monitor.state())
            .finish_non_exhaustive()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Event loop
// ═══════════════════════════════════════════════════════════════

#[derive(Debug)]
pub(crate) enum Step {
    Message(Publish),
    Continue,
    /// Our DISCONNECT went out.
    Closed,
    Failed(String),
}

pub(crate) fn classify(event: Result<Event, ConnectionError>) -> Step {
    match event {
        Ok(Event::Incoming(Packet::Publish(publish))) => Step::Message(publish),
        Ok(Event::Incoming(Packet::SubAck(ack))) => {
            tracing::info!(granted = ack.return_codes.len(), "subscribed");
            Step::Continue
        }
        Ok(Event::Incoming(Packet::Disconnect)) => Step::Failed("broker sent DISCONNECT".to_string()),
        Ok(Event::Outgoing(Outgoing::Disconnect)) => Step::Closed,
        Ok(_) => Step::Continue,
        Err(e) => Step::Failed(e.to_string()),
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    dispatcher: Dispatcher,
    monitor: ConnectionMonitor,
    endpoint: String,
) {
    loop {
        match classify(eventloop.poll().await) {
            Step::Message(publish) => route(&dispatcher, publish).await,
            Step::Continue => {}
            Step::Closed => {
                monitor.transition(ConnectionState::on_closed);
                tracing::info!(endpoint = %endpoint, "mqtt connection closed");
                break;
            }
            Step::Failed(reason) => match monitor.transition(ConnectionState::on_error) {
                ConnectionState::Lost => {
                    tracing::error!(endpoint = %endpoint, error = %reason, "mqtt connection lost");
                    break;
                }
                state => {
                    tracing::info!(endpoint = %endpoint, %state, error = %reason, "mqtt connection ended");
                    break;
                }
            },
        }
    }

    dispatcher.drain().await;
    tracing::info!(endpoint = %endpoint, state = %monitor.state(), "mqtt event loop stopped");
}

async fn route(dispatcher: &Dispatcher, publish: Publish) {
    match EntityTopic::from_inbound(&publish.topic) {
        Some(topic) => {
            tracing::debug!(topic = %publish.topic, bytes = publish.payload.len(), "message received");
            dispatcher.submit(RawMessage::new(topic, publish.payload)).await;
        }
        None => {
            tracing::warn!(topic = %publish.topic, "message on unknown topic dropped");
        }
    }
}
