//! Inbound side of the bridge.
//!
//! [`SubscriptionBridge`] owns the MQTT connection and feeds entity-topic
//! messages into the [`Dispatcher`], which runs one ordered worker per
//! topic. [`ConnectionMonitor`] exposes the connection state machine.

mod bridge;
mod dispatch;
mod state;

#[cfg(test)]
mod testing;

pub use bridge::{
    qos_from_level, MqttSettings, SubscriptionBridge, DEFAULT_CLIENT_ID, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_KEEP_ALIVE, MAX_PACKET_SIZE,
};
pub use dispatch::{DispatchContext, Dispatcher};
pub use state::{ConnectionMonitor, ConnectionState};

pub use rumqttc::QoS;
