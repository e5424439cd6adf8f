use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use bridge_api::{RecordPublisher, SchemaLookup};
use envelope_avro::EnvelopeCodec;
use kafka_publisher::KafkaPublisher;
use mqtt_bridge::{ConnectionState, DispatchContext, Dispatcher, SubscriptionBridge};
use schema_registry::{CachedSchemaLookup, RegistryClient};

use crate::config::{BridgeConfig, RunArgs};
use crate::error::ServerError;

/// Why the supervisor stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Exit {
    /// Termination signal, or the connection closed on request.
    Shutdown,
    /// Inbound connection dropped.
    Lost,
}

pub async fn run(args: RunArgs) -> Result<(), ServerError> {
    tracing::info!("mqtt-kafka-bridge starting");

    // --- Load config ---
    let config = BridgeConfig::load(&args.config)?;
    tracing::info!(config = %args.config, "loaded config");

    let schema_ids = config.schema_ids()?;
    let mqtt = config.mqtt_settings()?;
    let publisher_config = config.publisher_config()?;
    let registry_url = config.registry_url()?;

    // Registered up front so a failure surfaces before any connection opens.
    let shutdown = CancellationToken::new();
    let signals = spawn_signal_listener(shutdown.clone())?;

    // --- SchemaLookup ---
    let lookup = build_lookup(&registry_url, config.registry_timeout(), config.cache_schemas)?;

    // --- Publisher ---
    let Some(publisher) = or_shutdown(&shutdown, KafkaPublisher::open(&publisher_config)).await else {
        tracing::info!("shutdown requested during startup");
        return Ok(());
    };
    let publisher = Arc::new(publisher?);
    tracing::info!(brokers = %publisher_config.brokers, "kafka publisher ready");

    // --- Codec + dispatcher ---
    let codec = EnvelopeCodec::new(config.key_field.clone());
    tracing::info!(
        schema_id = %schema_ids.default_id(),
        key_field = %codec.key_field(),
        "envelope codec ready"
    );
    let ctx = Arc::new(DispatchContext::new(lookup, publisher.clone(), codec, schema_ids));
    let dispatcher = Dispatcher::spawn(ctx, config.dispatch.buffer, config.dispatch.overflow);

    // --- Inbound bridge ---
    let opened = match or_shutdown(&shutdown, SubscriptionBridge::open(&mqtt, dispatcher)).await {
        Some(opened) => opened,
        None => {
            tracing::info!("shutdown requested during startup");
            release(publisher.as_ref()).await;
            return Ok(());
        }
    };
    let (bridge, event_loop) = match opened {
        Ok(opened) => opened,
        Err(e) => {
            signals.abort();
            release(publisher.as_ref()).await;
            return Err(e.into());
        }
    };
    tracing::info!("bridge ready");

    let exit = supervise(bridge.monitor().subscribe(), &shutdown).await;
    signals.abort();

    shutdown_sequence(exit, &bridge, event_loop, publisher.as_ref(), config.drain_timeout()).await
}

/// Run `fut` unless shutdown is requested first.
pub(crate) async fn or_shutdown<F: Future>(token: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        out = fut => Some(out),
    }
}

/// Stop inbound first, drain what it already accepted, then release the
/// publisher. After a loss the broker is gone, so no DISCONNECT is sent.
pub(crate) async fn shutdown_sequence(
    exit: Exit,
    bridge: &SubscriptionBridge,
    event_loop: JoinHandle<()>,
    publisher: &dyn RecordPublisher,
    drain_timeout: Duration,
) -> Result<(), ServerError> {
    match exit {
        Exit::Shutdown => {
            tracing::info!("shutting down...");
            if let Err(e) = bridge.disconnect().await {
                tracing::warn!(error = %e, "mqtt disconnect failed");
            }
        }
        Exit::Lost => {
            tracing::error!("inbound connection lost, skipping mqtt disconnect");
        }
    }
    drain(event_loop, drain_timeout).await;
    release(publisher).await;

    match exit {
        Exit::Shutdown => {
            tracing::info!("shutdown complete");
            Ok(())
        }
        Exit::Lost => Err(ServerError::TransportLost),
    }
}

fn build_lookup(url: &str, timeout: Duration, cache: bool) -> Result<Arc<dyn SchemaLookup>, ServerError> {
    let client = RegistryClient::new(url, timeout)?;
    tracing::info!(url = %client.base_url(), cache, "schema registry configured");
    if cache {
        Ok(Arc::new(CachedSchemaLookup::new(client)))
    } else {
        Ok(Arc::new(client))
    }
}

/// Cancel `token` on SIGINT or SIGTERM.
fn spawn_signal_listener(token: CancellationToken) -> Result<JoinHandle<()>, ServerError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        Ok(tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                _ = sigint.recv() => tracing::info!("received SIGINT"),
            }
            token.cancel();
        }))
    }
    #[cfg(not(unix))]
    {
        Ok(tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("received Ctrl+C"),
                Err(e) => tracing::error!(error = %e, "failed to listen for Ctrl+C"),
            }
            token.cancel();
        }))
    }
}

/// Wait for a shutdown request or a terminal connection state.
pub(crate) async fn supervise(mut state: watch::Receiver<ConnectionState>, shutdown: &CancellationToken) -> Exit {
    tokio::select! {
        _ = shutdown.cancelled() => Exit::Shutdown,
        terminal = state.wait_for(|s| s.is_terminal()) => match terminal.map(|s| *s) {
            Ok(ConnectionState::Lost) => Exit::Lost,
            Ok(_) => Exit::Shutdown,
            // Sender gone without a terminal state: nothing is feeding us any more.
            Err(_) => Exit::Lost,
        },
    }
}

/// Wait for the event loop (and with it the dispatcher) to finish, up
/// to `timeout`. Aborts it afterwards.
pub(crate) async fn drain(mut event_loop: JoinHandle<()>, timeout: Duration) {
    match tokio::time::timeout(timeout, &mut event_loop).await {
        Ok(Ok(())) => tracing::info!("inbound drained"),
        Ok(Err(e)) => tracing::error!(error = %e, "event loop task failed"),
        Err(_) => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "drain timed out, aborting event loop");
            event_loop.abort();
        }
    }
}

async fn release(publisher: &dyn RecordPublisher) {
    match publisher.disconnect().await {
        Ok(()) => tracing::info!("kafka publisher released"),
        Err(e) => tracing::error!(error = %e, "kafka disconnect failed"),
    }
}
