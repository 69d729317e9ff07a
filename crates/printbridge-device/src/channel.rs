//! MQTT messaging channel to a printer.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, NetworkOptions, Packet, QoS, TlsConfiguration,
    Transport,
};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::{DeviceConfig, SessionSettings};
use crate::error::{DeviceError, Result};
use crate::tls;

/// Full status reports from X1 printers exceed rumqttc's 10 KiB default.
const MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Capacity of the client request queue.
const REQUEST_CAPACITY: usize = 64;

/// Outbound half of a printer messaging channel.
///
/// Publishing is best effort: `Ok` means the message was queued, not
/// that the printer received it. Callers learn the outcome from
/// subsequent telemetry.
pub trait Channel: Send + Sync {
    /// Queue a message for publication.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Close the channel. Must be safe to call more than once.
    fn close(&self);
}

/// Receiver of inbound channel events.
pub(crate) trait ChannelEvents: Send + Sync + 'static {
    /// Connection (re)established and report topic subscribed.
    fn connected(&self);
    /// Message received on the report topic.
    fn message(&self, payload: &[u8]);
    /// Connection lost.
    fn disconnected(&self);
}

/// [`Channel`] over MQTT with TLS.
pub struct MqttChannel {
    client: AsyncClient,
}

impl MqttChannel {
    /// Create the client; nothing is sent until the event loop is spawned.
    pub(crate) fn new(config: &DeviceConfig, settings: &SessionSettings) -> (Self, EventLoop) {
        let client_id = format!("printbridge_{}", uuid::Uuid::new_v4().simple());

        let mut options = MqttOptions::new(client_id, config.host.clone(), settings.mqtt_port);
        options.set_credentials(settings.username.clone(), config.access_code.clone());
        options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(1)));
        options.set_clean_session(true);
        options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
            tls::printer_client_config(),
        )));

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);

        let mut network = NetworkOptions::new();
        network.set_connection_timeout(settings.connect_timeout_secs);
        event_loop.set_network_options(network);

        (Self { client }, event_loop)
    }

    /// Spawn the task driving the event loop.
    ///
    /// The task reconnects after `reconnect_delay` for as long as it
    /// runs; abort the returned handle to stop it.
    pub(crate) fn spawn(
        &self,
        event_loop: EventLoop,
        config: &DeviceConfig,
        settings: &SessionSettings,
        events: Arc<dyn ChannelEvents>,
    ) -> JoinHandle<()> {
        let driver = EventDriver {
            client: self.client.clone(),
            report_topic: config.report_topic(),
            host: config.host.clone(),
            reconnect_delay: settings.reconnect_delay(),
            events,
        };
        tokio::spawn(driver.run(event_loop))
    }
}

impl Channel for MqttChannel {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| DeviceError::connection(format!("publish failed: {e}")))
    }

    fn close(&self) {
        // Fails once the event loop is gone, which is already closed.
        let _ = self.client.try_disconnect();
    }
}

struct EventDriver {
    client: AsyncClient,
    report_topic: String,
    host: String,
    reconnect_delay: Duration,
    events: Arc<dyn ChannelEvents>,
}

impl EventDriver {
    async fn run(self, mut event_loop: EventLoop) {
        let mut connected = false;

        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(host = %self.host, "printer connected");
                    connected = true;
                    // Clean sessions drop subscriptions, so resubscribe on every connect.
                    if let Err(e) = self.client.try_subscribe(&self.report_topic, QoS::AtMostOnce) {
                        debug!(host = %self.host, error = %e, "subscribe failed");
                    }
                    self.events.connected();
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if publish.topic == self.report_topic {
                        self.events.message(&publish.payload);
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    if std::mem::take(&mut connected) {
                        info!(host = %self.host, "printer disconnected");
                        self.events.disconnected();
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    if std::mem::take(&mut connected) {
                        info!(host = %self.host, error = %e, "printer disconnected");
                        self.events.disconnected();
                    } else {
                        debug!(host = %self.host, error = %e, "connection attempt failed");
                    }
                    tokio::time::sleep(self.reconnect_delay).await;
                }
            }
        }
    }
}
