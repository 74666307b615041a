//! MQTT Transport
//!
//! Executes [`MqttCommand`]s against a `rumqttc` client and reports broker
//! state and inbound publishes as [`MqttEvent`]s.
//!
//! Every command is fire-and-forget: requests are queued with the
//! non-blocking `try_*` client calls so a dead connection never stalls the
//! command loop. When the event loop fails it reports `Disconnected` and
//! stops; the router decides when to connect again.

use crate::domain::models::{ConnectParams, MqttCommand, MqttEvent, Qos};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outgoing request queue depth handed to `rumqttc`.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

impl From<Qos> for rumqttc::QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => rumqttc::QoS::AtMostOnce,
            Qos::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            Qos::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

pub struct MqttService {
    event_sender: mpsc::UnboundedSender<MqttEvent>,
    keep_alive: Duration,
    client: Option<AsyncClient>,
    event_loop_task: Option<JoinHandle<()>>,
}

impl MqttService {
    pub fn new(event_sender: mpsc::UnboundedSender<MqttEvent>, keep_alive: Duration) -> Self {
        Self {
            event_sender,
            keep_alive,
            client: None,
            event_loop_task: None,
        }
    }

    /// Process commands until the router drops its sender.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<MqttCommand>) {
        while let Some(command) = commands.recv().await {
            self.handle(command);
        }

        self.disconnect();
        info!("MQTT command channel closed");
    }

    fn handle(&mut self, command: MqttCommand) {
        match command {
            MqttCommand::Connect(params) => self.connect(params),
            MqttCommand::Disconnect => self.disconnect(),
            MqttCommand::Publish {
                topic,
                payload,
                qos,
                retain,
            } => {
                let Some(client) = &self.client else {
                    debug!("Not connected, dropping publish to {}", topic);
                    return;
                };
                if let Err(e) = client.try_publish(topic.as_str(), qos.into(), retain, payload) {
                    warn!("Failed to publish to {}: {}", topic, e);
                }
            }
            MqttCommand::Subscribe { topic, qos } => {
                let Some(client) = &self.client else {
                    debug!("Not connected, dropping subscribe to {}", topic);
                    return;
                };
                debug!("Subscribing to {}", topic);
                if let Err(e) = client.try_subscribe(topic.as_str(), qos.into()) {
                    warn!("Failed to subscribe to {}: {}", topic, e);
                }
            }
            MqttCommand::Unsubscribe { topic } => {
                let Some(client) = &self.client else {
                    return;
                };
                debug!("Unsubscribing from {}", topic);
                if let Err(e) = client.try_unsubscribe(topic.as_str()) {
                    warn!("Failed to unsubscribe from {}: {}", topic, e);
                }
            }
        }
    }

    fn connect(&mut self, params: ConnectParams) {
        self.stop_event_loop();
        info!("Connecting to MQTT broker {}:{}", params.host, params.port);

        let mut options = MqttOptions::new(params.client_id, params.host, params.port);
        options.set_keep_alive(self.keep_alive);
        if let Some(username) = params.username {
            options.set_credentials(username, params.password.unwrap_or_default());
        }

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        self.client = Some(client);
        self.event_loop_task = Some(tokio::spawn(poll_event_loop(
            event_loop,
            self.event_sender.clone(),
        )));
    }

    /// Requested disconnect; does not report `Disconnected`, so no reconnect follows.
    fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            info!("Disconnecting from MQTT broker");
            if let Err(e) = client.try_disconnect() {
                debug!("Disconnect request not sent: {}", e);
            }
        }
        self.stop_event_loop();
    }

    fn stop_event_loop(&mut self) {
        if let Some(task) = self.event_loop_task.take() {
            task.abort();
        }
    }
}

impl Drop for MqttService {
    fn drop(&mut self) {
        self.stop_event_loop();
    }
}

async fn poll_event_loop(mut event_loop: EventLoop, sender: mpsc::UnboundedSender<MqttEvent>) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT session established");
                let _ = sender.send(MqttEvent::Connected);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let _ = sender.send(MqttEvent::MessageReceived {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                });
            }
            Ok(_) => {}
            Err(e) => {
                error!("MQTT connection lost: {}", e);
                let _ = sender.send(MqttEvent::Disconnected);
                break;
            }
        }
    }
}
