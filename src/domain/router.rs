//! Event Router
//!
//! Consumes the network, MQTT and BLE event streams and hands each event to
//! the bridge or turns it into a transport command. Owns no state beyond
//! the bridge itself.

use crate::domain::bridge::AttributeBridge;
use crate::domain::models::{
    BleCommand, BleEvent, ConnectParams, MqttCommand, MqttEvent, NetworkEvent,
};
use crate::domain::settings::Settings;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct EventRouter {
    bridge: AttributeBridge,
    connect_params: ConnectParams,
    reconnect_delay: Duration,
    reconnect_task: Option<JoinHandle<()>>,
    ble_tx: mpsc::UnboundedSender<BleCommand>,
    mqtt_tx: mpsc::UnboundedSender<MqttCommand>,
}

impl EventRouter {
    pub fn new(
        settings: &Settings,
        ble_tx: mpsc::UnboundedSender<BleCommand>,
        mqtt_tx: mpsc::UnboundedSender<MqttCommand>,
    ) -> Self {
        Self {
            bridge: AttributeBridge::new(settings, ble_tx.clone(), mqtt_tx.clone()),
            connect_params: settings.mqtt.connect_params(),
            reconnect_delay: Duration::from_millis(settings.mqtt.reconnect_delay_ms),
            reconnect_task: None,
            ble_tx,
            mqtt_tx,
        }
    }

    pub fn bridge(&self) -> &AttributeBridge {
        &self.bridge
    }

    /// Route events until every event source has gone away.
    pub async fn run(
        mut self,
        mut network_rx: mpsc::UnboundedReceiver<NetworkEvent>,
        mut mqtt_rx: mpsc::UnboundedReceiver<MqttEvent>,
        mut ble_rx: mpsc::UnboundedReceiver<BleEvent>,
    ) {
        info!("Event router started");

        loop {
            tokio::select! {
                Some(event) = network_rx.recv() => self.handle_network_event(event),
                Some(event) = mqtt_rx.recv() => self.handle_mqtt_event(event),
                Some(event) = ble_rx.recv() => self.handle_ble_event(event),
                else => break,
            }
        }

        info!("All event sources closed, event router stopping");
    }

    pub fn handle_network_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Joined => {
                info!(
                    "Network joined, connecting to MQTT broker {}:{}",
                    self.connect_params.host, self.connect_params.port
                );
                self.cancel_reconnect();
                self.send_mqtt(MqttCommand::Connect(self.connect_params.clone()));
            }
            NetworkEvent::Lost => {
                info!("Network lost, stopping MQTT and BLE");
                self.cancel_reconnect();
                self.send_mqtt(MqttCommand::Disconnect);
                // A fresh broker session has no subscriptions; devices are
                // rediscovered and re-registered once MQTT is back.
                self.send_ble(BleCommand::DisconnectAll);
            }
        }
    }

    pub fn handle_mqtt_event(&mut self, event: MqttEvent) {
        match event {
            MqttEvent::Connected => {
                info!("Connected to MQTT, scanning for BLE devices");
                self.send_ble(BleCommand::StartScan);
            }
            MqttEvent::Disconnected => {
                info!(
                    "Disconnected from MQTT, disconnecting {} BLE device(s)",
                    self.bridge.connected_devices().count()
                );
                self.send_ble(BleCommand::DisconnectAll);
                self.reconnect();
            }
            MqttEvent::MessageReceived { topic, payload } => {
                self.bridge.on_message(&topic, payload)
            }
        }
    }

    pub fn handle_ble_event(&mut self, event: BleEvent) {
        match event {
            BleEvent::DeviceDiscovered(address) => self.bridge.on_device_discovered(address),
            BleEvent::DeviceConnected(address) => self.bridge.on_device_connected(address),
            BleEvent::DeviceDisconnected(address) => self.bridge.on_device_disconnected(address),
            BleEvent::ServicesDiscovered(address) => self.bridge.on_services_discovered(address),
            BleEvent::CharacteristicFound { id, properties } => {
                self.bridge.on_characteristic_found(id, properties)
            }
            BleEvent::CharacteristicValue { id, value } => {
                self.bridge.on_characteristic_value(id, value)
            }
        }
    }

    fn reconnect(&mut self) {
        self.cancel_reconnect();
        let command = MqttCommand::Connect(self.connect_params.clone());

        if self.reconnect_delay.is_zero() {
            self.send_mqtt(command);
            return;
        }

        let mqtt_tx = self.mqtt_tx.clone();
        let delay = self.reconnect_delay;
        self.reconnect_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if mqtt_tx.send(command).is_err() {
                warn!("MQTT transport is gone, dropping reconnect");
            }
        }));
    }

    fn cancel_reconnect(&mut self) {
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
    }

    fn send_ble(&self, command: BleCommand) {
        if self.ble_tx.send(command).is_err() {
            warn!("BLE transport is gone, dropping command");
        }
    }

    fn send_mqtt(&self, command: MqttCommand) {
        if self.mqtt_tx.send(command).is_err() {
            warn!("MQTT transport is gone, dropping command");
        }
    }
}

impl Drop for EventRouter {
    fn drop(&mut self) {
        self.cancel_reconnect();
    }
}
