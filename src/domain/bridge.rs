//! Attribute Bridge
//!
//! Per-device state machine that turns GATT characteristics into MQTT
//! topics and MQTT requests into GATT operations.
//!
//! ```text
//! Discovered ──connect──▶ Connected ──discovery──▶ ServicesDiscovered
//!      ▲                      │                           │
//!      └──────────────── disconnect (teardown) ◀──────────┘
//! ```
//!
//! Only `Connected` and `ServicesDiscovered` hold state here; the earlier
//! phases belong to the BLE transport. State is discarded on disconnect and
//! rebuilt by the next discovery pass.

use crate::domain::identifiers::{parse_topic, AttributeUuid, DeviceAddress};
use crate::domain::models::{BleCommand, CharacteristicId, MqttCommand, Properties, Qos};
use crate::domain::policy::ConnectionPolicy;
use crate::domain::settings::Settings;
use crate::domain::topics::{presence_topic, Direction, TopicScheme};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePhase {
    Connected,
    ServicesDiscovered,
}

/// Everything registered for one connected device.
#[derive(Debug)]
struct DeviceBridgeState {
    phase: DevicePhase,
    characteristics: HashMap<(AttributeUuid, AttributeUuid), Properties>,
}

impl DeviceBridgeState {
    fn new() -> Self {
        Self {
            phase: DevicePhase::Connected,
            characteristics: HashMap::new(),
        }
    }
}

pub struct AttributeBridge {
    devices: HashMap<DeviceAddress, DeviceBridgeState>,
    topics: TopicScheme,
    policy: ConnectionPolicy,
    qos: Qos,
    retain: bool,
    ble_tx: mpsc::UnboundedSender<BleCommand>,
    mqtt_tx: mpsc::UnboundedSender<MqttCommand>,
}

impl AttributeBridge {
    pub fn new(
        settings: &Settings,
        ble_tx: mpsc::UnboundedSender<BleCommand>,
        mqtt_tx: mpsc::UnboundedSender<MqttCommand>,
    ) -> Self {
        Self {
            devices: HashMap::new(),
            topics: TopicScheme::from_settings(&settings.mqtt),
            policy: ConnectionPolicy::from_settings(&settings.ble),
            qos: settings.mqtt.qos,
            retain: settings.mqtt.retain,
            ble_tx,
            mqtt_tx,
        }
    }

    pub fn device_phase(&self, address: &DeviceAddress) -> Option<DevicePhase> {
        self.devices.get(address).map(|state| state.phase)
    }

    pub fn connected_devices(&self) -> impl Iterator<Item = &DeviceAddress> {
        self.devices.keys()
    }

    pub fn on_device_discovered(&mut self, address: DeviceAddress) {
        if self.devices.contains_key(&address) {
            trace!("Ignoring advertisement from connected device {}", address);
            return;
        }

        let connect = self.policy.should_connect(&address.to_string());
        info!(
            "Discovered BLE device: {}, {}connecting",
            address,
            if connect { "" } else { "not " }
        );

        if connect {
            self.send_ble(BleCommand::Connect(address));
        }
    }

    pub fn on_device_connected(&mut self, address: DeviceAddress) {
        info!("Connected to device: {}, discovering services", address);

        if let Some(stale) = self.devices.remove(&address) {
            warn!("Device {} reported connected twice, dropping old registrations", address);
            self.unregister_all(&address, stale);
        }

        self.publish_presence(&address, true);
        self.devices.insert(address, DeviceBridgeState::new());
        self.send_ble(BleCommand::DiscoverServices(address));
    }

    pub fn on_characteristic_found(&mut self, id: CharacteristicId, properties: Properties) {
        let Some(state) = self.devices.get_mut(&id.address) else {
            debug!("Characteristic {} found on unknown device, ignoring", id);
            return;
        };

        let key = (id.service, id.characteristic);
        if state.characteristics.contains_key(&key) {
            debug!("Characteristic {} already registered", id);
            return;
        }
        state.characteristics.insert(key, properties);

        debug!("Found characteristic {} (properties {:#04x})", id, properties.bits());
        let base = self.topics.base_topic(&id);

        if properties.contains(Properties::READ) {
            let topic = self.topics.decorated_topic(&base, Direction::Get);
            self.send_mqtt(MqttCommand::Subscribe {
                topic,
                qos: self.qos,
            });
            self.send_ble(BleCommand::ReadCharacteristic(id));
        }

        if properties.contains(Properties::WRITE) {
            let topic = self.topics.decorated_topic(&base, Direction::Set);
            self.send_mqtt(MqttCommand::Subscribe {
                topic,
                qos: self.qos,
            });
        }

        if properties.contains(Properties::NOTIFY) {
            self.send_ble(BleCommand::RegisterNotify(id));
        }
    }

    pub fn on_services_discovered(&mut self, address: DeviceAddress) {
        match self.devices.get_mut(&address) {
            Some(state) => {
                state.phase = DevicePhase::ServicesDiscovered;
                debug!(
                    "Services discovered on device: {} ({} characteristics)",
                    address,
                    state.characteristics.len()
                );
            }
            None => debug!("Services discovered on unknown device {}, ignoring", address),
        }
    }

    /// Read result or notification: forward the raw bytes to the base topic.
    pub fn on_characteristic_value(&mut self, id: CharacteristicId, value: Vec<u8>) {
        let known = self
            .devices
            .get(&id.address)
            .is_some_and(|state| {
                state
                    .characteristics
                    .contains_key(&(id.service, id.characteristic))
            });
        if !known {
            debug!("Dropping value for unregistered characteristic {}", id);
            return;
        }

        let topic = self.topics.base_topic(&id);
        info!("Publishing: {}", topic);
        trace!("Value: {:02X?}", value);
        self.send_mqtt(MqttCommand::Publish {
            topic,
            payload: value,
            qos: self.qos,
            retain: self.retain,
        });
    }

    pub fn on_device_disconnected(&mut self, address: DeviceAddress) {
        info!("Disconnected from device: {}", address);
        self.publish_presence(&address, false);

        if let Some(state) = self.devices.remove(&address) {
            self.unregister_all(&address, state);
        }
    }

    /// Inbound MQTT message. Anything outside the bridge's namespace, or for
    /// a characteristic no longer registered, is dropped silently.
    pub fn on_message(&mut self, topic: &str, payload: Vec<u8>) {
        let Some((direction, base)) = self.topics.classify(topic) else {
            trace!("Ignoring message on foreign topic {}", topic);
            return;
        };

        let (address, service, characteristic) = match parse_topic(base) {
            Ok(parts) => parts,
            Err(e) => {
                debug!("Dropping request: {}", e);
                return;
            }
        };
        let id = CharacteristicId::new(address, service, characteristic);

        let Some(properties) = self
            .devices
            .get(&address)
            .and_then(|state| state.characteristics.get(&(service, characteristic)))
            .copied()
        else {
            debug!("Dropping request for unregistered characteristic {}", id);
            return;
        };

        match direction {
            Direction::Get if properties.contains(Properties::READ) => {
                debug!("Got read request: {}", topic);
                self.send_ble(BleCommand::ReadCharacteristic(id));
            }
            Direction::Set if properties.contains(Properties::WRITE) => {
                debug!("Got write request: {}, len: {}", topic, payload.len());
                self.send_ble(BleCommand::WriteCharacteristic { id, value: payload });
            }
            _ => debug!("Characteristic {} does not support {:?}", id, direction),
        }
    }

    /// Inverse of [`Self::on_characteristic_found`] for every recorded characteristic.
    fn unregister_all(&self, address: &DeviceAddress, state: DeviceBridgeState) {
        for ((service, characteristic), properties) in state.characteristics {
            let id = CharacteristicId::new(*address, service, characteristic);
            let base = self.topics.base_topic(&id);

            if properties.contains(Properties::READ) {
                let topic = self.topics.decorated_topic(&base, Direction::Get);
                self.send_mqtt(MqttCommand::Unsubscribe { topic });
            }

            if properties.contains(Properties::WRITE) {
                let topic = self.topics.decorated_topic(&base, Direction::Set);
                self.send_mqtt(MqttCommand::Unsubscribe { topic });
            }

            if properties.contains(Properties::NOTIFY) {
                self.send_ble(BleCommand::UnregisterNotify(id));
            }
        }
    }

    fn publish_presence(&self, address: &DeviceAddress, connected: bool) {
        let payload = if connected { "true" } else { "false" };
        self.send_mqtt(MqttCommand::Publish {
            topic: presence_topic(address),
            payload: payload.as_bytes().to_vec(),
            qos: self.qos,
            retain: self.retain,
        });
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

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;

    pub(crate) fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    pub(crate) fn test_settings() -> Settings {
        let mut settings = Settings::default();
        settings.mqtt.get_suffix = "/get".to_string();
        settings.mqtt.set_suffix = "/set".to_string();
        settings.mqtt.qos = Qos::AtLeastOnce;
        settings.mqtt.retain = true;
        settings
    }

    struct Harness {
        bridge: AttributeBridge,
        ble_rx: mpsc::UnboundedReceiver<BleCommand>,
        mqtt_rx: mpsc::UnboundedReceiver<MqttCommand>,
    }

    impl Harness {
        fn new(settings: &Settings) -> Self {
            let (ble_tx, ble_rx) = mpsc::unbounded_channel();
            let (mqtt_tx, mqtt_rx) = mpsc::unbounded_channel();
            Self {
                bridge: AttributeBridge::new(settings, ble_tx, mqtt_tx),
                ble_rx,
                mqtt_rx,
            }
        }

        fn ble(&mut self) -> Vec<BleCommand> {
            drain(&mut self.ble_rx)
        }

        fn mqtt(&mut self) -> Vec<MqttCommand> {
            drain(&mut self.mqtt_rx)
        }

        fn connected(&mut self, address: DeviceAddress) {
            self.bridge.on_device_connected(address);
            self.ble();
            self.mqtt();
        }
    }

    fn address() -> DeviceAddress {
        "AA:BB:CC:DD:EE:FF".parse().unwrap()
    }

    fn battery_level() -> CharacteristicId {
        CharacteristicId::new(
            address(),
            "00001801-0000-1000-8000-00805f9b34fb".parse().unwrap(),
            "0000180f-0000-1000-8000-00805f9b34fb".parse().unwrap(),
        )
    }

    const BASE: &str =
        "AABBCCDDEEFF/00001801-0000-1000-8000-00805f9b34fb/0000180f-0000-1000-8000-00805f9b34fb";

    fn subscribed(commands: &[MqttCommand]) -> HashSet<String> {
        commands
            .iter()
            .filter_map(|c| match c {
                MqttCommand::Subscribe { topic, .. } => Some(topic.clone()),
                _ => None,
            })
            .collect()
    }

    fn unsubscribed(commands: &[MqttCommand]) -> HashSet<String> {
        commands
            .iter()
            .filter_map(|c| match c {
                MqttCommand::Unsubscribe { topic } => Some(topic.clone()),
                _ => None,
            })
            .collect()
    }

    fn presence(connected: bool) -> MqttCommand {
        MqttCommand::Publish {
            topic: "AABBCCDDEEFF/Connected".to_string(),
            payload: if connected { b"true".to_vec() } else { b"false".to_vec() },
            qos: Qos::AtLeastOnce,
            retain: true,
        }
    }

    #[test]
    fn test_discovered_device_allowed_by_policy_is_connected() {
        let mut h = Harness::new(&test_settings());
        h.bridge.on_device_discovered(address());
        assert_eq!(h.ble(), vec![BleCommand::Connect(address())]);
        assert!(h.mqtt().is_empty());
    }

    #[test]
    fn test_discovered_device_rejected_by_policy() {
        let mut settings = test_settings();
        settings.ble.whitelist = vec!["11:22:33:44:55:66".to_string()];
        let mut h = Harness::new(&settings);

        h.bridge.on_device_discovered(address());
        assert!(h.ble().is_empty());
        assert!(h.mqtt().is_empty());
    }

    #[test]
    fn test_advertisement_from_connected_device_is_ignored() {
        let mut h = Harness::new(&test_settings());
        h.connected(address());
        h.bridge.on_device_discovered(address());
        assert!(h.ble().is_empty());
    }

    #[test]
    fn test_connect_publishes_presence_then_discovers() {
        let mut h = Harness::new(&test_settings());
        h.bridge.on_device_connected(address());

        assert_eq!(h.mqtt(), vec![presence(true)]);
        assert_eq!(h.ble(), vec![BleCommand::DiscoverServices(address())]);
        assert_eq!(h.bridge.device_phase(&address()), Some(DevicePhase::Connected));
    }

    #[test]
    fn test_read_write_characteristic_registration() {
        let mut h = Harness::new(&test_settings());
        h.connected(address());

        h.bridge
            .on_characteristic_found(battery_level(), Properties::READ | Properties::WRITE);

        let mqtt = h.mqtt();
        assert_eq!(
            subscribed(&mqtt),
            HashSet::from([format!("{BASE}/get"), format!("{BASE}/set")])
        );
        assert_eq!(mqtt.len(), 2);
        assert_eq!(h.ble(), vec![BleCommand::ReadCharacteristic(battery_level())]);
    }

    #[test]
    fn test_read_notify_characteristic_registration() {
        let mut h = Harness::new(&test_settings());
        h.connected(address());

        h.bridge
            .on_characteristic_found(battery_level(), Properties::READ | Properties::NOTIFY);

        let mqtt = h.mqtt();
        assert_eq!(mqtt, vec![MqttCommand::Subscribe {
            topic: format!("{BASE}/get"),
            qos: Qos::AtLeastOnce,
        }]);
        let ble = h.ble();
        assert_eq!(
            ble.iter()
                .filter(|c| matches!(c, BleCommand::RegisterNotify(_)))
                .count(),
            1
        );
        assert!(ble.contains(&BleCommand::ReadCharacteristic(battery_level())));
    }

    #[test]
    fn test_characteristic_found_twice_registers_once() {
        let mut h = Harness::new(&test_settings());
        h.connected(address());

        h.bridge.on_characteristic_found(battery_level(), Properties::NOTIFY);
        h.bridge.on_characteristic_found(battery_level(), Properties::NOTIFY);
        assert_eq!(h.ble(), vec![BleCommand::RegisterNotify(battery_level())]);
    }

    #[test]
    fn test_characteristic_on_unknown_device_is_ignored() {
        let mut h = Harness::new(&test_settings());
        h.bridge.on_characteristic_found(battery_level(), Properties::READ);
        assert!(h.ble().is_empty());
        assert!(h.mqtt().is_empty());
    }

    #[test]
    fn test_services_discovered_advances_phase() {
        let mut h = Harness::new(&test_settings());
        h.connected(address());
        h.bridge.on_services_discovered(address());
        assert_eq!(
            h.bridge.device_phase(&address()),
            Some(DevicePhase::ServicesDiscovered)
        );
    }

    #[test]
    fn test_value_published_raw_to_base_topic() {
        let mut h = Harness::new(&test_settings());
        h.connected(address());
        h.bridge.on_characteristic_found(battery_level(), Properties::NOTIFY);
        h.mqtt();

        h.bridge.on_characteristic_value(battery_level(), vec![0x64, 0x00, 0xff]);
        assert_eq!(h.mqtt(), vec![MqttCommand::Publish {
            topic: BASE.to_string(),
            payload: vec![0x64, 0x00, 0xff],
            qos: Qos::AtLeastOnce,
            retain: true,
        }]);
    }

    #[test]
    fn test_value_after_teardown_is_ignored() {
        let mut h = Harness::new(&test_settings());
        h.connected(address());
        h.bridge.on_characteristic_found(battery_level(), Properties::READ);
        h.bridge.on_device_disconnected(address());
        h.mqtt();

        h.bridge.on_characteristic_value(battery_level(), vec![1]);
        assert!(h.mqtt().is_empty());
    }

    #[test]
    fn test_presence_true_precedes_values() {
        let mut h = Harness::new(&test_settings());
        h.bridge.on_device_connected(address());
        h.bridge.on_characteristic_found(battery_level(), Properties::READ);
        h.bridge.on_characteristic_value(battery_level(), vec![42]);

        let publishes: Vec<MqttCommand> = h
            .mqtt()
            .into_iter()
            .filter(|c| matches!(c, MqttCommand::Publish { .. }))
            .collect();
        assert_eq!(publishes.len(), 2);
        assert_eq!(publishes[0], presence(true));
    }

    #[test]
    fn test_disconnect_unregisters_exactly_what_was_registered() {
        let mut h = Harness::new(&test_settings());
        h.connected(address());

        let service: AttributeUuid = "1801".parse().unwrap();
        let chars = [
            ("2a00", Properties::READ),
            ("2a01", Properties::WRITE),
            ("2a02", Properties::NOTIFY),
            ("2a03", Properties::READ | Properties::WRITE | Properties::NOTIFY),
            ("2a04", Properties::NONE),
        ];
        for (uuid, props) in chars {
            let id = CharacteristicId::new(address(), service, uuid.parse().unwrap());
            h.bridge.on_characteristic_found(id, props);
        }

        let registered_topics = subscribed(&h.mqtt());
        let registered_notify: HashSet<CharacteristicId> = h
            .ble()
            .into_iter()
            .filter_map(|c| match c {
                BleCommand::RegisterNotify(id) => Some(id),
                _ => None,
            })
            .collect();

        h.bridge.on_device_disconnected(address());

        let mqtt = h.mqtt();
        let released_topics = unsubscribed(&mqtt);
        let released_notify: HashSet<CharacteristicId> = h
            .ble()
            .into_iter()
            .filter_map(|c| match c {
                BleCommand::UnregisterNotify(id) => Some(id),
                _ => None,
            })
            .collect();

        assert_eq!(registered_topics.len(), 4);
        assert_eq!(registered_topics, released_topics);
        assert_eq!(registered_notify.len(), 2);
        assert_eq!(registered_notify, released_notify);
        assert_eq!(
            mqtt.iter().filter(|c| **c == presence(false)).count(),
            1
        );
        assert_eq!(h.bridge.device_phase(&address()), None);
    }

    #[test]
    fn test_disconnect_of_unknown_device_still_reports_presence() {
        let mut h = Harness::new(&test_settings());
        h.bridge.on_device_disconnected(address());
        assert_eq!(h.mqtt(), vec![presence(false)]);
        assert!(h.ble().is_empty());
    }

    #[test]
    fn test_reconnect_registers_afresh() {
        let mut h = Harness::new(&test_settings());
        h.connected(address());
        h.bridge.on_characteristic_found(battery_level(), Properties::WRITE);
        h.bridge.on_device_disconnected(address());
        h.connected(address());

        h.bridge.on_characteristic_found(battery_level(), Properties::WRITE);
        assert_eq!(subscribed(&h.mqtt()), HashSet::from([format!("{BASE}/set")]));
    }

    #[test]
    fn test_set_request_writes_payload_verbatim() {
        let mut h = Harness::new(&test_settings());
        h.connected(address());
        h.bridge
            .on_characteristic_found(battery_level(), Properties::READ | Properties::WRITE);
        h.ble();
        h.mqtt();

        h.bridge.on_message(&format!("{BASE}/set"), vec![0x01]);
        assert_eq!(h.ble(), vec![BleCommand::WriteCharacteristic {
            id: battery_level(),
            value: vec![0x01],
        }]);
        assert!(h.mqtt().is_empty());
    }

    #[test]
    fn test_get_request_ignores_payload() {
        let mut h = Harness::new(&test_settings());
        h.connected(address());
        h.bridge.on_characteristic_found(battery_level(), Properties::READ);
        h.ble();

        h.bridge.on_message(&format!("{BASE}/get"), b"anything".to_vec());
        assert_eq!(h.ble(), vec![BleCommand::ReadCharacteristic(battery_level())]);
    }

    #[test]
    fn test_request_without_matching_property_is_dropped() {
        let mut h = Harness::new(&test_settings());
        h.connected(address());
        h.bridge.on_characteristic_found(battery_level(), Properties::READ);
        h.ble();

        h.bridge.on_message(&format!("{BASE}/set"), vec![0x01]);
        assert!(h.ble().is_empty());
    }

    #[test]
    fn test_malformed_and_foreign_topics_are_dropped() {
        let mut h = Harness::new(&test_settings());
        h.connected(address());
        h.bridge.on_characteristic_found(battery_level(), Properties::READ | Properties::WRITE);
        h.ble();
        h.mqtt();

        for topic in [
            "homeassistant/status",
            "AABBCCDDEEFF/set",
            "ZZBBCCDDEEFF/1801/2a00/set",
            "AABBCCDDEEFF/1801/2a00/extra/set",
            "112233445566/1801/2a00/get",
        ] {
            h.bridge.on_message(topic, vec![0x01]);
        }

        assert!(h.ble().is_empty());
        assert!(h.mqtt().is_empty());
    }
}
