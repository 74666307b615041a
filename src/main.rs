use ble2mqtt::domain::models::{BleCommand, BleEvent};
use ble2mqtt::domain::router::EventRouter;
use ble2mqtt::domain::settings::SettingsService;
use ble2mqtt::infrastructure;
use ble2mqtt::infrastructure::mqtt::MqttService;
use ble2mqtt::infrastructure::network::NetworkMonitor;
use anyhow::Context;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new().context("Failed to load settings")?;
    if !settings_service.path().exists() {
        if let Err(e) = settings_service.save() {
            eprintln!("Could not write default settings: {:#}", e);
        }
    }
    let settings = settings_service.get().clone();

    let _logging_guard = infrastructure::logging::init_logger(&settings.log_settings)
        .context("Failed to initialize logging")?;
    info!(
        "Starting BLE to MQTT gateway (config: {})",
        settings_service.path().display()
    );

    let (network_tx, network_rx) = mpsc::unbounded_channel();
    let (mqtt_event_tx, mqtt_event_rx) = mpsc::unbounded_channel();
    let (mqtt_cmd_tx, mqtt_cmd_rx) = mpsc::unbounded_channel();
    let (ble_event_tx, ble_event_rx) = mpsc::unbounded_channel();
    let (ble_cmd_tx, ble_cmd_rx) = mpsc::unbounded_channel();

    start_bluetooth(ble_event_tx, ble_cmd_rx, settings.ble.scan_duration())?;

    let mqtt = MqttService::new(
        mqtt_event_tx,
        Duration::from_secs(settings.mqtt.keep_alive_secs),
    );
    tokio::spawn(mqtt.run(mqtt_cmd_rx));
    tokio::spawn(NetworkMonitor::new(&settings, network_tx).run());

    let router = EventRouter::new(&settings, ble_cmd_tx, mqtt_cmd_tx);

    tokio::select! {
        _ = router.run(network_rx, mqtt_event_rx, ble_event_rx) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
        }
    }

    Ok(())
}

#[cfg(windows)]
fn start_bluetooth(
    events: mpsc::UnboundedSender<BleEvent>,
    commands: mpsc::UnboundedReceiver<BleCommand>,
    scan_duration: Option<Duration>,
) -> anyhow::Result<()> {
    infrastructure::bluetooth::BluetoothService::spawn(events, commands, scan_duration)
        .context("Failed to start Bluetooth thread")?;
    Ok(())
}

#[cfg(not(windows))]
fn start_bluetooth(
    _events: mpsc::UnboundedSender<BleEvent>,
    _commands: mpsc::UnboundedReceiver<BleCommand>,
    _scan_duration: Option<Duration>,
) -> anyhow::Result<()> {
    anyhow::bail!("No BLE backend is available on this platform")
}
