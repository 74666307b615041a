//! Network Monitor
//!
//! The host OS owns joining the network; the gateway only needs to know
//! when the broker side of it is usable. The monitor probes TCP
//! reachability of a configured host and reports transitions.

use crate::domain::models::NetworkEvent;
use crate::domain::settings::Settings;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub struct NetworkMonitor {
    host: String,
    port: u16,
    interval: Duration,
    timeout: Duration,
    event_sender: mpsc::UnboundedSender<NetworkEvent>,
}

/// Event to emit when reachability changes from `joined` to `reachable`.
fn transition(joined: bool, reachable: bool) -> Option<NetworkEvent> {
    match (joined, reachable) {
        (false, true) => Some(NetworkEvent::Joined),
        (true, false) => Some(NetworkEvent::Lost),
        _ => None,
    }
}

impl NetworkMonitor {
    pub fn new(settings: &Settings, event_sender: mpsc::UnboundedSender<NetworkEvent>) -> Self {
        let (host, port) = settings.probe_target();
        Self {
            host,
            port,
            interval: Duration::from_secs(settings.network.probe_interval_secs.max(1)),
            timeout: Duration::from_millis(settings.network.probe_timeout_ms),
            event_sender,
        }
    }

    pub async fn run(self) {
        info!("Monitoring network via {}:{}", self.host, self.port);

        let mut joined = false;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if self.event_sender.is_closed() {
                break;
            }

            let reachable = self.probe().await;
            if let Some(event) = transition(joined, reachable) {
                info!("Network {:?}", event);
                if self.event_sender.send(event).is_err() {
                    break;
                }
            }
            joined = reachable;
        }
    }

    async fn probe(&self) -> bool {
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("Probe of {}:{} failed: {}", self.host, self.port, e);
                false
            }
            Err(_) => {
                debug!("Probe of {}:{} timed out", self.host, self.port);
                false
            }
        }
    }
}
