//! Facade handed to presentation layers: start/stop, status and log feed.
//!
//! The controller never changes state on its own. Every transition comes
//! from the listener, every log line from the listener or a connection.

use crate::common::{LogEntry, ProxyEndpoint, ProxyResult, ProxyState, StatusSnapshot};
use crate::server::config::{ProxyConfig, RelayMode};
use crate::server::listener::Listener;
use crate::server::relay::{DirectRelay, HoldRelay, TunnelRelay};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

pub struct ProxyController {
    listener: Listener,
}

impl ProxyController {
    /// Build a controller using the relay selected in `config`.
    pub fn new(config: ProxyConfig) -> ProxyResult<Self> {
        let relay = relay_for(&config);
        Self::with_relay(config, relay)
    }

    pub fn with_relay(config: ProxyConfig, relay: Arc<dyn TunnelRelay>) -> ProxyResult<Self> {
        Ok(Self {
            listener: Listener::new(config, relay)?,
        })
    }

    pub async fn start(&self) -> ProxyResult<SocketAddr> {
        self.listener.start().await
    }

    pub async fn stop(&self) {
        self.listener.stop().await
    }

    pub fn status(&self) -> ProxyState {
        self.listener.monitor().state()
    }

    pub fn is_running(&self) -> bool {
        self.status().is_running()
    }

    /// Visible log feed, oldest first.
    pub fn logs(&self) -> Vec<LogEntry> {
        self.listener.monitor().logs()
    }

    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogEntry> {
        self.listener.monitor().subscribe()
    }

    pub fn watch_status(&self) -> watch::Receiver<ProxyState> {
        self.listener.monitor().watch_state()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &ProxyConfig {
        self.listener.config()
    }

    pub fn active_connections(&self) -> usize {
        self.listener.active_connections()
    }

    /// What a device should enter in its Wi-Fi proxy settings, while running.
    pub fn proxy_endpoint(&self) -> Option<ProxyEndpoint> {
        if !self.is_running() {
            return None;
        }
        self.local_addr().map(|addr| ProxyEndpoint {
            host: addr.ip().to_string(),
            port: addr.port(),
        })
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let state = self.status();
        StatusSnapshot {
            status: state.label(),
            reason: state.failure_reason().map(str::to_string),
            endpoint: self.proxy_endpoint(),
            active_connections: self.active_connections(),
            logs: self.logs(),
        }
    }
}

pub fn relay_for(config: &ProxyConfig) -> Arc<dyn TunnelRelay> {
    match config.relay {
        RelayMode::Hold => Arc::new(HoldRelay::new(config.hold_duration)),
        RelayMode::Direct => Arc::new(DirectRelay::new(config.connect_timeout)),
    }
}
