use crate::common::{ProxyError, ProxyMonitor, ProxyResult, ProxyState};
use crate::server::config::ProxyConfig;
use crate::server::handlers::{ConnectionContext, handle_connection};
use crate::server::registry::ConnectionRegistry;
use crate::server::relay::TunnelRelay;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

struct ActiveRun {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    accept_task: JoinHandle<()>,
}

/// Owns the bound socket and the accept loop.
pub struct Listener {
    config: ProxyConfig,
    monitor: Arc<ProxyMonitor>,
    relay: Arc<dyn TunnelRelay>,
    registry: Arc<ConnectionRegistry>,
    run: tokio::sync::Mutex<Option<ActiveRun>>,
    bound: Mutex<Option<SocketAddr>>,
}

impl Listener {
    pub fn new(config: ProxyConfig, relay: Arc<dyn TunnelRelay>) -> ProxyResult<Self> {
        config.validate()?;
        let monitor = Arc::new(ProxyMonitor::new(config.log_capacity));
        Ok(Self {
            config,
            monitor,
            relay,
            registry: Arc::new(ConnectionRegistry::new()),
            run: tokio::sync::Mutex::new(None),
            bound: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn monitor(&self) -> &Arc<ProxyMonitor> {
        &self.monitor
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn active_connections(&self) -> usize {
        self.registry.len()
    }

    /// Bind the configured address and start accepting.
    ///
    /// Fails fast with [`ProxyError::AlreadyRunning`] while a run is active,
    /// without touching the socket or the state.
    pub async fn start(&self) -> ProxyResult<SocketAddr> {
        let mut run = self.run.lock().await;
        if run.is_some() {
            warn!("start() ignored: proxy is already {}", self.monitor.state());
            return Err(ProxyError::AlreadyRunning);
        }

        let addr = self.config.listen_addr();
        self.monitor
            .transition(ProxyState::Starting, format!("Starting proxy on {}", addr));

        let bound = TcpListener::bind(addr)
            .await
            .and_then(|listener| listener.local_addr().map(|local| (listener, local)));
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                self.monitor.transition(
                    ProxyState::Failed(e.to_string()),
                    format!("Failed to bind {}: {}", addr, e),
                );
                return Err(ProxyError::Bind { addr, source: e });
            }
        };

        let cancel = CancellationToken::new();
        *self.bound.lock().unwrap_or_else(|p| p.into_inner()) = Some(local_addr);
        self.monitor.transition(
            ProxyState::Running,
            format!("Proxy listening on {}", local_addr),
        );

        let accept_task = tokio::spawn(accept_loop(
            listener,
            AcceptContext {
                cancel: cancel.clone(),
                monitor: self.monitor.clone(),
                relay: self.relay.clone(),
                registry: self.registry.clone(),
                max_request_bytes: self.config.max_request_bytes,
            },
        ));

        *run = Some(ActiveRun {
            local_addr,
            cancel,
            accept_task,
        });
        Ok(local_addr)
    }

    /// Cancel the accept loop and every live connection. A no-op when
    /// nothing is running.
    pub async fn stop(&self) {
        let Some(active) = self.run.lock().await.take() else {
            debug!("stop() ignored: proxy is not running");
            return;
        };

        active.cancel.cancel();
        let cancelled = self.registry.cancel_all();

        // 소켓이 해제될 때까지 accept 루프 종료 대기
        if let Err(e) = active.accept_task.await {
            warn!("Accept loop for {} ended abnormally: {}", active.local_addr, e);
        }

        *self.bound.lock().unwrap_or_else(|p| p.into_inner()) = None;
        self.monitor.transition(
            ProxyState::Stopped,
            format!(
                "Proxy stopped ({} connection{} cancelled)",
                cancelled,
                if cancelled == 1 { "" } else { "s" }
            ),
        );
    }
}

struct AcceptContext {
    cancel: CancellationToken,
    monitor: Arc<ProxyMonitor>,
    relay: Arc<dyn TunnelRelay>,
    registry: Arc<ConnectionRegistry>,
    max_request_bytes: usize,
}

async fn accept_loop(listener: TcpListener, ctx: AcceptContext) {
    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                debug!("Accept loop cancelled");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    configure_stream(&stream);

                    let registration = ctx.registry.register(&ctx.cancel);
                    let id = registration.id();
                    ctx.monitor
                        .info(format!("New connection #{} from {}", id, peer_addr));

                    let conn_ctx = ConnectionContext {
                        id,
                        max_request_bytes: ctx.max_request_bytes,
                        monitor: ctx.monitor.clone(),
                        relay: ctx.relay.clone(),
                        cancel: registration.token(),
                    };

                    tokio::spawn(async move {
                        let outcome = handle_connection(stream, conn_ctx).await;
                        debug!("Connection #{} finished: {:?}", id, outcome);
                        drop(registration);
                    });
                }
                Err(e) => {
                    ctx.monitor.error(format!("Accept error: {}", e));
                }
            },
        }
    }
}

fn configure_stream(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY on client stream: {}", e);
    }

    let socket_ref = socket2::SockRef::from(stream);
    if let Err(e) = socket_ref.set_keepalive(true) {
        debug!("Failed to set SO_KEEPALIVE on client stream: {}", e);
    }
}
