//! 터널 릴레이 경계
//!
//! After a client has received `200 Connection Established`, its stream is
//! handed to a [`TunnelRelay`]. The relay owns the stream from then on and
//! drops it exactly once when the tunnel ends.

use crate::common::{ProxyMonitor, ProxyResult, is_connection_error};
use crate::server::parser::TunnelTarget;
use crate::server::utils::format_bytes;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Raw byte pipe to a proxy client.
pub trait ClientIo: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> ClientIo for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Shut down the write side, logging instead of propagating failures.
pub(crate) async fn close_stream<S: ClientIo>(stream: &mut S) {
    if let Err(e) = stream.shutdown().await {
        debug!("Shutdown failed: {}", e);
    }
}

pub type ClientStream = Box<dyn ClientIo>;

/// Everything a relay needs to run one tunnel.
pub struct Tunnel {
    pub client: ClientStream,
    pub target: TunnelTarget,
    /// Bytes the client sent after the CONNECT head in the same read.
    pub early_data: Bytes,
    /// Cancelled when the proxy stops.
    pub cancel: CancellationToken,
    pub monitor: Arc<ProxyMonitor>,
}

pub trait TunnelRelay: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn establish(&self, tunnel: Tunnel) -> TunnelHandle;
}

/// Lifecycle handle for a running tunnel.
#[derive(Debug)]
pub struct TunnelHandle {
    target: TunnelTarget,
    task: JoinHandle<()>,
}

impl TunnelHandle {
    pub fn spawn<F>(target: TunnelTarget, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            target,
            task: tokio::spawn(fut),
        }
    }

    pub fn target(&self) -> &TunnelTarget {
        &self.target
    }

    /// Wait until the relay has released the client stream.
    pub async fn wait(self) -> ProxyResult<()> {
        match self.task.await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(format!("tunnel task for {} failed: {}", self.target, e).into()),
        }
    }
}

/// Holds the tunnel open for a fixed period with nothing attached, then
/// closes it. Used until a receiver is configured.
#[derive(Debug, Clone)]
pub struct HoldRelay {
    hold: Duration,
}

impl HoldRelay {
    pub fn new(hold: Duration) -> Self {
        Self { hold }
    }
}

impl TunnelRelay for HoldRelay {
    fn name(&self) -> &'static str {
        "hold"
    }

    fn establish(&self, tunnel: Tunnel) -> TunnelHandle {
        let hold = self.hold;
        let target = tunnel.target.clone();

        TunnelHandle::spawn(target, async move {
            let Tunnel {
                mut client,
                target,
                cancel,
                monitor,
                ..
            } = tunnel;

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Held tunnel to {} cancelled", target);
                }
                _ = tokio::time::sleep(hold) => {
                    monitor.warn(format!(
                        "Closing tunnel to {} (no receiver connected)",
                        target
                    ));
                }
            }

            close_stream(&mut client).await;
        })
    }
}

/// Opens a TCP connection straight to the tunnel target and copies bytes
/// in both directions until either side closes.
#[derive(Debug, Clone)]
pub struct DirectRelay {
    connect_timeout: Duration,
}

impl DirectRelay {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl TunnelRelay for DirectRelay {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn establish(&self, tunnel: Tunnel) -> TunnelHandle {
        let connect_timeout = self.connect_timeout;
        let target = tunnel.target.clone();

        TunnelHandle::spawn(target, async move {
            let Tunnel {
                mut client,
                target,
                early_data,
                cancel,
                monitor,
            } = tunnel;

            let Some((host, port)) = target.host_port() else {
                monitor.error(format!(
                    "Invalid tunnel target {:?}: expected host:port",
                    target.as_str()
                ));
                close_stream(&mut client).await;
                return;
            };

            let upstream = tokio::select! {
                _ = cancel.cancelled() => None,
                result = timeout(connect_timeout, TcpStream::connect((host, port))) => match result {
                    Ok(Ok(stream)) => Some(stream),
                    Ok(Err(e)) => {
                        monitor.error(format!("Relay connect to {} failed: {}", target, e));
                        None
                    }
                    Err(_) => {
                        monitor.error(format!("Relay connect to {} timed out", target));
                        None
                    }
                },
            };

            let Some(mut upstream) = upstream else {
                close_stream(&mut client).await;
                return;
            };

            if let Err(e) = upstream.set_nodelay(true) {
                debug!("Failed to set TCP_NODELAY on upstream stream: {}", e);
            }

            if !early_data.is_empty() {
                if let Err(e) = upstream.write_all(&early_data).await {
                    monitor.error(format!("Relay write to {} failed: {}", target, e));
                    close_stream(&mut client).await;
                    return;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Tunnel to {} cancelled", target);
                }
                result = tokio::io::copy_bidirectional(&mut client, &mut upstream) => match result {
                    Ok((sent, received)) => {
                        let sent = sent + early_data.len() as u64;
                        monitor.info(format!(
                            "Tunnel to {} closed ({} sent, {} received)",
                            target,
                            format_bytes(sent),
                            format_bytes(received)
                        ));
                    }
                    Err(e) if is_connection_error(&e) => {
                        monitor.info(format!("Tunnel to {} closed: {}", target, e));
                    }
                    Err(e) => {
                        monitor.error(format!("Tunnel to {} failed: {}", target, e));
                    }
                },
            }

            close_stream(&mut upstream).await;
            close_stream(&mut client).await;
        })
    }
}
