use crate::common::{ConnectionPhase, ProxyMonitor};
use crate::server::parser::{ParsedRequest, TunnelTarget, parse_request};
use crate::server::relay::{ClientIo, ClientStream, Tunnel, TunnelRelay, close_stream};
use crate::server::response::{BAD_REQUEST, CONNECTION_ESTABLISHED, plain_http_response};
use crate::server::utils::log_request_preview;
use bytes::BytesMut;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Per-connection dependencies handed out by the listener.
#[derive(Clone)]
pub struct ConnectionContext {
    pub id: u64,
    pub max_request_bytes: usize,
    pub monitor: Arc<ProxyMonitor>,
    pub relay: Arc<dyn TunnelRelay>,
    /// Child of the listener's run token.
    pub cancel: CancellationToken,
}

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Client closed before sending anything
    EarlyClose,
    ReadFailed,
    Cancelled,
    BadRequest,
    Responded,
    SendFailed,
    Tunneled,
}

struct PhaseTracker {
    id: u64,
    phase: ConnectionPhase,
}

impl PhaseTracker {
    fn new(id: u64) -> Self {
        Self {
            id,
            phase: ConnectionPhase::Accepted,
        }
    }

    fn advance(&mut self, next: ConnectionPhase) {
        if !self.phase.can_advance_to(next) {
            warn!(
                "#{} unexpected phase change {:?} -> {:?}",
                self.id, self.phase, next
            );
        }
        debug!("#{} {:?} -> {:?}", self.id, self.phase, next);
        self.phase = next;
    }
}

/// Runs one request cycle on an accepted connection.
///
/// Plain requests get the informational page and are closed; malformed
/// ones get `400`. A `CONNECT` that was acknowledged is handed to the
/// relay and this call returns once the relay has released the stream.
pub async fn handle_connection<S: ClientIo>(mut stream: S, ctx: ConnectionContext) -> ConnectionOutcome {
    let mut tracker = PhaseTracker::new(ctx.id);
    let monitor = &ctx.monitor;

    tracker.advance(ConnectionPhase::ReadPending);
    let mut buf = BytesMut::zeroed(ctx.max_request_bytes.max(1));

    let read = tokio::select! {
        _ = ctx.cancel.cancelled() => {
            debug!("#{} cancelled while waiting for request", ctx.id);
            tracker.advance(ConnectionPhase::Closed);
            return ConnectionOutcome::Cancelled;
        }
        read = stream.read(&mut buf[..]) => read,
    };

    let n = match read {
        Ok(0) => {
            monitor.warn(format!("Client #{} disconnected before sending a request", ctx.id));
            tracker.advance(ConnectionPhase::Closed);
            return ConnectionOutcome::EarlyClose;
        }
        Ok(n) => n,
        Err(e) => {
            monitor.error(format!("Read error on #{}: {}", ctx.id, e));
            tracker.advance(ConnectionPhase::Closed);
            return ConnectionOutcome::ReadFailed;
        }
    };
    buf.truncate(n);
    log_request_preview(ctx.id, &buf);

    let request = match parse_request(&buf) {
        Ok(request) => request,
        Err(e) => {
            tracker.advance(ConnectionPhase::ParseError);
            monitor.warn(format!("Bad request on #{}: {}", ctx.id, e));

            if let Err(e) = send(&mut stream, BAD_REQUEST, &ctx.cancel).await {
                monitor.error(format!("Send error on #{}: {}", ctx.id, e));
            }
            close_stream(&mut stream).await;
            tracker.advance(ConnectionPhase::RespondedAndClosed);
            tracker.advance(ConnectionPhase::Closed);
            return ConnectionOutcome::BadRequest;
        }
    };

    tracker.advance(ConnectionPhase::Classified);
    monitor.info(format!("#{} {}", ctx.id, request.request_line));

    match request.tunnel_target() {
        Some(target) => handle_connect(stream, target, request, &ctx, &mut tracker).await,
        None => handle_plain(stream, &request, &ctx, &mut tracker).await,
    }
}

async fn handle_plain<S: ClientIo>(
    mut stream: S,
    request: &ParsedRequest,
    ctx: &ConnectionContext,
    tracker: &mut PhaseTracker,
) -> ConnectionOutcome {
    ctx.monitor.info(format!("HTTP: {}", request.request_line));

    let response = plain_http_response(&request.request_line);
    let outcome = match send(&mut stream, &response, &ctx.cancel).await {
        Ok(()) => ConnectionOutcome::Responded,
        Err(e) => {
            ctx.monitor
                .error(format!("Send error on #{}: {}", ctx.id, e));
            ConnectionOutcome::SendFailed
        }
    };

    // 전송 결과와 관계없이 닫기
    close_stream(&mut stream).await;
    tracker.advance(ConnectionPhase::RespondedAndClosed);
    tracker.advance(ConnectionPhase::Closed);
    outcome
}

async fn handle_connect<S: ClientIo>(
    mut stream: S,
    target: TunnelTarget,
    request: ParsedRequest,
    ctx: &ConnectionContext,
    tracker: &mut PhaseTracker,
) -> ConnectionOutcome {
    ctx.monitor.info(format!("HTTPS tunnel to {}", target));

    if let Err(e) = send(&mut stream, CONNECTION_ESTABLISHED, &ctx.cancel).await {
        ctx.monitor
            .error(format!("Send error on #{}: {}", ctx.id, e));
        close_stream(&mut stream).await;
        tracker.advance(ConnectionPhase::Closed);
        return ConnectionOutcome::SendFailed;
    }

    tracker.advance(ConnectionPhase::TunnelEstablished);
    ctx.monitor.info(format!(
        "CONNECT tunnel established to {} via {} relay",
        target,
        ctx.relay.name()
    ));

    let handle = ctx.relay.establish(Tunnel {
        client: Box::new(stream) as ClientStream,
        target,
        early_data: request.trailing,
        cancel: ctx.cancel.clone(),
        monitor: ctx.monitor.clone(),
    });

    debug!("#{} handed to relay for {}", ctx.id, handle.target());

    if let Err(e) = handle.wait().await {
        ctx.monitor.error(format!("Tunnel #{} ended abnormally: {}", ctx.id, e));
    }
    tracker.advance(ConnectionPhase::Closed);
    ConnectionOutcome::Tunneled
}

async fn send<S: ClientIo>(stream: &mut S, data: &[u8], cancel: &CancellationToken) -> io::Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(io::Error::new(io::ErrorKind::Interrupted, "proxy stopped")),
        result = async {
            stream.write_all(data).await?;
            stream.flush().await
        } => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::relay::TunnelHandle;
    use std::sync::Mutex;
    use tokio::io::{DuplexStream, duplex};

    #[derive(Default)]
    struct RecordingRelay {
        targets: Mutex<Vec<(TunnelTarget, Vec<u8>)>>,
    }

    impl TunnelRelay for RecordingRelay {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn establish(&self, tunnel: Tunnel) -> TunnelHandle {
            self.targets
                .lock()
                .unwrap()
                .push((tunnel.target.clone(), tunnel.early_data.to_vec()));
            let target = tunnel.target.clone();
            TunnelHandle::spawn(target, async move {
                let mut client = tunnel.client;
                close_stream(&mut client).await;
            })
        }
    }

    fn context(relay: Arc<RecordingRelay>) -> (ConnectionContext, Arc<ProxyMonitor>) {
        let monitor = Arc::new(ProxyMonitor::default());
        (
            ConnectionContext {
                id: 1,
                max_request_bytes: 64 * 1024,
                monitor: monitor.clone(),
                relay,
                cancel: CancellationToken::new(),
            },
            monitor,
        )
    }

    async fn exchange(request: &[u8]) -> (ConnectionOutcome, Vec<u8>, Arc<RecordingRelay>) {
        let relay = Arc::new(RecordingRelay::default());
        let (ctx, _monitor) = context(relay.clone());
        let (proxy_side, mut client_side): (DuplexStream, DuplexStream) = duplex(128 * 1024);

        client_side.write_all(request).await.unwrap();
        let outcome = handle_connection(proxy_side, ctx).await;

        let mut response = Vec::new();
        client_side.read_to_end(&mut response).await.unwrap();
        (outcome, response, relay)
    }

    #[tokio::test]
    async fn test_plain_request_gets_info_page_and_close() {
        let (outcome, response, relay) = exchange(b"GET /test HTTP/1.1\r\n\r\n").await;
        let text = String::from_utf8(response).unwrap();

        assert_eq!(outcome, ConnectionOutcome::Responded);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.contains("GET /test HTTP/1.1"));
        assert!(relay.targets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connect_acknowledges_and_hands_off() {
        let (outcome, response, relay) =
            exchange(b"CONNECT example.com:443 HTTP/1.1\r\n\r\n").await;

        assert_eq!(outcome, ConnectionOutcome::Tunneled);
        assert_eq!(response, b"HTTP/1.1 200 Connection Established\r\n\r\n");
        let targets = relay.targets.lock().unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].0.as_str(), "example.com:443");
        assert!(targets[0].1.is_empty());
    }

    #[tokio::test]
    async fn test_connect_passes_early_data_to_relay() {
        let (_, _, relay) =
            exchange(b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com\r\n\r\nhello").await;

        assert_eq!(relay.targets.lock().unwrap()[0].1, b"hello");
    }

    #[tokio::test]
    async fn test_connect_with_binary_client_hello_is_tunneled() {
        let client_hello = [0x16, 0x03, 0x01, 0x02, 0x00, 0x01, 0x00, 0x01, 0xfc, 0x03, 0x03, 0xa7, 0xd2];
        let mut request = b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n".to_vec();
        request.extend_from_slice(&client_hello);

        let (outcome, response, relay) = exchange(&request).await;

        assert_eq!(outcome, ConnectionOutcome::Tunneled);
        assert_eq!(response, CONNECTION_ESTABLISHED);
        let targets = relay.targets.lock().unwrap();
        assert_eq!(targets[0].0.as_str(), "example.com:443");
        assert_eq!(targets[0].1, client_hello);
    }

    /// Client writes its request and goes away before the reply is sent.
    async fn exchange_with_vanished_client(
        request: &[u8],
    ) -> (ConnectionOutcome, Arc<ProxyMonitor>, Arc<RecordingRelay>) {
        let relay = Arc::new(RecordingRelay::default());
        let (ctx, monitor) = context(relay.clone());
        let (proxy_side, mut client_side) = duplex(1024);

        client_side.write_all(request).await.unwrap();
        drop(client_side);
        let outcome = handle_connection(proxy_side, ctx).await;
        (outcome, monitor, relay)
    }

    #[tokio::test]
    async fn test_connect_send_failure_skips_relay() {
        let (outcome, monitor, relay) =
            exchange_with_vanished_client(b"CONNECT example.com:443 HTTP/1.1\r\n\r\n").await;

        assert_eq!(outcome, ConnectionOutcome::SendFailed);
        assert!(relay.targets.lock().unwrap().is_empty());
        assert!(monitor
            .logs()
            .iter()
            .any(|e| e.message.starts_with("Send error on #1")));
        assert!(!monitor
            .logs()
            .iter()
            .any(|e| e.message.contains("tunnel established")));
    }

    #[tokio::test]
    async fn test_plain_send_failure_is_reported() {
        let (outcome, monitor, relay) =
            exchange_with_vanished_client(b"GET /gone HTTP/1.1\r\n\r\n").await;

        assert_eq!(outcome, ConnectionOutcome::SendFailed);
        assert!(relay.targets.lock().unwrap().is_empty());
        assert!(monitor
            .logs()
            .iter()
            .any(|e| e.message.starts_with("Send error on #1")));
    }

    #[tokio::test]
    async fn test_empty_request_line_gets_bad_request() {
        let (outcome, response, _) = exchange(b"\r\n").await;

        assert_eq!(outcome, ConnectionOutcome::BadRequest);
        assert_eq!(response, BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_connect_without_target_gets_bad_request() {
        let (outcome, response, relay) = exchange(b"CONNECT \r\n\r\n").await;

        assert_eq!(outcome, ConnectionOutcome::BadRequest);
        assert!(response.starts_with(b"HTTP/1.1 400 Bad Request"));
        assert!(relay.targets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_early_close_sends_nothing() {
        let relay = Arc::new(RecordingRelay::default());
        let (ctx, monitor) = context(relay);
        let (proxy_side, client_side) = duplex(1024);
        drop(client_side);

        let outcome = handle_connection(proxy_side, ctx).await;

        assert_eq!(outcome, ConnectionOutcome::EarlyClose);
        assert!(monitor
            .logs()
            .iter()
            .any(|e| e.message.contains("disconnected before sending")));
    }

    #[tokio::test]
    async fn test_cancel_while_reading() {
        let relay = Arc::new(RecordingRelay::default());
        let (ctx, _monitor) = context(relay);
        let cancel = ctx.cancel.clone();
        let (proxy_side, _client_side) = duplex(1024);

        let task = tokio::spawn(handle_connection(proxy_side, ctx));
        cancel.cancel();

        assert_eq!(task.await.unwrap(), ConnectionOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_read_is_bounded() {
        let relay = Arc::new(RecordingRelay::default());
        let (mut ctx, monitor) = context(relay);
        ctx.max_request_bytes = 16;
        let (proxy_side, mut client_side) = duplex(1024);

        client_side
            .write_all(b"GET /a/very/long/path/that/overflows HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let outcome = handle_connection(proxy_side, ctx).await;

        assert_eq!(outcome, ConnectionOutcome::Responded);
        assert!(monitor
            .logs()
            .iter()
            .any(|e| e.message == "#1 GET /a/very/long"));
    }
}
