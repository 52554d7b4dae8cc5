//! WebSocket control channel to the browser (Chrome DevTools endpoint).
//!
//! `tokio-tungstenite` has no notion of ping or close timeouts, so the
//! keepalive policy is enforced here: a background task pings on an interval
//! and drops the connection once a ping has gone unanswered for longer than
//! the ping timeout. Each ping carries its own deadline, so the interval and
//! the timeout are independent. Callers get the policy as a plain constructor
//! argument through `ConnectParams`.

use crate::errors::ChannelError;
use crate::transport::keepalive::{ConnectParams, KeepalivePolicy};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Text frames buffered for the caller. Frames arriving while the queue is
/// full are dropped so the reader keeps draining the socket and pongs.
pub const INCOMING_QUEUE_CAPACITY: usize = 1024;

/// Opens control connections. The seam lets the session owner swap the
/// underlying connection library without touching the keepalive contract.
#[async_trait]
pub trait ControlTransport: Send + Sync {
    async fn open(&self, params: &ConnectParams) -> Result<ControlConnection, ChannelError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn client_request(params: &ConnectParams) -> Result<Request, ChannelError> {
        let mut request = params
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ChannelError::InvalidRequest(format!("{}: {}", params.url, e)))?;

        for (name, value) in &params.additional_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ChannelError::InvalidRequest(format!("header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ChannelError::InvalidRequest(format!("header {}: {}", name, e)))?;
            request.headers_mut().insert(name, value);
        }

        Ok(request)
    }

    pub fn websocket_config(params: &ConnectParams) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        if let Some(limit) = params.max_frame_size {
            config.max_frame_size = Some(limit);
            config.max_message_size = Some(limit);
        }
        config
    }
}

#[async_trait]
impl ControlTransport for WebSocketTransport {
    async fn open(&self, params: &ConnectParams) -> Result<ControlConnection, ChannelError> {
        let request = Self::client_request(params)?;
        let config = Self::websocket_config(params);

        log::info!(
            "Connecting to {} (ping_interval={:?}, ping_timeout={:?}, close_timeout={:?})",
            params.url,
            params.keepalive.ping_interval,
            params.keepalive.ping_timeout,
            params.keepalive.close_timeout
        );

        let connect = tokio_tungstenite::connect_async_with_config(request, Some(config), false);
        let (stream, _) = tokio::time::timeout(params.keepalive.ping_timeout, connect)
            .await
            .map_err(|_| ChannelError::Timeout(format!("opening {}", params.url)))?
            .map_err(|e| ChannelError::ConnectionFailed(format!("{}: {}", params.url, e)))?;

        Ok(ControlConnection::spawn(
            params.url.clone(),
            stream,
            params.keepalive,
        ))
    }
}

/// A live control connection. Text frames are delivered in arrival order
/// through `recv_text`, up to `INCOMING_QUEUE_CAPACITY` unread frames.
pub struct ControlConnection {
    url: String,
    sink: Arc<tokio::sync::Mutex<WsSink>>,
    incoming: mpsc::Receiver<String>,
    alive: Arc<AtomicBool>,
    policy: KeepalivePolicy,
    next_id: u64,
    reader: JoinHandle<()>,
    keepalive: JoinHandle<()>,
}

impl ControlConnection {
    fn spawn(url: String, stream: WsStream, policy: KeepalivePolicy) -> Self {
        let (sink, source) = stream.split();
        let sink = Arc::new(tokio::sync::Mutex::new(sink));
        let alive = Arc::new(AtomicBool::new(true));
        let outstanding_ping = Arc::new(Mutex::new(None));
        let (tx, incoming) = mpsc::channel(INCOMING_QUEUE_CAPACITY);

        let reader = tokio::spawn(read_loop(
            source,
            tx,
            alive.clone(),
            outstanding_ping.clone(),
        ));
        let keepalive = tokio::spawn(keepalive_loop(
            sink.clone(),
            policy,
            alive.clone(),
            outstanding_ping,
            reader.abort_handle(),
        ));

        Self {
            url,
            sink,
            incoming,
            alive,
            policy,
            next_id: 0,
            reader,
            keepalive,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn policy(&self) -> KeepalivePolicy {
        self.policy
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), ChannelError> {
        if !self.is_alive() {
            return Err(ChannelError::Closed);
        }
        let text: String = text.into();
        log::trace!("Control channel send: {}", text);
        self.sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await?;
        Ok(())
    }

    /// Next text frame, or `None` once the connection is gone.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.incoming.recv().await
    }

    /// Sends a DevTools command and waits for the reply with the same id.
    /// Events arriving in between are skipped.
    pub async fn call(&mut self, method: &str, params: Value) -> Result<Value, ChannelError> {
        self.next_id += 1;
        let id = self.next_id;
        let command = json!({ "id": id, "method": method, "params": params });
        self.send_text(command.to_string()).await?;

        while let Some(text) = self.recv_text().await {
            let message: Value = match serde_json::from_str(&text) {
                Ok(message) => message,
                Err(e) => {
                    log::warn!("Ignoring unparsable control channel frame: {}", e);
                    continue;
                }
            };
            if message.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }
            if let Some(error) = message.get("error") {
                return Err(ChannelError::Protocol(error.to_string()));
            }
            return Ok(message.get("result").cloned().unwrap_or(Value::Null));
        }

        Err(ChannelError::Closed)
    }

    /// Closes the connection, giving up after the close timeout.
    pub async fn close(self) -> Result<(), ChannelError> {
        self.alive.store(false, Ordering::SeqCst);
        self.keepalive.abort();

        let sink = self.sink.clone();
        let closing = async move { sink.lock().await.close().await };
        let result = tokio::time::timeout(self.policy.close_timeout, closing).await;
        self.reader.abort();

        match result {
            Ok(Ok(())) | Ok(Err(WsError::ConnectionClosed)) | Ok(Err(WsError::AlreadyClosed)) => {
                log::debug!("Control channel to {} closed", self.url);
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ChannelError::Timeout(format!("closing {}", self.url))),
        }
    }
}

impl Drop for ControlConnection {
    fn drop(&mut self) {
        self.reader.abort();
        self.keepalive.abort();
    }
}

async fn read_loop(
    mut source: WsSource,
    tx: mpsc::Sender<String>,
    alive: Arc<AtomicBool>,
    outstanding_ping: Arc<Mutex<Option<Instant>>>,
) {
    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => match tx.try_send(text.as_str().to_owned()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    log::warn!(
                        "Control channel queue full ({} unread frames), dropping frame",
                        INCOMING_QUEUE_CAPACITY
                    );
                }
                Err(TrySendError::Closed(_)) => break,
            },
            Ok(Message::Pong(_)) => {
                if let Ok(mut sent) = outstanding_ping.lock() {
                    *sent = None;
                }
            }
            Ok(Message::Close(frame)) => {
                log::debug!("Control channel closed by peer: {:?}", frame);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("Control channel read failed: {}", e);
                break;
            }
        }
    }
    alive.store(false, Ordering::SeqCst);
}

/// Pings every `ping_interval` while no ping is outstanding, and drops the
/// connection once the outstanding ping is older than `ping_timeout`.
async fn keepalive_loop(
    sink: Arc<tokio::sync::Mutex<WsSink>>,
    policy: KeepalivePolicy,
    alive: Arc<AtomicBool>,
    outstanding_ping: Arc<Mutex<Option<Instant>>>,
    reader: AbortHandle,
) {
    let mut ticker = tokio::time::interval(policy.ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        let deadline = pending_ping(&outstanding_ping).map(|sent| sent + policy.ping_timeout);

        tokio::select! {
            _ = ticker.tick() => {
                if !alive.load(Ordering::SeqCst) {
                    break;
                }
                if pending_ping(&outstanding_ping).is_some() {
                    continue;
                }
                if let Ok(mut sent) = outstanding_ping.lock() {
                    *sent = Some(Instant::now());
                }
                let sent = sink.lock().await.send(Message::Ping(Default::default())).await;
                if let Err(e) = sent {
                    log::warn!("Keepalive ping failed: {}", e);
                    alive.store(false, Ordering::SeqCst);
                    reader.abort();
                    break;
                }
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                // A pong may have cleared the ping while we slept.
                let Some(sent) = pending_ping(&outstanding_ping) else {
                    continue;
                };
                let waited = sent.elapsed();
                if waited < policy.ping_timeout {
                    continue;
                }
                log::warn!(
                    "Ping unanswered for {:?} (ping_timeout {:?}), dropping control channel",
                    waited,
                    policy.ping_timeout
                );
                alive.store(false, Ordering::SeqCst);
                reader.abort();
                let closing = async { sink.lock().await.close().await };
                let _ = tokio::time::timeout(policy.close_timeout, closing).await;
                break;
            }
        }
    }
}

fn pending_ping(outstanding_ping: &Mutex<Option<Instant>>) -> Option<Instant> {
    outstanding_ping.lock().ok().and_then(|sent| *sent)
}

/// Owns at most one control connection for a browser session.
pub struct ControlClient<T: ControlTransport = WebSocketTransport> {
    transport: T,
    params: ConnectParams,
    connection: Option<ControlConnection>,
}

impl ControlClient<WebSocketTransport> {
    pub fn new(params: ConnectParams) -> Self {
        Self::with_transport(WebSocketTransport, params)
    }
}

impl<T: ControlTransport> ControlClient<T> {
    pub fn with_transport(transport: T, params: ConnectParams) -> Self {
        Self {
            transport,
            params,
            connection: None,
        }
    }

    pub fn params(&self) -> &ConnectParams {
        &self.params
    }

    pub fn is_started(&self) -> bool {
        self.connection.as_ref().is_some_and(ControlConnection::is_alive)
    }

    pub async fn start(&mut self) -> Result<(), ChannelError> {
        if self.is_started() {
            return Err(ChannelError::AlreadyStarted);
        }
        let connection = self.transport.open(&self.params).await?;
        self.connection = Some(connection);
        Ok(())
    }

    pub fn connection(&mut self) -> Result<&mut ControlConnection, ChannelError> {
        self.connection.as_mut().ok_or(ChannelError::NotStarted)
    }

    pub async fn stop(&mut self) -> Result<(), ChannelError> {
        match self.connection.take() {
            Some(connection) => connection.close().await,
            None => Err(ChannelError::NotStarted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::handshake::server::{
        ErrorResponse, Request as ServerRequest, Response as ServerResponse,
    };

    fn fast_policy() -> KeepalivePolicy {
        KeepalivePolicy {
            ping_interval: Duration::from_millis(50),
            ping_timeout: Duration::from_millis(300),
            close_timeout: Duration::from_millis(300),
        }
    }

    async fn echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.unwrap();
                    while let Some(Ok(msg)) = ws.next().await {
                        if msg.is_text() {
                            if ws.send(msg).await.is_err() {
                                break;
                            }
                        } else if msg.is_close() {
                            break;
                        }
                    }
                });
            }
        });
        format!("ws://{}", addr)
    }

    /// Completes the handshake, then never reads again, so pings go
    /// unanswered.
    async fn silent_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(ws);
        });
        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn test_send_and_receive_text() {
        let url = echo_server().await;
        let params = ConnectParams::new(url).with_keepalive(fast_policy());
        let mut connection = WebSocketTransport.open(&params).await.unwrap();

        connection.send_text("hello").await.unwrap();
        assert_eq!(connection.recv_text().await.as_deref(), Some("hello"));
        connection.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_answered_pings_keep_connection_alive() {
        let url = echo_server().await;
        let params = ConnectParams::new(url).with_keepalive(fast_policy());
        let connection = WebSocketTransport.open(&params).await.unwrap();

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(connection.is_alive());
        connection.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_ping_interval_longer_than_timeout_keeps_healthy_peer() {
        let url = echo_server().await;
        let policy = KeepalivePolicy {
            ping_interval: Duration::from_millis(200),
            ping_timeout: Duration::from_millis(100),
            close_timeout: Duration::from_millis(300),
        };
        let mut connection = WebSocketTransport
            .open(&ConnectParams::new(url).with_keepalive(policy))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(connection.is_alive());
        connection.send_text("still here").await.unwrap();
        assert_eq!(connection.recv_text().await.as_deref(), Some("still here"));
        connection.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unanswered_pings_drop_connection() {
        let url = silent_server().await;
        let params = ConnectParams::new(url).with_keepalive(fast_policy());
        let mut connection = WebSocketTransport.open(&params).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(3), connection.recv_text())
            .await
            .expect("keepalive should have dropped the connection");
        assert_eq!(received, None);
        assert!(!connection.is_alive());
        assert!(matches!(
            connection.send_text("late").await,
            Err(ChannelError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_close_gives_up_after_close_timeout() {
        let url = silent_server().await;
        let policy = KeepalivePolicy {
            ping_interval: Duration::from_secs(10),
            ping_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_millis(300),
        };
        let connection = WebSocketTransport
            .open(&ConnectParams::new(url).with_keepalive(policy))
            .await
            .unwrap();

        // The peer never reads, so the socket buffers eventually fill and
        // writes stop completing.
        let chunk = "x".repeat(1024 * 1024);
        let mut stalled = false;
        for _ in 0..512 {
            let sent =
                tokio::time::timeout(Duration::from_millis(200), connection.send_text(chunk.clone()))
                    .await;
            if sent.is_err() {
                stalled = true;
                break;
            }
        }
        assert!(stalled, "writes to a peer that never reads should stall");

        let started = std::time::Instant::now();
        let result = connection.close().await;
        let elapsed = started.elapsed();
        assert!(matches!(result, Err(ChannelError::Timeout(_))), "{:?}", result);
        assert!(elapsed >= Duration::from_millis(250), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(1300), "{:?}", elapsed);
    }

    #[tokio::test]
    async fn test_unread_frames_beyond_capacity_are_dropped() {
        let url = echo_server().await;
        let params = ConnectParams::new(url).with_keepalive(fast_policy());
        let mut connection = WebSocketTransport.open(&params).await.unwrap();

        let sent = INCOMING_QUEUE_CAPACITY + 100;
        for i in 0..sent {
            connection.send_text(format!("frame {}", i)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(500)).await;

        let mut received = 0;
        while let Ok(Some(_)) =
            tokio::time::timeout(Duration::from_millis(200), connection.recv_text()).await
        {
            received += 1;
        }
        assert!(received >= INCOMING_QUEUE_CAPACITY, "{}", received);
        assert!(received < sent, "{}", received);

        assert!(connection.is_alive());
        connection.send_text("after").await.unwrap();
        assert_eq!(connection.recv_text().await.as_deref(), Some("after"));
        connection.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_additional_headers_are_sent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (header_tx, header_rx) = oneshot::channel::<Option<String>>();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ws = tokio_tungstenite::accept_hdr_async(
                stream,
                |req: &ServerRequest, resp: ServerResponse| {
                    let value = req
                        .headers()
                        .get("x-session")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let _ = header_tx.send(value);
                    Ok::<_, ErrorResponse>(resp)
                },
            )
            .await
            .unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let params = ConnectParams::new(format!("ws://{}", addr))
            .with_header("X-Session", "booking")
            .with_keepalive(fast_policy());
        let connection = WebSocketTransport.open(&params).await.unwrap();
        assert_eq!(header_rx.await.unwrap().as_deref(), Some("booking"));
        drop(connection);
    }

    #[tokio::test]
    async fn test_devtools_call_skips_events() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let command: Value = serde_json::from_str(text.as_str()).unwrap();
                    let event = json!({"method": "Target.targetCreated", "params": {}});
                    ws.send(Message::Text(event.to_string().into())).await.unwrap();
                    let reply = json!({"id": command["id"], "result": {"product": "Chrome/126"}});
                    ws.send(Message::Text(reply.to_string().into())).await.unwrap();
                }
            }
        });

        let params = ConnectParams::new(format!("ws://{}", addr)).with_keepalive(fast_policy());
        let mut connection = WebSocketTransport.open(&params).await.unwrap();
        let result = connection
            .call("Browser.getVersion", json!({}))
            .await
            .unwrap();
        assert_eq!(result["product"], "Chrome/126");
    }

    #[tokio::test]
    async fn test_client_refuses_second_start() {
        let url = echo_server().await;
        let mut client = ControlClient::new(ConnectParams::new(url).with_keepalive(fast_policy()));

        assert!(matches!(client.stop().await, Err(ChannelError::NotStarted)));
        client.start().await.unwrap();
        assert!(client.is_started());
        assert!(matches!(client.start().await, Err(ChannelError::AlreadyStarted)));

        client.stop().await.unwrap();
        assert!(!client.is_started());
        client.start().await.unwrap();
        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let params = ConnectParams::new(format!("ws://{}", addr)).with_keepalive(fast_policy());
        let result = WebSocketTransport.open(&params).await;
        assert!(matches!(result, Err(ChannelError::ConnectionFailed(_))));
    }

    #[test]
    fn test_invalid_header_rejected() {
        let params = ConnectParams::new("ws://127.0.0.1:9222").with_header("bad header", "x");
        assert!(matches!(
            WebSocketTransport::client_request(&params),
            Err(ChannelError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_frame_size_applied() {
        let params = ConnectParams::new("ws://127.0.0.1:9222").with_max_frame_size(4096);
        let config = WebSocketTransport::websocket_config(&params);
        assert_eq!(config.max_frame_size, Some(4096));
        assert_eq!(config.max_message_size, Some(4096));
    }
}
