//! Transport adapter.
//!
//! A [`Transport`] opens one underlying connection per call and reports its
//! four events (opened, message, errored, closed) through the
//! [`TransportEventSink`] it is given. The returned [`TransportHandle`] is
//! the only way to write to or close that connection. [`WsTransport`] is
//! the WebSocket implementation on top of tokio-tungstenite.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tracing::{debug, info, warn};
use url::Url;

use tm_core::constants::TOKEN_QUERY_PARAM;

use crate::error::ConnectionError;
use crate::manager::Input;

/// Raw event reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    /// One undecoded text frame.
    Message(String),
    Errored(String),
    /// Terminal. `code` is `None` when no close frame was received.
    Closed { code: Option<u16>, reason: String },
}

/// Where a transport reports events for one adapter instance.
///
/// Events are queued in the order they are emitted. Once the owner has
/// superseded the adapter, its events are dropped on arrival.
#[derive(Clone)]
pub struct TransportEventSink {
    adapter: u64,
    tx: mpsc::UnboundedSender<Input>,
    runtime: Handle,
}

impl TransportEventSink {
    pub(crate) fn new(adapter: u64, tx: mpsc::UnboundedSender<Input>, runtime: Handle) -> Self {
        Self { adapter, tx, runtime }
    }

    /// Identifier of the adapter this sink belongs to.
    pub fn adapter_id(&self) -> u64 {
        self.adapter
    }

    /// Runtime the owner was created on. Transports spawn their I/O here,
    /// since `open` may be called from a thread outside any runtime.
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Queue an event. Returns false once the owner is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(Input::Transport { adapter: self.adapter, event })
            .is_ok()
    }

    pub fn opened(&self) -> bool {
        self.emit(TransportEvent::Opened)
    }

    pub fn message(&self, text: impl Into<String>) -> bool {
        self.emit(TransportEvent::Message(text.into()))
    }

    pub fn errored(&self, detail: impl Into<String>) -> bool {
        self.emit(TransportEvent::Errored(detail.into()))
    }

    pub fn closed(&self, code: Option<u16>, reason: impl Into<String>) -> bool {
        self.emit(TransportEvent::Closed { code, reason: reason.into() })
    }
}

/// Factory for adapter instances.
pub trait Transport: Send + Sync + 'static {
    /// Start opening a connection to `url`. Must not block; progress is
    /// reported through `events`.
    fn open(&self, url: &str, events: TransportEventSink) -> Box<dyn TransportHandle>;
}

/// Handle to one live adapter.
pub trait TransportHandle: Send + Sync {
    /// Queue a payload. False if the channel is not open and ready.
    fn send(&self, payload: String) -> bool;

    /// Close with the given code and reason.
    fn close(&self, code: u16, reason: &str);
}

/// Bind the credential to the target address as a query parameter.
pub fn compose_url(address: &str, token: &str) -> Result<String, ConnectionError> {
    let parsed = Url::parse(address).map_err(|e| ConnectionError::InvalidAddress(e.to_string()))?;
    if !matches!(parsed.scheme(), "ws" | "wss") {
        return Err(ConnectionError::InvalidAddress(format!(
            "unsupported scheme '{}'",
            parsed.scheme()
        )));
    }

    let separator = if address.contains('?') { '&' } else { '?' };
    Ok(format!(
        "{address}{separator}{TOKEN_QUERY_PARAM}={}",
        urlencoding::encode(token)
    ))
}

/// Strip the credential from a composed URL before logging it.
pub(crate) fn redact(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}

enum Command {
    Send(String),
    Close { code: u16, reason: String },
}

/// WebSocket transport backed by tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WsTransport {
    connect_timeout: Duration,
}

impl WsTransport {
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Give up on the opening handshake after `timeout`.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for WsTransport {
    fn open(&self, url: &str, events: TransportEventSink) -> Box<dyn TransportHandle> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let ready = Arc::new(AtomicBool::new(false));

        let runtime = events.runtime().clone();
        runtime.spawn(run_socket(
            url.to_string(),
            self.connect_timeout,
            events,
            cmd_rx,
            ready.clone(),
        ));

        Box::new(WsHandle { cmd_tx, ready })
    }
}

struct WsHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    ready: Arc<AtomicBool>,
}

impl TransportHandle for WsHandle {
    fn send(&self, payload: String) -> bool {
        self.ready.load(Ordering::SeqCst) && self.cmd_tx.send(Command::Send(payload)).is_ok()
    }

    fn close(&self, code: u16, reason: &str) {
        self.ready.store(false, Ordering::SeqCst);
        let _ = self.cmd_tx.send(Command::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

/// Drive one WebSocket until it closes. Emits exactly one `Closed` at the end
/// unless the handle was dropped without closing.
async fn run_socket(
    url: String,
    connect_timeout: Duration,
    events: TransportEventSink,
    mut commands: mpsc::UnboundedReceiver<Command>,
    ready: Arc<AtomicBool>,
) {
    let adapter = events.adapter_id();
    let stream = match timeout(connect_timeout, connect_async(url.as_str())).await {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            warn!(adapter, error = %e, "websocket handshake failed");
            events.errored(e.to_string());
            events.closed(None, "");
            return;
        }
        Err(_) => {
            warn!(adapter, "websocket handshake timed out after {connect_timeout:?}");
            events.errored(format!("connect timed out after {connect_timeout:?}"));
            events.closed(None, "");
            return;
        }
    };

    ready.store(true, Ordering::SeqCst);
    info!(adapter, url = %redact(&url), "websocket open");
    events.opened();

    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        ready.store(false, Ordering::SeqCst);
                        events.errored(e.to_string());
                        events.closed(None, "");
                        return;
                    }
                }
                Some(Command::Close { code, reason }) => {
                    ready.store(false, Ordering::SeqCst);
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        debug!(adapter, error = %e, "close frame not delivered");
                    }
                    let _ = write.close().await;
                    events.closed(Some(code), reason);
                    return;
                }
                None => {
                    // Handle dropped without an explicit close
                    ready.store(false, Ordering::SeqCst);
                    let _ = write.send(Message::Close(None)).await;
                    return;
                }
            },
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    events.message(text);
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        events.message(text);
                    }
                    Err(e) => debug!(adapter, error = %e, "dropping non-utf8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    ready.store(false, Ordering::SeqCst);
                    let (code, reason) = match frame {
                        Some(f) => (Some(u16::from(f.code)), f.reason.into_owned()),
                        None => (None, String::new()),
                    };
                    info!(adapter, ?code, %reason, "websocket closed by peer");
                    events.closed(code, reason);
                    return;
                }
                Some(Ok(_)) => {} // ping/pong are answered by tungstenite
                Some(Err(e)) => {
                    ready.store(false, Ordering::SeqCst);
                    warn!(adapter, error = %e, "websocket read failed");
                    events.errored(e.to_string());
                    events.closed(None, "");
                    return;
                }
                None => {
                    ready.store(false, Ordering::SeqCst);
                    events.closed(None, "stream ended");
                    return;
                }
            },
        }
    }
}
