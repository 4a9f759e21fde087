//! Connection events, caller hooks, and the broadcast event dispatcher.
//!
//! Every event the connection owner produces is delivered twice: to the
//! caller-supplied hooks, synchronously and in order, and to any number of
//! broadcast subscribers for decoupled consumers.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use tm_core::constants::is_clean_close;

use crate::error::ConnectionError;
use crate::state::ConnectionStatus;

/// Close code and reason reported with a close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// `None` when the connection dropped without a close frame.
    pub code: Option<u16>,
    pub reason: String,
}

impl CloseInfo {
    pub fn new(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self { code, reason: reason.into() }
    }

    /// Code 1000 only.
    pub fn is_clean(&self) -> bool {
        is_clean_close(self.code)
    }
}

/// Chat-style payload used by the consumers of the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Discriminator: "user", "assistant", "system", "echo", ...
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn new(kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            content: content.into(),
            timestamp: None,
        }
    }

    /// A message typed by the local user, stamped with the current time.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            timestamp: Some(Utc::now()),
            ..Self::new("user", content)
        }
    }

    /// Try to read a chat message out of a decoded payload.
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// An event produced by the connection owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The adapter opened.
    Opened,
    /// A frame was received and decoded.
    Message(Value),
    /// A transport or decode error was recorded.
    Error(ConnectionError),
    /// The adapter closed, or was closed by the owner.
    Closed(CloseInfo),
    /// The status changed.
    StatusChanged(ConnectionStatus),
}

impl ConnectionEvent {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::Message(_) => "message",
            Self::Error(_) => "error",
            Self::Closed(_) => "closed",
            Self::StatusChanged(_) => "status",
        }
    }

    /// Try to parse a message event as a ChatMessage.
    pub fn as_chat_message(&self) -> Option<ChatMessage> {
        match self {
            Self::Message(value) => ChatMessage::from_value(value),
            _ => None,
        }
    }
}

type Hook<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Caller-supplied callbacks.
///
/// Invoked synchronously after the state has been updated, in the order
/// the transport produced the underlying events. A hook that calls back into
/// the owner must hold it through a [`Weak`](std::sync::Weak) reference; a
/// strong `Arc` makes a cycle and the owner is then only released by an
/// explicit `dispose`.
#[derive(Clone, Default)]
pub struct ConnectionHooks {
    on_open: Option<Arc<dyn Fn() + Send + Sync>>,
    on_message: Option<Hook<Value>>,
    on_error: Option<Hook<ConnectionError>>,
    on_close: Option<Hook<CloseInfo>>,
}

impl ConnectionHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_open(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(f));
        self
    }

    pub fn on_message(mut self, f: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&ConnectionError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_close(mut self, f: impl Fn(&CloseInfo) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(f));
        self
    }

    /// Route one event to the matching hook.
    pub(crate) fn invoke(&self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => {
                if let Some(f) = &self.on_open {
                    f();
                }
            }
            ConnectionEvent::Message(value) => {
                if let Some(f) = &self.on_message {
                    f(value);
                }
            }
            ConnectionEvent::Error(err) => {
                if let Some(f) = &self.on_error {
                    f(err);
                }
            }
            ConnectionEvent::Closed(info) => {
                if let Some(f) = &self.on_close {
                    f(info);
                }
            }
            ConnectionEvent::StatusChanged(_) => {}
        }
    }
}

impl fmt::Debug for ConnectionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHooks")
            .field("on_open", &self.on_open.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}

/// Broadcast-based event dispatcher for decoupled event handling.
///
/// Uses tokio::broadcast channels so multiple consumers can independently
/// receive and process events without blocking each other.
#[derive(Clone)]
pub struct EventDispatcher {
    sender: broadcast::Sender<ConnectionEvent>,
}

impl EventDispatcher {
    /// Create a new EventDispatcher with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to receive connection events.
    ///
    /// Slow consumers that fall behind receive `RecvError::Lagged` and
    /// miss events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.sender.subscribe()
    }

    /// Dispatch an event to all active subscribers.
    pub fn dispatch(&self, event: ConnectionEvent) {
        let name = event.name();
        match self.sender.send(event) {
            Ok(count) => debug!("dispatched {name} to {count} subscriber(s)"),
            // No receivers during startup/shutdown is expected
            Err(_) => debug!("no subscribers for event {name}"),
        }
    }

    /// Get the current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(256)
    }
}
