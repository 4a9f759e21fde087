//! Observable connection error descriptors.
//!
//! These are recorded as the connection's last error and handed to the
//! `on_error` hook. None of them propagate out of the public operations.

use thiserror::Error;

/// An error recorded by the connection owner.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Address or credential absent when connecting.
    #[error("URL and token are required for WebSocket connection")]
    MissingTarget,

    /// The address is not a usable ws/wss URL.
    #[error("Invalid WebSocket address: {0}")]
    InvalidAddress(String),

    /// A send was attempted while not connected.
    #[error("WebSocket is not connected")]
    NotConnected,

    /// The transport refused an outgoing payload.
    #[error("Failed to send message")]
    SendFailed,

    /// An inbound frame could not be decoded. The connection stays open.
    #[error("Failed to parse message from server")]
    Decode(String),

    /// The transport reported an error. Retry is decided on the following close.
    #[error("WebSocket connection error")]
    Transport(String),

    /// Automatic reconnection gave up.
    #[error("Maximum reconnection attempts reached")]
    RetriesExhausted,
}

impl ConnectionError {
    /// Underlying detail for errors that carry one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::InvalidAddress(d) | Self::Decode(d) | Self::Transport(d) => Some(d),
            _ => None,
        }
    }
}
