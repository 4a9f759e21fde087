//! TaskMate Socket - resilient persistent-connection client.
//!
//! This crate owns the lifecycle of a single bidirectional message
//! connection to a remote endpoint:
//! - An explicit connection state machine (single authoritative mutator)
//! - Bounded exponential backoff with jitter between reconnection attempts
//! - A replaceable transport adapter (WebSocket via tokio-tungstenite)
//! - Send gating on the connected state
//! - Deterministic teardown of the adapter and any pending retry timer
//! - Event fan-out via hooks, a broadcast dispatcher, and a status watch

pub mod backoff;
pub mod error;
pub mod events;
pub mod manager;
pub mod state;
pub mod transport;

// Re-export key types
pub use backoff::BackoffPolicy;
pub use error::ConnectionError;
pub use events::{ChatMessage, CloseInfo, ConnectionEvent, ConnectionHooks, EventDispatcher};
pub use manager::{ConnectionConfig, ConnectionManager};
pub use state::{ConnectionState, ConnectionStatus, MachineEvent, StateMachine};
pub use transport::{Transport, TransportEvent, TransportEventSink, TransportHandle, WsTransport};
