//! Connection state machine.
//!
//! The single authoritative owner of the connection status. Every status
//! change goes through [`StateMachine::apply`], which looks the
//! `(status, event)` pair up in one transition table and rejects anything
//! not listed there.

use serde_json::Value;
use tm_core::constants::is_clean_close;
use tm_core::error::{TmError, TmResult};

use crate::error::ConnectionError;

/// Connection status as surfaced to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not connected and not trying to connect.
    Disconnected,
    /// An adapter exists and has not opened yet.
    Connecting,
    /// The adapter is open; sends are allowed.
    Connected,
    /// Waiting for the retry timer. `attempt` is 1-based.
    Reconnecting { attempt: u32, max: u32 },
    /// The adapter reported an error; its close decides what happens next.
    Error,
    /// Automatic reconnection gave up. Only a manual reconnect leaves this.
    Failed,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// True while a connection attempt is in flight or scheduled.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting { .. })
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// True for both the recoverable `Error` and the terminal `Failed`.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error | Self::Failed)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Reconnecting { attempt, max } => write!(f, "Reconnecting ({attempt}/{max})"),
            Self::Error => write!(f, "Error"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Inputs accepted by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineEvent {
    /// Caller asked to connect.
    Connect,
    /// The pending retry timer fired.
    RetryDue,
    /// Adapter opened.
    Opened,
    /// Adapter reported an error.
    Errored,
    /// Adapter closed, with the close code if one was received.
    Closed { code: Option<u16> },
    /// Caller disconnected, disposed, or re-pointed the connection.
    Disconnect,
}

impl std::fmt::Display for MachineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::RetryDue => write!(f, "retry-due"),
            Self::Opened => write!(f, "opened"),
            Self::Errored => write!(f, "errored"),
            Self::Closed { code: Some(code) } => write!(f, "closed({code})"),
            Self::Closed { code: None } => write!(f, "closed"),
            Self::Disconnect => write!(f, "disconnect"),
        }
    }
}

/// Follow-up work the lifecycle owner must perform after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    /// Schedule reconnection attempt number `attempt` (1-based).
    ScheduleRetry { attempt: u32 },
    /// Retries are exhausted; status is now `Failed`.
    GaveUp,
}

/// Snapshot of the connection state.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Reconnection attempts since the last successful open.
    pub attempt: u32,
    /// Cleared on a successful open and at the start of each connect.
    pub last_error: Option<ConnectionError>,
    /// Most recently received decoded payload.
    pub last_message: Option<Value>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            attempt: 0,
            last_error: None,
            last_message: None,
        }
    }
}

/// Explicit, table-driven connection state machine.
#[derive(Debug)]
pub struct StateMachine {
    state: ConnectionState,
    max_attempts: u32,
}

impl StateMachine {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: ConnectionState::default(),
            max_attempts,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status
    }

    pub fn attempt(&self) -> u32 {
        self.state.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Change the retry budget. A pending `Reconnecting` status is rebuilt
    /// with the new max; returns true when the status changed.
    pub fn set_max_attempts(&mut self, max_attempts: u32) -> bool {
        self.max_attempts = max_attempts;
        match self.state.status {
            ConnectionStatus::Reconnecting { attempt, max } if max != max_attempts => {
                self.state.status = ConnectionStatus::Reconnecting { attempt, max: max_attempts };
                true
            }
            _ => false,
        }
    }

    /// Whether `event` would move the machine to `Connecting`.
    pub fn opens_on(&self, event: MachineEvent) -> bool {
        matches!(
            (self.state.status, event),
            (ConnectionStatus::Disconnected, MachineEvent::Connect)
                | (
                    ConnectionStatus::Reconnecting { .. },
                    MachineEvent::Connect | MachineEvent::RetryDue
                )
        )
    }

    /// Record an error without touching the status.
    pub fn record_error(&mut self, error: ConnectionError) {
        self.state.last_error = Some(error);
    }

    /// Record the latest decoded inbound payload.
    pub fn record_message(&mut self, message: Value) {
        self.state.last_message = Some(message);
    }

    /// Forget the attempt counter (manual reconnect).
    pub fn reset_attempts(&mut self) {
        self.state.attempt = 0;
    }

    /// Apply one input.
    ///
    /// `auto_reconnect` is consulted only for unclean closes. Returns the
    /// effect the caller has to carry out, or `InvalidTransition` when the
    /// pair is not in the table (state is left untouched).
    pub fn apply(&mut self, event: MachineEvent, auto_reconnect: bool) -> TmResult<Effect> {
        use ConnectionStatus as S;
        use MachineEvent as E;

        let from = self.state.status;
        let (next, effect) = match (from, event) {
            _ if self.opens_on(event) => (S::Connecting, Effect::None),

            (S::Connecting, E::Opened) => (S::Connected, Effect::None),

            (S::Connecting | S::Connected | S::Reconnecting { .. } | S::Error, E::Errored) => {
                (S::Error, Effect::None)
            }

            (S::Connecting | S::Connected | S::Reconnecting { .. } | S::Error, E::Closed { code }) => {
                self.after_close(code, auto_reconnect)
            }

            (_, E::Disconnect) => (S::Disconnected, Effect::None),

            _ => {
                return Err(TmError::InvalidTransition {
                    from: from.to_string(),
                    event: event.to_string(),
                })
            }
        };

        match next {
            S::Connecting => self.state.last_error = None,
            S::Connected => {
                self.state.attempt = 0;
                self.state.last_error = None;
            }
            S::Disconnected if event == E::Disconnect => self.state.attempt = 0,
            S::Failed => self.state.last_error = Some(ConnectionError::RetriesExhausted),
            _ => {}
        }
        self.state.status = next;
        Ok(effect)
    }

    fn after_close(&mut self, code: Option<u16>, auto_reconnect: bool) -> (ConnectionStatus, Effect) {
        if is_clean_close(code) {
            return (ConnectionStatus::Disconnected, Effect::None);
        }
        if self.state.attempt >= self.max_attempts {
            return (ConnectionStatus::Failed, Effect::GaveUp);
        }
        if !auto_reconnect {
            return (ConnectionStatus::Disconnected, Effect::None);
        }
        self.state.attempt += 1;
        let attempt = self.state.attempt;
        (
            ConnectionStatus::Reconnecting { attempt, max: self.max_attempts },
            Effect::ScheduleRetry { attempt },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DROPPED: MachineEvent = MachineEvent::Closed { code: Some(1006) };
    const CLEAN: MachineEvent = MachineEvent::Closed { code: Some(1000) };

    fn connected(max: u32) -> StateMachine {
        let mut sm = StateMachine::new(max);
        sm.apply(MachineEvent::Connect, true).unwrap();
        sm.apply(MachineEvent::Opened, true).unwrap();
        sm
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(ConnectionStatus::Disconnected.to_string(), "Disconnected");
        assert_eq!(ConnectionStatus::Connecting.to_string(), "Connecting");
        assert_eq!(ConnectionStatus::Connected.to_string(), "Connected");
        assert_eq!(
            ConnectionStatus::Reconnecting { attempt: 1, max: 2 }.to_string(),
            "Reconnecting (1/2)"
        );
        assert_eq!(ConnectionStatus::Error.to_string(), "Error");
        assert_eq!(ConnectionStatus::Failed.to_string(), "Failed");
    }

    #[test]
    fn test_status_predicates() {
        assert!(ConnectionStatus::Reconnecting { attempt: 1, max: 5 }.is_connecting());
        assert!(ConnectionStatus::Connecting.is_connecting());
        assert!(ConnectionStatus::Failed.is_error());
        assert!(ConnectionStatus::Error.is_error());
        assert!(!ConnectionStatus::Disconnected.is_error());
        assert!(ConnectionStatus::Disconnected.is_disconnected());
    }

    #[test]
    fn test_open_resets_attempts_and_error() {
        let mut sm = connected(3);
        sm.apply(DROPPED, true).unwrap();
        sm.apply(MachineEvent::RetryDue, true).unwrap();
        sm.apply(MachineEvent::Errored, true).unwrap();
        sm.record_error(ConnectionError::Transport("boom".into()));
        assert_eq!(sm.attempt(), 1);

        sm.apply(DROPPED, true).unwrap();
        sm.apply(MachineEvent::RetryDue, true).unwrap();
        sm.apply(MachineEvent::Opened, true).unwrap();
        assert_eq!(sm.status(), ConnectionStatus::Connected);
        assert_eq!(sm.attempt(), 0);
        assert!(sm.state().last_error.is_none());
    }

    #[test]
    fn test_unclean_close_schedules_retry() {
        let mut sm = connected(2);
        let effect = sm.apply(DROPPED, true).unwrap();
        assert_eq!(effect, Effect::ScheduleRetry { attempt: 1 });
        assert_eq!(sm.status(), ConnectionStatus::Reconnecting { attempt: 1, max: 2 });
    }

    #[test]
    fn test_close_without_code_is_unclean() {
        let mut sm = connected(2);
        let effect = sm.apply(MachineEvent::Closed { code: None }, true).unwrap();
        assert_eq!(effect, Effect::ScheduleRetry { attempt: 1 });
    }

    #[test]
    fn test_clean_close_disconnects() {
        let mut sm = connected(2);
        assert_eq!(sm.apply(CLEAN, true).unwrap(), Effect::None);
        assert_eq!(sm.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_error_does_not_schedule_retry_until_close() {
        let mut sm = connected(2);
        assert_eq!(sm.apply(MachineEvent::Errored, true).unwrap(), Effect::None);
        assert_eq!(sm.status(), ConnectionStatus::Error);
        assert_eq!(sm.apply(DROPPED, true).unwrap(), Effect::ScheduleRetry { attempt: 1 });
    }

    #[test]
    fn test_exhaustion_fails() {
        let mut sm = connected(2);
        sm.apply(DROPPED, true).unwrap();
        sm.apply(MachineEvent::RetryDue, true).unwrap();
        sm.apply(DROPPED, true).unwrap();
        sm.apply(MachineEvent::RetryDue, true).unwrap();
        assert_eq!(sm.attempt(), 2);

        assert_eq!(sm.apply(DROPPED, true).unwrap(), Effect::GaveUp);
        assert_eq!(sm.status(), ConnectionStatus::Failed);
        assert_eq!(sm.state().last_error, Some(ConnectionError::RetriesExhausted));
    }

    #[test]
    fn test_failed_rejects_connect_until_disconnect() {
        let mut sm = connected(0);
        assert_eq!(sm.apply(DROPPED, true).unwrap(), Effect::GaveUp);
        assert!(sm.apply(MachineEvent::Connect, true).is_err());

        sm.apply(MachineEvent::Disconnect, true).unwrap();
        sm.apply(MachineEvent::Connect, true).unwrap();
        assert_eq!(sm.status(), ConnectionStatus::Connecting);
    }

    #[test]
    fn test_unclean_close_without_auto_reconnect_disconnects() {
        let mut sm = connected(5);
        assert_eq!(sm.apply(DROPPED, false).unwrap(), Effect::None);
        assert_eq!(sm.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_illegal_pairs_leave_state_untouched() {
        let mut sm = StateMachine::new(5);
        let err = sm.apply(MachineEvent::Opened, true).unwrap_err();
        assert!(matches!(err, TmError::InvalidTransition { .. }));
        assert!(sm.apply(CLEAN, true).is_err());
        assert!(sm.apply(MachineEvent::RetryDue, true).is_err());
        assert_eq!(sm.status(), ConnectionStatus::Disconnected);

        let mut sm = connected(5);
        assert!(sm.apply(MachineEvent::Connect, true).is_err());
        assert!(sm.apply(MachineEvent::Opened, true).is_err());
        assert_eq!(sm.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_disconnect_is_always_legal_and_resets_attempts() {
        let mut sm = connected(5);
        sm.apply(DROPPED, true).unwrap();
        assert_eq!(sm.attempt(), 1);
        sm.apply(MachineEvent::Disconnect, true).unwrap();
        sm.apply(MachineEvent::Disconnect, true).unwrap();
        assert_eq!(sm.status(), ConnectionStatus::Disconnected);
        assert_eq!(sm.attempt(), 0);
    }

    #[test]
    fn test_max_change_rebuilds_reconnecting_status() {
        let mut sm = connected(5);
        sm.apply(DROPPED, true).unwrap();
        assert!(sm.set_max_attempts(2));
        assert_eq!(sm.status(), ConnectionStatus::Reconnecting { attempt: 1, max: 2 });
        assert!(!sm.set_max_attempts(2));

        let mut sm = connected(5);
        assert!(!sm.set_max_attempts(2));
        assert_eq!(sm.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_opens_on_matches_apply() {
        let mut sm = StateMachine::new(5);
        assert!(sm.opens_on(MachineEvent::Connect));
        assert!(!sm.opens_on(MachineEvent::RetryDue));

        sm.apply(MachineEvent::Connect, true).unwrap();
        assert!(!sm.opens_on(MachineEvent::Connect));

        sm.apply(DROPPED, true).unwrap();
        assert!(sm.opens_on(MachineEvent::RetryDue));
        assert!(sm.opens_on(MachineEvent::Connect));
    }

    #[test]
    fn test_connecting_clears_previous_error() {
        let mut sm = StateMachine::new(5);
        sm.record_error(ConnectionError::NotConnected);
        sm.apply(MachineEvent::Connect, true).unwrap();
        assert!(sm.state().last_error.is_none());
    }
}
