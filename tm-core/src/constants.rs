//! Application-wide constants.

/// Application name.
pub const APP_NAME: &str = "TaskMate";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Query parameter carrying the credential on the socket URL.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Delay between tearing down an adapter and opening its replacement.
pub const SETTLE_DELAY_MS: u64 = 100;

/// Default reconnect policy values.
pub mod reconnect {
    /// Maximum consecutive reconnection attempts.
    pub const MAX_ATTEMPTS: u32 = 5;
    /// Delay before the first reconnection attempt, in milliseconds.
    pub const INITIAL_DELAY_MS: u64 = 1_000;
    /// Cap applied to the exponential term, in milliseconds.
    pub const MAX_DELAY_MS: u64 = 30_000;
    /// Growth factor between attempts.
    pub const DECAY: f64 = 1.5;
    /// Upper bound of the uniform jitter added to each delay, in milliseconds.
    pub const JITTER_MS: u64 = 1_000;
}

/// WebSocket close codes (RFC 6455 section 7.4.1).
pub mod close_code {
    /// Normal closure. The only code that does not trigger a retry.
    pub const NORMAL: u16 = 1000;
    /// Endpoint going away.
    pub const GOING_AWAY: u16 = 1001;
    /// Closed without a status code (reported locally, never sent).
    pub const NO_STATUS: u16 = 1005;
    /// Connection dropped without a close frame (reported locally, never sent).
    pub const ABNORMAL: u16 = 1006;
}

/// Reasons attached to locally initiated clean closes.
pub mod close_reason {
    pub const CLIENT_DISCONNECT: &str = "Client disconnect";
    pub const OWNER_DISPOSED: &str = "Owner disposed";
    pub const RECONFIGURED: &str = "Reconnecting with new parameters";
    pub const DIAGNOSTIC_COMPLETE: &str = "Diagnostic complete";
}

/// Whether a close code marks an intentional, non-retriable shutdown.
pub fn is_clean_close(code: Option<u16>) -> bool {
    code == Some(close_code::NORMAL)
}
