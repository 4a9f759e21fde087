//! CLI command implementations.

pub mod config;
pub mod connect;
pub mod diagnose;

use console::style;
use dialoguer::{Input, Password};
use serde_json::{json, Value};

use tm_core::config::{AppConfig, ConfigHandle};
use tm_core::error::{TmError, TmResult};
use tm_socket::{ConnectionEvent, ConnectionStatus};

/// Resolve address and token: arg > config > interactive prompt.
/// The address is sanitized before it is returned.
pub async fn resolve_target(
    config: &ConfigHandle,
    address: Option<String>,
    token: Option<String>,
) -> TmResult<(String, String)> {
    let addr = match address {
        Some(a) => a,
        None => {
            let current = config.read().await.server.address.clone();
            if current.is_empty() {
                Input::new()
                    .with_prompt("Server address")
                    .interact_text()
                    .map_err(|e| TmError::Internal(e.to_string()))?
            } else {
                current
            }
        }
    };

    let token = match token {
        Some(t) => t,
        None => {
            let current = config.read().await.server.token.clone();
            if current.is_empty() {
                Password::new()
                    .with_prompt("Token")
                    .interact()
                    .map_err(|e| TmError::Internal(e.to_string()))?
            } else {
                current
            }
        }
    };

    let addr = AppConfig::sanitize_server_address(&addr);
    if addr.is_empty() {
        return Err(TmError::MissingConfig("server address".into()));
    }
    if token.is_empty() {
        return Err(TmError::MissingConfig("token".into()));
    }
    Ok((addr, token))
}

/// JSON form of an event for `--format json`.
pub fn event_json(event: &ConnectionEvent) -> Value {
    match event {
        ConnectionEvent::Opened => json!({ "event": "opened" }),
        ConnectionEvent::Message(payload) => json!({ "event": "message", "payload": payload }),
        ConnectionEvent::Error(err) => json!({
            "event": "error",
            "message": err.to_string(),
            "detail": err.detail(),
        }),
        ConnectionEvent::Closed(info) => json!({
            "event": "closed",
            "code": info.code,
            "reason": info.reason,
            "clean": info.is_clean(),
        }),
        ConnectionEvent::StatusChanged(status) => json!({
            "event": "status",
            "status": status.to_string(),
        }),
    }
}

/// Colored status label for text output.
pub fn styled_status(status: ConnectionStatus) -> console::StyledObject<String> {
    let text = status.to_string();
    match status {
        ConnectionStatus::Connected => style(text).green().bold(),
        ConnectionStatus::Connecting | ConnectionStatus::Reconnecting { .. } => style(text).yellow(),
        ConnectionStatus::Error | ConnectionStatus::Failed => style(text).red().bold(),
        ConnectionStatus::Disconnected => style(text).dim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tm_socket::{CloseInfo, ConnectionError};

    #[test]
    fn test_event_json_shapes() {
        let closed = event_json(&ConnectionEvent::Closed(CloseInfo::new(Some(1000), "bye")));
        assert_eq!(closed["event"], "closed");
        assert_eq!(closed["clean"], true);

        let error = event_json(&ConnectionEvent::Error(ConnectionError::Transport("reset".into())));
        assert_eq!(error["message"], "WebSocket connection error");
        assert_eq!(error["detail"], "reset");

        let status = event_json(&ConnectionEvent::StatusChanged(ConnectionStatus::Reconnecting {
            attempt: 2,
            max: 5,
        }));
        assert_eq!(status["status"], "Reconnecting (2/5)");
    }
}
