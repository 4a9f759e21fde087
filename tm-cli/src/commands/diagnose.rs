//! Diagnose command - check that the chat endpoint accepts a connection and
//! answers a message.
//!
//! Opens a single connection with automatic reconnection disabled, sends one
//! test message, waits for one reply, closes cleanly, and prints a summary.

use std::time::Duration;

use console::style;
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{timeout_at, Instant};

use tm_core::config::ConfigHandle;
use tm_core::constants::close_reason;
use tm_core::error::TmResult;
use tm_socket::{
    ChatMessage, ConnectionConfig, ConnectionEvent, ConnectionHooks, ConnectionManager,
    WsTransport,
};

use super::{event_json, resolve_target};
use crate::OutputFormat;

const TEST_MESSAGE: &str = "Hello, this is a diagnostic test";

/// Outcome of one diagnostic run.
#[derive(Debug, Default, Serialize)]
struct Summary {
    connection_established: bool,
    message_received: bool,
    error_occurred: bool,
    errors: Vec<String>,
    reply: Option<serde_json::Value>,
    close_code: Option<u16>,
    close_reason: Option<String>,
    clean_close: bool,
    timed_out: bool,
}

impl Summary {
    fn healthy(&self) -> bool {
        self.connection_established && self.message_received && !self.error_occurred
    }

    fn record(&mut self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => self.connection_established = true,
            ConnectionEvent::Message(value) => {
                self.message_received = true;
                self.reply = Some(value.clone());
            }
            ConnectionEvent::Error(err) => {
                self.error_occurred = true;
                self.errors.push(match err.detail() {
                    Some(detail) => format!("{err}: {detail}"),
                    None => err.to_string(),
                });
            }
            ConnectionEvent::Closed(info) => {
                self.close_code = info.code;
                self.close_reason = Some(info.reason.clone());
                self.clean_close = info.is_clean();
            }
            ConnectionEvent::StatusChanged(_) => {}
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Wait {
    Done,
    Closed,
    TimedOut,
}

/// Run the diagnose command.
pub async fn run(
    config: ConfigHandle,
    address: Option<String>,
    token: Option<String>,
    timeout_secs: u64,
    format: OutputFormat,
) -> TmResult<()> {
    let (addr, token) = resolve_target(&config, address, token).await?;
    let text = format == OutputFormat::Text;

    if text {
        println!("{}", style("Diagnose: WebSocket endpoint").bold().underlined());
        println!("  Address: {addr}");
        println!();
    }

    let connection_config = ConnectionConfig::new(addr, token)
        .with_max_reconnect_attempts(0)
        .with_auto_connect(false);
    let manager = ConnectionManager::new(connection_config, ConnectionHooks::new(), WsTransport::new());
    let mut events = manager.subscribe();
    let deadline = Instant::now() + Duration::from_secs(timeout_secs);
    let mut summary = Summary::default();

    manager.connect();
    if let Some(err) = manager.last_error() {
        summary.error_occurred = true;
        summary.errors.push(err.to_string());
        return finish(summary, format);
    }

    if text {
        print!("  {} Opening connection... ", style("[1/3]").bold().dim());
    }
    let opened = wait_for(&mut events, &mut summary, deadline, format, |e| {
        matches!(e, ConnectionEvent::Opened)
    })
    .await;
    if opened != Wait::Done {
        summary.timed_out = opened == Wait::TimedOut;
        if text {
            println!("{}", style("failed").red());
        }
        manager.dispose();
        return finish(summary, format);
    }
    if text {
        println!("{}", style("done").green());
        print!("  {} Sending test message... ", style("[2/3]").bold().dim());
    }

    if !manager.send_message(&ChatMessage::user(TEST_MESSAGE)) {
        summary.error_occurred = true;
        summary.errors.push(
            manager
                .last_error()
                .map(|e| e.to_string())
                .unwrap_or_default(),
        );
    }
    let replied = wait_for(&mut events, &mut summary, deadline, format, |e| {
        matches!(e, ConnectionEvent::Message(_))
    })
    .await;
    summary.timed_out = replied == Wait::TimedOut;
    if text {
        if replied == Wait::Done {
            println!("{}", style("reply received").green());
        } else {
            println!("{}", style("no reply").red());
        }
    }

    if replied != Wait::Closed {
        if text {
            print!("  {} Closing connection... ", style("[3/3]").bold().dim());
        }
        manager.disconnect_with_reason(close_reason::DIAGNOSTIC_COMPLETE);
        while let Ok(event) = events.try_recv() {
            summary.record(&event);
        }
        if text {
            println!("{}", style("done").green());
        }
    }

    manager.dispose();
    finish(summary, format)
}

/// Record events until `done` matches, the connection closes, or the deadline passes.
async fn wait_for(
    events: &mut broadcast::Receiver<ConnectionEvent>,
    summary: &mut Summary,
    deadline: Instant,
    format: OutputFormat,
    done: impl Fn(&ConnectionEvent) -> bool,
) -> Wait {
    loop {
        let event = match timeout_at(deadline, events.recv()).await {
            Err(_) => return Wait::TimedOut,
            Ok(Err(RecvError::Lagged(_))) => continue,
            Ok(Err(RecvError::Closed)) => return Wait::Closed,
            Ok(Ok(event)) => event,
        };
        if format == OutputFormat::Json {
            eprintln!("{}", event_json(&event));
        }
        summary.record(&event);
        if done(&event) {
            return Wait::Done;
        }
        if matches!(event, ConnectionEvent::Closed(_)) {
            return Wait::Closed;
        }
    }
}

fn finish(summary: Summary, format: OutputFormat) -> TmResult<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let yes_no = |b: bool| if b { style("yes").green() } else { style("no").red() };
    println!();
    println!("{}", style("Summary").bold());
    println!("  Connection established: {}", yes_no(summary.connection_established));
    println!("  Message received:       {}", yes_no(summary.message_received));
    println!(
        "  Error occurred:         {}",
        if summary.error_occurred { style("yes").red() } else { style("no").green() }
    );
    for err in &summary.errors {
        println!("    - {err}");
    }
    if summary.timed_out {
        println!("  {} Timed out waiting for the server", style("WARN").yellow());
    }
    if let Some(reply) = &summary.reply {
        println!("  Reply:                  {reply}");
    }
    match summary.close_code {
        Some(code) => println!(
            "  Close:                  {code} {} (clean: {})",
            summary.close_reason.as_deref().unwrap_or(""),
            summary.clean_close
        ),
        None => println!("  Close:                  no close frame"),
    }
    println!();
    if summary.healthy() {
        println!("  {} WebSocket connection is working correctly", style("OK").green().bold());
    } else {
        println!("  {} WebSocket connection has issues", style("FAIL").red().bold());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tm_socket::{CloseInfo, ConnectionError};

    #[test]
    fn test_summary_records_events() {
        let mut summary = Summary::default();
        summary.record(&ConnectionEvent::Opened);
        summary.record(&ConnectionEvent::Message(serde_json::json!({"type": "echo"})));
        summary.record(&ConnectionEvent::Closed(CloseInfo::new(Some(1000), "Diagnostic complete")));

        assert!(summary.healthy());
        assert!(summary.clean_close);
        assert_eq!(summary.close_reason.as_deref(), Some("Diagnostic complete"));
    }

    #[test]
    fn test_summary_unhealthy_on_error() {
        let mut summary = Summary::default();
        summary.record(&ConnectionEvent::Opened);
        summary.record(&ConnectionEvent::Error(ConnectionError::Transport("reset".into())));
        summary.record(&ConnectionEvent::Message(serde_json::Value::Null));

        assert!(!summary.healthy());
        assert_eq!(summary.errors, vec!["WebSocket connection error: reset"]);
    }
}
