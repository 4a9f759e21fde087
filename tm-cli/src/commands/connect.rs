//! Connect command - hold a persistent connection to the chat endpoint.

use std::path::Path;

use console::style;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use tm_core::config::ConfigHandle;
use tm_core::error::TmResult;
use tm_socket::{
    ChatMessage, ConnectionConfig, ConnectionEvent, ConnectionHooks, ConnectionManager,
    WsTransport,
};

use super::{event_json, resolve_target, styled_status};
use crate::OutputFormat;

/// Run the connect command.
pub async fn run(
    config: ConfigHandle,
    config_path: &Path,
    address: Option<String>,
    token: Option<String>,
    save_config: bool,
    format: OutputFormat,
) -> TmResult<()> {
    let (addr, token) = resolve_target(&config, address, token).await?;
    {
        let mut cfg = config.write().await;
        cfg.server.address = addr.clone();
        cfg.server.token = token;
    }

    if save_config {
        config.save_to(config_path).await?;
        println!("  {} Config saved to {}", style("OK").green(), config_path.display());
    }

    let connection_config = ConnectionConfig::from_app_config(&*config.read().await)
        // Connect explicitly below, after subscribing
        .with_auto_connect(false);

    if format == OutputFormat::Text {
        println!("{} Connecting to {}...", style("[1/2]").bold().dim(), addr);
    }

    let manager = ConnectionManager::new(connection_config, ConnectionHooks::new(), WsTransport::new());
    let mut events = manager.subscribe();
    manager.connect();

    if let Some(err) = manager.last_error() {
        println!("  {} {err}", style("FAIL").red().bold());
        manager.dispose();
        return Ok(());
    }

    if format == OutputFormat::Text {
        println!(
            "{} Type a message and press Enter to send. (Ctrl+C to stop)",
            style("[2/2]").bold().dim(),
        );
        println!();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(ev) => print_event(&ev, format),
                    Err(RecvError::Lagged(n)) => {
                        println!("  {} Missed {n} events (slow consumer)", style("WARN").yellow());
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(text)) => {
                        let text = text.trim();
                        if text.is_empty() {
                            continue;
                        }
                        if !manager.send_message(&ChatMessage::user(text)) {
                            let reason = manager
                                .last_error()
                                .map(|e| e.to_string())
                                .unwrap_or_default();
                            println!("  {} Not sent: {reason}", style("WARN").yellow());
                        }
                    }
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        warn!("stdin read failed: {e}");
                        stdin_open = false;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\n  Disconnecting...");
                break;
            }
        }
    }

    manager.dispose();
    Ok(())
}

fn print_event(event: &ConnectionEvent, format: OutputFormat) {
    if format == OutputFormat::Json {
        println!("{}", event_json(event));
        return;
    }

    match event {
        ConnectionEvent::StatusChanged(status) => {
            println!("  {} {}", style("[status]").dim(), styled_status(*status));
        }
        ConnectionEvent::Opened => {
            println!("  {} Connected.", style("OK").green().bold());
        }
        ConnectionEvent::Message(payload) => match event.as_chat_message() {
            Some(chat) => println!(
                "  {} {}",
                style(format!("[{}]", chat.kind)).cyan(),
                chat.content
            ),
            None => println!("  {} {payload}", style("[message]").cyan()),
        },
        ConnectionEvent::Error(err) => match err.detail() {
            Some(detail) => println!("  {} {err}: {detail}", style("ERROR").red()),
            None => println!("  {} {err}", style("ERROR").red()),
        },
        ConnectionEvent::Closed(info) => {
            let code = info
                .code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".into());
            println!(
                "  {} code {code} {}",
                style("[closed]").dim(),
                info.reason
            );
        }
    }
}
