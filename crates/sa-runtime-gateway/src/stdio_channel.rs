//! A trivial local channel adapter: one line of stdin per `InboundMessage`,
//! one `OutboundMessage` per line of stdout.
//!
//! Channel-specific framing (Telegram/Discord/Slack/WhatsApp) is an
//! out-of-scope external collaborator (§1); this is the minimal loop that
//! lets the gateway binary actually exchange messages with a terminal
//! without pulling in any of that framing code.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use sa_runtime_core::{InboundMessage, MessageBus};

pub const CHANNEL: &str = "cli";
pub const CHAT_ID: &str = "stdin";

/// Read lines from stdin and publish them as inbound messages until
/// `cancel` fires or stdin closes.
pub async fn read_loop(bus: Arc<MessageBus>, cancel: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(text)) if !text.trim().is_empty() => {
                        if bus.publish_inbound(InboundMessage::new(CHANNEL, CHAT_ID, text)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Some(_)) => continue,
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(error = %err, "stdin read error, stopping cli channel");
                        break;
                    }
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

/// Drain outbound messages addressed to the cli channel to stdout until
/// `cancel` fires.
pub async fn write_loop(bus: Arc<MessageBus>, cancel: CancellationToken) {
    while let Some(msg) = bus.consume_outbound(&cancel).await {
        println!("{}", msg.content);
    }
}
