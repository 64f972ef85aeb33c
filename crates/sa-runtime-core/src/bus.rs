//! Message Bus (C7, §4.7): bounded FIFO inbound/outbound queues, with
//! outbound publication gated by the Outbound Rate Limiter (C6).
//!
//! Grounded on `clawlet/bus/queue.py::MessageBus`, reworked onto bounded
//! `tokio::sync::mpsc` channels (blocking publishers = bounded channel
//! back-pressure; blocking consumers = channel `recv`).

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use sa_runtime_domain::config::RateLimitMode;

use crate::error::{Result, RuntimeError};
use crate::ratelimit::OutboundRateLimiter;

/// An incoming message from a channel adapter (§6 channel adapter
/// contract).
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub metadata: Map<String, Value>,
}

impl InboundMessage {
    pub fn new(channel: impl Into<String>, chat_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            user_id: None,
            user_name: None,
            metadata: Map::new(),
        }
    }

    /// True when this message was synthesized by the autonomous-follow-up
    /// mechanism (§4.9) rather than an external adapter.
    pub fn is_autonomous_followup(&self) -> bool {
        self.metadata
            .get("internal_autonomous_followup")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn autonomous_followup_depth(&self) -> u32 {
        self.metadata
            .get("autonomous_followup_depth")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32
    }
}

/// An outgoing message to a channel adapter.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
}

impl OutboundMessage {
    pub fn new(channel: impl Into<String>, chat_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            metadata: Map::new(),
        }
    }
}

/// Bus-wide counters (§10.6 `get_stats`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    pub inbound_pending: usize,
    pub outbound_pending: usize,
}

/// Two bounded FIFO queues plus the outbound rate limiter gate (§4.7).
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<InboundMessage>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: tokio::sync::Mutex<mpsc::Receiver<OutboundMessage>>,
    limiter: Arc<OutboundRateLimiter>,
    inbound_depth: Arc<std::sync::atomic::AtomicUsize>,
    outbound_depth: Arc<std::sync::atomic::AtomicUsize>,
}

impl MessageBus {
    pub fn new(capacity: usize, limiter: Arc<OutboundRateLimiter>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        Self {
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: tokio::sync::Mutex::new(outbound_rx),
            limiter,
            inbound_depth: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
            outbound_depth: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        }
    }

    /// Always admits, blocking for capacity (§4.7).
    pub async fn publish_inbound(&self, msg: InboundMessage) -> Result<()> {
        self.inbound_tx
            .send(msg)
            .await
            .map_err(|_| RuntimeError::Domain(sa_runtime_domain::error::Error::Other(
                "inbound queue closed".into(),
            )))?;
        self.inbound_depth
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    /// Consult C6 first; in strict mode a denial is a typed failure and
    /// does not enqueue, in lenient mode it logs and enqueues anyway
    /// (§4.7).
    pub async fn publish_outbound(&self, msg: OutboundMessage) -> Result<()> {
        let decision = self.limiter.check(&msg.channel, &msg.chat_id);
        if !decision.allowed && self.limiter.mode() == RateLimitMode::Strict {
            return Err(RuntimeError::RateLimitExceeded {
                channel: msg.channel,
                chat_id: msg.chat_id,
                retry_after: decision.retry_after.as_secs_f64(),
            });
        }

        self.outbound_tx
            .send(msg)
            .await
            .map_err(|_| RuntimeError::Domain(sa_runtime_domain::error::Error::Other(
                "outbound queue closed".into(),
            )))?;
        self.outbound_depth
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    /// Blocks until a message is available or `cancel` fires, in which
    /// case `None` is returned so adapters can poll cooperatively (§4.7).
    pub async fn consume_inbound(&self, cancel: &CancellationToken) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        tokio::select! {
            msg = rx.recv() => {
                if msg.is_some() {
                    self.inbound_depth.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                }
                msg
            }
            _ = cancel.cancelled() => None,
        }
    }

    pub async fn consume_outbound(&self, cancel: &CancellationToken) -> Option<OutboundMessage> {
        let mut rx = self.outbound_rx.lock().await;
        tokio::select! {
            msg = rx.recv() => {
                if msg.is_some() {
                    self.outbound_depth.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                }
                msg
            }
            _ = cancel.cancelled() => None,
        }
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            inbound_pending: self.inbound_depth.load(std::sync::atomic::Ordering::SeqCst),
            outbound_pending: self.outbound_depth.load(std::sync::atomic::Ordering::SeqCst),
        }
    }

    pub fn limiter(&self) -> &Arc<OutboundRateLimiter> {
        &self.limiter
    }
}
