//! TCP line-frame broker adapter.
//!
//! Accepts connections from shop-floor gateways that push newline-delimited
//! JSON frames of the form `{"topic": "...", "payload": {...}}`. Each frame
//! is forwarded as one topic+payload pair. Reconnection is owned by the
//! remote feeder; this adapter just keeps accepting.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::select;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::errors::BrokerResult;
use super::traits::{topic_matches, Broker, InboundMessage, MessageCallback};

/// One wire frame. The payload is kept as raw JSON and re-serialized so the
/// decode boundary stays in the ingest layer.
#[derive(Debug, Deserialize)]
struct Frame {
    topic: String,
    payload: serde_json::Value,
}

/// TCP listener delivering line-framed messages as broker deliveries.
pub struct TcpLineBroker {
    bind_addr: String,
}

impl TcpLineBroker {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
        }
    }
}

#[async_trait]
impl Broker for TcpLineBroker {
    async fn subscribe(
        &self,
        filters: &[String],
        callback: MessageCallback,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> BrokerResult<()> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        info!("Broker adapter listening on {}", self.bind_addr);

        let callback: Arc<MessageCallback> = Arc::new(callback);
        let filters: Arc<Vec<String>> = Arc::new(filters.to_vec());
        let (conn_shutdown_tx, _) = broadcast::channel::<()>(1);

        loop {
            select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!("Feeder connected: {}", peer);
                            let callback = Arc::clone(&callback);
                            let filters = Arc::clone(&filters);
                            let mut conn_shutdown = conn_shutdown_tx.subscribe();

                            tokio::spawn(async move {
                                let mut lines = BufReader::new(stream).lines();
                                loop {
                                    select! {
                                        line = lines.next_line() => {
                                            match line {
                                                Ok(Some(line)) => {
                                                    if line.trim().is_empty() {
                                                        continue;
                                                    }
                                                    handle_frame(&line, &filters, &callback);
                                                }
                                                Ok(None) => {
                                                    debug!("Feeder disconnected: {}", peer);
                                                    break;
                                                }
                                                Err(e) => {
                                                    warn!("Read error from {}: {}", peer, e);
                                                    break;
                                                }
                                            }
                                        }
                                        _ = conn_shutdown.recv() => break,
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            warn!("Accept failed: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown requested, closing broker adapter");
                    let _ = conn_shutdown_tx.send(());
                    return Ok(());
                }
            }
        }
    }
}

fn handle_frame(line: &str, filters: &[String], callback: &MessageCallback) {
    let frame: Frame = match serde_json::from_str(line) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Unparseable frame dropped: {}", e);
            return;
        }
    };

    if !filters.iter().any(|f| topic_matches(f, &frame.topic)) {
        debug!(topic = %frame.topic, "Dropping frame outside subscription");
        return;
    }

    match serde_json::to_vec(&frame.payload) {
        Ok(payload) => callback(InboundMessage {
            topic: frame.topic,
            payload,
        }),
        Err(e) => warn!("Frame payload re-serialization failed: {}", e),
    }
}
