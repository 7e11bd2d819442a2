//! In-process broker implementation.
//!
//! Delivers published messages directly to the subscriber with no network
//! hop. Used by tests and in-process composition; the TCP adapter covers
//! out-of-process feeders.

use async_trait::async_trait;
use serde::Serialize;
use tokio::select;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::debug;

use super::errors::{BrokerError, BrokerResult};
use super::traits::{topic_matches, Broker, InboundMessage, MessageCallback};

/// Publishing handle for a [`ChannelBroker`]. Cloneable.
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<InboundMessage>,
}

impl ChannelPublisher {
    /// Publish raw payload bytes to a topic.
    pub fn publish(&self, topic: impl Into<String>, payload: Vec<u8>) -> BrokerResult<()> {
        self.tx
            .send(InboundMessage {
                topic: topic.into(),
                payload,
            })
            .map_err(|_| BrokerError::Closed)
    }

    /// Publish a JSON-serializable payload to a topic.
    pub fn publish_json<T: Serialize>(
        &self,
        topic: impl Into<String>,
        payload: &T,
    ) -> BrokerResult<()> {
        let bytes = serde_json::to_vec(payload)
            .map_err(|e| BrokerError::Subscription(format!("Payload serialization: {}", e)))?;
        self.publish(topic, bytes)
    }
}

/// In-process pub/sub broker backed by an unbounded channel.
///
/// A single subscriber drains the channel; messages whose topic does not
/// match any subscription filter are dropped.
pub struct ChannelBroker {
    rx: Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>,
}

impl ChannelBroker {
    /// Create a broker and its publishing handle.
    pub fn new() -> (Self, ChannelPublisher) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                rx: Mutex::new(Some(rx)),
            },
            ChannelPublisher { tx },
        )
    }
}

#[async_trait]
impl Broker for ChannelBroker {
    async fn subscribe(
        &self,
        filters: &[String],
        callback: MessageCallback,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> BrokerResult<()> {
        let mut rx = self
            .rx
            .lock()
            .await
            .take()
            .ok_or_else(|| BrokerError::Subscription("Already subscribed".to_string()))?;

        loop {
            select! {
                msg = rx.recv() => {
                    match msg {
                        Some(msg) => {
                            if filters.iter().any(|f| topic_matches(f, &msg.topic)) {
                                callback(msg);
                            } else {
                                debug!(topic = %msg.topic, "Dropping message outside subscription");
                            }
                        }
                        None => {
                            debug!("All publishers dropped, ending subscription");
                            return Ok(());
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("Shutdown requested, ending subscription");
                    return Ok(());
                }
            }
        }
    }
}
