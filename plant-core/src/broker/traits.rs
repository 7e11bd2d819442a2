use async_trait::async_trait;
use tokio::sync::broadcast;

use super::errors::BrokerResult;

/// One message delivered by the pub/sub collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Full topic path, e.g. `factory/sp-01/machine/3/telemetry`.
    pub topic: String,
    /// Raw payload bytes (JSON on the wire).
    pub payload: Vec<u8>,
}

/// Callback invoked for every delivered message.
pub type MessageCallback = Box<dyn Fn(InboundMessage) + Send + Sync>;

/// The pub/sub client seam.
///
/// Implementations deliver topic+payload pairs at least once and own their
/// reconnect behavior; this core only requires an explicit subscribe call
/// with a shutdown signal. Delivery order is only meaningful per source
/// (machine); nothing here re-sequences messages.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Subscribe to the given topic filters and deliver every matching
    /// message through `callback` until `shutdown_rx` fires or the
    /// underlying transport ends.
    ///
    /// Filters use `+` as a single-segment wildcard, e.g.
    /// `factory/+/machine/+/telemetry`.
    async fn subscribe(
        &self,
        filters: &[String],
        callback: MessageCallback,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> BrokerResult<()>;
}

/// Check a topic against a subscription filter (`+` matches one segment).
pub(crate) fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (None, None) => return true,
            (Some(f), Some(t)) => {
                if f != "+" && f != t {
                    return false;
                }
            }
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matches_wildcards() {
        assert!(topic_matches(
            "factory/+/machine/+/telemetry",
            "factory/sp-01/machine/3/telemetry"
        ));
        assert!(!topic_matches(
            "factory/+/machine/+/telemetry",
            "factory/sp-01/machine/3/event"
        ));
        assert!(!topic_matches(
            "factory/+/machine/+/telemetry",
            "factory/sp-01/machine/telemetry"
        ));
        assert!(topic_matches("a/b", "a/b"));
        assert!(!topic_matches("a/b", "a/b/c"));
    }
}
