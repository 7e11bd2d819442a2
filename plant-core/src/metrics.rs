// metrics.rs - Prometheus metrics for ingestion and analytics monitoring

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntGauge, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Ingestion metrics
    // ============================================================================

    /// Total broker messages received
    pub static ref MESSAGES_RECEIVED_TOTAL: IntCounter = IntCounter::new(
        "plant_messages_received_total",
        "Total number of broker messages received"
    ).expect("Failed to create messages_received_total metric");

    /// Messages dropped at the decode boundary (topic or payload)
    pub static ref MESSAGES_DROPPED_DECODE_TOTAL: IntCounter = IntCounter::new(
        "plant_messages_dropped_decode_total",
        "Messages dropped because the topic or payload was unparseable"
    ).expect("Failed to create messages_dropped_decode_total metric");

    /// Messages dropped by telemetry validation
    pub static ref MESSAGES_DROPPED_VALIDATION_TOTAL: IntCounter = IntCounter::new(
        "plant_messages_dropped_validation_total",
        "Messages dropped because the sample failed validation"
    ).expect("Failed to create messages_dropped_validation_total metric");

    /// Messages dropped because a referenced machine/order is unknown
    pub static ref MESSAGES_DROPPED_REFERENCE_TOTAL: IntCounter = IntCounter::new(
        "plant_messages_dropped_reference_total",
        "Messages dropped because they referenced an unknown machine or order"
    ).expect("Failed to create messages_dropped_reference_total metric");

    /// Telemetry samples persisted
    pub static ref SAMPLES_PERSISTED_TOTAL: IntCounter = IntCounter::new(
        "plant_samples_persisted_total",
        "Telemetry samples persisted to the store"
    ).expect("Failed to create samples_persisted_total metric");

    /// Duplicate deliveries ignored by the store
    pub static ref DUPLICATES_IGNORED_TOTAL: IntCounter = IntCounter::new(
        "plant_duplicates_ignored_total",
        "Redundant at-least-once deliveries ignored on insert"
    ).expect("Failed to create duplicates_ignored_total metric");

    /// Lifecycle events recorded
    pub static ref EVENTS_RECORDED_TOTAL: IntCounter = IntCounter::new(
        "plant_events_recorded_total",
        "Lifecycle events persisted to the store"
    ).expect("Failed to create events_recorded_total metric");

    /// Orders completed by the telemetry-driven cascade
    pub static ref ORDERS_AUTO_COMPLETED_TOTAL: IntCounter = IntCounter::new(
        "plant_orders_auto_completed_total",
        "Orders completed because telemetry reached the planned quantity"
    ).expect("Failed to create orders_auto_completed_total metric");

    /// Current number of messages in the processing channel buffer
    pub static ref CHANNEL_BUFFER_SIZE: IntGauge = IntGauge::new(
        "plant_channel_buffer_size",
        "Current number of messages in the processing channel buffer"
    ).expect("Failed to create channel_buffer_size metric");
}

/// Register all metrics with the global registry.
///
/// Call once at startup; repeated registration is reported as an error by
/// prometheus and can be ignored in tests.
pub fn register_metrics() {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(MESSAGES_RECEIVED_TOTAL.clone()),
        Box::new(MESSAGES_DROPPED_DECODE_TOTAL.clone()),
        Box::new(MESSAGES_DROPPED_VALIDATION_TOTAL.clone()),
        Box::new(MESSAGES_DROPPED_REFERENCE_TOTAL.clone()),
        Box::new(SAMPLES_PERSISTED_TOTAL.clone()),
        Box::new(DUPLICATES_IGNORED_TOTAL.clone()),
        Box::new(EVENTS_RECORDED_TOTAL.clone()),
        Box::new(ORDERS_AUTO_COMPLETED_TOTAL.clone()),
        Box::new(CHANNEL_BUFFER_SIZE.clone()),
    ];

    for metric in metrics {
        if let Err(e) = REGISTRY.register(metric) {
            tracing::debug!("Metric registration skipped: {}", e);
        }
    }
}

/// Render all registered metrics in the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
