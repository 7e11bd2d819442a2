// service_tests.rs - Tests for the ingest pipeline

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use plant_common::data::memory::InMemoryPlantStore;
use plant_common::data::store::PlantStore;
use plant_common::data::types::{
    EventType, Machine, OrderStatus, Product,
};
use plant_common::data::validator::{TelemetryValidator, ValidationConfig};

use crate::broker::InboundMessage;
use crate::orders::{CreateOrder, OrderLifecycleManager};
use crate::predictor::EtaPredictor;

use super::service::Pipeline;

// ============================================================================
// Test helpers
// ============================================================================

fn test_machine(id: i32) -> Machine {
    Machine {
        id,
        code: format!("M-{:02}", id),
        description: "Labeller".to_string(),
        nominal_capacity_uph: 240.0,
        target_efficiency_pct: 85.0,
        active: true,
        created_at: Utc::now(),
    }
}

fn test_product(id: i32) -> Product {
    Product {
        id,
        code: format!("P-{:02}", id),
        description: "Jar 250ml".to_string(),
        ideal_cycle_secs: 15.0,
        expected_yield_pct: 98.0,
        created_at: Utc::now(),
    }
}

struct Harness {
    store: Arc<InMemoryPlantStore>,
    orders: Arc<OrderLifecycleManager>,
    pipeline: Pipeline,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryPlantStore::new());
    store.insert_machine(test_machine(1));
    store.insert_product(test_product(1));

    let orders = Arc::new(OrderLifecycleManager::new(
        Arc::clone(&store) as Arc<dyn PlantStore>
    ));
    let predictor = Arc::new(EtaPredictor::new(
        Arc::clone(&store) as Arc<dyn PlantStore>,
        Arc::clone(&orders),
    ));
    let validator = Arc::new(TelemetryValidator::new(ValidationConfig::default()));

    let pipeline = Pipeline::new(
        Arc::clone(&store) as Arc<dyn PlantStore>,
        Arc::clone(&orders),
        predictor,
        validator,
    );

    Harness {
        store,
        orders,
        pipeline,
    }
}

fn telemetry_msg(
    machine_id: i32,
    ts: DateTime<Utc>,
    good: i32,
    total: i32,
    order_id: Option<i32>,
) -> InboundMessage {
    let mut payload = json!({
        "timestamp": ts.to_rfc3339(),
        "state": "RUNNING",
        "totalCount": total,
        "goodCount": good,
        "scrapCount": total - good,
        "speed": 220.0,
    });
    if let Some(order_id) = order_id {
        payload["orderId"] = json!(order_id);
    }
    InboundMessage {
        topic: format!("factory/sp-01/machine/{}/telemetry", machine_id),
        payload: serde_json::to_vec(&payload).unwrap(),
    }
}

async fn create_order(h: &Harness, planned_qty: i32) -> i32 {
    h.orders
        .create(CreateOrder {
            product_id: 1,
            machine_id: 1,
            planned_qty,
            deadline: Utc::now() + Duration::hours(8),
        })
        .await
        .unwrap()
        .id
}

// ============================================================================
// Telemetry path
// ============================================================================

#[tokio::test]
async fn test_telemetry_persists_sample_and_mirrors_counts() {
    let h = harness();
    let order_id = create_order(&h, 100).await;

    h.pipeline
        .handle_message(telemetry_msg(1, Utc::now(), 40, 44, Some(order_id)))
        .await;

    let samples = h.store.samples();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].good_count, 40);

    let order = h.store.order(order_id).await.unwrap().unwrap();
    assert_eq!(order.good_qty, 40);
    assert_eq!(order.total_qty, 44);

    let stats = h.pipeline.stats().await;
    assert_eq!(stats.samples_persisted, 1);
    assert_eq!(stats.eta_recomputed, 1);
}

#[tokio::test]
async fn test_counts_are_overwritten_not_incremented() {
    let h = harness();
    let order_id = create_order(&h, 100).await;
    let base = Utc::now();

    h.pipeline
        .handle_message(telemetry_msg(1, base, 40, 44, Some(order_id)))
        .await;
    h.pipeline
        .handle_message(telemetry_msg(1, base + Duration::minutes(1), 41, 45, Some(order_id)))
        .await;

    let order = h.store.order(order_id).await.unwrap().unwrap();
    assert_eq!(order.good_qty, 41); // not 81
    assert_eq!(order.total_qty, 45);
}

#[tokio::test]
async fn test_reaching_planned_quantity_completes_and_cascades() {
    let h = harness();
    let first = create_order(&h, 50).await; // auto-starts
    let second = create_order(&h, 60).await;

    h.pipeline
        .handle_message(telemetry_msg(1, Utc::now(), 50, 52, Some(first)))
        .await;

    let completed = h.store.order(first).await.unwrap().unwrap();
    assert_eq!(completed.status, OrderStatus::Completed);

    let started = h.store.order(second).await.unwrap().unwrap();
    assert_eq!(started.status, OrderStatus::InProduction);

    let stats = h.pipeline.stats().await;
    assert_eq!(stats.orders_completed, 1);
}

#[tokio::test]
async fn test_malformed_payload_is_dropped() {
    let h = harness();

    h.pipeline
        .handle_message(InboundMessage {
            topic: "factory/sp-01/machine/1/telemetry".to_string(),
            payload: b"not json at all".to_vec(),
        })
        .await;

    assert!(h.store.samples().is_empty());
    let stats = h.pipeline.stats().await;
    assert_eq!(stats.decode_failures, 1);
    assert_eq!(stats.samples_persisted, 0);
}

#[tokio::test]
async fn test_malformed_topic_is_dropped() {
    let h = harness();

    h.pipeline
        .handle_message(InboundMessage {
            topic: "factory/sp-01/machine/banana/telemetry".to_string(),
            payload: b"{}".to_vec(),
        })
        .await;

    let stats = h.pipeline.stats().await;
    assert_eq!(stats.decode_failures, 1);
}

#[tokio::test]
async fn test_unknown_order_reference_skips_mirror_but_keeps_sample() {
    let h = harness();

    h.pipeline
        .handle_message(telemetry_msg(1, Utc::now(), 10, 10, Some(999)))
        .await;

    // Sample persisted without the mirror/trigger step.
    assert_eq!(h.store.samples().len(), 1);
    let stats = h.pipeline.stats().await;
    assert_eq!(stats.samples_persisted, 1);
    assert_eq!(stats.orders_completed, 0);
    assert_eq!(stats.eta_recomputed, 0);
}

#[tokio::test]
async fn test_unknown_machine_still_persists_raw_sample() {
    // The in-memory store has no referential constraints, so the raw sample
    // survives, mirroring the "persist if feasible" contract.
    let h = harness();

    h.pipeline
        .handle_message(telemetry_msg(77, Utc::now(), 5, 5, None))
        .await;

    assert_eq!(h.store.samples().len(), 1);
    assert_eq!(h.store.samples()[0].machine_id, 77);
}

#[tokio::test]
async fn test_duplicate_delivery_is_ignored() {
    let h = harness();
    let order_id = create_order(&h, 100).await;
    let ts = Utc::now();

    h.pipeline
        .handle_message(telemetry_msg(1, ts, 40, 44, Some(order_id)))
        .await;
    h.pipeline
        .handle_message(telemetry_msg(1, ts, 40, 44, Some(order_id)))
        .await;

    assert_eq!(h.store.samples().len(), 1);
    let stats = h.pipeline.stats().await;
    assert_eq!(stats.duplicates_ignored, 1);
}

#[tokio::test]
async fn test_count_regression_is_dropped() {
    let h = harness();
    let order_id = create_order(&h, 100).await;
    let base = Utc::now();

    h.pipeline
        .handle_message(telemetry_msg(1, base, 40, 44, Some(order_id)))
        .await;
    // Counters go backwards: dropped by validation.
    h.pipeline
        .handle_message(telemetry_msg(1, base + Duration::minutes(1), 30, 33, Some(order_id)))
        .await;

    assert_eq!(h.store.samples().len(), 1);
    let stats = h.pipeline.stats().await;
    assert_eq!(stats.validation_failures, 1);

    // The mirror still reflects the last accepted sample.
    let order = h.store.order(order_id).await.unwrap().unwrap();
    assert_eq!(order.good_qty, 40);
}

// ============================================================================
// Event path
// ============================================================================

#[tokio::test]
async fn test_event_is_recorded_with_attributes() {
    let h = harness();

    let payload = json!({
        "tsStart": Utc::now().to_rfc3339(),
        "type": "STOP_START",
        "reason": "blade change",
        "attributes": {"operator": "aa", "planned": false}
    });

    h.pipeline
        .handle_message(InboundMessage {
            topic: "factory/sp-01/machine/1/event".to_string(),
            payload: serde_json::to_vec(&payload).unwrap(),
        })
        .await;

    let events = h.store.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::StopStart);
    assert_eq!(events[0].reason.as_deref(), Some("blade change"));
    assert!(events[0].attributes.is_some());

    let stats = h.pipeline.stats().await;
    assert_eq!(stats.events_recorded, 1);
}

#[tokio::test]
async fn test_event_with_bad_type_is_dropped() {
    let h = harness();

    let payload = json!({
        "tsStart": Utc::now().to_rfc3339(),
        "type": "COFFEE_BREAK"
    });

    h.pipeline
        .handle_message(InboundMessage {
            topic: "factory/sp-01/machine/1/event".to_string(),
            payload: serde_json::to_vec(&payload).unwrap(),
        })
        .await;

    assert!(h.store.events().is_empty());
    let stats = h.pipeline.stats().await;
    assert_eq!(stats.decode_failures, 1);
}
