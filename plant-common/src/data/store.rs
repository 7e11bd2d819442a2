use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::types::{
    DataResult, EventRecord, Machine, OrderStatus, Product, ProductionOrder, TelemetrySample,
};

// =================================================================
// Store seam
// =================================================================

/// Order-count mirror applied together with a telemetry sample.
///
/// Counts are overwritten with the sample's cumulative values, never
/// incremented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountMirror {
    pub order_id: i32,
    pub total: i32,
    pub good: i32,
}

/// Input for creating a production order. The store issues the id and the
/// sequential number atomically.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub product_id: i32,
    pub machine_id: i32,
    pub planned_qty: i32,
    pub deadline: DateTime<Utc>,
}

/// The persistence collaborator for samples, events and orders.
///
/// The core treats this as a transactional repository: `record_telemetry`
/// applies the sample insert and the optional order-count mirror as one
/// atomic unit, and the `begin_production`/`finish_production` transitions
/// are compare-and-swap operations on the order status so concurrent
/// triggers cannot double-apply a transition.
#[async_trait]
pub trait PlantStore: Send + Sync {
    // --- catalog reads ---

    async fn machine(&self, id: i32) -> DataResult<Option<Machine>>;

    async fn active_machines(&self) -> DataResult<Vec<Machine>>;

    async fn product(&self, id: i32) -> DataResult<Option<Product>>;

    // --- telemetry ---

    /// Persist one sample and, when `mirror` is given, overwrite the
    /// referenced order's total/good counts in the same transaction.
    ///
    /// Returns `false` when the sample was an exact redelivery (same
    /// machine, timestamp and order reference) and was ignored.
    async fn record_telemetry(
        &self,
        sample: &TelemetrySample,
        mirror: Option<&CountMirror>,
    ) -> DataResult<bool>;

    /// Samples for an order with `timestamp >= since`, ascending.
    async fn samples_for_order_since(
        &self,
        order_id: i32,
        since: DateTime<Utc>,
    ) -> DataResult<Vec<TelemetrySample>>;

    /// Samples for a machine with timestamp in `[start, end]`, ascending.
    async fn samples_for_machine(
        &self,
        machine_id: i32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DataResult<Vec<TelemetrySample>>;

    // --- events ---

    async fn record_event(&self, event: &EventRecord) -> DataResult<()>;

    // --- orders ---

    /// Create a Planned order. The id comes from the store's sequence and
    /// the human-readable number is derived from it in the same transaction.
    async fn create_order(&self, new: NewOrder) -> DataResult<ProductionOrder>;

    async fn order(&self, id: i32) -> DataResult<Option<ProductionOrder>>;

    /// Planned and InProduction orders for a machine, FIFO by creation
    /// timestamp (ties broken by id).
    async fn open_orders(&self, machine_id: i32) -> DataResult<Vec<ProductionOrder>>;

    /// Oldest Planned order for a machine, if any.
    async fn next_planned(&self, machine_id: i32) -> DataResult<Option<ProductionOrder>>;

    /// The machine's InProduction order, if any.
    async fn in_production(&self, machine_id: i32) -> DataResult<Option<ProductionOrder>>;

    /// Planned -> InProduction, stamping `started_at`. Returns `false` when
    /// the order was not Planned (the swap did not apply).
    async fn begin_production(&self, order_id: i32, at: DateTime<Utc>) -> DataResult<bool>;

    /// InProduction -> Completed, stamping `finished_at`. Returns `false`
    /// when the order was not InProduction.
    async fn finish_production(&self, order_id: i32, at: DateTime<Utc>) -> DataResult<bool>;

    /// Direct status write with no transition validation. Used by the
    /// generic set-status path for targets outside the managed transitions.
    async fn write_status(&self, order_id: i32, status: OrderStatus) -> DataResult<()>;

    /// Persist a new remaining-time estimate and risk flag.
    async fn update_prediction(
        &self,
        order_id: i32,
        predicted_completion: DateTime<Utc>,
        at_risk: bool,
    ) -> DataResult<()>;
}
