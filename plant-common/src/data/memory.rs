use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::store::{CountMirror, NewOrder, PlantStore};
use super::types::{
    DataError, DataResult, EventRecord, Machine, OrderStatus, Product, ProductionOrder,
    TelemetrySample,
};

// =================================================================
// In-memory store implementation
// =================================================================

#[derive(Default)]
struct Inner {
    machines: HashMap<i32, Machine>,
    products: HashMap<i32, Product>,
    orders: HashMap<i32, ProductionOrder>,
    samples: Vec<TelemetrySample>,
    events: Vec<EventRecord>,
}

/// In-memory `PlantStore` implementation.
///
/// Backs unit and integration tests and in-process demos. Mirrors the
/// Postgres implementation's semantics: idempotent duplicate sample inserts,
/// CAS status transitions, store-issued order ids and numbers.
pub struct InMemoryPlantStore {
    inner: RwLock<Inner>,
    order_seq: AtomicI32,
}

impl Default for InMemoryPlantStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPlantStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            order_seq: AtomicI32::new(1),
        }
    }

    /// Seed a machine row (catalog writes are out of scope for the core, so
    /// tests and demos populate the catalog directly).
    pub fn insert_machine(&self, machine: Machine) {
        if let Ok(mut inner) = self.inner.write() {
            inner.machines.insert(machine.id, machine);
        }
    }

    /// Seed a product row.
    pub fn insert_product(&self, product: Product) {
        if let Ok(mut inner) = self.inner.write() {
            inner.products.insert(product.id, product);
        }
    }

    /// All recorded events, in insertion order. Test helper.
    pub fn events(&self) -> Vec<EventRecord> {
        self.inner.read().map(|i| i.events.clone()).unwrap_or_default()
    }

    /// All recorded samples, in insertion order. Test helper.
    pub fn samples(&self) -> Vec<TelemetrySample> {
        self.inner.read().map(|i| i.samples.clone()).unwrap_or_default()
    }

    fn read(&self) -> DataResult<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|e| DataError::Validation(format!("Lock error: {}", e)))
    }

    fn write(&self) -> DataResult<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|e| DataError::Validation(format!("Lock error: {}", e)))
    }
}

#[async_trait]
impl PlantStore for InMemoryPlantStore {
    async fn machine(&self, id: i32) -> DataResult<Option<Machine>> {
        Ok(self.read()?.machines.get(&id).cloned())
    }

    async fn active_machines(&self) -> DataResult<Vec<Machine>> {
        let inner = self.read()?;
        let mut machines: Vec<Machine> =
            inner.machines.values().filter(|m| m.active).cloned().collect();
        machines.sort_by_key(|m| m.id);
        Ok(machines)
    }

    async fn product(&self, id: i32) -> DataResult<Option<Product>> {
        Ok(self.read()?.products.get(&id).cloned())
    }

    async fn record_telemetry(
        &self,
        sample: &TelemetrySample,
        mirror: Option<&CountMirror>,
    ) -> DataResult<bool> {
        let mut inner = self.write()?;

        // At-least-once tolerance: an exact redelivery is ignored.
        let duplicate = inner.samples.iter().any(|s| {
            s.machine_id == sample.machine_id
                && s.timestamp == sample.timestamp
                && s.order_id == sample.order_id
        });
        if duplicate {
            debug!(
                machine_id = sample.machine_id,
                timestamp = %sample.timestamp,
                "Ignoring duplicate telemetry sample"
            );
            return Ok(false);
        }

        // Apply the mirror first so a missing order leaves no partial state,
        // matching the Postgres implementation's rollback.
        if let Some(mirror) = mirror {
            let order = inner
                .orders
                .get_mut(&mirror.order_id)
                .ok_or_else(|| DataError::not_found("Order", mirror.order_id))?;
            order.total_qty = mirror.total;
            order.good_qty = mirror.good;
        }

        inner.samples.push(sample.clone());
        Ok(true)
    }

    async fn samples_for_order_since(
        &self,
        order_id: i32,
        since: DateTime<Utc>,
    ) -> DataResult<Vec<TelemetrySample>> {
        let inner = self.read()?;
        let mut samples: Vec<TelemetrySample> = inner
            .samples
            .iter()
            .filter(|s| s.order_id == Some(order_id) && s.timestamp >= since)
            .cloned()
            .collect();
        samples.sort_by_key(|s| s.timestamp);
        Ok(samples)
    }

    async fn samples_for_machine(
        &self,
        machine_id: i32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DataResult<Vec<TelemetrySample>> {
        let inner = self.read()?;
        let mut samples: Vec<TelemetrySample> = inner
            .samples
            .iter()
            .filter(|s| s.machine_id == machine_id && s.timestamp >= start && s.timestamp <= end)
            .cloned()
            .collect();
        samples.sort_by_key(|s| s.timestamp);
        Ok(samples)
    }

    async fn record_event(&self, event: &EventRecord) -> DataResult<()> {
        self.write()?.events.push(event.clone());
        Ok(())
    }

    async fn create_order(&self, new: NewOrder) -> DataResult<ProductionOrder> {
        let id = self.order_seq.fetch_add(1, Ordering::SeqCst);
        let order = ProductionOrder {
            id,
            number: format!("OP-{:06}", id),
            product_id: new.product_id,
            machine_id: new.machine_id,
            planned_qty: new.planned_qty,
            good_qty: 0,
            total_qty: 0,
            deadline: new.deadline,
            status: OrderStatus::Planned,
            started_at: None,
            finished_at: None,
            predicted_completion: None,
            at_risk: false,
            created_at: Utc::now(),
        };
        self.write()?.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn order(&self, id: i32) -> DataResult<Option<ProductionOrder>> {
        Ok(self.read()?.orders.get(&id).cloned())
    }

    async fn open_orders(&self, machine_id: i32) -> DataResult<Vec<ProductionOrder>> {
        let inner = self.read()?;
        let mut orders: Vec<ProductionOrder> = inner
            .orders
            .values()
            .filter(|o| {
                o.machine_id == machine_id
                    && matches!(o.status, OrderStatus::Planned | OrderStatus::InProduction)
            })
            .cloned()
            .collect();
        orders.sort_by_key(|o| (o.created_at, o.id));
        Ok(orders)
    }

    async fn next_planned(&self, machine_id: i32) -> DataResult<Option<ProductionOrder>> {
        let inner = self.read()?;
        let mut planned: Vec<&ProductionOrder> = inner
            .orders
            .values()
            .filter(|o| o.machine_id == machine_id && o.status == OrderStatus::Planned)
            .collect();
        planned.sort_by_key(|o| (o.created_at, o.id));
        Ok(planned.first().map(|o| (*o).clone()))
    }

    async fn in_production(&self, machine_id: i32) -> DataResult<Option<ProductionOrder>> {
        let inner = self.read()?;
        Ok(inner
            .orders
            .values()
            .find(|o| o.machine_id == machine_id && o.status == OrderStatus::InProduction)
            .cloned())
    }

    async fn begin_production(&self, order_id: i32, at: DateTime<Utc>) -> DataResult<bool> {
        let mut inner = self.write()?;
        let order = inner
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| DataError::not_found("Order", order_id))?;
        if order.status != OrderStatus::Planned {
            return Ok(false);
        }
        order.status = OrderStatus::InProduction;
        order.started_at = Some(at);
        Ok(true)
    }

    async fn finish_production(&self, order_id: i32, at: DateTime<Utc>) -> DataResult<bool> {
        let mut inner = self.write()?;
        let order = inner
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| DataError::not_found("Order", order_id))?;
        if order.status != OrderStatus::InProduction {
            return Ok(false);
        }
        order.status = OrderStatus::Completed;
        order.finished_at = Some(at);
        Ok(true)
    }

    async fn write_status(&self, order_id: i32, status: OrderStatus) -> DataResult<()> {
        let mut inner = self.write()?;
        let order = inner
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| DataError::not_found("Order", order_id))?;
        order.status = status;
        Ok(())
    }

    async fn update_prediction(
        &self,
        order_id: i32,
        predicted_completion: DateTime<Utc>,
        at_risk: bool,
    ) -> DataResult<()> {
        let mut inner = self.write()?;
        let order = inner
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| DataError::not_found("Order", order_id))?;
        order.predicted_completion = Some(predicted_completion);
        order.at_risk = at_risk;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::MachineState;
    use chrono::Duration;

    fn machine(id: i32) -> Machine {
        Machine {
            id,
            code: format!("M-{:02}", id),
            description: "Press".to_string(),
            nominal_capacity_uph: 240.0,
            target_efficiency_pct: 85.0,
            active: true,
            created_at: Utc::now(),
        }
    }

    fn sample(machine_id: i32, order_id: Option<i32>, ts: DateTime<Utc>) -> TelemetrySample {
        TelemetrySample {
            machine_id,
            order_id,
            timestamp: ts,
            state: MachineState::Running,
            total_count: 10,
            good_count: 9,
            scrap_count: 1,
            speed_uph: 200.0,
        }
    }

    #[tokio::test]
    async fn test_duplicate_sample_is_ignored() {
        let store = InMemoryPlantStore::new();
        let ts = Utc::now();
        let s = sample(1, None, ts);

        assert!(store.record_telemetry(&s, None).await.unwrap());
        assert!(!store.record_telemetry(&s, None).await.unwrap());
        assert_eq!(store.samples().len(), 1);
    }

    #[tokio::test]
    async fn test_order_numbers_are_sequential() {
        let store = InMemoryPlantStore::new();
        let new = NewOrder {
            product_id: 1,
            machine_id: 1,
            planned_qty: 100,
            deadline: Utc::now() + Duration::hours(8),
        };

        let first = store.create_order(new.clone()).await.unwrap();
        let second = store.create_order(new).await.unwrap();

        assert_eq!(first.number, "OP-000001");
        assert_eq!(second.number, "OP-000002");
        assert_eq!(first.status, OrderStatus::Planned);
    }

    #[tokio::test]
    async fn test_begin_production_is_cas() {
        let store = InMemoryPlantStore::new();
        let order = store
            .create_order(NewOrder {
                product_id: 1,
                machine_id: 1,
                planned_qty: 100,
                deadline: Utc::now() + Duration::hours(8),
            })
            .await
            .unwrap();

        assert!(store.begin_production(order.id, Utc::now()).await.unwrap());
        // Second swap does not apply: no longer Planned.
        assert!(!store.begin_production(order.id, Utc::now()).await.unwrap());
        assert!(store.finish_production(order.id, Utc::now()).await.unwrap());
        assert!(!store.finish_production(order.id, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_mirror_overwrites_counts() {
        let store = InMemoryPlantStore::new();
        store.insert_machine(machine(1));
        let order = store
            .create_order(NewOrder {
                product_id: 1,
                machine_id: 1,
                planned_qty: 100,
                deadline: Utc::now() + Duration::hours(8),
            })
            .await
            .unwrap();

        let mirror = CountMirror {
            order_id: order.id,
            total: 55,
            good: 50,
        };
        store
            .record_telemetry(&sample(1, Some(order.id), Utc::now()), Some(&mirror))
            .await
            .unwrap();

        let updated = store.order(order.id).await.unwrap().unwrap();
        assert_eq!(updated.total_qty, 55);
        assert_eq!(updated.good_qty, 50);
    }

    #[tokio::test]
    async fn test_samples_sorted_by_timestamp() {
        let store = InMemoryPlantStore::new();
        let base = Utc::now();
        store
            .record_telemetry(&sample(1, None, base + Duration::minutes(2)), None)
            .await
            .unwrap();
        store
            .record_telemetry(&sample(1, None, base), None)
            .await
            .unwrap();
        store
            .record_telemetry(&sample(1, None, base + Duration::minutes(1)), None)
            .await
            .unwrap();

        let samples = store
            .samples_for_machine(1, base - Duration::minutes(1), base + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(samples.len(), 3);
        assert!(samples.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }
}
