//! Production-order lifecycle management.
//!
//! The `OrderLifecycleManager` owns the per-machine FIFO queue and the order
//! state machine: orders are created Planned, started in creation order, and
//! completion cascades into starting the next queued order on the same
//! machine. `start_next`/`complete` are serialized per machine by an async
//! mutex, and every transition is a compare-and-swap at the store, so
//! concurrent triggers (telemetry reaching the target count vs. a manual
//! status update) cannot double-apply.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use plant_common::data::store::{NewOrder, PlantStore};
use plant_common::data::types::{
    DataError, EventRecord, EventType, OrderStatus, ProductionOrder,
};

/// Result type for lifecycle operations.
pub type OrderResult<T> = Result<T, OrderError>;

/// Errors that can occur in the lifecycle manager.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum OrderError {
    #[error("Order not found: {0}")]
    OrderNotFound(i32),

    #[error("Machine not found: {0}")]
    MachineNotFound(i32),

    #[error("Product not found: {0}")]
    ProductNotFound(i32),

    #[error("Invalid planned quantity: {0}")]
    InvalidQuantity(i32),

    #[error("Data error: {0}")]
    Data(#[from] DataError),
}

/// Outcome of a lifecycle transition.
///
/// State errors are cooperative no-ops rather than failures; `NoOp` tells
/// the caller nothing needed doing, while a missing target surfaces as
/// [`OrderError`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// An order was moved into production.
    Started(ProductionOrder),
    /// The order was completed; `next` is the queued order the cascade
    /// started, if there was one.
    Completed {
        order_id: i32,
        next: Option<ProductionOrder>,
    },
    /// A raw status write was applied (no transition validation).
    Updated,
    /// The requested transition was not applicable in the current state.
    NoOp,
}

/// Request for creating a production order.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub product_id: i32,
    pub machine_id: i32,
    pub planned_qty: i32,
    pub deadline: DateTime<Utc>,
}

/// Owns the order state machine and the per-machine dispatch queue.
pub struct OrderLifecycleManager {
    store: Arc<dyn PlantStore>,
    /// One lock per machine; guards the start/complete pair.
    machine_locks: Mutex<HashMap<i32, Arc<Mutex<()>>>>,
}

impl OrderLifecycleManager {
    pub fn new(store: Arc<dyn PlantStore>) -> Self {
        Self {
            store,
            machine_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Create a new Planned order.
    ///
    /// The store issues the id and the sequential human-readable number.
    /// If the new order is the only Planned-or-InProduction order for its
    /// machine, it is started immediately (auto-start-when-idle).
    pub async fn create(&self, req: CreateOrder) -> OrderResult<ProductionOrder> {
        if req.planned_qty <= 0 {
            return Err(OrderError::InvalidQuantity(req.planned_qty));
        }
        if self.store.product(req.product_id).await?.is_none() {
            return Err(OrderError::ProductNotFound(req.product_id));
        }
        if self.store.machine(req.machine_id).await?.is_none() {
            return Err(OrderError::MachineNotFound(req.machine_id));
        }

        let order = self
            .store
            .create_order(NewOrder {
                product_id: req.product_id,
                machine_id: req.machine_id,
                planned_qty: req.planned_qty,
                deadline: req.deadline,
            })
            .await?;

        info!(
            order_id = order.id,
            number = %order.number,
            machine_id = order.machine_id,
            "Created production order"
        );

        // Auto-start when the machine is otherwise idle.
        let open = self.store.open_orders(req.machine_id).await?;
        if open.len() == 1 && open[0].id == order.id {
            self.start_next(req.machine_id).await?;
            return self
                .store
                .order(order.id)
                .await?
                .ok_or(OrderError::OrderNotFound(order.id));
        }

        Ok(order)
    }

    /// Start the oldest Planned order for a machine, if the machine has no
    /// order in production. Never preempts.
    pub async fn start_next(&self, machine_id: i32) -> OrderResult<TransitionOutcome> {
        let lock = self.machine_lock(machine_id).await;
        let _guard = lock.lock().await;
        self.advance_locked(machine_id).await
    }

    /// Complete an order that is currently in production, then cascade into
    /// starting the machine's next queued order.
    ///
    /// Completing an order in any other state is a `NoOp`.
    pub async fn complete(&self, order_id: i32) -> OrderResult<TransitionOutcome> {
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or(OrderError::OrderNotFound(order_id))?;

        let lock = self.machine_lock(order.machine_id).await;
        let _guard = lock.lock().await;

        let now = Utc::now();
        if !self.store.finish_production(order_id, now).await? {
            debug!(order_id, status = %order.status, "Complete skipped: not in production");
            return Ok(TransitionOutcome::NoOp);
        }

        self.store
            .record_event(&EventRecord {
                machine_id: order.machine_id,
                order_id: Some(order_id),
                event_type: EventType::OrderEnd,
                reason: None,
                ts_start: now,
                ts_end: None,
                attributes: None,
            })
            .await?;

        info!(order_id, machine_id = order.machine_id, "Completed production order");

        let next = match self.advance_locked(order.machine_id).await? {
            TransitionOutcome::Started(next) => Some(next),
            _ => None,
        };

        Ok(TransitionOutcome::Completed { order_id, next })
    }

    /// Generic external status mutation.
    ///
    /// A Planned order asked to go InProduction is redirected to
    /// `start_next` — the FIFO head wins, not the named order. An
    /// InProduction order asked to go Completed goes through `complete`.
    /// Every other target (including Cancel) is written directly with no
    /// transition validation.
    pub async fn set_status(
        &self,
        order_id: i32,
        target: OrderStatus,
    ) -> OrderResult<TransitionOutcome> {
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or(OrderError::OrderNotFound(order_id))?;

        match (target, order.status) {
            (OrderStatus::InProduction, OrderStatus::Planned) => {
                self.start_next(order.machine_id).await
            }
            (OrderStatus::Completed, OrderStatus::InProduction) => self.complete(order_id).await,
            (target, _) => {
                self.store.write_status(order_id, target).await?;
                debug!(order_id, status = %target, "Applied raw status write");
                Ok(TransitionOutcome::Updated)
            }
        }
    }

    /// Planned and InProduction orders for a machine, FIFO.
    pub async fn queue(&self, machine_id: i32) -> OrderResult<Vec<ProductionOrder>> {
        Ok(self.store.open_orders(machine_id).await?)
    }

    // === Private ===

    async fn machine_lock(&self, machine_id: i32) -> Arc<Mutex<()>> {
        let mut locks = self.machine_locks.lock().await;
        Arc::clone(
            locks
                .entry(machine_id)
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Start-next body; caller must hold the machine lock.
    async fn advance_locked(&self, machine_id: i32) -> OrderResult<TransitionOutcome> {
        if self.store.in_production(machine_id).await?.is_some() {
            debug!(machine_id, "Start skipped: machine already has an order in production");
            return Ok(TransitionOutcome::NoOp);
        }

        let Some(mut next) = self.store.next_planned(machine_id).await? else {
            debug!(machine_id, "Start skipped: queue empty");
            return Ok(TransitionOutcome::NoOp);
        };

        let now = Utc::now();
        if !self.store.begin_production(next.id, now).await? {
            // Lost a race with a concurrent status write.
            return Ok(TransitionOutcome::NoOp);
        }
        next.status = OrderStatus::InProduction;
        next.started_at = Some(now);

        self.store
            .record_event(&EventRecord {
                machine_id,
                order_id: Some(next.id),
                event_type: EventType::OrderStart,
                reason: None,
                ts_start: now,
                ts_end: None,
                attributes: None,
            })
            .await?;

        info!(order_id = next.id, machine_id, number = %next.number, "Started production order");

        Ok(TransitionOutcome::Started(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use plant_common::data::memory::InMemoryPlantStore;
    use plant_common::data::types::{Machine, Product};

    fn test_machine(id: i32) -> Machine {
        Machine {
            id,
            code: format!("M-{:02}", id),
            description: "Filling line".to_string(),
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
            description: "Bottle 500ml".to_string(),
            ideal_cycle_secs: 15.0,
            expected_yield_pct: 98.0,
            created_at: Utc::now(),
        }
    }

    fn setup() -> (Arc<InMemoryPlantStore>, OrderLifecycleManager) {
        let store = Arc::new(InMemoryPlantStore::new());
        store.insert_machine(test_machine(1));
        store.insert_product(test_product(1));
        let manager = OrderLifecycleManager::new(Arc::clone(&store) as Arc<dyn PlantStore>);
        (store, manager)
    }

    fn create_req() -> CreateOrder {
        CreateOrder {
            product_id: 1,
            machine_id: 1,
            planned_qty: 100,
            deadline: Utc::now() + Duration::hours(8),
        }
    }

    #[tokio::test]
    async fn test_auto_start_on_idle_machine() {
        let (_store, manager) = setup();

        let order = manager.create(create_req()).await.unwrap();

        assert_eq!(order.status, OrderStatus::InProduction);
        assert!(order.started_at.is_some());
    }

    #[tokio::test]
    async fn test_second_order_stays_planned() {
        let (_store, manager) = setup();

        let first = manager.create(create_req()).await.unwrap();
        let second = manager.create(create_req()).await.unwrap();

        assert_eq!(first.status, OrderStatus::InProduction);
        assert_eq!(second.status, OrderStatus::Planned);
    }

    #[tokio::test]
    async fn test_fifo_dispatch_order() {
        let (store, manager) = setup();

        let o1 = manager.create(create_req()).await.unwrap();
        let o2 = manager.create(create_req()).await.unwrap();
        let o3 = manager.create(create_req()).await.unwrap();

        // o1 auto-started; completing it must start o2, then o3.
        manager.complete(o1.id).await.unwrap();
        assert_eq!(
            store.order(o2.id).await.unwrap().unwrap().status,
            OrderStatus::InProduction
        );
        assert_eq!(
            store.order(o3.id).await.unwrap().unwrap().status,
            OrderStatus::Planned
        );

        manager.complete(o2.id).await.unwrap();
        assert_eq!(
            store.order(o3.id).await.unwrap().unwrap().status,
            OrderStatus::InProduction
        );
    }

    #[tokio::test]
    async fn test_cascade_starts_exactly_the_oldest() {
        let (store, manager) = setup();

        let active = manager.create(create_req()).await.unwrap();
        let queued: Vec<ProductionOrder> = {
            let mut v = Vec::new();
            for _ in 0..3 {
                v.push(manager.create(create_req()).await.unwrap());
            }
            v
        };

        let outcome = manager.complete(active.id).await.unwrap();
        match outcome {
            TransitionOutcome::Completed { next: Some(next), .. } => {
                assert_eq!(next.id, queued[0].id);
            }
            other => panic!("Unexpected outcome: {:?}", other),
        }

        // The rest stayed Planned.
        for order in &queued[1..] {
            assert_eq!(
                store.order(order.id).await.unwrap().unwrap().status,
                OrderStatus::Planned
            );
        }
    }

    #[tokio::test]
    async fn test_complete_is_noop_outside_production() {
        let (_store, manager) = setup();

        let first = manager.create(create_req()).await.unwrap();
        let second = manager.create(create_req()).await.unwrap();

        // second is still Planned.
        let outcome = manager.complete(second.id).await.unwrap();
        assert_eq!(outcome, TransitionOutcome::NoOp);

        // Completing twice: second call is a no-op.
        manager.complete(first.id).await.unwrap();
        let outcome = manager.complete(first.id).await.unwrap();
        assert_eq!(outcome, TransitionOutcome::NoOp);
    }

    #[tokio::test]
    async fn test_complete_unknown_order_is_not_found() {
        let (_store, manager) = setup();
        let result = manager.complete(999).await;
        assert!(matches!(result, Err(OrderError::OrderNotFound(999))));
    }

    #[tokio::test]
    async fn test_start_next_does_not_preempt() {
        let (_store, manager) = setup();

        manager.create(create_req()).await.unwrap();
        manager.create(create_req()).await.unwrap();

        let outcome = manager.start_next(1).await.unwrap();
        assert_eq!(outcome, TransitionOutcome::NoOp);
    }

    #[tokio::test]
    async fn test_set_status_redirects_start_to_fifo_head() {
        let (store, manager) = setup();

        let o1 = manager.create(create_req()).await.unwrap(); // auto-starts
        let o2 = manager.create(create_req()).await.unwrap();
        let o3 = manager.create(create_req()).await.unwrap();

        // Machine busy with o1: manual start request is a no-op.
        let outcome = manager
            .set_status(o3.id, OrderStatus::InProduction)
            .await
            .unwrap();
        assert_eq!(outcome, TransitionOutcome::NoOp);

        // Cancel the active order via the raw write path; the machine is now
        // idle with o2 and o3 queued.
        manager.set_status(o1.id, OrderStatus::Cancelled).await.unwrap();

        // Asking o3 to start hands production to the FIFO head instead.
        let outcome = manager
            .set_status(o3.id, OrderStatus::InProduction)
            .await
            .unwrap();
        match outcome {
            TransitionOutcome::Started(started) => assert_eq!(started.id, o2.id),
            other => panic!("Unexpected outcome: {:?}", other),
        }
        assert_eq!(
            store.order(o3.id).await.unwrap().unwrap().status,
            OrderStatus::Planned
        );
    }

    #[tokio::test]
    async fn test_set_status_cancel_is_raw_write() {
        let (store, manager) = setup();

        manager.create(create_req()).await.unwrap();
        let queued = manager.create(create_req()).await.unwrap();

        let events_before = store.events().len();
        let outcome = manager
            .set_status(queued.id, OrderStatus::Cancelled)
            .await
            .unwrap();

        assert_eq!(outcome, TransitionOutcome::Updated);
        assert_eq!(
            store.order(queued.id).await.unwrap().unwrap().status,
            OrderStatus::Cancelled
        );
        // Raw writes emit no lifecycle events.
        assert_eq!(store.events().len(), events_before);
    }

    #[tokio::test]
    async fn test_set_status_complete_goes_through_cascade() {
        let (store, manager) = setup();

        let active = manager.create(create_req()).await.unwrap();
        let queued = manager.create(create_req()).await.unwrap();

        let outcome = manager
            .set_status(active.id, OrderStatus::Completed)
            .await
            .unwrap();

        assert!(matches!(outcome, TransitionOutcome::Completed { .. }));
        assert_eq!(
            store.order(queued.id).await.unwrap().unwrap().status,
            OrderStatus::InProduction
        );
    }

    #[tokio::test]
    async fn test_transitions_emit_lifecycle_events() {
        let (store, manager) = setup();

        let order = manager.create(create_req()).await.unwrap();
        manager.complete(order.id).await.unwrap();

        let events = store.events();
        let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(types, [EventType::OrderStart, EventType::OrderEnd]);
        assert!(events.iter().all(|e| e.order_id == Some(order.id)));
    }

    #[tokio::test]
    async fn test_create_validates_references() {
        let (_store, manager) = setup();

        let mut req = create_req();
        req.product_id = 42;
        assert!(matches!(
            manager.create(req).await,
            Err(OrderError::ProductNotFound(42))
        ));

        let mut req = create_req();
        req.machine_id = 42;
        assert!(matches!(
            manager.create(req).await,
            Err(OrderError::MachineNotFound(42))
        ));

        let mut req = create_req();
        req.planned_qty = 0;
        assert!(matches!(
            manager.create(req).await,
            Err(OrderError::InvalidQuantity(0))
        ));
    }

    #[tokio::test]
    async fn test_queue_lists_open_orders_fifo() {
        let (_store, manager) = setup();

        let o1 = manager.create(create_req()).await.unwrap();
        let o2 = manager.create(create_req()).await.unwrap();
        let o3 = manager.create(create_req()).await.unwrap();

        let queue = manager.queue(1).await.unwrap();
        let ids: Vec<i32> = queue.iter().map(|o| o.id).collect();
        assert_eq!(ids, [o1.id, o2.id, o3.id]);
        assert_eq!(queue[0].status, OrderStatus::InProduction);
    }
}
