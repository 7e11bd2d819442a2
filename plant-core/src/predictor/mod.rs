//! Remaining-time estimation for in-production orders.
//!
//! Recomputed after each telemetry update for the order. The estimate is the
//! effective production rate over the recent lookback window projected onto
//! the remaining quantity; with fewer than two samples the previous estimate
//! is retained (stale rather than wrong).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use plant_common::data::store::PlantStore;
use plant_common::data::types::OrderStatus;

use crate::orders::{OrderError, OrderLifecycleManager, OrderResult};

/// Outcome of an ETA recomputation.
#[derive(Debug, Clone, PartialEq)]
pub enum EtaOutcome {
    /// A new estimate was persisted.
    Updated {
        predicted_completion: DateTime<Utc>,
        at_risk: bool,
    },
    /// The remaining quantity was already zero; the order was completed
    /// instead of estimated.
    CompletedInstead,
    /// Not enough recent telemetry to derive a rate; previous estimate
    /// retained.
    Unchanged,
    /// The order is not in production.
    NoOp,
}

/// Derives predicted-completion timestamps and deadline-risk flags.
pub struct EtaPredictor {
    store: Arc<dyn PlantStore>,
    orders: Arc<OrderLifecycleManager>,
}

impl EtaPredictor {
    pub fn new(store: Arc<dyn PlantStore>, orders: Arc<OrderLifecycleManager>) -> Self {
        Self { store, orders }
    }

    /// Recompute the estimate for one order.
    pub async fn recompute(&self, order_id: i32) -> OrderResult<EtaOutcome> {
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or(OrderError::OrderNotFound(order_id))?;

        if order.status != OrderStatus::InProduction {
            return Ok(EtaOutcome::NoOp);
        }

        let remaining = order.planned_qty - order.good_qty;
        if remaining <= 0 {
            self.orders.complete(order_id).await?;
            return Ok(EtaOutcome::CompletedInstead);
        }

        let now = Utc::now();
        let anchor = order.started_at.unwrap_or(now - Duration::hours(1));

        let samples = self.store.samples_for_order_since(order_id, anchor).await?;
        if samples.len() < 2 {
            debug!(order_id, "ETA unchanged: fewer than two samples in window");
            return Ok(EtaOutcome::Unchanged);
        }

        // First and last sample bracket the effective rate.
        let first = &samples[0];
        let last = &samples[samples.len() - 1];

        let elapsed_ms = (last.timestamp - first.timestamp).num_milliseconds();
        let elapsed_hours = elapsed_ms as f64 / 3_600_000.0;
        let produced_good = last.good_count - first.good_count;

        if elapsed_hours <= 0.0 || produced_good <= 0 {
            debug!(
                order_id,
                elapsed_hours, produced_good, "ETA unchanged: no usable rate"
            );
            return Ok(EtaOutcome::Unchanged);
        }

        let rate_uph = f64::from(produced_good) / elapsed_hours;
        let hours_remaining = f64::from(remaining) / rate_uph;
        let predicted_completion =
            now + Duration::milliseconds((hours_remaining * 3_600_000.0) as i64);
        let at_risk = predicted_completion > order.deadline;

        self.store
            .update_prediction(order_id, predicted_completion, at_risk)
            .await?;

        info!(
            order_id,
            rate_uph,
            predicted_completion = %predicted_completion,
            at_risk,
            "Updated completion estimate"
        );

        Ok(EtaOutcome::Updated {
            predicted_completion,
            at_risk,
        })
    }
}
