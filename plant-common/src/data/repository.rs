use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, warn};

use super::store::{CountMirror, NewOrder, PlantStore};
use super::types::{
    DataError, DataResult, EventRecord, Machine, MachineState, OrderStatus, Product,
    ProductionOrder, TelemetrySample,
};

// =================================================================
// Postgres store implementation
// =================================================================

const ORDER_COLUMNS: &str = "id, number, product_id, machine_id, planned_qty, good_qty, \
     total_qty, deadline, status, started_at, finished_at, predicted_completion, at_risk, \
     created_at";

const SAMPLE_COLUMNS: &str =
    "machine_id, order_id, timestamp, state, total_count, good_count, scrap_count, speed_uph";

/// Postgres-backed `PlantStore`.
///
/// Ingestion units (sample insert + order-count mirror) run in a single
/// transaction; status transitions are compare-and-swap updates keyed on the
/// current status. The connection pool is injected by the caller.
pub struct PgPlantStore {
    pool: PgPool,
}

impl PgPlantStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }

    fn map_machine(row: &PgRow) -> DataResult<Machine> {
        Ok(Machine {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            description: row.try_get("description")?,
            nominal_capacity_uph: row.try_get("nominal_capacity_uph")?,
            target_efficiency_pct: row.try_get("target_efficiency_pct")?,
            active: row.try_get("active")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn map_product(row: &PgRow) -> DataResult<Product> {
        Ok(Product {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            description: row.try_get("description")?,
            ideal_cycle_secs: row.try_get("ideal_cycle_secs")?,
            expected_yield_pct: row.try_get("expected_yield_pct")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn map_order(row: &PgRow) -> DataResult<ProductionOrder> {
        let status: String = row.try_get("status")?;
        Ok(ProductionOrder {
            id: row.try_get("id")?,
            number: row.try_get("number")?,
            product_id: row.try_get("product_id")?,
            machine_id: row.try_get("machine_id")?,
            planned_qty: row.try_get("planned_qty")?,
            good_qty: row.try_get("good_qty")?,
            total_qty: row.try_get("total_qty")?,
            deadline: row.try_get("deadline")?,
            status: OrderStatus::from_db_str(&status)?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            predicted_completion: row.try_get("predicted_completion")?,
            at_risk: row.try_get("at_risk")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn map_sample(row: &PgRow) -> DataResult<TelemetrySample> {
        let state: String = row.try_get("state")?;
        Ok(TelemetrySample {
            machine_id: row.try_get("machine_id")?,
            order_id: row.try_get("order_id")?,
            timestamp: row.try_get("timestamp")?,
            state: MachineState::from_db_str(&state)?,
            total_count: row.try_get("total_count")?,
            good_count: row.try_get("good_count")?,
            scrap_count: row.try_get("scrap_count")?,
            speed_uph: row.try_get("speed_uph")?,
        })
    }

    async fn order_exists(&self, order_id: i32) -> DataResult<bool> {
        let row = sqlx::query("SELECT 1 FROM production_orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl PlantStore for PgPlantStore {
    async fn machine(&self, id: i32) -> DataResult<Option<Machine>> {
        let row = sqlx::query(
            "SELECT id, code, description, nominal_capacity_uph, target_efficiency_pct, \
             active, created_at FROM machines WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::map_machine(&r)).transpose()
    }

    async fn active_machines(&self) -> DataResult<Vec<Machine>> {
        let rows = sqlx::query(
            "SELECT id, code, description, nominal_capacity_uph, target_efficiency_pct, \
             active, created_at FROM machines WHERE active ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_machine).collect()
    }

    async fn product(&self, id: i32) -> DataResult<Option<Product>> {
        let row = sqlx::query(
            "SELECT id, code, description, ideal_cycle_secs, expected_yield_pct, created_at \
             FROM products WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::map_product(&r)).transpose()
    }

    async fn record_telemetry(
        &self,
        sample: &TelemetrySample,
        mirror: Option<&CountMirror>,
    ) -> DataResult<bool> {
        let mut tx = self.pool.begin().await?;

        // Redeliveries of the same sample violate the uniqueness constraint
        // on (machine_id, timestamp, order_id) and are ignored.
        let result = sqlx::query(
            "INSERT INTO telemetry_samples \
             (machine_id, order_id, timestamp, state, total_count, good_count, scrap_count, \
              speed_uph) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT DO NOTHING",
        )
        .bind(sample.machine_id)
        .bind(sample.order_id)
        .bind(sample.timestamp)
        .bind(sample.state.as_db_str())
        .bind(sample.total_count)
        .bind(sample.good_count)
        .bind(sample.scrap_count)
        .bind(sample.speed_uph)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to insert telemetry sample: {}", e);
            DataError::Database(e)
        })?;

        let inserted = result.rows_affected() > 0;
        if !inserted {
            debug!(
                machine_id = sample.machine_id,
                timestamp = %sample.timestamp,
                "Ignoring duplicate telemetry sample"
            );
            tx.commit().await?;
            return Ok(false);
        }

        if let Some(mirror) = mirror {
            let updated = sqlx::query(
                "UPDATE production_orders SET total_qty = $2, good_qty = $3 WHERE id = $1",
            )
            .bind(mirror.order_id)
            .bind(mirror.total)
            .bind(mirror.good)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                warn!(order_id = mirror.order_id, "Count mirror targets unknown order");
                tx.rollback().await?;
                return Err(DataError::not_found("Order", mirror.order_id));
            }
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn samples_for_order_since(
        &self,
        order_id: i32,
        since: DateTime<Utc>,
    ) -> DataResult<Vec<TelemetrySample>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM telemetry_samples \
             WHERE order_id = $1 AND timestamp >= $2 ORDER BY timestamp ASC",
            SAMPLE_COLUMNS
        ))
        .bind(order_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_sample).collect()
    }

    async fn samples_for_machine(
        &self,
        machine_id: i32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DataResult<Vec<TelemetrySample>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM telemetry_samples \
             WHERE machine_id = $1 AND timestamp >= $2 AND timestamp <= $3 \
             ORDER BY timestamp ASC",
            SAMPLE_COLUMNS
        ))
        .bind(machine_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_sample).collect()
    }

    async fn record_event(&self, event: &EventRecord) -> DataResult<()> {
        let attributes = event
            .attributes
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            "INSERT INTO events \
             (machine_id, order_id, event_type, reason, ts_start, ts_end, attributes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(event.machine_id)
        .bind(event.order_id)
        .bind(event.event_type.as_db_str())
        .bind(&event.reason)
        .bind(event.ts_start)
        .bind(event.ts_end)
        .bind(attributes)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to insert event: {}", e);
            DataError::Database(e)
        })?;

        Ok(())
    }

    async fn create_order(&self, new: NewOrder) -> DataResult<ProductionOrder> {
        let created_at = Utc::now();
        let mut tx = self.pool.begin().await?;

        // The store's identity column is the single authoritative sequence;
        // the human-readable number is derived from it before commit.
        let id: i32 = sqlx::query_scalar(
            "INSERT INTO production_orders \
             (number, product_id, machine_id, planned_qty, good_qty, total_qty, deadline, \
              status, at_risk, created_at) \
             VALUES ('', $1, $2, $3, 0, 0, $4, $5, FALSE, $6) \
             RETURNING id",
        )
        .bind(new.product_id)
        .bind(new.machine_id)
        .bind(new.planned_qty)
        .bind(new.deadline)
        .bind(OrderStatus::Planned.as_db_str())
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await?;

        let number = format!("OP-{:06}", id);
        sqlx::query("UPDATE production_orders SET number = $2 WHERE id = $1")
            .bind(id)
            .bind(&number)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(order_id = id, number = %number, "Created production order");

        Ok(ProductionOrder {
            id,
            number,
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
            created_at,
        })
    }

    async fn order(&self, id: i32) -> DataResult<Option<ProductionOrder>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM production_orders WHERE id = $1",
            ORDER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::map_order(&r)).transpose()
    }

    async fn open_orders(&self, machine_id: i32) -> DataResult<Vec<ProductionOrder>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM production_orders \
             WHERE machine_id = $1 AND status IN ($2, $3) \
             ORDER BY created_at ASC, id ASC",
            ORDER_COLUMNS
        ))
        .bind(machine_id)
        .bind(OrderStatus::Planned.as_db_str())
        .bind(OrderStatus::InProduction.as_db_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_order).collect()
    }

    async fn next_planned(&self, machine_id: i32) -> DataResult<Option<ProductionOrder>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM production_orders \
             WHERE machine_id = $1 AND status = $2 \
             ORDER BY created_at ASC, id ASC LIMIT 1",
            ORDER_COLUMNS
        ))
        .bind(machine_id)
        .bind(OrderStatus::Planned.as_db_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::map_order(&r)).transpose()
    }

    async fn in_production(&self, machine_id: i32) -> DataResult<Option<ProductionOrder>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM production_orders WHERE machine_id = $1 AND status = $2",
            ORDER_COLUMNS
        ))
        .bind(machine_id)
        .bind(OrderStatus::InProduction.as_db_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::map_order(&r)).transpose()
    }

    async fn begin_production(&self, order_id: i32, at: DateTime<Utc>) -> DataResult<bool> {
        let result = sqlx::query(
            "UPDATE production_orders SET status = $2, started_at = $3 \
             WHERE id = $1 AND status = $4",
        )
        .bind(order_id)
        .bind(OrderStatus::InProduction.as_db_str())
        .bind(at)
        .bind(OrderStatus::Planned.as_db_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if !self.order_exists(order_id).await? {
            return Err(DataError::not_found("Order", order_id));
        }
        Ok(false)
    }

    async fn finish_production(&self, order_id: i32, at: DateTime<Utc>) -> DataResult<bool> {
        let result = sqlx::query(
            "UPDATE production_orders SET status = $2, finished_at = $3 \
             WHERE id = $1 AND status = $4",
        )
        .bind(order_id)
        .bind(OrderStatus::Completed.as_db_str())
        .bind(at)
        .bind(OrderStatus::InProduction.as_db_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if !self.order_exists(order_id).await? {
            return Err(DataError::not_found("Order", order_id));
        }
        Ok(false)
    }

    async fn write_status(&self, order_id: i32, status: OrderStatus) -> DataResult<()> {
        let result = sqlx::query("UPDATE production_orders SET status = $2 WHERE id = $1")
            .bind(order_id)
            .bind(status.as_db_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DataError::not_found("Order", order_id));
        }
        Ok(())
    }

    async fn update_prediction(
        &self,
        order_id: i32,
        predicted_completion: DateTime<Utc>,
        at_risk: bool,
    ) -> DataResult<()> {
        let result = sqlx::query(
            "UPDATE production_orders SET predicted_completion = $2, at_risk = $3 WHERE id = $1",
        )
        .bind(order_id)
        .bind(predicted_completion)
        .bind(at_risk)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DataError::not_found("Order", order_id));
        }
        Ok(())
    }
}
