use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =================================================================
// Catalog entities (owned by the catalog collaborator, read here)
// =================================================================

/// A shop-floor machine producing discrete units.
///
/// The catalog service owns these rows; this crate only reads the nominal
/// capacity and the active flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Machine {
    pub id: i32,
    pub code: String,
    pub description: String,
    /// Nominal capacity in units per hour.
    pub nominal_capacity_uph: f64,
    /// Target efficiency, percent.
    pub target_efficiency_pct: f64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// A manufactured product. Read-only reference data for the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: i32,
    pub code: String,
    pub description: String,
    /// Ideal cycle time in seconds per unit.
    pub ideal_cycle_secs: f64,
    /// Expected yield, percent.
    pub expected_yield_pct: f64,
    pub created_at: DateTime<Utc>,
}

// =================================================================
// Production orders
// =================================================================

/// Lifecycle status of a production order.
///
/// `Planned` is the initial state; `Completed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Planned,
    InProduction,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Database column representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            OrderStatus::Planned => "PLANNED",
            OrderStatus::InProduction => "IN_PRODUCTION",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, DataError> {
        match s {
            "PLANNED" => Ok(OrderStatus::Planned),
            "IN_PRODUCTION" => Ok(OrderStatus::InProduction),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(DataError::Validation(format!(
                "Unknown order status: {}",
                other
            ))),
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// A production order for a quantity of one product on one machine.
///
/// `good_qty`/`total_qty` mirror the latest telemetry counts for the order;
/// they are overwritten on ingestion, never incremented. At most one order
/// per machine is `InProduction` at any instant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductionOrder {
    pub id: i32,
    /// Human-readable sequential number, e.g. "OP-000042".
    pub number: String,
    pub product_id: i32,
    pub machine_id: i32,
    pub planned_qty: i32,
    pub good_qty: i32,
    pub total_qty: i32,
    pub deadline: DateTime<Utc>,
    pub status: OrderStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Latest remaining-time estimate, if one has been computed.
    pub predicted_completion: Option<DateTime<Utc>>,
    /// True when the predicted completion falls after the deadline.
    pub at_risk: bool,
    pub created_at: DateTime<Utc>,
}

impl ProductionOrder {
    /// Completion percentage based on the good-count mirror.
    pub fn completion_pct(&self) -> f64 {
        if self.planned_qty > 0 {
            f64::from(self.good_qty) / f64::from(self.planned_qty) * 100.0
        } else {
            0.0
        }
    }
}

// =================================================================
// Telemetry
// =================================================================

/// Machine state reported in telemetry samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineState {
    Running,
    Idle,
    Setup,
    PlannedStop,
    UnplannedStop,
    Down,
}

impl MachineState {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            MachineState::Running => "RUNNING",
            MachineState::Idle => "IDLE",
            MachineState::Setup => "SETUP",
            MachineState::PlannedStop => "PLANNED_STOP",
            MachineState::UnplannedStop => "UNPLANNED_STOP",
            MachineState::Down => "DOWN",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, DataError> {
        match s {
            "RUNNING" => Ok(MachineState::Running),
            "IDLE" => Ok(MachineState::Idle),
            "SETUP" => Ok(MachineState::Setup),
            "PLANNED_STOP" => Ok(MachineState::PlannedStop),
            "UNPLANNED_STOP" => Ok(MachineState::UnplannedStop),
            "DOWN" => Ok(MachineState::Down),
            other => Err(DataError::Validation(format!(
                "Unknown machine state: {}",
                other
            ))),
        }
    }

    /// Unplanned stoppage states count against availability.
    pub fn is_unplanned_stop(&self) -> bool {
        matches!(self, MachineState::UnplannedStop | MachineState::Down)
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// One telemetry sample from a machine. Append-only; analytics read them in
/// timestamp order regardless of arrival order. Counts are cumulative and
/// assumed non-decreasing over an order's active lifetime (enforced at the
/// decode boundary, not here).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySample {
    pub machine_id: i32,
    pub order_id: Option<i32>,
    pub timestamp: DateTime<Utc>,
    pub state: MachineState,
    pub total_count: i32,
    pub good_count: i32,
    pub scrap_count: i32,
    /// Instantaneous speed in units per hour.
    pub speed_uph: f64,
}

// =================================================================
// Lifecycle events
// =================================================================

/// Machine/order lifecycle event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    OrderStart,
    OrderEnd,
    StopStart,
    StopEnd,
    ShiftChange,
    Setup,
    SpeedChange,
}

impl EventType {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            EventType::OrderStart => "ORDER_START",
            EventType::OrderEnd => "ORDER_END",
            EventType::StopStart => "STOP_START",
            EventType::StopEnd => "STOP_END",
            EventType::ShiftChange => "SHIFT_CHANGE",
            EventType::Setup => "SETUP",
            EventType::SpeedChange => "SPEED_CHANGE",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, DataError> {
        match s {
            "ORDER_START" => Ok(EventType::OrderStart),
            "ORDER_END" => Ok(EventType::OrderEnd),
            "STOP_START" => Ok(EventType::StopStart),
            "STOP_END" => Ok(EventType::StopEnd),
            "SHIFT_CHANGE" => Ok(EventType::ShiftChange),
            "SETUP" => Ok(EventType::Setup),
            "SPEED_CHANGE" => Ok(EventType::SpeedChange),
            other => Err(DataError::Validation(format!(
                "Unknown event type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// A single value in an event's attribute map.
///
/// The wire format accepts any JSON scalar; nested objects and arrays are
/// rejected at the decode boundary. Stored opaquely as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Number(f64),
    Bool(bool),
    Null,
}

/// Typed attribute map attached to events.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A persisted machine/order lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    pub machine_id: i32,
    pub order_id: Option<i32>,
    pub event_type: EventType,
    pub reason: Option<String>,
    pub ts_start: DateTime<Utc>,
    pub ts_end: Option<DateTime<Utc>>,
    pub attributes: Option<Attributes>,
}

// =================================================================
// Derived KPI result (not persisted)
// =================================================================

/// OEE breakdown for one machine over one analysis window.
/// All four values are percentages rounded to two decimal places.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KpiResult {
    pub machine_id: i32,
    pub machine_code: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub availability_pct: f64,
    pub performance_pct: f64,
    pub quality_pct: f64,
    pub oee_pct: f64,
}

impl KpiResult {
    /// Zero-valued result carrying only identifiers and window bounds,
    /// returned for windows with no telemetry.
    pub fn empty(
        machine_id: i32,
        machine_code: String,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Self {
        Self {
            machine_id,
            machine_code,
            window_start,
            window_end,
            availability_pct: 0.0,
            performance_pct: 0.0,
            quality_pct: 0.0,
            oee_pct: 0.0,
        }
    }
}

// =================================================================
// Data layer errors
// =================================================================

/// Errors surfaced by the data layer.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DataError {
    /// Underlying database failure (transient or permanent).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Input failed a validation check at the decode boundary.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i32 },

    /// JSON (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DataError {
    pub fn not_found(entity: &'static str, id: i32) -> Self {
        DataError::NotFound { entity, id }
    }
}

/// Result type for data layer operations.
pub type DataResult<T> = Result<T, DataError>;
