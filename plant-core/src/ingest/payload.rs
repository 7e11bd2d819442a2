use chrono::{DateTime, Utc};
use serde::Deserialize;

use plant_common::data::types::{
    Attributes, EventRecord, EventType, MachineState, TelemetrySample,
};

use super::IngestError;

/// Wire payload of a telemetry message.
///
/// Counts are cumulative; `orderId` links the sample to the order currently
/// running on the machine, when the gateway knows it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryPayload {
    pub timestamp: DateTime<Utc>,
    pub state: MachineState,
    pub total_count: i32,
    pub good_count: i32,
    pub scrap_count: i32,
    /// Instantaneous speed, units/hour.
    pub speed: f64,
    #[serde(default)]
    pub order_id: Option<i32>,
}

impl TelemetryPayload {
    pub fn decode(bytes: &[u8]) -> Result<Self, IngestError> {
        serde_json::from_slice(bytes)
            .map_err(|e| IngestError::Decode(format!("Telemetry payload: {}", e)))
    }

    pub fn into_sample(self, machine_id: i32) -> TelemetrySample {
        TelemetrySample {
            machine_id,
            order_id: self.order_id,
            timestamp: self.timestamp,
            state: self.state,
            total_count: self.total_count,
            good_count: self.good_count,
            scrap_count: self.scrap_count,
            speed_uph: self.speed,
        }
    }
}

/// Wire payload of a lifecycle event message.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub ts_start: DateTime<Utc>,
    #[serde(default)]
    pub ts_end: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub order_id: Option<i32>,
    /// Free-form metadata; values are restricted to JSON scalars at the
    /// decode boundary.
    #[serde(default)]
    pub attributes: Option<Attributes>,
}

impl EventPayload {
    pub fn decode(bytes: &[u8]) -> Result<Self, IngestError> {
        serde_json::from_slice(bytes)
            .map_err(|e| IngestError::Decode(format!("Event payload: {}", e)))
    }

    pub fn into_record(self, machine_id: i32) -> EventRecord {
        EventRecord {
            machine_id,
            order_id: self.order_id,
            event_type: self.event_type,
            reason: self.reason,
            ts_start: self.ts_start,
            ts_end: self.ts_end,
            attributes: self.attributes,
        }
    }
}
