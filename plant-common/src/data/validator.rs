// validator.rs - Decode-boundary validation for telemetry samples

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};

use super::types::{DataError, TelemetrySample};

/// Validation configuration.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Enable validation (default: true).
    pub enabled: bool,

    /// Timestamp tolerance in minutes (future).
    pub timestamp_tolerance_minutes: i64,

    /// Maximum past timestamp in days.
    pub max_past_days: i64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timestamp_tolerance_minutes: 5,
            max_past_days: 365,
        }
    }
}

/// Last accepted counters for one (machine, order) pair.
#[derive(Debug, Clone, Copy)]
struct LastCounts {
    total: i32,
    good: i32,
    scrap: i32,
}

/// Stateful validator enforcing the non-decreasing-counts precondition.
///
/// Cumulative counters must not regress over an order's active lifetime;
/// the broker delivers at least once but nothing re-sequences out-of-order
/// deliveries, so a regressing sample is treated as a decode-class error
/// and dropped by the caller. Exact redeliveries are not rejected here —
/// the store ignores them idempotently on insert.
pub struct TelemetryValidator {
    config: ValidationConfig,
    last_counts: Arc<RwLock<HashMap<(i32, Option<i32>), LastCounts>>>,
}

impl TelemetryValidator {
    /// Create new validator with configuration.
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            config,
            last_counts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Validate a decoded sample (absolute + relative checks).
    pub fn validate(&self, sample: &TelemetrySample) -> Result<(), DataError> {
        if !self.config.enabled {
            return Ok(());
        }

        Self::validate_counts_absolute(sample)?;
        Self::validate_speed(sample)?;
        self.validate_timestamp(&sample.timestamp)?;

        let key = (sample.machine_id, sample.order_id);

        // Relative validation against the last accepted sample.
        let previous = self
            .last_counts
            .read()
            .ok()
            .and_then(|m| m.get(&key).copied());

        if let Some(prev) = previous {
            if sample.total_count < prev.total
                || sample.good_count < prev.good
                || sample.scrap_count < prev.scrap
            {
                return Err(DataError::Validation(format!(
                    "Counter regression for machine {} (order {:?}): \
                     total {} -> {}, good {} -> {}, scrap {} -> {}",
                    sample.machine_id,
                    sample.order_id,
                    prev.total,
                    sample.total_count,
                    prev.good,
                    sample.good_count,
                    prev.scrap,
                    sample.scrap_count
                )));
            }
        }

        if let Ok(mut map) = self.last_counts.write() {
            map.insert(
                key,
                LastCounts {
                    total: sample.total_count,
                    good: sample.good_count,
                    scrap: sample.scrap_count,
                },
            );
        }

        Ok(())
    }

    fn validate_counts_absolute(sample: &TelemetrySample) -> Result<(), DataError> {
        if sample.total_count < 0 || sample.good_count < 0 || sample.scrap_count < 0 {
            return Err(DataError::Validation(format!(
                "Counts must be non-negative: total={}, good={}, scrap={}",
                sample.total_count, sample.good_count, sample.scrap_count
            )));
        }

        if sample.good_count + sample.scrap_count > sample.total_count {
            return Err(DataError::Validation(format!(
                "good + scrap exceeds total: {} + {} > {}",
                sample.good_count, sample.scrap_count, sample.total_count
            )));
        }

        Ok(())
    }

    fn validate_speed(sample: &TelemetrySample) -> Result<(), DataError> {
        if !sample.speed_uph.is_finite() || sample.speed_uph < 0.0 {
            return Err(DataError::Validation(format!(
                "Speed must be a non-negative finite value, got: {}",
                sample.speed_uph
            )));
        }
        Ok(())
    }

    fn validate_timestamp(&self, timestamp: &DateTime<Utc>) -> Result<(), DataError> {
        let now = Utc::now();

        let max_future = now + Duration::minutes(self.config.timestamp_tolerance_minutes);
        if *timestamp > max_future {
            return Err(DataError::Validation(format!(
                "Timestamp too far in future (max {} minutes ahead): {}",
                self.config.timestamp_tolerance_minutes, timestamp
            )));
        }

        let max_past = now - Duration::days(self.config.max_past_days);
        if *timestamp < max_past {
            return Err(DataError::Validation(format!(
                "Timestamp too far in past (max {} days ago): {}",
                self.config.max_past_days, timestamp
            )));
        }

        Ok(())
    }
}
