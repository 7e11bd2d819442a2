//! Equipment-efficiency analytics (OEE = Availability x Performance x
//! Quality).
//!
//! Read path, independent of ingestion: samples in the analysis window are
//! aggregated with the uniform-dwell approximation — every sample is treated
//! as representing an equal slice of the window regardless of actual
//! inter-sample spacing. This is the documented approximation, not a
//! duration-weighted average.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use plant_common::data::store::PlantStore;
use plant_common::data::types::{DataResult, KpiResult, MachineState};

/// Analysis window selection, mirroring the presets the dashboard exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KpiWindow {
    /// Morning-shift start (06:00 UTC) to now.
    Shift,
    /// Midnight UTC to now.
    Day,
    /// The last eight hours. Default.
    Last8h,
    /// Explicit bounds.
    Custom {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl KpiWindow {
    /// Resolve to concrete bounds relative to `now`.
    pub fn resolve(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        match self {
            KpiWindow::Shift => {
                let start = Utc
                    .from_utc_datetime(&now.date_naive().and_hms_opt(6, 0, 0).unwrap_or_default());
                (start, now)
            }
            KpiWindow::Day => {
                let start = Utc
                    .from_utc_datetime(&now.date_naive().and_hms_opt(0, 0, 0).unwrap_or_default());
                (start, now)
            }
            KpiWindow::Last8h => (now - Duration::hours(8), now),
            KpiWindow::Custom { start, end } => (*start, *end),
        }
    }
}

/// Round a ratio into a percentage with two decimal places.
fn pct(ratio: f64) -> f64 {
    (ratio * 10_000.0).round() / 100.0
}

/// Computes OEE breakdowns from persisted telemetry.
pub struct OeeCalculator {
    store: Arc<dyn PlantStore>,
    /// Bound on concurrent per-machine computations in the fleet path.
    fleet_concurrency: usize,
}

impl OeeCalculator {
    pub fn new(store: Arc<dyn PlantStore>, fleet_concurrency: usize) -> Self {
        Self {
            store,
            fleet_concurrency: fleet_concurrency.max(1),
        }
    }

    /// OEE for one machine over `[window_start, window_end]`.
    ///
    /// A window with no samples yields an all-zero result carrying only the
    /// identifiers and bounds.
    pub async fn compute_for_machine(
        &self,
        machine_id: i32,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> DataResult<KpiResult> {
        let samples = self
            .store
            .samples_for_machine(machine_id, window_start, window_end)
            .await?;

        if samples.is_empty() {
            debug!(machine_id, "No telemetry in window, returning zero KPI result");
            return Ok(KpiResult::empty(
                machine_id,
                String::new(),
                window_start,
                window_end,
            ));
        }

        let machine = self.store.machine(machine_id).await?;
        let machine_code = machine
            .as_ref()
            .map(|m| m.code.clone())
            .unwrap_or_default();

        let window_minutes = (window_end - window_start).num_milliseconds() as f64 / 60_000.0;
        let n = samples.len();
        // Uniform dwell: each sample stands for an equal slice of the window.
        let per_sample_minutes = if n > 1 { window_minutes / n as f64 } else { 0.0 };

        let running_minutes = samples
            .iter()
            .filter(|s| s.state == MachineState::Running)
            .count() as f64
            * per_sample_minutes;
        let planned_stop_minutes = samples
            .iter()
            .filter(|s| s.state == MachineState::PlannedStop)
            .count() as f64
            * per_sample_minutes;
        let unplanned_stop_minutes = samples
            .iter()
            .filter(|s| s.state.is_unplanned_stop())
            .count() as f64
            * per_sample_minutes;

        // Counts come from the latest sample; they are cumulative.
        let last = &samples[n - 1];
        let total_count = last.total_count;
        let good_count = last.good_count;

        let planned_time = window_minutes - planned_stop_minutes;
        let availability = if planned_time > 0.0 {
            (planned_time - unplanned_stop_minutes) / planned_time
        } else {
            0.0
        };

        let performance = match machine {
            Some(ref m) if running_minutes > 0.0 && m.nominal_capacity_uph > 0.0 => {
                let ideal_cycle_minutes = 60.0 / m.nominal_capacity_uph;
                (f64::from(good_count) * ideal_cycle_minutes) / running_minutes
            }
            _ => 0.0,
        };

        let quality = if total_count > 0 {
            f64::from(good_count) / f64::from(total_count)
        } else {
            0.0
        };

        let oee = availability * performance * quality;

        Ok(KpiResult {
            machine_id,
            machine_code,
            window_start,
            window_end,
            availability_pct: pct(availability),
            performance_pct: pct(performance),
            quality_pct: pct(quality),
            oee_pct: pct(oee),
        })
    }

    /// OEE for every active machine over the window.
    ///
    /// Each machine's computation is read-only and independent, so they run
    /// concurrently under the configured bound. Results are unordered.
    pub async fn compute_for_fleet(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> DataResult<Vec<KpiResult>> {
        let machines = self.store.active_machines().await?;

        stream::iter(machines)
            .map(|machine| self.compute_for_machine(machine.id, window_start, window_end))
            .buffer_unordered(self.fleet_concurrency)
            .try_collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plant_common::data::memory::InMemoryPlantStore;
    use plant_common::data::types::{Machine, TelemetrySample};

    fn machine(id: i32, capacity_uph: f64) -> Machine {
        Machine {
            id,
            code: format!("M-{:02}", id),
            description: "Filler".to_string(),
            nominal_capacity_uph: capacity_uph,
            target_efficiency_pct: 85.0,
            active: true,
            created_at: Utc::now(),
        }
    }

    fn sample(
        machine_id: i32,
        ts: DateTime<Utc>,
        state: MachineState,
        total: i32,
        good: i32,
    ) -> TelemetrySample {
        TelemetrySample {
            machine_id,
            order_id: None,
            timestamp: ts,
            state,
            total_count: total,
            good_count: good,
            scrap_count: total - good,
            speed_uph: 200.0,
        }
    }

    async fn seed(store: &InMemoryPlantStore, samples: Vec<TelemetrySample>) {
        for s in samples {
            store.record_telemetry(&s, None).await.unwrap();
        }
    }

    fn calculator(store: Arc<InMemoryPlantStore>) -> OeeCalculator {
        OeeCalculator::new(store as Arc<dyn PlantStore>, 4)
    }

    #[tokio::test]
    async fn test_empty_window_yields_zero_result() {
        let store = Arc::new(InMemoryPlantStore::new());
        store.insert_machine(machine(1, 240.0));
        let calc = calculator(Arc::clone(&store));

        let start = Utc::now() - Duration::hours(1);
        let end = Utc::now();
        let result = calc.compute_for_machine(1, start, end).await.unwrap();

        assert_eq!(result.machine_id, 1);
        assert_eq!(result.window_start, start);
        assert_eq!(result.window_end, end);
        assert_eq!(result.oee_pct, 0.0);
        assert_eq!(result.availability_pct, 0.0);
        assert_eq!(result.performance_pct, 0.0);
        assert_eq!(result.quality_pct, 0.0);
    }

    #[tokio::test]
    async fn test_documented_scenario_22_5_pct() {
        // Capacity 240 u/h => ideal cycle 0.25 min. 60-minute window with
        // four samples [RUNNING, RUNNING, PLANNED_STOP, RUNNING]:
        // per-sample 15 min, running 45, planned stop 15, planned time 45,
        // availability 1.0; last sample 50/45 => quality 0.9;
        // performance (45*0.25)/45 = 0.25; OEE 22.5%.
        let store = Arc::new(InMemoryPlantStore::new());
        store.insert_machine(machine(1, 240.0));

        let start = Utc::now() - Duration::minutes(60);
        let end = start + Duration::minutes(60);
        seed(
            &store,
            vec![
                sample(1, start + Duration::minutes(5), MachineState::Running, 10, 9),
                sample(1, start + Duration::minutes(20), MachineState::Running, 25, 22),
                sample(1, start + Duration::minutes(35), MachineState::PlannedStop, 35, 31),
                sample(1, start + Duration::minutes(50), MachineState::Running, 50, 45),
            ],
        )
        .await;

        let calc = calculator(Arc::clone(&store));
        let result = calc.compute_for_machine(1, start, end).await.unwrap();

        assert_eq!(result.availability_pct, 100.0);
        assert_eq!(result.performance_pct, 25.0);
        assert_eq!(result.quality_pct, 90.0);
        assert_eq!(result.oee_pct, 22.5);
        assert_eq!(result.machine_code, "M-01");
    }

    #[tokio::test]
    async fn test_oee_is_product_of_factors() {
        let store = Arc::new(InMemoryPlantStore::new());
        store.insert_machine(machine(1, 120.0));

        let start = Utc::now() - Duration::minutes(120);
        let end = start + Duration::minutes(120);
        seed(
            &store,
            vec![
                sample(1, start + Duration::minutes(10), MachineState::Running, 30, 28),
                sample(1, start + Duration::minutes(40), MachineState::UnplannedStop, 40, 37),
                sample(1, start + Duration::minutes(70), MachineState::Running, 70, 64),
                sample(1, start + Duration::minutes(100), MachineState::Down, 80, 73),
            ],
        )
        .await;

        let calc = calculator(Arc::clone(&store));
        let result = calc.compute_for_machine(1, start, end).await.unwrap();

        // Factors stay within [0, 100] as percentages.
        for v in [
            result.availability_pct,
            result.performance_pct,
            result.quality_pct,
            result.oee_pct,
        ] {
            assert!((0.0..=100.0).contains(&v), "out of range: {}", v);
        }

        // OEE equals the product of the three factors, within rounding.
        let product =
            result.availability_pct / 100.0 * (result.performance_pct / 100.0)
                * (result.quality_pct / 100.0)
                * 100.0;
        assert!((result.oee_pct - product).abs() < 0.02);
    }

    #[tokio::test]
    async fn test_single_sample_has_zero_dwell() {
        // One sample: per-sample minutes is defined as 0, so no running
        // time accrues and performance (hence OEE) is zero, while
        // availability is 1 and quality comes from the sample counts.
        let store = Arc::new(InMemoryPlantStore::new());
        store.insert_machine(machine(1, 240.0));

        let start = Utc::now() - Duration::minutes(60);
        let end = start + Duration::minutes(60);
        seed(
            &store,
            vec![sample(1, start + Duration::minutes(30), MachineState::Running, 20, 18)],
        )
        .await;

        let calc = calculator(Arc::clone(&store));
        let result = calc.compute_for_machine(1, start, end).await.unwrap();

        assert_eq!(result.availability_pct, 100.0);
        assert_eq!(result.performance_pct, 0.0);
        assert_eq!(result.quality_pct, 90.0);
        assert_eq!(result.oee_pct, 0.0);
    }

    #[tokio::test]
    async fn test_fleet_covers_all_active_machines() {
        let store = Arc::new(InMemoryPlantStore::new());
        store.insert_machine(machine(1, 240.0));
        store.insert_machine(machine(2, 120.0));
        let mut inactive = machine(3, 100.0);
        inactive.active = false;
        store.insert_machine(inactive);

        let start = Utc::now() - Duration::minutes(60);
        let end = start + Duration::minutes(60);
        seed(
            &store,
            vec![
                sample(1, start + Duration::minutes(10), MachineState::Running, 10, 10),
                sample(1, start + Duration::minutes(50), MachineState::Running, 40, 40),
                sample(2, start + Duration::minutes(30), MachineState::Idle, 0, 0),
            ],
        )
        .await;

        let calc = calculator(Arc::clone(&store));
        let mut results = calc.compute_for_fleet(start, end).await.unwrap();
        results.sort_by_key(|r| r.machine_id);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].machine_id, 1);
        assert_eq!(results[1].machine_id, 2);
        assert!(results[0].oee_pct > 0.0);
        assert_eq!(results[1].oee_pct, 0.0);
    }

    #[test]
    fn test_window_presets_resolve() {
        let now = Utc.with_ymd_and_hms(2026, 8, 6, 14, 30, 0).unwrap();

        let (start, end) = KpiWindow::Shift.resolve(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 8, 6, 6, 0, 0).unwrap());
        assert_eq!(end, now);

        let (start, _) = KpiWindow::Day.resolve(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 8, 6, 0, 0, 0).unwrap());

        let (start, end) = KpiWindow::Last8h.resolve(now);
        assert_eq!(end - start, Duration::hours(8));

        let bounds = (now - Duration::hours(2), now - Duration::hours(1));
        let (start, end) = KpiWindow::Custom {
            start: bounds.0,
            end: bounds.1,
        }
        .resolve(now);
        assert_eq!((start, end), bounds);
    }

    #[test]
    fn test_pct_rounds_to_two_decimals() {
        assert_eq!(pct(0.225), 22.5);
        assert_eq!(pct(1.0), 100.0);
        assert_eq!(pct(0.123456), 12.35);
        assert_eq!(pct(0.0), 0.0);
    }
}
