use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Database {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub max_lifetime: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    /// Bind address of the TCP line-frame adapter.
    #[serde(default = "default_broker_bind_addr")]
    pub bind_addr: String,
    /// Processing channel capacity between collection and handling.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Delay before re-subscribing after a broker failure, in seconds.
    #[serde(default = "default_resubscribe_delay_secs")]
    pub resubscribe_delay_secs: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_broker_bind_addr(),
            channel_capacity: default_channel_capacity(),
            resubscribe_delay_secs: default_resubscribe_delay_secs(),
        }
    }
}

fn default_broker_bind_addr() -> String {
    "0.0.0.0:1889".to_string()
}
fn default_channel_capacity() -> usize {
    10_000
}
fn default_resubscribe_delay_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestSettings {
    /// Interval for the pipeline-health log line, in seconds.
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            health_interval_secs: default_health_interval_secs(),
        }
    }
}

fn default_health_interval_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ValidationSettings {
    #[serde(default = "default_validation_enabled")]
    pub enabled: bool,
    #[serde(default = "default_timestamp_tolerance_minutes")]
    pub timestamp_tolerance_minutes: i64,
    #[serde(default = "default_max_past_days")]
    pub max_past_days: i64,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            enabled: default_validation_enabled(),
            timestamp_tolerance_minutes: default_timestamp_tolerance_minutes(),
            max_past_days: default_max_past_days(),
        }
    }
}

fn default_validation_enabled() -> bool {
    true
}
fn default_timestamp_tolerance_minutes() -> i64 {
    5
}
fn default_max_past_days() -> i64 {
    365
}

impl ValidationSettings {
    /// Convert to the validator's config type.
    pub fn to_validation_config(&self) -> plant_common::data::validator::ValidationConfig {
        plant_common::data::validator::ValidationConfig {
            enabled: self.enabled,
            timestamp_tolerance_minutes: self.timestamp_tolerance_minutes,
            max_past_days: self.max_past_days,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct KpiSettings {
    /// Bound on concurrent per-machine OEE computations in the fleet path.
    #[serde(default = "default_fleet_concurrency")]
    pub fleet_concurrency: usize,
}

impl Default for KpiSettings {
    fn default() -> Self {
        Self {
            fleet_concurrency: default_fleet_concurrency(),
        }
    }
}

fn default_fleet_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub database: Database,
    #[serde(default)]
    pub broker: BrokerSettings,
    #[serde(default)]
    pub ingest: IngestSettings,
    #[serde(default)]
    pub validation: ValidationSettings,
    #[serde(default)]
    pub kpi: KpiSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder()
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(true));

        if let Ok(database_url) = std::env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", database_url)?;
        }

        let s = builder.build()?;
        s.try_deserialize()
    }
}
