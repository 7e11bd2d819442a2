// Data layer: domain types, the store seam and its implementations.

pub mod memory;
pub mod repository;
pub mod store;
pub mod types;
pub mod validator;

pub use memory::InMemoryPlantStore;
pub use repository::PgPlantStore;
pub use store::{CountMirror, NewOrder, PlantStore};
pub use types::{
    AttributeValue, DataError, DataResult, EventRecord, EventType, KpiResult, Machine,
    MachineState, OrderStatus, Product, ProductionOrder, TelemetrySample,
};
pub use validator::{TelemetryValidator, ValidationConfig};
