//! Persistencia Postgres (Diesel) para el motor ETL.
//!
//! Implementa los contratos de `etl-core` sobre tres tablas principales:
//! - `run_events`: log append-only de eventos de runs (tracker).
//! - `dimension_versions` + `applied_operations`: historia SCD2 e ids de
//!   operación aplicados, escritos en la misma transacción.
//! - `quarantined_records`: registros rechazados por validación.
pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::DbConfig;
pub use error::PersistenceError;
pub use pg::{build_pool, build_pool_from_env, ConnectionProvider, PgEventStore, PgPool, PgQuarantineSink,
             PgVersionStore, PoolProvider};
