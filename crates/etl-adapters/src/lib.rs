//! etl-adapters: steps concretos del pipeline ETL sobre los contratos de
//! etl-core.
//!
//! Este crate provee:
//! - `RecordContract`: validación de registros crudos (campos obligatorios y
//!   tipos JSON) y extracción de la clave de negocio.
//! - Contratos de entrada (`SnapshotSource`) y salida (`VersionSink`).
//! - Steps `ExtractStep`, `TransformStep`, `HistorizeStep`, `ValidateStep`
//!   y `LoadStep`, y `etl_pipeline` para cablearlos por tipo de entidad.

pub mod contract;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod steps;

pub use contract::{FieldType, RecordContract};
pub use pipeline::{entity_steps, etl_pipeline, step_name, EtlOptions, EtlStores};
pub use sink::{InMemoryVersionSink, VersionSink};
pub use source::{SnapshotSource, StaticSource};
