//! Steps concretos del pipeline ETL.
//!
//! Cada step lee los checkpoints de sus ancestros por nombre y devuelve el
//! suyo. Los tipos de checkpoint son públicos para que los consumidores
//! puedan inspeccionar un `JobRun`.

pub mod extract;
pub mod historize;
pub mod load;
pub mod transform;
pub mod validate;

pub use extract::{ExtractCheckpoint, ExtractStep};
pub use historize::{HistorizeProgress, HistorizeStats, HistorizeStep};
pub use load::{LoadCheckpoint, LoadStep};
pub use transform::{TransformCheckpoint, TransformStats, TransformStep};
pub use validate::{ValidateCheckpoint, ValidateStep};
