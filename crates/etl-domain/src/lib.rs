// etl-domain library entry point
pub mod error;
pub mod snapshot;
pub mod verdict;
pub mod version;
pub mod write_op;
pub use error::DomainError;
pub use snapshot::{Attributes, EntitySnapshot};
pub use verdict::ChangeVerdict;
pub use version::{DimensionVersion, ValidTo};
pub use write_op::{OperationId, OperationKind, WriteBatch, WriteOp};
