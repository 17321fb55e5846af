//! etl-core: detección de cambios, historización SCD tipo 2 y orquestación
//! de pipelines reanudables.
pub mod cancel;
pub mod constants;
pub mod detect;
pub mod engine;
pub mod errors;
pub mod event;
pub mod hashing;
pub mod quarantine;
pub mod retry;
pub mod scd;
pub mod step;
pub mod store;
pub mod tracker;

pub use cancel::CancellationToken;
pub use detect::{ChangeDetector, TrackedFields};
pub use engine::{PipelineBuilder, StepPipeline};
pub use errors::{ErrorClass, EtlError};
pub use event::{EventStore, InMemoryEventStore, RunEvent, RunEventKind};
pub use quarantine::{InMemoryQuarantine, QuarantineSink, QuarantinedRecord};
pub use retry::{RetryDecision, RetryPolicy};
pub use scd::Historizer;
pub use step::{Checkpoint, PipelineStep, StepAction, StepContext, StepKind};
pub use store::{check_history, CommitOutcome, InMemoryVersionStore, KeyLocks, VersionStore};
pub use tracker::{EventSourcedJobTracker, JobRun, JobTracker, RunStatus, StepState, StepStatus};
