//! JobTracker: estado durable de runs y checkpoints por step.

mod replay;
mod types;

pub use replay::EventSourcedJobTracker;
pub use types::{JobRun, RunStatus, StepState, StepStatus};

use uuid::Uuid;

use crate::errors::EtlError;

/// Registro durable del estado de ejecución.
///
/// Todas las escrituras deben estar persistidas al retornar: un crash entre
/// el fin de un step y su `record_step` equivale a que el step no corrió.
pub trait JobTracker: Send + Sync {
    /// Crea un run nuevo con todos los steps en `Pending`.
    fn start(&self, pipeline_hash: &str, steps: &[String]) -> Result<JobRun, EtlError>;
    fn record_step(&self, run_id: Uuid, step: &str, state: &StepState) -> Result<(), EtlError>;
    fn record_status(&self, run_id: Uuid, status: RunStatus) -> Result<(), EtlError>;
    /// # Errores
    /// `RunNotFound` si el run no existe.
    fn load(&self, run_id: Uuid) -> Result<JobRun, EtlError>;
    /// Run iniciado más recientemente cuyo estado no es terminal.
    fn latest_incomplete(&self) -> Result<Option<JobRun>, EtlError>;
}
