//! Definición de steps: tipo de step, acción, contexto y checkpoint.

mod checkpoint;
mod context;
mod definition;

pub use checkpoint::Checkpoint;
pub use context::StepContext;
pub use definition::{FnAction, PipelineStep, StepAction, StepKind};
