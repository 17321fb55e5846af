//! Builder de `StepPipeline`.
//!
//! ```ignore
//! let pipeline = PipelineBuilder::new()
//!     .retry(RetryPolicy::default())
//!     .step(extract)
//!     .step(transform.depends_on(["extract"]))
//!     .build()?;
//! ```

use super::StepPipeline;
use crate::errors::EtlError;
use crate::retry::RetryPolicy;
use crate::step::PipelineStep;

#[derive(Debug, Default)]
pub struct PipelineBuilder {
    steps: Vec<PipelineStep>,
    retry: RetryPolicy,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Política por defecto para steps sin política propia.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn step(mut self, step: PipelineStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Valida el grafo y construye el pipeline. Los errores de grafo se
    /// detectan aquí, antes de iniciar cualquier run.
    pub fn build(self) -> Result<StepPipeline, EtlError> {
        StepPipeline::with_retry(self.steps, self.retry)
    }
}
