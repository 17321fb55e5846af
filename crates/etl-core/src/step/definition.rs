use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Checkpoint, StepContext};
use crate::errors::EtlError;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Extract,
    Transform,
    Historize,
    Validate,
    Load,
}

/// Unidad de trabajo de un step. Debe ser idempotente: tras un crash el
/// executor puede volver a ejecutarla con el último checkpoint persistido.
pub trait StepAction: Send + Sync {
    fn run(&self, ctx: &StepContext<'_>) -> Result<Checkpoint, EtlError>;

    /// Parámetros deterministas que forman parte del hash de definición.
    fn describe(&self) -> Value {
        Value::Null
    }
}

/// Adaptador de closures a `StepAction`.
pub struct FnAction<F>(F);

impl<F> StepAction for FnAction<F> where F: Fn(&StepContext<'_>) -> Result<Checkpoint, EtlError> + Send + Sync
{
    fn run(&self, ctx: &StepContext<'_>) -> Result<Checkpoint, EtlError> {
        (self.0)(ctx)
    }
}

/// Definición inmutable de un step del pipeline.
#[derive(Clone)]
pub struct PipelineStep {
    pub name: String,
    pub kind: StepKind,
    pub depends_on: BTreeSet<String>,
    /// Si un step no crítico falla, el run termina en `PartialSuccess`.
    pub critical: bool,
    /// Política propia; si es `None` se usa la del pipeline.
    pub retry: Option<RetryPolicy>,
    pub action: Arc<dyn StepAction>,
}

impl PipelineStep {
    pub fn new(name: impl Into<String>, kind: StepKind, action: impl StepAction + 'static) -> Self {
        Self { name: name.into(),
               kind,
               depends_on: BTreeSet::new(),
               critical: true,
               retry: None,
               action: Arc::new(action) }
    }

    pub fn from_fn<F>(name: impl Into<String>, kind: StepKind, f: F) -> Self
        where F: Fn(&StepContext<'_>) -> Result<Checkpoint, EtlError> + Send + Sync + 'static
    {
        Self::new(name, kind, FnAction(f))
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
        where I: IntoIterator<Item = S>,
              S: Into<String>
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn non_critical(mut self) -> Self {
        self.critical = false;
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }
}

impl fmt::Debug for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStep")
         .field("name", &self.name)
         .field("kind", &self.kind)
         .field("depends_on", &self.depends_on)
         .field("critical", &self.critical)
         .field("retry", &self.retry)
         .finish_non_exhaustive()
    }
}
