use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::step::Checkpoint;

/// Estado global de un run.
///
/// `Pending -> Running -> {Succeeded, Failed, PartialSuccess}`. Un run
/// `Cancelled` o que quedó en `Running` tras un crash no es terminal y se
/// puede reanudar (vuelve a `Running`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    PartialSuccess,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed | RunStatus::PartialSuccess)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::PartialSuccess => "partial_success",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

/// Estado de un step dentro de un run.
///
/// Transiciones: `Pending -> Running -> {Succeeded, Failed}`;
/// `Pending -> Skipped` cuando una dependencia falló. `Running -> Pending`
/// sólo al cancelar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    /// El step ya no va a ejecutarse en este run.
    pub fn is_settled(&self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    pub status: StepStatus,
    pub attempt_count: u32,
    /// Token opaco de reanudación.
    pub checkpoint: Option<Checkpoint>,
    pub last_error: Option<String>,
}

impl Default for StepState {
    fn default() -> Self {
        Self { status: StepStatus::Pending,
               attempt_count: 0,
               checkpoint: None,
               last_error: None }
    }
}

impl StepState {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn with_status(&self, status: StepStatus) -> Self {
        Self { status, ..self.clone() }
    }
}

/// Una ejecución del pipeline reconstruida desde sus eventos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub run_id: Uuid,
    pub pipeline_hash: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub step_states: BTreeMap<String, StepState>,
}

impl JobRun {
    pub fn step(&self, name: &str) -> Option<&StepState> {
        self.step_states.get(name)
    }

    pub fn step_status(&self, name: &str) -> Option<StepStatus> {
        self.step(name).map(|s| s.status)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
