//! Tipos de evento de un run.
//!
//! El `JobTracker` no guarda estado mutable: cada cambio es un evento y el
//! `JobRun` se reconstruye por replay. Así la historia completa de cada run
//! queda disponible para auditoría.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tracker::{RunStatus, StepState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEventKind {
    /// Primer evento de un run: fija el hash de la definición y los steps.
    RunStarted { pipeline_hash: String, steps: Vec<String> },
    /// Nuevo estado de un step (incluye checkpoint y contador de intentos).
    StepRecorded { step: String, state: StepState },
    /// Transición del estado global del run.
    RunStatusChanged { status: RunStatus },
}

impl RunEventKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            RunEventKind::RunStarted { .. } => "run_started",
            RunEventKind::StepRecorded { .. } => "step_recorded",
            RunEventKind::RunStatusChanged { .. } => "run_status_changed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub seq: u64, // orden de append dentro del store
    pub run_id: Uuid,
    pub kind: RunEventKind,
    pub ts: DateTime<Utc>,
}
