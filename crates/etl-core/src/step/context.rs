use std::collections::BTreeMap;
use std::sync::Mutex;

use log::debug;
use uuid::Uuid;

use super::Checkpoint;
use crate::cancel::CancellationToken;
use crate::errors::EtlError;
use crate::tracker::{JobTracker, StepState, StepStatus};

/// Contexto que recibe la acción de un step en cada intento.
pub struct StepContext<'a> {
    run_id: Uuid,
    step: &'a str,
    attempt: u32,
    checkpoint: Mutex<Option<Checkpoint>>,
    upstream: &'a BTreeMap<String, Checkpoint>,
    cancel: &'a CancellationToken,
    tracker: &'a dyn JobTracker,
}

impl<'a> StepContext<'a> {
    pub fn new(run_id: Uuid,
               step: &'a str,
               attempt: u32,
               checkpoint: Option<Checkpoint>,
               upstream: &'a BTreeMap<String, Checkpoint>,
               cancel: &'a CancellationToken,
               tracker: &'a dyn JobTracker)
               -> Self {
        Self { run_id,
               step,
               attempt,
               checkpoint: Mutex::new(checkpoint),
               upstream,
               cancel,
               tracker }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn step(&self) -> &str {
        self.step
    }

    /// Número de intento (1-based).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Último checkpoint propio conocido: el de un intento o run anterior,
    /// o el último guardado con `save_progress` en este intento.
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.checkpoint.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Checkpoint final de un step ancestro (directo o transitivo).
    pub fn upstream(&self, step: &str) -> Result<&Checkpoint, EtlError> {
        self.upstream
            .get(step)
            .ok_or_else(|| EtlError::Internal(format!("step '{}' has no checkpoint from '{step}'", self.step)))
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// `Err(Cancelled)` si se pidió la cancelación. Para llamar en los
    /// límites de lote.
    pub fn check_cancelled(&self) -> Result<(), EtlError> {
        if self.cancel.is_cancelled() {
            return Err(EtlError::Cancelled);
        }
        Ok(())
    }

    /// Persiste un checkpoint parcial (estado `Running`) antes de seguir.
    pub fn save_progress(&self, checkpoint: Checkpoint) -> Result<(), EtlError> {
        let state = StepState { status: StepStatus::Running,
                                attempt_count: self.attempt,
                                checkpoint: Some(checkpoint.clone()),
                                last_error: None };
        self.tracker.record_step(self.run_id, self.step, &state)?;
        debug!("progress saved run_id={} step={} attempt={}", self.run_id, self.step, self.attempt);
        *self.checkpoint.lock().unwrap_or_else(|p| p.into_inner()) = Some(checkpoint);
        Ok(())
    }
}
