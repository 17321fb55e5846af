//! ValidateStep: verifica los invariantes SCD de las claves tocadas en el
//! run antes de publicarlas.

use std::sync::Arc;

use etl_core::store::check_history_allowing_gaps;
use etl_core::{check_history, Checkpoint, EtlError, StepAction, StepContext, VersionStore};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::HistorizeProgress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateCheckpoint {
    pub checked_keys: usize,
    pub checked_versions: usize,
}

pub struct ValidateStep {
    entity_type: String,
    store: Arc<dyn VersionStore>,
    historize_step: String,
    allow_gaps: bool,
}

impl ValidateStep {
    /// `allow_gaps` debe activarse cuando el historizado detecta bajas: una
    /// clave que reaparece deja un hueco legítimo entre versiones.
    pub fn new(entity_type: impl Into<String>,
               store: Arc<dyn VersionStore>,
               historize_step: impl Into<String>,
               allow_gaps: bool)
               -> Self {
        Self { entity_type: entity_type.into(),
               store,
               historize_step: historize_step.into(),
               allow_gaps }
    }
}

impl StepAction for ValidateStep {
    fn run(&self, ctx: &StepContext<'_>) -> Result<Checkpoint, EtlError> {
        let progress: HistorizeProgress = ctx.upstream(&self.historize_step)?.decode()?;
        let mut checked_versions = 0;
        for key in &progress.touched_keys {
            let history = self.store.history(&self.entity_type, key)?;
            if self.allow_gaps {
                check_history_allowing_gaps(&history)?;
            } else {
                check_history(&history)?;
            }
            checked_versions += history.len();
        }
        info!("validated run_id={} entity={} keys={} versions={}",
              ctx.run_id(),
              self.entity_type,
              progress.touched_keys.len(),
              checked_versions);
        Checkpoint::encode(&ValidateCheckpoint { checked_keys: progress.touched_keys.len(),
                                                 checked_versions })
    }

    fn describe(&self) -> Value {
        json!({ "entity_type": self.entity_type, "allow_gaps": self.allow_gaps })
    }
}
