//! LoadStep: publica la historia de las claves tocadas hacia el sink.

use std::sync::Arc;

use etl_core::{Checkpoint, EtlError, StepAction, StepContext, VersionStore};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::HistorizeProgress;
use crate::sink::VersionSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadCheckpoint {
    pub published_keys: usize,
    pub published_versions: usize,
}

pub struct LoadStep {
    entity_type: String,
    store: Arc<dyn VersionStore>,
    sink: Arc<dyn VersionSink>,
    historize_step: String,
}

impl LoadStep {
    pub fn new(entity_type: impl Into<String>,
               store: Arc<dyn VersionStore>,
               sink: Arc<dyn VersionSink>,
               historize_step: impl Into<String>)
               -> Self {
        Self { entity_type: entity_type.into(),
               store,
               sink,
               historize_step: historize_step.into() }
    }
}

impl StepAction for LoadStep {
    fn run(&self, ctx: &StepContext<'_>) -> Result<Checkpoint, EtlError> {
        let progress: HistorizeProgress = ctx.upstream(&self.historize_step)?.decode()?;
        let mut published_versions = 0;
        for key in &progress.touched_keys {
            let history = self.store.history(&self.entity_type, key)?;
            self.sink.publish(&history)?;
            published_versions += history.len();
        }
        info!("published run_id={} entity={} keys={} versions={}",
              ctx.run_id(),
              self.entity_type,
              progress.touched_keys.len(),
              published_versions);
        Checkpoint::encode(&LoadCheckpoint { published_keys: progress.touched_keys.len(),
                                             published_versions })
    }

    fn describe(&self) -> Value {
        json!({ "entity_type": self.entity_type })
    }
}
