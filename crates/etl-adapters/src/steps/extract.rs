//! ExtractStep: obtiene el lote crudo de una `SnapshotSource`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use etl_core::{Checkpoint, EtlError, StepAction, StepContext};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::source::SnapshotSource;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractCheckpoint {
    pub source: String,
    pub extracted_at: DateTime<Utc>,
    pub records: Vec<Value>,
}

pub struct ExtractStep {
    source: Arc<dyn SnapshotSource>,
}

impl ExtractStep {
    pub fn new(source: Arc<dyn SnapshotSource>) -> Self {
        Self { source }
    }
}

impl StepAction for ExtractStep {
    fn run(&self, ctx: &StepContext<'_>) -> Result<Checkpoint, EtlError> {
        ctx.check_cancelled()?;
        let extracted_at = self.source.observed_at();
        let records = self.source.extract()?;
        info!("extracted run_id={} source={} records={}", ctx.run_id(), self.source.name(), records.len());
        Checkpoint::encode(&ExtractCheckpoint { source: self.source.name().to_string(),
                                                extracted_at,
                                                records })
    }

    fn describe(&self) -> Value {
        json!({ "source": self.source.name() })
    }
}
