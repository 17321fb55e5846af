//! TransformStep: valida cada registro contra el contrato y lo convierte en
//! `EntitySnapshot`.
//!
//! Un registro inválido va a cuarentena y el lote sigue. Sólo un fallo de la
//! propia cuarentena hace fallar el step.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use etl_core::{Checkpoint, ErrorClass, EtlError, QuarantineSink, QuarantinedRecord, StepAction, StepContext};
use etl_domain::EntitySnapshot;
use indexmap::IndexMap;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::ExtractCheckpoint;
use crate::contract::RecordContract;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformStats {
    pub received: usize,
    pub valid: usize,
    pub quarantined: usize,
    /// Registros descartados por repetir clave dentro del mismo lote.
    pub duplicates: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformCheckpoint {
    pub entity_type: String,
    pub extracted_at: DateTime<Utc>,
    pub snapshots: Vec<EntitySnapshot>,
    pub stats: TransformStats,
}

pub struct TransformStep {
    contract: RecordContract,
    quarantine: Arc<dyn QuarantineSink>,
    extract_step: String,
}

impl TransformStep {
    pub fn new(contract: RecordContract, quarantine: Arc<dyn QuarantineSink>, extract_step: impl Into<String>) -> Self {
        Self { contract,
               quarantine,
               extract_step: extract_step.into() }
    }
}

impl StepAction for TransformStep {
    fn run(&self, ctx: &StepContext<'_>) -> Result<Checkpoint, EtlError> {
        let input: ExtractCheckpoint = ctx.upstream(&self.extract_step)?.decode()?;
        let mut stats = TransformStats { received: input.records.len(),
                                         ..TransformStats::default() };
        // Una clave repetida en el mismo lote tendría el mismo instante de
        // observación; se conserva la última aparición.
        let mut by_key: IndexMap<String, EntitySnapshot> = IndexMap::new();
        for record in &input.records {
            match self.contract.to_snapshot(record, input.extracted_at) {
                Ok(snapshot) => {
                    if let Some(prev) = by_key.insert(snapshot.business_key().to_string(), snapshot) {
                        stats.duplicates += 1;
                        warn!("duplicate key in batch run_id={} entity={} key={}",
                              ctx.run_id(),
                              prev.entity_type(),
                              prev.business_key());
                    }
                }
                Err(e) if e.class() == ErrorClass::Validation => {
                    let rejected = QuarantinedRecord::new(ctx.run_id(),
                                                          ctx.step(),
                                                          self.contract.entity_type(),
                                                          self.contract.business_key(record).ok(),
                                                          e.to_string(),
                                                          record.clone());
                    self.quarantine.quarantine(rejected)?;
                    stats.quarantined += 1;
                }
                Err(e) => return Err(e),
            }
        }
        stats.valid = by_key.len();
        info!("transformed run_id={} entity={} received={} valid={} quarantined={} duplicates={}",
              ctx.run_id(),
              self.contract.entity_type(),
              stats.received,
              stats.valid,
              stats.quarantined,
              stats.duplicates);
        Checkpoint::encode(&TransformCheckpoint { entity_type: self.contract.entity_type().to_string(),
                                                  extracted_at: input.extracted_at,
                                                  snapshots: by_key.into_values().collect(),
                                                  stats })
    }

    fn describe(&self) -> Value {
        json!({ "contract": self.contract })
    }
}
