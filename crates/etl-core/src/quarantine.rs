//! Cuarentena de registros rechazados por errores de validación.
//!
//! Un registro inválido no aborta el lote: se registra aquí con el step que
//! lo rechazó, su identidad (si se pudo extraer) y el detalle del error.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::EtlError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantinedRecord {
    pub run_id: Uuid,
    pub step: String,
    pub entity_type: String,
    /// Clave de negocio, si el registro la tenía.
    pub record_key: Option<String>,
    pub detail: String,
    pub payload: serde_json::Value,
    pub quarantined_at: DateTime<Utc>,
}

impl QuarantinedRecord {
    pub fn new(run_id: Uuid,
               step: impl Into<String>,
               entity_type: impl Into<String>,
               record_key: Option<String>,
               detail: impl Into<String>,
               payload: serde_json::Value)
               -> Self {
        Self { run_id,
               step: step.into(),
               entity_type: entity_type.into(),
               record_key,
               detail: detail.into(),
               payload,
               quarantined_at: Utc::now() }
    }
}

pub trait QuarantineSink: Send + Sync {
    /// Persiste el registro. Un error aquí sí escala al step.
    fn quarantine(&self, record: QuarantinedRecord) -> Result<(), EtlError>;
    /// Registros en cuarentena de un run, en orden de llegada.
    fn list(&self, run_id: Uuid) -> Result<Vec<QuarantinedRecord>, EtlError>;
}

#[derive(Default)]
pub struct InMemoryQuarantine {
    records: Mutex<Vec<QuarantinedRecord>>,
}

impl InMemoryQuarantine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl QuarantineSink for InMemoryQuarantine {
    fn quarantine(&self, record: QuarantinedRecord) -> Result<(), EtlError> {
        warn!("quarantined run_id={} step={} key={} detail={}",
              record.run_id,
              record.step,
              record.record_key.as_deref().unwrap_or("-"),
              record.detail);
        self.records.lock().unwrap_or_else(|p| p.into_inner()).push(record);
        Ok(())
    }

    fn list(&self, run_id: Uuid) -> Result<Vec<QuarantinedRecord>, EtlError> {
        let records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        Ok(records.iter().filter(|r| r.run_id == run_id).cloned().collect())
    }
}
