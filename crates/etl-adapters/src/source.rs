//! Fuentes de registros crudos.
//!
//! Los clientes de cada API (GitLab, SonarQube, ...) quedan fuera de este
//! crate; sólo necesitan implementar `SnapshotSource`. Las fallas de red
//! deben mapearse a `TransientIo`/`RateLimited` y las de credenciales a
//! `Auth` para que la política de reintentos las clasifique bien.

use chrono::{DateTime, Utc};
use etl_core::EtlError;
use serde_json::Value;

pub trait SnapshotSource: Send + Sync {
    fn name(&self) -> &str;

    /// Extracción completa y reiniciable del lote actual.
    fn extract(&self) -> Result<Vec<Value>, EtlError>;

    /// Instante de observación a usar para el lote. Por defecto, ahora.
    fn observed_at(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fuente con registros fijos (fixtures y ejecuciones de demo).
#[derive(Debug, Clone)]
pub struct StaticSource {
    name: String,
    records: Vec<Value>,
    observed_at: Option<DateTime<Utc>>,
}

impl StaticSource {
    pub fn new(name: impl Into<String>, records: Vec<Value>) -> Self {
        Self { name: name.into(),
               records,
               observed_at: None }
    }

    /// Fija el instante de observación (tests deterministas).
    pub fn at(mut self, observed_at: DateTime<Utc>) -> Self {
        self.observed_at = Some(observed_at);
        self
    }
}

impl SnapshotSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self) -> Result<Vec<Value>, EtlError> {
        Ok(self.records.clone())
    }

    fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at.unwrap_or_else(Utc::now)
    }
}
