//! Publicación de versiones comprometidas hacia consumidores externos
//! (reportes, data marts).

use std::collections::BTreeMap;
use std::sync::Mutex;

use etl_core::EtlError;
use etl_domain::DimensionVersion;

pub trait VersionSink: Send + Sync {
    /// Publica versiones. Republicar la misma versión la reemplaza.
    fn publish(&self, versions: &[DimensionVersion]) -> Result<(), EtlError>;
}

type RowKey = (String, String, i64);

#[derive(Default)]
pub struct InMemoryVersionSink {
    rows: Mutex<BTreeMap<RowKey, DimensionVersion>>,
}

impl InMemoryVersionSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Versiones publicadas ordenadas por (entidad, clave, versión).
    pub fn published(&self) -> Vec<DimensionVersion> {
        self.rows.lock().unwrap_or_else(|p| p.into_inner()).values().cloned().collect()
    }
}

impl VersionSink for InMemoryVersionSink {
    fn publish(&self, versions: &[DimensionVersion]) -> Result<(), EtlError> {
        let mut rows = self.rows.lock().unwrap_or_else(|p| p.into_inner());
        for v in versions {
            rows.insert((v.entity_type().to_string(), v.business_key().to_string(), v.version_number()),
                        v.clone());
        }
        Ok(())
    }
}
