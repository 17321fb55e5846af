//! Taxonomía de errores del motor ETL.
//!
//! Cada variante pertenece a una `ErrorClass`, que es lo único que consulta
//! la política de reintentos:
//! - `Transient`: se reintenta con backoff hasta agotar intentos.
//! - `Validation`: error a nivel de registro; se pone en cuarentena y el lote
//!   continúa.
//! - `Fatal`: sin reintento; el step y sus dependientes fallan.

use chrono::{DateTime, Utc};
use etl_domain::DomainError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    Transient,
    Validation,
    Fatal,
}

#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum EtlError {
    #[error("transient io error: {0}")]
    TransientIo(String),
    #[error("rate limited by upstream{}", retry_after_ms.map(|ms| format!(" (retry after {ms}ms)")).unwrap_or_default())]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("authentication error: {0}")]
    Auth(String),
    #[error("temporal ordering violated for {entity_type}/{business_key}: at={at} precedes {bound}")]
    TemporalOrdering {
        entity_type: String,
        business_key: String,
        at: DateTime<Utc>,
        bound: DateTime<Utc>,
    },
    #[error("cyclic dependency between steps: {}", steps.join(", "))]
    CyclicDependency { steps: Vec<String> },
    #[error("step '{step}' depends on unknown step '{missing}'")]
    UnknownDependency { step: String, missing: String },
    #[error("duplicate step name '{0}'")]
    DuplicateStep(String),
    #[error("data integrity violation: {0}")]
    DataIntegrity(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("run {0} not found")]
    RunNotFound(Uuid),
    #[error("cancelled")]
    Cancelled,
    #[error("internal: {0}")]
    Internal(String),
}

impl EtlError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EtlError::TransientIo(_) | EtlError::RateLimited { .. } => ErrorClass::Transient,
            EtlError::Validation(_) => ErrorClass::Validation,
            EtlError::Configuration(_)
            | EtlError::Auth(_)
            | EtlError::TemporalOrdering { .. }
            | EtlError::CyclicDependency { .. }
            | EtlError::UnknownDependency { .. }
            | EtlError::DuplicateStep(_)
            | EtlError::DataIntegrity(_)
            | EtlError::Store(_)
            | EtlError::RunNotFound(_)
            | EtlError::Cancelled
            | EtlError::Internal(_) => ErrorClass::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

impl From<DomainError> for EtlError {
    fn from(e: DomainError) -> Self {
        EtlError::Validation(e.to_string())
    }
}

impl From<serde_json::Error> for EtlError {
    fn from(e: serde_json::Error) -> Self {
        EtlError::Internal(format!("checkpoint (de)serialization: {e}"))
    }
}
