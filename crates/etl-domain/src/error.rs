use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errores del modelo de dominio (snapshots y versiones históricas).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("snapshot inválido: {0}")]
    InvalidSnapshot(String),

    #[error("versión inválida para {business_key}: {reason}")]
    InvalidVersion { business_key: String, reason: String },

    #[error("la versión {version_number} de {business_key} ya está cerrada")]
    AlreadyClosed { business_key: String, version_number: i64 },

    #[error("cierre fuera de orden para {business_key}: valid_to={valid_to} <= valid_from={valid_from}")]
    NonPositiveInterval {
        business_key: String,
        valid_from: DateTime<Utc>,
        valid_to: DateTime<Utc>,
    },
}
