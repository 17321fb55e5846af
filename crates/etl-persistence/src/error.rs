//! Errores de persistencia.
//! Mapea errores de Diesel / conexión a variantes semánticas y de ahí a la
//! clasificación del motor (`EtlError`), que decide reintentos.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use etl_core::EtlError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("check violation: {0}")]
    CheckViolation(String),
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),
    #[error("not found")]
    NotFound,
    #[error("serialization conflict (retryable)")]
    SerializationConflict,
    /// El estado de la fila no es el que la operación esperaba (p.ej. cerrar
    /// una versión que ya no está vigente).
    #[error("write conflict: {0}")]
    Conflict(String),
    #[error("transient IO / connection pool error: {0}")]
    TransientIo(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("unknown database error: {0}")]
    Unknown(String),
}

impl From<DieselError> for PersistenceError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => Self::NotFound,
            DieselError::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation => Self::UniqueViolation(info.message().to_string()),
                DatabaseErrorKind::CheckViolation => Self::CheckViolation(info.message().to_string()),
                DatabaseErrorKind::ForeignKeyViolation => Self::ForeignKeyViolation(info.message().to_string()),
                DatabaseErrorKind::SerializationFailure => Self::SerializationConflict,
                DatabaseErrorKind::ClosedConnection => Self::TransientIo(info.message().to_string()),
                other => Self::Unknown(format!("db error kind {:?}: {}", other, info.message())),
            },
            DieselError::DeserializationError(e) => Self::Unknown(format!("deser: {e}")),
            DieselError::SerializationError(e) => Self::Unknown(format!("ser: {e}")),
            DieselError::AlreadyInTransaction => Self::Unknown("already in transaction".into()),
            DieselError::RollbackErrorOnCommit { rollback_error, commit_error } => {
                Self::Unknown(format!("rollback={rollback_error}; commit={commit_error}"))
            }
            DieselError::BrokenTransactionManager => Self::TransientIo("broken transaction manager".into()),
            DieselError::QueryBuilderError(e) => Self::Unknown(format!("query builder: {e}")),
            DieselError::RollbackTransaction => Self::Unknown("rollback transaction".into()),
            DieselError::NotInTransaction => Self::Unknown("not in transaction".into()),
            other => Self::Unknown(format!("unhandled diesel error: {other:?}")),
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Unknown(format!("json: {err}"))
    }
}

impl PersistenceError {
    /// Heurística de errores transitorios (recomendado reintentar).
    ///
    /// Algunos mensajes de desconexión llegan como `Unknown` con texto; se
    /// hace best-effort string match sin acoplar a SQLSTATE.
    pub fn is_retryable(&self) -> bool {
        match self {
            PersistenceError::SerializationConflict | PersistenceError::TransientIo(_) => true,
            PersistenceError::Unknown(msg) => {
                let m = msg.to_lowercase();
                m.contains("deadlock detected")
                || m.contains("could not serialize access due to concurrent update")
                || m.contains("terminating connection due to administrator command")
                || m.contains("connection closed")
                || m.contains("connection refused")
                || m.contains("timeout")
            }
            _ => false,
        }
    }
}

impl From<PersistenceError> for EtlError {
    fn from(err: PersistenceError) -> Self {
        if err.is_retryable() {
            return EtlError::TransientIo(err.to_string());
        }
        match err {
            PersistenceError::UniqueViolation(_)
            | PersistenceError::CheckViolation(_)
            | PersistenceError::ForeignKeyViolation(_)
            | PersistenceError::Conflict(_) => EtlError::DataIntegrity(err.to_string()),
            PersistenceError::Configuration(msg) => EtlError::Configuration(msg),
            other => EtlError::Store(other.to_string()),
        }
    }
}
