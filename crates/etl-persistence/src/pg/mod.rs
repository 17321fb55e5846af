//! Implementaciones Postgres (Diesel) de los contratos de `etl-core`.
//!
//! - `PgEventStore`: log append-only de eventos de runs, orden total por
//!   `seq` (BIGSERIAL). Respalda al `EventSourcedJobTracker`.
//! - `PgVersionStore`: historia SCD2; cada `WriteBatch` se aplica en una sola
//!   transacción junto con sus ids de operación.
//! - `PgQuarantineSink`: registros rechazados.
//!
//! Todas las operaciones se reintentan (backoff corto) ante errores
//! transitorios de conexión o serialización.

mod event_store;
mod quarantine;
mod version_store;

use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use log::{info, warn};

use crate::config::DbConfig;
use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;

pub use event_store::PgEventStore;
pub use quarantine::PgQuarantineSink;
pub use version_store::PgVersionStore;

/// Alias de tipo para el pool r2d2 de conexiones Postgres.
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

pub type PooledConnection = r2d2::PooledConnection<ConnectionManager<PgConnection>>;

/// Proveedor abstracto de conexiones.
///
/// Permite inyectar un pool real o un proveedor de tests sin acoplar los
/// stores a r2d2. Debe devolver una conexión válida o
/// `PersistenceError::TransientIo`.
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<PooledConnection, PersistenceError>;
}

/// `ConnectionProvider` respaldado por un `PgPool`.
#[derive(Clone)]
pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<PooledConnection, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

/// Retry simple con backoff lineal muy pequeño (hasta 3 reintentos).
///
/// - Backoff: 15ms, 30ms, 45ms.
/// - Se emite `warn!` por intento.
///
/// Sólo repite la unidad de trabajo provista por `f`; las transacciones
/// abortadas se revierten completas antes de reintentar.
pub(crate) fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if e.is_retryable() && attempts < 3 => {
                let delay_ms = 15 * ((attempts + 1) as u64);
                warn!("retryable error (attempt {}): {:?} -> sleeping {}ms",
                      attempts + 1,
                      e,
                      delay_ms);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

/// Construye el pool y corre las migraciones pendientes.
///
/// `min` se acota a `max` y ambos a al menos 1.
pub fn build_pool(database_url: &str, min: u32, max: u32) -> Result<PgPool, PersistenceError> {
    let max = max.max(1);
    let min = min.clamp(1, max);
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().min_idle(Some(min))
                                    .max_size(max)
                                    .build(manager)
                                    .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get()
                           .map_err(|e| PersistenceError::TransientIo(format!("pool get: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    info!("postgres pool ready min={min} max={max}");
    Ok(pool)
}

/// Pool a partir de `DbConfig::from_env()`.
pub fn build_pool_from_env() -> Result<PgPool, PersistenceError> {
    let cfg = DbConfig::from_env()?;
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn with_retry_retries_transient_errors() {
        let calls = Cell::new(0);
        let out = with_retry(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(PersistenceError::SerializationConflict)
            } else {
                Ok(7)
            }
        });
        assert_eq!(out.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn with_retry_gives_up_after_three_retries() {
        let calls = Cell::new(0);
        let out: Result<(), _> = with_retry(|| {
            calls.set(calls.get() + 1);
            Err(PersistenceError::TransientIo("down".into()))
        });
        assert!(out.is_err());
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn with_retry_does_not_retry_conflicts() {
        let calls = Cell::new(0);
        let out: Result<(), _> = with_retry(|| {
            calls.set(calls.get() + 1);
            Err(PersistenceError::Conflict("stale".into()))
        });
        assert!(matches!(out, Err(PersistenceError::Conflict(_))));
        assert_eq!(calls.get(), 1);
    }
}
