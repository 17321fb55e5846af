use etl_persistence::config::DbConfig;
use etl_persistence::pg::{build_pool, PgPool, PoolProvider};
use once_cell::sync::Lazy;

pub static TEST_POOL: Lazy<Option<PgPool>> = Lazy::new(|| {
    let cfg = DbConfig::from_env().ok()?;
    match build_pool(&cfg.url, 1, 2) {
        Ok(p) => Some(p),
        Err(e) => {
            eprintln!("No se pudo construir pool de test: {e}");
            None
        }
    }
});

/// Provider sobre el pool compartido, o None (test se salta) sin DATABASE_URL.
pub fn provider() -> Option<PoolProvider> {
    match TEST_POOL.as_ref() {
        Some(pool) => Some(PoolProvider { pool: pool.clone() }),
        None => {
            eprintln!("DATABASE_URL not set - skipping postgres test");
            None
        }
    }
}
