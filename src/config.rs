//! Configuración central del runner.
//! Carga variables de entorno (.env una sola vez) y las valida; un valor
//! numérico inválido es un error de configuración, no un default silencioso.

use std::env;
use std::time::Duration;

use dotenvy::dotenv;
use etl_core::constants::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS};
use etl_core::RetryPolicy;
use once_cell::sync::Lazy;
use thiserror::Error;

static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv();
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} inválido: {value}")]
    Invalid { var: &'static str, value: String },
}

/// Configuración de la aplicación.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub retry: RetryPolicy,
    pub batch_size: usize,
    pub log_level: String,
    /// Si está presente se usa Postgres; si no, stores en memoria.
    pub database_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Lazy::force(&DOTENV_LOADED);
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Igual que `from_env` pero con una fuente de variables inyectable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
        where F: Fn(&str) -> Option<String>
    {
        let max_attempts = parse_or(&lookup, "ETL_RETRY_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        let base_delay_ms = parse_or(&lookup, "ETL_RETRY_BASE_DELAY_MS", DEFAULT_BASE_DELAY_MS)?;
        let max_delay_ms = parse_or(&lookup, "ETL_RETRY_MAX_DELAY_MS", DEFAULT_MAX_DELAY_MS)?;
        let batch_size: usize = parse_or(&lookup, "ETL_BATCH_SIZE", 100)?;
        if batch_size == 0 {
            return Err(ConfigError::Invalid { var: "ETL_BATCH_SIZE",
                                              value: "0".into() });
        }
        let log_level = lookup("ETL_LOG_LEVEL").filter(|v| !v.trim().is_empty())
                                               .unwrap_or_else(|| "info".to_string());
        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());
        Ok(Self { retry: RetryPolicy::new(max_attempts,
                                          Duration::from_millis(base_delay_ms),
                                          Duration::from_millis(max_delay_ms)),
                  batch_size,
                  log_level,
                  database_url })
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
    where F: Fn(&str) -> Option<String>,
          T: std::str::FromStr
{
    match lookup(var) {
        Some(raw) => raw.trim()
                        .parse()
                        .map_err(|_| ConfigError::Invalid { var, value: raw }),
        None => Ok(default),
    }
}
