//! Política de reintentos: clasifica errores y calcula el backoff.

use std::time::Duration;

use crate::constants::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS};
use crate::errors::{ErrorClass, EtlError};

/// Qué hacer tras un fallo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reintentar tras esperar el retardo indicado.
    Retry(Duration),
    /// Error de registro: a cuarentena, el lote continúa.
    Quarantine,
    /// Sin reintento: el step falla.
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Intentos totales, incluido el primero.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: DEFAULT_MAX_ATTEMPTS,
               base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
               max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS) }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1),
               base_delay,
               max_delay }
    }

    /// Política sin esperas, útil en tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Sin reintentos.
    pub fn none() -> Self {
        Self::immediate(1)
    }

    pub fn classify(&self, error: &EtlError) -> ErrorClass {
        error.class()
    }

    /// Retardo antes del reintento que sigue al intento `attempt` (1-based):
    /// `base * 2^(attempt-1)`, acotado por `max_delay`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exp;
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Como `next_delay`, pero respeta el `retry_after` de un rate limit.
    pub fn delay_for(&self, error: &EtlError, attempt: u32) -> Duration {
        match error {
            EtlError::RateLimited { retry_after_ms: Some(ms) } => Duration::from_millis(*ms).min(self.max_delay),
            _ => self.next_delay(attempt),
        }
    }

    /// Decisión tras el fallo número `attempts_so_far`.
    pub fn decide(&self, error: &EtlError, attempts_so_far: u32) -> RetryDecision {
        match self.classify(error) {
            ErrorClass::Transient if attempts_so_far < self.max_attempts => {
                RetryDecision::Retry(self.delay_for(error, attempts_so_far))
            }
            ErrorClass::Transient | ErrorClass::Fatal => RetryDecision::Abort,
            ErrorClass::Validation => RetryDecision::Quarantine,
        }
    }
}
