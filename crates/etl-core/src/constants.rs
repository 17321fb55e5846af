//! Constantes del motor de pipelines.

/// Versión lógica del executor. Forma parte del hash de definición: un run
/// iniciado por otra versión del executor no se reanuda con esta.
pub const ENGINE_VERSION: &str = "E1.0";

/// Intentos por defecto ante errores transitorios (incluye el primero).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Retardo base del backoff exponencial (ms).
pub const DEFAULT_BASE_DELAY_MS: u64 = 5_000;

/// Tope del backoff (ms).
pub const DEFAULT_MAX_DELAY_MS: u64 = 60_000;
