use tracing_subscriber::EnvFilter;

/// Instala `tracing-subscriber` con `RUST_LOG` o, si no está, el nivel dado.
/// Los registros del facade `log` de las librerías llegan por el puente
/// `tracing-log`.
pub fn init(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let _ = tracing_subscriber::fmt().with_env_filter(env_filter)
                                     .with_target(false)
                                     .try_init();
}
