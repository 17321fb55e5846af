use devops_etl::config::AppConfig;
use devops_etl::logging;
use devops_etl::runner::{build_pipeline, fixture_sources, options_from, run_blocking, Backend, RunnerError};
use etl_core::CancellationToken;
use log::{info, warn};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        // El logger puede no estar instalado si falló la configuración.
        eprintln!("etl-runner failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), RunnerError> {
    let cfg = AppConfig::from_env()?;
    logging::init(&cfg.log_level);
    info!("backend={}",
          if cfg.database_url.is_some() { "postgres" } else { "in-memory" });

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("ctrl-c received; cancelling run at the next checkpoint");
            on_signal.cancel();
        }
    });

    // El pipeline es síncrono (rayon por dentro): corre fuera del runtime.
    let job = tokio::task::spawn_blocking(move || {
                  let backend = Backend::from_config(&cfg)?;
                  let pipeline = build_pipeline(fixture_sources(), &backend.stores, &options_from(&cfg))?;
                  info!("pipeline hash={} steps={}", pipeline.definition_hash(), pipeline.order().join(","));
                  let run = run_blocking(&backend, &pipeline, &cancel)?;
                  Ok::<_, RunnerError>(run)
              }).await
                .map_err(|e| RunnerError::Task(e.to_string()))??;

    info!("run_id={} status={}", job.run_id, job.status.as_str());
    for (step, state) in &job.step_states {
        info!("  {step}: {:?} attempts={}", state.status, state.attempt_count);
    }
    Ok(())
}
