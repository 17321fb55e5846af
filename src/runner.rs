//! Cableado del runner: stores (memoria o Postgres), pipeline con las
//! entidades de GitLab y selección del run a reanudar.

use std::sync::Arc;

use etl_adapters::{entity_steps, EtlOptions, EtlStores, InMemoryVersionSink, RecordContract, SnapshotSource, StaticSource};
use etl_core::{CancellationToken, EtlError, EventSourcedJobTracker, InMemoryEventStore, InMemoryQuarantine,
               InMemoryVersionStore, JobRun, JobTracker, PipelineBuilder, StepPipeline};
use etl_persistence::pg::{build_pool, PgEventStore, PgQuarantineSink, PgVersionStore, PoolProvider};
use etl_persistence::{DbConfig, PersistenceError};
use log::{info, warn};
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::{AppConfig, ConfigError};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Etl(#[from] EtlError),
    #[error("pipeline task failed: {0}")]
    Task(String),
}

/// Tracker y stores de una ejecución.
pub struct Backend {
    pub tracker: Arc<dyn JobTracker>,
    pub stores: EtlStores,
}

impl Backend {
    pub fn in_memory() -> Self {
        Self { tracker: Arc::new(EventSourcedJobTracker::new(InMemoryEventStore::new())),
               stores: EtlStores::new(Arc::new(InMemoryVersionStore::new()),
                                      Arc::new(InMemoryQuarantine::new()),
                                      Arc::new(InMemoryVersionSink::new())) }
    }

    /// Stores durables; la publicación sigue siendo en memoria.
    pub fn postgres(database_url: &str) -> Result<Self, RunnerError> {
        let defaults = DbConfig::from_env().ok();
        let (min, max) = defaults.map(|c| (c.min_connections, c.max_connections))
                                 .unwrap_or((2, 16));
        let pool = build_pool(database_url, min, max)?;
        let provider = PoolProvider { pool };
        Ok(Self { tracker: Arc::new(EventSourcedJobTracker::new(PgEventStore::new(provider.clone()))),
                  stores: EtlStores::new(Arc::new(PgVersionStore::new(provider.clone())),
                                         Arc::new(PgQuarantineSink::new(provider)),
                                         Arc::new(InMemoryVersionSink::new())) })
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self, RunnerError> {
        match cfg.database_url.as_deref() {
            Some(url) => Self::postgres(url),
            None => Ok(Self::in_memory()),
        }
    }
}

pub fn options_from(cfg: &AppConfig) -> EtlOptions {
    EtlOptions { batch_size: cfg.batch_size,
                 detect_removals: true,
                 extract_retry: cfg.retry,
                 ..EtlOptions::default() }
}

/// Pipeline con usuarios y proyectos: ambas cadenas son independientes y
/// sus steps corren en paralelo.
pub fn build_pipeline(sources: Vec<(Arc<dyn SnapshotSource>, RecordContract)>,
                      stores: &EtlStores,
                      options: &EtlOptions)
                      -> Result<StepPipeline, EtlError> {
    sources.into_iter()
           .flat_map(|(source, contract)| entity_steps(source, contract, stores, options))
           .fold(PipelineBuilder::new().retry(options.extract_retry), PipelineBuilder::step)
           .build()
}

/// Fuentes de ejemplo (estáticas) para el runner.
pub fn fixture_sources() -> Vec<(Arc<dyn SnapshotSource>, RecordContract)> {
    let users: Vec<Value> = vec![json!({"id": 1, "username": "root", "name": "Administrator",
                                        "created_at": "2023-01-10T09:00:00Z", "state": "active"}),
                                 json!({"id": 2, "username": "mgarcia", "name": "María García",
                                        "created_at": "2023-03-02T12:30:00Z", "state": "active"}),
                                 json!({"id": 3, "username": "ci-bot", "name": "CI Bot",
                                        "created_at": "2023-05-21T18:45:00Z", "state": "blocked"}),];
    let projects: Vec<Value> = vec![json!({"id": 10, "name": "platform", "path_with_namespace": "infra/platform",
                                           "default_branch": "main", "archived": false}),
                                    json!({"id": 11, "name": "legacy-api", "path_with_namespace": "apps/legacy-api",
                                           "default_branch": "master", "archived": true}),];
    vec![(Arc::new(StaticSource::new("gitlab-users-fixture", users)), RecordContract::gitlab_users()),
         (Arc::new(StaticSource::new("gitlab-projects-fixture", projects)), RecordContract::gitlab_projects()),]
}

/// Run incompleto reanudable por este pipeline. Un run de otra definición
/// no se reanuda: se registra y se inicia uno nuevo.
pub fn resumable_run(tracker: &dyn JobTracker, pipeline: &StepPipeline) -> Result<Option<JobRun>, EtlError> {
    match tracker.latest_incomplete()? {
        Some(run) if run.pipeline_hash == pipeline.definition_hash() => {
            info!("resuming run_id={} status={}", run.run_id, run.status.as_str());
            Ok(Some(run))
        }
        Some(run) => {
            warn!("incomplete run_id={} belongs to another pipeline definition; starting a new run",
                  run.run_id);
            Ok(None)
        }
        None => Ok(None),
    }
}

/// Ejecuta el pipeline en el hilo actual (bloqueante).
pub fn run_blocking(backend: &Backend,
                    pipeline: &StepPipeline,
                    cancel: &CancellationToken)
                    -> Result<JobRun, EtlError> {
    let resume = resumable_run(backend.tracker.as_ref(), pipeline)?;
    pipeline.run(backend.tracker.as_ref(), resume, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use etl_core::RunStatus;

    #[test]
    fn fixture_pipeline_succeeds_in_memory() {
        let backend = Backend::in_memory();
        let cfg = AppConfig::from_lookup(|_| None).unwrap();
        let pipeline = build_pipeline(fixture_sources(), &backend.stores, &options_from(&cfg)).unwrap();
        assert_eq!(pipeline.order().len(), 10);

        let run = run_blocking(&backend, &pipeline, &CancellationToken::new()).unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(backend.stores.versions.current_keys("gitlab_users").unwrap().len(), 3);
        assert_eq!(backend.stores.versions.current_keys("gitlab_projects").unwrap().len(), 2);
    }

    #[test]
    fn cancelled_run_is_resumed_on_next_start() {
        let backend = Backend::in_memory();
        let cfg = AppConfig::from_lookup(|_| None).unwrap();
        let pipeline = build_pipeline(fixture_sources(), &backend.stores, &options_from(&cfg)).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let first = run_blocking(&backend, &pipeline, &cancel).unwrap();
        assert_eq!(first.status, RunStatus::Cancelled);

        let second = run_blocking(&backend, &pipeline, &CancellationToken::new()).unwrap();
        assert_eq!(second.run_id, first.run_id);
        assert_eq!(second.status, RunStatus::Succeeded);
    }
}
