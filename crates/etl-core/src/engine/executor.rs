//! `StepPipeline`: ejecución en oleadas de steps listos.
//!
//! Cada oleada contiene los steps `Pending` cuyas dependencias terminaron en
//! `Succeeded`; se ejecutan en paralelo con rayon. Tras cada oleada los
//! dependientes de steps fallidos u omitidos pasan a `Skipped`. Todo cambio
//! de estado se persiste en el `JobTracker` antes de planificar la oleada
//! siguiente.

use std::collections::{BTreeMap, BTreeSet};

use log::{error, info, warn};
use rayon::prelude::*;
use serde_json::json;

use super::graph::{ancestors, topo_sort};
use crate::cancel::CancellationToken;
use crate::constants::ENGINE_VERSION;
use crate::errors::EtlError;
use crate::hashing::hash_value;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::step::{Checkpoint, PipelineStep, StepContext};
use crate::tracker::{JobRun, JobTracker, RunStatus, StepState, StepStatus};

#[derive(Debug)]
pub struct StepPipeline {
    /// Steps en orden topológico.
    steps: Vec<PipelineStep>,
    ancestors: BTreeMap<String, BTreeSet<String>>,
    definition_hash: String,
    retry: RetryPolicy,
}

impl StepPipeline {
    pub fn new(steps: Vec<PipelineStep>) -> Result<Self, EtlError> {
        Self::with_retry(steps, RetryPolicy::default())
    }

    /// # Errores
    /// `DuplicateStep`, `UnknownDependency` o `CyclicDependency` si el grafo
    /// no es válido.
    pub fn with_retry(steps: Vec<PipelineStep>, retry: RetryPolicy) -> Result<Self, EtlError> {
        let order = topo_sort(&steps)?;
        let mut slots: Vec<Option<PipelineStep>> = steps.into_iter().map(Some).collect();
        let steps: Vec<PipelineStep> = order.into_iter().filter_map(|i| slots[i].take()).collect();
        let ancestors = ancestors(&steps);
        let definition_hash = definition_hash(&steps);
        Ok(Self { steps,
                  ancestors,
                  definition_hash,
                  retry })
    }

    pub fn definition_hash(&self) -> &str {
        &self.definition_hash
    }

    /// Nombres de los steps en orden de ejecución.
    pub fn order(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    /// Ejecuta el pipeline, o lo reanuda si se pasa `resume_from`.
    ///
    /// Al reanudar, los steps `Succeeded` no se vuelven a ejecutar y su
    /// checkpoint se reutiliza; el resto vuelve a `Pending` conservando su
    /// checkpoint parcial y su contador de intentos.
    ///
    /// # Errores
    /// - `Configuration` si `resume_from` pertenece a otra definición o ya
    ///   terminó.
    /// - Cualquier error del tracker (el estado no pudo persistirse).
    ///
    /// Los fallos de los steps no son errores: quedan en `step_states` y en
    /// el estado final del run.
    pub fn run(&self,
               tracker: &dyn JobTracker,
               resume_from: Option<JobRun>,
               cancel: &CancellationToken)
               -> Result<JobRun, EtlError> {
        let mut run = match resume_from {
            Some(previous) => self.prepare_resume(tracker, previous)?,
            None => tracker.start(&self.definition_hash, &self.step_names())?,
        };
        let run_id = run.run_id;
        tracker.record_status(run_id, RunStatus::Running)?;
        run.status = RunStatus::Running;
        info!("run running run_id={} steps={}", run_id, self.steps.len());

        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.skip_blocked(tracker, &mut run)?;
            let ready: Vec<&PipelineStep> = self.steps
                                                .iter()
                                                .filter(|s| self.is_ready(&run, s))
                                                .collect();
            if ready.is_empty() {
                break;
            }
            let snapshot = &run;
            let outcomes: Vec<(String, StepState)> =
                ready.par_iter()
                     .map(|step| self.execute(tracker, snapshot, step, cancel).map(|st| (step.name.clone(), st)))
                     .collect::<Result<_, _>>()?;
            for (name, state) in outcomes {
                run.step_states.insert(name, state);
            }
        }

        let status = self.final_status(&run, cancel);
        tracker.record_status(run_id, status)?;
        match status {
            RunStatus::Succeeded => info!("run finished run_id={} status={}", run_id, status.as_str()),
            _ => warn!("run finished run_id={} status={}", run_id, status.as_str()),
        }
        tracker.load(run_id)
    }

    fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name.clone()).collect()
    }

    fn prepare_resume(&self, tracker: &dyn JobTracker, mut run: JobRun) -> Result<JobRun, EtlError> {
        if run.pipeline_hash != self.definition_hash {
            return Err(EtlError::Configuration(format!("run {} was created by a different pipeline definition",
                                                       run.run_id)));
        }
        if run.is_terminal() {
            return Err(EtlError::Configuration(format!("run {} already finished with status {}",
                                                       run.run_id,
                                                       run.status.as_str())));
        }
        for step in &self.steps {
            let state = run.step_states.entry(step.name.clone()).or_default();
            if matches!(state.status, StepStatus::Running | StepStatus::Failed | StepStatus::Skipped) {
                *state = state.with_status(StepStatus::Pending);
                tracker.record_step(run.run_id, &step.name, state)?;
            }
        }
        info!("resuming run_id={} succeeded={:?}",
              run.run_id,
              run.step_states
                 .iter()
                 .filter(|(_, s)| s.status == StepStatus::Succeeded)
                 .map(|(n, _)| n.as_str())
                 .collect::<Vec<_>>());
        Ok(run)
    }

    fn is_ready(&self, run: &JobRun, step: &PipelineStep) -> bool {
        run.step_status(&step.name) == Some(StepStatus::Pending)
        && step.depends_on
               .iter()
               .all(|d| run.step_status(d) == Some(StepStatus::Succeeded))
    }

    /// Marca `Skipped` los steps pendientes con alguna dependencia fallida u
    /// omitida. El orden topológico propaga el salto transitivamente.
    fn skip_blocked(&self, tracker: &dyn JobTracker, run: &mut JobRun) -> Result<(), EtlError> {
        for step in &self.steps {
            if run.step_status(&step.name) != Some(StepStatus::Pending) {
                continue;
            }
            let blocked = step.depends_on
                              .iter()
                              .find(|d| matches!(run.step_status(d), Some(StepStatus::Failed | StepStatus::Skipped)));
            if let Some(dep) = blocked {
                let skipped = StepState { status: StepStatus::Skipped,
                                          last_error: Some(format!("dependency '{dep}' did not succeed")),
                                          ..run.step(&step.name).cloned().unwrap_or_default() };
                tracker.record_step(run.run_id, &step.name, &skipped)?;
                warn!("step skipped run_id={} step={} dependency={}", run.run_id, step.name, dep);
                run.step_states.insert(step.name.clone(), skipped);
            }
        }
        Ok(())
    }

    /// Ejecuta un step con su política de reintentos. Sólo devuelve `Err`
    /// si el tracker falla.
    fn execute(&self,
               tracker: &dyn JobTracker,
               run: &JobRun,
               step: &PipelineStep,
               cancel: &CancellationToken)
               -> Result<StepState, EtlError> {
        let run_id = run.run_id;
        let policy = step.retry.unwrap_or(self.retry);
        let prior = run.step(&step.name).cloned().unwrap_or_default();
        let upstream: BTreeMap<String, Checkpoint> =
            self.ancestors
                .get(&step.name)
                .into_iter()
                .flatten()
                .filter_map(|a| run.step(a).and_then(|s| s.checkpoint.clone()).map(|cp| (a.clone(), cp)))
                .collect();

        let mut checkpoint = prior.checkpoint;
        let mut last_error = prior.last_error;
        let mut attempt_count = prior.attempt_count;
        let mut tries = 0u32;
        loop {
            attempt_count += 1;
            tries += 1;
            tracker.record_step(run_id,
                                &step.name,
                                &StepState { status: StepStatus::Running,
                                             attempt_count,
                                             checkpoint: checkpoint.clone(),
                                             last_error: last_error.clone() })?;
            info!("step start run_id={} step={} attempt={}", run_id, step.name, attempt_count);

            let ctx = StepContext::new(run_id, &step.name, attempt_count, checkpoint.clone(), &upstream, cancel, tracker);
            let result = step.action.run(&ctx);
            checkpoint = ctx.checkpoint();

            let err = match result {
                Ok(cp) => {
                    let state = StepState { status: StepStatus::Succeeded,
                                            attempt_count,
                                            checkpoint: Some(cp),
                                            last_error: None };
                    tracker.record_step(run_id, &step.name, &state)?;
                    info!("step succeeded run_id={} step={} attempt={}", run_id, step.name, attempt_count);
                    return Ok(state);
                }
                Err(e) => e,
            };

            if matches!(err, EtlError::Cancelled) && cancel.is_cancelled() {
                return self.park(tracker, run_id, step, attempt_count, checkpoint);
            }
            last_error = Some(err.to_string());
            match policy.decide(&err, tries) {
                RetryDecision::Retry(delay) => {
                    warn!("step retry run_id={} step={} attempt={} delay_ms={} error={}",
                          run_id,
                          step.name,
                          attempt_count,
                          delay.as_millis(),
                          err);
                    if !cancel.sleep(delay) {
                        return self.park(tracker, run_id, step, attempt_count, checkpoint);
                    }
                }
                RetryDecision::Quarantine | RetryDecision::Abort => {
                    let state = StepState { status: StepStatus::Failed,
                                            attempt_count,
                                            checkpoint,
                                            last_error };
                    tracker.record_step(run_id, &step.name, &state)?;
                    error!("step failed run_id={} step={} attempt={} class={:?} error={}",
                           run_id,
                           step.name,
                           attempt_count,
                           err.class(),
                           err);
                    return Ok(state);
                }
            }
        }
    }

    /// Devuelve el step a `Pending` tras una cancelación, conservando el
    /// progreso para la reanudación.
    fn park(&self,
            tracker: &dyn JobTracker,
            run_id: uuid::Uuid,
            step: &PipelineStep,
            attempt_count: u32,
            checkpoint: Option<Checkpoint>)
            -> Result<StepState, EtlError> {
        let state = StepState { status: StepStatus::Pending,
                                attempt_count,
                                checkpoint,
                                last_error: Some(EtlError::Cancelled.to_string()) };
        tracker.record_step(run_id, &step.name, &state)?;
        warn!("step cancelled run_id={} step={}", run_id, step.name);
        Ok(state)
    }

    fn final_status(&self, run: &JobRun, cancel: &CancellationToken) -> RunStatus {
        let all_settled = self.steps
                              .iter()
                              .all(|s| run.step_status(&s.name).is_some_and(|st| st.is_settled()));
        if cancel.is_cancelled() && !all_settled {
            return RunStatus::Cancelled;
        }
        let succeeded = |s: &PipelineStep| run.step_status(&s.name) == Some(StepStatus::Succeeded);
        if self.steps.iter().all(succeeded) {
            RunStatus::Succeeded
        } else if self.steps.iter().any(|s| s.critical && !succeeded(s)) {
            RunStatus::Failed
        } else {
            RunStatus::PartialSuccess
        }
    }
}

/// Hash estable de la definición: nombres, tipos, dependencias, criticidad y
/// parámetros de cada acción. La política de reintentos no participa.
fn definition_hash(steps: &[PipelineStep]) -> String {
    let steps_json: Vec<serde_json::Value> = steps.iter()
                                                  .map(|s| {
                                                      json!({
                                                          "name": s.name,
                                                          "kind": s.kind,
                                                          "depends_on": s.depends_on,
                                                          "critical": s.critical,
                                                          "params": s.action.describe(),
                                                      })
                                                  })
                                                  .collect();
    hash_value(&json!({ "engine_version": ENGINE_VERSION, "steps": steps_json }))
}
