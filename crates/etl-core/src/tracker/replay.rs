//! Implementación event-sourced del `JobTracker`.
//!
//! Cada escritura es un `append_kind` sobre el `EventStore`; `load` aplica
//! un replay lineal de los eventos del run.
use std::collections::BTreeMap;

use log::debug;
use uuid::Uuid;

use super::{JobRun, JobTracker, RunStatus, StepState};
use crate::errors::EtlError;
use crate::event::{EventStore, RunEvent, RunEventKind};

pub struct EventSourcedJobTracker<E: EventStore> {
    store: E,
}

impl<E: EventStore> EventSourcedJobTracker<E> {
    pub fn new(store: E) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &E {
        &self.store
    }

    /// Historia completa de un run (auditoría).
    pub fn events(&self, run_id: Uuid) -> Result<Vec<RunEvent>, EtlError> {
        self.store.list(run_id)
    }
}

/// Reconstruye un `JobRun` a partir de sus eventos.
pub(crate) fn replay(run_id: Uuid, events: &[RunEvent]) -> Result<JobRun, EtlError> {
    let mut iter = events.iter();
    let mut run = match iter.next() {
        Some(RunEvent { kind: RunEventKind::RunStarted { pipeline_hash, steps },
                        ts,
                        .. }) => JobRun { run_id,
                                          pipeline_hash: pipeline_hash.clone(),
                                          started_at: *ts,
                                          finished_at: None,
                                          status: RunStatus::Pending,
                                          step_states: steps.iter()
                                                            .map(|s| (s.clone(), StepState::pending()))
                                                            .collect::<BTreeMap<_, _>>() },
        Some(_) => return Err(EtlError::DataIntegrity(format!("run {run_id}: first event is not run_started"))),
        None => return Err(EtlError::RunNotFound(run_id)),
    };
    for ev in iter {
        match &ev.kind {
            RunEventKind::RunStarted { .. } => {
                return Err(EtlError::DataIntegrity(format!("run {run_id}: duplicate run_started at seq {}", ev.seq)))
            }
            RunEventKind::StepRecorded { step, state } => {
                run.step_states.insert(step.clone(), state.clone());
            }
            RunEventKind::RunStatusChanged { status } => {
                run.status = *status;
                run.finished_at = status.is_terminal().then_some(ev.ts);
            }
        }
    }
    Ok(run)
}

impl<E: EventStore> JobTracker for EventSourcedJobTracker<E> {
    fn start(&self, pipeline_hash: &str, steps: &[String]) -> Result<JobRun, EtlError> {
        let run_id = Uuid::new_v4();
        let ev = self.store.append_kind(run_id,
                                        RunEventKind::RunStarted { pipeline_hash: pipeline_hash.to_string(),
                                                                   steps: steps.to_vec() })?;
        debug!("run started run_id={} pipeline_hash={}", run_id, pipeline_hash);
        replay(run_id, &[ev])
    }

    fn record_step(&self, run_id: Uuid, step: &str, state: &StepState) -> Result<(), EtlError> {
        self.store.append_kind(run_id,
                               RunEventKind::StepRecorded { step: step.to_string(),
                                                            state: state.clone() })?;
        Ok(())
    }

    fn record_status(&self, run_id: Uuid, status: RunStatus) -> Result<(), EtlError> {
        self.store.append_kind(run_id, RunEventKind::RunStatusChanged { status })?;
        Ok(())
    }

    fn load(&self, run_id: Uuid) -> Result<JobRun, EtlError> {
        replay(run_id, &self.store.list(run_id)?)
    }

    fn latest_incomplete(&self) -> Result<Option<JobRun>, EtlError> {
        for run_id in self.store.run_ids()?.into_iter().rev() {
            let run = self.load(run_id)?;
            if !run.is_terminal() {
                return Ok(Some(run));
            }
        }
        Ok(None)
    }
}
