//! HistorizeStep: detecta cambios y aplica el historizado SCD tipo 2 clave
//! por clave.
//!
//! - Las claves se procesan en lotes de `batch_size`; dentro de un lote, en
//!   paralelo (rayon). Las operaciones de una misma clave se aplican en el
//!   orden de extracción y bajo el lock de la clave.
//! - Tras cada lote se guarda el progreso; un reintento o una reanudación no
//!   vuelve a procesar las claves ya registradas.
//! - Antes de cada lote se persisten sus claves como "en curso". Un commit
//!   durable cuyo ack se perdió no vuelve a escribir al reintentar (el
//!   detector ve `Unchanged`), pero la clave sigue contando como tocada para
//!   validate y load.
//! - La cancelación se consulta entre lotes, nunca entre un Close y su Insert.
//! - Un `TemporalOrdering` salta sólo esa clave.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use etl_core::{ChangeDetector, Checkpoint, CommitOutcome, EtlError, Historizer, KeyLocks, StepAction, StepContext,
               VersionStore};
use etl_domain::{EntitySnapshot, WriteBatch};
use indexmap::IndexMap;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::TransformCheckpoint;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorizeStats {
    pub keys: usize,
    pub inserted: usize,
    pub closed: usize,
    pub unchanged: usize,
    /// Claves saltadas por `TemporalOrdering`.
    pub skipped: usize,
    /// Batches que el store ya tenía aplicados (re-ejecución).
    pub already_applied: usize,
}

/// Checkpoint parcial y final del step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorizeProgress {
    pub processed_keys: BTreeSet<String>,
    /// Claves con alguna escritura en este run.
    pub touched_keys: BTreeSet<String>,
    /// Claves del lote en curso al guardar; las que sigan aquí al reanudar
    /// pueden tener escrituras ya aplicadas.
    #[serde(default)]
    pub in_flight_keys: BTreeSet<String>,
    pub operation_ids: Vec<String>,
    pub stats: HistorizeStats,
}

pub struct HistorizeStep {
    entity_type: String,
    store: Arc<dyn VersionStore>,
    locks: Arc<KeyLocks>,
    detector: ChangeDetector,
    historizer: Historizer,
    batch_size: usize,
    detect_removals: bool,
    transform_step: String,
}

const NO_SNAPSHOTS: &[&EntitySnapshot] = &[];

/// Resultado de procesar una clave.
#[derive(Default)]
struct KeyOutcome {
    inserted: usize,
    closed: usize,
    unchanged: usize,
    already_applied: usize,
    operation_ids: Vec<String>,
}

impl HistorizeStep {
    pub fn new(entity_type: impl Into<String>,
               store: Arc<dyn VersionStore>,
               locks: Arc<KeyLocks>,
               detector: ChangeDetector,
               transform_step: impl Into<String>)
               -> Self {
        Self { entity_type: entity_type.into(),
               store,
               locks,
               detector,
               historizer: Historizer::new(),
               batch_size: 100,
               detect_removals: false,
               transform_step: transform_step.into() }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Cierra las claves vigentes ausentes del lote. Sólo tiene sentido con
    /// extracciones completas.
    pub fn detect_removals(mut self, enabled: bool) -> Self {
        self.detect_removals = enabled;
        self
    }

    fn process_key(&self, key: &str, snapshots: &[&EntitySnapshot], removal_at: DateTime<Utc>) -> Result<KeyOutcome, EtlError> {
        self.locks.with_key(&self.entity_type, key, || {
                      let mut outcome = KeyOutcome::default();
                      if snapshots.is_empty() {
                          let previous = self.store.latest(&self.entity_type, key)?;
                          let verdict = self.detector.detect(previous.as_ref(), None);
                          let batch = self.historizer.apply(&verdict, previous.as_ref(), None, removal_at)?;
                          self.commit(&batch, &mut outcome)?;
                      }
                      for snapshot in snapshots.iter().copied() {
                          let previous = self.store.latest(&self.entity_type, key)?;
                          let verdict = self.detector.detect(previous.as_ref(), Some(snapshot));
                          let batch = self.historizer
                                          .apply(&verdict, previous.as_ref(), Some(snapshot), snapshot.extracted_at())?;
                          self.commit(&batch, &mut outcome)?;
                      }
                      Ok(outcome)
                  })
    }

    fn commit(&self, batch: &WriteBatch, outcome: &mut KeyOutcome) -> Result<(), EtlError> {
        match self.store.commit(batch)? {
            CommitOutcome::Empty => outcome.unchanged += 1,
            CommitOutcome::AlreadyApplied => outcome.already_applied += 1,
            CommitOutcome::Applied => {
                outcome.inserted += batch.inserts().count();
                outcome.closed += batch.closes();
                outcome.operation_ids
                       .extend(batch.operation_ids().into_iter().map(|id| id.to_string()));
            }
        }
        Ok(())
    }
}

impl StepAction for HistorizeStep {
    fn run(&self, ctx: &StepContext<'_>) -> Result<Checkpoint, EtlError> {
        let input: TransformCheckpoint = ctx.upstream(&self.transform_step)?.decode()?;
        let mut progress: HistorizeProgress = match ctx.checkpoint() {
            Some(cp) => cp.decode().unwrap_or_else(|e| {
                                       warn!("historize progress discarded run_id={} entity={} error={}",
                                             ctx.run_id(),
                                             self.entity_type,
                                             e);
                                       HistorizeProgress::default()
                                   }),
            None => HistorizeProgress::default(),
        };
        let recovered = std::mem::take(&mut progress.in_flight_keys);
        if !progress.processed_keys.is_empty() {
            info!("historize resuming run_id={} entity={} processed={}",
                  ctx.run_id(),
                  self.entity_type,
                  progress.processed_keys.len());
        }

        let mut by_key: IndexMap<&str, Vec<&EntitySnapshot>> = IndexMap::new();
        for snapshot in &input.snapshots {
            by_key.entry(snapshot.business_key()).or_default().push(snapshot);
        }
        let removed_keys: Vec<String> = if self.detect_removals {
            self.store
                .current_keys(&self.entity_type)?
                .into_iter()
                .filter(|k| !by_key.contains_key(k.as_str()))
                .collect()
        } else {
            Vec::new()
        };
        let pending: Vec<(&str, &[&EntitySnapshot])> =
            by_key.iter()
                  .map(|(k, snaps)| (*k, snaps.as_slice()))
                  .chain(removed_keys.iter().map(|k| (k.as_str(), NO_SNAPSHOTS)))
                  .filter(|(k, _)| !progress.processed_keys.contains(*k))
                  .collect();

        for chunk in pending.chunks(self.batch_size) {
            ctx.check_cancelled()?;
            progress.in_flight_keys = chunk.iter().map(|(k, _)| k.to_string()).collect();
            let unfinished: Vec<String> = recovered.iter()
                                                   .filter(|k| !progress.processed_keys.contains(*k))
                                                   .cloned()
                                                   .collect();
            progress.in_flight_keys.extend(unfinished);
            ctx.save_progress(Checkpoint::encode(&progress)?)?;
            let results: Vec<(&str, Result<KeyOutcome, EtlError>)> =
                chunk.par_iter()
                     .map(|(key, snaps)| (*key, self.process_key(key, snaps, input.extracted_at)))
                     .collect();

            let mut fatal = None;
            for (key, result) in results {
                match result {
                    Ok(outcome) => {
                        if !outcome.operation_ids.is_empty() || recovered.contains(key) {
                            progress.touched_keys.insert(key.to_string());
                        }
                        progress.stats.inserted += outcome.inserted;
                        progress.stats.closed += outcome.closed;
                        progress.stats.unchanged += outcome.unchanged;
                        progress.stats.already_applied += outcome.already_applied;
                        progress.operation_ids.extend(outcome.operation_ids);
                        progress.processed_keys.insert(key.to_string());
                    }
                    Err(EtlError::TemporalOrdering { at, bound, .. }) => {
                        warn!("historize skipped key run_id={} entity={} key={} at={} bound={}",
                              ctx.run_id(),
                              self.entity_type,
                              key,
                              at,
                              bound);
                        progress.stats.skipped += 1;
                        progress.processed_keys.insert(key.to_string());
                    }
                    Err(e) => {
                        fatal.get_or_insert(e);
                    }
                }
            }
            progress.stats.keys = progress.processed_keys.len();
            let processed = &progress.processed_keys;
            progress.in_flight_keys.retain(|k| !processed.contains(k));
            ctx.save_progress(Checkpoint::encode(&progress)?)?;
            debug!("historize batch run_id={} entity={} processed={}/{}",
                   ctx.run_id(),
                   self.entity_type,
                   progress.processed_keys.len(),
                   by_key.len() + removed_keys.len());
            if let Some(e) = fatal {
                return Err(e);
            }
        }

        info!("historized run_id={} entity={} keys={} inserted={} closed={} unchanged={} skipped={}",
              ctx.run_id(),
              self.entity_type,
              progress.stats.keys,
              progress.stats.inserted,
              progress.stats.closed,
              progress.stats.unchanged,
              progress.stats.skipped);
        Checkpoint::encode(&progress)
    }

    fn describe(&self) -> Value {
        json!({
            "entity_type": self.entity_type,
            "tracked": self.detector.tracked(),
            "detect_removals": self.detect_removals,
        })
    }
}
