//! Cableado estándar extract → transform → historize → validate → load por
//! tipo de entidad.
//!
//! Los nombres de step llevan el tipo de entidad como prefijo
//! (`gitlab_users:extract`), de modo que varias entidades pueden convivir en
//! un mismo pipeline y sus extracciones corren en paralelo.

use std::sync::Arc;

use etl_core::{ChangeDetector, EtlError, KeyLocks, PipelineBuilder, PipelineStep, QuarantineSink, RetryPolicy, StepKind,
               StepPipeline, TrackedFields, VersionStore};

use crate::contract::RecordContract;
use crate::sink::VersionSink;
use crate::source::SnapshotSource;
use crate::steps::{ExtractStep, HistorizeStep, LoadStep, TransformStep, ValidateStep};

/// Stores compartidos por todas las entidades de un pipeline.
#[derive(Clone)]
pub struct EtlStores {
    pub versions: Arc<dyn VersionStore>,
    pub quarantine: Arc<dyn QuarantineSink>,
    pub sink: Arc<dyn VersionSink>,
    pub locks: Arc<KeyLocks>,
}

impl EtlStores {
    pub fn new(versions: Arc<dyn VersionStore>, quarantine: Arc<dyn QuarantineSink>, sink: Arc<dyn VersionSink>) -> Self {
        Self { versions,
               quarantine,
               sink,
               locks: Arc::new(KeyLocks::new()) }
    }
}

#[derive(Debug, Clone)]
pub struct EtlOptions {
    pub tracked: TrackedFields,
    pub batch_size: usize,
    pub detect_removals: bool,
    /// Política del step de extracción (el único con IO remoto).
    pub extract_retry: RetryPolicy,
}

impl Default for EtlOptions {
    fn default() -> Self {
        Self { tracked: TrackedFields::All,
               batch_size: 100,
               detect_removals: false,
               extract_retry: RetryPolicy::default() }
    }
}

pub fn step_name(entity_type: &str, stage: &str) -> String {
    format!("{entity_type}:{stage}")
}

/// Los cinco steps de una entidad.
pub fn entity_steps(source: Arc<dyn SnapshotSource>,
                    contract: RecordContract,
                    stores: &EtlStores,
                    options: &EtlOptions)
                    -> Vec<PipelineStep> {
    let entity = contract.entity_type().to_string();
    let extract = step_name(&entity, "extract");
    let transform = step_name(&entity, "transform");
    let historize = step_name(&entity, "historize");
    let validate = step_name(&entity, "validate");
    let load = step_name(&entity, "load");

    let historize_action = HistorizeStep::new(&entity,
                                              Arc::clone(&stores.versions),
                                              Arc::clone(&stores.locks),
                                              ChangeDetector::new(options.tracked.clone()),
                                              &transform).batch_size(options.batch_size)
                                                         .detect_removals(options.detect_removals);

    vec![PipelineStep::new(&extract, StepKind::Extract, ExtractStep::new(source)).with_retry(options.extract_retry),
         PipelineStep::new(&transform,
                           StepKind::Transform,
                           TransformStep::new(contract, Arc::clone(&stores.quarantine), &extract)).depends_on([&extract]),
         PipelineStep::new(&historize, StepKind::Historize, historize_action).depends_on([&transform]),
         PipelineStep::new(&validate,
                           StepKind::Validate,
                           ValidateStep::new(&entity,
                                             Arc::clone(&stores.versions),
                                             &historize,
                                             options.detect_removals)).depends_on([&historize]),
         PipelineStep::new(&load,
                           StepKind::Load,
                           LoadStep::new(&entity,
                                         Arc::clone(&stores.versions),
                                         Arc::clone(&stores.sink),
                                         &historize)).depends_on([&validate]),]
}

/// Pipeline de una sola entidad.
pub fn etl_pipeline(source: Arc<dyn SnapshotSource>,
                    contract: RecordContract,
                    stores: &EtlStores,
                    options: &EtlOptions)
                    -> Result<StepPipeline, EtlError> {
    entity_steps(source, contract, stores, options).into_iter()
                                                   .fold(PipelineBuilder::new(), PipelineBuilder::step)
                                                   .build()
}
