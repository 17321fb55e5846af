//! Executor de pipelines: validación del grafo, orden topológico y
//! ejecución reanudable.

mod builder;
mod executor;
mod graph;

pub use builder::PipelineBuilder;
pub use executor::StepPipeline;
