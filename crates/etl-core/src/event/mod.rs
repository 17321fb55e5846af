//! Eventos de ejecución (append-only) y trait EventStore.

mod store;
mod types;

pub use store::{EventStore, InMemoryEventStore};
pub use types::{RunEvent, RunEventKind};
