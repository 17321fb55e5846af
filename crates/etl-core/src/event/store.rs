use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use uuid::Uuid;

use super::{RunEvent, RunEventKind};
use crate::errors::EtlError;

/// Almacenamiento de eventos append-only.
///
/// `append_kind` debe ser durable al retornar: el executor no avanza a los
/// steps dependientes hasta que el estado quedó persistido.
pub trait EventStore: Send + Sync {
    /// Agrega un evento y devuelve el evento completo (con seq y ts).
    fn append_kind(&self, run_id: Uuid, kind: RunEventKind) -> Result<RunEvent, EtlError>;
    /// Eventos de un run en orden ascendente.
    fn list(&self, run_id: Uuid) -> Result<Vec<RunEvent>, EtlError>;
    /// Runs conocidos, en orden de inicio.
    fn run_ids(&self) -> Result<Vec<Uuid>, EtlError>;
}

impl<T: EventStore + ?Sized> EventStore for Arc<T> {
    fn append_kind(&self, run_id: Uuid, kind: RunEventKind) -> Result<RunEvent, EtlError> {
        (**self).append_kind(run_id, kind)
    }
    fn list(&self, run_id: Uuid) -> Result<Vec<RunEvent>, EtlError> {
        (**self).list(run_id)
    }
    fn run_ids(&self) -> Result<Vec<Uuid>, EtlError> {
        (**self).run_ids()
    }
}

#[derive(Default)]
struct Log {
    by_run: HashMap<Uuid, Vec<RunEvent>>,
    order: Vec<Uuid>,
    next_seq: u64,
}

#[derive(Default)]
pub struct InMemoryEventStore {
    inner: Mutex<Log>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for InMemoryEventStore {
    fn append_kind(&self, run_id: Uuid, kind: RunEventKind) -> Result<RunEvent, EtlError> {
        let mut log = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let seq = log.next_seq;
        log.next_seq += 1;
        let ev = RunEvent { seq, run_id, kind, ts: Utc::now() };
        if !log.by_run.contains_key(&run_id) {
            log.order.push(run_id);
        }
        log.by_run.entry(run_id).or_default().push(ev.clone());
        Ok(ev)
    }

    fn list(&self, run_id: Uuid) -> Result<Vec<RunEvent>, EtlError> {
        let log = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        Ok(log.by_run.get(&run_id).cloned().unwrap_or_default())
    }

    fn run_ids(&self) -> Result<Vec<Uuid>, EtlError> {
        let log = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        Ok(log.order.clone())
    }
}
