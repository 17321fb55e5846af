use chrono::{DateTime, Utc};
use diesel::prelude::*;
use etl_core::{EtlError, EventStore, RunEvent, RunEventKind};
use log::debug;
use serde_json::Value;
use uuid::Uuid;

use super::{with_retry, ConnectionProvider};
use crate::error::PersistenceError;
use crate::schema::run_events;

/// Fila para insertar en `run_events`. `seq` y `ts` los asigna la base y
/// vuelven vía `RETURNING`.
#[derive(Insertable, Debug)]
#[diesel(table_name = run_events)]
struct NewEventRow<'a> {
    run_id: &'a Uuid,
    event_type: &'a str,
    payload: &'a Value,
}

/// Fila de `run_events`. `payload` guarda el enum `RunEventKind` completo;
/// `event_type` es la pista en minúsculas que valida el CHECK.
#[derive(Queryable, Debug)]
struct EventRow {
    seq: i64,
    run_id: Uuid,
    ts: DateTime<Utc>,
    #[allow(dead_code)]
    event_type: String,
    payload: Value,
}

impl EventRow {
    fn into_event(self) -> Result<RunEvent, PersistenceError> {
        let kind: RunEventKind = serde_json::from_value(self.payload)?;
        Ok(RunEvent { seq: self.seq as u64,
                      run_id: self.run_id,
                      kind,
                      ts: self.ts })
    }
}

#[derive(QueryableByName, Debug)]
struct RunIdRow {
    #[diesel(sql_type = diesel::sql_types::Uuid)]
    run_id: Uuid,
}

/// `EventStore` append-only sobre Postgres. Cada `append_kind` es durable al
/// retornar (transacción propia).
pub struct PgEventStore<P: ConnectionProvider> {
    provider: P,
}

impl<P: ConnectionProvider> PgEventStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl<P: ConnectionProvider> EventStore for PgEventStore<P> {
    fn append_kind(&self, run_id: Uuid, kind: RunEventKind) -> Result<RunEvent, EtlError> {
        let event_type = kind.type_name();
        let payload = serde_json::to_value(&kind)?;
        debug!("append_kind run_id={run_id} type={event_type}");
        let (seq, ts): (i64, DateTime<Utc>) = with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction()
                .read_write()
                .run(|tx| {
                    diesel::insert_into(run_events::table).values(NewEventRow { run_id: &run_id,
                                                                                event_type,
                                                                                payload: &payload })
                                                          .returning((run_events::seq, run_events::ts))
                                                          .get_result(tx)
                })
                .map_err(PersistenceError::from)
        })?;
        Ok(RunEvent { seq: seq as u64,
                      run_id,
                      kind,
                      ts })
    }

    fn list(&self, run_id: Uuid) -> Result<Vec<RunEvent>, EtlError> {
        let rows: Vec<EventRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            run_events::table.filter(run_events::run_id.eq(run_id))
                             .order(run_events::seq.asc())
                             .load(&mut conn)
                             .map_err(PersistenceError::from)
        })?;
        rows.into_iter()
            .map(|row| row.into_event().map_err(EtlError::from))
            .collect()
    }

    fn run_ids(&self) -> Result<Vec<Uuid>, EtlError> {
        let rows: Vec<RunIdRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::sql_query("SELECT run_id FROM run_events GROUP BY run_id ORDER BY MIN(seq)")
                .load(&mut conn)
                .map_err(PersistenceError::from)
        })?;
        Ok(rows.into_iter().map(|r| r.run_id).collect())
    }
}
