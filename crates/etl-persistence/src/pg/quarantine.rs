use chrono::{DateTime, Utc};
use diesel::prelude::*;
use etl_core::{EtlError, QuarantineSink, QuarantinedRecord};
use log::warn;
use serde_json::Value;
use uuid::Uuid;

use super::{with_retry, ConnectionProvider};
use crate::error::PersistenceError;
use crate::schema::quarantined_records;

#[derive(Insertable, Debug)]
#[diesel(table_name = quarantined_records)]
struct NewQuarantineRow<'a> {
    run_id: Uuid,
    step: &'a str,
    entity_type: &'a str,
    record_key: Option<&'a str>,
    detail: &'a str,
    payload: &'a Value,
    quarantined_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = quarantined_records)]
struct QuarantineRow {
    run_id: Uuid,
    step: String,
    entity_type: String,
    record_key: Option<String>,
    detail: String,
    payload: Value,
    quarantined_at: DateTime<Utc>,
}

impl From<QuarantineRow> for QuarantinedRecord {
    fn from(row: QuarantineRow) -> Self {
        QuarantinedRecord { run_id: row.run_id,
                            step: row.step,
                            entity_type: row.entity_type,
                            record_key: row.record_key,
                            detail: row.detail,
                            payload: row.payload,
                            quarantined_at: row.quarantined_at }
    }
}

pub struct PgQuarantineSink<P: ConnectionProvider> {
    provider: P,
}

impl<P: ConnectionProvider> PgQuarantineSink<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl<P: ConnectionProvider> QuarantineSink for PgQuarantineSink<P> {
    fn quarantine(&self, record: QuarantinedRecord) -> Result<(), EtlError> {
        warn!("quarantined run_id={} step={} key={} detail={}",
              record.run_id,
              record.step,
              record.record_key.as_deref().unwrap_or("-"),
              record.detail);
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(quarantined_records::table).values(NewQuarantineRow { run_id: record.run_id,
                                                                                      step: &record.step,
                                                                                      entity_type: &record.entity_type,
                                                                                      record_key: record.record_key.as_deref(),
                                                                                      detail: &record.detail,
                                                                                      payload: &record.payload,
                                                                                      quarantined_at: record.quarantined_at })
                                                           .execute(&mut conn)
                                                           .map_err(PersistenceError::from)
        })?;
        Ok(())
    }

    fn list(&self, run_id: Uuid) -> Result<Vec<QuarantinedRecord>, EtlError> {
        let rows: Vec<QuarantineRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            quarantined_records::table.filter(quarantined_records::run_id.eq(run_id))
                                      .order(quarantined_records::id.asc())
                                      .select(QuarantineRow::as_select())
                                      .load(&mut conn)
                                      .map_err(PersistenceError::from)
        })?;
        Ok(rows.into_iter().map(QuarantinedRecord::from).collect())
    }
}
