use chrono::{DateTime, Utc};
use diesel::prelude::*;
use etl_core::{CommitOutcome, EtlError, VersionStore};
use etl_domain::{Attributes, DimensionVersion, WriteBatch, WriteOp};
use log::debug;
use serde_json::Value;

use super::{with_retry, ConnectionProvider};
use crate::error::PersistenceError;
use crate::schema::{applied_operations, dimension_versions};

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = dimension_versions)]
struct VersionRow {
    entity_type: String,
    business_key: String,
    version_number: i64,
    attributes: Value,
    valid_from: DateTime<Utc>,
    valid_to: Option<DateTime<Utc>>,
    is_current: bool,
}

impl VersionRow {
    fn into_version(self) -> Result<DimensionVersion, PersistenceError> {
        let attributes: Attributes = serde_json::from_value(self.attributes)?;
        DimensionVersion::from_parts(self.entity_type,
                                     self.business_key,
                                     self.version_number,
                                     attributes,
                                     self.valid_from,
                                     self.valid_to.into(),
                                     self.is_current).map_err(|e| PersistenceError::CheckViolation(e.to_string()))
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = dimension_versions)]
struct NewVersionRow<'a> {
    entity_type: &'a str,
    business_key: &'a str,
    version_number: i64,
    attributes: Value,
    valid_from: DateTime<Utc>,
    valid_to: Option<DateTime<Utc>>,
    is_current: bool,
}

impl<'a> NewVersionRow<'a> {
    fn from_version(v: &'a DimensionVersion) -> Result<Self, PersistenceError> {
        Ok(Self { entity_type: v.entity_type(),
                  business_key: v.business_key(),
                  version_number: v.version_number(),
                  attributes: serde_json::to_value(v.attributes())?,
                  valid_from: v.valid_from(),
                  valid_to: v.valid_to().closed_at(),
                  is_current: v.is_current() })
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = applied_operations)]
struct NewAppliedRow<'a> {
    operation_id: &'a str,
}

/// `VersionStore` sobre Postgres.
///
/// `commit` aplica el batch entero en una transacción: registra los ids de
/// operación en `applied_operations` junto con las filas, de modo que un
/// batch re-ejecutado tras un crash se detecta y se descarta.
pub struct PgVersionStore<P: ConnectionProvider> {
    provider: P,
}

impl<P: ConnectionProvider> PgVersionStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    fn load_history(&self, entity_type: &str, business_key: &str) -> Result<Vec<DimensionVersion>, PersistenceError> {
        let rows: Vec<VersionRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            dimension_versions::table.filter(dimension_versions::entity_type.eq(entity_type))
                                     .filter(dimension_versions::business_key.eq(business_key))
                                     .order(dimension_versions::version_number.asc())
                                     .select(VersionRow::as_select())
                                     .load(&mut conn)
                                     .map_err(PersistenceError::from)
        })?;
        rows.into_iter().map(VersionRow::into_version).collect()
    }
}

fn apply_op(tx: &mut PgConnection, op: &WriteOp) -> Result<(), PersistenceError> {
    match op {
        WriteOp::Close { entity_type,
                         business_key,
                         version_number,
                         valid_to,
                         .. } => {
            let updated = diesel::update(dimension_versions::table.filter(dimension_versions::entity_type.eq(entity_type))
                                                                  .filter(dimension_versions::business_key.eq(business_key))
                                                                  .filter(dimension_versions::version_number.eq(*version_number))
                                                                  .filter(dimension_versions::is_current.eq(true))
                                                                  .filter(dimension_versions::valid_from.lt(*valid_to)))
                .set((dimension_versions::valid_to.eq(Some(*valid_to)), dimension_versions::is_current.eq(false)))
                .execute(tx)?;
            if updated != 1 {
                return Err(PersistenceError::Conflict(format!("close of {business_key} v{version_number}: not the current version")));
            }
        }
        WriteOp::Insert { version, .. } => {
            let latest: Option<VersionRow> =
                dimension_versions::table.filter(dimension_versions::entity_type.eq(version.entity_type()))
                                         .filter(dimension_versions::business_key.eq(version.business_key()))
                                         .order(dimension_versions::version_number.desc())
                                         .select(VersionRow::as_select())
                                         .for_update()
                                         .first(tx)
                                         .optional()?;
            let expected = latest.as_ref().map(|r| r.version_number + 1).unwrap_or(1);
            if version.version_number() != expected {
                return Err(PersistenceError::Conflict(format!("insert of {} v{}: expected v{expected}",
                                                              version.business_key(),
                                                              version.version_number())));
            }
            if let Some(prev) = &latest {
                match prev.valid_to {
                    None => {
                        return Err(PersistenceError::Conflict(format!("insert of {} v{} while v{} is still current",
                                                                      version.business_key(),
                                                                      version.version_number(),
                                                                      prev.version_number)))
                    }
                    Some(to) if version.valid_from() < to => {
                        return Err(PersistenceError::Conflict(format!("insert of {} v{} overlaps previous version",
                                                                      version.business_key(),
                                                                      version.version_number())))
                    }
                    Some(_) => {}
                }
            }
            diesel::insert_into(dimension_versions::table).values(NewVersionRow::from_version(version)?)
                                                          .execute(tx)?;
        }
    }
    Ok(())
}

impl<P: ConnectionProvider> VersionStore for PgVersionStore<P> {
    fn latest(&self, entity_type: &str, business_key: &str) -> Result<Option<DimensionVersion>, EtlError> {
        let row: Option<VersionRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            dimension_versions::table.filter(dimension_versions::entity_type.eq(entity_type))
                                     .filter(dimension_versions::business_key.eq(business_key))
                                     .order(dimension_versions::version_number.desc())
                                     .select(VersionRow::as_select())
                                     .first(&mut conn)
                                     .optional()
                                     .map_err(PersistenceError::from)
        })?;
        Ok(row.map(VersionRow::into_version).transpose()?)
    }

    fn history(&self, entity_type: &str, business_key: &str) -> Result<Vec<DimensionVersion>, EtlError> {
        Ok(self.load_history(entity_type, business_key)?)
    }

    fn current_keys(&self, entity_type: &str) -> Result<Vec<String>, EtlError> {
        let keys = with_retry(|| {
            let mut conn = self.provider.connection()?;
            dimension_versions::table.filter(dimension_versions::entity_type.eq(entity_type))
                                     .filter(dimension_versions::is_current.eq(true))
                                     .order(dimension_versions::business_key.asc())
                                     .select(dimension_versions::business_key)
                                     .load::<String>(&mut conn)
                                     .map_err(PersistenceError::from)
        })?;
        Ok(keys)
    }

    fn commit(&self, batch: &WriteBatch) -> Result<CommitOutcome, EtlError> {
        if batch.is_empty() {
            return Ok(CommitOutcome::Empty);
        }
        let ids: Vec<&str> = batch.operation_ids().into_iter().map(|id| id.as_str()).collect();
        let outcome = with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction()
                .read_write()
                .run(|tx| {
                    let already: i64 = applied_operations::table.filter(applied_operations::operation_id.eq_any(ids.clone()))
                                                                .count()
                                                                .get_result(tx)?;
                    if already as usize == ids.len() {
                        return Ok(CommitOutcome::AlreadyApplied);
                    }
                    if already > 0 {
                        return Err(PersistenceError::Conflict(format!("batch partially applied ({already}/{} operations)",
                                                                      ids.len())));
                    }
                    for op in batch.ops() {
                        apply_op(tx, op)?;
                    }
                    let applied: Vec<NewAppliedRow<'_>> = ids.iter().map(|id| NewAppliedRow { operation_id: *id }).collect();
                    diesel::insert_into(applied_operations::table).values(&applied)
                                                                  .execute(tx)?;
                    Ok(CommitOutcome::Applied)
                })
        })?;
        debug!("commit ops={} outcome={:?}", ids.len(), outcome);
        Ok(outcome)
    }
}
