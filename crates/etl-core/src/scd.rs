//! Historizador SCD tipo 2.
//!
//! Traduce un `ChangeVerdict` en el `WriteBatch` que preserva la historia:
//!
//! | veredicto | versión previa | operaciones |
//! |---|---|---|
//! | `New` | ninguna | `Insert(v1)` |
//! | `Changed` | vigente | `Close(vN, at)` + `Insert(vN+1)` |
//! | `Changed` | cerrada (reaparición) | `Insert(vN+1)` |
//! | `Removed` | vigente | `Close(vN, at)` |
//! | `Unchanged` | cualquiera | nada |
//!
//! Los ids de operación son deterministas, de modo que repetir el mismo
//! `apply` tras un crash produce el mismo batch y el store lo descarta como
//! ya aplicado.

use chrono::{DateTime, Utc};
use etl_domain::{ChangeVerdict, DimensionVersion, EntitySnapshot, WriteBatch, WriteOp};
use log::debug;

use crate::errors::EtlError;

#[derive(Debug, Clone, Copy, Default)]
pub struct Historizer;

impl Historizer {
    pub fn new() -> Self {
        Self
    }

    /// Calcula las operaciones para una clave.
    ///
    /// # Errores
    /// - `TemporalOrdering` si `at` no es estrictamente posterior al
    ///   `valid_from` vigente (o anterior al cierre en una reaparición). No se
    ///   emite ninguna operación.
    /// - `Internal` si el veredicto no es coherente con las entradas.
    pub fn apply(&self,
                 verdict: &ChangeVerdict,
                 previous: Option<&DimensionVersion>,
                 incoming: Option<&EntitySnapshot>,
                 at: DateTime<Utc>)
                 -> Result<WriteBatch, EtlError> {
        let batch = match verdict {
            ChangeVerdict::Unchanged => WriteBatch::empty(),
            ChangeVerdict::New => {
                if previous.is_some() {
                    return Err(EtlError::Internal("verdict New with an existing version".into()));
                }
                let snapshot = require_incoming(incoming, verdict)?;
                WriteBatch::new(vec![WriteOp::insert(DimensionVersion::first(snapshot, at))])
            }
            ChangeVerdict::Changed { .. } => {
                let prev = require_previous(previous, verdict)?;
                let snapshot = require_incoming(incoming, verdict)?;
                ensure_same_key(prev, snapshot)?;
                if prev.is_current() {
                    ensure_after_valid_from(prev, at)?;
                    WriteBatch::new(vec![close_op(prev, at),
                                         WriteOp::insert(DimensionVersion::successor(prev, snapshot, at))])
                } else {
                    // Reaparición tras una baja: la versión cerrada no se toca.
                    let closed_at = prev.valid_to().closed_at().unwrap_or(prev.valid_from());
                    if at < closed_at {
                        return Err(temporal(prev, at, closed_at));
                    }
                    WriteBatch::new(vec![WriteOp::insert(DimensionVersion::successor(prev, snapshot, at))])
                }
            }
            ChangeVerdict::Removed => {
                let prev = require_previous(previous, verdict)?;
                if !prev.is_current() {
                    WriteBatch::empty()
                } else {
                    ensure_after_valid_from(prev, at)?;
                    WriteBatch::new(vec![close_op(prev, at)])
                }
            }
        };
        if !batch.is_empty() {
            debug!("historize verdict={} ops={} at={}", verdict.label(), batch.len(), at);
        }
        Ok(batch)
    }
}

fn close_op(prev: &DimensionVersion, at: DateTime<Utc>) -> WriteOp {
    WriteOp::close(prev.entity_type(), prev.business_key(), prev.version_number(), at)
}

fn ensure_after_valid_from(prev: &DimensionVersion, at: DateTime<Utc>) -> Result<(), EtlError> {
    if at <= prev.valid_from() {
        return Err(temporal(prev, at, prev.valid_from()));
    }
    Ok(())
}

fn ensure_same_key(prev: &DimensionVersion, snapshot: &EntitySnapshot) -> Result<(), EtlError> {
    if prev.entity_type() != snapshot.entity_type() || prev.business_key() != snapshot.business_key() {
        return Err(EtlError::Internal(format!("snapshot {}/{} applied to history of {}/{}",
                                              snapshot.entity_type(),
                                              snapshot.business_key(),
                                              prev.entity_type(),
                                              prev.business_key())));
    }
    Ok(())
}

fn temporal(prev: &DimensionVersion, at: DateTime<Utc>, bound: DateTime<Utc>) -> EtlError {
    EtlError::TemporalOrdering { entity_type: prev.entity_type().to_string(),
                                 business_key: prev.business_key().to_string(),
                                 at,
                                 bound }
}

fn require_previous<'a>(previous: Option<&'a DimensionVersion>,
                        verdict: &ChangeVerdict)
                        -> Result<&'a DimensionVersion, EtlError> {
    previous.ok_or_else(|| EtlError::Internal(format!("verdict {} without a previous version", verdict.label())))
}

fn require_incoming<'a>(incoming: Option<&'a EntitySnapshot>,
                        verdict: &ChangeVerdict)
                        -> Result<&'a EntitySnapshot, EtlError> {
    incoming.ok_or_else(|| EtlError::Internal(format!("verdict {} without an incoming snapshot", verdict.label())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use etl_domain::{Attributes, ValidTo};
    use serde_json::json;
    use std::collections::BTreeSet;

    fn snap(name: &str) -> EntitySnapshot {
        let mut attrs = Attributes::new();
        attrs.insert("name".into(), json!(name));
        EntitySnapshot::new("users", "K1", attrs, Utc::now()).unwrap()
    }

    fn t(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    fn changed() -> ChangeVerdict {
        ChangeVerdict::Changed { diff_fields: BTreeSet::from(["name".to_string()]) }
    }

    #[test]
    fn new_inserts_version_one() {
        let batch = Historizer::new().apply(&ChangeVerdict::New, None, Some(&snap("a")), t(1)).unwrap();
        let inserted: Vec<_> = batch.inserts().collect();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].version_number(), 1);
        assert_eq!(inserted[0].valid_to(), ValidTo::Open);
        assert_eq!(inserted[0].valid_from(), t(1));
    }

    #[test]
    fn changed_closes_then_inserts_next_version() {
        let v1 = DimensionVersion::first(&snap("a"), t(1));
        let batch = Historizer::new().apply(&changed(), Some(&v1), Some(&snap("b")), t(2)).unwrap();
        match batch.ops() {
            [WriteOp::Close { version_number, valid_to, .. }, WriteOp::Insert { version, .. }] => {
                assert_eq!(*version_number, 1);
                assert_eq!(*valid_to, t(2));
                assert_eq!(version.version_number(), 2);
                assert_eq!(version.valid_from(), t(2));
            }
            other => panic!("unexpected ops: {other:?}"),
        }
    }

    #[test]
    fn changed_with_foreign_key_is_rejected() {
        let v1 = DimensionVersion::first(&snap("a"), t(1));
        let other = EntitySnapshot::new("users", "K2", snap("b").attributes().clone(), Utc::now()).unwrap();
        let err = Historizer::new().apply(&changed(), Some(&v1), Some(&other), t(2)).unwrap_err();
        assert!(matches!(err, EtlError::Internal(ref msg) if msg.contains("K2")));

        let projects = EntitySnapshot::new("projects", "K1", snap("b").attributes().clone(), Utc::now()).unwrap();
        let err = Historizer::new().apply(&changed(), Some(&v1), Some(&projects), t(2)).unwrap_err();
        assert!(matches!(err, EtlError::Internal(_)));
    }

    #[test]
    fn removed_only_closes() {
        let v1 = DimensionVersion::first(&snap("a"), t(1));
        let batch = Historizer::new().apply(&ChangeVerdict::Removed, Some(&v1), None, t(3)).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.closes(), 1);
    }

    #[test]
    fn unchanged_emits_nothing() {
        let v1 = DimensionVersion::first(&snap("a"), t(1));
        let batch = Historizer::new().apply(&ChangeVerdict::Unchanged, Some(&v1), Some(&snap("a")), t(2)).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn earlier_or_equal_timestamp_is_rejected() {
        let v1 = DimensionVersion::first(&snap("a"), t(5));
        for at in [t(4), t(5)] {
            let err = Historizer::new().apply(&changed(), Some(&v1), Some(&snap("b")), at).unwrap_err();
            assert!(matches!(err, EtlError::TemporalOrdering { bound, .. } if bound == t(5)));
        }
    }

    #[test]
    fn reappearance_inserts_without_closing() {
        let v1 = DimensionVersion::first(&snap("a"), t(1)).closed_at(t(2)).unwrap();
        let batch = Historizer::new().apply(&changed(), Some(&v1), Some(&snap("a")), t(3)).unwrap();
        assert_eq!(batch.closes(), 0);
        assert_eq!(batch.inserts().next().map(|v| v.version_number()), Some(2));
        let err = Historizer::new().apply(&changed(), Some(&v1), Some(&snap("a")), t(1)).unwrap_err();
        assert!(matches!(err, EtlError::TemporalOrdering { .. }));
    }

    #[test]
    fn reapplying_yields_identical_operation_ids() {
        let v1 = DimensionVersion::first(&snap("a"), t(1));
        let h = Historizer::new();
        let a = h.apply(&changed(), Some(&v1), Some(&snap("b")), t(2)).unwrap();
        let b = h.apply(&changed(), Some(&v1), Some(&snap("b")), t(2)).unwrap();
        assert_eq!(a.operation_ids(), b.operation_ids());
    }
}
