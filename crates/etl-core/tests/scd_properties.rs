use chrono::{DateTime, Duration, TimeZone, Utc};
use etl_core::store::check_history_allowing_gaps;
use etl_core::{check_history, ChangeDetector, CommitOutcome, Historizer, InMemoryVersionStore, VersionStore};
use etl_domain::{Attributes, EntitySnapshot};
use proptest::prelude::*;
use serde_json::json;

fn snapshot(value: u8) -> EntitySnapshot {
    let mut attrs = Attributes::new();
    attrs.insert("name".into(), json!(format!("n{value}")));
    EntitySnapshot::new("users", "K1", attrs, Utc::now()).unwrap()
}

fn at(step: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(step as i64 + 1)
}

/// Aplica una secuencia de observaciones (`None` = clave ausente) y devuelve
/// el store resultante. Cada batch se aplica dos veces para simular
/// re-ejecuciones.
fn replay(observations: &[Option<u8>]) -> InMemoryVersionStore {
    let store = InMemoryVersionStore::new();
    let detector = ChangeDetector::default();
    let historizer = Historizer::new();
    for (i, obs) in observations.iter().enumerate() {
        let incoming = obs.map(snapshot);
        let previous = store.latest("users", "K1").unwrap();
        let verdict = detector.detect(previous.as_ref(), incoming.as_ref());
        let batch = historizer.apply(&verdict, previous.as_ref(), incoming.as_ref(), at(i)).unwrap();
        let first = store.commit(&batch).unwrap();
        let second = store.commit(&batch).unwrap();
        if batch.is_empty() {
            assert_eq!(first, CommitOutcome::Empty);
        } else {
            assert_eq!((first, second), (CommitOutcome::Applied, CommitOutcome::AlreadyApplied));
        }
    }
    store
}

proptest! {
    #[test]
    fn history_keeps_scd_invariants(observations in prop::collection::vec(prop::option::weighted(0.8, 0u8..4), 1..40)) {
        let store = replay(&observations);
        let history = store.history("users", "K1").unwrap();
        prop_assert!(check_history_allowing_gaps(&history).is_ok());
        prop_assert!(history.iter().filter(|v| v.is_current()).count() <= 1);
        // La versión vigente existe si y sólo si la última observación trajo la clave
        // y la clave se observó alguna vez.
        let seen = observations.iter().any(Option::is_some);
        let present_now = observations.last().copied().flatten().is_some();
        prop_assert_eq!(history.last().is_some_and(|v| v.is_current()), seen && present_now);
    }

    #[test]
    fn without_removals_history_is_contiguous(values in prop::collection::vec(0u8..3, 1..40)) {
        let observations: Vec<Option<u8>> = values.iter().copied().map(Some).collect();
        let store = replay(&observations);
        let history = store.history("users", "K1").unwrap();
        prop_assert!(check_history(&history).is_ok());
        let changes = values.windows(2).filter(|w| w[0] != w[1]).count();
        prop_assert_eq!(history.len(), changes + 1);
    }

    #[test]
    fn unchanged_rerun_adds_no_rows(values in prop::collection::vec(0u8..3, 1..20)) {
        let mut observations: Vec<Option<u8>> = values.iter().copied().map(Some).collect();
        let before = replay(&observations).row_count();
        let last = *observations.last().unwrap();
        observations.push(last);
        prop_assert_eq!(replay(&observations).row_count(), before);
    }
}
