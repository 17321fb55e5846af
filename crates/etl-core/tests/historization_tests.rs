use chrono::{DateTime, Duration, TimeZone, Utc};
use etl_core::{ChangeDetector, EtlError, Historizer, InMemoryVersionStore, KeyLocks, VersionStore};
use etl_domain::{Attributes, EntitySnapshot, ValidTo};
use serde_json::json;
use std::sync::Arc;

fn snap(key: &str, name: &str) -> EntitySnapshot {
    let mut attrs = Attributes::new();
    attrs.insert("name".into(), json!(name));
    EntitySnapshot::new("users", key, attrs, Utc::now()).unwrap()
}

fn t(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::days(n)
}

fn observe(store: &InMemoryVersionStore, key: &str, incoming: Option<&EntitySnapshot>, at: DateTime<Utc>) -> Result<(), EtlError> {
    let previous = store.latest("users", key)?;
    let verdict = ChangeDetector::default().detect(previous.as_ref(), incoming);
    let batch = Historizer::new().apply(&verdict, previous.as_ref(), incoming, at)?;
    store.commit(&batch)?;
    Ok(())
}

#[test]
fn k1_lifecycle_new_change_removal() {
    let store = InMemoryVersionStore::new();
    observe(&store, "K1", Some(&snap("K1", "a")), t(1)).unwrap();
    let h = store.history("users", "K1").unwrap();
    assert_eq!(h.len(), 1);
    assert_eq!((h[0].version_number(), h[0].valid_from(), h[0].valid_to()), (1, t(1), ValidTo::Open));

    observe(&store, "K1", Some(&snap("K1", "b")), t(2)).unwrap();
    let h = store.history("users", "K1").unwrap();
    assert_eq!(h.len(), 2);
    assert_eq!(h[0].valid_to(), ValidTo::Closed(t(2)));
    assert!(!h[0].is_current());
    assert_eq!((h[1].version_number(), h[1].valid_from(), h[1].valid_to()), (2, t(2), ValidTo::Open));
    assert_eq!(h[1].attributes()["name"], json!("b"));

    observe(&store, "K1", None, t(3)).unwrap();
    let h = store.history("users", "K1").unwrap();
    assert_eq!(h.len(), 2);
    assert_eq!(h[1].valid_to(), ValidTo::Closed(t(3)));
    assert!(h.iter().all(|v| !v.is_current()));
    etl_core::check_history(&h).unwrap();
}

#[test]
fn out_of_order_change_is_rejected_and_history_untouched() {
    let store = InMemoryVersionStore::new();
    observe(&store, "K1", Some(&snap("K1", "a")), t(5)).unwrap();
    let before = store.history("users", "K1").unwrap();
    let err = observe(&store, "K1", Some(&snap("K1", "b")), t(4)).unwrap_err();
    assert!(matches!(err, EtlError::TemporalOrdering { ref business_key, .. } if business_key == "K1"));
    assert_eq!(store.history("users", "K1").unwrap(), before);
}

#[test]
fn concurrent_writers_on_one_key_stay_consistent_under_key_lock() {
    let store = Arc::new(InMemoryVersionStore::new());
    let locks = Arc::new(KeyLocks::new());
    let handles: Vec<_> = (0..8).map(|i| {
                                    let store = Arc::clone(&store);
                                    let locks = Arc::clone(&locks);
                                    std::thread::spawn(move || {
                                        let incoming = snap("K1", &format!("writer-{i}"));
                                        locks.with_key("users", "K1", || {
                                                 // Cada escritor usa un instante posterior al vigente.
                                                 let at = store.latest("users", "K1")
                                                               .unwrap()
                                                               .map(|v| v.valid_from() + Duration::seconds(1))
                                                               .unwrap_or_else(|| t(0));
                                                 observe(&store, "K1", Some(&incoming), at)
                                             })
                                    })
                                })
                                .collect();
    for h in handles {
        h.join().unwrap().unwrap();
    }
    let history = store.history("users", "K1").unwrap();
    assert_eq!(history.len(), 8);
    etl_core::check_history(&history).unwrap();
}
