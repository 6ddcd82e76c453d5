use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDateTime;

use super::*;
use crate::model::*;
use crate::store::*;

fn at(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, STORE_TIME_FORMAT).unwrap()
}

const T: &str = "2024-07-21 19:00:00";

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("tablematch_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

/// Diners 1–6, three restaurants, five tables.
fn directory() -> Directory {
    serde_json::from_str(
        r#"{
            "diners": [
                {"id": 1, "name": "Michael", "dietary_restrictions": "Vegetarian"},
                {"id": 2, "name": "George Michael", "dietary_restrictions": "Vegetarian, Gluten-Free"},
                {"id": 3, "name": "Lucile"},
                {"id": 4, "name": "Gob", "dietary_restrictions": "Paleo"},
                {"id": 5, "name": "Tobias"},
                {"id": 6, "name": "Maeby", "dietary_restrictions": "vegan"}
            ],
            "restaurants": [
                {"id": 1, "name": "Lardo", "endorsements": "Gluten-Free, Vegetarian"},
                {"id": 2, "name": "Panadería Rosetta", "endorsements": "Vegetarian,Vegan"},
                {"id": 3, "name": "Tetetlán", "endorsements": "Paleo,Gluten-Free"}
            ],
            "tables": [
                {"id": 1, "restaurant_id": 1, "capacity": 2},
                {"id": 2, "restaurant_id": 1, "capacity": 4},
                {"id": 3, "restaurant_id": 2, "capacity": 6},
                {"id": 4, "restaurant_id": 2, "capacity": 2},
                {"id": 5, "restaurant_id": 3, "capacity": 2}
            ]
        }"#,
    )
    .unwrap()
}

fn open(name: &str) -> (Arc<MemoryStore>, Engine) {
    let store = Arc::new(MemoryStore::open(&test_wal_path(name), directory()).unwrap());
    let engine = Engine::new(store.clone());
    (store, engine)
}

fn open_tables(availability: Availability) -> Vec<(RestaurantId, TableId)> {
    match availability {
        Availability::Open(tables) => tables.iter().map(|t| (t.restaurant_id, t.table_id)).collect(),
        Availability::Conflict => panic!("expected open tables, got conflict"),
    }
}

// ── Find availability ────────────────────────────────────

#[tokio::test]
async fn unrestricted_diner_sees_every_restaurant() {
    let (_store, engine) = open("unrestricted.wal");
    let result = engine.find_availability(&[5], at(T)).await.unwrap();
    match result {
        Availability::Open(tables) => {
            assert_eq!(tables.len(), 3);
            assert_eq!(tables[0].restaurant_name, "Lardo");
            assert_eq!(
                tables.iter().map(|t| t.table_id).collect::<Vec<_>>(),
                vec![1, 3, 5]
            );
        }
        Availability::Conflict => panic!("unexpected conflict"),
    }
}

#[tokio::test]
async fn restrictions_require_superset_of_endorsements() {
    let (_store, engine) = open("superset.wal");
    let result = engine.find_availability(&[1, 2], at(T)).await.unwrap();
    assert_eq!(open_tables(result), vec![(1, 1)]);
}

#[tokio::test]
async fn endorsement_match_ignores_case() {
    let (_store, engine) = open("case.wal");
    let result = engine.find_availability(&[6], at(T)).await.unwrap();
    assert_eq!(open_tables(result), vec![(2, 3)]);
}

#[tokio::test]
async fn unknown_diners_contribute_no_restrictions() {
    let (_store, engine) = open("unknown_diner.wal");
    let result = engine.find_availability(&[99], at(T)).await.unwrap();
    assert_eq!(open_tables(result).len(), 3);
}

#[tokio::test]
async fn party_size_filters_small_tables() {
    let (_store, engine) = open("capacity.wal");
    let result = engine.find_availability(&[3, 5, 99], at(T)).await.unwrap();
    // Three diners: table 1 (2 seats) and table 5 (2 seats) are too small.
    assert_eq!(open_tables(result), vec![(1, 2), (2, 3)]);
}

#[tokio::test]
async fn duplicate_ids_count_once_toward_party_size() {
    let (_store, engine) = open("dup_party.wal");
    let result = engine.find_availability(&[5, 5, 3, 3], at(T)).await.unwrap();
    assert_eq!(open_tables(result), vec![(1, 1), (2, 3), (3, 5)]);
}

#[tokio::test]
async fn reserved_table_skipped_for_next_lowest() {
    let (_store, engine) = open("busy_table.wal");
    engine
        .create_reservation(1, 1, at("2024-07-21 18:00:00"), "50")
        .await
        .unwrap();
    let result = engine.find_availability(&[5], at(T)).await.unwrap();
    assert_eq!(open_tables(result), vec![(1, 2), (2, 3), (3, 5)]);
}

#[tokio::test]
async fn reservation_outside_window_does_not_block_table() {
    let (_store, engine) = open("outside_window.wal");
    engine
        .create_reservation(1, 1, at("2024-07-21 21:00:01"), "50")
        .await
        .unwrap();
    let result = engine.find_availability(&[5], at(T)).await.unwrap();
    assert_eq!(open_tables(result)[0], (1, 1));
}

#[tokio::test]
async fn no_free_table_is_empty_success() {
    let (_store, engine) = open("no_table.wal");
    engine
        .create_reservation(5, 3, at(T), "50")
        .await
        .unwrap();
    let result = engine.find_availability(&[4], at(T)).await.unwrap();
    assert_eq!(result, Availability::Open(vec![]));
}

#[tokio::test]
async fn unmatched_restrictions_is_empty_success() {
    let (_store, engine) = open("no_restaurant.wal");
    // Paleo and Vegan together: nobody endorses both.
    let result = engine.find_availability(&[4, 6], at(T)).await.unwrap();
    assert_eq!(result, Availability::Open(vec![]));
}

#[tokio::test]
async fn party_member_reservation_is_conflict() {
    let (_store, engine) = open("party_conflict.wal");
    engine
        .create_reservation(3, 2, at("2024-07-21 20:30:00"), "2")
        .await
        .unwrap();
    let result = engine.find_availability(&[1, 2, 3], at(T)).await.unwrap();
    assert_eq!(result, Availability::Conflict);
}

#[tokio::test]
async fn conflict_window_is_inclusive() {
    let (_store, engine) = open("inclusive.wal");
    engine
        .create_reservation(3, 2, at("2024-07-21 17:00:00"), "1")
        .await
        .unwrap();
    engine
        .create_reservation(4, 2, at("2024-07-21 21:00:01"), "2")
        .await
        .unwrap();
    let window = Window::around(at(T)).unwrap();
    assert!(engine.has_conflict(&[1], &window).await.unwrap());
    assert!(!engine.has_conflict(&[2], &window).await.unwrap());
}

#[tokio::test]
async fn diner_id_never_matches_inside_longer_id() {
    let (_store, engine) = open("substring.wal");
    engine
        .create_reservation(3, 2, at(T), "12,31")
        .await
        .unwrap();
    let window = Window::around(at(T)).unwrap();
    assert!(!engine.has_conflict(&[1], &window).await.unwrap());
    assert!(!engine.has_conflict(&[2, 3], &window).await.unwrap());
    assert!(engine.has_conflict(&[31], &window).await.unwrap());
}

#[tokio::test]
async fn empty_party_is_invalid() {
    let (_store, engine) = open("empty_party.wal");
    let err = engine.find_availability(&[], at(T)).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
}

// ── Create / cancel ──────────────────────────────────────

#[tokio::test]
async fn create_then_cancel() {
    let (store, engine) = open("create_cancel.wal");
    let created = engine.create_reservation(1, 1, at(T), "1,2,3").await.unwrap();
    assert_eq!(created.diner_ids, vec![1, 2, 3]);
    assert_eq!(created.reservation_time, at(T));
    assert_eq!(
        store.reservation(created.reservation_id).await.unwrap().diner_ids,
        "[1],[2],[3]"
    );

    assert!(engine.cancel_reservation(created.reservation_id).await.unwrap());
    assert!(store.reservation(created.reservation_id).await.is_none());
}

#[tokio::test]
async fn cancel_twice_reports_missing() {
    let (_store, engine) = open("cancel_twice.wal");
    let created = engine.create_reservation(2, 1, at(T), "4").await.unwrap();
    assert!(engine.cancel_reservation(created.reservation_id).await.unwrap());
    assert!(!engine.cancel_reservation(created.reservation_id).await.unwrap());
}

#[tokio::test]
async fn cancel_unknown_is_false() {
    let (_store, engine) = open("cancel_unknown.wal");
    assert!(!engine.cancel_reservation(12345).await.unwrap());
}

#[tokio::test]
async fn ids_increase() {
    let (_store, engine) = open("ids.wal");
    let a = engine.create_reservation(1, 1, at(T), "1").await.unwrap();
    let b = engine.create_reservation(2, 1, at(T), "2").await.unwrap();
    assert!(b.reservation_id > a.reservation_id);
}

#[tokio::test]
async fn malformed_diner_list_rejected() {
    let (store, engine) = open("malformed.wal");
    for raw in ["", "1,,2", "a", "1, 2", "-1"] {
        let err = engine.create_reservation(1, 1, at(T), raw).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)), "{raw:?}: {err:?}");
    }
    assert_eq!(store.reservation_count().await, 0);
}

#[tokio::test]
async fn plain_writer_does_not_recheck() {
    let (store, engine) = open("double_book.wal");
    engine.create_reservation(1, 1, at(T), "1").await.unwrap();
    engine.create_reservation(1, 1, at(T), "1").await.unwrap();
    assert_eq!(store.reservation_count().await, 2);
}

#[tokio::test]
async fn checked_booking_rejects_party_overlap() {
    let (store, engine) = open("book_party.wal");
    let first = engine.book_reservation(1, 1, at(T), "1,2").await.unwrap();
    let err = engine
        .book_reservation(3, 2, at("2024-07-21 20:00:00"), "2,5")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(id) if id == first.reservation_id));
    assert_eq!(store.reservation_count().await, 1);
}

#[tokio::test]
async fn checked_booking_rejects_table_overlap() {
    let (_store, engine) = open("book_table.wal");
    let first = engine.book_reservation(3, 2, at(T), "1").await.unwrap();
    let err = engine
        .book_reservation(3, 2, at("2024-07-21 18:00:00"), "5")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(id) if id == first.reservation_id));

    // Outside the window the same table is free again.
    engine
        .book_reservation(3, 2, at("2024-07-21 21:30:00"), "5")
        .await
        .unwrap();
}

#[tokio::test]
async fn concurrent_checked_bookings_admit_one() {
    let (store, engine) = open("book_race.wal");
    let engine = Arc::new(engine);
    let mut handles = Vec::new();
    for diner in 10..20 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .book_reservation(2, 1, at(T), &diner.to_string())
                .await
        }));
    }
    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::Conflict(_)) => {}
            Err(e) => panic!("unexpected {e:?}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(store.reservation_count().await, 1);
}

// ── Persistence ──────────────────────────────────────────

#[tokio::test]
async fn reservations_survive_reopen() {
    let path = test_wal_path("reopen.wal");
    let (kept, cancelled) = {
        let store = Arc::new(MemoryStore::open(&path, directory()).unwrap());
        let engine = Engine::new(store);
        let kept = engine.create_reservation(1, 1, at(T), "1,2").await.unwrap();
        let cancelled = engine.create_reservation(3, 2, at(T), "5").await.unwrap();
        assert!(engine.cancel_reservation(cancelled.reservation_id).await.unwrap());
        (kept.reservation_id, cancelled.reservation_id)
    };

    let store = Arc::new(MemoryStore::open(&path, directory()).unwrap());
    let engine = Engine::new(store.clone());
    assert!(store.reservation(kept).await.is_some());
    assert!(store.reservation(cancelled).await.is_none());
    assert_eq!(
        engine.find_availability(&[2], at(T)).await.unwrap(),
        Availability::Conflict
    );

    let next = engine.create_reservation(4, 2, at(T), "6").await.unwrap();
    assert!(next.reservation_id > cancelled);
}

// ── Ordering and failures against scripted stores ────────

/// Store that records each call and serves fixed rows.
#[derive(Default)]
struct ScriptedStore {
    calls: Mutex<Vec<&'static str>>,
    conflict: Option<ConflictRow>,
    fail: bool,
}

impl ScriptedStore {
    fn record(&self, call: &'static str) -> Result<(), StoreError> {
        self.calls.lock().unwrap().push(call);
        if self.fail {
            Err(StoreError::Wal("store offline".into()))
        } else {
            Ok(())
        }
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReservationStore for ScriptedStore {
    async fn fetch_dietary_restrictions(
        &self,
        _diner_ids: &[DinerId],
    ) -> Result<Vec<RestrictionRow>, StoreError> {
        self.record("restrictions")?;
        Ok(vec![RestrictionRow { restrictions: Some("Vegan".into()) }])
    }

    async fn fetch_endorsed_restaurants(
        &self,
        labels: &BTreeSet<String>,
    ) -> Result<Vec<RestaurantRow>, StoreError> {
        self.record("endorsements")?;
        assert!(labels.contains("Vegan"));
        Ok(vec![
            RestaurantRow { id: 7, name: "Falling Piano".into() },
            RestaurantRow { id: 8, name: "Ugly Naked Guy's".into() },
        ])
    }

    async fn fetch_available_tables(
        &self,
        capacity: u32,
        restaurant_ids: &[RestaurantId],
        _window: &Window,
    ) -> Result<Vec<TableRow>, StoreError> {
        self.record("tables")?;
        assert_eq!(capacity, 2);
        assert_eq!(restaurant_ids.to_vec(), vec![7, 8]);
        // Deliberately out of table-id order.
        Ok(vec![
            TableRow { restaurant_id: 8, table_id: 40 },
            TableRow { restaurant_id: 7, table_id: 31 },
            TableRow { restaurant_id: 7, table_id: 30 },
        ])
    }

    async fn fetch_conflicting_reservation(
        &self,
        _diner_ids: &[DinerId],
        _window: &Window,
    ) -> Result<Option<ConflictRow>, StoreError> {
        self.record("conflict")?;
        Ok(self.conflict)
    }

    async fn insert_reservation(&self, _new: NewReservation) -> Result<ReservationId, StoreError> {
        self.record("insert")?;
        Ok(1)
    }

    async fn insert_reservation_checked(
        &self,
        _new: NewReservation,
        _window: &Window,
    ) -> Result<ReservationId, StoreError> {
        self.record("insert_checked")?;
        Ok(1)
    }

    async fn delete_reservation(&self, _id: ReservationId) -> Result<u64, StoreError> {
        self.record("delete")?;
        Ok(0)
    }
}

#[tokio::test]
async fn conflict_check_runs_first() {
    let store = Arc::new(ScriptedStore::default());
    let engine = Engine::new(store.clone());
    let result = engine.find_availability(&[1, 2], at(T)).await.unwrap();
    assert_eq!(
        store.calls(),
        vec!["conflict", "restrictions", "endorsements", "tables"]
    );
    assert_eq!(
        result,
        Availability::Open(vec![
            AvailableTable { restaurant_id: 7, restaurant_name: "Falling Piano".into(), table_id: 30 },
            AvailableTable { restaurant_id: 8, restaurant_name: "Ugly Naked Guy's".into(), table_id: 40 },
        ])
    );
}

#[tokio::test]
async fn conflict_short_circuits_lookup() {
    let store = Arc::new(ScriptedStore {
        conflict: Some(ConflictRow { reservation_id: 9, table_id: 3 }),
        ..Default::default()
    });
    let engine = Engine::new(store.clone());
    let result = engine.find_availability(&[1], at(T)).await.unwrap();
    assert_eq!(result, Availability::Conflict);
    assert_eq!(store.calls(), vec!["conflict"]);
}

#[tokio::test]
async fn store_failure_is_data_access_error() {
    let store = Arc::new(ScriptedStore { fail: true, ..Default::default() });
    let engine = Engine::new(store.clone());

    let err = engine.find_availability(&[1], at(T)).await.unwrap_err();
    assert!(matches!(err, EngineError::DataAccess(_)));
    let err = engine.create_reservation(1, 1, at(T), "1").await.unwrap_err();
    assert!(matches!(err, EngineError::DataAccess(_)));
    let err = engine.cancel_reservation(1).await.unwrap_err();
    assert!(matches!(err, EngineError::DataAccess(_)));
}
