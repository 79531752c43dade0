mod common;

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use deriva::config::StorageConfig;
use deriva::error::{DerivaError, StorageFailure};
use deriva::execute::Args;
use deriva::projection::EntityRecord;
use deriva::query::{FetchHint, LockMode};
use deriva::repository::{QueryMethod, Repository, RepositoryDefinition};
use deriva::storage::{PersistenceContext, SqliteStorage};
use deriva::value::Value;

#[derive(Default)]
struct RecordingContext {
    loaded: Mutex<Vec<(String, Vec<Value>, FetchHint)>>,
    invalidated: Mutex<Vec<String>>,
}

impl PersistenceContext for RecordingContext {
    fn loaded(&self, entity: &str, ids: &[Value], hint: FetchHint) {
        self.loaded.lock().unwrap().push((entity.to_owned(), ids.to_vec(), hint));
    }
    fn invalidate(&self, entity: &str) {
        self.invalidated.lock().unwrap().push(entity.to_owned());
    }
}

fn database_file(label: &str) -> String {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    std::env::temp_dir()
        .join(format!("deriva-{label}-{}-{nanos}.db", std::process::id()))
        .to_string_lossy()
        .into_owned()
}

fn file_storage(path: &str) -> Arc<SqliteStorage> {
    let config = StorageConfig {
        path: Some(path.to_owned()),
        busy_timeout_ms: 50,
    };
    Arc::new(SqliteStorage::from_config(&config).expect("database file opens"))
}

#[test]
fn pessimistic_write_blocks_other_writers_until_commit() {
    let path = database_file("lock");
    let holder = file_storage(&path);
    holder.execute_batch(common::SCHEMA_SQL).unwrap();
    holder.execute_batch(common::SEED_SQL).unwrap();
    let contender = file_storage(&path);

    let locking = RepositoryDefinition::for_entity("Member")
        .method(QueryMethod::derived("findByUsername").lock(LockMode::PessimisticWrite))
        .build(common::registry(), holder.clone())
        .unwrap();
    let writing = RepositoryDefinition::for_entity("Member")
        .method(QueryMethod::derived("deleteByAgeLessThan"))
        .build(common::registry(), contender.clone())
        .unwrap();

    let locked: Vec<EntityRecord> = locking.list("findByUsername", Args::new().arg("member1")).unwrap();
    assert_eq!(locked.len(), 1);
    assert!(holder.in_transaction().unwrap());

    let err = writing.execute("deleteByAgeLessThan", Args::new().arg(25)).unwrap_err();
    assert!(matches!(err, DerivaError::Storage(StorageFailure::LockTimeout(_))), "got {err}");

    holder.commit().unwrap();
    assert!(!holder.in_transaction().unwrap());
    assert_eq!(writing.execute("deleteByAgeLessThan", Args::new().arg(25)).unwrap().affected, 2);

    drop(locking);
    drop(writing);
    drop(holder);
    drop(contender);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn rollback_discards_changes_made_under_the_lock() {
    let path = database_file("rollback");
    let storage = file_storage(&path);
    storage.execute_batch(common::SCHEMA_SQL).unwrap();
    storage.execute_batch(common::SEED_SQL).unwrap();
    let members = RepositoryDefinition::for_entity("Member")
        .method(QueryMethod::derived("findByAgeGreaterThan").lock(LockMode::PessimisticWrite))
        .method(QueryMethod::derived("deleteByAgeGreaterThan"))
        .build(common::registry(), storage.clone())
        .unwrap();
    let locked: Vec<EntityRecord> = members.list("findByAgeGreaterThan", Args::new().arg(35)).unwrap();
    assert_eq!(locked.len(), 2);
    assert_eq!(members.execute("deleteByAgeGreaterThan", Args::new().arg(35)).unwrap().affected, 2);
    storage.rollback().unwrap();
    assert_eq!(members.count_all().unwrap(), 5);

    drop(members);
    drop(storage);
    let _ = std::fs::remove_file(&path);
}

fn shared_storage(busy_timeout_ms: u64) -> Arc<SqliteStorage> {
    let config = StorageConfig {
        path: None,
        busy_timeout_ms,
    };
    let storage = SqliteStorage::from_config(&config).expect("in-memory database");
    storage.execute_batch(common::SCHEMA_SQL).unwrap();
    storage.execute_batch(common::SEED_SQL).unwrap();
    Arc::new(storage)
}

fn locking_members(storage: &Arc<SqliteStorage>) -> Repository {
    RepositoryDefinition::for_entity("Member")
        .method(QueryMethod::derived("findByUsername").lock(LockMode::PessimisticWrite))
        .method(QueryMethod::template(
            "setAge",
            "update Member m set m.age = :age where m.id = :id",
        ))
        .build(common::registry(), storage.clone())
        .unwrap()
}

fn aging_members() -> RepositoryDefinition {
    RepositoryDefinition::for_entity("Member").method(QueryMethod::template(
        "bulkAgePlus",
        "update Member m set m.age = m.age + 1 where m.age >= :age",
    ))
}

#[test]
fn a_held_lock_keeps_other_units_of_work_out_of_a_shared_storage() {
    let storage = shared_storage(50);
    let locking = locking_members(&storage);
    let aging = aging_members()
        .build(common::registry(), storage.clone())
        .unwrap();

    let _: Vec<EntityRecord> = locking.list("findByUsername", Args::new().arg("member1")).unwrap();
    let err = aging.execute("bulkAgePlus", Args::new().param("age", 0)).unwrap_err();
    assert!(matches!(err, DerivaError::Storage(StorageFailure::LockTimeout(_))), "got {err}");
    let err = aging.count_all().unwrap_err();
    assert!(matches!(err, DerivaError::Storage(StorageFailure::LockTimeout(_))), "got {err}");

    storage.rollback().unwrap();
    assert_eq!(aging.execute("bulkAgePlus", Args::new().param("age", 20)).unwrap().affected, 4);
    let first = aging.find_by_id(1).unwrap().unwrap();
    assert_eq!(first.get("age"), Some(&Value::Integer(10)));
}

#[test]
fn repositories_sharing_a_unit_of_work_share_the_lock() {
    let storage = shared_storage(50);
    let locking = locking_members(&storage);
    let aging = aging_members()
        .unit_of_work(locking.unit_of_work())
        .build(common::registry(), storage.clone())
        .unwrap();

    let _: Vec<EntityRecord> = locking.list("findByUsername", Args::new().arg("member1")).unwrap();
    assert_eq!(aging.execute("bulkAgePlus", Args::new().param("age", 0)).unwrap().affected, 5);
    storage.rollback().unwrap();
    let first = locking.find_by_id(1).unwrap().unwrap();
    assert_eq!(first.get("age"), Some(&Value::Integer(10)));
}

#[test]
fn writers_of_other_threads_wait_for_the_lock_holder() {
    let storage = shared_storage(5000);
    let locking = locking_members(&storage);
    let _: Vec<EntityRecord> = locking.list("findByUsername", Args::new().arg("member1")).unwrap();

    let waiting = {
        let storage = storage.clone();
        thread::spawn(move || {
            aging_members()
                .build(common::registry(), storage.clone())
                .and_then(|aging| aging.execute("bulkAgePlus", Args::new().param("age", 20)))
                .map(|outcome| outcome.affected)
                .map_err(|e| e.to_string())
        })
    };
    thread::sleep(Duration::from_millis(100));
    assert!(!waiting.is_finished());

    let outcome = locking
        .execute("setAge", Args::new().param("age", 99).param("id", 1))
        .unwrap();
    assert_eq!(outcome.affected, 1);
    storage.commit().unwrap();

    // member1 was written before the waiting statement ran
    assert_eq!(waiting.join().unwrap(), Ok(5));
    let first = locking.find_by_id(1).unwrap().unwrap();
    assert_eq!(first.get("age"), Some(&Value::Integer(100)));
}

#[test]
fn read_only_hint_reaches_the_persistence_context() {
    let context = Arc::new(RecordingContext::default());
    let members = RepositoryDefinition::for_entity("Member")
        .context(context.clone())
        .method(QueryMethod::derived("findByTeamName").hint(FetchHint::ReadOnly))
        .method(QueryMethod::derived("findByUsername"))
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let _: Vec<EntityRecord> = members.list("findByTeamName", Args::new().arg("teamA")).unwrap();
    let _: Vec<EntityRecord> = members.list("findByUsername", Args::new().arg("member5")).unwrap();
    let _: Vec<EntityRecord> = members.list("findByUsername", Args::new().arg("nobody")).unwrap();

    let loaded = context.loaded.lock().unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(
        loaded[0],
        (
            "Member".to_owned(),
            vec![Value::Integer(1), Value::Integer(2)],
            FetchHint::ReadOnly
        )
    );
    assert_eq!(loaded[1].1, vec![Value::Integer(5)]);
    assert_eq!(loaded[1].2, FetchHint::None);
}

#[test]
fn clear_automatically_invalidates_the_context() {
    let context = Arc::new(RecordingContext::default());
    let members = RepositoryDefinition::for_entity("Member")
        .context(context.clone())
        .method(
            QueryMethod::template("bulkAgePlus", "update Member m set m.age = m.age + 1 where m.age >= :age")
                .clear_automatically(),
        )
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let outcome = members.execute("bulkAgePlus", Args::new().param("age", 20)).unwrap();
    assert_eq!(outcome.affected, 4);
    assert!(outcome.stale.is_none());
    assert_eq!(*context.invalidated.lock().unwrap(), vec!["Member".to_owned()]);
}

#[test]
fn collections_resolve_through_the_owning_side() {
    let teams = RepositoryDefinition::for_entity("Team")
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let mut team = teams.find_by_id(2).unwrap().expect("teamB exists");
    let err = team.collection("members").unwrap_err();
    assert!(matches!(err, DerivaError::DetachedAccess { ref entity, .. } if entity == "Team"));

    teams.resolve(&mut team, "members").unwrap();
    let names: Vec<&str> = team
        .collection("members")
        .unwrap()
        .iter()
        .filter_map(|m| m.get("username").and_then(Value::as_str))
        .collect();
    assert_eq!(names, vec!["member3", "member4"]);
}
