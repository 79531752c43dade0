mod common;

use deriva::error::DerivaError;
use deriva::example::{ExampleMatcher, Probe};
use deriva::repository::{Repository, RepositoryDefinition};
use deriva::value::Value;

fn members() -> Repository {
    RepositoryDefinition::for_entity("Member")
        .build(common::registry(), common::seeded_storage())
        .expect("definition validates")
}

#[test]
fn set_fields_become_equalities() {
    let members = members();
    let found = members
        .find_all_by_example(&Probe::of("Member").with("username", "member2"), &ExampleMatcher::matching())
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("age"), Some(&Value::Integer(20)));

    let probe = Probe::of("Member").with("username", "member3").with("age", 20);
    assert!(members.find_all_by_example(&probe, &ExampleMatcher::matching()).unwrap().is_empty());
}

#[test]
fn ignored_paths_are_skipped() {
    let probe = Probe::of("Member").with("username", "member3").with("age", 99);
    let matcher = ExampleMatcher::matching().with_ignore_paths(&["age"]);
    assert_eq!(members().count_by_example(&probe, &matcher).unwrap(), 1);
}

#[test]
fn nulls_are_skipped_unless_included() {
    let members = members();
    let probe = Probe::of("Member").with("username", Value::Null);
    assert_eq!(members.count_by_example(&probe, &ExampleMatcher::matching()).unwrap(), 5);
    assert_eq!(
        members
            .count_by_example(&probe, &ExampleMatcher::matching().with_include_nulls())
            .unwrap(),
        0
    );
}

#[test]
fn probe_from_a_loaded_record() {
    let members = members();
    let member = members.find_by_id(4).unwrap().expect("member4 exists");
    let found = members
        .find_all_by_example(&Probe::from_record(&member), &ExampleMatcher::matching())
        .unwrap();
    assert_eq!(found, vec![member]);
}

#[test]
fn probes_are_checked_against_the_entity() {
    let members = members();
    let unknown = members
        .find_all_by_example(&Probe::of("Member").with("nickname", "x"), &ExampleMatcher::matching())
        .unwrap_err();
    assert!(matches!(unknown, DerivaError::Definition { .. }));
    let foreign = members
        .count_by_example(&Probe::of("Team").with("name", "teamA"), &ExampleMatcher::matching())
        .unwrap_err();
    assert!(matches!(foreign, DerivaError::Definition { .. }));
}
