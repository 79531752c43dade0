mod common;

use deriva::error::DerivaError;
use deriva::execute::Args;
use deriva::page::{Page, PageRequest};
use deriva::projection::{EntityRecord, ProjectionTarget};
use deriva::query::{Direction, ResultShape, Sort};
use deriva::repository::{QueryMethod, RepositoryDefinition};
use deriva::value::Value;

fn ages(records: &[EntityRecord]) -> Vec<i64> {
    records
        .iter()
        .map(|r| r.get("age").and_then(Value::as_i64).unwrap_or_default())
        .collect()
}

#[test]
fn bulk_update_reports_affected_rows_and_staleness() {
    let members = RepositoryDefinition::for_entity("Member")
        .method(QueryMethod::template(
            "bulkAgePlus",
            "update Member m set m.age = m.age + 1 where m.age >= :age",
        ))
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let outcome = members.execute("bulkAgePlus", Args::new().param("age", 30)).unwrap();
    assert_eq!(outcome.affected, 3);
    assert_eq!(outcome.stale.as_deref(), Some("Member"));
    let third = members.find_by_id(3).unwrap().unwrap();
    assert_eq!(third.get("age"), Some(&Value::Integer(31)));
    let first = members.find_by_id(1).unwrap().unwrap();
    assert_eq!(first.get("age"), Some(&Value::Integer(10)));
}

#[test]
fn bulk_arithmetic_precedence_and_several_assignments() {
    let members = RepositoryDefinition::for_entity("Member")
        .method(QueryMethod::template(
            "rename",
            "update Member m set m.age = m.age * 2 + 1, m.username = :name where m.id = :id",
        ))
        .method(QueryMethod::template("purgeTeamless", "delete from Member m where m.team is null"))
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let outcome = members
        .execute("rename", Args::new().param("name", "renamed").param("id", 2))
        .unwrap();
    assert_eq!(outcome.affected, 1);
    let renamed = members.find_by_id(2).unwrap().unwrap();
    assert_eq!(renamed.get("age"), Some(&Value::Integer(41)));
    assert_eq!(renamed.get("username"), Some(&Value::from("renamed")));

    assert_eq!(members.execute("purgeTeamless", Args::new()).unwrap().affected, 1);
    assert_eq!(members.count_all().unwrap(), 4);
}

#[test]
fn bulk_templates_cannot_return_rows() {
    let err = RepositoryDefinition::for_entity("Member")
        .method(QueryMethod::template("agePlus", "update Member m set m.age = m.age + 1").returning(ResultShape::List))
        .build(common::registry(), common::seeded_storage())
        .err()
        .expect("definition is rejected");
    assert!(matches!(err, DerivaError::Definition { .. }));
}

#[test]
fn native_entity_results() {
    let members = RepositoryDefinition::for_entity("Member")
        .method(QueryMethod::native(
            "findOlderNative",
            "select * from member where age > ? order by member_id",
        ))
        .method(QueryMethod::native(
            "findQuoted",
            "select * from member where username <> '?' and age > ?1 order by member_id",
        ))
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let found: Vec<EntityRecord> = members.list("findOlderNative", Args::new().arg(25)).unwrap();
    assert_eq!(ages(&found), vec![30, 40, 50]);
    assert_eq!(found[0].id(), &Value::Integer(3));
    // foreign keys come back as unresolved associations
    assert!(!found[0].is_loaded("team"));
    assert_eq!(found[2].association("team").unwrap(), None);

    let quoted: Vec<EntityRecord> = members.list("findQuoted", Args::new().arg(25)).unwrap();
    assert_eq!(quoted, found);
}

#[test]
fn paged_native_query_needs_a_count_query() {
    let err = RepositoryDefinition::for_entity("Member")
        .method(QueryMethod::native("pageNative", "select * from member").returning(ResultShape::Page))
        .build(common::registry(), common::seeded_storage())
        .err()
        .expect("definition is rejected");
    assert!(matches!(err, DerivaError::Definition { ref definition, .. } if definition == "pageNative"));
}

#[test]
fn paged_native_query_with_count_query() {
    let members = RepositoryDefinition::for_entity("Member")
        .method(
            QueryMethod::native("pageNative", "select * from member where age > ?")
                .returning(ResultShape::Page)
                .count_query("select count(*) from member where age > ?"),
        )
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let request = PageRequest::of(0, 2).unwrap().sorted(Sort::by(Direction::Desc, &["age"]));
    let page: Page<EntityRecord> = members
        .page("pageNative", Args::new().arg(25).page(request))
        .unwrap();
    assert_eq!(ages(page.content()), vec![50, 40]);
    assert_eq!(page.total_elements(), 3);
    assert!(page.has_next());
}

#[test]
fn native_scalar_count_and_bulk() {
    let members = RepositoryDefinition::for_entity("Member")
        .method(
            QueryMethod::native("usernamesNative", "select username from member order by member_id desc")
                .projecting(ProjectionTarget::scalar("username")),
        )
        .method(
            QueryMethod::native("countTeamNative", "select * from member where team_id = ?")
                .returning(ResultShape::Count),
        )
        .method(
            QueryMethod::native("resetAges", "update member set age = ? where age > ?").returning(ResultShape::Bulk),
        )
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let names: Vec<String> = members.list("usernamesNative", Args::new()).unwrap();
    assert_eq!(names, vec!["member5", "member4", "member3", "member2", "member1"]);
    assert_eq!(members.count("countTeamNative", Args::new().arg(1)).unwrap(), 2);
    let outcome = members.execute("resetAges", Args::new().arg(1).arg(35)).unwrap();
    assert_eq!(outcome.affected, 2);
}

#[test]
fn native_results_of_another_entity() {
    let members = RepositoryDefinition::for_entity("Member")
        .method(QueryMethod::native("teamsNative", "select * from team order by team_id").of_entity("Team"))
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let teams: Vec<EntityRecord> = members.list("teamsNative", Args::new()).unwrap();
    assert_eq!(teams.len(), 2);
    assert_eq!(teams[1].entity(), "Team");
    assert_eq!(teams[1].get("name"), Some(&Value::from("teamB")));
}

#[test]
fn constraint_violations_pass_through() {
    let members = RepositoryDefinition::for_entity("Member")
        .method(QueryMethod::template("blankNames", "update Member m set m.username = null"))
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let err = members.execute("blankNames", Args::new()).unwrap_err();
    assert!(matches!(
        err,
        DerivaError::Storage(deriva::error::StorageFailure::Constraint(_))
    ));
}
