mod common;

use deriva::error::DerivaError;
use deriva::execute::Args;
use deriva::page::{Page, PageRequest};
use deriva::projection::{DtoRecord, DtoShape, EntityRecord, ProjectionTarget, View};
use deriva::query::ResultShape;
use deriva::repository::{QueryMethod, RepositoryDefinition};
use deriva::template::{CompiledTemplate, compile_template};
use deriva::value::Value;

fn usernames(records: &[EntityRecord]) -> Vec<&str> {
    records
        .iter()
        .map(|r| r.get("username").and_then(Value::as_str).unwrap_or_default())
        .collect()
}

fn rejected(method: QueryMethod) -> DerivaError {
    RepositoryDefinition::for_entity("Member")
        .method(method)
        .build(common::registry(), common::seeded_storage())
        .err()
        .expect("definition is rejected")
}

#[test]
fn named_parameters() {
    let members = RepositoryDefinition::for_entity("Member")
        .method(QueryMethod::template(
            "findUser",
            "select m from Member m where m.username = :username and m.age = :age",
        ))
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let found: Vec<EntityRecord> = members
        .list("findUser", Args::new().param("age", 20).param("username", "member2"))
        .unwrap();
    assert_eq!(usernames(&found), vec!["member2"]);

    // named slots fall back to positional arguments in order of first appearance
    let positional: Vec<EntityRecord> = members.list("findUser", Args::new().arg("member2").arg(20)).unwrap();
    assert_eq!(positional, found);
}

#[test]
fn positional_parameters() {
    let members = RepositoryDefinition::for_entity("Member")
        .method(QueryMethod::template(
            "findAgeRange",
            "select m from Member m where m.age >= ?1 and m.age <= ?2 order by m.age desc",
        ))
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let found: Vec<EntityRecord> = members.list("findAgeRange", Args::new().arg(20).arg(40)).unwrap();
    assert_eq!(usernames(&found), vec!["member4", "member3", "member2"]);
}

#[test]
fn named_and_positional_parameters_do_not_mix() {
    let err = rejected(QueryMethod::template(
        "findMixed",
        "select m from Member m where m.username = :username and m.age = ?1",
    ));
    assert!(matches!(err, DerivaError::Definition { ref definition, .. } if definition == "findMixed"));
}

#[test]
fn scalar_selection() {
    let members = RepositoryDefinition::for_entity("Member")
        .method(QueryMethod::template(
            "findUsernames",
            "select m.username from Member m where m.age > :age order by m.username desc",
        ))
        .method(QueryMethod::template(
            "findTeamNames",
            "select t.name from Member m join m.team t order by t.name",
        ))
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let names: Vec<String> = members.list("findUsernames", Args::new().param("age", 25)).unwrap();
    assert_eq!(names, vec!["member5", "member4", "member3"]);
    let teams: Vec<String> = members.list("findTeamNames", Args::new()).unwrap();
    assert_eq!(teams, vec!["teamA", "teamA", "teamB", "teamB"]);
}

#[test]
fn constructor_expression() {
    let members = RepositoryDefinition::for_entity("Member")
        .method(QueryMethod::template(
            "findMemberDto",
            "select new com.example.MemberDto(m.id, m.username, t.name) from Member m join m.team t",
        ))
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let dtos: Vec<DtoRecord> = members.list("findMemberDto", Args::new()).unwrap();
    // the inner join drops the member without a team
    assert_eq!(dtos.len(), 4);
    assert_eq!(dtos[0].type_name(), "MemberDto");
    assert_eq!(dtos[0].get("id"), Some(&Value::Integer(1)));
    assert_eq!(dtos[0].get("username"), Some(&Value::from("member1")));
    assert_eq!(dtos[0].get("name"), Some(&Value::from("teamA")));
}

#[test]
fn declared_dto_binds_arguments_in_written_order() {
    let members = RepositoryDefinition::for_entity("Member")
        .method(
            QueryMethod::template(
                "findMemberDto",
                "select m.id, m.username, t.name from Member m left join m.team t where m.age > 35",
            )
            .projecting(ProjectionTarget::ConstructorDto(DtoShape::new(
                "MemberDto",
                &["memberId", "memberName", "teamName"],
            ))),
        )
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let dtos: Vec<DtoRecord> = members.list("findMemberDto", Args::new()).unwrap();
    assert_eq!(dtos.len(), 2);
    assert_eq!(dtos[0].get("memberName"), Some(&Value::from("member4")));
    assert_eq!(dtos[0].get("teamName"), Some(&Value::from("teamB")));
    assert_eq!(dtos[1].get("teamName"), Some(&Value::Null));
    assert_eq!(dtos[1].clone().into_arguments()[0], Value::Integer(5));

    let err = rejected(
        QueryMethod::template("findShortDto", "select m.id, m.username from Member m")
            .projecting(ProjectionTarget::ConstructorDto(DtoShape::new("MemberDto", &["id"]))),
    );
    assert!(matches!(err, DerivaError::Definition { .. }));
}

#[test]
fn tuple_selection_is_a_view() {
    let members = RepositoryDefinition::for_entity("Member")
        .method(QueryMethod::template(
            "findYoung",
            "select m.username, m.age as years from Member m where m.age < 25",
        ))
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let views: Vec<View> = members.list("findYoung", Args::new()).unwrap();
    assert_eq!(views.len(), 2);
    assert_eq!(views[1].get("username"), Some(&Value::from("member2")));
    assert_eq!(views[1].get("years"), Some(&Value::Integer(20)));
}

#[test]
fn join_fetch_populates_the_association() {
    let members = RepositoryDefinition::for_entity("Member")
        .method(QueryMethod::template(
            "findWithTeam",
            "select m from Member m left join fetch m.team where m.age > :age",
        ))
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let found: Vec<EntityRecord> = members.list("findWithTeam", Args::new().param("age", 35)).unwrap();
    assert_eq!(usernames(&found), vec!["member4", "member5"]);
    let team = found[0].association("team").unwrap().unwrap();
    assert_eq!(team.get("name"), Some(&Value::from("teamB")));
    assert_eq!(found[1].association("team").unwrap(), None);
}

#[test]
fn literals_and_operators() {
    let members = RepositoryDefinition::for_entity("Member")
        .method(QueryMethod::template(
            "findListed",
            "select m from Member m where m.username in ('member1', 'member2')",
        ))
        .method(QueryMethod::template(
            "findBound",
            "select m from Member m where m.username in :names",
        ))
        .method(QueryMethod::template("findTeamless", "select m from Member m where m.team is null"))
        .method(QueryMethod::template(
            "findOuter",
            "select m from Member m where (m.age < 15 or m.age > 45) and m.username like 'member%'",
        ))
        .method(QueryMethod::template(
            "findNested",
            "select m from Member m where m.team.name <> 'teamA' and m.team is not null",
        ))
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let listed: Vec<EntityRecord> = members.list("findListed", Args::new()).unwrap();
    assert_eq!(usernames(&listed), vec!["member1", "member2"]);
    let bound: Vec<EntityRecord> = members
        .list("findBound", Args::new().param("names", vec!["member3", "member5"]))
        .unwrap();
    assert_eq!(usernames(&bound), vec!["member3", "member5"]);
    let teamless: Vec<EntityRecord> = members.list("findTeamless", Args::new()).unwrap();
    assert_eq!(usernames(&teamless), vec!["member5"]);
    let outer: Vec<EntityRecord> = members.list("findOuter", Args::new()).unwrap();
    assert_eq!(usernames(&outer), vec!["member1", "member5"]);
    let nested: Vec<EntityRecord> = members.list("findNested", Args::new()).unwrap();
    assert_eq!(usernames(&nested), vec!["member3", "member4"]);
}

#[test]
fn count_template_and_explicit_count_query() {
    let members = RepositoryDefinition::for_entity("Member")
        .method(QueryMethod::template(
            "countByTeam",
            "select count(m) from Member m where m.team.name = :team",
        ))
        .method(
            QueryMethod::template("findOlder", "select m from Member m where m.age > :age")
                .returning(ResultShape::Page)
                .count_query("select count(m) from Member m where m.age > :age"),
        )
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    assert_eq!(members.count("countByTeam", Args::new().param("team", "teamA")).unwrap(), 2);

    let page: Page<EntityRecord> = members
        .page(
            "findOlder",
            Args::new().param("age", 15).page(PageRequest::of(0, 2).unwrap()),
        )
        .unwrap();
    assert_eq!(usernames(page.content()), vec!["member2", "member3"]);
    assert_eq!(page.total_elements(), 4);

    let err = rejected(
        QueryMethod::template("findAll", "select m from Member m")
            .returning(ResultShape::Page)
            .count_query("select m from Member m"),
    );
    assert!(matches!(err, DerivaError::Definition { .. }));
}

#[test]
fn invalid_templates_fail_at_definition_time() {
    let cases = [
        ("unparsable", "select m fron Member m"),
        ("unknownProperty", "select m from Member m where m.nickname = :nickname"),
        ("unknownEntity", "select p from Person p"),
        ("unknownAlias", "select m from Member m where x.age > 3"),
        ("collectionJoin", "select m from Member m join m.team t join t.members o"),
        ("associationCompared", "select m from Member m where m.team = 1"),
        ("bulkAcrossAssociation", "update Member m set m.age = 1 where m.team.name = 'teamA'"),
    ];
    for (name, text) in cases {
        let err = rejected(QueryMethod::template(name, text));
        assert!(
            matches!(err, DerivaError::Definition { ref definition, .. } if definition == name),
            "{name} should be rejected, got {err}"
        );
    }
}

#[test]
fn templates_compile_without_a_repository() {
    let registry = common::registry();
    match compile_template("q", "delete from Member m where m.age < ?1", &registry).unwrap() {
        CompiledTemplate::Bulk(spec) => {
            assert_eq!(spec.entity.name(), "Member");
            assert_eq!(spec.params.len(), 1);
        }
        CompiledTemplate::Select(_) => panic!("delete compiled as a select"),
    }
    match compile_template("q", "SELECT DISTINCT m FROM Member AS m ORDER BY m.username DESC", &registry).unwrap() {
        CompiledTemplate::Select(select) => {
            assert!(select.distinct);
            assert_eq!(select.sort.len(), 1);
            assert_eq!(select.projection, ProjectionTarget::FullEntity);
        }
        CompiledTemplate::Bulk(_) => panic!("select compiled as a bulk statement"),
    }
}
