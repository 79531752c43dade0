mod common;

use deriva::error::{DerivaError, Result};
use deriva::execute::Args;
use deriva::projection::{
    ClosedShape, DtoRecord, DtoShape, EntityRecord, FromProjected, OpenShape, Projected, Projection,
    ProjectionTarget, View,
};
use deriva::repository::{QueryMethod, RepositoryDefinition};
use deriva::value::Value;

fn rejected(method: QueryMethod) -> DerivaError {
    RepositoryDefinition::for_entity("Member")
        .method(method)
        .build(common::registry(), common::seeded_storage())
        .err()
        .expect("definition is rejected")
}

#[test]
fn closed_and_open_interfaces_agree() {
    let closed = ClosedShape::new("UsernameOnly").field("username");
    let open = OpenShape::new("UsernameOnly").accessor("username", |member| {
        Ok(member.get("username").cloned().unwrap_or(Value::Null))
    });
    let members = RepositoryDefinition::for_entity("Member")
        .method(
            QueryMethod::derived("findByAgeGreaterThan").projecting(ProjectionTarget::ClosedInterface(closed)),
        )
        .method(QueryMethod::derived("findByAgeLessThan").projecting(ProjectionTarget::OpenInterface(open)))
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let narrowed: Vec<View> = members.list("findByAgeGreaterThan", Args::new().arg(0)).unwrap();
    let evaluated: Vec<View> = members.list("findByAgeLessThan", Args::new().arg(100)).unwrap();
    assert_eq!(narrowed.len(), 5);
    assert_eq!(narrowed, evaluated);
    assert_eq!(narrowed[0].get("username"), Some(&Value::from("member1")));
}

fn usernames_of(target: ProjectionTarget) -> Vec<String> {
    let members = RepositoryDefinition::for_entity("Member")
        .method(QueryMethod::derived("findByTeamNameOrUsername").projecting(target))
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let views: Vec<View> = members
        .list("findByTeamNameOrUsername", Args::new().arg("teamA").arg("member5"))
        .unwrap();
    views
        .iter()
        .map(|v| v.get("username").and_then(Value::as_str).unwrap_or_default().to_owned())
        .collect()
}

#[test]
fn disjunction_across_an_association_keeps_rows_without_one() {
    let members = RepositoryDefinition::for_entity("Member")
        .method(QueryMethod::derived("findByTeamNameOrUsername"))
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let entities: Vec<EntityRecord> = members
        .list("findByTeamNameOrUsername", Args::new().arg("teamA").arg("member5"))
        .unwrap();
    let full: Vec<String> = entities
        .iter()
        .map(|m| m.get("username").and_then(Value::as_str).unwrap_or_default().to_owned())
        .collect();
    assert_eq!(full, vec!["member1", "member2", "member5"]);

    let closed = usernames_of(ProjectionTarget::ClosedInterface(
        ClosedShape::new("UsernameOnly").field("username"),
    ));
    let open = usernames_of(ProjectionTarget::OpenInterface(OpenShape::new("UsernameOnly").accessor(
        "username",
        |member| Ok(member.get("username").cloned().unwrap_or(Value::Null)),
    )));
    assert_eq!(closed, full);
    assert_eq!(open, full);
}

#[test]
fn closed_interface_with_nested_association() {
    let shape = ClosedShape::new("MemberTeam")
        .field("username")
        .nested("team", ClosedShape::new("TeamName").field("name"));
    let members = RepositoryDefinition::for_entity("Member")
        .method(QueryMethod::derived("findByAgeGreaterThan").projecting(ProjectionTarget::ClosedInterface(shape)))
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let views: Vec<View> = members.list("findByAgeGreaterThan", Args::new().arg(25)).unwrap();
    assert_eq!(views.len(), 3);
    let team = views[0].nested("team").expect("member3 has a team");
    assert_eq!(team.shape(), "TeamName");
    assert_eq!(team.get("name"), Some(&Value::from("teamB")));
    assert!(views[2].nested("team").is_none());
}

#[test]
fn closed_interfaces_are_validated_up_front() {
    let unknown = rejected(
        QueryMethod::derived("findByAgeGreaterThan")
            .projecting(ProjectionTarget::ClosedInterface(ClosedShape::new("Nick").field("nickname"))),
    );
    assert!(matches!(unknown, DerivaError::Definition { .. }));

    let too_deep = rejected(QueryMethod::derived("findByAgeGreaterThan").projecting(
        ProjectionTarget::ClosedInterface(ClosedShape::new("Deep").nested(
            "team",
            ClosedShape::new("TeamDeep").nested("members", ClosedShape::new("Inner").field("username")),
        )),
    ));
    assert!(matches!(too_deep, DerivaError::Definition { .. }));
}

#[test]
fn open_interface_reads_fetched_associations() {
    let label = OpenShape::new("Label").accessor("label", |member| {
        let team = match member.association("team")? {
            Some(team) => team.get("name").and_then(Value::as_str).unwrap_or_default().to_owned(),
            None => "none".to_owned(),
        };
        let username = member.get("username").and_then(Value::as_str).unwrap_or_default();
        Ok(Value::from(format!("{username}@{team}")))
    });
    let members = RepositoryDefinition::for_entity("Member")
        .method(QueryMethod::derived("findByAgeGreaterThan").projecting(ProjectionTarget::OpenInterface(label)))
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let views: Vec<View> = members.list("findByAgeGreaterThan", Args::new().arg(35)).unwrap();
    let labels: Vec<&Value> = views.iter().filter_map(|v| v.get("label")).collect();
    assert_eq!(labels, vec![&Value::from("member4@teamB"), &Value::from("member5@none")]);
}

#[test]
fn dto_parameters_match_paths_and_camel_case() {
    let members = RepositoryDefinition::for_entity("Member")
        .method(
            QueryMethod::derived("findByUsername")
                .projecting(ProjectionTarget::ConstructorDto(DtoShape::new("MemberDto", &["username", "teamName"]))),
        )
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let dtos: Vec<DtoRecord> = members.list("findByUsername", Args::new().arg("member1")).unwrap();
    assert_eq!(dtos.len(), 1);
    let mut dto = dtos[0].clone();
    assert_eq!(dto.take("teamName").unwrap(), Value::from("teamA"));
    assert_eq!(dto.take("username").unwrap(), Value::from("member1"));
    assert!(matches!(dto.take("username"), Err(DerivaError::Mapping(_))));
}

#[test]
fn dto_parameter_without_a_column_is_a_mapping_error() {
    let members = RepositoryDefinition::for_entity("Member")
        .method(
            QueryMethod::derived("findByUsername")
                .projecting(ProjectionTarget::ConstructorDto(DtoShape::new("MemberDto", &["username", "nickname"]))),
        )
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let err = members
        .list::<DtoRecord>("findByUsername", Args::new().arg("member1"))
        .unwrap_err();
    assert!(matches!(err, DerivaError::Mapping(ref message) if message.contains("nickname")));
    // also without any matching row
    let err = members
        .list::<DtoRecord>("findByUsername", Args::new().arg("nobody"))
        .unwrap_err();
    assert!(matches!(err, DerivaError::Mapping(ref message) if message.contains("nickname")));
}

#[test]
fn scalar_projections() {
    let members = RepositoryDefinition::for_entity("Member")
        .method(QueryMethod::derived("findByAgeGreaterThan").projecting(ProjectionTarget::scalar("username")))
        .method(QueryMethod::derived("findByAgeLessThan").projecting(ProjectionTarget::scalar("team.name")))
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let names: Vec<String> = members.list("findByAgeGreaterThan", Args::new().arg(35)).unwrap();
    assert_eq!(names, vec!["member4", "member5"]);
    let teams: Vec<Value> = members.list("findByAgeLessThan", Args::new().arg(35)).unwrap();
    assert_eq!(teams, vec![Value::from("teamA"), Value::from("teamA"), Value::from("teamB")]);
}

#[derive(Debug, PartialEq)]
struct UsernameOnly {
    username: String,
}

impl FromProjected for UsernameOnly {
    fn from_projected(projected: Projected) -> Result<Self> {
        let view = View::from_projected(projected)?;
        let username = view
            .get("username")
            .and_then(Value::as_str)
            .ok_or_else(|| DerivaError::Mapping("username missing".into()))?;
        Ok(Self {
            username: username.to_owned(),
        })
    }
}

impl Projection for UsernameOnly {
    fn target() -> ProjectionTarget {
        ProjectionTarget::ClosedInterface(ClosedShape::new("UsernameOnly").field("username"))
    }
}

#[test]
fn dynamic_projection_is_chosen_per_call() {
    let members = RepositoryDefinition::for_entity("Member")
        .method(QueryMethod::derived("findByTeamName").dynamic())
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let typed: Vec<UsernameOnly> = members.dynamic("findByTeamName", Args::new().arg("teamB")).unwrap();
    assert_eq!(
        typed,
        vec![
            UsernameOnly {
                username: "member3".into()
            },
            UsernameOnly {
                username: "member4".into()
            }
        ]
    );
    let entities: Vec<EntityRecord> = members
        .list(
            "findByTeamName",
            Args::new().arg("teamB").project(ProjectionTarget::FullEntity),
        )
        .unwrap();
    assert_eq!(entities.len(), 2);

    let err = members
        .list::<EntityRecord>("findByTeamName", Args::new().arg("teamB"))
        .unwrap_err();
    assert!(matches!(err, DerivaError::Mapping(_)));
}

#[test]
fn requesting_another_shape_than_projected_fails() {
    let members = RepositoryDefinition::for_entity("Member")
        .method(QueryMethod::derived("findByAgeGreaterThan").projecting(ProjectionTarget::scalar("username")))
        .build(common::registry(), common::seeded_storage())
        .unwrap();
    let err = members
        .list::<EntityRecord>("findByAgeGreaterThan", Args::new().arg(0))
        .unwrap_err();
    assert!(matches!(err, DerivaError::Mapping(_)));
}
