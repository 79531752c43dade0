//! Demonstration binary: seeds a small member/team database and prints a few
//! query results as JSON.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use deriva::config::EngineConfig;
use deriva::error::{DerivaError, Result};
use deriva::execute::Args;
use deriva::page::{Page, PageRequest};
use deriva::projection::{ClosedShape, DtoRecord, EntityRecord, ProjectionTarget, View};
use deriva::query::{Direction, ResultShape, Sort};
use deriva::repository::{QueryMethod, RepositoryDefinition};
use deriva::schema::{EntityDescriptor, SchemaRegistry};
use deriva::storage::SqliteStorage;
use deriva::value::ScalarType;

const SEED: &str = "
    create table if not exists team (
        team_id integer primary key,
        name text not null
    );
    create table if not exists member (
        member_id integer primary key,
        username text not null,
        age integer not null,
        team_id integer references team (team_id)
    );
    delete from member;
    delete from team;
    insert into team (team_id, name) values (1, 'teamA'), (2, 'teamB');
    insert into member (username, age, team_id) values
        ('member1', 10, 1), ('member2', 20, 1), ('member3', 30, 2),
        ('member4', 40, 2), ('member5', 50, null);
";

fn print_json<T: serde::Serialize>(label: &str, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| DerivaError::Mapping(e.to_string()))?;
    println!("{label}:\n{json}");
    Ok(())
}

fn main() -> Result<()> {
    let config = EngineConfig::load()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let registry = Arc::new(
        SchemaRegistry::builder()
            .entity(
                EntityDescriptor::new("Team", "team")
                    .id("id", "team_id")
                    .field("name", ScalarType::Text, false)
                    .has_many("members", "Member", "team"),
            )
            .entity(
                EntityDescriptor::new("Member", "member")
                    .id("id", "member_id")
                    .field("username", ScalarType::Text, false)
                    .field("age", ScalarType::Integer, false)
                    .belongs_to("team", "Team", "team_id"),
            )
            .build()?,
    );
    let storage = Arc::new(SqliteStorage::from_config(&config.storage)?);
    storage.execute_batch(SEED)?;
    info!(entities = registry.len(), "schema registered and seeded");

    let members = RepositoryDefinition::for_entity("Member")
        .paging(config.paging.clone())
        .method(QueryMethod::derived("findByAgeGreaterThan").returning(ResultShape::Page))
        .method(
            QueryMethod::derived("findByTeamName").projecting(ProjectionTarget::ClosedInterface(
                ClosedShape::new("UsernameOnly")
                    .field("username")
                    .nested("team", ClosedShape::new("TeamInfo").field("name")),
            )),
        )
        .method(QueryMethod::template(
            "findMemberDto",
            "select new MemberDto(m.id, m.username, t.name) from Member m join m.team t",
        ))
        .method(QueryMethod::template(
            "bulkAgePlus",
            "update Member m set m.age = m.age + 1 where m.age >= :age",
        ))
        .build(Arc::clone(&registry), storage.clone())?;

    let request = PageRequest::of(0, 3)?.sorted(Sort::by(Direction::Desc, &["username"]));
    let page: Page<EntityRecord> = members.page("findByAgeGreaterThan", Args::new().arg(15).page(request))?;
    print_json("members older than 15", &page)?;

    let views: Vec<View> = members.list("findByTeamName", Args::new().arg("teamA"))?;
    print_json("members of teamA", &views)?;

    let dtos: Vec<DtoRecord> = members.list("findMemberDto", Args::new())?;
    print_json("member DTOs", &dtos)?;

    let outcome = members.execute("bulkAgePlus", Args::new().param("age", 20))?;
    info!(affected = outcome.affected, stale = ?outcome.stale, "aged members");
    Ok(())
}
