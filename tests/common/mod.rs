#![allow(dead_code)]

use std::sync::Arc;

use deriva::schema::{EntityDescriptor, SchemaRegistry};
use deriva::storage::SqliteStorage;
use deriva::value::ScalarType;

pub const SCHEMA_SQL: &str = "
    create table team (
        team_id integer primary key,
        name text not null
    );
    create table member (
        member_id integer primary key,
        username text not null,
        age integer not null,
        team_id integer references team (team_id)
    );
";

/// Two teams and five members; member5 has no team.
pub const SEED_SQL: &str = "
    insert into team (team_id, name) values (1, 'teamA'), (2, 'teamB');
    insert into member (member_id, username, age, team_id) values
        (1, 'member1', 10, 1),
        (2, 'member2', 20, 1),
        (3, 'member3', 30, 2),
        (4, 'member4', 40, 2),
        (5, 'member5', 50, null);
";

pub fn registry() -> Arc<SchemaRegistry> {
    Arc::new(
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
            .build()
            .expect("schema builds"),
    )
}

/// Empty tables.
pub fn empty_storage() -> Arc<SqliteStorage> {
    let storage = SqliteStorage::open_in_memory().expect("in-memory database");
    storage.execute_batch(SCHEMA_SQL).expect("schema created");
    Arc::new(storage)
}

/// Tables holding the two teams and five members.
pub fn seeded_storage() -> Arc<SqliteStorage> {
    let storage = empty_storage();
    storage.execute_batch(SEED_SQL).expect("seed data");
    storage
}
