//! Deriva – a query derivation and projection engine for relational stores.
//!
//! Callers describe *what* they want and the engine works out the statement:
//! * by method name, e.g. `findByUsernameAndAgeGreaterThan`,
//! * by an explicit template, e.g. `select m from Member m where m.age > :age`,
//! * or by example, from a partially populated probe.
//!
//! Every description is checked against a static schema when its repository
//! definition is built, so a misspelled property fails once at start-up and
//! never at call time. Results come back as full entities, scalars, interface
//! shaped views or constructor DTOs, optionally wrapped in a [`page::Page`]
//! (total known) or a [`page::Slice`] (only "has more" known).
//!
//! ## Modules
//! * [`schema`] – Entity descriptors and the registry resolving property paths.
//! * [`derive`] – Method name parsing into predicate trees.
//! * [`template`] – The query template language (grammar in `template.pest`).
//! * [`compile`] – SQL generation with join inference and count statements.
//! * [`execute`] – Argument binding and execution through [`storage::Storage`].
//! * [`page`] – Page and slice envelopes.
//! * [`projection`] – Projection targets and the row mapper.
//! * [`example`] – Query by example.
//! * [`repository`] – Repository definitions and the callable method table.
//!
//! ## Storage
//! The engine only needs a [`storage::Storage`]. [`storage::SqliteStorage`]
//! implements it over a single SQLite connection. Transactions are owned by the
//! caller; a `PessimisticWrite` query opens one when none is active and it stays
//! open until the caller commits or rolls back. Until then other units of work
//! on the same storage wait (see [`storage::UnitOfWork`]).
//!
//! ## Quick Start
//! ```
//! use std::sync::Arc;
//! use deriva::execute::Args;
//! use deriva::projection::EntityRecord;
//! use deriva::repository::{QueryMethod, RepositoryDefinition};
//! use deriva::schema::{EntityDescriptor, SchemaRegistry};
//! use deriva::storage::SqliteStorage;
//! use deriva::value::ScalarType;
//!
//! let registry = SchemaRegistry::builder()
//!     .entity(
//!         EntityDescriptor::new("Member", "member")
//!             .id("id", "member_id")
//!             .field("username", ScalarType::Text, false)
//!             .field("age", ScalarType::Integer, false),
//!     )
//!     .build()?;
//! let storage = SqliteStorage::open_in_memory()?;
//! storage.execute_batch(
//!     "create table member (member_id integer primary key, username text not null, age integer not null);
//!      insert into member (username, age) values ('aaa', 10), ('aaa', 20);",
//! )?;
//! let members = RepositoryDefinition::for_entity("Member")
//!     .method(QueryMethod::derived("findByUsernameAndAgeGreaterThan"))
//!     .build(Arc::new(registry), Arc::new(storage))?;
//! let found: Vec<EntityRecord> =
//!     members.list("findByUsernameAndAgeGreaterThan", Args::new().arg("aaa").arg(15))?;
//! assert_eq!(found.len(), 1);
//! # Ok::<(), deriva::error::DerivaError>(())
//! ```
//!
//! ## Configuration
//! [`config::EngineConfig`] layers built-in defaults, an optional `deriva.toml`
//! and `DERIVA__` environment variables.

pub mod compile;
pub mod config;
pub mod derive;
pub mod error;
pub mod example;
pub mod execute;
pub mod page;
pub mod predicate;
pub mod projection;
pub mod query;
pub mod repository;
pub mod schema;
pub mod storage;
pub mod template;
pub mod value;
