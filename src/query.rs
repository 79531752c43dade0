//! Storage agnostic descriptions of what a caller asked for.

use std::sync::Arc;

use crate::predicate::{Operand, ParamSlot, PredicateNode};
use crate::projection::ProjectionTarget;
use crate::schema::{EntityDescriptor, FieldDescriptor, FieldPath};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    #[default]
    None,
    PessimisticWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchHint {
    #[default]
    None,
    ReadOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    /// Zero or one row; more is an ambiguity.
    Single,
    List,
    Page,
    Slice,
    Count,
    Exists,
    /// Update or delete, answering with an affected row count.
    Bulk,
}

impl ResultShape {
    pub fn is_paged(&self) -> bool {
        matches!(self, ResultShape::Page | ResultShape::Slice)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDirective {
    pub path: FieldPath,
    pub direction: Direction,
}

impl SortDirective {
    pub fn asc(path: &str) -> Self {
        Self {
            path: FieldPath::parse(path),
            direction: Direction::Asc,
        }
    }
    pub fn desc(path: &str) -> Self {
        Self {
            path: FieldPath::parse(path),
            direction: Direction::Desc,
        }
    }
}

/// Ordered sort directives.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sort(Vec<SortDirective>);

impl Sort {
    pub fn unsorted() -> Self {
        Self(Vec::new())
    }
    pub fn by(direction: Direction, properties: &[&str]) -> Self {
        Self(
            properties
                .iter()
                .map(|p| SortDirective {
                    path: FieldPath::parse(p),
                    direction,
                })
                .collect(),
        )
    }
    pub fn and(mut self, other: Sort) -> Self {
        self.0.extend(other.0);
        self
    }
    pub fn directives(&self) -> &[SortDirective] {
        &self.0
    }
    pub fn is_unsorted(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<SortDirective>> for Sort {
    fn from(directives: Vec<SortDirective>) -> Self {
        Self(directives)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

/// A join on an association path from the root entity. `fetch` populates the
/// association on full entity results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequirement {
    pub path: FieldPath,
    pub kind: JoinKind,
    pub fetch: bool,
}

/// An explicitly selected column, as written in a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub path: FieldPath,
    pub alias: String,
}

/// A compiled select over the schema.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub entity: Arc<EntityDescriptor>,
    pub predicate: Option<PredicateNode>,
    pub joins: Vec<JoinRequirement>,
    pub selections: Vec<Selection>,
    pub projection: ProjectionTarget,
    pub sort: Vec<SortDirective>,
    pub shape: ResultShape,
    pub limit: Option<usize>,
    pub distinct: bool,
    pub lock: LockMode,
    pub hint: FetchHint,
    pub params: Vec<ParamSlot>,
}

impl QuerySpec {
    pub fn new(entity: Arc<EntityDescriptor>, shape: ResultShape) -> Self {
        Self {
            entity,
            predicate: None,
            joins: Vec::new(),
            selections: Vec::new(),
            projection: ProjectionTarget::FullEntity,
            sort: Vec::new(),
            shape,
            limit: None,
            distinct: false,
            lock: LockMode::None,
            hint: FetchHint::None,
            params: Vec::new(),
        }
    }
    pub fn fetches(&self, path: &FieldPath) -> bool {
        self.joins.iter().any(|j| j.fetch && &j.path == path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl ArithmeticOperator {
    pub fn sql(&self) -> &'static str {
        match self {
            ArithmeticOperator::Add => "+",
            ArithmeticOperator::Subtract => "-",
            ArithmeticOperator::Multiply => "*",
            ArithmeticOperator::Divide => "/",
        }
    }
}

/// Right hand side of a bulk assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueExpr {
    Operand(Operand),
    Field(FieldDescriptor),
    Binary(ArithmeticOperator, Box<ValueExpr>, Box<ValueExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub field: FieldDescriptor,
    pub value: ValueExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Update(Vec<Assignment>),
    Delete,
}

/// An update or delete touching every row matching the predicate.
#[derive(Debug, Clone)]
pub struct BulkSpec {
    pub entity: Arc<EntityDescriptor>,
    pub mutation: Mutation,
    pub predicate: Option<PredicateNode>,
    pub params: Vec<ParamSlot>,
}

/// Raw statement text passed to the store as is.
#[derive(Debug, Clone)]
pub struct NativeSpec {
    pub sql: String,
    pub count_sql: Option<String>,
    pub entity: Option<Arc<EntityDescriptor>>,
    pub projection: ProjectionTarget,
    pub shape: ResultShape,
    pub lock: LockMode,
    pub hint: FetchHint,
}
