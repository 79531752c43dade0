//! Query by example: a partially populated probe becomes a conjunction of
//! equality comparisons.

use crate::error::{DerivaError, Result};
use crate::predicate::{Operand, Operator, PredicateNode};
use crate::projection::EntityRecord;
use crate::schema::{EntityDescriptor, FieldPath};
use crate::value::Value;

/// A probe instance of an entity. Fields never set are unset, as are fields
/// set to null unless the matcher includes nulls.
#[derive(Debug, Clone, PartialEq)]
pub struct Probe {
    entity: String,
    values: Vec<(String, Value)>,
}

impl Probe {
    pub fn of(entity: &str) -> Self {
        Self {
            entity: entity.to_owned(),
            values: Vec::new(),
        }
    }
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.values.push((field.to_owned(), value.into()));
        self
    }
    /// Uses every field of a mapped entity as the probe.
    pub fn from_record(record: &EntityRecord) -> Self {
        Self {
            entity: record.entity().to_owned(),
            values: record.fields().to_vec(),
        }
    }
    pub fn entity(&self) -> &str {
        &self.entity
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExampleMatcher {
    ignored: Vec<String>,
    include_nulls: bool,
}

impl ExampleMatcher {
    pub fn matching() -> Self {
        Self::default()
    }
    pub fn with_ignore_paths(mut self, paths: &[&str]) -> Self {
        self.ignored.extend(paths.iter().map(|p| (*p).to_owned()));
        self
    }
    /// Null probe values match as `IS NULL` instead of being skipped.
    pub fn with_include_nulls(mut self) -> Self {
        self.include_nulls = true;
        self
    }

    pub fn predicate(&self, probe: &Probe, entity: &EntityDescriptor) -> Result<Option<PredicateNode>> {
        if probe.entity != entity.name() {
            return Err(DerivaError::definition(
                "example",
                format!("probe of {} used on {}", probe.entity, entity.name()),
            ));
        }
        let mut comparisons = Vec::new();
        for (field, value) in &probe.values {
            if entity.field_named(field).is_none() {
                return Err(DerivaError::definition(
                    "example",
                    format!("{} has no field '{field}'", entity.name()),
                ));
            }
            if self.ignored.iter().any(|i| i == field) {
                continue;
            }
            let path = FieldPath::new(vec![field.clone()]);
            match value {
                Value::Null if self.include_nulls => {
                    comparisons.push(PredicateNode::comparison(path, Operator::IsNull, Operand::None));
                }
                Value::Null => (),
                value => comparisons.push(PredicateNode::comparison(
                    path,
                    Operator::Equals,
                    Operand::Literal(value.clone()),
                )),
            }
        }
        Ok(PredicateNode::all(comparisons))
    }
}
