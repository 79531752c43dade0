//! Execution engine: binds call arguments into compiled statements, runs them
//! through the storage interface and maps the rows.

use tracing::{debug, warn};

use crate::compile::{BoundStatement, Statement};
use crate::error::{DerivaError, Result};
use crate::page::PageRequest;
use crate::predicate::ParamSlot;
use crate::projection::{Mapper, MappingPlan, Projected, ProjectionTarget};
use crate::query::Sort;
use crate::schema::SchemaRegistry;
use crate::storage::{Directives, PersistenceContext, Storage, UnitOfWork};
use crate::value::{RowSet, Value};

/// Arguments of one call: parameter values plus paging, sorting and a
/// projection target for dynamic definitions.
#[derive(Debug, Clone, Default)]
pub struct Args {
    positional: Vec<Value>,
    named: Vec<(String, Value)>,
    page: Option<PageRequest>,
    sort: Sort,
    projection: Option<ProjectionTarget>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }
    pub fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.named.push((name.to_owned(), value.into()));
        self
    }
    pub fn page(mut self, request: PageRequest) -> Self {
        self.page = Some(request);
        self
    }
    pub fn sorted(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }
    pub fn project(mut self, target: ProjectionTarget) -> Self {
        self.projection = Some(target);
        self
    }

    pub fn page_request(&self) -> Option<&PageRequest> {
        self.page.as_ref()
    }
    pub fn projection(&self) -> Option<&ProjectionTarget> {
        self.projection.as_ref()
    }
    /// Call time sort: the explicit sort followed by the page request's.
    pub fn sort(&self) -> Sort {
        let mut sort = self.sort.clone();
        if let Some(page) = &self.page {
            sort = sort.and(page.sort().clone());
        }
        sort
    }

    // named slots fall back to positional arguments in order of first appearance
    pub(crate) fn lookup(&self, slot: &ParamSlot) -> Result<Value> {
        if let Some(name) = &slot.name {
            if let Some((_, value)) = self.named.iter().find(|(n, _)| n == name) {
                return Ok(value.clone());
            }
        }
        self.positional.get(slot.index).cloned().ok_or_else(|| {
            DerivaError::Parameter(format!(
                "no value for {slot} ({} positional and {} named arguments given)",
                self.positional.len(),
                self.named.len()
            ))
        })
    }
}

pub struct Engine<'a> {
    registry: &'a SchemaRegistry,
    storage: &'a dyn Storage,
    context: &'a dyn PersistenceContext,
    unit: Option<UnitOfWork>,
}

impl<'a> Engine<'a> {
    pub fn new(registry: &'a SchemaRegistry, storage: &'a dyn Storage, context: &'a dyn PersistenceContext) -> Self {
        Self {
            registry,
            storage,
            context,
            unit: None,
        }
    }

    /// Issues every statement on behalf of `unit`.
    pub fn within(mut self, unit: UnitOfWork) -> Self {
        self.unit = Some(unit);
        self
    }

    pub fn bind(&self, definition: &str, statement: &Statement, args: &Args) -> Result<BoundStatement> {
        let bound = statement.bind(|slot| args.lookup(slot))?;
        debug!(definition, sql = %bound.sql, values = bound.values.len(), "bound statement");
        Ok(bound)
    }

    pub fn rows(&self, definition: &str, statement: &Statement, args: &Args, directives: Directives) -> Result<RowSet> {
        let bound = self.bind(definition, statement, args)?;
        let directives = Directives {
            unit: directives.unit.or(self.unit),
            ..directives
        };
        self.storage
            .fetch(&bound, directives)
            .inspect_err(|e| warn!(definition, error = %e, "read failed"))
    }

    pub fn fetch(
        &self,
        definition: &str,
        statement: &Statement,
        plan: &MappingPlan,
        args: &Args,
        directives: Directives,
    ) -> Result<Vec<Projected>> {
        let rows = self.rows(definition, statement, args, directives)?;
        self.map(plan, rows, directives)
    }

    pub fn map(&self, plan: &MappingPlan, rows: RowSet, directives: Directives) -> Result<Vec<Projected>> {
        let mapped = Mapper::new(self.registry, plan).map_rows(rows)?;
        let ids: Vec<Value> = mapped
            .iter()
            .filter_map(|p| match p {
                Projected::Entity(record) => Some(record.id().clone()),
                _ => None,
            })
            .collect();
        if let (false, Some(entity)) = (ids.is_empty(), &plan.entity) {
            self.context.loaded(entity.name(), &ids, directives.hint);
        }
        Ok(mapped)
    }

    /// Zero or one result; two rows are an ambiguity.
    pub fn single(
        &self,
        definition: &str,
        statement: &Statement,
        plan: &MappingPlan,
        args: &Args,
        directives: Directives,
    ) -> Result<Option<Projected>> {
        let mut found = self.fetch(definition, statement, plan, args, directives)?;
        if found.len() > 1 {
            return Err(DerivaError::NotFoundAmbiguity {
                definition: definition.to_owned(),
            });
        }
        Ok(found.pop())
    }

    /// Reads the first column of the first row as a count.
    pub fn count(&self, definition: &str, statement: &Statement, args: &Args, directives: Directives) -> Result<u64> {
        let rows = self.rows(definition, statement, args, directives)?;
        let value = rows
            .rows()
            .first()
            .and_then(|row| row.values().first())
            .ok_or_else(|| DerivaError::Mapping(format!("count query of '{definition}' returned no row")))?;
        let count = value
            .as_i64()
            .ok_or_else(|| DerivaError::Mapping(format!("count query of '{definition}' returned {value}")))?;
        u64::try_from(count).map_err(|e| DerivaError::Mapping(format!("negative count {count}: {e}")))
    }

    pub fn exists(&self, definition: &str, statement: &Statement, args: &Args, directives: Directives) -> Result<bool> {
        Ok(!self.rows(definition, statement, args, directives)?.is_empty())
    }

    pub fn execute(&self, definition: &str, statement: &Statement, args: &Args) -> Result<usize> {
        let bound = self.bind(definition, statement, args)?;
        let directives = Directives {
            unit: self.unit,
            ..Directives::default()
        };
        self.storage
            .execute(&bound, directives)
            .inspect_err(|e| warn!(definition, error = %e, "bulk statement failed"))
    }
}
