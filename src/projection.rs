//! Result shapes and the mapper turning raw rows into them.
//!
//! Closed interfaces and DTOs let the compiler narrow the select list; open
//! interfaces always fetch the entity graph and evaluate their accessors
//! afterwards.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::trace;

use crate::error::{DerivaError, Result};
use crate::schema::{Cardinality, EntityDescriptor, FieldPath, SchemaRegistry};
use crate::value::{Row, RowSet, ScalarType, Value};

/// Alias prefix for foreign key columns read to tag unfetched associations.
pub const REFERENCE_MARKER: &str = "@";

// ------------- Targets -------------
#[derive(Debug, Clone, PartialEq)]
pub enum Accessor {
    Field(String),
    Nested(String, ClosedShape),
}

/// Accessors statically known up front.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedShape {
    name: String,
    accessors: Vec<Accessor>,
}

impl ClosedShape {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            accessors: Vec::new(),
        }
    }
    pub fn field(mut self, name: &str) -> Self {
        self.accessors.push(Accessor::Field(name.to_owned()));
        self
    }
    pub fn nested(mut self, association: &str, shape: ClosedShape) -> Self {
        self.accessors.push(Accessor::Nested(association.to_owned(), shape));
        self
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn accessors(&self) -> &[Accessor] {
        &self.accessors
    }
}

type Expression = Arc<dyn Fn(&EntityRecord) -> Result<Value> + Send + Sync>;

/// An accessor whose value is computed from the whole entity.
#[derive(Clone)]
pub struct OpenAccessor {
    name: String,
    expression: Expression,
}

impl fmt::Debug for OpenAccessor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "OpenAccessor({})", self.name)
    }
}

impl PartialEq for OpenAccessor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && Arc::ptr_eq(&self.expression, &other.expression)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenShape {
    name: String,
    accessors: Vec<OpenAccessor>,
}

impl OpenShape {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            accessors: Vec::new(),
        }
    }
    pub fn accessor<F>(mut self, name: &str, expression: F) -> Self
    where
        F: Fn(&EntityRecord) -> Result<Value> + Send + Sync + 'static,
    {
        self.accessors.push(OpenAccessor {
            name: name.to_owned(),
            expression: Arc::new(expression),
        });
        self
    }
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Constructor parameters, bound by name against column aliases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtoShape {
    type_name: String,
    parameters: Vec<String>,
}

impl DtoShape {
    pub fn new(type_name: &str, parameters: &[&str]) -> Self {
        Self {
            type_name: type_name.to_owned(),
            parameters: parameters.iter().map(|p| (*p).to_owned()).collect(),
        }
    }
    pub fn type_name(&self) -> &str {
        &self.type_name
    }
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionTarget {
    FullEntity,
    ScalarList(FieldPath),
    ClosedInterface(ClosedShape),
    OpenInterface(OpenShape),
    ConstructorDto(DtoShape),
    /// Concrete target supplied with each call.
    Dynamic,
}

impl ProjectionTarget {
    pub fn scalar(path: &str) -> Self {
        ProjectionTarget::ScalarList(FieldPath::parse(path))
    }
    /// Whether the select list can be narrowed to what the target reads.
    pub fn is_narrowable(&self) -> bool {
        matches!(
            self,
            ProjectionTarget::ScalarList(_)
                | ProjectionTarget::ClosedInterface(_)
                | ProjectionTarget::ConstructorDto(_)
        )
    }
    /// Replaces `Dynamic` by the target given at call time.
    pub fn resolve(&self, call_time: Option<&ProjectionTarget>) -> Result<ProjectionTarget> {
        match (self, call_time) {
            (ProjectionTarget::Dynamic, Some(ProjectionTarget::Dynamic)) => Err(DerivaError::Mapping(
                "a dynamic projection cannot be resolved to another dynamic projection".into(),
            )),
            (ProjectionTarget::Dynamic, Some(target)) => Ok(target.clone()),
            (ProjectionTarget::Dynamic, None) => Err(DerivaError::Mapping(
                "dynamic projection requires a target type at call time".into(),
            )),
            (target, _) => Ok(target.clone()),
        }
    }
}

// ------------- Results -------------
/// State of an association on a mapped entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Link {
    /// Fetched with the entity. `None` when there is no associated entity.
    Loaded(Option<Box<EntityRecord>>),
    LoadedMany(Vec<EntityRecord>),
    /// Not fetched. Holds the key needed to load it while a data-access scope is
    /// available.
    Unresolved { target: String, key: Value },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRecord {
    entity: String,
    id: String,
    fields: Vec<(String, Value)>,
    links: Vec<(String, Link)>,
}

impl EntityRecord {
    pub fn entity(&self) -> &str {
        &self.entity
    }
    pub fn id(&self) -> &Value {
        self.get(&self.id).unwrap_or(&Value::Null)
    }
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == field).map(|(_, v)| v)
    }
    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }
    pub fn link(&self, association: &str) -> Option<&Link> {
        self.links.iter().find(|(n, _)| n == association).map(|(_, l)| l)
    }
    pub fn is_loaded(&self, association: &str) -> bool {
        matches!(self.link(association), Some(Link::Loaded(_)) | Some(Link::LoadedMany(_)))
    }
    /// Reads a to-one association. Fails if it was not fetched.
    pub fn association(&self, name: &str) -> Result<Option<&EntityRecord>> {
        match self.link(name) {
            Some(Link::Loaded(loaded)) => Ok(loaded.as_deref()),
            Some(Link::LoadedMany(_)) => Err(DerivaError::Mapping(format!(
                "association '{name}' of {} is a collection",
                self.entity
            ))),
            _ => Err(self.detached(name)),
        }
    }
    /// Reads a to-many association. Fails if it was not fetched.
    pub fn collection(&self, name: &str) -> Result<&[EntityRecord]> {
        match self.link(name) {
            Some(Link::LoadedMany(loaded)) => Ok(loaded),
            Some(Link::Loaded(_)) => Err(DerivaError::Mapping(format!(
                "association '{name}' of {} is not a collection",
                self.entity
            ))),
            _ => Err(self.detached(name)),
        }
    }
    pub(crate) fn set_link(&mut self, association: &str, link: Link) {
        match self.links.iter_mut().find(|(n, _)| n == association) {
            Some(entry) => entry.1 = link,
            None => self.links.push((association.to_owned(), link)),
        }
    }
    fn detached(&self, association: &str) -> DerivaError {
        DerivaError::DetachedAccess {
            entity: self.entity.clone(),
            association: association.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ViewValue {
    Value(Value),
    Nested(Option<View>),
}

/// An interface shaped result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct View {
    shape: String,
    entries: Vec<(String, ViewValue)>,
}

impl View {
    pub fn shape(&self) -> &str {
        &self.shape
    }
    pub fn get(&self, accessor: &str) -> Option<&Value> {
        match self.entry(accessor) {
            Some(ViewValue::Value(v)) => Some(v),
            _ => None,
        }
    }
    pub fn nested(&self, accessor: &str) -> Option<&View> {
        match self.entry(accessor) {
            Some(ViewValue::Nested(n)) => n.as_ref(),
            _ => None,
        }
    }
    pub fn entries(&self) -> &[(String, ViewValue)] {
        &self.entries
    }
    fn entry(&self, accessor: &str) -> Option<&ViewValue> {
        self.entries.iter().find(|(n, _)| n == accessor).map(|(_, v)| v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DtoRecord {
    type_name: String,
    arguments: Vec<(String, Value)>,
}

impl DtoRecord {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }
    pub fn get(&self, parameter: &str) -> Option<&Value> {
        self.arguments.iter().find(|(n, _)| n == parameter).map(|(_, v)| v)
    }
    /// Removes an argument by name, for handing it to a constructor.
    pub fn take(&mut self, parameter: &str) -> Result<Value> {
        let position = self
            .arguments
            .iter()
            .position(|(n, _)| n == parameter)
            .ok_or_else(|| {
                DerivaError::Mapping(format!(
                    "{} has no constructor argument '{parameter}'",
                    self.type_name
                ))
            })?;
        Ok(self.arguments.remove(position).1)
    }
    pub fn into_arguments(self) -> Vec<Value> {
        self.arguments.into_iter().map(|(_, v)| v).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Projected {
    Entity(EntityRecord),
    Scalar(Value),
    View(View),
    Dto(DtoRecord),
}

// ------------- Typed conversion -------------
/// Conversion from a mapped row into a caller type.
pub trait FromProjected: Sized {
    fn from_projected(projected: Projected) -> Result<Self>;
}

/// A caller type usable as a call-time projection target.
pub trait Projection: FromProjected {
    fn target() -> ProjectionTarget;
}

fn mismatch(expected: &str, found: &Projected) -> DerivaError {
    let found = match found {
        Projected::Entity(_) => "entity",
        Projected::Scalar(_) => "scalar",
        Projected::View(_) => "interface view",
        Projected::Dto(_) => "constructor DTO",
    };
    DerivaError::Mapping(format!("projection shape mismatch: expected {expected}, found {found}"))
}

impl FromProjected for Projected {
    fn from_projected(projected: Projected) -> Result<Self> {
        Ok(projected)
    }
}
impl FromProjected for EntityRecord {
    fn from_projected(projected: Projected) -> Result<Self> {
        match projected {
            Projected::Entity(e) => Ok(e),
            other => Err(mismatch("entity", &other)),
        }
    }
}
impl FromProjected for View {
    fn from_projected(projected: Projected) -> Result<Self> {
        match projected {
            Projected::View(v) => Ok(v),
            other => Err(mismatch("interface view", &other)),
        }
    }
}
impl FromProjected for DtoRecord {
    fn from_projected(projected: Projected) -> Result<Self> {
        match projected {
            Projected::Dto(d) => Ok(d),
            other => Err(mismatch("constructor DTO", &other)),
        }
    }
}
impl FromProjected for Value {
    fn from_projected(projected: Projected) -> Result<Self> {
        match projected {
            Projected::Scalar(v) => Ok(v),
            other => Err(mismatch("scalar", &other)),
        }
    }
}
impl FromProjected for String {
    fn from_projected(projected: Projected) -> Result<Self> {
        Value::from_projected(projected)?.try_into()
    }
}
impl FromProjected for i64 {
    fn from_projected(projected: Projected) -> Result<Self> {
        Value::from_projected(projected)?.try_into()
    }
}

// ------------- Mapper -------------
/// What the mapper needs to know about a compiled query.
#[derive(Debug, Clone)]
pub struct MappingPlan {
    pub target: ProjectionTarget,
    pub entity: Option<Arc<EntityDescriptor>>,
    /// Root associations populated by a fetch join.
    pub fetched: Vec<String>,
    /// Schema types of selected columns by alias, for coercing raw values.
    pub column_types: HashMap<String, ScalarType>,
}

pub struct Mapper<'a> {
    registry: &'a SchemaRegistry,
    plan: &'a MappingPlan,
}

impl<'a> Mapper<'a> {
    pub fn new(registry: &'a SchemaRegistry, plan: &'a MappingPlan) -> Self {
        Self { registry, plan }
    }

    pub fn map_rows(&self, rows: RowSet) -> Result<Vec<Projected>> {
        // checked once so an empty result still reports unmatched parameters
        if let ProjectionTarget::ConstructorDto(shape) = &self.plan.target {
            for parameter in &shape.parameters {
                dto_column(shape, parameter, rows.columns())?;
            }
        }
        let mut mapped = Vec::with_capacity(rows.len());
        for row in rows.into_rows() {
            let row = self.coerce(row)?;
            trace!(columns = row.columns().len(), "mapping row");
            mapped.push(self.map_row(&row)?);
        }
        Ok(mapped)
    }

    fn coerce(&self, row: Row) -> Result<Row> {
        if self.plan.column_types.is_empty() {
            return Ok(row);
        }
        let columns = row.shared_columns();
        let mut values = Vec::with_capacity(columns.len());
        for (column, value) in row.iter() {
            values.push(match self.plan.column_types.get(column) {
                Some(scalar) => scalar.coerce(value.clone())?,
                None => value.clone(),
            });
        }
        Ok(Row::new(columns, values))
    }

    fn map_row(&self, row: &Row) -> Result<Projected> {
        match &self.plan.target {
            ProjectionTarget::FullEntity => Ok(Projected::Entity(self.entity_from_row(row)?)),
            ProjectionTarget::ScalarList(path) => {
                let alias = path.to_string();
                let value = match row.get(&alias) {
                    Some(v) => v.clone(),
                    None if row.values().len() == 1 => row.values()[0].clone(),
                    None => {
                        return Err(DerivaError::Mapping(format!(
                            "no column '{alias}' for scalar projection"
                        )));
                    }
                };
                Ok(Projected::Scalar(value))
            }
            ProjectionTarget::ClosedInterface(shape) => {
                Ok(Projected::View(closed_view(shape, row, "")?))
            }
            ProjectionTarget::OpenInterface(shape) => {
                let record = self.entity_from_row(row)?;
                let mut entries = Vec::with_capacity(shape.accessors.len());
                for accessor in &shape.accessors {
                    let value = (accessor.expression)(&record)?;
                    entries.push((accessor.name.clone(), ViewValue::Value(value)));
                }
                Ok(Projected::View(View {
                    shape: shape.name.clone(),
                    entries,
                }))
            }
            ProjectionTarget::ConstructorDto(shape) => Ok(Projected::Dto(dto_from_row(shape, row)?)),
            ProjectionTarget::Dynamic => Err(DerivaError::Mapping(
                "dynamic projection reached the mapper unresolved".into(),
            )),
        }
    }

    fn entity_from_row(&self, row: &Row) -> Result<EntityRecord> {
        let entity = self.plan.entity.as_ref().ok_or_else(|| {
            DerivaError::Mapping("entity projection requires a known entity".into())
        })?;
        self.entity_with_prefix(entity, row, "", true)
    }

    // Columns are looked up by field alias (compiled queries) or by column name
    // (native queries).
    fn entity_with_prefix(
        &self,
        entity: &EntityDescriptor,
        row: &Row,
        prefix: &str,
        root: bool,
    ) -> Result<EntityRecord> {
        let mut fields = Vec::with_capacity(entity.fields().len());
        for field in entity.fields() {
            let alias = format!("{prefix}{}", field.name());
            let value = match row.get(&alias) {
                Some(v) => field.scalar().coerce(v.clone())?,
                None if prefix.is_empty() => match row.get(field.column()) {
                    Some(v) => field.scalar().coerce(v.clone())?,
                    None => {
                        return Err(DerivaError::Mapping(format!(
                            "no column for field '{}' of {}",
                            field.name(),
                            entity.name()
                        )));
                    }
                },
                None => {
                    return Err(DerivaError::Mapping(format!(
                        "no column '{alias}' for fetched {}",
                        entity.name()
                    )));
                }
            };
            fields.push((field.name().to_owned(), value));
        }
        let mut record = EntityRecord {
            entity: entity.name().to_owned(),
            id: entity.id_name().to_owned(),
            fields,
            links: Vec::new(),
        };
        for association in entity.associations() {
            let link = match association.cardinality() {
                Cardinality::One if root && self.plan.fetched.iter().any(|f| f == association.name()) => {
                    let target = self.registry.entity(association.target()).ok_or_else(|| {
                        DerivaError::Mapping(format!("unknown entity '{}'", association.target()))
                    })?;
                    let nested_prefix = format!("{}.", association.name());
                    let id_alias = format!("{nested_prefix}{}", target.id_name());
                    match row.get(&id_alias) {
                        Some(Value::Null) | None => Link::Loaded(None),
                        Some(_) => Link::Loaded(Some(Box::new(self.entity_with_prefix(
                            &target,
                            row,
                            &nested_prefix,
                            false,
                        )?))),
                    }
                }
                Cardinality::One => {
                    let marker = format!("{prefix}{REFERENCE_MARKER}{}", association.name());
                    let key = row
                        .get(&marker)
                        .or_else(|| {
                            // native rows carry the raw foreign key column
                            association
                                .join_column()
                                .filter(|_| prefix.is_empty())
                                .and_then(|column| row.get(column))
                        })
                        .cloned();
                    match key {
                        Some(Value::Null) => Link::Loaded(None),
                        Some(key) => Link::Unresolved {
                            target: association.target().to_owned(),
                            key,
                        },
                        // key not selected at all, nothing is known about the association
                        None => Link::Unresolved {
                            target: association.target().to_owned(),
                            key: Value::Null,
                        },
                    }
                }
                Cardinality::Many => Link::Unresolved {
                    target: association.target().to_owned(),
                    key: record.id().clone(),
                },
            };
            record.links.push((association.name().to_owned(), link));
        }
        Ok(record)
    }
}

fn closed_view(shape: &ClosedShape, row: &Row, prefix: &str) -> Result<View> {
    let mut entries = Vec::with_capacity(shape.accessors.len());
    for accessor in &shape.accessors {
        match accessor {
            Accessor::Field(name) => {
                let alias = format!("{prefix}{name}");
                let value = row.get(&alias).ok_or_else(|| {
                    DerivaError::Mapping(format!(
                        "projection shape mismatch: {} expects '{alias}' but no such column was selected",
                        shape.name
                    ))
                })?;
                entries.push((name.clone(), ViewValue::Value(value.clone())));
            }
            Accessor::Nested(name, nested) => {
                let marker = format!("{prefix}{REFERENCE_MARKER}{name}");
                let present = !matches!(row.get(&marker), Some(Value::Null));
                let view = if present {
                    Some(closed_view(nested, row, &format!("{prefix}{name}."))?)
                } else {
                    None
                };
                entries.push((name.clone(), ViewValue::Nested(view)));
            }
        }
    }
    Ok(View {
        shape: shape.name.clone(),
        entries,
    })
}

fn dto_from_row(shape: &DtoShape, row: &Row) -> Result<DtoRecord> {
    let mut arguments = Vec::with_capacity(shape.parameters.len());
    for parameter in &shape.parameters {
        dto_column(shape, parameter, row.columns())?;
        let value = row.get(parameter).cloned().unwrap_or(Value::Null);
        arguments.push((parameter.clone(), value));
    }
    Ok(DtoRecord {
        type_name: shape.type_name.clone(),
        arguments,
    })
}

// a constructor parameter binds to exactly one selected column
fn dto_column(shape: &DtoShape, parameter: &str, columns: &[String]) -> Result<()> {
    match columns.iter().filter(|c| *c == parameter).count() {
        1 => Ok(()),
        0 => Err(DerivaError::Mapping(format!(
            "{} parameter '{parameter}' has no matching column (selected: {})",
            shape.type_name,
            columns.join(", ")
        ))),
        n => Err(DerivaError::Mapping(format!(
            "{} parameter '{parameter}' matches {n} columns",
            shape.type_name
        ))),
    }
}
