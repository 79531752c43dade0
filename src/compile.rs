//! Query compiler: turns query descriptions into SQL statements with parameter
//! slots, a matching count statement and a mapping plan.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;

use crate::derive::words;
use crate::error::{DerivaError, Result};
use crate::predicate::{Operand, Operator, ParamSlot, PredicateNode};
use crate::projection::{Accessor, ClosedShape, DtoShape, MappingPlan, ProjectionTarget, REFERENCE_MARKER};
use crate::query::{BulkSpec, JoinKind, Mutation, NativeSpec, QuerySpec, ResultShape, ValueExpr};
use crate::schema::{AssociationDescriptor, EntityDescriptor, FieldPath, SchemaRegistry, Terminal};
use crate::value::{ScalarType, Value};

lazy_static! {
    // quoted text is matched first so placeholders inside literals are skipped
    static ref PLACEHOLDER: Regex = Regex::new(r"'(?:[^']|'')*'|\?(\d*)").unwrap();
}

const ROOT: &str = "t0";

// ------------- Statements -------------
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Sql(String),
    /// One value bound at call time.
    Slot(ParamSlot),
    /// A list bound at call time and expanded into `(?, ?, ...)`.
    SlotList(ParamSlot),
    Value(Value),
    ValueList(Vec<Value>),
}

/// SQL text interleaved with the values it needs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statement {
    fragments: Vec<Fragment>,
}

/// A statement with every value in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    pub values: Vec<Value>,
}

impl Statement {
    pub fn sql(mut self, text: &str) -> Self {
        self.push_sql(text);
        self
    }
    pub fn push_sql(&mut self, text: &str) {
        match self.fragments.last_mut() {
            Some(Fragment::Sql(last)) => last.push_str(text),
            _ => self.fragments.push(Fragment::Sql(text.to_owned())),
        }
    }
    pub fn push(&mut self, fragment: Fragment) {
        match fragment {
            Fragment::Sql(text) => self.push_sql(&text),
            other => self.fragments.push(other),
        }
    }
    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }
    /// Appends `LIMIT`/`OFFSET` as bound values.
    pub fn window(&self, limit: Option<usize>, offset: usize) -> Result<Statement> {
        let bound = |n: usize| {
            i64::try_from(n)
                .map(|n| Fragment::Value(Value::Integer(n)))
                .map_err(|_| DerivaError::Parameter(format!("row window {n} is out of range")))
        };
        let mut windowed = self.clone();
        if let Some(limit) = limit {
            windowed.push_sql(" LIMIT ");
            windowed.push(bound(limit)?);
            if offset > 0 {
                windowed.push_sql(" OFFSET ");
                windowed.push(bound(offset)?);
            }
        } else if offset > 0 {
            windowed.push_sql(" LIMIT -1 OFFSET ");
            windowed.push(bound(offset)?);
        }
        Ok(windowed)
    }

    pub fn bind<F>(&self, lookup: F) -> Result<BoundStatement>
    where
        F: Fn(&ParamSlot) -> Result<Value>,
    {
        let mut sql = String::new();
        let mut values = Vec::new();
        for fragment in &self.fragments {
            match fragment {
                Fragment::Sql(text) => sql.push_str(text),
                Fragment::Slot(slot) => match lookup(slot)? {
                    Value::List(_) => {
                        return Err(DerivaError::Parameter(format!(
                            "a list was bound to {slot}, which takes a single value"
                        )));
                    }
                    value => {
                        sql.push('?');
                        values.push(value);
                    }
                },
                Fragment::SlotList(slot) => {
                    let items = match lookup(slot)? {
                        Value::List(items) => items,
                        single => vec![single],
                    };
                    push_list(&mut sql, &mut values, items);
                }
                Fragment::Value(value) => {
                    sql.push('?');
                    values.push(value.clone());
                }
                Fragment::ValueList(items) => push_list(&mut sql, &mut values, items.clone()),
            }
        }
        Ok(BoundStatement { sql, values })
    }
}

// an empty list matches nothing
fn push_list(sql: &mut String, values: &mut Vec<Value>, items: Vec<Value>) {
    if items.is_empty() {
        sql.push_str("(NULL)");
        return;
    }
    sql.push('(');
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push('?');
        values.push(item);
    }
    sql.push(')');
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for fragment in &self.fragments {
            match fragment {
                Fragment::Sql(text) => write!(f, "{text}")?,
                Fragment::Slot(slot) => write!(f, "{slot}")?,
                Fragment::SlotList(slot) => write!(f, "({slot})")?,
                Fragment::Value(value) => write!(f, "{value}")?,
                Fragment::ValueList(items) => write!(f, "{}", Value::List(items.clone()))?,
            }
        }
        Ok(())
    }
}

/// Everything needed to run a select and map its rows.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub content: Statement,
    /// Present for page shaped queries.
    pub count: Option<Statement>,
    pub plan: MappingPlan,
    /// Row limit fixed at definition time.
    pub limit: Option<usize>,
}

// ------------- Joins -------------
#[derive(Debug, Clone)]
struct PlannedJoin {
    path: FieldPath,
    alias: String,
    parent: String,
    association: AssociationDescriptor,
    target: Arc<EntityDescriptor>,
    kind: JoinKind,
    fetch: bool,
    explicit: bool,
    // needed by the predicate or written by the caller, so kept in count statements
    filtering: bool,
}

struct JoinPlan<'a> {
    registry: &'a SchemaRegistry,
    root: Arc<EntityDescriptor>,
    joins: Vec<PlannedJoin>,
}

impl<'a> JoinPlan<'a> {
    fn new(registry: &'a SchemaRegistry, root: Arc<EntityDescriptor>) -> Self {
        Self {
            registry,
            root,
            joins: Vec::new(),
        }
    }

    fn find(&self, path: &[String]) -> Option<&PlannedJoin> {
        self.joins.iter().find(|j| j.path.segments() == path)
    }

    fn alias_of(&self, path: &[String]) -> std::result::Result<&str, String> {
        if path.is_empty() {
            return Ok(ROOT);
        }
        self.find(path)
            .map(|j| j.alias.as_str())
            .ok_or_else(|| format!("no join planned for '{}'", path.join(".")))
    }

    fn ensure(&mut self, path: &FieldPath, kind: JoinKind, fetch: bool, explicit: bool, filtering: bool) -> std::result::Result<(), String> {
        if let Some(existing) = self.joins.iter_mut().find(|j| &j.path == path) {
            if kind == JoinKind::Left && existing.kind == JoinKind::Inner && !existing.explicit {
                existing.kind = JoinKind::Left;
            }
            existing.fetch |= fetch;
            existing.filtering |= filtering;
            return Ok(());
        }
        if path.is_nested() {
            let parent = FieldPath::new(path.prefix().to_vec());
            self.ensure(&parent, kind, false, false, filtering)?;
        }
        let resolved = self.registry.resolve(&self.root, path)?;
        let association = match resolved.terminal {
            Terminal::Association(a) if a.is_to_one() && a.owning() => a,
            _ => return Err(format!("'{path}' is not a joinable to-one association")),
        };
        let target = self
            .registry
            .entity(association.target())
            .ok_or_else(|| format!("unknown entity '{}'", association.target()))?;
        id_column(&target)?;
        let parent = self.alias_of(path.prefix())?.to_owned();
        self.joins.push(PlannedJoin {
            path: path.clone(),
            alias: format!("t{}", self.joins.len() + 1),
            parent,
            association,
            target,
            kind,
            fetch,
            explicit,
            filtering,
        });
        Ok(())
    }

    /// Qualified column for a field path, or the foreign key column for an
    /// owning association.
    fn column(&self, path: &FieldPath) -> std::result::Result<(String, Option<ScalarType>), String> {
        let resolved = self.registry.resolve(&self.root, path)?;
        let alias = self.alias_of(path.prefix())?;
        match &resolved.terminal {
            Terminal::Field(field) => Ok((format!("{alias}.{}", field.column()), Some(field.scalar()))),
            Terminal::Association(a) => match a.join_column() {
                Some(column) => Ok((format!("{alias}.{column}"), None)),
                None => Err(format!("'{path}' has no column of its own")),
            },
        }
    }

    fn render(&self, filtering_only: bool) -> String {
        let mut sql = String::new();
        for join in &self.joins {
            if filtering_only && !join.filtering {
                continue;
            }
            let keyword = match join.kind {
                JoinKind::Inner => " JOIN ",
                JoinKind::Left => " LEFT JOIN ",
            };
            sql.push_str(&format!(
                "{keyword}{} {} ON {}.{} = {}.{}",
                join.target.table(),
                join.alias,
                join.alias,
                id_column(&join.target).unwrap_or_default(),
                join.parent,
                join.association.join_column().unwrap_or_default(),
            ));
        }
        sql
    }
}

// ------------- Compiler -------------
pub struct Compiler<'a> {
    registry: &'a SchemaRegistry,
}

struct SelectList {
    columns: Vec<(String, String)>,
    types: HashMap<String, ScalarType>,
    fetched: Vec<String>,
}

impl SelectList {
    fn new() -> Self {
        Self {
            columns: Vec::new(),
            types: HashMap::new(),
            fetched: Vec::new(),
        }
    }
    fn push(&mut self, expression: String, alias: String, scalar: Option<ScalarType>) {
        if let Some(scalar) = scalar {
            self.types.insert(alias.clone(), scalar);
        }
        self.columns.push((expression, alias));
    }
    fn render(&self) -> String {
        self.columns
            .iter()
            .map(|(expression, alias)| format!("{expression} AS \"{alias}\""))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl<'a> Compiler<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self { registry }
    }

    pub fn compile(&self, spec: &QuerySpec, definition: &str) -> Result<CompiledQuery> {
        self.compile_select(spec)
            .map_err(|message| DerivaError::definition(definition, message))
    }

    fn compile_select(&self, spec: &QuerySpec) -> std::result::Result<CompiledQuery, String> {
        let root = Arc::clone(&spec.entity);
        let mut plan = JoinPlan::new(self.registry, Arc::clone(&root));

        for join in &spec.joins {
            plan.ensure(&join.path, join.kind, join.fetch, true, true)?;
        }
        // an inner join may only drop rows the predicate rejects anyway
        if let Some(predicate) = &spec.predicate {
            for (path, operator, required) in predicate.comparisons() {
                if let Some(join_path) = self.registry.resolve(&root, path)?.join_path() {
                    let kind = if required && operator.rejects_null() {
                        JoinKind::Inner
                    } else {
                        JoinKind::Left
                    };
                    plan.ensure(&join_path, kind, false, false, true)?;
                }
            }
        }
        let target = spec.projection.clone();
        let select = match &target {
            ProjectionTarget::FullEntity => self.entity_columns(&mut plan, false)?,
            ProjectionTarget::OpenInterface(_) => self.entity_columns(&mut plan, true)?,
            ProjectionTarget::ScalarList(path) if spec.selections.is_empty() => {
                let mut select = SelectList::new();
                self.push_path(&mut plan, &mut select, path, path.to_string())?;
                select
            }
            ProjectionTarget::ClosedInterface(shape) if spec.selections.is_empty() => {
                self.closed_columns(&mut plan, shape)?
            }
            ProjectionTarget::ConstructorDto(shape) if spec.selections.is_empty() => {
                self.dto_columns(&mut plan, shape)?
            }
            ProjectionTarget::Dynamic => {
                return Err("dynamic projection must be resolved before compiling".into());
            }
            _ => {
                let mut select = SelectList::new();
                for selection in &spec.selections {
                    self.push_path(&mut plan, &mut select, &selection.path, selection.alias.clone())?;
                }
                select
            }
        };
        let mut order = Vec::new();
        for directive in &spec.sort {
            let resolved = self.registry.resolve(&root, &directive.path)?;
            if resolved.field().is_none() {
                return Err(format!("cannot sort by association '{}'", directive.path));
            }
            if let Some(join_path) = resolved.join_path() {
                plan.ensure(&join_path, JoinKind::Left, false, false, false)?;
            }
            let (column, _) = plan.column(&directive.path)?;
            order.push(format!("{column} {}", directive.direction.sql()));
        }
        if order.is_empty() {
            order.push(format!("{ROOT}.{} ASC", id_column(&root)?));
        }

        let filter = self.filter(&plan, spec.predicate.as_ref())?;
        let from = format!(" FROM {} {ROOT}", root.table());
        let counted = if spec.distinct {
            format!("COUNT(DISTINCT {ROOT}.{})", id_column(&root)?)
        } else {
            "COUNT(*)".to_owned()
        };
        let count = Statement::default()
            .sql(&format!("SELECT {counted}{from}{}", plan.render(true)))
            .concat(&filter);

        let (content, limit) = match spec.shape {
            ResultShape::Count => (count.clone(), None),
            ResultShape::Exists => (
                Statement::default()
                    .sql(&format!("SELECT 1 AS \"present\"{from}{}", plan.render(true)))
                    .concat(&filter),
                Some(1),
            ),
            shape => {
                let distinct = if spec.distinct { "DISTINCT " } else { "" };
                let content = Statement::default()
                    .sql(&format!(
                        "SELECT {distinct}{}{from}{}",
                        select.render(),
                        plan.render(false)
                    ))
                    .concat(&filter)
                    .sql(&format!(" ORDER BY {}", order.join(", ")));
                let limit = match shape {
                    ResultShape::Single => Some(spec.limit.map_or(2, |n| n.min(2))),
                    _ => spec.limit,
                };
                (content, limit)
            }
        };
        Ok(CompiledQuery {
            content,
            count: (spec.shape == ResultShape::Page).then_some(count),
            plan: MappingPlan {
                target,
                entity: Some(root),
                fetched: select.fetched,
                column_types: select.types,
            },
            limit,
        })
    }

    fn filter(&self, plan: &JoinPlan, predicate: Option<&PredicateNode>) -> std::result::Result<Statement, String> {
        let mut filter = Statement::default();
        if let Some(predicate) = predicate {
            filter.push_sql(" WHERE ");
            render_predicate(predicate, &mut filter, &|path| plan.column(path).map(|(c, _)| c))?;
        }
        Ok(filter)
    }

    fn push_path(
        &self,
        plan: &mut JoinPlan,
        select: &mut SelectList,
        path: &FieldPath,
        alias: String,
    ) -> std::result::Result<(), String> {
        let resolved = self.registry.resolve(&plan.root, path)?;
        if resolved.field().is_none() {
            return Err(format!("'{path}' is an association, not a selectable value"));
        }
        if let Some(join_path) = resolved.join_path() {
            plan.ensure(&join_path, JoinKind::Left, false, false, false)?;
        }
        let (column, scalar) = plan.column(path)?;
        select.push(column, alias, scalar);
        Ok(())
    }

    // root fields plus, per to-one association, either the fetched entity or its key
    fn entity_columns(&self, plan: &mut JoinPlan, fetch_all: bool) -> std::result::Result<SelectList, String> {
        let root = Arc::clone(&plan.root);
        let mut select = SelectList::new();
        for field in root.fields() {
            select.push(
                format!("{ROOT}.{}", field.column()),
                field.name().to_owned(),
                Some(field.scalar()),
            );
        }
        for association in root.associations().iter().filter(|a| a.is_to_one() && a.owning()) {
            let path = FieldPath::new(vec![association.name().to_owned()]);
            if fetch_all {
                plan.ensure(&path, JoinKind::Left, true, false, false)?;
            }
            let fetched = plan.find(path.segments()).map(|j| j.fetch).unwrap_or(false);
            if !fetched {
                select.push(
                    format!("{ROOT}.{}", association.join_column().unwrap_or_default()),
                    format!("{REFERENCE_MARKER}{}", association.name()),
                    None,
                );
                continue;
            }
            // a fetched association always comes through a left join
            plan.ensure(&path, JoinKind::Left, true, false, false)?;
            let join = plan
                .find(path.segments())
                .ok_or_else(|| format!("no join planned for '{path}'"))?;
            let prefix = association.name();
            for field in join.target.fields() {
                select.push(
                    format!("{}.{}", join.alias, field.column()),
                    format!("{prefix}.{}", field.name()),
                    Some(field.scalar()),
                );
            }
            for nested in join.target.associations().iter().filter(|a| a.is_to_one() && a.owning()) {
                select.push(
                    format!("{}.{}", join.alias, nested.join_column().unwrap_or_default()),
                    format!("{prefix}.{REFERENCE_MARKER}{}", nested.name()),
                    None,
                );
            }
            select.fetched.push(prefix.to_owned());
        }
        Ok(select)
    }

    fn closed_columns(&self, plan: &mut JoinPlan, shape: &ClosedShape) -> std::result::Result<SelectList, String> {
        let root = Arc::clone(&plan.root);
        let mut select = SelectList::new();
        for accessor in shape.accessors() {
            match accessor {
                Accessor::Field(name) => {
                    let field = root
                        .field_named(name)
                        .ok_or_else(|| format!("{} has no field '{name}' for {}", root.name(), shape.name()))?;
                    select.push(format!("{ROOT}.{}", field.column()), name.clone(), Some(field.scalar()));
                }
                Accessor::Nested(name, nested) => {
                    let association = root
                        .association_named(name)
                        .filter(|a| a.is_to_one() && a.owning())
                        .ok_or_else(|| {
                            format!("'{name}' on {} is not a to-one association of {}", shape.name(), root.name())
                        })?;
                    let path = FieldPath::new(vec![name.clone()]);
                    plan.ensure(&path, JoinKind::Left, false, false, false)?;
                    select.push(
                        format!("{ROOT}.{}", association.join_column().unwrap_or_default()),
                        format!("{REFERENCE_MARKER}{name}"),
                        None,
                    );
                    for inner in nested.accessors() {
                        match inner {
                            Accessor::Field(field) => {
                                self.push_path(plan, &mut select, &path.child(field), format!("{name}.{field}"))?;
                            }
                            Accessor::Nested(deeper, _) => {
                                return Err(format!(
                                    "nested accessor '{name}.{deeper}' on {} goes deeper than one association",
                                    shape.name()
                                ));
                            }
                        }
                    }
                }
            }
        }
        Ok(select)
    }

    // parameters name a field path directly (`username`, `team.name`) or in camel case (`teamName`)
    fn dto_columns(&self, plan: &mut JoinPlan, shape: &DtoShape) -> std::result::Result<SelectList, String> {
        let root = Arc::clone(&plan.root);
        let mut select = SelectList::new();
        for parameter in shape.parameters() {
            let direct = FieldPath::parse(parameter);
            let path = match self.registry.resolve(&root, &direct) {
                Ok(resolved) if resolved.field().is_some() => Some(direct),
                _ => {
                    let split = words(parameter);
                    self.registry
                        .match_property(&root, &split)
                        .filter(|(_, used)| *used == split.len())
                        .map(|(path, _)| path)
                        .filter(|path| {
                            self.registry
                                .resolve(&root, path)
                                .map(|r| r.field().is_some())
                                .unwrap_or(false)
                        })
                }
            };
            // unmatched parameters are reported by the mapper
            if let Some(path) = path {
                self.push_path(plan, &mut select, &path, parameter.clone())?;
            }
        }
        if select.columns.is_empty() {
            select.push(format!("{ROOT}.{}", id_column(&root)?), format!("{REFERENCE_MARKER}id"), None);
        }
        Ok(select)
    }

    // ------------- Bulk -------------
    pub fn compile_bulk(&self, spec: &BulkSpec, definition: &str) -> Result<Statement> {
        self.bulk_statement(spec)
            .map_err(|message| DerivaError::definition(definition, message))
    }

    fn bulk_statement(&self, spec: &BulkSpec) -> std::result::Result<Statement, String> {
        let root = &spec.entity;
        let column = |path: &FieldPath| -> std::result::Result<String, String> {
            let resolved = self.registry.resolve(root, path)?;
            if resolved.crosses_association() {
                return Err(format!("bulk statements cannot traverse associations ('{path}')"));
            }
            match &resolved.terminal {
                Terminal::Field(field) => Ok(field.column().to_owned()),
                Terminal::Association(a) => a
                    .join_column()
                    .map(str::to_owned)
                    .ok_or_else(|| format!("'{path}' has no column of its own")),
            }
        };
        let mut statement = Statement::default();
        match &spec.mutation {
            Mutation::Update(assignments) => {
                if assignments.is_empty() {
                    return Err("update assigns nothing".into());
                }
                statement.push_sql(&format!("UPDATE {} SET ", root.table()));
                for (i, assignment) in assignments.iter().enumerate() {
                    if i > 0 {
                        statement.push_sql(", ");
                    }
                    statement.push_sql(&format!("{} = ", assignment.field.column()));
                    render_value(&assignment.value, &mut statement);
                }
            }
            Mutation::Delete => statement.push_sql(&format!("DELETE FROM {}", root.table())),
        }
        if let Some(predicate) = &spec.predicate {
            statement.push_sql(" WHERE ");
            render_predicate(predicate, &mut statement, &column)?;
        }
        Ok(statement)
    }

    // ------------- Native -------------
    pub fn compile_native(&self, spec: &NativeSpec, definition: &str) -> Result<CompiledQuery> {
        let fail = |message: String| DerivaError::definition(definition, message);
        if spec.shape == ResultShape::Page && spec.count_sql.is_none() {
            return Err(fail("a paged native query needs an explicit count query".into()));
        }
        let content = Statement::default()
            .sql("SELECT * FROM (")
            .concat(&native_statement(&spec.sql))
            .sql(") AS native_q");
        let count = match (&spec.count_sql, spec.shape) {
            (Some(count_sql), ResultShape::Page) => Some(native_statement(count_sql)),
            _ => None,
        };
        let target = spec.projection.clone();
        if matches!(target, ProjectionTarget::FullEntity | ProjectionTarget::OpenInterface(_)) && spec.entity.is_none() {
            return Err(fail("entity results of a native query need a declared entity".into()));
        }
        let content = match spec.shape {
            ResultShape::Count => Statement::default().sql("SELECT COUNT(*) FROM (").concat(&native_statement(&spec.sql)).sql(")"),
            _ => content,
        };
        Ok(CompiledQuery {
            content,
            count,
            plan: MappingPlan {
                target,
                entity: spec.entity.clone(),
                fetched: Vec::new(),
                column_types: HashMap::new(),
            },
            limit: match spec.shape {
                ResultShape::Single => Some(2),
                ResultShape::Exists => Some(1),
                _ => None,
            },
        })
    }

    /// Sorts a native statement by output column. Properties of a declared
    /// entity are translated to their columns.
    pub fn order_native(
        &self,
        compiled: &CompiledQuery,
        sort: &[crate::query::SortDirective],
        definition: &str,
    ) -> Result<Statement> {
        let mut content = compiled.content.clone();
        if sort.is_empty() {
            return Ok(content);
        }
        let mut order = Vec::with_capacity(sort.len());
        for directive in sort {
            let column = match &compiled.plan.entity {
                Some(entity) if !directive.path.is_nested() => entity
                    .column_of(directive.path.leaf())
                    .map(str::to_owned)
                    .ok_or_else(|| {
                        DerivaError::definition(
                            definition,
                            format!("cannot sort native results by '{}'", directive.path),
                        )
                    })?,
                _ => directive.path.to_string(),
            };
            order.push(format!("\"{column}\" {}", directive.direction.sql()));
        }
        content.push_sql(&format!(" ORDER BY {}", order.join(", ")));
        Ok(content)
    }
}

impl Statement {
    fn concat(mut self, other: &Statement) -> Self {
        for fragment in &other.fragments {
            self.push(fragment.clone());
        }
        self
    }
}

/// Native SQL with its `?` and `?N` placeholders turned into positional slots.
pub fn native_statement(sql: &str) -> Statement {
    let mut statement = Statement::default();
    let mut next = 0;
    let mut position = 0;
    for captures in PLACEHOLDER.captures_iter(sql) {
        let Some(whole) = captures.get(0) else { continue };
        let Some(digits) = captures.get(1) else { continue };
        statement.push_sql(&sql[position..whole.start()]);
        let index = match digits.as_str().parse::<usize>() {
            Ok(n) if n > 0 => n - 1,
            _ => {
                next += 1;
                next - 1
            }
        };
        statement.push(Fragment::Slot(ParamSlot::positional(index)));
        position = whole.end();
    }
    statement.push_sql(&sql[position..]);
    statement
}

fn id_column(entity: &EntityDescriptor) -> std::result::Result<&str, String> {
    entity
        .id_field()
        .map(|id| id.column())
        .ok_or_else(|| format!("entity '{}' declares no identifier", entity.name()))
}

fn render_predicate(
    node: &PredicateNode,
    out: &mut Statement,
    column: &dyn Fn(&FieldPath) -> std::result::Result<String, String>,
) -> std::result::Result<(), String> {
    match node {
        PredicateNode::Comparison { path, operator, operand } => {
            let column = column(path)?;
            match (operator, operand) {
                (Operator::IsNull | Operator::IsNotNull, _) => {
                    out.push_sql(&format!("{column} {}", operator.sql()));
                }
                (Operator::In, Operand::Slot(slot)) => {
                    out.push_sql(&format!("{column} IN "));
                    out.push(Fragment::SlotList(slot.clone()));
                }
                (Operator::In, Operand::Literal(Value::List(items))) => {
                    out.push_sql(&format!("{column} IN "));
                    out.push(Fragment::ValueList(items.clone()));
                }
                (Operator::In, Operand::Literal(single)) => {
                    out.push_sql(&format!("{column} IN "));
                    out.push(Fragment::ValueList(vec![single.clone()]));
                }
                (_, Operand::Slot(slot)) => {
                    out.push_sql(&format!("{column} {} ", operator.sql()));
                    out.push(Fragment::Slot(slot.clone()));
                }
                (_, Operand::Literal(value)) => {
                    out.push_sql(&format!("{column} {} ", operator.sql()));
                    out.push(Fragment::Value(value.clone()));
                }
                (_, Operand::None) => {
                    return Err(format!("'{path} {}' has no operand", operator.sql()));
                }
            }
        }
        PredicateNode::Conjunction(left, right) | PredicateNode::Disjunction(left, right) => {
            let joiner = if matches!(node, PredicateNode::Conjunction(..)) { " AND " } else { " OR " };
            out.push_sql("(");
            render_predicate(left, out, column)?;
            out.push_sql(joiner);
            render_predicate(right, out, column)?;
            out.push_sql(")");
        }
    }
    Ok(())
}

fn render_value(value: &ValueExpr, out: &mut Statement) {
    match value {
        ValueExpr::Operand(Operand::Slot(slot)) => out.push(Fragment::Slot(slot.clone())),
        ValueExpr::Operand(Operand::Literal(v)) => out.push(Fragment::Value(v.clone())),
        ValueExpr::Operand(Operand::None) => out.push_sql("NULL"),
        ValueExpr::Field(field) => out.push_sql(field.column()),
        ValueExpr::Binary(operator, left, right) => {
            out.push_sql("(");
            render_value(left, out);
            out.push_sql(&format!(" {} ", operator.sql()));
            render_value(right, out);
            out.push_sql(")");
        }
    }
}
