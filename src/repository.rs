//! Repository definitions and the callable table built from them.
//!
//! Every declared method is parsed, resolved and compiled once, when the
//! definition is built. Calls look their method up by name and only bind,
//! execute and map.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::compile::{CompiledQuery, Compiler, Statement, native_statement};
use crate::config::PagingConfig;
use crate::derive::{Subject, parse_method};
use crate::error::{DerivaError, Result};
use crate::example::{ExampleMatcher, Probe};
use crate::execute::{Args, Engine};
use crate::page::{Page, PageRequest, Slice, read_page, read_slice};
use crate::predicate::{Operand, Operator, ParamSlot, PredicateNode};
use crate::projection::{EntityRecord, FromProjected, Link, Projection, ProjectionTarget};
use crate::query::{
    BulkSpec, FetchHint, JoinKind, JoinRequirement, LockMode, Mutation, NativeSpec, QuerySpec, ResultShape, Sort,
};
use crate::schema::{Cardinality, EntityDescriptor, FieldPath, RegistryHasher, SchemaRegistry};
use crate::storage::{Directives, PersistenceContext, Storage, UnitOfWork, Untracked};
use crate::template::{CompiledTemplate, SelectTemplate, compile_template};
use crate::value::Value;

#[derive(Debug, Clone)]
enum Source {
    Derived,
    Template(String),
    Native(String),
}

/// One declared query method.
#[derive(Debug, Clone)]
pub struct QueryMethod {
    name: String,
    source: Source,
    shape: Option<ResultShape>,
    projection: ProjectionTarget,
    lock: LockMode,
    hint: FetchHint,
    fetch: Vec<String>,
    count_query: Option<String>,
    clear_automatically: bool,
    entity: Option<String>,
}

impl QueryMethod {
    fn with_source(name: &str, source: Source) -> Self {
        Self {
            name: name.to_owned(),
            source,
            shape: None,
            projection: ProjectionTarget::FullEntity,
            lock: LockMode::None,
            hint: FetchHint::None,
            fetch: Vec::new(),
            count_query: None,
            clear_automatically: false,
            entity: None,
        }
    }
    /// Query derived from the method name, e.g. `findByUsernameAndAgeGreaterThan`.
    pub fn derived(name: &str) -> Self {
        Self::with_source(name, Source::Derived)
    }
    pub fn template(name: &str, template: &str) -> Self {
        Self::with_source(name, Source::Template(template.to_owned()))
    }
    /// Raw SQL passed through with positional `?` parameters.
    pub fn native(name: &str, sql: &str) -> Self {
        Self::with_source(name, Source::Native(sql.to_owned()))
    }
    pub fn returning(mut self, shape: ResultShape) -> Self {
        self.shape = Some(shape);
        self
    }
    pub fn projecting(mut self, target: ProjectionTarget) -> Self {
        self.projection = target;
        self
    }
    /// The projection target is given with each call.
    pub fn dynamic(self) -> Self {
        self.projecting(ProjectionTarget::Dynamic)
    }
    pub fn lock(mut self, lock: LockMode) -> Self {
        self.lock = lock;
        self
    }
    pub fn hint(mut self, hint: FetchHint) -> Self {
        self.hint = hint;
        self
    }
    /// Associations loaded together with the entity.
    pub fn fetch(mut self, associations: &[&str]) -> Self {
        self.fetch.extend(associations.iter().map(|a| (*a).to_owned()));
        self
    }
    pub fn count_query(mut self, query: &str) -> Self {
        self.count_query = Some(query.to_owned());
        self
    }
    /// Invalidates the persistence context after a bulk statement.
    pub fn clear_automatically(mut self) -> Self {
        self.clear_automatically = true;
        self
    }
    /// Entity of native query results, when not the repository's own.
    pub fn of_entity(mut self, entity: &str) -> Self {
        self.entity = Some(entity.to_owned());
        self
    }
}

#[derive(Debug)]
enum Prepared {
    Select {
        spec: QuerySpec,
        // absent for dynamic projections, which compile per call
        compiled: Option<CompiledQuery>,
        count: Option<Statement>,
    },
    Native(CompiledQuery),
    Bulk {
        statement: Statement,
        entity: String,
        clear: bool,
    },
}

#[derive(Debug)]
struct Definition {
    shape: ResultShape,
    directives: Directives,
    prepared: Prepared,
}

/// Result of a bulk update or delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkOutcome {
    pub affected: usize,
    /// Entity whose in-memory instances may no longer match the store. They
    /// must be refreshed or discarded before further use. `None` when the
    /// persistence context was invalidated automatically.
    pub stale: Option<String>,
}

// ------------- Definition -------------
pub struct RepositoryDefinition {
    entity: String,
    methods: Vec<QueryMethod>,
    context: Arc<dyn PersistenceContext>,
    paging: PagingConfig,
    unit: Option<UnitOfWork>,
}

impl RepositoryDefinition {
    pub fn for_entity(entity: &str) -> Self {
        Self {
            entity: entity.to_owned(),
            methods: Vec::new(),
            context: Arc::new(Untracked),
            paging: PagingConfig::default(),
            unit: None,
        }
    }
    pub fn method(mut self, method: QueryMethod) -> Self {
        self.methods.push(method);
        self
    }
    pub fn context(mut self, context: Arc<dyn PersistenceContext>) -> Self {
        self.context = context;
        self
    }
    pub fn paging(mut self, paging: PagingConfig) -> Self {
        self.paging = paging;
        self
    }
    /// Shares a unit of work, and so a held write lock, with other
    /// repositories. Without one the repository is a unit of work of its own.
    pub fn unit_of_work(mut self, unit: UnitOfWork) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Validates every method. Any unresolvable method fails the whole
    /// definition.
    pub fn build(self, registry: Arc<SchemaRegistry>, storage: Arc<dyn Storage>) -> Result<Repository> {
        let entity = registry.entity(&self.entity).ok_or_else(|| {
            DerivaError::definition(&self.entity, format!("entity '{}' is not registered", self.entity))
        })?;
        let mut definitions: HashMap<String, Definition, RegistryHasher> = HashMap::default();
        for method in &self.methods {
            if definitions.contains_key(&method.name) {
                return Err(DerivaError::definition(&method.name, "declared twice"));
            }
            let definition = prepare(method, &entity, &registry)?;
            debug!(method = %method.name, shape = ?definition.shape, "method validated");
            definitions.insert(method.name.clone(), definition);
        }
        info!(entity = %self.entity, methods = definitions.len(), "repository definition validated");
        Ok(Repository {
            entity,
            registry,
            storage,
            context: self.context,
            paging: self.paging,
            unit: self.unit.unwrap_or_default(),
            definitions,
        })
    }
}

fn prepare(method: &QueryMethod, root: &Arc<EntityDescriptor>, registry: &SchemaRegistry) -> Result<Definition> {
    let fail = |message: String| DerivaError::definition(&method.name, message);
    let directives = Directives {
        lock: method.lock,
        hint: method.hint,
        unit: None,
    };
    let fetch_joins: Vec<JoinRequirement> = method
        .fetch
        .iter()
        .map(|name| JoinRequirement {
            path: FieldPath::new(vec![name.clone()]),
            kind: JoinKind::Left,
            fetch: true,
        })
        .collect();
    let compiler = Compiler::new(registry);

    let (shape, prepared) = match &method.source {
        Source::Derived => {
            let parsed = parse_method(&method.name, root, registry)?;
            let shape = match (parsed.subject, method.shape) {
                (Subject::Count, None | Some(ResultShape::Count)) => ResultShape::Count,
                (Subject::Exists, None | Some(ResultShape::Exists)) => ResultShape::Exists,
                (Subject::Delete, None | Some(ResultShape::Bulk)) => ResultShape::Bulk,
                (Subject::Find, None) => ResultShape::List,
                (
                    Subject::Find,
                    Some(
                        shape @ (ResultShape::Single | ResultShape::List | ResultShape::Page | ResultShape::Slice),
                    ),
                ) => shape,
                (subject, Some(shape)) => {
                    return Err(fail(format!("a {subject:?} query cannot return {shape:?}")));
                }
            };
            if parsed.limit.is_some() && shape.is_paged() {
                return Err(fail("row limits cannot be combined with paging".into()));
            }
            if shape == ResultShape::Bulk {
                if parsed.limit.is_some() || !parsed.sort.is_empty() {
                    return Err(fail("delete queries take neither a row limit nor an order".into()));
                }
                let spec = BulkSpec {
                    entity: Arc::clone(root),
                    mutation: Mutation::Delete,
                    predicate: parsed.predicate,
                    params: parsed.params,
                };
                let statement = compiler.compile_bulk(&spec, &method.name)?;
                (shape, bulk(statement, root.name(), method.clear_automatically))
            } else {
                let mut spec = QuerySpec::new(Arc::clone(root), shape);
                spec.predicate = parsed.predicate;
                spec.params = parsed.params;
                spec.sort = parsed.sort;
                spec.limit = parsed.limit;
                spec.distinct = parsed.distinct;
                spec.joins = fetch_joins;
                spec.projection = method.projection.clone();
                spec.lock = method.lock;
                spec.hint = method.hint;
                (shape, select(&compiler, spec, None, &method.name)?)
            }
        }
        Source::Template(text) => match compile_template(&method.name, text, registry)? {
            CompiledTemplate::Bulk(spec) => {
                if !matches!(method.shape, None | Some(ResultShape::Bulk)) {
                    return Err(fail("update and delete templates return an affected row count".into()));
                }
                let entity = spec.entity.name().to_owned();
                let statement = compiler.compile_bulk(&spec, &method.name)?;
                (ResultShape::Bulk, bulk(statement, &entity, method.clear_automatically))
            }
            CompiledTemplate::Select(template) => {
                let shape = match (template.count_only, method.shape) {
                    (true, None | Some(ResultShape::Count)) => ResultShape::Count,
                    (false, None) => ResultShape::List,
                    (false, Some(shape)) if !matches!(shape, ResultShape::Count | ResultShape::Bulk) => shape,
                    (_, Some(shape)) => {
                        return Err(fail(format!("this select cannot return {shape:?}")));
                    }
                };
                let count = match &method.count_query {
                    Some(text) => Some(count_template(&compiler, &method.name, text, registry)?),
                    None => None,
                };
                let mut spec = template_spec(template, shape, &method.projection).map_err(fail)?;
                spec.joins.extend(fetch_joins);
                spec.lock = method.lock;
                spec.hint = method.hint;
                (shape, select(&compiler, spec, count, &method.name)?)
            }
        },
        Source::Native(sql) => {
            let shape = method.shape.unwrap_or(ResultShape::List);
            if shape == ResultShape::Bulk {
                (shape, bulk(native_statement(sql), root.name(), method.clear_automatically))
            } else {
                let entity = match &method.entity {
                    Some(name) => registry
                        .entity(name)
                        .ok_or_else(|| fail(format!("entity '{name}' is not registered")))?,
                    None => Arc::clone(root),
                };
                let spec = NativeSpec {
                    sql: sql.clone(),
                    count_sql: method.count_query.clone(),
                    entity: Some(entity),
                    projection: method.projection.clone(),
                    shape,
                    lock: method.lock,
                    hint: method.hint,
                };
                (shape, Prepared::Native(compiler.compile_native(&spec, &method.name)?))
            }
        }
    };
    Ok(Definition {
        shape,
        directives,
        prepared,
    })
}

fn bulk(statement: Statement, entity: &str, clear: bool) -> Prepared {
    Prepared::Bulk {
        statement,
        entity: entity.to_owned(),
        clear,
    }
}

fn select(compiler: &Compiler, spec: QuerySpec, count: Option<Statement>, name: &str) -> Result<Prepared> {
    let compiled = if spec.projection == ProjectionTarget::Dynamic {
        // paths are still checked now, against the full entity
        let mut probe = spec.clone();
        probe.projection = ProjectionTarget::FullEntity;
        compiler.compile(&probe, name)?;
        None
    } else {
        Some(with_count(compiler.compile(&spec, name)?, count.as_ref()))
    };
    Ok(Prepared::Select { spec, compiled, count })
}

fn with_count(mut compiled: CompiledQuery, count: Option<&Statement>) -> CompiledQuery {
    if let (Some(_), Some(count)) = (&compiled.count, count) {
        compiled.count = Some(count.clone());
    }
    compiled
}

fn template_spec(
    template: SelectTemplate,
    shape: ResultShape,
    declared: &ProjectionTarget,
) -> std::result::Result<QuerySpec, String> {
    let mut spec = QuerySpec::new(template.entity, shape);
    spec.predicate = template.predicate;
    spec.params = template.params;
    spec.sort = template.sort;
    spec.distinct = template.distinct;
    spec.joins = template.joins;
    spec.selections = template.selections;
    spec.projection = match (&template.projection, declared) {
        (ProjectionTarget::FullEntity, declared) => declared.clone(),
        (written, ProjectionTarget::FullEntity) => written.clone(),
        (_, ProjectionTarget::ConstructorDto(dto)) => {
            if dto.parameters().len() != spec.selections.len() {
                return Err(format!(
                    "{} takes {} arguments but the template selects {}",
                    dto.type_name(),
                    dto.parameters().len(),
                    spec.selections.len()
                ));
            }
            // constructor arguments bind in written order
            for (selection, parameter) in spec.selections.iter_mut().zip(dto.parameters()) {
                selection.alias = parameter.clone();
            }
            declared.clone()
        }
        (_, ProjectionTarget::ClosedInterface(_) | ProjectionTarget::Dynamic) => declared.clone(),
        (_, other) => {
            return Err(format!("{other:?} cannot be applied to an explicit select list"));
        }
    };
    Ok(spec)
}

fn count_template(compiler: &Compiler, name: &str, text: &str, registry: &SchemaRegistry) -> Result<Statement> {
    match compile_template(name, text, registry)? {
        CompiledTemplate::Select(template) if template.count_only => {
            let spec = template_spec(template, ResultShape::Count, &ProjectionTarget::FullEntity)
                .map_err(|message| DerivaError::definition(name, message))?;
            Ok(compiler.compile(&spec, name)?.content)
        }
        _ => Err(DerivaError::definition(name, "count query must be a 'select count(...)' template")),
    }
}

// ------------- Repository -------------
pub struct Repository {
    entity: Arc<EntityDescriptor>,
    registry: Arc<SchemaRegistry>,
    storage: Arc<dyn Storage>,
    context: Arc<dyn PersistenceContext>,
    paging: PagingConfig,
    unit: UnitOfWork,
    definitions: HashMap<String, Definition, RegistryHasher>,
}

impl Repository {
    pub fn entity(&self) -> &EntityDescriptor {
        &self.entity
    }
    pub fn unit_of_work(&self) -> UnitOfWork {
        self.unit
    }
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    fn engine(&self) -> Engine<'_> {
        Engine::new(&self.registry, self.storage.as_ref(), self.context.as_ref()).within(self.unit)
    }

    fn definition(&self, name: &str, called_as: ResultShape) -> Result<&Definition> {
        let definition = self
            .definitions
            .get(name)
            .ok_or_else(|| DerivaError::definition(name, "no such query method"))?;
        if definition.shape != called_as {
            return Err(DerivaError::definition(
                name,
                format!("declared as {:?} but called as {called_as:?}", definition.shape),
            ));
        }
        Ok(definition)
    }

    // statically compiled unless the call sorts or picks a projection
    fn compiled<'d>(&self, name: &str, definition: &'d Definition, args: &Args) -> Result<Cow<'d, CompiledQuery>> {
        let sort = args.sort();
        match &definition.prepared {
            Prepared::Select {
                compiled: Some(compiled),
                ..
            } if sort.is_unsorted() => Ok(Cow::Borrowed(compiled)),
            Prepared::Select { spec, count, .. } => {
                let mut spec = spec.clone();
                spec.projection = spec.projection.resolve(args.projection())?;
                for directive in sort.directives() {
                    self.registry
                        .resolve(&spec.entity, &directive.path)
                        .map_err(|message| DerivaError::definition(name, message))?;
                    spec.sort.push(directive.clone());
                }
                let compiled = Compiler::new(&self.registry).compile(&spec, name)?;
                Ok(Cow::Owned(with_count(compiled, count.as_ref())))
            }
            Prepared::Native(compiled) => {
                let mut compiled = compiled.clone();
                compiled.plan.target = compiled.plan.target.resolve(args.projection())?;
                compiled.content = Compiler::new(&self.registry).order_native(&compiled, sort.directives(), name)?;
                Ok(Cow::Owned(compiled))
            }
            Prepared::Bulk { .. } => Err(DerivaError::definition(name, "bulk statements select nothing")),
        }
    }

    fn request(&self, args: &Args) -> Result<PageRequest> {
        let request = match args.page_request() {
            Some(request) => request.clone(),
            None => PageRequest::of(0, self.paging.default_page_size)?,
        };
        Ok(request.clamped(self.paging.max_page_size))
    }

    pub fn list<T: FromProjected>(&self, name: &str, args: Args) -> Result<Vec<T>> {
        let definition = self.definition(name, ResultShape::List)?;
        let compiled = self.compiled(name, definition, &args)?;
        let window = compiled.content.window(compiled.limit, 0)?;
        self.engine()
            .fetch(name, &window, &compiled.plan, &args, definition.directives)?
            .into_iter()
            .map(T::from_projected)
            .collect()
    }

    /// Zero or one result. Several matches fail with `NotFoundAmbiguity`.
    pub fn one<T: FromProjected>(&self, name: &str, args: Args) -> Result<Option<T>> {
        let definition = self.definition(name, ResultShape::Single)?;
        let compiled = self.compiled(name, definition, &args)?;
        let window = compiled.content.window(compiled.limit, 0)?;
        self.engine()
            .single(name, &window, &compiled.plan, &args, definition.directives)?
            .map(T::from_projected)
            .transpose()
    }

    pub fn page<T: FromProjected>(&self, name: &str, args: Args) -> Result<Page<T>> {
        let definition = self.definition(name, ResultShape::Page)?;
        let request = self.request(&args)?;
        let compiled = self.compiled(name, definition, &args)?;
        read_page(
            &self.engine(),
            name,
            &compiled,
            &args,
            request,
            definition.directives,
        )?
        .try_map(T::from_projected)
    }

    pub fn slice<T: FromProjected>(&self, name: &str, args: Args) -> Result<Slice<T>> {
        let definition = self.definition(name, ResultShape::Slice)?;
        let request = self.request(&args)?;
        let compiled = self.compiled(name, definition, &args)?;
        read_slice(
            &self.engine(),
            name,
            &compiled,
            &args,
            request,
            definition.directives,
        )?
        .try_map(T::from_projected)
    }

    /// Runs a dynamic definition with `T` as its projection.
    pub fn dynamic<T: Projection>(&self, name: &str, args: Args) -> Result<Vec<T>> {
        self.list(name, args.project(T::target()))
    }

    pub fn count(&self, name: &str, args: Args) -> Result<u64> {
        let definition = self.definition(name, ResultShape::Count)?;
        let compiled = self.compiled(name, definition, &args)?;
        self.engine()
            .count(name, &compiled.content, &args, definition.directives)
    }

    pub fn exists(&self, name: &str, args: Args) -> Result<bool> {
        let definition = self.definition(name, ResultShape::Exists)?;
        let compiled = self.compiled(name, definition, &args)?;
        let window = compiled.content.window(compiled.limit, 0)?;
        self.engine().exists(name, &window, &args, definition.directives)
    }

    /// Runs a bulk update or delete in one statement.
    pub fn execute(&self, name: &str, args: Args) -> Result<BulkOutcome> {
        let definition = self.definition(name, ResultShape::Bulk)?;
        let Prepared::Bulk {
            statement,
            entity,
            clear,
        } = &definition.prepared
        else {
            return Err(DerivaError::definition(name, "not a bulk statement"));
        };
        let affected = self.engine().execute(name, statement, &args)?;
        info!(method = name, affected, "bulk statement executed");
        let stale = if *clear {
            self.context.invalidate(entity);
            None
        } else {
            Some(entity.clone())
        };
        Ok(BulkOutcome { affected, stale })
    }

    // ------------- Built-in operations -------------
    fn builtin(&self, label: &str, spec: &QuerySpec) -> Result<CompiledQuery> {
        Compiler::new(&self.registry).compile(spec, label)
    }

    fn by_id(&self, entity: &Arc<EntityDescriptor>, shape: ResultShape) -> QuerySpec {
        let slot = ParamSlot::positional(0);
        let mut spec = QuerySpec::new(Arc::clone(entity), shape);
        spec.predicate = Some(PredicateNode::comparison(
            FieldPath::new(vec![entity.id_name().to_owned()]),
            Operator::Equals,
            Operand::Slot(slot.clone()),
        ));
        spec.params = vec![slot];
        spec
    }

    pub fn find_by_id(&self, id: impl Into<Value>) -> Result<Option<EntityRecord>> {
        self.load(&Arc::clone(&self.entity), id.into())
    }

    fn load(&self, entity: &Arc<EntityDescriptor>, id: Value) -> Result<Option<EntityRecord>> {
        let compiled = self.builtin("findById", &self.by_id(entity, ResultShape::Single))?;
        let window = compiled.content.window(compiled.limit, 0)?;
        self.engine()
            .single("findById", &window, &compiled.plan, &Args::new().arg(id), Directives::default())?
            .map(EntityRecord::from_projected)
            .transpose()
    }

    pub fn exists_by_id(&self, id: impl Into<Value>) -> Result<bool> {
        let compiled = self.builtin("existsById", &self.by_id(&self.entity, ResultShape::Exists))?;
        let window = compiled.content.window(compiled.limit, 0)?;
        self.engine()
            .exists("existsById", &window, &Args::new().arg(id), Directives::default())
    }

    fn all(&self, label: &str, shape: ResultShape, sort: &Sort) -> Result<CompiledQuery> {
        let mut spec = QuerySpec::new(Arc::clone(&self.entity), shape);
        for directive in sort.directives() {
            self.registry
                .resolve(&self.entity, &directive.path)
                .map_err(|message| DerivaError::definition(label, message))?;
            spec.sort.push(directive.clone());
        }
        self.builtin(label, &spec)
    }

    pub fn find_all(&self, sort: Sort) -> Result<Vec<EntityRecord>> {
        let compiled = self.all("findAll", ResultShape::List, &sort)?;
        self.engine()
            .fetch("findAll", &compiled.content, &compiled.plan, &Args::new(), Directives::default())?
            .into_iter()
            .map(EntityRecord::from_projected)
            .collect()
    }

    pub fn find_all_page(&self, request: PageRequest) -> Result<Page<EntityRecord>> {
        let request = request.clamped(self.paging.max_page_size);
        let compiled = self.all("findAll", ResultShape::Page, request.sort())?;
        read_page(
            &self.engine(),
            "findAll",
            &compiled,
            &Args::new(),
            request,
            Directives::default(),
        )?
        .try_map(EntityRecord::from_projected)
    }

    pub fn find_all_slice(&self, request: PageRequest) -> Result<Slice<EntityRecord>> {
        let request = request.clamped(self.paging.max_page_size);
        let compiled = self.all("findAll", ResultShape::Slice, request.sort())?;
        read_slice(
            &self.engine(),
            "findAll",
            &compiled,
            &Args::new(),
            request,
            Directives::default(),
        )?
        .try_map(EntityRecord::from_projected)
    }

    pub fn count_all(&self) -> Result<u64> {
        let compiled = self.all("count", ResultShape::Count, &Sort::unsorted())?;
        self.engine()
            .count("count", &compiled.content, &Args::new(), Directives::default())
    }

    fn example(&self, label: &str, shape: ResultShape, probe: &Probe, matcher: &ExampleMatcher) -> Result<CompiledQuery> {
        let mut spec = QuerySpec::new(Arc::clone(&self.entity), shape);
        spec.predicate = matcher.predicate(probe, &self.entity)?;
        self.builtin(label, &spec)
    }

    pub fn find_all_by_example(&self, probe: &Probe, matcher: &ExampleMatcher) -> Result<Vec<EntityRecord>> {
        let compiled = self.example("findAllByExample", ResultShape::List, probe, matcher)?;
        self.engine()
            .fetch(
                "findAllByExample",
                &compiled.content,
                &compiled.plan,
                &Args::new(),
                Directives::default(),
            )?
            .into_iter()
            .map(EntityRecord::from_projected)
            .collect()
    }

    pub fn count_by_example(&self, probe: &Probe, matcher: &ExampleMatcher) -> Result<u64> {
        let compiled = self.example("countByExample", ResultShape::Count, probe, matcher)?;
        self.engine()
            .count("countByExample", &compiled.content, &Args::new(), Directives::default())
    }

    /// Loads an association left unresolved on a mapped record. Already loaded
    /// associations are left as they are.
    pub fn resolve(&self, record: &mut EntityRecord, association: &str) -> Result<()> {
        let owner = self
            .registry
            .entity(record.entity())
            .ok_or_else(|| DerivaError::Mapping(format!("unknown entity '{}'", record.entity())))?;
        let descriptor = owner.association_named(association).cloned().ok_or_else(|| {
            DerivaError::Mapping(format!("{} has no association '{association}'", owner.name()))
        })?;
        let key = match record.link(association) {
            Some(Link::Unresolved { key, .. }) => key.clone(),
            _ => return Ok(()),
        };
        let target = self
            .registry
            .entity(descriptor.target())
            .ok_or_else(|| DerivaError::Mapping(format!("unknown entity '{}'", descriptor.target())))?;
        let link = match descriptor.cardinality() {
            Cardinality::One if key.is_null() => Link::Loaded(None),
            Cardinality::One => Link::Loaded(self.load(&target, key)?.map(Box::new)),
            Cardinality::Many => {
                let mapped_by = descriptor.mapped_by().unwrap_or_default();
                let mut spec = QuerySpec::new(Arc::clone(&target), ResultShape::List);
                spec.predicate = Some(PredicateNode::comparison(
                    FieldPath::new(vec![mapped_by.to_owned()]),
                    Operator::Equals,
                    Operand::Literal(key),
                ));
                let compiled = self.builtin(association, &spec)?;
                let members = self
                    .engine()
                    .fetch(association, &compiled.content, &compiled.plan, &Args::new(), Directives::default())?
                    .into_iter()
                    .map(EntityRecord::from_projected)
                    .collect::<Result<Vec<_>>>()?;
                Link::LoadedMany(members)
            }
        };
        record.set_link(association, link);
        Ok(())
    }
}
