use std::sync::Arc;

// used to keep the one-to-one mappings between entities and tables, and fields and columns
use bimap::BiMap;

use core::hash::BuildHasherDefault;
use std::collections::HashMap;
use seahash::SeaHasher;

// used to print out readable forms of a path
use std::fmt;

use crate::error::{DerivaError, Result};
use crate::value::ScalarType;

pub type RegistryHasher = BuildHasherDefault<SeaHasher>;

// ------------- Field -------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    name: String,
    column: String,
    scalar: ScalarType,
    nullable: bool,
}

impl FieldDescriptor {
    pub fn new(name: &str, column: &str, scalar: ScalarType, nullable: bool) -> Self {
        Self {
            name: name.to_owned(),
            column: column.to_owned(),
            scalar,
            nullable,
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn column(&self) -> &str {
        &self.column
    }
    pub fn scalar(&self) -> ScalarType {
        self.scalar
    }
    pub fn nullable(&self) -> bool {
        self.nullable
    }
}

// ------------- Association -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationDescriptor {
    name: String,
    target: String,
    cardinality: Cardinality,
    owning: bool,
    // owning side: foreign key column in the declaring table
    join_column: Option<String>,
    // inverse side: name of the owning association on the target
    mapped_by: Option<String>,
}

impl AssociationDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn target(&self) -> &str {
        &self.target
    }
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }
    pub fn owning(&self) -> bool {
        self.owning
    }
    pub fn join_column(&self) -> Option<&str> {
        self.join_column.as_deref()
    }
    pub fn mapped_by(&self) -> Option<&str> {
        self.mapped_by.as_deref()
    }
    pub fn is_to_one(&self) -> bool {
        self.cardinality == Cardinality::One
    }
}

// ------------- Entity -------------
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    name: String,
    table: String,
    id: String,
    fields: Vec<FieldDescriptor>,
    associations: Vec<AssociationDescriptor>,
    columns: BiMap<String, String>,
}

impl EntityDescriptor {
    pub fn new(name: &str, table: &str) -> Self {
        Self {
            name: name.to_owned(),
            table: table.to_owned(),
            id: String::new(),
            fields: Vec::new(),
            associations: Vec::new(),
            columns: BiMap::new(),
        }
    }
    /// Declares the integer identifier, stored in `column`.
    pub fn id(mut self, name: &str, column: &str) -> Self {
        self.id = name.to_owned();
        self.push_field(FieldDescriptor::new(name, column, ScalarType::Integer, false));
        self
    }
    /// Declares a field whose column is the snake case form of its name.
    pub fn field(self, name: &str, scalar: ScalarType, nullable: bool) -> Self {
        let column = snake_case(name);
        self.field_in(name, &column, scalar, nullable)
    }
    pub fn field_in(mut self, name: &str, column: &str, scalar: ScalarType, nullable: bool) -> Self {
        self.push_field(FieldDescriptor::new(name, column, scalar, nullable));
        self
    }
    /// Owning to-one association stored as a foreign key column.
    pub fn belongs_to(mut self, name: &str, target: &str, join_column: &str) -> Self {
        self.associations.push(AssociationDescriptor {
            name: name.to_owned(),
            target: target.to_owned(),
            cardinality: Cardinality::One,
            owning: true,
            join_column: Some(join_column.to_owned()),
            mapped_by: None,
        });
        self
    }
    /// Inverse to-many association, mapped by an owning association on the target.
    pub fn has_many(mut self, name: &str, target: &str, mapped_by: &str) -> Self {
        self.associations.push(AssociationDescriptor {
            name: name.to_owned(),
            target: target.to_owned(),
            cardinality: Cardinality::Many,
            owning: false,
            join_column: None,
            mapped_by: Some(mapped_by.to_owned()),
        });
        self
    }
    fn push_field(&mut self, field: FieldDescriptor) {
        self.columns.insert(field.name.clone(), field.column.clone());
        self.fields.push(field);
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn table(&self) -> &str {
        &self.table
    }
    /// Absent only on a descriptor that never declared one; the registry
    /// refuses those.
    pub fn id_field(&self) -> Option<&FieldDescriptor> {
        self.field_named(&self.id)
    }
    pub fn id_name(&self) -> &str {
        &self.id
    }
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }
    pub fn associations(&self) -> &[AssociationDescriptor] {
        &self.associations
    }
    pub fn field_named(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
    pub fn association_named(&self, name: &str) -> Option<&AssociationDescriptor> {
        self.associations.iter().find(|a| a.name == name)
    }
    pub fn column_of(&self, field: &str) -> Option<&str> {
        self.columns.get_by_left(field).map(String::as_str)
    }
    pub fn field_for_column(&self, column: &str) -> Option<&FieldDescriptor> {
        self.columns
            .get_by_right(column)
            .and_then(|name| self.field_named(name))
    }
    /// Owning to-one association stored in the given foreign key column.
    pub fn association_for_column(&self, column: &str) -> Option<&AssociationDescriptor> {
        self.associations
            .iter()
            .find(|a| a.join_column.as_deref() == Some(column))
    }
}

// ------------- Path -------------
/// A dot separated sequence of field and association names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }
    pub fn parse(path: &str) -> Self {
        Self(path.split('.').map(str::to_owned).collect())
    }
    pub fn segments(&self) -> &[String] {
        &self.0
    }
    pub fn leaf(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or("")
    }
    pub fn prefix(&self) -> &[String] {
        &self.0[..self.0.len().saturating_sub(1)]
    }
    pub fn is_nested(&self) -> bool {
        self.0.len() > 1
    }
    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.to_owned());
        Self(segments)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// What a resolved path ends in.
#[derive(Debug, Clone)]
pub enum Terminal {
    Field(FieldDescriptor),
    Association(AssociationDescriptor),
}

/// A path checked against the registry. `hops` are the associations crossed
/// before reaching the terminal, `owner` is the entity declaring the terminal.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    pub path: FieldPath,
    pub hops: Vec<AssociationDescriptor>,
    pub owner: Arc<EntityDescriptor>,
    pub terminal: Terminal,
}

impl ResolvedPath {
    pub fn field(&self) -> Option<&FieldDescriptor> {
        match &self.terminal {
            Terminal::Field(f) => Some(f),
            Terminal::Association(_) => None,
        }
    }
    pub fn crosses_association(&self) -> bool {
        !self.hops.is_empty()
    }
    /// The association prefix of this path, e.g. `team` for `team.name`.
    pub fn join_path(&self) -> Option<FieldPath> {
        if self.hops.is_empty() {
            None
        } else {
            Some(FieldPath::new(self.path.prefix().to_vec()))
        }
    }
}

// ------------- Registry -------------
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entities: Vec<EntityDescriptor>,
}

impl SchemaBuilder {
    pub fn entity(mut self, entity: EntityDescriptor) -> Self {
        self.entities.push(entity);
        self
    }
    pub fn build(self) -> Result<SchemaRegistry> {
        let mut kept: HashMap<String, Arc<EntityDescriptor>, RegistryHasher> = HashMap::default();
        let mut tables = BiMap::new();
        for entity in self.entities {
            if entity.id.is_empty() || entity.field_named(&entity.id).is_none() {
                return Err(DerivaError::definition(
                    "schema",
                    format!("entity '{}' declares no identifier", entity.name),
                ));
            }
            if tables.contains_right(&entity.table) {
                return Err(DerivaError::definition(
                    "schema",
                    format!("table '{}' is mapped twice", entity.table),
                ));
            }
            if kept.contains_key(&entity.name) {
                return Err(DerivaError::definition(
                    "schema",
                    format!("entity '{}' is registered twice", entity.name),
                ));
            }
            tables.insert(entity.name.clone(), entity.table.clone());
            kept.insert(entity.name.clone(), Arc::new(entity));
        }
        // associations must point at registered entities, and inverse sides at an owning side
        for entity in kept.values() {
            for association in &entity.associations {
                let target = kept.get(&association.target).ok_or_else(|| {
                    DerivaError::definition(
                        "schema",
                        format!(
                            "association '{}.{}' targets unknown entity '{}'",
                            entity.name, association.name, association.target
                        ),
                    )
                })?;
                if let Some(mapped_by) = &association.mapped_by {
                    let owning = target.association_named(mapped_by);
                    if !matches!(owning, Some(o) if o.owning && o.target == entity.name) {
                        return Err(DerivaError::definition(
                            "schema",
                            format!(
                                "association '{}.{}' is mapped by '{}.{}', which is not an owning association back to {}",
                                entity.name, association.name, target.name, mapped_by, entity.name
                            ),
                        ));
                    }
                }
            }
        }
        Ok(SchemaRegistry {
            entities: kept,
            tables,
        })
    }
}

/// Static description of every entity. Immutable once built, shared read-only.
#[derive(Debug)]
pub struct SchemaRegistry {
    entities: HashMap<String, Arc<EntityDescriptor>, RegistryHasher>,
    tables: BiMap<String, String>,
}

impl SchemaRegistry {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }
    pub fn entity(&self, name: &str) -> Option<Arc<EntityDescriptor>> {
        self.entities.get(name).map(Arc::clone)
    }
    pub fn entity_for_table(&self, table: &str) -> Option<Arc<EntityDescriptor>> {
        self.tables
            .get_by_right(table)
            .and_then(|name| self.entity(name))
    }
    pub fn len(&self) -> usize {
        self.entities.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Resolves a dotted path from `root`. Every segment but the last must be a
    /// to-one association.
    pub fn resolve(&self, root: &Arc<EntityDescriptor>, path: &FieldPath) -> std::result::Result<ResolvedPath, String> {
        let segments = path.segments();
        if segments.is_empty() || segments.iter().any(String::is_empty) {
            return Err(format!("empty path segment in '{path}'"));
        }
        let mut owner = Arc::clone(root);
        let mut hops = Vec::new();
        for (i, segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();
            if let Some(field) = owner.field_named(segment) {
                if !last {
                    return Err(format!(
                        "'{segment}' is a field of {} and cannot be traversed in '{path}'",
                        owner.name
                    ));
                }
                return Ok(ResolvedPath {
                    path: path.clone(),
                    hops,
                    terminal: Terminal::Field(field.clone()),
                    owner,
                });
            }
            let association = owner.association_named(segment).cloned().ok_or_else(|| {
                format!("no property '{segment}' on {} (path '{path}')", owner.name)
            })?;
            if last {
                return Ok(ResolvedPath {
                    path: path.clone(),
                    hops,
                    terminal: Terminal::Association(association),
                    owner,
                });
            }
            if !association.is_to_one() {
                return Err(format!(
                    "collection association '{}.{}' cannot be traversed in '{path}'",
                    owner.name, association.name
                ));
            }
            let target = self
                .entity(&association.target)
                .ok_or_else(|| format!("unknown entity '{}'", association.target))?;
            hops.push(association);
            owner = target;
        }
        Err(format!("path '{path}' does not end in a property"))
    }

    /// Matches the longest run of capitalised words at the front of `words`
    /// against a property of `root`, following at most one to-one association.
    /// `["Team", "Name", "Like"]` on Member yields `team.name` and 2.
    pub fn match_property(&self, root: &EntityDescriptor, words: &[&str]) -> Option<(FieldPath, usize)> {
        self.match_words(root, words, 1)
    }

    fn match_words(&self, entity: &EntityDescriptor, words: &[&str], depth: usize) -> Option<(FieldPath, usize)> {
        let mut best: Option<(FieldPath, usize)> = None;
        for n in 1..=words.len() {
            let name = lower_camel(&words[..n]);
            if entity.field_named(&name).is_some() {
                best = longer(best, (FieldPath::new(vec![name.clone()]), n));
            }
            if let Some(association) = entity.association_named(&name) {
                best = longer(best, (FieldPath::new(vec![name.clone()]), n));
                if depth > 0 && association.is_to_one() {
                    if let Some(target) = self.entities.get(&association.target) {
                        if let Some((rest, used)) = self.match_words(target, &words[n..], depth - 1) {
                            let mut segments = vec![name.clone()];
                            segments.extend(rest.segments().iter().cloned());
                            best = longer(best, (FieldPath::new(segments), n + used));
                        }
                    }
                }
            }
        }
        best
    }
}

fn longer(best: Option<(FieldPath, usize)>, candidate: (FieldPath, usize)) -> Option<(FieldPath, usize)> {
    match best {
        Some(b) if b.1 >= candidate.1 => Some(b),
        _ => Some(candidate),
    }
}

/// `["Team", "Name"]` becomes `teamName`.
pub fn lower_camel(words: &[&str]) -> String {
    let mut name = String::new();
    for (i, word) in words.iter().enumerate() {
        if i == 0 {
            let mut chars = word.chars();
            if let Some(first) = chars.next() {
                name.extend(first.to_lowercase());
                name.push_str(chars.as_str());
            }
        } else {
            name.push_str(word);
        }
    }
    name
}

/// `teamName` becomes `team_name`.
pub fn snake_case(name: &str) -> String {
    let mut snake = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                snake.push('_');
            }
            snake.extend(c.to_lowercase());
        } else {
            snake.push(c);
        }
    }
    snake
}
