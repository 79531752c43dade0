//! Explicit query templates.
//!
//! Templates are parsed with the grammar in `template.pest` and resolved against
//! the schema: aliases become root relative paths, joins become join
//! requirements and parameters become slots. Grammar details live in
//! `template.pest`.

use std::collections::HashMap;
use std::sync::Arc;

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;

use crate::error::{DerivaError, Result};
use crate::predicate::{Operand, Operator, ParamSlot, PredicateNode};
use crate::projection::{ClosedShape, DtoShape, ProjectionTarget};
use crate::query::{
    ArithmeticOperator, Assignment, BulkSpec, Direction, JoinKind, JoinRequirement, Mutation,
    Selection, SortDirective, ValueExpr,
};
use crate::schema::{EntityDescriptor, FieldPath, SchemaRegistry, Terminal};
use crate::value::Value;

#[derive(Parser)]
#[grammar = "template.pest"]
struct TemplateParser;

/// A select template resolved against the schema.
#[derive(Debug, Clone)]
pub struct SelectTemplate {
    pub entity: Arc<EntityDescriptor>,
    pub distinct: bool,
    pub joins: Vec<JoinRequirement>,
    pub selections: Vec<Selection>,
    pub projection: ProjectionTarget,
    /// `select count(alias)`
    pub count_only: bool,
    pub predicate: Option<PredicateNode>,
    pub sort: Vec<SortDirective>,
    pub params: Vec<ParamSlot>,
}

#[derive(Debug, Clone)]
pub enum CompiledTemplate {
    Select(SelectTemplate),
    Bulk(BulkSpec),
}

type Outcome<T> = std::result::Result<T, String>;

pub fn compile_template(definition: &str, text: &str, registry: &SchemaRegistry) -> Result<CompiledTemplate> {
    let fail = |message: String| DerivaError::definition(definition, message);
    let mut pairs = TemplateParser::parse(Rule::statement, text)
        .map_err(|e| fail(format!("template does not parse:\n{e}")))?;
    let statement = pairs
        .next()
        .and_then(|s| s.into_inner().next())
        .ok_or_else(|| fail("empty template".into()))?;
    match statement.as_rule() {
        Rule::select_stmt => select(statement, registry).map(CompiledTemplate::Select),
        Rule::update_stmt | Rule::delete_stmt => bulk(statement, registry).map(CompiledTemplate::Bulk),
        other => Err(format!("unexpected statement {other:?}")),
    }
    .map_err(fail)
}

struct Scope<'a> {
    registry: &'a SchemaRegistry,
    root: Arc<EntityDescriptor>,
    aliases: HashMap<String, FieldPath>,
    slots: Vec<ParamSlot>,
    named: bool,
    positional: bool,
}

impl<'a> Scope<'a> {
    fn open(registry: &'a SchemaRegistry, entity: &str, alias: &str) -> Outcome<Self> {
        let root = registry
            .entity(entity)
            .ok_or_else(|| format!("unknown entity '{entity}'"))?;
        let mut aliases = HashMap::new();
        aliases.insert(alias.to_owned(), FieldPath::new(Vec::new()));
        Ok(Self {
            registry,
            root,
            aliases,
            slots: Vec::new(),
            named: false,
            positional: false,
        })
    }

    /// Root relative path for an alias qualified path. Empty for the root alias.
    fn path(&self, pair: Pair<Rule>) -> Outcome<FieldPath> {
        let written = pair.as_str().to_owned();
        let mut segments = pair.into_inner().map(|p| p.as_str().to_owned());
        let alias = segments.next().unwrap_or_default();
        let base = self
            .aliases
            .get(&alias)
            .ok_or_else(|| format!("unknown alias '{alias}' in '{written}'"))?;
        let mut resolved = base.segments().to_vec();
        resolved.extend(segments);
        Ok(FieldPath::new(resolved))
    }

    fn field_path(&self, pair: Pair<Rule>) -> Outcome<FieldPath> {
        let written = pair.as_str().to_owned();
        let path = self.path(pair)?;
        if path.segments().is_empty() {
            return Err(format!("'{written}' names an entity where a property is expected"));
        }
        self.registry.resolve(&self.root, &path)?;
        Ok(path)
    }

    fn slot(&mut self, pair: Pair<Rule>) -> Outcome<ParamSlot> {
        let slot = match pair.as_rule() {
            Rule::named_param => {
                self.named = true;
                let name = pair.as_str().trim_start_matches(':');
                match self.slots.iter().find(|s| s.name.as_deref() == Some(name)) {
                    Some(existing) => existing.clone(),
                    None => ParamSlot::named(self.slots.len(), name),
                }
            }
            _ => {
                self.positional = true;
                let position: usize = pair.as_str()[1..]
                    .parse()
                    .map_err(|e| format!("invalid parameter '{}': {e}", pair.as_str()))?;
                if position == 0 {
                    return Err("positional parameters start at ?1".into());
                }
                ParamSlot::positional(position - 1)
            }
        };
        if self.named && self.positional {
            return Err("named and positional parameters cannot be mixed".into());
        }
        if !self.slots.contains(&slot) {
            self.slots.push(slot.clone());
        }
        Ok(slot)
    }

    fn operand(&mut self, pair: Pair<Rule>) -> Outcome<Operand> {
        let inner = first(pair)?;
        match inner.as_rule() {
            Rule::named_param | Rule::positional_param => Ok(Operand::Slot(self.slot(inner)?)),
            _ => Ok(Operand::Literal(literal(inner)?)),
        }
    }

    fn or_expr(&mut self, pair: Pair<Rule>) -> Outcome<PredicateNode> {
        let mut alternatives = Vec::new();
        for and_expr in pair.into_inner().filter(|p| p.as_rule() == Rule::and_expr) {
            let mut terms = Vec::new();
            for atom in and_expr.into_inner().filter(|p| p.as_rule() == Rule::atom) {
                let inner = first(atom)?;
                terms.push(match inner.as_rule() {
                    Rule::or_expr => self.or_expr(inner)?,
                    _ => self.comparison(inner)?,
                });
            }
            alternatives.extend(PredicateNode::all(terms));
        }
        PredicateNode::any(alternatives).ok_or_else(|| "empty where clause".to_string())
    }

    fn comparison(&mut self, pair: Pair<Rule>) -> Outcome<PredicateNode> {
        let mut inner = pair.into_inner();
        let path_pair = inner.next().ok_or("comparison without a path")?;
        let written = path_pair.as_str().to_owned();
        let path = self.path(path_pair)?;
        let resolved = self.registry.resolve(&self.root, &path)?;
        let test = inner.next().ok_or("comparison without a test")?;
        let (operator, operand) = match test.as_rule() {
            Rule::null_test => {
                let negated = test.into_inner().any(|p| p.as_rule() == Rule::negation);
                let operator = if negated { Operator::IsNotNull } else { Operator::IsNull };
                (operator, Operand::None)
            }
            Rule::in_test => {
                let list = test
                    .into_inner()
                    .find(|p| matches!(p.as_rule(), Rule::literal_list | Rule::operand))
                    .ok_or("in without values")?;
                let operand = match list.as_rule() {
                    Rule::literal_list => Operand::Literal(Value::List(
                        list.into_inner().map(literal_pair).collect::<Outcome<Vec<_>>>()?,
                    )),
                    _ => self.operand(list)?,
                };
                (Operator::In, operand)
            }
            Rule::like_test => {
                let operand = test
                    .into_inner()
                    .find(|p| p.as_rule() == Rule::operand)
                    .ok_or("like without a pattern")?;
                (Operator::Like, self.operand(operand)?)
            }
            _ => {
                let mut parts = test.into_inner();
                let comparator = parts.next().ok_or("missing comparator")?;
                let operator = match comparator.as_str() {
                    "=" => Operator::Equals,
                    "<>" | "!=" => Operator::NotEquals,
                    ">" => Operator::GreaterThan,
                    ">=" => Operator::GreaterThanEqual,
                    "<" => Operator::LessThan,
                    "<=" => Operator::LessThanEqual,
                    other => return Err(format!("unknown comparator '{other}'")),
                };
                let operand = parts.next().ok_or("missing comparison operand")?;
                (operator, self.operand(operand)?)
            }
        };
        if let Terminal::Association(a) = &resolved.terminal {
            if !(a.owning() && operator.arity() == 0) {
                return Err(format!(
                    "'{written}' is an association and can only be tested with 'is [not] null'"
                ));
            }
        }
        Ok(PredicateNode::comparison(path, operator, operand))
    }

    fn params(&self) -> Vec<ParamSlot> {
        let mut slots = self.slots.clone();
        slots.sort_by_key(|s| s.index);
        slots
    }
}

fn first(pair: Pair<Rule>) -> Outcome<Pair<Rule>> {
    let rule = pair.as_rule();
    pair.into_inner()
        .next()
        .ok_or_else(|| format!("empty {rule:?}"))
}

fn literal_pair(pair: Pair<Rule>) -> Outcome<Value> {
    literal(first(pair)?)
}

// accepts either a `literal` pair or one of its alternatives
fn literal(pair: Pair<Rule>) -> Outcome<Value> {
    match pair.as_rule() {
        Rule::literal => literal_pair(pair),
        Rule::integer => pair
            .as_str()
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|e| format!("invalid integer '{}': {e}", pair.as_str())),
        Rule::real => pair
            .as_str()
            .parse::<f64>()
            .map(Value::Real)
            .map_err(|e| format!("invalid number '{}': {e}", pair.as_str())),
        Rule::string => {
            let inner = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Ok(Value::Text(inner.replace("''", "'")))
        }
        Rule::boolean => Ok(Value::Boolean(pair.as_str().eq_ignore_ascii_case("true"))),
        Rule::kw_null => Ok(Value::Null),
        other => Err(format!("unexpected literal {other:?}")),
    }
}

fn ident(pair: &Pair<Rule>) -> String {
    pair.as_str().to_owned()
}

fn select(statement: Pair<Rule>, registry: &SchemaRegistry) -> Outcome<SelectTemplate> {
    let parts: Vec<Pair<Rule>> = statement.into_inner().collect();
    let from = parts
        .iter()
        .find(|p| p.as_rule() == Rule::from_clause)
        .ok_or("select without from")?;
    let names: Vec<String> = from
        .clone()
        .into_inner()
        .filter(|p| p.as_rule() == Rule::ident)
        .map(|p| ident(&p))
        .collect();
    let (entity, alias) = match names.as_slice() {
        [entity, alias] => (entity.as_str(), alias.as_str()),
        _ => return Err("from clause needs an entity and an alias".into()),
    };
    let mut scope = Scope::open(registry, entity, alias)?;

    let mut joins = Vec::new();
    for join in parts.iter().filter(|p| p.as_rule() == Rule::join_clause) {
        let mut kind = JoinKind::Inner;
        let mut fetch = false;
        let mut path = None;
        let mut join_alias = None;
        for part in join.clone().into_inner() {
            match part.as_rule() {
                Rule::join_kind => {
                    if part.into_inner().any(|k| k.as_rule() == Rule::left_join) {
                        kind = JoinKind::Left;
                    }
                }
                Rule::fetch => fetch = true,
                Rule::path => path = Some(scope.path(part)?),
                Rule::ident => join_alias = Some(ident(&part)),
                _ => (),
            }
        }
        let path = path.ok_or("join without a path")?;
        match scope.registry.resolve(&scope.root, &path)?.terminal {
            Terminal::Association(a) if a.is_to_one() && a.owning() => (),
            Terminal::Association(a) => {
                return Err(format!("collection join on '{}' is not supported", a.name()));
            }
            Terminal::Field(f) => return Err(format!("cannot join on field '{}'", f.name())),
        }
        if let Some(join_alias) = join_alias {
            scope.aliases.insert(join_alias, path.clone());
        }
        joins.push(JoinRequirement { path, kind, fetch });
    }

    let distinct = parts.iter().any(|p| p.as_rule() == Rule::distinct);
    let clause = parts
        .iter()
        .find(|p| p.as_rule() == Rule::select_clause)
        .ok_or("select without a select list")?;
    let mut selections = Vec::new();
    let mut count_only = false;
    let mut projection = ProjectionTarget::FullEntity;
    let items: Vec<Pair<Rule>> = clause.clone().into_inner().collect();
    match items.first().map(|p| p.as_rule()) {
        Some(Rule::count_item) => {
            count_only = true;
            let target = items[0]
                .clone()
                .into_inner()
                .find(|p| p.as_rule() == Rule::path)
                .ok_or("count without an argument")?;
            scope.path(target)?;
        }
        Some(Rule::constructor) => {
            let mut type_name = String::new();
            for part in items[0].clone().into_inner() {
                match part.as_rule() {
                    Rule::qualified_name => {
                        type_name = part.into_inner().last().map(|p| ident(&p)).unwrap_or_default();
                    }
                    Rule::select_item => selections.push(selection(&scope, part)?),
                    _ => (),
                }
            }
            let parameters: Vec<&str> = selections.iter().map(|s| s.alias.as_str()).collect();
            projection = ProjectionTarget::ConstructorDto(DtoShape::new(&type_name, &parameters));
        }
        _ => {
            let written: Vec<Pair<Rule>> = items
                .into_iter()
                .filter(|p| p.as_rule() == Rule::select_item)
                .collect();
            let root_only = written.len() == 1
                && written[0]
                    .clone()
                    .into_inner()
                    .next()
                    .map(|p| scope.path(p).map(|path| path.segments().is_empty()))
                    .transpose()?
                    .unwrap_or(false);
            if !root_only {
                for item in written {
                    selections.push(selection(&scope, item)?);
                }
                projection = if selections.len() == 1 {
                    ProjectionTarget::ScalarList(selections[0].path.clone())
                } else {
                    let mut shape = ClosedShape::new("Tuple");
                    for s in &selections {
                        shape = shape.field(&s.alias);
                    }
                    ProjectionTarget::ClosedInterface(shape)
                };
            }
        }
    }

    let mut predicate = None;
    if let Some(clause) = parts.iter().find(|p| p.as_rule() == Rule::where_clause) {
        let expr = clause
            .clone()
            .into_inner()
            .find(|p| p.as_rule() == Rule::or_expr)
            .ok_or("empty where clause")?;
        predicate = Some(scope.or_expr(expr)?);
    }

    let mut sort = Vec::new();
    if let Some(clause) = parts.iter().find(|p| p.as_rule() == Rule::order_clause) {
        for item in clause.clone().into_inner().filter(|p| p.as_rule() == Rule::order_item) {
            let mut path = None;
            let mut direction = Direction::Asc;
            for part in item.into_inner() {
                match part.as_rule() {
                    Rule::path => path = Some(scope.field_path(part)?),
                    Rule::direction => {
                        if part.into_inner().any(|d| d.as_rule() == Rule::kw_desc) {
                            direction = Direction::Desc;
                        }
                    }
                    _ => (),
                }
            }
            let path = path.ok_or("order by without a path")?;
            sort.push(SortDirective { path, direction });
        }
    }

    let params = scope.params();
    Ok(SelectTemplate {
        entity: scope.root,
        distinct,
        joins,
        selections,
        projection,
        count_only,
        predicate,
        sort,
        params,
    })
}

fn selection(scope: &Scope, item: Pair<Rule>) -> Outcome<Selection> {
    let mut parts = item.into_inner();
    let path_pair = parts.next().ok_or("empty select item")?;
    let path = scope.field_path(path_pair)?;
    let alias = parts
        .find(|p| p.as_rule() == Rule::ident)
        .map(|p| ident(&p))
        .unwrap_or_else(|| path.leaf().to_owned());
    Ok(Selection { path, alias })
}

fn bulk(statement: Pair<Rule>, registry: &SchemaRegistry) -> Outcome<BulkSpec> {
    let is_update = statement.as_rule() == Rule::update_stmt;
    let parts: Vec<Pair<Rule>> = statement.into_inner().collect();
    let names: Vec<String> = parts
        .iter()
        .filter(|p| p.as_rule() == Rule::ident)
        .map(ident)
        .collect();
    let (entity, alias) = match names.as_slice() {
        [entity, alias] => (entity.as_str(), alias.as_str()),
        _ => return Err("bulk statement needs an entity and an alias".into()),
    };
    let mut scope = Scope::open(registry, entity, alias)?;

    let mut assignments = Vec::new();
    for assignment in parts.iter().filter(|p| p.as_rule() == Rule::assignment) {
        let mut inner = assignment.clone().into_inner();
        let target = inner.next().ok_or("assignment without a target")?;
        let field = root_field(&scope, target)?;
        let expr = inner.next().ok_or("assignment without a value")?;
        let value = value_expr(&mut scope, expr)?;
        assignments.push(Assignment { field, value });
    }

    let mut predicate = None;
    if let Some(clause) = parts.iter().find(|p| p.as_rule() == Rule::where_clause) {
        let expr = clause
            .clone()
            .into_inner()
            .find(|p| p.as_rule() == Rule::or_expr)
            .ok_or("empty where clause")?;
        let node = scope.or_expr(expr)?;
        for path in node.paths() {
            if scope.registry.resolve(&scope.root, path)?.crosses_association() {
                return Err(format!("bulk statements cannot traverse associations ('{path}')"));
            }
        }
        predicate = Some(node);
    }

    let params = scope.params();
    Ok(BulkSpec {
        entity: scope.root,
        mutation: if is_update {
            Mutation::Update(assignments)
        } else {
            Mutation::Delete
        },
        predicate,
        params,
    })
}

fn root_field(scope: &Scope, pair: Pair<Rule>) -> Outcome<crate::schema::FieldDescriptor> {
    let written = pair.as_str().to_owned();
    let path = scope.path(pair)?;
    let resolved = scope.registry.resolve(&scope.root, &path)?;
    match (resolved.crosses_association(), resolved.terminal) {
        (false, Terminal::Field(field)) => Ok(field),
        _ => Err(format!("'{written}' is not a field of {}", scope.root.name())),
    }
}

fn value_expr(scope: &mut Scope, pair: Pair<Rule>) -> Outcome<ValueExpr> {
    // terms and operators in written order, folded by precedence
    let mut terms = Vec::new();
    let mut operators = Vec::new();
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::value_term => {
                let inner = first(part)?;
                terms.push(match inner.as_rule() {
                    Rule::operand => ValueExpr::Operand(scope.operand(inner)?),
                    Rule::path => ValueExpr::Field(root_field(scope, inner)?),
                    _ => value_expr(scope, inner)?,
                });
            }
            Rule::arithmetic => operators.push(match part.as_str() {
                "+" => ArithmeticOperator::Add,
                "-" => ArithmeticOperator::Subtract,
                "*" => ArithmeticOperator::Multiply,
                _ => ArithmeticOperator::Divide,
            }),
            _ => (),
        }
    }
    let mut terms = terms.into_iter();
    let mut sums = vec![terms.next().ok_or("empty value expression")?];
    let mut additive = Vec::new();
    for (operator, term) in operators.into_iter().zip(terms) {
        match operator {
            ArithmeticOperator::Multiply | ArithmeticOperator::Divide => {
                let left = sums.pop().ok_or("dangling operator")?;
                sums.push(ValueExpr::Binary(operator, Box::new(left), Box::new(term)));
            }
            _ => {
                additive.push(operator);
                sums.push(term);
            }
        }
    }
    let mut sums = sums.into_iter();
    let mut folded = sums.next().ok_or("empty value expression")?;
    for (operator, term) in additive.into_iter().zip(sums) {
        folded = ValueExpr::Binary(operator, Box::new(folded), Box::new(term));
    }
    Ok(folded)
}
