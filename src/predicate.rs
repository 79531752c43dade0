//! Predicate trees shared by derived queries, templates and example probes.

use std::fmt;

use crate::schema::FieldPath;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanEqual,
    LessThan,
    LessThanEqual,
    In,
    IsNull,
    IsNotNull,
    Like,
}

impl Operator {
    /// Null tests take no argument.
    pub fn arity(&self) -> usize {
        match self {
            Operator::IsNull | Operator::IsNotNull => 0,
            _ => 1,
        }
    }
    /// False when a missing (null) value can satisfy the comparison.
    pub fn rejects_null(&self) -> bool {
        !matches!(self, Operator::IsNull)
    }
    pub fn sql(&self) -> &'static str {
        match self {
            Operator::Equals => "=",
            Operator::NotEquals => "<>",
            Operator::GreaterThan => ">",
            Operator::GreaterThanEqual => ">=",
            Operator::LessThan => "<",
            Operator::LessThanEqual => "<=",
            Operator::In => "IN",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
            Operator::Like => "LIKE",
        }
    }
}

/// A parameter position. Named slots come from templates, unnamed ones from
/// method descriptors and example probes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamSlot {
    pub index: usize,
    pub name: Option<String>,
}

impl ParamSlot {
    pub fn positional(index: usize) -> Self {
        Self { index, name: None }
    }
    pub fn named(index: usize, name: &str) -> Self {
        Self {
            index,
            name: Some(name.to_owned()),
        }
    }
}

impl fmt::Display for ParamSlot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, ":{name}"),
            None => write!(f, "?{}", self.index + 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Slot(ParamSlot),
    Literal(Value),
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PredicateNode {
    Comparison {
        path: FieldPath,
        operator: Operator,
        operand: Operand,
    },
    Conjunction(Box<PredicateNode>, Box<PredicateNode>),
    Disjunction(Box<PredicateNode>, Box<PredicateNode>),
}

impl PredicateNode {
    pub fn comparison(path: FieldPath, operator: Operator, operand: Operand) -> Self {
        PredicateNode::Comparison {
            path,
            operator,
            operand,
        }
    }
    pub fn and(self, other: PredicateNode) -> Self {
        PredicateNode::Conjunction(Box::new(self), Box::new(other))
    }
    pub fn or(self, other: PredicateNode) -> Self {
        PredicateNode::Disjunction(Box::new(self), Box::new(other))
    }

    /// Left-associative conjunction of all nodes, `None` when empty.
    pub fn all(nodes: impl IntoIterator<Item = PredicateNode>) -> Option<PredicateNode> {
        nodes.into_iter().reduce(PredicateNode::and)
    }
    pub fn any(nodes: impl IntoIterator<Item = PredicateNode>) -> Option<PredicateNode> {
        nodes.into_iter().reduce(PredicateNode::or)
    }

    /// Every field path referenced, in visiting order.
    pub fn paths(&self) -> Vec<&FieldPath> {
        let mut paths = Vec::new();
        self.collect_paths(&mut paths);
        paths
    }
    fn collect_paths<'a>(&'a self, paths: &mut Vec<&'a FieldPath>) {
        match self {
            PredicateNode::Comparison { path, .. } => paths.push(path),
            PredicateNode::Conjunction(l, r) | PredicateNode::Disjunction(l, r) => {
                l.collect_paths(paths);
                r.collect_paths(paths);
            }
        }
    }

    /// Every comparison in visiting order, paired with whether it must hold
    /// for the whole tree to hold (reached only through conjunctions).
    pub fn comparisons(&self) -> Vec<(&FieldPath, Operator, bool)> {
        let mut found = Vec::new();
        self.collect_comparisons(true, &mut found);
        found
    }
    fn collect_comparisons<'a>(&'a self, required: bool, found: &mut Vec<(&'a FieldPath, Operator, bool)>) {
        match self {
            PredicateNode::Comparison { path, operator, .. } => found.push((path, *operator, required)),
            PredicateNode::Conjunction(l, r) => {
                l.collect_comparisons(required, found);
                r.collect_comparisons(required, found);
            }
            PredicateNode::Disjunction(l, r) => {
                l.collect_comparisons(false, found);
                r.collect_comparisons(false, found);
            }
        }
    }

    /// Every parameter slot referenced, in visiting order.
    pub fn slots(&self) -> Vec<&ParamSlot> {
        let mut slots = Vec::new();
        self.collect_slots(&mut slots);
        slots
    }
    fn collect_slots<'a>(&'a self, slots: &mut Vec<&'a ParamSlot>) {
        match self {
            PredicateNode::Comparison {
                operand: Operand::Slot(slot),
                ..
            } => slots.push(slot),
            PredicateNode::Comparison { .. } => (),
            PredicateNode::Conjunction(l, r) | PredicateNode::Disjunction(l, r) => {
                l.collect_slots(slots);
                r.collect_slots(slots);
            }
        }
    }
}

impl fmt::Display for PredicateNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PredicateNode::Comparison {
                path,
                operator,
                operand,
            } => match operand {
                Operand::Slot(slot) => write!(f, "{path} {} {slot}", operator.sql()),
                Operand::Literal(value) => write!(f, "{path} {} {value}", operator.sql()),
                Operand::None => write!(f, "{path} {}", operator.sql()),
            },
            PredicateNode::Conjunction(l, r) => write!(f, "({l} AND {r})"),
            PredicateNode::Disjunction(l, r) => write!(f, "({l} OR {r})"),
        }
    }
}
