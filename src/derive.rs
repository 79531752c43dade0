//! Method descriptors such as `findByUsernameAndAgeGreaterThan` turned into
//! predicate trees.
//!
//! A descriptor is `<subject keyword>[modifiers]By<criteria>[OrderBy<sort>]`.
//! Criteria are `Property[Operator]` segments joined by `And`/`Or`, with `And`
//! binding tighter. Property names are matched greedily against the schema, so
//! `TeamName` on `Member` resolves to `team.name`.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{DerivaError, Result};
use crate::predicate::{Operand, Operator, ParamSlot, PredicateNode};
use crate::query::{Direction, SortDirective};
use crate::schema::{EntityDescriptor, FieldPath, SchemaRegistry, Terminal};

lazy_static! {
    // a trailing `OrderBy` is taken before the criteria `By`
    static ref DESCRIPTOR: Regex = Regex::new(
        r"^(find|read|get|query|search|stream|count|exists|delete|remove)(.*?)(?:By(.*?))?(?:OrderBy(.*))?$"
    )
    .unwrap();
    static ref LIMITING: Regex = Regex::new(r"(?:Top|First)(\d*)").unwrap();
    static ref WORD: Regex = Regex::new(r"[A-Z][a-z0-9]*|[a-z0-9]+").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    Find,
    Count,
    Exists,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodQuery {
    pub subject: Subject,
    pub limit: Option<usize>,
    pub distinct: bool,
    pub predicate: Option<PredicateNode>,
    /// Argument slots in call-site order.
    pub params: Vec<ParamSlot>,
    pub sort: Vec<SortDirective>,
}

// longest spellings first; a leading `Is` is stripped before matching
const OPERATORS: &[(&[&str], Operator)] = &[
    (&["Greater", "Than", "Equal"], Operator::GreaterThanEqual),
    (&["Less", "Than", "Equal"], Operator::LessThanEqual),
    (&["Greater", "Than"], Operator::GreaterThan),
    (&["Less", "Than"], Operator::LessThan),
    (&["Not", "Null"], Operator::IsNotNull),
    (&["Null"], Operator::IsNull),
    (&["After"], Operator::GreaterThan),
    (&["Before"], Operator::LessThan),
    (&["Equals"], Operator::Equals),
    (&["Like"], Operator::Like),
    (&["Not"], Operator::NotEquals),
    (&["In"], Operator::In),
];

/// Splits camel case text into words: `UsernameAndAge` gives
/// `["Username", "And", "Age"]`.
pub fn words(text: &str) -> Vec<&str> {
    WORD.find_iter(text).map(|m| m.as_str()).collect()
}

pub fn parse_method(
    descriptor: &str,
    entity: &EntityDescriptor,
    registry: &SchemaRegistry,
) -> Result<MethodQuery> {
    let fail = |message: String| DerivaError::definition(descriptor, message);
    let captures = DESCRIPTOR
        .captures(descriptor)
        .ok_or_else(|| fail("descriptor does not start with a known subject keyword".into()))?;
    let subject = match &captures[1] {
        "count" => Subject::Count,
        "exists" => Subject::Exists,
        "delete" | "remove" => Subject::Delete,
        _ => Subject::Find,
    };
    let modifiers = captures.get(2).map(|m| m.as_str()).unwrap_or("");
    let distinct = modifiers.contains("Distinct");
    let limit = match LIMITING.captures(modifiers) {
        Some(limiting) => {
            let digits = limiting.get(1).map(|m| m.as_str()).unwrap_or("");
            let n = if digits.is_empty() {
                1
            } else {
                digits
                    .parse::<usize>()
                    .map_err(|e| fail(format!("invalid row limit '{digits}': {e}")))?
            };
            if n == 0 {
                return Err(fail("row limit must be greater than zero".into()));
            }
            Some(n)
        }
        None => None,
    };
    let criteria = captures.get(3).map(|m| m.as_str()).unwrap_or("");
    let ordering = captures.get(4).map(|m| m.as_str());

    let mut params = Vec::new();
    let predicate = parse_criteria(&words(criteria), entity, registry, &mut params).map_err(fail)?;
    let sort = match ordering {
        Some(ordering) => parse_ordering(&words(ordering), entity, registry).map_err(fail)?,
        None => Vec::new(),
    };
    Ok(MethodQuery {
        subject,
        limit,
        distinct,
        predicate,
        params,
        sort,
    })
}

fn parse_criteria(
    words: &[&str],
    entity: &EntityDescriptor,
    registry: &SchemaRegistry,
    params: &mut Vec<ParamSlot>,
) -> std::result::Result<Option<PredicateNode>, String> {
    if words.is_empty() {
        return Ok(None);
    }
    let mut alternatives = Vec::new();
    let mut conjunction: Option<PredicateNode> = None;
    let mut i = 0;
    loop {
        let (path, used) = registry
            .match_property(entity, &words[i..])
            .ok_or_else(|| format!("no property of {} matches '{}'", entity.name(), words[i..].concat()))?;
        i += used;
        let (operator, used) = match_operator(&words[i..]);
        i += used;
        check_operand(&path, operator, entity, registry)?;
        let operand = if operator.arity() == 1 {
            let slot = ParamSlot::positional(params.len());
            params.push(slot.clone());
            Operand::Slot(slot)
        } else {
            Operand::None
        };
        let comparison = PredicateNode::comparison(path, operator, operand);
        conjunction = Some(match conjunction {
            Some(left) => left.and(comparison),
            None => comparison,
        });
        if i == words.len() {
            break;
        }
        match words[i] {
            "And" => (),
            "Or" => alternatives.extend(conjunction.take()),
            other => {
                return Err(format!(
                    "unexpected '{other}' in '{}'; expected And, Or or an operator",
                    words[i..].concat()
                ));
            }
        }
        i += 1;
        if i == words.len() {
            return Err(format!("dangling '{}' at the end of the criteria", words[i - 1]));
        }
    }
    alternatives.extend(conjunction);
    Ok(PredicateNode::any(alternatives))
}

fn match_operator(words: &[&str]) -> (Operator, usize) {
    let (offset, rest) = match words.first() {
        Some(&"Is") => (1, &words[1..]),
        _ => (0, words),
    };
    for (spelling, operator) in OPERATORS {
        if rest.len() >= spelling.len() && rest[..spelling.len()] == **spelling {
            return (*operator, offset + spelling.len());
        }
    }
    // a bare `Is` is an explicit equality
    (Operator::Equals, offset)
}

// association paths may only be null tested, through their foreign key
fn check_operand(
    path: &FieldPath,
    operator: Operator,
    entity: &EntityDescriptor,
    registry: &SchemaRegistry,
) -> std::result::Result<(), String> {
    let root = registry
        .entity(entity.name())
        .ok_or_else(|| format!("entity '{}' is not registered", entity.name()))?;
    let resolved = registry.resolve(&root, path)?;
    match resolved.terminal {
        Terminal::Field(_) => Ok(()),
        Terminal::Association(a) if a.owning() && operator.arity() == 0 => Ok(()),
        Terminal::Association(_) => Err(format!(
            "'{path}' is an association and can only be tested with IsNull or IsNotNull"
        )),
    }
}

fn parse_ordering(
    words: &[&str],
    entity: &EntityDescriptor,
    registry: &SchemaRegistry,
) -> std::result::Result<Vec<SortDirective>, String> {
    if words.is_empty() {
        return Err("OrderBy names no property".into());
    }
    let mut sort = Vec::new();
    let mut i = 0;
    while i < words.len() {
        let (path, used) = registry
            .match_property(entity, &words[i..])
            .ok_or_else(|| format!("no property of {} matches '{}'", entity.name(), words[i..].concat()))?;
        i += used;
        let direction = match words.get(i) {
            Some(&"Desc") => {
                i += 1;
                Direction::Desc
            }
            Some(&"Asc") => {
                i += 1;
                Direction::Asc
            }
            _ => Direction::Asc,
        };
        sort.push(SortDirective { path, direction });
    }
    Ok(sort)
}
