// used for binding and reading values through the storage layer
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

// used for date values
use chrono::NaiveDate;

use serde::Serialize;

// used to print out readable forms of a value
use std::fmt;
use std::sync::Arc;

use crate::error::{DerivaError, Result};

/// Scalar types a schema field may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Integer,
    Real,
    Text,
    Boolean,
    Date,
}

impl ScalarType {
    // stored representation of dates, as also used by rusqlite's chrono support
    pub const DATE_FORMAT: &'static str = "%Y-%m-%d";

    /// Recovers a typed value from its raw stored form. SQLite has no native
    /// boolean or date type, so those come back as integers and text.
    pub fn coerce(&self, value: Value) -> Result<Value> {
        let coerced = match (self, value) {
            (ScalarType::Boolean, Value::Integer(i)) => Value::Boolean(i != 0),
            (ScalarType::Date, Value::Text(text)) => NaiveDate::parse_from_str(&text, Self::DATE_FORMAT)
                .map(Value::Date)
                .map_err(|e| DerivaError::Mapping(format!("invalid date '{text}': {e}")))?,
            (ScalarType::Real, Value::Integer(i)) => Value::Real(i as f64),
            (_, other) => other,
        };
        Ok(coerced)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Date(NaiveDate),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }
    /// Untyped conversion used when no schema type is known (native queries).
    pub fn from_raw(value: ValueRef<'_>) -> Result<Value> {
        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(t) => Value::Text(
                String::from_utf8(t.to_vec())
                    .map_err(|e| DerivaError::Mapping(format!("invalid text column: {e}")))?,
            ),
            ValueRef::Blob(_) => {
                return Err(DerivaError::Mapping("blob columns are not supported".into()));
            }
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Date(d) => write!(f, "{}", d.format(ScalarType::DATE_FORMAT)),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::from(rusqlite::types::Null),
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Real(r) => ToSqlOutput::from(*r),
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
            Value::Boolean(b) => ToSqlOutput::from(*b),
            Value::Date(d) => ToSqlOutput::from(d.format(ScalarType::DATE_FORMAT).to_string()),
            Value::List(_) => {
                return Err(rusqlite::Error::ToSqlConversionFailure(
                    "list values must be expanded before binding".into(),
                ));
            }
        })
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Value::from_raw(value).map_err(|e| rusqlite::types::FromSqlError::Other(Box::new(e)))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}
impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}
impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl TryFrom<Value> for String {
    type Error = DerivaError;
    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(DerivaError::Mapping(format!("expected text, found {other:?}"))),
        }
    }
}
impl TryFrom<Value> for i64 {
    type Error = DerivaError;
    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Integer(i) => Ok(i),
            other => Err(DerivaError::Mapping(format!("expected integer, found {other:?}"))),
        }
    }
}

/// One raw result row: an ordered sequence of column-name to value pairs.
/// Column names are shared by every row of a result.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
    pub fn shared_columns(&self) -> Arc<[String]> {
        Arc::clone(&self.columns)
    }
    pub fn values(&self) -> &[Value] {
        &self.values
    }
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }
    /// Number of columns carrying the given name.
    pub fn occurrences(&self, column: &str) -> usize {
        self.columns.iter().filter(|c| *c == column).count()
    }
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(String::as_str).zip(self.values.iter())
    }
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// The rows of one read with their column names, known even when no row
/// came back.
#[derive(Debug, Clone, PartialEq)]
pub struct RowSet {
    columns: Arc<[String]>,
    rows: Vec<Row>,
}

impl RowSet {
    pub fn new(columns: Arc<[String]>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }
    pub fn len(&self) -> usize {
        self.rows.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
    pub fn truncate(&mut self, len: usize) {
        self.rows.truncate(len);
    }
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}
