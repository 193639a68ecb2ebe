//! Destination table contracts: column types, primary keys and the scalar
//! values that travel from builders to loaders.

use std::fmt;

/// Declared destination column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int64,
    Float64,
    String,
}

impl ColumnType {
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Int64 => "BIGINT",
            ColumnType::Float64 => "DOUBLE PRECISION",
            ColumnType::String => "TEXT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// A named destination table: ordered columns plus the declared primary key.
///
/// The primary key is a declaration only. The fact table declares `date_id`
/// even though many fact rows share one date; loaders must not turn it into
/// a uniqueness constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>, primary_key: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns,
            primary_key: primary_key.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// A single cell bound for a destination table.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Parse a raw CSV cell according to the declared column type.
    pub fn parse(raw: &str, column_type: ColumnType) -> Option<Value> {
        match column_type {
            ColumnType::Int64 => raw.parse().ok().map(Value::Int),
            ColumnType::Float64 => raw.parse().ok().map(Value::Float),
            ColumnType::String => Some(Value::Text(raw.to_string())),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            // Keep a decimal point on whole floats so 50.0 stays a decimal column
            Value::Float(v) if v.fract() == 0.0 && v.is_finite() => write!(f, "{:.1}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_display_keeps_decimal_point() {
        assert_eq!(Value::Float(50.0).to_string(), "50.0");
        assert_eq!(Value::Float(12.5).to_string(), "12.5");
        assert_eq!(Value::Int(20230405).to_string(), "20230405");
        assert_eq!(Value::from("Red").to_string(), "Red");
    }

    #[test]
    fn test_value_parse_by_column_type() {
        assert_eq!(Value::parse("7", ColumnType::Int64), Some(Value::Int(7)));
        assert_eq!(Value::parse("7.5", ColumnType::Int64), None);
        assert_eq!(Value::parse("7.5", ColumnType::Float64), Some(Value::Float(7.5)));
        assert_eq!(Value::parse("XX", ColumnType::String), Some(Value::from("XX")));
    }

    #[test]
    fn test_sql_types() {
        assert_eq!(ColumnType::Int64.sql_type(), "BIGINT");
        assert_eq!(ColumnType::Float64.sql_type(), "DOUBLE PRECISION");
        assert_eq!(ColumnType::String.sql_type(), "TEXT");
    }
}
