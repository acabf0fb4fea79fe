//! Defines an enum of the supported column types and routines for conversion to and from string.
use std::str::FromStr;
use thiserror::Error;

use crate::lang::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// These are the types a column can be declared with.
/// Type name aliases like `integer` and `text` are accepted when parsing, but
/// always print as the canonical name.
pub enum SqlType {
    Int,
    String,
    Bool,
}

impl SqlType {
    /// The type of the column's values in queries.
    pub fn lang_type(&self) -> Type {
        match self {
            SqlType::Int => Type::Int,
            SqlType::String => Type::String,
            SqlType::Bool => Type::Bool,
        }
    }

    /// The name of the built-in comparing two values of this type.
    pub fn eq_builtin(&self) -> &'static str {
        match self {
            SqlType::Int => "intEq",
            SqlType::String => "strEq",
            SqlType::Bool => "boolEq",
        }
    }
}

impl std::fmt::Display for SqlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlType::Int => "int".fmt(f),
            SqlType::String => "string".fmt(f),
            SqlType::Bool => "bool".fmt(f),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("Unable to parse column type: {0}.")]
    ParseSqlTypeError(String),
}

impl FromStr for SqlType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "int" | "integer" => Ok(SqlType::Int),
            "text" | "string" => Ok(SqlType::String),
            "bool" | "boolean" => Ok(SqlType::Bool),
            x => Err(Error::ParseSqlTypeError(String::from(x))),
        }
    }
}

#[test]
fn test_parse_sql_type() {
    let cases = vec![
        ("int", Ok(SqlType::Int)),
        ("INTEGER", Ok(SqlType::Int)),
        ("text", Ok(SqlType::String)),
        ("String", Ok(SqlType::String)),
        ("bool", Ok(SqlType::Bool)),
        ("real", Err(Error::ParseSqlTypeError("real".to_string()))),
    ];
    for (input, expected) in cases {
        assert_eq!(SqlType::from_str(input), expected);
    }
}
