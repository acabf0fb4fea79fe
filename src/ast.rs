//! This module defines abstract syntax tree (AST) types for statements.

use std::fmt;

use enum_as_inner::EnumAsInner;
use itertools::Itertools;

use crate::lang::{Expr, Type, Value};
use crate::sql_type::SqlType;

#[derive(Debug, Clone, EnumAsInner)]
pub enum Statement {
    Create(CreateStatement),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    Select(SelectStatement),
    Eval(Expr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColDef {
    pub name: String,
    pub coltype: SqlType,
    pub primary_key: bool,
    /// The table this column's values are primary keys of.
    pub references: Option<String>,
}

impl fmt::Display for ColDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.coltype)?;
        if self.primary_key {
            write!(f, " PRIMARY KEY")?;
        }
        if let Some(t) = &self.references {
            write!(f, " REFERENCES {t}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateStatement {
    pub tablename: String,
    pub coldefs: Vec<ColDef>,
}

/// Renders the statement as text that parses back to an equal statement.
impl fmt::Display for CreateStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CREATE TABLE {} ({})",
            self.tablename,
            self.coldefs.iter().join(", ")
        )
    }
}

#[derive(Debug, Clone)]
pub struct InsertStatement {
    pub tablename: String,
    /// Must evaluate to a record of the table's row type.
    pub row: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub tablename: String,
    pub assignments: Vec<(String, Literal)>,
    pub filters: Vec<Filter>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub tablename: String,
    pub filters: Vec<Filter>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub live: bool,
    pub query: Query,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Many,
    One,
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::Many => "MANY".fmt(f),
            Cardinality::One => "ONE".fmt(f),
        }
    }
}

/// A tree-shaped query: rows of one table, each with selected columns and nested queries
/// over related tables.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub cardinality: Cardinality,
    pub table: String,
    /// Conditions that must all hold.
    pub filters: Vec<Filter>,
    pub selections: Vec<Selection>,
}

impl Query {
    /// returns a copy of this query returning every matching row whose `column` equals
    /// `value`.
    pub fn narrowed_to(&self, column: &str, value: Literal) -> Query {
        let mut q = self.clone();
        q.cardinality = Cardinality::Many;
        q.filters.push(Filter {
            column: column.to_string(),
            value,
        });
        q
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.cardinality, self.table)?;
        if !self.filters.is_empty() {
            write!(f, " WHERE {}", self.filters.iter().join(" AND "))?;
        }
        write!(f, " {{ {} }}", self.selections.iter().join(", "))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Literal,
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.column, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum Selection {
    Column(String),
    Nested { name: String, query: Query },
}

impl Selection {
    pub fn name(&self) -> &str {
        match self {
            Selection::Column(name) | Selection::Nested { name, .. } => name,
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Column(name) => name.fmt(f),
            Selection::Nested { name, query } => write!(f, "{name}: {query}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    Int(i64),
    String(String),
    Bool(bool),
}

impl Literal {
    pub fn ty(&self) -> Type {
        match self {
            Literal::Int(_) => Type::Int,
            Literal::String(_) => Type::String,
            Literal::Bool(_) => Type::Bool,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Literal::Int(i) => Value::Int(*i),
            Literal::String(s) => Value::String(s.clone()),
            Literal::Bool(b) => Value::Bool(*b),
        }
    }

    pub fn from_value(v: &Value) -> Option<Literal> {
        match v {
            Value::Int(i) => Some(Literal::Int(*i)),
            Value::String(s) => Some(Literal::String(s.clone())),
            Value::Bool(b) => Some(Literal::Bool(*b)),
            _ => None,
        }
    }

    /// returns an expression evaluating to this literal.
    pub fn to_expr(&self) -> Expr {
        match self {
            Literal::Int(i) => Expr::IntLit(*i),
            Literal::String(s) => Expr::StringLit(s.clone()),
            Literal::Bool(true) => Expr::var("true"),
            Literal::Bool(false) => Expr::var("false"),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(x) => x.fmt(f),
            Literal::String(x) => write!(f, "{:?}", x),
            Literal::Bool(x) => x.fmt(f),
        }
    }
}

#[test]
fn test_format_create_statement() {
    let c = CreateStatement {
        tablename: "comments".to_string(),
        coldefs: vec![
            ColDef {
                name: "id".to_string(),
                coltype: SqlType::String,
                primary_key: true,
                references: None,
            },
            ColDef {
                name: "post_id".to_string(),
                coltype: SqlType::String,
                primary_key: false,
                references: Some("posts".to_string()),
            },
            ColDef {
                name: "n".to_string(),
                coltype: SqlType::Int,
                primary_key: false,
                references: None,
            },
        ],
    };
    assert_eq!(
        format!("{}", c),
        "CREATE TABLE comments (id string PRIMARY KEY, post_id string REFERENCES posts, n int)"
    );
}

#[test]
fn test_narrowed_to() {
    let q = Query {
        cardinality: Cardinality::One,
        table: "t".to_string(),
        filters: vec![Filter {
            column: "a".to_string(),
            value: Literal::Bool(true),
        }],
        selections: vec![Selection::Column("id".to_string())],
    };
    let n = q.narrowed_to("id", Literal::String("x".to_string()));
    assert_eq!(format!("{}", n), "MANY t WHERE a = true AND id = \"x\" { id }");
}
