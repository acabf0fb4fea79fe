//! `parser` contains generated parsing routines for statements and expressions, and tests on them.

use pest::Parser;

use crate::ast;
use crate::lang::{Expr, Type};
use crate::pt_to_ast;

#[derive(Parser)]
#[grammar = "sql.pest"]
pub struct QueryParser;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Syntax error: {0}")]
    Syntax(Box<pest::error::Error<Rule>>),
    #[error("Invalid literal: {0}")]
    InvalidLiteral(String),
    #[error("Nothing to parse")]
    Empty,
    #[error(transparent)]
    Type(#[from] crate::sql_type::Error),
}

impl From<pest::error::Error<Rule>> for Error {
    fn from(e: pest::error::Error<Rule>) -> Self {
        Error::Syntax(Box::new(e))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Parses one statement.  A trailing semicolon is allowed.
pub fn parse_statement(text: &str) -> Result<ast::Statement> {
    let pair = QueryParser::parse(Rule::statement, text)?
        .next()
        .ok_or(Error::Empty)?;
    pt_to_ast::statement(pair)
}

pub fn parse_expr(text: &str) -> Result<Expr> {
    let pair = QueryParser::parse(Rule::expr_stmt, text)?
        .next()
        .ok_or(Error::Empty)?;
    pt_to_ast::expr_stmt(pair)
}

pub fn parse_type(text: &str) -> Result<Type> {
    let pair = QueryParser::parse(Rule::type_stmt, text)?
        .next()
        .ok_or(Error::Empty)?;
    pt_to_ast::type_stmt(pair)
}

#[test]
fn test_parse_literals() {
    let cases = vec![
        ("1"),
        ("1000000000000"),
        ("-1000000000000"),
        ("\"hi\""),
        ("\"with \\\"quotes\\\"\""),
        ("true"),
        ("tRuE"),
        ("FALSE"),
    ];
    for case in cases {
        println!("Case: {}", case);
        assert!(QueryParser::parse(Rule::literal, case).is_ok());
    }
}

#[test]
fn test_not_parse_invalid_literals() {
    let cases = vec![("A"), ("'hi'"), ("the quick brown fox"), ("NIL"), ("DELETE")];
    for case in cases {
        assert!(QueryParser::parse(Rule::literal, case).is_err());
    }
}

#[test]
fn test_parse_create_statements() {
    let cases = vec![
        "CREATE TABLE FOO (A INT PRIMARY KEY, B INT)",
        "create table foo (a int primary key, b string)",
        "create table foo (a int)",
        "CREATE TABLE comments (id string PRIMARY KEY, post_id string REFERENCES posts, body text)",
        "creaTe TaBle superlongname (superduperlongname integer primary key)",
    ];
    for case in cases {
        println!("Case: {}", case);
        assert!(QueryParser::parse(Rule::statement, case).is_ok());
    }
}

#[test]
fn test_not_parse_invalid_create_statements() {
    let cases = vec![
        "CREATE TABLE FOO (nonsense that does not have commas)",
        "create table foo a int, b int",
        "create table foo ()",
        "create table foo (,,,,,)",
        "CREATE T TABLE FOO (A INT, B INT)",
        "create table many (a int)",
    ];
    for case in cases {
        println!("Case: {}", case);
        assert!(QueryParser::parse(Rule::statement, case).is_err());
    }
}

#[test]
fn test_parse_statements() {
    let cases = vec![
        "INSERT INTO posts {id: \"0\", title: \"hello\"}",
        "insert into t do { let x = 1; {id: x} }",
        "UPDATE posts SET title = \"new\", n = 2 WHERE id = \"0\"",
        "DELETE FROM posts WHERE id = \"0\";",
        "MANY posts { id }",
        "live many posts where n = 1 and ok = true { id, title }",
        "MANY blog_posts { id, title, comments: MANY comments { id, body } }",
        "ONE posts WHERE id = \"0\" { id, author: ONE users { name } }",
        "EVAL plus(1, 2)",
    ];
    for case in cases {
        println!("Case: {}", case);
        match QueryParser::parse(Rule::statement, case) {
            Ok(_) => continue,
            Err(e) => panic!("Error parsing [{}] : {}", case, e),
        }
    }
}

#[test]
fn test_not_parse_invalid_statements() {
    let cases = vec![
        "SELECT * FROM tbl",
        "MANY posts {}",
        "MANY posts",
        "UPDATE posts SET title = \"x\"",
        "DELETE FROM posts",
        "INSERT INTO posts",
        "MANY posts { id } extra",
    ];
    for case in cases {
        println!("Case: {}", case);
        assert!(QueryParser::parse(Rule::statement, case).is_err());
    }
}

#[test]
fn test_parse_exprs() {
    let cases = vec![
        "1",
        "x",
        "x.y.z",
        "{}",
        "{a: 1, b: \"two\"}",
        "f()",
        "plus(1, times(2, 3))",
        "fn(x: int, y: {a: string}): bool => intEq(x, 1)",
        "fn(f: fn(int): int): iterator<int> => f",
        "do { let x = 1; let y = x; y }",
        "(do { 1 }).a",
        "done",
    ];
    for case in cases {
        println!("Case: {}", case);
        match QueryParser::parse(Rule::expr_stmt, case) {
            Ok(_) => continue,
            Err(e) => panic!("Error parsing [{}] : {}", case, e),
        }
    }
}

#[test]
fn test_not_parse_invalid_exprs() {
    let cases = vec!["fn", "do { let x = 1; }", "{a}", "f(", "1 2", "let"];
    for case in cases {
        println!("Case: {}", case);
        assert!(QueryParser::parse(Rule::expr_stmt, case).is_err());
    }
}

#[test]
fn test_parse_types() {
    let cases = vec![
        ("int", Type::Int),
        ("{a: int, b: bool}", Type::record([("a", Type::Int), ("b", Type::Bool)])),
        ("iterator<{id: string}>", Type::iterator(Type::record([("id", Type::String)]))),
        ("index<int, {id: int}>", Type::index(Type::Int, Type::record([("id", Type::Int)]))),
        ("fn(int, 'A): 'B", Type::function(vec![Type::Int, Type::var("A")], Type::var("B"))),
        ("fn(): string", Type::function(vec![], Type::String)),
    ];
    for (text, expected) in cases {
        println!("Case: {}", text);
        let t = parse_type(text).unwrap();
        assert_eq!(t, expected);
        // Types print in the syntax they are parsed from.
        assert_eq!(parse_type(&t.to_string()).unwrap(), t);
    }
}

#[test]
fn test_parse_error_is_reported() {
    let e = parse_statement("MANY posts {").unwrap_err();
    assert!(matches!(e, Error::Syntax(_)));
    let e = parse_statement("CREATE TABLE t (a real)").unwrap_err();
    assert!(matches!(e, Error::Type(_)));
    let e = parse_expr("99999999999999999999").unwrap_err();
    assert!(matches!(e, Error::InvalidLiteral(_)));
}
