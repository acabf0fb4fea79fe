//! `pt_to_ast` has routines for converting parse trees to ASTs.
//! A Pest parse tree has one enum for all possible terminals and non-terminals.
//! Our AST has enums for groups of terminals that are used in the same production.
//! The AST also discards some lexical detail like keyword case and position in the input.

use std::collections::BTreeMap;
use std::rc::Rc;
use std::str::FromStr;

use pest::iterators::Pair;

use crate::ast;
use crate::lang::{Expr, LambdaDef, Type};
use crate::parser::{Error, Result, Rule};
use crate::sql_type::SqlType;

/// Converts a `statement` pair.
pub fn statement(pair: Pair<Rule>) -> Result<ast::Statement> {
    for p in pair.into_inner() {
        return Ok(match p.as_rule() {
            Rule::create_stmt => ast::Statement::Create(create_stmt(p)?),
            Rule::insert_stmt => ast::Statement::Insert(insert_stmt(p)?),
            Rule::update_stmt => ast::Statement::Update(update_stmt(p)?),
            Rule::delete_stmt => ast::Statement::Delete(delete_stmt(p)?),
            Rule::select_stmt => ast::Statement::Select(select_stmt(p)?),
            Rule::eval_stmt => {
                let e = p.into_inner().find(|p| p.as_rule() == Rule::expr).ok_or(Error::Empty)?;
                ast::Statement::Eval(expr(e)?)
            }
            Rule::EOI => continue,
            _ => unreachable!(),
        });
    }
    Err(Error::Empty)
}

fn create_stmt(pair: Pair<Rule>) -> Result<ast::CreateStatement> {
    let mut tablename = String::new();
    let mut coldefs = vec![];
    for c in pair.into_inner() {
        match c.as_rule() {
            Rule::CREATE | Rule::TABLE => (),
            Rule::identifier => tablename = c.as_str().to_string(),
            Rule::column_def => coldefs.push(column_def(c)?),
            _ => unreachable!(),
        }
    }
    Ok(ast::CreateStatement { tablename, coldefs })
}

fn column_def(pair: Pair<Rule>) -> Result<ast::ColDef> {
    let mut coldef = ast::ColDef {
        name: String::new(),
        coltype: SqlType::Int,
        primary_key: false,
        references: None,
    };
    for c in pair.into_inner() {
        match c.as_rule() {
            Rule::identifier => coldef.name = c.as_str().to_string(),
            Rule::column_type => coldef.coltype = SqlType::from_str(c.as_str())?,
            Rule::column_constraint => {
                for constraint in c.into_inner() {
                    match constraint.as_rule() {
                        Rule::primary_key => coldef.primary_key = true,
                        Rule::references => {
                            coldef.references = constraint
                                .into_inner()
                                .find(|p| p.as_rule() == Rule::identifier)
                                .map(|p| p.as_str().to_string());
                        }
                        _ => unreachable!(),
                    }
                }
            }
            _ => unreachable!(),
        }
    }
    Ok(coldef)
}

fn insert_stmt(pair: Pair<Rule>) -> Result<ast::InsertStatement> {
    let mut tablename = String::new();
    let mut row = None;
    for c in pair.into_inner() {
        match c.as_rule() {
            Rule::INSERT | Rule::INTO => (),
            Rule::identifier => tablename = c.as_str().to_string(),
            Rule::expr => row = Some(expr(c)?),
            _ => unreachable!(),
        }
    }
    Ok(ast::InsertStatement {
        tablename,
        row: row.ok_or(Error::Empty)?,
    })
}

fn update_stmt(pair: Pair<Rule>) -> Result<ast::UpdateStatement> {
    let mut tablename = String::new();
    let mut assignments = vec![];
    let mut filters = vec![];
    for c in pair.into_inner() {
        match c.as_rule() {
            Rule::UPDATE | Rule::SET => (),
            Rule::identifier => tablename = c.as_str().to_string(),
            Rule::assignment => {
                let f = condition(c)?;
                assignments.push((f.column, f.value));
            }
            Rule::where_clause => filters = where_clause(c)?,
            _ => unreachable!(),
        }
    }
    Ok(ast::UpdateStatement {
        tablename,
        assignments,
        filters,
    })
}

fn delete_stmt(pair: Pair<Rule>) -> Result<ast::DeleteStatement> {
    let mut tablename = String::new();
    let mut filters = vec![];
    for c in pair.into_inner() {
        match c.as_rule() {
            Rule::DELETE | Rule::FROM => (),
            Rule::identifier => tablename = c.as_str().to_string(),
            Rule::where_clause => filters = where_clause(c)?,
            _ => unreachable!(),
        }
    }
    Ok(ast::DeleteStatement { tablename, filters })
}

fn where_clause(pair: Pair<Rule>) -> Result<Vec<ast::Filter>> {
    pair.into_inner()
        .filter(|c| c.as_rule() == Rule::condition)
        .map(condition)
        .collect()
}

/// Converts a `condition` or an `assignment`, which share the `column = literal` shape.
fn condition(pair: Pair<Rule>) -> Result<ast::Filter> {
    let mut column = String::new();
    let mut value = None;
    for c in pair.into_inner() {
        match c.as_rule() {
            Rule::identifier => column = c.as_str().to_string(),
            Rule::literal => value = Some(literal(c)?),
            _ => unreachable!(),
        }
    }
    Ok(ast::Filter {
        column,
        value: value.ok_or(Error::Empty)?,
    })
}

fn literal(pair: Pair<Rule>) -> Result<ast::Literal> {
    let inner = pair.into_inner().next().ok_or(Error::Empty)?;
    Ok(match inner.as_rule() {
        Rule::integer_literal => ast::Literal::Int(integer(inner.as_str())?),
        Rule::string_literal => ast::Literal::String(string(inner)?),
        Rule::true_literal => ast::Literal::Bool(true),
        Rule::false_literal => ast::Literal::Bool(false),
        _ => unreachable!(),
    })
}

fn integer(text: &str) -> Result<i64> {
    i64::from_str(text).map_err(|_| Error::InvalidLiteral(text.to_string()))
}

/// Unescapes the contents of a `string_literal` pair.
fn string(pair: Pair<Rule>) -> Result<String> {
    let raw = pair
        .into_inner()
        .next()
        .map(|p| p.as_str())
        .unwrap_or_default();
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(c @ ('"' | '\\')) => out.push(c),
            _ => return Err(Error::InvalidLiteral(format!("\"{raw}\""))),
        }
    }
    Ok(out)
}

fn select_stmt(pair: Pair<Rule>) -> Result<ast::SelectStatement> {
    let mut live = false;
    let mut q = None;
    for c in pair.into_inner() {
        match c.as_rule() {
            Rule::LIVE => live = true,
            Rule::query => q = Some(query(c)?),
            _ => unreachable!(),
        }
    }
    Ok(ast::SelectStatement {
        live,
        query: q.ok_or(Error::Empty)?,
    })
}

fn query(pair: Pair<Rule>) -> Result<ast::Query> {
    let mut q = ast::Query {
        cardinality: ast::Cardinality::Many,
        table: String::new(),
        filters: vec![],
        selections: vec![],
    };
    for c in pair.into_inner() {
        match c.as_rule() {
            Rule::cardinality => {
                q.cardinality = match c.into_inner().next().map(|p| p.as_rule()) {
                    Some(Rule::ONE) => ast::Cardinality::One,
                    _ => ast::Cardinality::Many,
                }
            }
            Rule::identifier => q.table = c.as_str().to_string(),
            Rule::where_clause => q.filters = where_clause(c)?,
            Rule::selection => q.selections.push(selection(c)?),
            _ => unreachable!(),
        }
    }
    Ok(q)
}

fn selection(pair: Pair<Rule>) -> Result<ast::Selection> {
    let inner = pair.into_inner().next().ok_or(Error::Empty)?;
    match inner.as_rule() {
        Rule::identifier => Ok(ast::Selection::Column(inner.as_str().to_string())),
        Rule::nested_selection => {
            let mut name = String::new();
            let mut q = None;
            for c in inner.into_inner() {
                match c.as_rule() {
                    Rule::identifier => name = c.as_str().to_string(),
                    Rule::query => q = Some(query(c)?),
                    _ => unreachable!(),
                }
            }
            Ok(ast::Selection::Nested {
                name,
                query: q.ok_or(Error::Empty)?,
            })
        }
        _ => unreachable!(),
    }
}

/// Converts an `expr_stmt` pair.
pub fn expr_stmt(pair: Pair<Rule>) -> Result<Expr> {
    let e = pair
        .into_inner()
        .find(|p| p.as_rule() == Rule::expr)
        .ok_or(Error::Empty)?;
    expr(e)
}

fn expr(pair: Pair<Rule>) -> Result<Expr> {
    let mut inner = pair.into_inner();
    let mut e = primary(inner.next().ok_or(Error::Empty)?)?;
    for member in inner {
        e = Expr::member(e, member.as_str());
    }
    Ok(e)
}

fn primary(pair: Pair<Rule>) -> Result<Expr> {
    Ok(match pair.as_rule() {
        Rule::integer_literal => Expr::IntLit(integer(pair.as_str())?),
        Rule::string_literal => Expr::StringLit(string(pair)?),
        Rule::name => Expr::var(pair.as_str()),
        Rule::expr => expr(pair)?,
        Rule::call => {
            let mut inner = pair.into_inner();
            let name = inner.next().ok_or(Error::Empty)?.as_str().to_string();
            let args = inner.map(expr).collect::<Result<Vec<_>>>()?;
            Expr::call(&name, args)
        }
        Rule::record_lit => {
            let mut fields = BTreeMap::new();
            for field in pair.into_inner() {
                let (name, e) = named(field, expr)?;
                fields.insert(name, e);
            }
            Expr::RecordLit(fields)
        }
        Rule::lambda => {
            let mut params = vec![];
            let mut ret = None;
            let mut body = None;
            for c in pair.into_inner() {
                match c.as_rule() {
                    Rule::FN => (),
                    Rule::param => params.push(named(c, type_expr)?),
                    Rule::type_expr => ret = Some(type_expr(c)?),
                    Rule::expr => body = Some(expr(c)?),
                    _ => unreachable!(),
                }
            }
            Expr::Lambda(Rc::new(LambdaDef {
                params,
                ret: ret.ok_or(Error::Empty)?,
                body: Rc::new(body.ok_or(Error::Empty)?),
            }))
        }
        Rule::do_block => {
            let mut bindings = vec![];
            let mut result = None;
            for c in pair.into_inner() {
                match c.as_rule() {
                    Rule::DO => (),
                    Rule::let_binding => {
                        let mut inner = c.into_inner().filter(|p| p.as_rule() != Rule::LET);
                        let name = inner.next().ok_or(Error::Empty)?.as_str().to_string();
                        let e = expr(inner.next().ok_or(Error::Empty)?)?;
                        bindings.push((name, e));
                    }
                    Rule::expr => result = Some(expr(c)?),
                    _ => unreachable!(),
                }
            }
            Expr::DoBlock(bindings, Box::new(result.ok_or(Error::Empty)?))
        }
        _ => unreachable!(),
    })
}

/// Converts a `name: <item>` pair such as a record field, a lambda parameter or a record
/// type field.
fn named<T>(pair: Pair<Rule>, item: fn(Pair<Rule>) -> Result<T>) -> Result<(String, T)> {
    let mut inner = pair.into_inner();
    let name = inner.next().ok_or(Error::Empty)?.as_str().to_string();
    let value = item(inner.next().ok_or(Error::Empty)?)?;
    Ok((name, value))
}

/// Converts a `type_stmt` pair.
pub fn type_stmt(pair: Pair<Rule>) -> Result<Type> {
    let t = pair
        .into_inner()
        .find(|p| p.as_rule() == Rule::type_expr)
        .ok_or(Error::Empty)?;
    type_expr(t)
}

fn type_expr(pair: Pair<Rule>) -> Result<Type> {
    let inner = pair.into_inner().next().ok_or(Error::Empty)?;
    Ok(match inner.as_rule() {
        Rule::int_type => Type::Int,
        Rule::bool_type => Type::Bool,
        Rule::string_type => Type::String,
        Rule::type_var => Type::var(inner.as_str().trim_start_matches('\'')),
        Rule::iterator_type => {
            let element = inner.into_inner().next().ok_or(Error::Empty)?;
            Type::iterator(type_expr(element)?)
        }
        Rule::index_type => {
            let mut parts = inner.into_inner();
            let key = type_expr(parts.next().ok_or(Error::Empty)?)?;
            let row = type_expr(parts.next().ok_or(Error::Empty)?)?;
            Type::index(key, row)
        }
        Rule::fn_type => {
            let mut types = inner.into_inner().map(type_expr).collect::<Result<Vec<_>>>()?;
            let ret = types.pop().ok_or(Error::Empty)?;
            Type::function(types, ret)
        }
        Rule::record_type => Type::Record(
            inner
                .into_inner()
                .map(|f| named(f, type_expr))
                .collect::<Result<_>>()?,
        ),
        _ => unreachable!(),
    })
}

#[cfg(test)]
use crate::parser::parse_statement;

#[test]
fn test_create_statement_to_ast() {
    let actual = parse_statement(
        "CREATE TABLE comments (id string PRIMARY KEY, post_id text REFERENCES posts, n integer)",
    )
    .unwrap();
    let expected = ast::CreateStatement {
        tablename: "comments".to_string(),
        coldefs: vec![
            ast::ColDef {
                name: "id".to_string(),
                coltype: SqlType::String,
                primary_key: true,
                references: None,
            },
            ast::ColDef {
                name: "post_id".to_string(),
                coltype: SqlType::String,
                primary_key: false,
                references: Some("posts".to_string()),
            },
            ast::ColDef {
                name: "n".to_string(),
                coltype: SqlType::Int,
                primary_key: false,
                references: None,
            },
        ],
    };
    assert_eq!(actual.into_create().unwrap(), expected);
}

#[test]
fn test_parsing_literals() {
    let cases = vec![
        ("1", ast::Literal::Int(1)),
        ("-7", ast::Literal::Int(-7)),
        ("\"hi\"", ast::Literal::String("hi".to_string())),
        ("\"a \\\"b\\\"\\n\"", ast::Literal::String("a \"b\"\n".to_string())),
        ("tRuE", ast::Literal::Bool(true)),
        ("FALSE", ast::Literal::Bool(false)),
    ];
    for (input, expected) in cases {
        println!("Case: {}", input);
        let u = parse_statement(&format!("DELETE FROM t WHERE a = {input}"))
            .unwrap()
            .into_delete()
            .unwrap();
        assert_eq!(u.filters[0].value, expected);
    }
}

#[test]
fn test_select_statement_to_ast() {
    use ast::{Cardinality, Filter, Literal, Query, Selection};
    let s = parse_statement(
        "LIVE MANY blog_posts WHERE id = \"0\" { title, comments: MANY comments { id, body } }",
    )
    .unwrap()
    .into_select()
    .unwrap();
    assert!(s.live);
    let expected = Query {
        cardinality: Cardinality::Many,
        table: "blog_posts".to_string(),
        filters: vec![Filter {
            column: "id".to_string(),
            value: Literal::String("0".to_string()),
        }],
        selections: vec![
            Selection::Column("title".to_string()),
            Selection::Nested {
                name: "comments".to_string(),
                query: Query {
                    cardinality: Cardinality::Many,
                    table: "comments".to_string(),
                    filters: vec![],
                    selections: vec![
                        Selection::Column("id".to_string()),
                        Selection::Column("body".to_string()),
                    ],
                },
            },
        ],
    };
    assert_eq!(s.query, expected);
    // Queries print as they are written, with keywords upper cased.
    let again = parse_statement(&s.query.to_string()).unwrap().into_select().unwrap();
    assert_eq!(again.query, expected);
    assert!(!again.live);
}

#[test]
fn test_update_statement_to_ast() {
    let u = parse_statement("update posts set title = \"x\", n = 3 where id = \"0\"")
        .unwrap()
        .into_update()
        .unwrap();
    assert_eq!(u.tablename, "posts");
    assert_eq!(
        u.assignments,
        vec![
            ("title".to_string(), ast::Literal::String("x".to_string())),
            ("n".to_string(), ast::Literal::Int(3)),
        ]
    );
    assert_eq!(u.filters.len(), 1);
}

#[test]
fn test_exprs_to_ast() {
    // Each expression prints back in the form it is written in.
    let cases = vec![
        "plus(1, times(2, 3))",
        "x.y.z",
        "{a: 1, b: \"two\"}",
        "fn(x: int, y: {a: string}): bool => intEq(x, 1)",
        "do { let x = 1; let y = x; y }",
        "f().a",
    ];
    for case in cases {
        println!("Case: {}", case);
        let e = crate::parser::parse_expr(case).unwrap();
        assert_eq!(e.to_string(), case);
    }
    let e = crate::parser::parse_expr("(do { {a: 1} }).a").unwrap();
    assert_eq!(e.to_string(), "do { {a: 1} }.a");
}

#[test]
fn test_insert_statement_to_ast() {
    let i = parse_statement("INSERT INTO posts {id: \"0\", n: plus(1, 2)};")
        .unwrap()
        .into_insert()
        .unwrap();
    assert_eq!(i.tablename, "posts");
    assert_eq!(i.row.to_string(), "{id: \"0\", n: plus(1, 2)}");
}
