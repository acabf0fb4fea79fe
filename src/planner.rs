//! `planner` lowers a tree-shaped query into an expression of the query language.
//!
//! Each level of the query becomes `map(filter(scan(index), cond), fn(rowN) => {...})`, with
//! nested selections planned recursively inside the record the mapping builds.  The lowering is
//! fixed and syntax-directed: every table is read through its primary-key index.
//!
//! ```text
//! MANY posts { id, comments: MANY comments { body } }
//!
//! map(scan(tables.posts.id), fn(row0: {id: string}): {...} => {
//!     comments: map(
//!         filter(scan(tables.comments.id), fn(row1: {...}): bool => strEq(row1.post_id, row0.id)),
//!         fn(row1: {...}): {body: string} => {body: row1.body}),
//!     id: row0.id})
//! ```
//!
//! A live plan also wraps each scan in `listen` or `listenWhere`, whose integer argument names a
//! `SubscriptionPoint` returned alongside the plan.

use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use crate::ast::{Cardinality, Query, Selection};
use crate::lang::{self, Expr, Type, TypeScope};
use crate::live::SubscriptionPoint;
use crate::schema::{Schema, TableSchema};
use crate::sql_type::SqlType;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no such table: {0}")]
    UnknownTable(String),
    #[error("table {table} has no column {column}")]
    UnknownColumn { table: String, column: String },
    #[error("no reference for join between {outer} and {inner}")]
    NoReference { outer: String, inner: String },
    #[error("{0} is selected more than once")]
    DuplicateSelection(String),
    #[error("column {column} has type {expected}, but is compared to a {actual}")]
    FilterType {
        column: String,
        expected: Type,
        actual: Type,
    },
    #[error(transparent)]
    Type(#[from] lang::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// plans `query` against the tables of `schema`.  `types` must bind `tables`.
#[tracing::instrument(level = "debug", skip_all, fields(table = %query.table))]
pub fn plan_select(query: &Query, schema: &Schema, types: &Rc<TypeScope>) -> Result<Expr> {
    let mut planner = Planner {
        schema,
        live: false,
        points: vec![],
    };
    planner.plan(query, 0, types, None, None)
}

/// plans `query` as a live query, returning the plan and its subscription points in the
/// order their `listen` calls name them.
#[tracing::instrument(level = "debug", skip_all, fields(table = %query.table))]
pub fn plan_live_select(
    query: &Query,
    schema: &Schema,
    types: &Rc<TypeScope>,
) -> Result<(Expr, Vec<SubscriptionPoint>)> {
    let mut planner = Planner {
        schema,
        live: true,
        points: vec![],
    };
    let plan = planner.plan(query, 0, types, None, None)?;
    tracing::debug!(points = planner.points.len(), "planned live query");
    Ok((plan, planner.points))
}

/// How a nested level's rows relate to the row enclosing them.
struct Join {
    /// The inner table's column that must equal `outer`.
    column: String,
    ty: SqlType,
    outer: Expr,
}

struct Planner<'a> {
    schema: &'a Schema,
    live: bool,
    points: Vec<SubscriptionPoint>,
}

impl<'a> Planner<'a> {
    fn table(&self, name: &str) -> Result<&'a Arc<TableSchema>> {
        self.schema
            .get(name)
            .ok_or_else(|| Error::UnknownTable(name.to_string()))
    }

    fn plan(
        &mut self,
        query: &Query,
        level: usize,
        types: &Rc<TypeScope>,
        join: Option<Join>,
        selection: Option<&str>,
    ) -> Result<Expr> {
        let table = self.table(&query.table)?;
        let pk = table.primary_key();
        let row = format!("row{level}");
        let row_type = table.row_type();

        let index = Expr::member(Expr::member(Expr::var("tables"), &table.name), &pk.name);
        let mut rows = Expr::call("scan", vec![index]);

        let mut conditions = vec![];
        for f in query.filters.iter() {
            let col = column(table, &f.column)?;
            if f.value.ty() != col.ty.lang_type() {
                return Err(Error::FilterType {
                    column: col.name.clone(),
                    expected: col.ty.lang_type(),
                    actual: f.value.ty(),
                });
            }
            conditions.push(equals(col.ty, Expr::member(Expr::var(&row), &col.name), f.value.to_expr()));
        }
        if let Some(j) = &join {
            conditions.push(equals(j.ty, Expr::member(Expr::var(&row), &j.column), j.outer.clone()));
        }
        if let Some(cond) = conditions
            .into_iter()
            .reduce(|a, b| Expr::call("and", vec![a, b]))
        {
            let predicate = Expr::lambda(vec![(row.clone(), row_type.clone())], Type::Bool, cond);
            rows = Expr::call("filter", vec![rows, predicate]);
        }

        if self.live {
            rows = self.listen(rows, query, table, level, join.as_ref(), selection);
        }

        let inner_types = types.child([(row.clone(), row_type.clone())]);
        let mut fields = BTreeMap::new();
        for sel in query.selections.iter() {
            if fields.contains_key(sel.name()) {
                return Err(Error::DuplicateSelection(sel.name().to_string()));
            }
            let e = match sel {
                Selection::Column(c) => {
                    column(table, c)?;
                    Expr::member(Expr::var(&row), c)
                }
                Selection::Nested { name, query: nested } => {
                    let inner = self.table(&nested.table)?;
                    let join = join_of(table, &row, inner, nested.cardinality)?;
                    self.plan(nested, level + 1, &inner_types, Some(join), Some(name.as_str()))?
                }
            };
            fields.insert(sel.name().to_string(), e);
        }
        let body = Expr::RecordLit(fields);
        let ret = body.infer_type(&inner_types)?;
        Ok(Expr::call("map", vec![rows, Expr::lambda(vec![(row, row_type)], ret, body)]))
    }

    /// records a subscription point for this level and wraps `rows` in its `listen` call.
    fn listen(
        &mut self,
        rows: Expr,
        query: &Query,
        table: &TableSchema,
        level: usize,
        join: Option<&Join>,
        selection: Option<&str>,
    ) -> Expr {
        let point = Expr::IntLit(self.points.len() as i64);
        // A table listener can only be narrowed by one column: the join if there is one,
        // otherwise the first filter.  Re-running the sub-query applies the rest.
        let (filter_column, value) = match (join, query.filters.first()) {
            (Some(j), _) => (Some(j.column.clone()), Some(j.outer.clone())),
            (None, Some(f)) => (Some(f.column.clone()), Some(f.value.to_expr())),
            (None, None) => (None, None),
        };
        self.points.push(SubscriptionPoint {
            table: table.name.clone(),
            primary_key: table.primary_key().name.clone(),
            filter_column,
            selection: selection.map(str::to_string),
            query: Arc::new(query.clone()),
            is_root: level == 0,
        });
        match value {
            Some(v) => Expr::call("listenWhere", vec![rows, point, v]),
            None => Expr::call("listen", vec![rows, point]),
        }
    }
}

fn column<'t>(table: &'t TableSchema, name: &str) -> Result<&'t crate::schema::Column> {
    table.column(name).ok_or_else(|| Error::UnknownColumn {
        table: table.name.clone(),
        column: name.to_string(),
    })
}

fn equals(ty: SqlType, a: Expr, b: Expr) -> Expr {
    Expr::call(ty.eq_builtin(), vec![a, b])
}

/// relates the rows of `inner` to the row `outer_row` of `outer`.
///
/// MANY reads the inner rows whose reference to `outer` holds the outer primary key.  ONE reads
/// the inner row whose primary key the outer row references.
fn join_of(outer: &TableSchema, outer_row: &str, inner: &TableSchema, cardinality: Cardinality) -> Result<Join> {
    let no_reference = || Error::NoReference {
        outer: outer.name.clone(),
        inner: inner.name.clone(),
    };
    Ok(match cardinality {
        Cardinality::Many => {
            let fk = inner.reference_to(&outer.name).ok_or_else(no_reference)?;
            Join {
                column: fk.name.clone(),
                ty: fk.ty,
                outer: Expr::member(Expr::var(outer_row), &outer.primary_key().name),
            }
        }
        Cardinality::One => {
            let fk = outer.reference_to(&inner.name).ok_or_else(no_reference)?;
            let pk = inner.primary_key();
            Join {
                column: pk.name.clone(),
                ty: pk.ty,
                outer: Expr::member(Expr::var(outer_row), &fk.name),
            }
        }
    })
}

#[cfg(test)]
fn blog_schema() -> Schema {
    let catalog = crate::schema::Catalog::default();
    for text in [
        "CREATE TABLE users (id int PRIMARY KEY, name string)",
        "CREATE TABLE posts (id string PRIMARY KEY, title string, author int REFERENCES users)",
        "CREATE TABLE comments (id string PRIMARY KEY, post_id string REFERENCES posts, body string)",
    ] {
        let c = crate::parser::parse_statement(text).unwrap().into_create().unwrap();
        catalog.create(&c, |_| Ok(())).unwrap();
    }
    catalog.snapshot()
}

#[cfg(test)]
fn plan_text(text: &str, live: bool) -> Result<(Expr, Vec<SubscriptionPoint>)> {
    let schema = blog_schema();
    let types = TypeScope::root().child([("tables", crate::schema::tables_type(&schema))]);
    let query = crate::parser::parse_statement(text).unwrap().into_select().unwrap().query;
    if live {
        plan_live_select(&query, &schema, &types)
    } else {
        plan_select(&query, &schema, &types).map(|e| (e, vec![]))
    }
}

#[test]
fn test_plan_nested_many() {
    let (plan, _) = plan_text("MANY posts { id, comments: MANY comments { id, post_id } }", false).unwrap();
    let text = plan.to_string();
    println!("{text}");
    assert!(text.starts_with("map(scan(tables.posts.id), fn(row0: "));
    assert!(text.contains("filter(scan(tables.comments.id), fn(row1: {body: string, id: string, post_id: string}): bool => strEq(row1.post_id, row0.id))"));
    assert!(!text.contains("listen"));
}

#[test]
fn test_plan_nested_one() {
    let (plan, _) = plan_text("MANY posts { title, author: ONE users { name } }", false).unwrap();
    assert!(plan.to_string().contains("intEq(row1.id, row0.author)"));
}

#[test]
fn test_plan_filters() {
    let (plan, _) = plan_text("ONE posts WHERE id = \"0\" AND title = \"t\" { id }", false).unwrap();
    assert!(plan
        .to_string()
        .contains("and(strEq(row0.id, \"0\"), strEq(row0.title, \"t\"))"));
}

#[test]
fn test_plan_type() {
    let schema = blog_schema();
    let types = TypeScope::root().child([("tables", crate::schema::tables_type(&schema))]);
    let query = crate::parser::parse_statement("MANY posts { id, comments: MANY comments { body } }")
        .unwrap()
        .into_select()
        .unwrap()
        .query;
    let plan = plan_select(&query, &schema, &types).unwrap();
    assert_eq!(
        plan.infer_type(&types).unwrap().to_string(),
        "iterator<{comments: iterator<{body: string}>, id: string}>"
    );
}

#[test]
fn test_plan_live() {
    let (plan, points) = plan_text(
        "MANY posts WHERE title = \"t\" { id, comments: MANY comments { id } }",
        true,
    )
    .unwrap();
    let text = plan.to_string();
    assert!(text.starts_with("map(listenWhere(filter(scan(tables.posts.id), "));
    assert!(text.contains("strEq(row1.post_id, row0.id)), 1, row0.id)"));
    assert_eq!(points.len(), 2);
    assert!(points[0].is_root);
    assert_eq!(points[0].filter_column.as_deref(), Some("title"));
    assert_eq!(points[0].selection, None);
    assert!(!points[1].is_root);
    assert_eq!(points[1].table, "comments");
    assert_eq!(points[1].filter_column.as_deref(), Some("post_id"));
    assert_eq!(points[1].selection.as_deref(), Some("comments"));

    let (plan, points) = plan_text("MANY users { name }", true).unwrap();
    assert!(plan.to_string().starts_with("map(listen(scan(tables.users.id), 0), "));
    assert_eq!(points[0].filter_column, None);
}

#[test]
fn test_plan_errors() {
    struct Case {
        text: &'static str,
        check: fn(&Error) -> bool,
    }
    let cases = vec![
        Case {
            text: "MANY nope { id }",
            check: |e| matches!(e, Error::UnknownTable(_)),
        },
        Case {
            text: "MANY posts { nope }",
            check: |e| matches!(e, Error::UnknownColumn { .. }),
        },
        Case {
            text: "MANY posts WHERE nope = 1 { id }",
            check: |e| matches!(e, Error::UnknownColumn { .. }),
        },
        Case {
            text: "MANY posts WHERE title = 1 { id }",
            check: |e| matches!(e, Error::FilterType { .. }),
        },
        Case {
            text: "MANY users { id, comments: MANY comments { id } }",
            check: |e| matches!(e, Error::NoReference { .. }),
        },
        Case {
            text: "MANY comments { id, post: ONE users { id } }",
            check: |e| matches!(e, Error::NoReference { .. }),
        },
        Case {
            text: "MANY posts { id, id }",
            check: |e| matches!(e, Error::DuplicateSelection(_)),
        },
    ];
    for case in cases {
        println!("Case: {}", case.text);
        let e = plan_text(case.text, false).unwrap_err();
        assert!((case.check)(&e), "unexpected error {e}");
    }
}
