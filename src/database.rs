//! `database` executes statements and keeps connections' live queries up to date.
//!
//! A statement runs synchronously in the caller's thread against a read snapshot.  Writes
//! commit first and then publish a `TableEvent` to the table's actor, which notifies the
//! listeners registered by live queries.

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use anyhow::{anyhow, bail, Context};
use crossbeam::channel::{Receiver, Sender};
use serde_json::{json, Value as JsonValue};

use crate::ast::{
    Cardinality, CreateStatement, DeleteStatement, Filter, InsertStatement, Literal, Query,
    Selection, Statement, UpdateStatement,
};
use crate::config::Config;
use crate::encoding;
use crate::lang::index::index_value;
use crate::lang::inline::Inliner;
use crate::lang::{Interpreter, Scope, Type, TypeScope, VIndex, Value};
use crate::live::{
    ChannelId, ConnectionId, Listener, LiveEngine, LiveQueryInfo, Message, QueryExecution,
    QueryPath, SubqueryRunner, TableEvent,
};
use crate::parser;
use crate::planner;
use crate::schema::{self, Catalog, Schema, TableSchema, SCHEMA_BUCKET};
use crate::storage::{ReadTxn, Store};

#[derive(thiserror::Error, Debug)]
pub enum StatementError {
    #[error("no such table: {0}")]
    UnknownTable(String),
    #[error("table {table} has no column {column}")]
    UnknownColumn { table: String, column: String },
    #[error("column {column} has type {expected}, but was given a {actual}")]
    ColumnType {
        column: String,
        expected: Type,
        actual: Type,
    },
    #[error("table {table} already has a row with key {key}")]
    DuplicateKey { table: String, key: String },
    #[error("rows of {0} can only be selected for writing by their primary key")]
    KeyFilter(String),
    #[error("the primary key of {0} cannot be changed")]
    PrimaryKeyUpdate(String),
    #[error("ONE {0} matched no rows")]
    NoRows(String),
    #[error("LIVE queries must be run on a connection")]
    LiveWithoutConnection,
}

/// Where a live query's listeners deliver their messages, and where in the result they are
/// anchored.
struct LiveRun {
    execution: Arc<QueryExecution>,
    base_path: QueryPath,
    resumed: bool,
}

pub struct Database {
    store: Store,
    catalog: Catalog,
    live: LiveEngine,
    next_connection: AtomicU64,
}

impl Database {
    /// opens the database described by `config`, loading its catalog.
    pub fn open(config: Config) -> anyhow::Result<Arc<Database>> {
        let store = match &config.path {
            Some(path) => Store::open(path).with_context(|| format!("opening {}", path.display()))?,
            None => Store::in_memory().context("creating an in-memory database")?,
        };
        let catalog = Catalog::load(&store.begin_read()?).context("loading the catalog")?;
        let capacity = config.inbox_capacity;
        Ok(Arc::new_cyclic(|db: &Weak<Database>| {
            let runner: Weak<dyn SubqueryRunner> = db.clone();
            Database {
                store,
                catalog,
                live: LiveEngine::new(runner, capacity),
                next_connection: AtomicU64::new(1),
            }
        }))
    }

    pub fn connect(self: &Arc<Self>) -> Connection {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let (outbox, inbox) = crossbeam::channel::unbounded();
        tracing::debug!(connection = id, "connected");
        Connection {
            id,
            db: self.clone(),
            outbox,
            inbox,
            next_channel: 1,
        }
    }

    /// executes a statement that is not LIVE and returns its result.
    pub fn execute(&self, text: &str) -> anyhow::Result<JsonValue> {
        let statement = parser::parse_statement(text)?;
        self.run(statement, None)
    }

    /// binds `tables` to the primary-key index of every table, read through `txn`.
    pub fn to_scope(&self, txn: Arc<ReadTxn>) -> (Rc<Scope>, Rc<TypeScope>) {
        scope_for(&self.catalog.snapshot(), txn)
    }

    /// blocks until every table actor has handled the messages sent to it so far.
    pub fn sync(&self) -> anyhow::Result<()> {
        Ok(self.live.sync_all()?)
    }

    pub fn listener_count(&self, table: &str) -> usize {
        self.live.listener_count(table)
    }

    fn run(&self, statement: Statement, execution: Option<&Arc<QueryExecution>>) -> anyhow::Result<JsonValue> {
        match statement {
            Statement::Create(c) => self.create(&c),
            Statement::Insert(i) => self.insert(&i),
            Statement::Update(u) => self.update(&u),
            Statement::Delete(d) => self.delete(&d),
            Statement::Eval(e) => {
                let txn = Arc::new(self.store.begin_read()?);
                let (scope, types) = self.to_scope(txn);
                e.infer_type(&types)?;
                let mut interp = Interpreter::with_scope(scope);
                let v = interp.evaluate(&e)?;
                Ok(v.to_json(&mut interp)?)
            }
            Statement::Select(s) => {
                let live = match (s.live, execution) {
                    (false, _) => None,
                    (true, Some(execution)) => Some(LiveRun {
                        execution: execution.clone(),
                        base_path: QueryPath::root(),
                        resumed: false,
                    }),
                    (true, None) => bail!(StatementError::LiveWithoutConnection),
                };
                let rows = self.select(&s.query, live)?;
                match s.query.cardinality {
                    Cardinality::Many => Ok(rows),
                    Cardinality::One => first(rows).ok_or_else(|| StatementError::NoRows(s.query.table.clone()).into()),
                }
            }
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(table = %c.tablename))]
    fn create(&self, c: &CreateStatement) -> anyhow::Result<JsonValue> {
        let w = self.store.begin_write()?;
        let t = self.catalog.create(c, |t| {
            w.create_bucket(SCHEMA_BUCKET)?;
            w.put(SCHEMA_BUCKET, t.name.as_bytes(), t.creation_sql().as_bytes())?;
            w.create_bucket(&t.name)?;
            w.commit()
        })?;
        Ok(json!({ "created": t.name }))
    }

    fn table(&self, name: &str) -> anyhow::Result<Arc<TableSchema>> {
        self.catalog
            .get(name)
            .ok_or_else(|| StatementError::UnknownTable(name.to_string()).into())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(table = %i.tablename))]
    fn insert(&self, i: &InsertStatement) -> anyhow::Result<JsonValue> {
        let table = self.table(&i.tablename)?;
        let txn = Arc::new(self.store.begin_read()?);
        let (scope, types) = self.to_scope(txn);
        let actual = i.row.infer_type(&types)?;
        table.row_type().expect(&actual).context("the row does not match the table")?;
        let mut interp = Interpreter::with_scope(scope);
        let row = interp.evaluate(&i.row)?;
        let key = row.member(&table.primary_key().name)?;
        let literal = Literal::from_value(&key).ok_or_else(|| anyhow!("invalid primary key {key}"))?;
        let key_bytes = encoding::encode_key(&key)?;
        let bytes = encoding::encode(&row)?;

        let w = self.store.begin_write()?;
        if w.get(&table.name, &key_bytes)?.is_some() {
            w.rollback()?;
            bail!(StatementError::DuplicateKey {
                table: table.name.clone(),
                key: literal.to_string(),
            });
        }
        w.put(&table.name, &key_bytes, &bytes)?;
        w.commit()?;
        tracing::debug!(key = %literal, "inserted");
        self.live.publish(TableEvent {
            table: table.name.clone(),
            key: literal.clone(),
            old: None,
            new: Some(bytes),
        })?;
        Ok(json!({ "inserted": literal_json(&literal) }))
    }

    /// returns the key selected by `filters`, which must be exactly an equality on the primary
    /// key.
    fn key_filter(table: &TableSchema, filters: &[Filter]) -> anyhow::Result<Literal> {
        match filters {
            [f] if f.column == table.primary_key().name => {
                let expected = table.primary_key().ty.lang_type();
                if f.value.ty() != expected {
                    bail!(StatementError::ColumnType {
                        column: f.column.clone(),
                        expected,
                        actual: f.value.ty(),
                    });
                }
                Ok(f.value.clone())
            }
            _ => bail!(StatementError::KeyFilter(table.name.clone())),
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(table = %u.tablename))]
    fn update(&self, u: &UpdateStatement) -> anyhow::Result<JsonValue> {
        let table = self.table(&u.tablename)?;
        let key = Self::key_filter(&table, &u.filters)?;
        for (column, value) in u.assignments.iter() {
            let c = table.column(column).ok_or_else(|| StatementError::UnknownColumn {
                table: table.name.clone(),
                column: column.clone(),
            })?;
            if c.name == table.primary_key().name {
                bail!(StatementError::PrimaryKeyUpdate(table.name.clone()));
            }
            if value.ty() != c.ty.lang_type() {
                bail!(StatementError::ColumnType {
                    column: column.clone(),
                    expected: c.ty.lang_type(),
                    actual: value.ty(),
                });
            }
        }
        let key_bytes = encoding::encode_key(&key.to_value())?;

        let w = self.store.begin_write()?;
        let Some(old) = w.get(&table.name, &key_bytes)? else {
            w.rollback()?;
            return Ok(json!({ "updated": 0 }));
        };
        let record = encoding::decode(&old)?
            .into_record()
            .map_err(|v| anyhow!("row {key} of {} is not a record: {v}", table.name))?;
        let mut fields = (*record).clone();
        for (column, value) in u.assignments.iter() {
            fields.insert(column.clone(), value.to_value());
        }
        let new = encoding::encode(&Value::Record(Rc::new(fields)))?;
        w.put(&table.name, &key_bytes, &new)?;
        w.commit()?;
        tracing::debug!(key = %key, "updated");
        self.live.publish(TableEvent {
            table: table.name.clone(),
            key,
            old: Some(old),
            new: Some(new),
        })?;
        Ok(json!({ "updated": 1 }))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(table = %d.tablename))]
    fn delete(&self, d: &DeleteStatement) -> anyhow::Result<JsonValue> {
        let table = self.table(&d.tablename)?;
        let key = Self::key_filter(&table, &d.filters)?;
        let w = self.store.begin_write()?;
        let old = w.delete(&table.name, &encoding::encode_key(&key.to_value())?)?;
        w.commit()?;
        let Some(old) = old else {
            return Ok(json!({ "deleted": 0 }));
        };
        self.live.publish(TableEvent {
            table: table.name.clone(),
            key,
            old: Some(old),
            new: None,
        })?;
        Ok(json!({ "deleted": 1 }))
    }

    /// plans, checks and evaluates `query`, returning an array of rows.
    #[tracing::instrument(level = "debug", skip_all, fields(query = %query, live = live.is_some()))]
    fn select(&self, query: &Query, live: Option<LiveRun>) -> anyhow::Result<JsonValue> {
        let schema = self.catalog.snapshot();
        let txn = Arc::new(self.store.begin_read()?);
        let (scope, types) = scope_for(&schema, txn);
        let (plan, points) = match live {
            Some(_) => planner::plan_live_select(query, &schema, &types)?,
            None => (planner::plan_select(query, &schema, &types)?, vec![]),
        };
        plan.infer_type(&types).context("checking the query plan")?;
        let plan = Inliner::new(&scope).inline(&plan);
        let mut interp = Interpreter::with_scope(scope);
        if let Some(run) = live {
            interp.set_live(LiveQueryInfo {
                execution: run.execution,
                engine: self.live.clone(),
                points,
                base_path: run.base_path,
                resumed: run.resumed,
            });
        }
        let rows = interp.evaluate(&plan)?.to_json(&mut interp)?;
        Ok(shape(rows, query))
    }
}

impl SubqueryRunner for Database {
    fn rerun(&self, listener: &Listener, key: &Literal) {
        let Some(query) = &listener.subquery else {
            return;
        };
        let result = self.table(&query.table).and_then(|table| {
            let narrowed = query.narrowed_to(&table.primary_key().name, key.clone());
            self.select(
                &narrowed,
                Some(LiveRun {
                    execution: listener.execution.clone(),
                    base_path: listener.path.clone(),
                    resumed: true,
                }),
            )
        });
        let path = listener.path.flatten();
        match result {
            Ok(JsonValue::Array(rows)) => {
                for data in rows {
                    listener.execution.send(Message::TableUpdate {
                        channel: listener.channel(),
                        path: path.clone(),
                        data,
                    });
                }
            }
            Ok(data) => listener.execution.send(Message::TableUpdate {
                channel: listener.channel(),
                path,
                data,
            }),
            Err(e) => {
                tracing::warn!(table = query.table, key = %key, "sub-query failed: {e:#}");
                listener.execution.send(Message::Error {
                    channel: listener.channel(),
                    message: format!("{e:#}"),
                });
            }
        }
    }
}

fn scope_for(schema: &Schema, txn: Arc<ReadTxn>) -> (Rc<Scope>, Rc<TypeScope>) {
    let tables = Value::record(schema.values().map(|t| {
        let pk = t.primary_key();
        let index = VIndex::new(&t.name, &pk.name, pk.ty.lang_type(), t.row_type(), txn.clone());
        (t.name.clone(), Value::record([(pk.name.clone(), index_value(index))]))
    }));
    (
        Scope::root().child([("tables", tables)]),
        TypeScope::root().child([("tables", schema::tables_type(schema))]),
    )
}

fn literal_json(l: &Literal) -> JsonValue {
    match l {
        Literal::Int(i) => json!(i),
        Literal::String(s) => json!(s),
        Literal::Bool(b) => json!(b),
    }
}

fn first(rows: JsonValue) -> Option<JsonValue> {
    match rows {
        JsonValue::Array(rows) => rows.into_iter().next(),
        _ => None,
    }
}

/// replaces the array each nested ONE selection produces with its only row, or null.
fn shape(rows: JsonValue, query: &Query) -> JsonValue {
    let JsonValue::Array(rows) = rows else {
        return rows;
    };
    JsonValue::Array(
        rows.into_iter()
            .map(|mut row| {
                for sel in query.selections.iter() {
                    let Selection::Nested { name, query: nested } = sel else {
                        continue;
                    };
                    if let Some(field) = row.get_mut(name) {
                        let inner = shape(field.take(), nested);
                        *field = match nested.cardinality {
                            Cardinality::Many => inner,
                            Cardinality::One => first(inner).unwrap_or(JsonValue::Null),
                        };
                    }
                }
                row
            })
            .collect(),
    )
}

/// A client session.  Each statement executed gets its own channel, and every message about it
/// carries the channel id.  Dropping the connection removes all of its listeners.
pub struct Connection {
    id: ConnectionId,
    db: Arc<Database>,
    outbox: Sender<Message>,
    inbox: Receiver<Message>,
    next_channel: ChannelId,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// runs a statement.  Its result, or its error, arrives on `messages()`, followed by updates
    /// if it is a LIVE query.
    pub fn execute(&mut self, text: &str) -> ChannelId {
        let channel = self.next_channel;
        self.next_channel += 1;
        let execution = Arc::new(QueryExecution::new(self.id, channel, self.outbox.clone()));
        tracing::debug!(connection = self.id, channel, statement = text, "execute");
        let result = parser::parse_statement(text)
            .map_err(anyhow::Error::from)
            .and_then(|statement| self.db.run(statement, Some(&execution)));
        let message = match result {
            Ok(data) => Message::Result { channel, data },
            Err(e) => {
                self.db.live.remove_channel(self.id, channel);
                Message::Error {
                    channel,
                    message: format!("{e:#}"),
                }
            }
        };
        execution.send(message);
        channel
    }

    pub fn messages(&self) -> &Receiver<Message> {
        &self.inbox
    }

    /// stops the updates of a LIVE query.
    pub fn close_channel(&self, channel: ChannelId) {
        self.db.live.remove_channel(self.id, channel);
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        tracing::debug!(connection = self.id, "disconnected");
        self.db.live.remove_connection(self.id);
    }
}

#[cfg(test)]
fn test_db() -> Arc<Database> {
    let db = Database::open(Config::default()).unwrap();
    // posts references users, which must exist first.
    let posts = "CREATE TABLE posts (id string PRIMARY KEY, title string, views int, author int REFERENCES users)";
    assert!(db.execute(posts).is_err());
    db.execute("CREATE TABLE users (id int PRIMARY KEY, name string)").unwrap();
    db.execute(posts).unwrap();
    db
}

#[test]
fn test_insert_and_select() {
    let db = test_db();
    db.execute("INSERT INTO users {id: 7, name: \"ann\"}").unwrap();
    db.execute("INSERT INTO posts {id: \"a\", title: \"first\", views: plus(1, 2), author: 7}")
        .unwrap();
    assert_eq!(
        db.execute("MANY posts { title, views, author: ONE users { name } }").unwrap(),
        json!([{ "title": "first", "views": 3, "author": { "name": "ann" } }])
    );
    assert_eq!(
        db.execute("ONE users WHERE id = 7 { name }").unwrap(),
        json!({ "name": "ann" })
    );
    assert!(db.execute("ONE users WHERE id = 8 { name }").is_err());
}

#[test]
fn test_write_errors() {
    let db = test_db();
    db.execute("INSERT INTO users {id: 1, name: \"a\"}").unwrap();
    let cases = vec![
        "INSERT INTO users {id: 1, name: \"b\"}",
        "INSERT INTO users {id: 2}",
        "INSERT INTO users {id: \"2\", name: \"b\"}",
        "INSERT INTO nope {id: 2}",
        "UPDATE users SET id = 3 WHERE id = 1",
        "UPDATE users SET name = 3 WHERE id = 1",
        "UPDATE users SET name = \"x\" WHERE name = \"a\"",
        "DELETE FROM users WHERE id = \"1\"",
        "LIVE MANY users { id }",
        "EVAL plus(1, \"2\")",
    ];
    for case in cases {
        println!("Case: {}", case);
        let e = db.execute(case).unwrap_err();
        println!("  {e:#}");
    }
}

#[test]
fn test_update_and_delete() {
    let db = test_db();
    db.execute("INSERT INTO users {id: 1, name: \"a\"}").unwrap();
    assert_eq!(
        db.execute("UPDATE users SET name = \"b\" WHERE id = 1").unwrap(),
        json!({ "updated": 1 })
    );
    assert_eq!(
        db.execute("UPDATE users SET name = \"b\" WHERE id = 2").unwrap(),
        json!({ "updated": 0 })
    );
    assert_eq!(db.execute("MANY users { name }").unwrap(), json!([{ "name": "b" }]));
    assert_eq!(db.execute("DELETE FROM users WHERE id = 1").unwrap(), json!({ "deleted": 1 }));
    assert_eq!(db.execute("DELETE FROM users WHERE id = 1").unwrap(), json!({ "deleted": 0 }));
    assert_eq!(db.execute("MANY users { name }").unwrap(), json!([]));
}

#[test]
fn test_eval_reads_tables() {
    let db = test_db();
    db.execute("INSERT INTO users {id: 1, name: \"a\"}").unwrap();
    assert_eq!(db.execute("EVAL get(tables.users.id, 1).name").unwrap(), json!("a"));
    assert_eq!(
        db.execute("EVAL map(scan(tables.users.id), fn(u: {id: int, name: string}): int => u.id)")
            .unwrap(),
        json!([1])
    );
    assert!(db.execute("EVAL tables").is_err());
}

#[test]
fn test_connection_reports_errors_on_channel() {
    let db = test_db();
    let mut conn = db.connect();
    let bad = conn.execute("MANY posts {");
    let good = conn.execute("MANY users { id }");
    let m = conn.messages().recv().unwrap();
    assert!(matches!(m, Message::Error { channel, .. } if channel == bad));
    assert_eq!(
        conn.messages().recv().unwrap(),
        Message::Result {
            channel: good,
            data: json!([])
        }
    );
}
