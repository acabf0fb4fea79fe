//! The catalog of tables: their columns, primary keys and references between tables.
//!
//! Each table's `CREATE TABLE` text is kept in the `__schema` bucket, keyed by table name, and
//! parsed again when a database is opened.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::ast::CreateStatement;
use crate::lang::Type;
use crate::parser;
use crate::sql_type::SqlType;
use crate::storage::{self, ReadTxn};

/// The bucket holding the creation text of every table.
pub const SCHEMA_BUCKET: &str = "__schema";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("table {0} has no primary key")]
    NoPrimaryKey(String),
    #[error("table {0} has more than one primary key")]
    MultiplePrimaryKeys(String),
    #[error("table {table} declares column {column} more than once")]
    DuplicateColumn { table: String, column: String },
    #[error("table {0} already exists")]
    DuplicateTable(String),
    #[error("column {column} references unknown table {target}")]
    UnknownReference { column: String, target: String },
    #[error("column {column} has type {ty}, but the primary key of {target} has type {key_type}")]
    ReferenceType {
        column: String,
        ty: SqlType,
        target: String,
        key_type: SqlType,
    },
    #[error("{0} is a reserved name")]
    Reserved(String),
    #[error("corrupt schema entry for {table}: {reason}")]
    Corrupt { table: String, reason: String },
    #[error(transparent)]
    Storage(#[from] storage::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: SqlType,
    /// The table whose primary key this column holds.
    pub references: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
    primary_key: usize,
    create: CreateStatement,
}

impl TableSchema {
    /// checks a create statement on its own.  References to other tables are checked when
    /// the table is added to a catalog.
    pub fn from_create(c: &CreateStatement) -> Result<TableSchema> {
        if c.tablename == SCHEMA_BUCKET {
            return Err(Error::Reserved(c.tablename.clone()));
        }
        let mut columns: Vec<Column> = vec![];
        let mut primary_key = None;
        for (i, coldef) in c.coldefs.iter().enumerate() {
            if columns.iter().any(|col| col.name == coldef.name) {
                return Err(Error::DuplicateColumn {
                    table: c.tablename.clone(),
                    column: coldef.name.clone(),
                });
            }
            if coldef.primary_key {
                if primary_key.is_some() {
                    return Err(Error::MultiplePrimaryKeys(c.tablename.clone()));
                }
                primary_key = Some(i);
            }
            columns.push(Column {
                name: coldef.name.clone(),
                ty: coldef.coltype,
                references: coldef.references.clone(),
            });
        }
        let primary_key = primary_key.ok_or_else(|| Error::NoPrimaryKey(c.tablename.clone()))?;
        Ok(TableSchema {
            name: c.tablename.clone(),
            columns,
            primary_key,
            create: c.clone(),
        })
    }

    pub fn primary_key(&self) -> &Column {
        &self.columns[self.primary_key]
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The record type of the table's rows.
    pub fn row_type(&self) -> Type {
        Type::record(self.columns.iter().map(|c| (c.name.clone(), c.ty.lang_type())))
    }

    /// returns the first column holding primary keys of `table`.
    pub fn reference_to(&self, table: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.references.as_deref() == Some(table))
    }

    /// The text this table was created with.
    pub fn creation_sql(&self) -> String {
        self.create.to_string()
    }
}

/// A snapshot of every table, by name.
pub type Schema = BTreeMap<String, Arc<TableSchema>>;

/// The type of the `tables` variable queries are planned against: for each table, a record
/// holding its primary-key index.
pub fn tables_type(schema: &Schema) -> Type {
    Type::record(schema.values().map(|t| {
        let pk = t.primary_key();
        (
            t.name.clone(),
            Type::record([(pk.name.clone(), Type::index(pk.ty.lang_type(), t.row_type()))]),
        )
    }))
}

#[derive(Debug, Default)]
pub struct Catalog {
    tables: RwLock<Schema>,
}

impl Catalog {
    /// reads every table recorded in the schema bucket of `txn`.
    pub fn load(txn: &ReadTxn) -> Result<Catalog> {
        let mut tables = Schema::new();
        let Some(bucket) = txn.bucket(SCHEMA_BUCKET)? else {
            return Ok(Catalog::default());
        };
        for entry in bucket.cursor() {
            let (key, value) = entry?;
            let table = String::from_utf8_lossy(&key).into_owned();
            let corrupt = |reason: String| Error::Corrupt {
                table: table.clone(),
                reason,
            };
            let text = String::from_utf8(value).map_err(|e| corrupt(e.to_string()))?;
            let create = parser::parse_statement(&text)
                .map_err(|e| corrupt(e.to_string()))?
                .into_create()
                .map_err(|_| corrupt("not a CREATE TABLE statement".to_string()))?;
            let schema = TableSchema::from_create(&create)?;
            tables.insert(schema.name.clone(), Arc::new(schema));
        }
        tracing::debug!(tables = tables.len(), "loaded catalog");
        Ok(Catalog {
            tables: RwLock::new(tables),
        })
    }

    pub fn snapshot(&self) -> Schema {
        self.tables.read().clone()
    }

    pub fn get(&self, table: &str) -> Option<Arc<TableSchema>> {
        self.tables.read().get(table).cloned()
    }

    /// adds a table.  `persist` runs while the catalog is locked, and the table is only added
    /// if it succeeds.
    pub fn create(
        &self,
        c: &CreateStatement,
        persist: impl FnOnce(&TableSchema) -> Result<(), storage::Error>,
    ) -> Result<Arc<TableSchema>> {
        let schema = TableSchema::from_create(c)?;
        let mut tables = self.tables.write();
        if tables.contains_key(&schema.name) {
            return Err(Error::DuplicateTable(schema.name));
        }
        for column in schema.columns.iter() {
            let Some(target) = &column.references else {
                continue;
            };
            let key_type = if *target == schema.name {
                schema.primary_key().ty
            } else {
                match tables.get(target) {
                    Some(t) => t.primary_key().ty,
                    None => {
                        return Err(Error::UnknownReference {
                            column: column.name.clone(),
                            target: target.clone(),
                        })
                    }
                }
            };
            if key_type != column.ty {
                return Err(Error::ReferenceType {
                    column: column.name.clone(),
                    ty: column.ty,
                    target: target.clone(),
                    key_type,
                });
            }
        }
        persist(&schema)?;
        let schema = Arc::new(schema);
        tables.insert(schema.name.clone(), schema.clone());
        Ok(schema)
    }
}

#[cfg(test)]
fn create(text: &str) -> CreateStatement {
    parser::parse_statement(text).unwrap().into_create().unwrap()
}

#[test]
fn test_table_schema() {
    let t = TableSchema::from_create(&create(
        "CREATE TABLE comments (id string PRIMARY KEY, post_id string REFERENCES posts, n int)",
    ))
    .unwrap();
    assert_eq!(t.primary_key().name, "id");
    assert_eq!(t.reference_to("posts").unwrap().name, "post_id");
    assert!(t.reference_to("users").is_none());
    assert_eq!(t.row_type().to_string(), "{id: string, n: int, post_id: string}");
    assert_eq!(
        t.creation_sql(),
        "CREATE TABLE comments (id string PRIMARY KEY, post_id string REFERENCES posts, n int)"
    );
}

#[test]
fn test_invalid_tables() {
    struct Case {
        text: &'static str,
        check: fn(&Error) -> bool,
    }
    let cases = vec![
        Case {
            text: "CREATE TABLE t (a int)",
            check: |e| matches!(e, Error::NoPrimaryKey(_)),
        },
        Case {
            text: "CREATE TABLE t (a int PRIMARY KEY, b int PRIMARY KEY)",
            check: |e| matches!(e, Error::MultiplePrimaryKeys(_)),
        },
        Case {
            text: "CREATE TABLE t (a int PRIMARY KEY, a string)",
            check: |e| matches!(e, Error::DuplicateColumn { .. }),
        },
        Case {
            text: "CREATE TABLE __schema (a int PRIMARY KEY)",
            check: |e| matches!(e, Error::Reserved(_)),
        },
    ];
    for case in cases {
        println!("Case: {}", case.text);
        let e = TableSchema::from_create(&create(case.text)).unwrap_err();
        assert!((case.check)(&e), "unexpected error {e}");
    }
}

#[test]
fn test_catalog_create() {
    let catalog = Catalog::default();
    catalog
        .create(&create("CREATE TABLE posts (id string PRIMARY KEY)"), |_| Ok(()))
        .unwrap();
    assert!(matches!(
        catalog.create(&create("CREATE TABLE posts (id int PRIMARY KEY)"), |_| Ok(())),
        Err(Error::DuplicateTable(_))
    ));
    assert!(matches!(
        catalog.create(
            &create("CREATE TABLE c (id int PRIMARY KEY, u int REFERENCES users)"),
            |_| Ok(())
        ),
        Err(Error::UnknownReference { .. })
    ));
    assert!(matches!(
        catalog.create(
            &create("CREATE TABLE c (id int PRIMARY KEY, p int REFERENCES posts)"),
            |_| Ok(())
        ),
        Err(Error::ReferenceType { .. })
    ));
    catalog
        .create(
            &create("CREATE TABLE c (id int PRIMARY KEY, p string REFERENCES posts, parent int REFERENCES c)"),
            |_| Ok(()),
        )
        .unwrap();
    assert_eq!(catalog.snapshot().keys().collect::<Vec<_>>(), vec!["c", "posts"]);
}

#[test]
fn test_catalog_load() {
    let store = storage::Store::in_memory().unwrap();
    let catalog = Catalog::default();
    let w = store.begin_write().unwrap();
    w.create_bucket(SCHEMA_BUCKET).unwrap();
    catalog
        .create(&create("create table posts (id int primary key, title text)"), |t| {
            w.put(SCHEMA_BUCKET, t.name.as_bytes(), t.creation_sql().as_bytes())
        })
        .unwrap();
    w.commit().unwrap();
    let loaded = Catalog::load(&store.begin_read().unwrap()).unwrap();
    assert_eq!(loaded.snapshot(), catalog.snapshot());
}
