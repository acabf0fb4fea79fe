//! `storage` wraps `redb` as a transactional, ordered store of named buckets.
//!
//! A bucket is a redb table mapping byte keys to byte values.  Readers see a consistent
//! snapshot for the life of their `ReadTxn`.  A writer's changes become visible to new
//! readers when it commits.

use std::collections::VecDeque;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use redb::{ReadableTable, TableDefinition};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Storage error: {0}")]
    Redb(#[from] redb::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

type Bytes = &'static [u8];

fn definition(name: &str) -> TableDefinition<'_, Bytes, Bytes> {
    TableDefinition::new(name)
}

/// Rows read from a cursor per range scan.
const CURSOR_BATCH: usize = 64;

#[derive(Clone)]
pub struct Store {
    db: Arc<redb::Database>,
}

impl Store {
    /// opens the database file at `path`, creating it if it does not exist.
    #[tracing::instrument(level = "debug")]
    pub fn open(path: &Path) -> Result<Store> {
        let db = redb::Database::create(path).map_err(redb::Error::from)?;
        Ok(Store { db: Arc::new(db) })
    }

    /// creates an empty database that lives only as long as this `Store`.
    pub fn in_memory() -> Result<Store> {
        let db = redb::Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(redb::Error::from)?;
        Ok(Store { db: Arc::new(db) })
    }

    pub fn begin_read(&self) -> Result<ReadTxn> {
        let txn = self.db.begin_read().map_err(redb::Error::from)?;
        Ok(ReadTxn { txn })
    }

    pub fn begin_write(&self) -> Result<WriteTxn> {
        let txn = self.db.begin_write().map_err(redb::Error::from)?;
        Ok(WriteTxn { txn })
    }
}

pub struct ReadTxn {
    txn: redb::ReadTransaction,
}

impl ReadTxn {
    /// returns the bucket called `name`, or None if no writer has created it.
    pub fn bucket(&self, name: &str) -> Result<Option<Bucket>> {
        match self.txn.open_table(definition(name)) {
            Ok(table) => Ok(Some(Bucket {
                table: Arc::new(table),
            })),
            Err(redb::TableError::TableDoesNotExist(_)) => Ok(None),
            Err(e) => Err(redb::Error::from(e).into()),
        }
    }
}

#[derive(Clone)]
pub struct Bucket {
    table: Arc<redb::ReadOnlyTable<Bytes, Bytes>>,
}

impl Bucket {
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let v = self.table.get(key).map_err(redb::Error::from)?;
        Ok(v.map(|v| v.value().to_vec()))
    }

    /// iterates over the bucket's entries in key order.
    pub fn cursor(&self) -> Cursor {
        Cursor {
            table: Some(self.table.clone()),
            last: None,
            batch: VecDeque::new(),
        }
    }
}

/// An ordered forward cursor.
///
/// Entries are read in small batches, resuming after the last key returned, so that no
/// redb range borrow outlives a call to `next`.
pub struct Cursor {
    table: Option<Arc<redb::ReadOnlyTable<Bytes, Bytes>>>,
    last: Option<Vec<u8>>,
    batch: VecDeque<(Vec<u8>, Vec<u8>)>,
}

impl Cursor {
    fn fill(&mut self) -> Result<()> {
        let Some(table) = &self.table else {
            return Ok(());
        };
        let lower = match &self.last {
            Some(k) => Bound::Excluded(k.as_slice()),
            None => Bound::Unbounded,
        };
        let range = table
            .range::<&[u8]>((lower, Bound::Unbounded))
            .map_err(redb::Error::from)?;
        for entry in range.take(CURSOR_BATCH) {
            let (k, v) = entry.map_err(redb::Error::from)?;
            self.batch.push_back((k.value().to_vec(), v.value().to_vec()));
        }
        if self.batch.len() < CURSOR_BATCH {
            // The table is exhausted.
            self.table = None;
        }
        Ok(())
    }

    /// drops the cursor's hold on the table.
    pub fn close(&mut self) {
        self.table = None;
        self.batch.clear();
    }
}

impl Iterator for Cursor {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.batch.is_empty() {
            if let Err(e) = self.fill() {
                self.close();
                return Some(Err(e));
            }
        }
        let (k, v) = self.batch.pop_front()?;
        self.last = Some(k.clone());
        Some(Ok((k, v)))
    }
}

pub struct WriteTxn {
    txn: redb::WriteTransaction,
}

impl WriteTxn {
    pub fn create_bucket(&self, name: &str) -> Result<()> {
        self.txn.open_table(definition(name)).map_err(redb::Error::from)?;
        Ok(())
    }

    pub fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let table = self.txn.open_table(definition(bucket)).map_err(redb::Error::from)?;
        let v = table.get(key).map_err(redb::Error::from)?;
        Ok(v.map(|v| v.value().to_vec()))
    }

    pub fn put(&self, bucket: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let mut table = self.txn.open_table(definition(bucket)).map_err(redb::Error::from)?;
        table.insert(key, value).map_err(redb::Error::from)?;
        Ok(())
    }

    /// removes `key`, returning its previous value.
    pub fn delete(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut table = self.txn.open_table(definition(bucket)).map_err(redb::Error::from)?;
        let old = table.remove(key).map_err(redb::Error::from)?;
        Ok(old.map(|v| v.value().to_vec()))
    }

    pub fn commit(self) -> Result<()> {
        self.txn.commit().map_err(redb::Error::from)?;
        Ok(())
    }

    pub fn rollback(self) -> Result<()> {
        self.txn.abort().map_err(redb::Error::from)?;
        Ok(())
    }
}

#[test]
fn test_put_get_commit() {
    let store = Store::in_memory().unwrap();
    let w = store.begin_write().unwrap();
    w.create_bucket("t").unwrap();
    w.put("t", b"k", b"v").unwrap();
    assert_eq!(w.get("t", b"k").unwrap(), Some(b"v".to_vec()));
    w.commit().unwrap();

    let r = store.begin_read().unwrap();
    let bucket = r.bucket("t").unwrap().unwrap();
    assert_eq!(bucket.get(b"k").unwrap(), Some(b"v".to_vec()));
    assert_eq!(bucket.get(b"missing").unwrap(), None);
    assert!(r.bucket("nope").unwrap().is_none());
}

#[test]
fn test_rollback_discards_writes() {
    let store = Store::in_memory().unwrap();
    let w = store.begin_write().unwrap();
    w.create_bucket("t").unwrap();
    w.commit().unwrap();
    let w = store.begin_write().unwrap();
    w.put("t", b"k", b"v").unwrap();
    w.rollback().unwrap();
    let r = store.begin_read().unwrap();
    assert_eq!(r.bucket("t").unwrap().unwrap().get(b"k").unwrap(), None);
}

#[test]
fn test_cursor_spans_batches_in_key_order() {
    let store = Store::in_memory().unwrap();
    let w = store.begin_write().unwrap();
    let n = CURSOR_BATCH * 2 + 3;
    for i in (0..n).rev() {
        w.put("t", &(i as u32).to_be_bytes(), b"x").unwrap();
    }
    w.commit().unwrap();
    let r = store.begin_read().unwrap();
    let keys: Vec<Vec<u8>> = r
        .bucket("t")
        .unwrap()
        .unwrap()
        .cursor()
        .map(|e| e.unwrap().0)
        .collect();
    let expected: Vec<Vec<u8>> = (0..n).map(|i| (i as u32).to_be_bytes().to_vec()).collect();
    assert_eq!(keys, expected);
}

#[test]
fn test_reader_sees_snapshot() {
    let store = Store::in_memory().unwrap();
    let w = store.begin_write().unwrap();
    w.put("t", b"a", b"1").unwrap();
    w.commit().unwrap();
    let r = store.begin_read().unwrap();
    let w = store.begin_write().unwrap();
    w.put("t", b"b", b"2").unwrap();
    w.commit().unwrap();
    assert_eq!(r.bucket("t").unwrap().unwrap().cursor().count(), 1);
}
