use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::encoding;
use crate::storage::{Cursor, ReadTxn};

use super::iterator::{IteratorRef, VIterator};
use super::{Error, Interpreter, Result, Type, Value};

/// A typed handle over the rows of `table`, ordered by `column`.
///
/// Only primary-key indexes exist, so the rows are the table's bucket read in key order.
pub struct VIndex {
    pub table: String,
    pub column: String,
    pub key_type: Type,
    pub row_type: Type,
    txn: Arc<ReadTxn>,
}

impl VIndex {
    pub fn new(table: &str, column: &str, key_type: Type, row_type: Type, txn: Arc<ReadTxn>) -> Self {
        VIndex {
            table: table.to_string(),
            column: column.to_string(),
            key_type,
            row_type,
            txn,
        }
    }

    pub fn ty(&self) -> Type {
        Type::index(self.key_type.clone(), self.row_type.clone())
    }

    /// returns every row in key order.
    pub fn scan(&self) -> Result<IteratorRef> {
        let cursor = self.txn.bucket(&self.table)?.map(|b| b.cursor());
        Ok(IteratorRef::new(
            StorageIterator { cursor },
            self.row_type.clone(),
        ))
    }

    pub fn get(&self, key: &Value) -> Result<Value> {
        let not_found = || Error::RowNotFound {
            table: self.table.clone(),
            key: key.to_string(),
        };
        let bucket = self.txn.bucket(&self.table)?.ok_or_else(not_found)?;
        let bytes = bucket.get(&encoding::encode_key(key)?)?.ok_or_else(not_found)?;
        Ok(encoding::decode(&bytes)?)
    }
}

impl fmt::Debug for VIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VIndex")
            .field("table", &self.table)
            .field("column", &self.column)
            .field("ty", &self.ty())
            .finish()
    }
}

/// Decodes rows from a storage cursor.  A table with no bucket yet is empty.
struct StorageIterator {
    cursor: Option<Cursor>,
}

impl VIterator for StorageIterator {
    fn next(&mut self, _: &mut Interpreter) -> Result<Option<Value>> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };
        match cursor.next() {
            Some(entry) => {
                let (_, bytes) = entry?;
                Ok(Some(encoding::decode(&bytes)?))
            }
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close();
        }
    }
}

/// Wraps an index as a value.
pub fn index_value(index: VIndex) -> Value {
    Value::Index(Rc::new(index))
}

#[cfg(test)]
fn test_index(rows: &[i64]) -> (crate::storage::Store, VIndex) {
    use crate::storage::Store;
    let store = Store::in_memory().unwrap();
    let w = store.begin_write().unwrap();
    w.create_bucket("t").unwrap();
    for id in rows {
        let row = Value::record([("id", Value::Int(*id)), ("n", Value::Int(id * 10))]);
        w.put("t", &encoding::encode_key(&Value::Int(*id)).unwrap(), &encoding::encode(&row).unwrap())
            .unwrap();
    }
    w.commit().unwrap();
    let txn = Arc::new(store.begin_read().unwrap());
    let row_type = Type::record([("id", Type::Int), ("n", Type::Int)]);
    (store, VIndex::new("t", "id", Type::Int, row_type, txn))
}

#[test]
fn test_scan_in_key_order() {
    let (_store, idx) = test_index(&[3, -1, 2]);
    let mut interp = Interpreter::new();
    let ids: Vec<Value> = idx
        .scan()
        .unwrap()
        .collect(&mut interp)
        .unwrap()
        .iter()
        .map(|row| row.member("id").unwrap())
        .collect();
    assert_eq!(ids, vec![Value::Int(-1), Value::Int(2), Value::Int(3)]);
}

#[test]
fn test_get() {
    let (_store, idx) = test_index(&[1, 2]);
    assert_eq!(idx.get(&Value::Int(2)).unwrap().member("n").unwrap(), Value::Int(20));
    assert!(matches!(idx.get(&Value::Int(5)), Err(Error::RowNotFound { .. })));
}
