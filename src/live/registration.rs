//! The implementation of the `listen` and `listenWhere` built-ins.

use std::rc::Rc;

use crate::encoding;
use crate::lang::{self, Error, Interpreter, IteratorRef, VIterator, Value};

use super::{Listener, LiveQueryInfo, QueryPath, RecordSubscription, SubscriptionPoint, TableSubscription};

/// registers the listeners of subscription point `point` and wraps `rows` so that every row
/// produced gets a record listener.
///
/// Outside a live query, returns `rows` unchanged.
pub fn listen(caller: &mut Interpreter, rows: Value, point: i64, value: Option<Value>) -> lang::Result<Value> {
    let Some(info) = caller.live_info() else {
        return Ok(rows);
    };
    let index = usize::try_from(point).map_err(|_| Error::UnknownSubscriptionPoint(point))?;
    let sp = info
        .points
        .get(index)
        .ok_or(Error::UnknownSubscriptionPoint(point))?;
    let path = match (&sp.selection, sp.is_root) {
        (Some(name), false) => caller.current_path().selection(name),
        _ => info.base_path.clone(),
    };
    if sp.is_root && info.resumed {
        tracing::trace!(table = sp.table, "resuming under an existing table listener");
    } else {
        let filter = match (&sp.filter_column, value) {
            (Some(column), Some(v)) => Some((column.clone(), encoding::encode_key(&v)?)),
            _ => None,
        };
        info.engine.subscribe_table(
            &sp.table,
            TableSubscription {
                filter,
                listener: Listener {
                    execution: info.execution.clone(),
                    subquery: Some(sp.query.clone()),
                    path: path.clone(),
                },
            },
        )?;
    }
    let inner = rows.into_rows()?;
    let element_type = inner.element_type().clone();
    let it = ListenIterator {
        inner,
        point: sp.clone(),
        info: info.clone(),
        base: path,
    };
    Ok(Value::Iterator(IteratorRef::new(it, element_type)))
}

/// Passes rows through, registering a record listener for each one and anchoring the
/// mapping of the row at its path.
struct ListenIterator {
    inner: IteratorRef,
    point: SubscriptionPoint,
    info: Rc<LiveQueryInfo>,
    base: QueryPath,
}

impl VIterator for ListenIterator {
    fn next(&mut self, caller: &mut Interpreter) -> lang::Result<Option<Value>> {
        let Some(row) = self.inner.next(caller)? else {
            return Ok(None);
        };
        let key = row.member(&self.point.primary_key)?;
        let path = self.base.row(key.to_json(caller)?);
        self.info.engine.subscribe_record(
            &self.point.table,
            RecordSubscription {
                key: encoding::encode_key(&key)?,
                listener: Listener {
                    execution: self.info.execution.clone(),
                    subquery: None,
                    path: path.clone(),
                },
            },
        )?;
        caller.set_row_path(path);
        Ok(Some(row))
    }

    fn close(&mut self) {
        self.inner.close()
    }
}
