use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ast::Query;

use super::{ChannelId, ConnectionId, QueryExecution, QueryPath};

/// A registration tying a live query, or one row of its result, to future writes.
#[derive(Debug, Clone)]
pub struct Listener {
    pub execution: Arc<QueryExecution>,
    /// Re-run when the listener fires.  None for record listeners.
    pub subquery: Option<Arc<Query>>,
    pub path: QueryPath,
}

impl Listener {
    pub fn connection(&self) -> ConnectionId {
        self.execution.connection
    }

    pub fn channel(&self) -> ChannelId {
        self.execution.channel
    }
}

/// Listeners grouped by connection, then by channel, in registration order.
#[derive(Debug, Default)]
pub struct ListenerList {
    by_connection: BTreeMap<ConnectionId, BTreeMap<ChannelId, Vec<Listener>>>,
}

impl ListenerList {
    pub fn add(&mut self, listener: Listener) {
        self.by_connection
            .entry(listener.connection())
            .or_default()
            .entry(listener.channel())
            .or_default()
            .push(listener);
    }

    pub fn remove_connection(&mut self, connection: ConnectionId) {
        self.by_connection.remove(&connection);
    }

    pub fn remove_channel(&mut self, connection: ConnectionId, channel: ChannelId) {
        if let Some(channels) = self.by_connection.get_mut(&connection) {
            channels.remove(&channel);
            if channels.is_empty() {
                self.by_connection.remove(&connection);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Listener> {
        self.by_connection.values().flat_map(|c| c.values()).flatten()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.by_connection.is_empty()
    }
}

/// Every listener registered on one table.
#[derive(Debug, Default)]
pub struct TableListeners {
    pub whole_table: ListenerList,
    /// column name -> encoded column value -> listeners
    pub by_column: BTreeMap<String, BTreeMap<Vec<u8>, ListenerList>>,
    /// encoded primary key -> listeners
    pub by_record: BTreeMap<Vec<u8>, ListenerList>,
}

impl TableListeners {
    fn sweep(&mut self, f: impl Fn(&mut ListenerList)) {
        f(&mut self.whole_table);
        for values in self.by_column.values_mut() {
            values.values_mut().for_each(&f);
            values.retain(|_, l| !l.is_empty());
        }
        self.by_column.retain(|_, v| !v.is_empty());
        self.by_record.values_mut().for_each(&f);
        self.by_record.retain(|_, l| !l.is_empty());
    }

    pub fn remove_connection(&mut self, connection: ConnectionId) {
        self.sweep(|l| l.remove_connection(connection));
    }

    pub fn remove_channel(&mut self, connection: ConnectionId, channel: ChannelId) {
        self.sweep(|l| l.remove_channel(connection, channel));
    }

    pub fn len(&self) -> usize {
        self.whole_table.len()
            + self
                .by_column
                .values()
                .flat_map(|v| v.values())
                .map(ListenerList::len)
                .sum::<usize>()
            + self.by_record.values().map(ListenerList::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.whole_table.is_empty()
            && self
                .by_column
                .values()
                .flat_map(|v| v.values())
                .all(ListenerList::is_empty)
            && self.by_record.values().all(ListenerList::is_empty)
    }
}

#[cfg(test)]
fn listener(connection: ConnectionId, channel: ChannelId) -> Listener {
    let (tx, _) = crossbeam::channel::unbounded();
    Listener {
        execution: Arc::new(QueryExecution::new(connection, channel, tx)),
        subquery: None,
        path: QueryPath::root(),
    }
}

#[test]
fn test_listener_list_removal() {
    let mut list = ListenerList::default();
    list.add(listener(1, 1));
    list.add(listener(1, 1));
    list.add(listener(1, 2));
    list.add(listener(2, 1));
    assert_eq!(list.len(), 4);
    list.remove_channel(1, 1);
    assert_eq!(list.len(), 2);
    list.remove_connection(2);
    assert_eq!(list.len(), 1);
    list.remove_channel(1, 2);
    assert!(list.is_empty());
}

#[test]
fn test_table_listeners_sweep() {
    let mut t = TableListeners::default();
    t.whole_table.add(listener(1, 1));
    t.by_column
        .entry("post_id".to_string())
        .or_default()
        .entry(b"0".to_vec())
        .or_default()
        .add(listener(1, 2));
    t.by_record.entry(b"0".to_vec()).or_default().add(listener(2, 1));
    assert_eq!(t.len(), 3);
    t.remove_connection(1);
    assert_eq!(t.len(), 1);
    assert!(t.by_column.is_empty());
    t.remove_channel(2, 1);
    assert!(t.is_empty());
    assert!(t.by_record.is_empty());
}

#[test]
fn test_table_listeners_is_empty() {
    let mut t = TableListeners::default();
    assert!(t.is_empty());
    // Lists emptied without a sweep still count as empty.
    t.by_record.entry(b"1".to_vec()).or_default();
    t.by_column.entry("title".to_string()).or_default().entry(b"x".to_vec()).or_default();
    assert!(t.is_empty());
    t.by_column
        .entry("title".to_string())
        .or_default()
        .entry(b"y".to_vec())
        .or_default()
        .add(listener(3, 1));
    assert!(!t.is_empty());
    t.remove_channel(3, 1);
    assert!(t.is_empty());
    t.by_record.entry(b"2".to_vec()).or_default().add(listener(4, 1));
    assert!(!t.is_empty());
    t.remove_connection(4);
    assert!(t.is_empty());
}
