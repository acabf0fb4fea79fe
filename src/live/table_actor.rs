use std::sync::{Arc, Weak};

use crossbeam::channel::{Receiver, Sender};
use parking_lot::RwLock;
use serde_json::Value as JsonValue;

use crate::ast::Literal;
use crate::encoding;
use crate::lang::{Interpreter, Value};

use super::{
    ChannelId, ConnectionId, Error, Listener, Message, RecordSubscription, Result, SubqueryRunner,
    TableEvent, TableListeners, TableSubscription,
};

pub(crate) enum TableMessage {
    Subscribe(TableSubscription),
    SubscribeRecord(RecordSubscription),
    Event(TableEvent),
    RemoveConnection(ConnectionId),
    RemoveChannel(ConnectionId, ChannelId),
    /// Answered once every earlier message has been handled.
    Barrier(Sender<()>),
}

/// The engine's handle to a running actor.  The actor stops when its inbox is dropped.
pub(crate) struct TableActor {
    pub inbox: Sender<TableMessage>,
    pub listeners: Arc<RwLock<TableListeners>>,
}

impl TableActor {
    pub fn spawn(table: &str, capacity: usize, runner: Weak<dyn SubqueryRunner>) -> Result<TableActor> {
        let (inbox, rx) = crossbeam::channel::bounded(capacity);
        let listeners = Arc::new(RwLock::new(TableListeners::default()));
        let worker = Worker {
            table: table.to_string(),
            inbox: rx,
            listeners: listeners.clone(),
            runner,
        };
        std::thread::Builder::new()
            .name(format!("table-actor-{table}"))
            .spawn(move || worker.run())
            .map_err(|source| Error::Spawn {
                table: table.to_string(),
                source,
            })?;
        Ok(TableActor { inbox, listeners })
    }
}

struct Worker {
    table: String,
    inbox: Receiver<TableMessage>,
    listeners: Arc<RwLock<TableListeners>>,
    runner: Weak<dyn SubqueryRunner>,
}

impl Worker {
    fn run(self) {
        tracing::debug!(table = self.table, "table actor started");
        for message in self.inbox.iter() {
            self.handle(message);
        }
        tracing::debug!(table = self.table, "table actor stopped");
    }

    fn handle(&self, message: TableMessage) {
        match message {
            TableMessage::Subscribe(sub) => {
                tracing::trace!(table = self.table, filter = ?sub.filter.as_ref().map(|f| &f.0), "table listener added");
                let mut listeners = self.listeners.write();
                match sub.filter {
                    None => listeners.whole_table.add(sub.listener),
                    Some((column, value)) => listeners
                        .by_column
                        .entry(column)
                        .or_default()
                        .entry(value)
                        .or_default()
                        .add(sub.listener),
                }
            }
            TableMessage::SubscribeRecord(sub) => {
                tracing::trace!(table = self.table, "record listener added");
                self.listeners
                    .write()
                    .by_record
                    .entry(sub.key)
                    .or_default()
                    .add(sub.listener);
            }
            TableMessage::Event(event) => self.dispatch(event),
            TableMessage::RemoveConnection(connection) => {
                self.listeners.write().remove_connection(connection)
            }
            TableMessage::RemoveChannel(connection, channel) => {
                self.listeners.write().remove_channel(connection, channel)
            }
            TableMessage::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }

    fn dispatch(&self, event: TableEvent) {
        let result = match (&event.old, &event.new) {
            (None, Some(new)) => self.on_insert(&event.key, new),
            (Some(old), Some(new)) => self.on_update(&event.key, old, new),
            (Some(_), None) => {
                // TODO: remove deleted rows from subscribers' results once the message
                // protocol has a row-removal message.
                tracing::warn!(table = self.table, key = %event.key, "delete is not propagated to live queries");
                Ok(())
            }
            (None, None) => Ok(()),
        };
        if let Err(e) = result {
            tracing::warn!(table = self.table, key = %event.key, "dropping table event: {e}");
        }
    }

    fn on_insert(&self, key: &Literal, new: &[u8]) -> anyhow::Result<()> {
        let row = encoding::decode(new)?;
        let mut notify: Vec<Listener> = vec![];
        {
            let listeners = self.listeners.read();
            notify.extend(listeners.whole_table.iter().cloned());
            for (column, by_value) in listeners.by_column.iter() {
                let Ok(v) = row.member(column) else {
                    continue;
                };
                if let Some(list) = by_value.get(&encoding::encode_key(&v)?) {
                    notify.extend(list.iter().cloned());
                }
            }
        }
        tracing::debug!(table = self.table, key = %key, listeners = notify.len(), "insert");
        for listener in notify {
            self.rerun(listener, key.clone());
        }
        Ok(())
    }

    /// re-runs the listener's sub-query on its own thread, against a fresh read transaction.
    fn rerun(&self, listener: Listener, key: Literal) {
        let Some(runner) = self.runner.upgrade() else {
            return;
        };
        let spawned = std::thread::Builder::new()
            .name(format!("rerun-{}", self.table))
            .spawn(move || runner.rerun(&listener, &key));
        if let Err(e) = spawned {
            tracing::error!(table = self.table, "unable to start sub-query: {e}");
        }
    }

    fn on_update(&self, key: &Literal, old: &[u8], new: &[u8]) -> anyhow::Result<()> {
        let encoded = encoding::encode_key(&key.to_value())?;
        let notify: Vec<Listener> = match self.listeners.read().by_record.get(&encoded) {
            Some(list) => list.iter().cloned().collect(),
            None => return Ok(()),
        };
        tracing::debug!(table = self.table, key = %key, listeners = notify.len(), "update");
        let old = row_json(old)?;
        let new = row_json(new)?;
        for listener in notify {
            listener.execution.send(Message::RecordUpdate {
                channel: listener.channel(),
                path: listener.path.flatten(),
                old: old.clone(),
                new: new.clone(),
            });
        }
        Ok(())
    }
}

fn row_json(bytes: &[u8]) -> anyhow::Result<JsonValue> {
    let row: Value = encoding::decode(bytes)?;
    Ok(row.to_json(&mut Interpreter::new())?)
}
