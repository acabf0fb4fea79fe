//! `live` keeps subscribers of live queries up to date as rows change.
//!
//! Each table gets an actor: a thread draining a private bounded channel.  Subscriptions and
//! write events for a table pass through the same channel, so an event is always dispatched
//! after every subscription sent before it.
//!
//! A live query registers listeners while it is evaluated:
//!   - a table listener when a scan point is reached, optionally narrowed to rows whose
//!     column holds a given value.  An insert that matches re-runs the listener's sub-query for
//!     the new row and sends a `table_update`.
//!   - a record listener for each row produced.  An update of that row sends a
//!     `record_update` with the old and new rows.

pub mod listener;
pub mod query_path;
pub mod registration;
mod table_actor;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crossbeam::channel::Sender;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::ast::{Literal, Query};

pub use listener::{Listener, ListenerList, TableListeners};
pub use query_path::{PathSegment, QueryPath};
use table_actor::{TableActor, TableMessage};

pub type ConnectionId = u64;
pub type ChannelId = u64;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("the actor for table {0} has stopped")]
    ActorStopped(String),
    #[error("unable to start the actor for table {table}: {source}")]
    Spawn {
        table: String,
        source: std::io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A message delivered to a connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Result {
        channel: ChannelId,
        data: JsonValue,
    },
    TableUpdate {
        channel: ChannelId,
        path: Vec<PathSegment>,
        data: JsonValue,
    },
    RecordUpdate {
        channel: ChannelId,
        path: Vec<PathSegment>,
        old: JsonValue,
        new: JsonValue,
    },
    Error {
        channel: ChannelId,
        message: String,
    },
}

impl Message {
    pub fn channel(&self) -> ChannelId {
        match self {
            Message::Result { channel, .. }
            | Message::TableUpdate { channel, .. }
            | Message::RecordUpdate { channel, .. }
            | Message::Error { channel, .. } => *channel,
        }
    }
}

/// The statement a channel was opened for, and where its messages go.
#[derive(Debug)]
pub struct QueryExecution {
    pub connection: ConnectionId,
    pub channel: ChannelId,
    outbox: Sender<Message>,
}

impl QueryExecution {
    pub fn new(connection: ConnectionId, channel: ChannelId, outbox: Sender<Message>) -> Self {
        QueryExecution {
            connection,
            channel,
            outbox,
        }
    }

    pub fn send(&self, message: Message) {
        if self.outbox.send(message).is_err() {
            tracing::debug!(connection = self.connection, channel = self.channel, "connection closed, dropping message");
        }
    }
}

/// A scan in a live query plan at which listeners are registered.
#[derive(Debug, Clone)]
pub struct SubscriptionPoint {
    pub table: String,
    pub primary_key: String,
    /// The column a table listener is narrowed by, if any.
    pub filter_column: Option<String>,
    /// The name of the nested selection this scan produces, or None at the root.
    pub selection: Option<String>,
    /// Re-run for a newly inserted row.
    pub query: Arc<Query>,
    pub is_root: bool,
}

/// Everything the `listen` built-ins need while a live query is being evaluated.
pub struct LiveQueryInfo {
    pub execution: Arc<QueryExecution>,
    pub engine: LiveEngine,
    pub points: Vec<SubscriptionPoint>,
    pub base_path: QueryPath,
    /// true when re-running a sub-query for an existing listener, whose root table listener
    /// is already registered.
    pub resumed: bool,
}

/// A committed write to one row.
#[derive(Debug, Clone)]
pub struct TableEvent {
    pub table: String,
    pub key: Literal,
    pub old: Option<Vec<u8>>,
    pub new: Option<Vec<u8>>,
}

#[derive(Debug)]
pub struct TableSubscription {
    /// A column name and the encoded value it must hold, or None for every row.
    pub filter: Option<(String, Vec<u8>)>,
    pub listener: Listener,
}

#[derive(Debug)]
pub struct RecordSubscription {
    pub key: Vec<u8>,
    pub listener: Listener,
}

/// Re-runs sub-queries when a table listener fires.
pub trait SubqueryRunner: Send + Sync {
    /// runs `listener`'s sub-query for the row with primary key `key` and delivers the rows
    /// on the listener's channel.
    fn rerun(&self, listener: &Listener, key: &Literal);
}

struct EngineInner {
    actors: RwLock<HashMap<String, TableActor>>,
    runner: Weak<dyn SubqueryRunner>,
    inbox_capacity: usize,
}

/// A handle to the table actors.  Actors are started on first use.
#[derive(Clone)]
pub struct LiveEngine {
    inner: Arc<EngineInner>,
}

impl LiveEngine {
    pub fn new(runner: Weak<dyn SubqueryRunner>, inbox_capacity: usize) -> Self {
        LiveEngine {
            inner: Arc::new(EngineInner {
                actors: RwLock::new(HashMap::new()),
                runner,
                inbox_capacity,
            }),
        }
    }

    fn inbox(&self, table: &str) -> Result<Sender<TableMessage>> {
        if let Some(actor) = self.inner.actors.read().get(table) {
            return Ok(actor.inbox.clone());
        }
        let mut actors = self.inner.actors.write();
        if let Some(actor) = actors.get(table) {
            return Ok(actor.inbox.clone());
        }
        let actor = TableActor::spawn(table, self.inner.inbox_capacity, self.inner.runner.clone())?;
        let inbox = actor.inbox.clone();
        actors.insert(table.to_string(), actor);
        Ok(inbox)
    }

    fn send(&self, table: &str, message: TableMessage) -> Result<()> {
        self.inbox(table)?
            .send(message)
            .map_err(|_| Error::ActorStopped(table.to_string()))
    }

    fn broadcast(&self, message: impl Fn() -> TableMessage) {
        let inboxes: Vec<(String, Sender<TableMessage>)> = self
            .inner
            .actors
            .read()
            .iter()
            .map(|(t, a)| (t.clone(), a.inbox.clone()))
            .collect();
        for (table, inbox) in inboxes {
            if inbox.send(message()).is_err() {
                tracing::warn!(table, "table actor stopped");
            }
        }
    }

    pub fn subscribe_table(&self, table: &str, subscription: TableSubscription) -> Result<()> {
        self.send(table, TableMessage::Subscribe(subscription))
    }

    pub fn subscribe_record(&self, table: &str, subscription: RecordSubscription) -> Result<()> {
        self.send(table, TableMessage::SubscribeRecord(subscription))
    }

    pub fn publish(&self, event: TableEvent) -> Result<()> {
        let table = event.table.clone();
        self.send(&table, TableMessage::Event(event))
    }

    /// removes every listener of `connection` from every table.
    pub fn remove_connection(&self, connection: ConnectionId) {
        self.broadcast(|| TableMessage::RemoveConnection(connection));
    }

    pub fn remove_channel(&self, connection: ConnectionId, channel: ChannelId) {
        self.broadcast(|| TableMessage::RemoveChannel(connection, channel));
    }

    /// blocks until `table`'s actor has handled every message sent to it before this call.
    pub fn sync(&self, table: &str) -> Result<()> {
        let (done, wait) = crossbeam::channel::bounded(1);
        self.send(table, TableMessage::Barrier(done))?;
        wait.recv().map_err(|_| Error::ActorStopped(table.to_string()))
    }

    pub fn sync_all(&self) -> Result<()> {
        let tables: Vec<String> = self.inner.actors.read().keys().cloned().collect();
        for table in tables {
            self.sync(&table)?;
        }
        Ok(())
    }

    /// returns the number of listeners currently registered on `table`.
    pub fn listener_count(&self, table: &str) -> usize {
        self.inner
            .actors
            .read()
            .get(table)
            .map_or(0, |a| a.listeners.read().len())
    }
}
