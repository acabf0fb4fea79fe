//! `livedb` is an embeddable database answering tree-shaped queries, which can be kept up to
//! date as the rows they read change.
//!
//! ```text
//! CREATE TABLE posts (id string PRIMARY KEY, title string)
//! CREATE TABLE comments (id string PRIMARY KEY, post_id string REFERENCES posts, body string)
//! LIVE MANY posts { id, title, comments: MANY comments { id, body } }
//! ```
//!
//! Statements are parsed, planned into the small functional language in `lang`, and evaluated
//! against a `redb` snapshot.  A LIVE query registers listeners with per-table actors while it
//! is evaluated, and those actors send `Message`s to the connection as rows are written.

pub mod ast;
pub mod config;
pub mod database;
pub mod encoding;
pub mod formatting;
pub mod lang;
pub mod live;
pub mod parser;
pub mod planner;
mod pt_to_ast;
pub mod schema;
pub mod sql_type;
pub mod storage;

extern crate pest;
#[macro_use]
extern crate pest_derive;

pub use config::Config;
pub use database::{Connection, Database, StatementError};
pub use live::{ChannelId, Message, PathSegment};
