//! `lang` is the small typed functional language that queries are lowered into.
//!
//! A query is planned into an `Expr`, type-checked against a `TypeScope`, optionally
//! inlined against the matching `Scope`, and then evaluated by an `Interpreter`.
//! Rows flow through the program as lazy iterators, so a full result set is never
//! materialized before it is serialized.
//!
//! ```text
//! map(
//!     filter(scan(tables.t.id), fn(row0: {a: int, id: int}): bool => intEq(row0.a, 1)),
//!     fn(row0: {a: int, id: int}): {id: int} => {id: row0.id}
//! )
//! ```

pub mod builtins;
pub mod expr;
pub mod index;
pub mod inline;
pub mod interpreter;
pub mod iterator;
pub mod scope;
pub mod types;
pub mod value;

pub use expr::{Expr, FuncCall, LambdaDef};
pub use index::VIndex;
pub use interpreter::Interpreter;
pub use iterator::{IteratorRef, VIterator};
pub use scope::{Scope, TypeScope};
pub use types::{Bindings, Type};
pub use value::{Closure, Function, Value};

/// Errors raised while type-checking or evaluating a program.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0} is not in scope")]
    NotInScope(String),
    #[error("type mismatch: expected {expected}, found {actual}")]
    TypeMismatch { expected: Type, actual: Type },
    #[error("missing type var '{0}")]
    MissingTypeVar(String),
    #[error("{name} expects {expected} arguments, got {actual}")]
    Arity {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("cannot access member {member} of non-record type {ty}")]
    NotARecord { member: String, ty: Type },
    #[error("record of type {ty} has no member {member}")]
    NoSuchMember { member: String, ty: Type },
    #[error("{0} is not a function")]
    NotAFunction(String),
    #[error("builtin {name} is declared to return {declared}, but returned {actual}")]
    ReturnContract {
        name: String,
        declared: Type,
        actual: Type,
    },
    #[error("a value of type {0} cannot be serialized")]
    NotSerializable(Type),
    #[error("no row with key {key} in table {table}")]
    RowNotFound { table: String, key: String },
    #[error("iterator is already being consumed")]
    IteratorBusy,
    #[error("integer overflow in {0}")]
    Overflow(&'static str),
    #[error("live query has no subscription point {0}")]
    UnknownSubscriptionPoint(i64),
    #[error(transparent)]
    Storage(#[from] crate::storage::Error),
    #[error(transparent)]
    Encoding(#[from] crate::encoding::Error),
    #[error(transparent)]
    Live(#[from] crate::live::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
