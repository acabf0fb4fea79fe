//! Parent-linked name environments.
//!
//! A `Scope` maps names to values and a `TypeScope` maps the same names to their types.
//! Both are built per execution out of `Chain`s.  A chain is never mutated once it has
//! children, and lookups that miss every link fall back to the built-ins.

use std::collections::BTreeMap;
use std::rc::Rc;

use super::builtins;
use super::{Error, Result, Type, Value};

/// Supplies the entries visible beneath the outermost link of a chain.
pub trait RootLookup: Sized {
    fn root_lookup(name: &str) -> Option<Self>;
}

impl RootLookup for Value {
    fn root_lookup(name: &str) -> Option<Self> {
        builtins::lookup_value(name)
    }
}

impl RootLookup for Type {
    fn root_lookup(name: &str) -> Option<Self> {
        builtins::lookup_type(name)
    }
}

#[derive(Debug)]
pub struct Chain<T> {
    vars: BTreeMap<String, T>,
    parent: Option<Rc<Chain<T>>>,
}

pub type Scope = Chain<Value>;
pub type TypeScope = Chain<Type>;

impl<T: Clone + RootLookup> Chain<T> {
    /// an empty chain that sees only the built-ins.
    pub fn root() -> Rc<Self> {
        Rc::new(Chain {
            vars: BTreeMap::new(),
            parent: None,
        })
    }

    pub fn with_vars<S: Into<String>>(vars: impl IntoIterator<Item = (S, T)>) -> Rc<Self> {
        Rc::new(Chain {
            vars: vars.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            parent: None,
        })
    }

    /// extends `self` with `vars`, which shadow any outer entry of the same name.
    pub fn child<S: Into<String>>(self: &Rc<Self>, vars: impl IntoIterator<Item = (S, T)>) -> Rc<Self> {
        Rc::new(Chain {
            vars: vars.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            parent: Some(self.clone()),
        })
    }

    pub fn lookup(&self, name: &str) -> Result<T> {
        let mut link = self;
        loop {
            if let Some(v) = link.vars.get(name) {
                return Ok(v.clone());
            }
            match &link.parent {
                Some(p) => link = p,
                None => break,
            }
        }
        T::root_lookup(name).ok_or_else(|| Error::NotInScope(name.to_string()))
    }

    /// true if `name` is bound by some link of this chain, not counting the built-ins.
    pub fn binds(&self, name: &str) -> bool {
        let mut link = self;
        loop {
            if link.vars.contains_key(name) {
                return true;
            }
            match &link.parent {
                Some(p) => link = p,
                None => return false,
            }
        }
    }
}

#[test]
fn test_lookup_walks_parents() {
    let outer = Scope::with_vars([("a", Value::Int(1)), ("b", Value::Int(2))]);
    let inner = outer.child([("a", Value::Int(10))]);
    assert_eq!(inner.lookup("a").unwrap().as_int(), Some(&10));
    assert_eq!(inner.lookup("b").unwrap().as_int(), Some(&2));
    assert_eq!(outer.lookup("a").unwrap().as_int(), Some(&1));
    assert!(inner.binds("b"));
    assert!(!inner.binds("plus"));
}

#[test]
fn test_lookup_falls_back_to_builtins() {
    let types = TypeScope::root().child([("x", Type::Int)]);
    assert_eq!(types.lookup("true").unwrap(), Type::Bool);
    assert_eq!(
        types.lookup("plus").unwrap(),
        Type::function(vec![Type::Int, Type::Int], Type::Int)
    );
    match types.lookup("nope") {
        Err(Error::NotInScope(name)) => assert_eq!(name, "nope"),
        other => panic!("expected not in scope, got {:?}", other),
    }
}
