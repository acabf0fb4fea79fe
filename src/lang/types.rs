//! Defines the types of the query language and structural matching of a type pattern
//! against a concrete type.
//!
//! Built-ins such as `map` are declared with type variables (`'A`, `'B`).  At a call site,
//! each declared parameter type is matched against the argument's type, which binds the
//! variables; the declared return type is then resolved with `substitute`.

use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;

use super::{Error, Result};

/// Maps type variable names to the types they were bound to.
pub type Bindings = BTreeMap<String, Type>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Int,
    Bool,
    String,
    Record(BTreeMap<String, Type>),
    Iterator(Box<Type>),
    /// Parameters are matched by position; their names are not part of the type.
    Function { params: Vec<Type>, ret: Box<Type> },
    /// An ordered view over a table, looked up by `key`, producing `row`s.
    Index { key: Box<Type>, row: Box<Type> },
    TypeVar(String),
}

impl Type {
    pub fn record<S: Into<String>>(fields: impl IntoIterator<Item = (S, Type)>) -> Type {
        Type::Record(fields.into_iter().map(|(k, t)| (k.into(), t)).collect())
    }

    pub fn iterator(element: Type) -> Type {
        Type::Iterator(Box::new(element))
    }

    pub fn function(params: Vec<Type>, ret: Type) -> Type {
        Type::Function {
            params,
            ret: Box::new(ret),
        }
    }

    pub fn index(key: Type, row: Type) -> Type {
        Type::Index {
            key: Box::new(key),
            row: Box::new(row),
        }
    }

    pub fn var(name: &str) -> Type {
        Type::TypeVar(name.to_string())
    }

    /// true if no type variable appears anywhere in the type.
    pub fn is_concrete(&self) -> bool {
        match self {
            Type::Int | Type::Bool | Type::String => true,
            Type::Record(fields) => fields.values().all(Type::is_concrete),
            Type::Iterator(t) => t.is_concrete(),
            Type::Function { params, ret } => params.iter().all(Type::is_concrete) && ret.is_concrete(),
            Type::Index { key, row } => key.is_concrete() && row.is_concrete(),
            Type::TypeVar(_) => false,
        }
    }

    /// returns the bindings that make `candidate` an instance of the pattern `self`, or None if
    /// there are none.
    ///
    /// A type variable that would be bound to two different types does not match.
    pub fn matches(&self, candidate: &Type) -> Option<Bindings> {
        let mut bindings = Bindings::new();
        match self.match_into(candidate, &mut bindings) {
            true => Some(bindings),
            false => None,
        }
    }

    /// like `matches`, but extends an existing binding set, so that sibling positions
    /// (e.g. the parameters of one call) must agree with each other.
    pub fn match_into(&self, candidate: &Type, bindings: &mut Bindings) -> bool {
        match (self, candidate) {
            (_, Type::TypeVar(_)) => self == candidate,
            (Type::TypeVar(name), _) => match bindings.get(name) {
                Some(bound) => bound == candidate,
                None => {
                    bindings.insert(name.clone(), candidate.clone());
                    true
                }
            },
            (Type::Int, Type::Int) | (Type::Bool, Type::Bool) | (Type::String, Type::String) => true,
            (Type::Record(pattern), Type::Record(fields)) => {
                pattern.len() == fields.len()
                    && pattern.iter().all(|(name, t)| match fields.get(name) {
                        Some(u) => t.match_into(u, bindings),
                        None => false,
                    })
            }
            (Type::Iterator(a), Type::Iterator(b)) => a.match_into(b, bindings),
            (Type::Index { key: k1, row: r1 }, Type::Index { key: k2, row: r2 }) => {
                k1.match_into(k2, bindings) && r1.match_into(r2, bindings)
            }
            (Type::Function { params: p1, ret: r1 }, Type::Function { params: p2, ret: r2 }) => {
                p1.len() == p2.len()
                    && p1.iter().zip(p2.iter()).all(|(a, b)| a.match_into(b, bindings))
                    && r1.match_into(r2, bindings)
            }
            _ => false,
        }
    }

    /// matches `actual` against the pattern `self`, producing a type error naming both types
    /// when it does not match.
    pub fn expect(&self, actual: &Type) -> Result<Bindings> {
        self.matches(actual).ok_or_else(|| Error::TypeMismatch {
            expected: self.clone(),
            actual: actual.clone(),
        })
    }

    /// replaces every type variable using `bindings`.
    ///
    /// Returns the resolved type and whether it is fully concrete.  An unbound variable is an
    /// error.
    pub fn substitute(&self, bindings: &Bindings) -> Result<(Type, bool)> {
        Ok(match self {
            Type::Int | Type::Bool | Type::String => (self.clone(), true),
            Type::TypeVar(name) => {
                let bound = bindings
                    .get(name)
                    .ok_or_else(|| Error::MissingTypeVar(name.clone()))?;
                (bound.clone(), bound.is_concrete())
            }
            Type::Record(fields) => {
                let mut concrete = true;
                let mut out = BTreeMap::new();
                for (name, t) in fields {
                    let (t, c) = t.substitute(bindings)?;
                    concrete &= c;
                    out.insert(name.clone(), t);
                }
                (Type::Record(out), concrete)
            }
            Type::Iterator(t) => {
                let (t, c) = t.substitute(bindings)?;
                (Type::iterator(t), c)
            }
            Type::Index { key, row } => {
                let (key, kc) = key.substitute(bindings)?;
                let (row, rc) = row.substitute(bindings)?;
                (Type::index(key, row), kc && rc)
            }
            Type::Function { params, ret } => {
                let mut concrete = true;
                let mut out = Vec::with_capacity(params.len());
                for p in params {
                    let (p, c) = p.substitute(bindings)?;
                    concrete &= c;
                    out.push(p);
                }
                let (ret, c) = ret.substitute(bindings)?;
                (Type::function(out, ret), concrete && c)
            }
        })
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => "int".fmt(f),
            Type::Bool => "bool".fmt(f),
            Type::String => "string".fmt(f),
            Type::Record(fields) => write!(
                f,
                "{{{}}}",
                fields.iter().map(|(k, t)| format!("{k}: {t}")).join(", ")
            ),
            Type::Iterator(t) => write!(f, "iterator<{t}>"),
            Type::Function { params, ret } => write!(f, "fn({}): {ret}", params.iter().join(", ")),
            Type::Index { key, row } => write!(f, "index<{key}, {row}>"),
            Type::TypeVar(name) => write!(f, "'{name}"),
        }
    }
}

#[cfg(test)]
fn row_type() -> Type {
    Type::record([("id", Type::String), ("n", Type::Int)])
}

#[test]
fn test_matches_is_reflexive_for_concrete_types() {
    let cases = vec![
        Type::Int,
        Type::Bool,
        Type::String,
        row_type(),
        Type::iterator(row_type()),
        Type::function(vec![Type::Int, row_type()], Type::Bool),
        Type::index(Type::String, row_type()),
        Type::record([("nested", Type::iterator(row_type()))]),
    ];
    for t in cases {
        println!("Case: {}", t);
        assert_eq!(t.matches(&t), Some(Bindings::new()));
    }
}

#[test]
fn test_type_var_binds_to_candidate() {
    let cases = vec![Type::Int, Type::String, row_type(), Type::iterator(Type::Bool)];
    for t in cases {
        let bindings = Type::var("A").matches(&t).unwrap();
        assert_eq!(bindings.get("A"), Some(&t));
    }
    // A variable is not an instance of a concrete type.
    assert!(Type::Int.matches(&Type::var("A")).is_none());
}

#[test]
fn test_matches_structural() {
    struct Case {
        desc: &'static str,
        pattern: Type,
        candidate: Type,
        expected: Option<Vec<(&'static str, Type)>>,
    }
    let cases = vec![
        Case {
            desc: "records with different field sets",
            pattern: Type::record([("id", Type::String)]),
            candidate: row_type(),
            expected: None,
        },
        Case {
            desc: "record with a mismatched field",
            pattern: Type::record([("id", Type::Int), ("n", Type::Int)]),
            candidate: row_type(),
            expected: None,
        },
        Case {
            desc: "iterator element is bound",
            pattern: Type::iterator(Type::var("A")),
            candidate: Type::iterator(row_type()),
            expected: Some(vec![("A", row_type())]),
        },
        Case {
            desc: "function params match by position",
            pattern: Type::function(vec![Type::var("A")], Type::var("B")),
            candidate: Type::function(vec![row_type()], Type::Int),
            expected: Some(vec![("A", row_type()), ("B", Type::Int)]),
        },
        Case {
            desc: "function arity differs",
            pattern: Type::function(vec![Type::var("A")], Type::Bool),
            candidate: Type::function(vec![Type::Int, Type::Int], Type::Bool),
            expected: None,
        },
        Case {
            desc: "index key and row",
            pattern: Type::index(Type::var("K"), Type::var("R")),
            candidate: Type::index(Type::String, row_type()),
            expected: Some(vec![("K", Type::String), ("R", row_type())]),
        },
        Case {
            desc: "conflicting bindings do not match",
            pattern: Type::function(vec![Type::var("A"), Type::var("A")], Type::Bool),
            candidate: Type::function(vec![Type::Int, Type::String], Type::Bool),
            expected: None,
        },
        Case {
            desc: "consistent repeated variable",
            pattern: Type::function(vec![Type::var("A"), Type::var("A")], Type::Bool),
            candidate: Type::function(vec![Type::Int, Type::Int], Type::Bool),
            expected: Some(vec![("A", Type::Int)]),
        },
    ];
    for case in cases {
        println!("Running case: {}", case.desc);
        let expected = case
            .expected
            .map(|v| v.into_iter().map(|(k, t)| (k.to_string(), t)).collect::<Bindings>());
        assert_eq!(case.pattern.matches(&case.candidate), expected);
    }
}

#[test]
fn test_substitute() {
    let pattern = Type::function(vec![Type::iterator(Type::var("A"))], Type::iterator(Type::var("B")));
    let mut bindings = Bindings::new();
    bindings.insert("A".to_string(), row_type());
    bindings.insert("B".to_string(), Type::Int);
    let (t, concrete) = pattern.substitute(&bindings).unwrap();
    assert!(concrete);
    assert_eq!(t, Type::function(vec![Type::iterator(row_type())], Type::iterator(Type::Int)));

    bindings.remove("B");
    match pattern.substitute(&bindings) {
        Err(Error::MissingTypeVar(name)) => assert_eq!(name, "B"),
        other => panic!("expected a missing type var, got {:?}", other),
    }

    // Bound to something that is itself not concrete.
    bindings.insert("B".to_string(), Type::var("C"));
    let (_, concrete) = pattern.substitute(&bindings).unwrap();
    assert!(!concrete);
}

#[test]
fn test_format_type() {
    let cases = vec![
        (Type::Int, "int"),
        (row_type(), "{id: string, n: int}"),
        (Type::iterator(Type::var("A")), "iterator<'A>"),
        (Type::function(vec![Type::Int, Type::Bool], Type::String), "fn(int, bool): string"),
        (Type::index(Type::Int, Type::record([("id", Type::Int)])), "index<int, {id: int}>"),
        (Type::record(Vec::<(&str, Type)>::new()), "{}"),
    ];
    for (t, expected) in cases {
        assert_eq!(format!("{}", t), expected);
    }
}
