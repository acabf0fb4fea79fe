//! Runtime values of the query language.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use enum_as_inner::EnumAsInner;
use itertools::Itertools;
use serde_json::Value as JsonValue;

use super::builtins::Builtin;
use super::iterator::{ArrayIterator, IteratorRef};
use super::{Error, Interpreter, LambdaDef, Result, Scope, Type, VIndex};

#[derive(Clone, EnumAsInner)]
pub enum Value {
    Int(i64),
    Bool(bool),
    String(String),
    Record(Rc<BTreeMap<String, Value>>),
    Array(ArrayValue),
    Iterator(IteratorRef),
    Function(Function),
    Index(Rc<VIndex>),
}

/// A materialized sequence.  It reports the type `iterator<element_type>` and can be consumed
/// anywhere an iterator can, any number of times.
#[derive(Clone)]
pub struct ArrayValue {
    pub elements: Rc<Vec<Value>>,
    pub element_type: Type,
}

/// A lambda together with the scope it was defined in.
#[derive(Clone)]
pub struct Closure {
    pub def: Rc<LambdaDef>,
    pub scope: Rc<Scope>,
}

#[derive(Clone)]
pub enum Function {
    Lambda(Closure),
    Builtin(&'static Builtin),
}

impl Function {
    pub fn ty(&self) -> Type {
        match self {
            Function::Lambda(c) => c.def.ty(),
            Function::Builtin(b) => b.ty(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Function::Lambda(_) => "<lambda>",
            Function::Builtin(b) => b.name,
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Function::Lambda(c) => c.def.params.len(),
            Function::Builtin(b) => b.params.len(),
        }
    }
}

impl Value {
    pub fn record<S: Into<String>>(fields: impl IntoIterator<Item = (S, Value)>) -> Value {
        Value::Record(Rc::new(
            fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    pub fn array(elements: Vec<Value>, element_type: Type) -> Value {
        Value::Array(ArrayValue {
            elements: Rc::new(elements),
            element_type,
        })
    }

    pub fn get_type(&self) -> Type {
        match self {
            Value::Int(_) => Type::Int,
            Value::Bool(_) => Type::Bool,
            Value::String(_) => Type::String,
            Value::Record(fields) => Type::Record(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.get_type()))
                    .collect(),
            ),
            Value::Array(a) => Type::iterator(a.element_type.clone()),
            Value::Iterator(it) => Type::iterator(it.element_type().clone()),
            Value::Function(f) => f.ty(),
            Value::Index(idx) => idx.ty(),
        }
    }

    pub fn member(&self, member: &str) -> Result<Value> {
        match self {
            Value::Record(fields) => fields.get(member).cloned().ok_or_else(|| Error::NoSuchMember {
                member: member.to_string(),
                ty: self.get_type(),
            }),
            _ => Err(Error::NotARecord {
                member: member.to_string(),
                ty: self.get_type(),
            }),
        }
    }

    /// returns an iterator over an iterator or array value.
    pub fn into_rows(self) -> Result<IteratorRef> {
        match self {
            Value::Iterator(it) => Ok(it),
            Value::Array(a) => Ok(IteratorRef::new(
                ArrayIterator::new(a.elements),
                a.element_type,
            )),
            other => Err(Error::TypeMismatch {
                expected: Type::iterator(Type::var("A")),
                actual: other.get_type(),
            }),
        }
    }

    /// converts to JSON.  Iterators are consumed to build an array, which may call back into
    /// user lambdas through `caller`.
    pub fn to_json(&self, caller: &mut Interpreter) -> Result<JsonValue> {
        Ok(match self {
            Value::Int(i) => JsonValue::from(*i),
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Record(fields) => {
                let mut map = serde_json::Map::new();
                for (k, v) in fields.iter() {
                    map.insert(k.clone(), v.to_json(caller)?);
                }
                JsonValue::Object(map)
            }
            Value::Array(a) => JsonValue::Array(
                a.elements
                    .iter()
                    .map(|v| v.to_json(caller))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Iterator(it) => it.to_json(caller)?,
            Value::Function(_) | Value::Index(_) => return Err(Error::NotSerializable(self.get_type())),
        })
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                a.element_type == b.element_type && a.elements == b.elements
            }
            (Value::Iterator(a), Value::Iterator(b)) => a.ptr_eq(b),
            (Value::Function(Function::Builtin(a)), Value::Function(Function::Builtin(b))) => {
                a.name == b.name
            }
            (Value::Function(Function::Lambda(a)), Value::Function(Function::Lambda(b))) => {
                Rc::ptr_eq(&a.def, &b.def) && Rc::ptr_eq(&a.scope, &b.scope)
            }
            (Value::Index(a), Value::Index(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => i.fmt(f),
            Value::Bool(b) => b.fmt(f),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Record(fields) => write!(
                f,
                "{{{}}}",
                fields.iter().map(|(k, v)| format!("{k}: {v}")).join(", ")
            ),
            Value::Array(a) => write!(f, "[{}]", a.elements.iter().join(", ")),
            Value::Iterator(it) => write!(f, "<iterator<{}>>", it.element_type()),
            Value::Function(func) => write!(f, "<{}: {}>", func.name(), func.ty()),
            Value::Index(idx) => write!(f, "<index {}.{}>", idx.table, idx.column),
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}: {}>", self.name(), self.ty())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[test]
fn test_value_types() {
    let row = Value::record([("id", Value::String("0".to_string())), ("n", Value::Int(3))]);
    let row_type = Type::record([("id", Type::String), ("n", Type::Int)]);
    assert_eq!(row.get_type(), row_type);
    let arr = Value::array(vec![row.clone()], row_type.clone());
    assert_eq!(arr.get_type(), Type::iterator(row_type));
    assert_eq!(row.member("n").unwrap(), Value::Int(3));
    assert!(matches!(row.member("x"), Err(Error::NoSuchMember { .. })));
    assert!(matches!(Value::Int(1).member("x"), Err(Error::NotARecord { .. })));
}

#[test]
fn test_value_to_json() {
    let mut interp = Interpreter::new();
    let row = Value::record([
        ("b", Value::Bool(true)),
        ("id", Value::String("a\"b".to_string())),
        ("n", Value::Int(-3)),
    ]);
    let arr = Value::array(vec![row.clone(), row.clone()], row.get_type());
    let expected = serde_json::json!({"b": true, "id": "a\"b", "n": -3});
    assert_eq!(row.to_json(&mut interp).unwrap(), expected);
    assert_eq!(
        arr.to_json(&mut interp).unwrap(),
        serde_json::json!([expected.clone(), expected])
    );
    let plus = super::Scope::root().lookup("plus").unwrap();
    assert!(matches!(plus.to_json(&mut interp), Err(Error::NotSerializable(_))));
}

#[test]
fn test_format_value() {
    let row = Value::record([("id", Value::String("x".to_string())), ("n", Value::Int(1))]);
    assert_eq!(format!("{}", row), "{id: \"x\", n: 1}");
    let arr = Value::array(vec![Value::Int(1), Value::Int(2)], Type::Int);
    assert_eq!(format!("{}", arr), "[1, 2]");
}
