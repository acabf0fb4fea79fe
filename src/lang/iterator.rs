//! Pull-based lazy sequences.
//!
//! Every producer of rows implements `VIterator`.  `next` takes the interpreter as its
//! caller so that combinators like `map` and `filter` can call back into user lambdas.
//! `Ok(None)` marks the end of iteration; it is an expected outcome, not an error.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value as JsonValue;

use super::{Error, Function, Interpreter, Result, Type, Value};

pub trait VIterator {
    fn next(&mut self, caller: &mut Interpreter) -> Result<Option<Value>>;

    /// releases any resources held.  Combinators close their inner iterator.
    fn close(&mut self) {}
}

/// A shared handle to an iterator, used as a runtime value.
///
/// The iterator is consumed at most once.  When it ends or fails it is closed and dropped,
/// and later calls to `next` produce nothing.
#[derive(Clone)]
pub struct IteratorRef {
    state: Rc<RefCell<Option<Box<dyn VIterator>>>>,
    element_type: Type,
}

impl IteratorRef {
    pub fn new(it: impl VIterator + 'static, element_type: Type) -> Self {
        IteratorRef {
            state: Rc::new(RefCell::new(Some(Box::new(it)))),
            element_type,
        }
    }

    pub fn element_type(&self) -> &Type {
        &self.element_type
    }

    pub fn next(&self, caller: &mut Interpreter) -> Result<Option<Value>> {
        let mut state = self.state.try_borrow_mut().map_err(|_| Error::IteratorBusy)?;
        let Some(it) = state.as_mut() else {
            return Ok(None);
        };
        match it.next(caller) {
            Ok(Some(v)) => Ok(Some(v)),
            other => {
                it.close();
                *state = None;
                other
            }
        }
    }

    pub fn close(&self) {
        if let Ok(mut state) = self.state.try_borrow_mut() {
            if let Some(mut it) = state.take() {
                it.close();
            }
        }
    }

    pub fn collect(&self, caller: &mut Interpreter) -> Result<Vec<Value>> {
        let mut out = vec![];
        while let Some(v) = self.next(caller)? {
            out.push(v);
        }
        Ok(out)
    }

    /// consumes the iterator, converting every element to JSON.
    pub fn to_json(&self, caller: &mut Interpreter) -> Result<JsonValue> {
        let mut out = vec![];
        while let Some(v) = self.next(caller)? {
            out.push(v.to_json(caller)?);
        }
        Ok(JsonValue::Array(out))
    }

    pub fn ptr_eq(&self, other: &IteratorRef) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

pub struct ArrayIterator {
    elements: Rc<Vec<Value>>,
    pos: usize,
}

impl ArrayIterator {
    pub fn new(elements: Rc<Vec<Value>>) -> Self {
        ArrayIterator { elements, pos: 0 }
    }
}

impl VIterator for ArrayIterator {
    fn next(&mut self, _: &mut Interpreter) -> Result<Option<Value>> {
        let v = self.elements.get(self.pos).cloned();
        if v.is_some() {
            self.pos += 1;
        }
        Ok(v)
    }
}

/// Applies `f` to each element of `inner`.
pub struct MapIterator {
    inner: IteratorRef,
    f: Function,
}

impl MapIterator {
    pub fn new(inner: IteratorRef, f: Function) -> Self {
        MapIterator { inner, f }
    }
}

impl VIterator for MapIterator {
    fn next(&mut self, caller: &mut Interpreter) -> Result<Option<Value>> {
        match self.inner.next(caller)? {
            Some(v) => Ok(Some(caller.call(&self.f, vec![v])?)),
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.inner.close()
    }
}

/// Yields the elements of `inner` for which `predicate` returns true.
pub struct FilterIterator {
    inner: IteratorRef,
    predicate: Function,
}

impl FilterIterator {
    pub fn new(inner: IteratorRef, predicate: Function) -> Self {
        FilterIterator { inner, predicate }
    }
}

impl VIterator for FilterIterator {
    fn next(&mut self, caller: &mut Interpreter) -> Result<Option<Value>> {
        while let Some(v) = self.inner.next(caller)? {
            match caller.call(&self.predicate, vec![v.clone()])? {
                Value::Bool(true) => return Ok(Some(v)),
                Value::Bool(false) => continue,
                other => {
                    return Err(Error::TypeMismatch {
                        expected: Type::Bool,
                        actual: other.get_type(),
                    })
                }
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.inner.close()
    }
}

#[cfg(test)]
fn ints(xs: &[i64]) -> IteratorRef {
    let elements = xs.iter().map(|x| Value::Int(*x)).collect();
    Value::array(elements, Type::Int).into_rows().unwrap()
}

#[cfg(test)]
fn lambda(interp: &mut Interpreter, text: &str) -> Function {
    let expr = crate::parser::parse_expr(text).unwrap();
    interp.evaluate(&expr).unwrap().into_function().unwrap()
}

#[test]
fn test_iterator_is_consumed_once() {
    let mut interp = Interpreter::new();
    let it = ints(&[1, 2]);
    assert_eq!(it.collect(&mut interp).unwrap(), vec![Value::Int(1), Value::Int(2)]);
    assert_eq!(it.next(&mut interp).unwrap(), None);
    assert_eq!(it.next(&mut interp).unwrap(), None);
}

#[test]
fn test_map_and_filter() {
    let mut interp = Interpreter::new();
    let double = lambda(&mut interp, "fn(x: int): int => times(x, 2)");
    let big = lambda(&mut interp, "fn(x: int): bool => intGt(x, 2)");
    let mapped = IteratorRef::new(MapIterator::new(ints(&[1, 2, 3]), double), Type::Int);
    let filtered = IteratorRef::new(FilterIterator::new(mapped, big), Type::Int);
    assert_eq!(
        filtered.collect(&mut interp).unwrap(),
        vec![Value::Int(4), Value::Int(6)]
    );
}

#[test]
fn test_filter_predicate_must_return_bool() {
    let mut interp = Interpreter::new();
    let not_bool = lambda(&mut interp, "fn(x: int): int => x");
    let filtered = IteratorRef::new(FilterIterator::new(ints(&[1]), not_bool), Type::Int);
    assert!(matches!(
        filtered.next(&mut interp),
        Err(Error::TypeMismatch { .. })
    ));
    // A failed iterator is closed and yields nothing more.
    assert_eq!(filtered.next(&mut interp).unwrap(), None);
}
