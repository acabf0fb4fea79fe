//! The built-in functions and constants, visible beneath every scope.

use std::collections::BTreeMap;

use crate::live::registration;

use super::iterator::{FilterIterator, IteratorRef, MapIterator};
use super::{Error, Function, Interpreter, Result, Type, Value};

pub type BuiltinImpl = fn(&mut Interpreter, Vec<Value>) -> Result<Value>;

pub struct Builtin {
    pub name: &'static str,
    pub params: Vec<(&'static str, Type)>,
    pub ret: Type,
    pub imp: BuiltinImpl,
}

impl Builtin {
    pub fn ty(&self) -> Type {
        Type::function(self.params.iter().map(|(_, t)| t.clone()).collect(), self.ret.clone())
    }
}

fn builtin(name: &'static str, params: Vec<(&'static str, Type)>, ret: Type, imp: BuiltinImpl) -> (&'static str, Builtin) {
    (name, Builtin { name, params, ret, imp })
}

lazy_static::lazy_static! {
    static ref BUILTINS: BTreeMap<&'static str, Builtin> = {
        use Type::{Bool, Int, String};
        let a = || Type::var("A");
        let rows = || Type::iterator(Type::var("R"));
        let index = || Type::index(Type::var("K"), Type::var("R"));
        [
            builtin("plus", vec![("a", Int), ("b", Int)], Int, plus),
            builtin("minus", vec![("a", Int), ("b", Int)], Int, minus),
            builtin("times", vec![("a", Int), ("b", Int)], Int, times),
            builtin("intEq", vec![("a", Int), ("b", Int)], Bool, int_eq),
            builtin("strEq", vec![("a", String), ("b", String)], Bool, str_eq),
            builtin("boolEq", vec![("a", Bool), ("b", Bool)], Bool, bool_eq),
            builtin("intLt", vec![("a", Int), ("b", Int)], Bool, int_lt),
            builtin("intGt", vec![("a", Int), ("b", Int)], Bool, int_gt),
            builtin("and", vec![("a", Bool), ("b", Bool)], Bool, and),
            builtin("or", vec![("a", Bool), ("b", Bool)], Bool, or),
            builtin("not", vec![("a", Bool)], Bool, not),
            builtin("concat", vec![("a", String), ("b", String)], String, concat),
            builtin(
                "map",
                vec![("xs", Type::iterator(a())), ("f", Type::function(vec![a()], Type::var("B")))],
                Type::iterator(Type::var("B")),
                map,
            ),
            builtin(
                "filter",
                vec![("xs", Type::iterator(a())), ("f", Type::function(vec![a()], Bool))],
                Type::iterator(a()),
                filter,
            ),
            builtin("scan", vec![("index", index())], rows(), scan),
            builtin("get", vec![("index", index()), ("key", Type::var("K"))], Type::var("R"), get),
            builtin("listen", vec![("rows", rows()), ("point", Int)], rows(), listen),
            builtin(
                "listenWhere",
                vec![("rows", rows()), ("point", Int), ("value", Type::var("V"))],
                rows(),
                listen_where,
            ),
        ]
        .into_iter()
        .collect()
    };
}

pub fn lookup_value(name: &str) -> Option<Value> {
    match name {
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        _ => BUILTINS.get(name).map(|b| Value::Function(Function::Builtin(b))),
    }
}

pub fn lookup_type(name: &str) -> Option<Type> {
    match name {
        "true" | "false" => Some(Type::Bool),
        _ => BUILTINS.get(name).map(Builtin::ty),
    }
}

fn take<const N: usize>(name: &str, args: Vec<Value>) -> Result<[Value; N]> {
    let actual = args.len();
    args.try_into().map_err(|_| Error::Arity {
        name: name.to_string(),
        expected: N,
        actual,
    })
}

fn int(v: Value) -> Result<i64> {
    match v {
        Value::Int(i) => Ok(i),
        other => Err(Error::TypeMismatch { expected: Type::Int, actual: other.get_type() }),
    }
}

fn boolean(v: Value) -> Result<bool> {
    match v {
        Value::Bool(b) => Ok(b),
        other => Err(Error::TypeMismatch { expected: Type::Bool, actual: other.get_type() }),
    }
}

fn string(v: Value) -> Result<String> {
    match v {
        Value::String(s) => Ok(s),
        other => Err(Error::TypeMismatch { expected: Type::String, actual: other.get_type() }),
    }
}

fn function(v: Value) -> Result<Function> {
    match v {
        Value::Function(f) => Ok(f),
        other => Err(Error::NotAFunction(other.to_string())),
    }
}

fn ints(name: &str, args: Vec<Value>) -> Result<(i64, i64)> {
    let [a, b] = take(name, args)?;
    Ok((int(a)?, int(b)?))
}

fn bools(name: &str, args: Vec<Value>) -> Result<(bool, bool)> {
    let [a, b] = take(name, args)?;
    Ok((boolean(a)?, boolean(b)?))
}

fn plus(_: &mut Interpreter, args: Vec<Value>) -> Result<Value> {
    let (a, b) = ints("plus", args)?;
    a.checked_add(b).map(Value::Int).ok_or(Error::Overflow("plus"))
}

fn minus(_: &mut Interpreter, args: Vec<Value>) -> Result<Value> {
    let (a, b) = ints("minus", args)?;
    a.checked_sub(b).map(Value::Int).ok_or(Error::Overflow("minus"))
}

fn times(_: &mut Interpreter, args: Vec<Value>) -> Result<Value> {
    let (a, b) = ints("times", args)?;
    a.checked_mul(b).map(Value::Int).ok_or(Error::Overflow("times"))
}

fn int_eq(_: &mut Interpreter, args: Vec<Value>) -> Result<Value> {
    let (a, b) = ints("intEq", args)?;
    Ok(Value::Bool(a == b))
}

fn int_lt(_: &mut Interpreter, args: Vec<Value>) -> Result<Value> {
    let (a, b) = ints("intLt", args)?;
    Ok(Value::Bool(a < b))
}

fn int_gt(_: &mut Interpreter, args: Vec<Value>) -> Result<Value> {
    let (a, b) = ints("intGt", args)?;
    Ok(Value::Bool(a > b))
}

fn str_eq(_: &mut Interpreter, args: Vec<Value>) -> Result<Value> {
    let [a, b] = take("strEq", args)?;
    Ok(Value::Bool(string(a)? == string(b)?))
}

fn bool_eq(_: &mut Interpreter, args: Vec<Value>) -> Result<Value> {
    let (a, b) = bools("boolEq", args)?;
    Ok(Value::Bool(a == b))
}

fn and(_: &mut Interpreter, args: Vec<Value>) -> Result<Value> {
    let (a, b) = bools("and", args)?;
    Ok(Value::Bool(a && b))
}

fn or(_: &mut Interpreter, args: Vec<Value>) -> Result<Value> {
    let (a, b) = bools("or", args)?;
    Ok(Value::Bool(a || b))
}

fn not(_: &mut Interpreter, args: Vec<Value>) -> Result<Value> {
    let [a] = take("not", args)?;
    Ok(Value::Bool(!boolean(a)?))
}

fn concat(_: &mut Interpreter, args: Vec<Value>) -> Result<Value> {
    let [a, b] = take("concat", args)?;
    Ok(Value::String(string(a)? + &string(b)?))
}

fn map(_: &mut Interpreter, args: Vec<Value>) -> Result<Value> {
    let [xs, f] = take("map", args)?;
    let f = function(f)?;
    let element_type = match f.ty() {
        Type::Function { ret, .. } => *ret,
        other => return Err(Error::NotAFunction(other.to_string())),
    };
    let it = MapIterator::new(xs.into_rows()?, f);
    Ok(Value::Iterator(IteratorRef::new(it, element_type)))
}

fn filter(_: &mut Interpreter, args: Vec<Value>) -> Result<Value> {
    let [xs, f] = take("filter", args)?;
    let xs = xs.into_rows()?;
    let element_type = xs.element_type().clone();
    let it = FilterIterator::new(xs, function(f)?);
    Ok(Value::Iterator(IteratorRef::new(it, element_type)))
}

fn scan(_: &mut Interpreter, args: Vec<Value>) -> Result<Value> {
    let [index] = take("scan", args)?;
    match index {
        Value::Index(idx) => Ok(Value::Iterator(idx.scan()?)),
        other => Err(Error::TypeMismatch {
            expected: Type::index(Type::var("K"), Type::var("R")),
            actual: other.get_type(),
        }),
    }
}

fn get(_: &mut Interpreter, args: Vec<Value>) -> Result<Value> {
    let [index, key] = take("get", args)?;
    match index {
        Value::Index(idx) => idx.get(&key),
        other => Err(Error::TypeMismatch {
            expected: Type::index(Type::var("K"), Type::var("R")),
            actual: other.get_type(),
        }),
    }
}

fn listen(caller: &mut Interpreter, args: Vec<Value>) -> Result<Value> {
    let [rows, point] = take("listen", args)?;
    registration::listen(caller, rows, int(point)?, None)
}

fn listen_where(caller: &mut Interpreter, args: Vec<Value>) -> Result<Value> {
    let [rows, point, value] = take("listenWhere", args)?;
    registration::listen(caller, rows, int(point)?, Some(value))
}

#[cfg(test)]
fn eval(text: &str) -> Result<Value> {
    let expr = crate::parser::parse_expr(text).unwrap();
    Interpreter::new().evaluate(&expr)
}

#[test]
fn test_scalar_builtins() {
    let cases = vec![
        ("minus(1, 3)", Value::Int(-2)),
        ("times(-4, 3)", Value::Int(-12)),
        ("intEq(2, 2)", Value::Bool(true)),
        ("intLt(2, 3)", Value::Bool(true)),
        ("intGt(2, 3)", Value::Bool(false)),
        ("strEq(\"a\", \"b\")", Value::Bool(false)),
        ("boolEq(true, true)", Value::Bool(true)),
        ("or(false, true)", Value::Bool(true)),
        ("and(true, false)", Value::Bool(false)),
        ("not(false)", Value::Bool(true)),
        ("concat(\"live\", \"db\")", Value::String("livedb".to_string())),
    ];
    for (text, expected) in cases {
        println!("Case: {}", text);
        assert_eq!(eval(text).unwrap(), expected);
    }
}

#[test]
fn test_arity_error_names_the_builtin() {
    let cases = vec![("plus", 1), ("not", 2), ("strEq", 3), ("listenWhere", 0)];
    for (name, count) in cases {
        println!("Case: {}", name);
        let b = match lookup_value(name) {
            Some(Value::Function(Function::Builtin(b))) => b,
            _ => panic!("{name} is not a builtin"),
        };
        let args = vec![Value::Bool(true); count];
        match (b.imp)(&mut Interpreter::new(), args) {
            Err(Error::Arity { name: n, actual, .. }) => {
                assert_eq!(n, name);
                assert_eq!(actual, count);
            }
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("{name} accepted {count} arguments"),
        }
    }
}

#[test]
fn test_overflow_is_an_error() {
    assert!(matches!(eval("times(4611686018427387904, 2)"), Err(Error::Overflow("times"))));
    assert!(matches!(eval("minus(minus(0, 9223372036854775807), 2)"), Err(Error::Overflow("minus"))));
}

#[test]
fn test_listen_passes_rows_through_when_not_live() {
    let mut interp = Interpreter::new();
    let rows = Value::array(vec![Value::Int(1)], Type::Int);
    let listen = lookup_value("listen").unwrap().into_function().unwrap();
    let out = interp.call(&listen, vec![rows, Value::Int(0)]).unwrap();
    assert_eq!(out.into_rows().unwrap().collect(&mut interp).unwrap(), vec![Value::Int(1)]);
}

#[test]
fn test_map_filter_scan_over_index() {
    use crate::encoding;
    use crate::storage::Store;
    use std::rc::Rc;
    use std::sync::Arc;

    let store = Store::in_memory().unwrap();
    let w = store.begin_write().unwrap();
    for id in [0, 1] {
        let row = Value::record([("id", Value::Int(id))]);
        w.put("t", &encoding::encode_key(&Value::Int(id)).unwrap(), &encoding::encode(&row).unwrap())
            .unwrap();
    }
    w.commit().unwrap();
    let row_type = Type::record([("id", Type::Int)]);
    let idx = super::VIndex::new("t", "id", Type::Int, row_type, Arc::new(store.begin_read().unwrap()));
    let types = super::TypeScope::root().child([("idx", idx.ty())]);
    let scope = super::Scope::root().child([("idx", Value::Index(Rc::new(idx)))]);

    let text = "map(filter(scan(idx), fn(row: {id: int}): bool => intEq(row.id, 1)), fn(row: {id: int}): {x: int} => {x: row.id})";
    let expr = crate::parser::parse_expr(text).unwrap();
    assert_eq!(
        expr.infer_type(&types).unwrap(),
        Type::iterator(Type::record([("x", Type::Int)]))
    );
    let mut interp = Interpreter::with_scope(scope);
    let out = interp.evaluate(&expr).unwrap().to_json(&mut interp).unwrap();
    assert_eq!(out, serde_json::json!([{"x": 1}]));

    let expr = crate::parser::parse_expr("get(idx, 0)").unwrap();
    assert_eq!(expr.infer_type(&types).unwrap(), Type::record([("id", Type::Int)]));
    assert_eq!(interp.evaluate(&expr).unwrap(), Value::record([("id", Value::Int(0))]));
}
