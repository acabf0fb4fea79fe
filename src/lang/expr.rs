//! Expression trees, their type inference and their evaluation.

use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use itertools::Itertools;

use super::{Bindings, Closure, Error, Function, Interpreter, Result, Type, TypeScope, VIndex, Value};

#[derive(Debug, Clone)]
pub struct LambdaDef {
    pub params: Vec<(String, Type)>,
    pub ret: Type,
    pub body: Rc<Expr>,
}

impl LambdaDef {
    pub fn ty(&self) -> Type {
        Type::function(self.params.iter().map(|(_, t)| t.clone()).collect(), self.ret.clone())
    }
}

/// A call of a function by name.
///
/// The first evaluation that resolves a free `name` to a built-in caches it, so later
/// evaluations skip the scope walk.  Names bound by a lambda parameter or a `let` are never
/// cached, since the function bound to them can differ between evaluations.
#[derive(Debug, Clone)]
pub struct FuncCall {
    pub name: String,
    pub args: Vec<Expr>,
    resolved: OnceCell<Function>,
}

impl FuncCall {
    pub fn new(name: &str, args: Vec<Expr>) -> Self {
        FuncCall {
            name: name.to_string(),
            args,
            resolved: OnceCell::new(),
        }
    }

    pub fn resolved(&self) -> Option<&Function> {
        self.resolved.get()
    }

    pub fn resolve_to(&self, f: Function) {
        let _ = self.resolved.set(f);
    }

    fn infer_type(&self, types: &Rc<TypeScope>) -> Result<Type> {
        let (params, ret) = match types.lookup(&self.name)? {
            Type::Function { params, ret } => (params, ret),
            _ => return Err(Error::NotAFunction(self.name.clone())),
        };
        if params.len() != self.args.len() {
            return Err(Error::Arity {
                name: self.name.clone(),
                expected: params.len(),
                actual: self.args.len(),
            });
        }
        let mut bindings = Bindings::new();
        for (param, arg) in params.iter().zip(self.args.iter()) {
            let actual = arg.infer_type(types)?;
            if !param.match_into(&actual, &mut bindings) {
                return Err(Error::TypeMismatch {
                    expected: param.substitute(&bindings).map_or(param.clone(), |(t, _)| t),
                    actual,
                });
            }
        }
        Ok(ret.substitute(&bindings)?.0)
    }

    fn evaluate(&self, interp: &mut Interpreter) -> Result<Value> {
        let f = match self.resolved.get() {
            Some(f) => f.clone(),
            None => {
                let scope = interp.scope();
                match scope.lookup(&self.name)? {
                    Value::Function(f) => {
                        // A locally bound name can hold a different function on the next call.
                        if matches!(f, Function::Builtin(_)) && !scope.binds(&self.name) {
                            self.resolve_to(f.clone());
                        }
                        f
                    }
                    _ => return Err(Error::NotAFunction(self.name.clone())),
                }
            }
        };
        let args = self
            .args
            .iter()
            .map(|a| a.evaluate(interp))
            .collect::<Result<Vec<_>>>()?;
        interp.call(&f, args)
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    IntLit(i64),
    StringLit(String),
    Var(String),
    RecordLit(BTreeMap<String, Expr>),
    Lambda(Rc<LambdaDef>),
    FuncCall(FuncCall),
    MemberAccess(Box<Expr>, String),
    /// Local bindings, each visible to the bindings after it and to the result.
    DoBlock(Vec<(String, Expr)>, Box<Expr>),
    IndexRef(Rc<VIndex>),
    InlinedValue(Value),
}

impl Expr {
    pub fn var(name: &str) -> Expr {
        Expr::Var(name.to_string())
    }

    pub fn member(e: Expr, member: &str) -> Expr {
        Expr::MemberAccess(Box::new(e), member.to_string())
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::FuncCall(FuncCall::new(name, args))
    }

    pub fn lambda<S: Into<String>>(params: Vec<(S, Type)>, ret: Type, body: Expr) -> Expr {
        Expr::Lambda(Rc::new(LambdaDef {
            params: params.into_iter().map(|(n, t)| (n.into(), t)).collect(),
            ret,
            body: Rc::new(body),
        }))
    }

    pub fn record<S: Into<String>>(fields: impl IntoIterator<Item = (S, Expr)>) -> Expr {
        Expr::RecordLit(fields.into_iter().map(|(k, e)| (k.into(), e)).collect())
    }

    pub fn infer_type(&self, types: &Rc<TypeScope>) -> Result<Type> {
        Ok(match self {
            Expr::IntLit(_) => Type::Int,
            Expr::StringLit(_) => Type::String,
            Expr::Var(name) => types.lookup(name)?,
            Expr::RecordLit(fields) => Type::Record(
                fields
                    .iter()
                    .map(|(k, e)| Ok((k.clone(), e.infer_type(types)?)))
                    .collect::<Result<_>>()?,
            ),
            Expr::Lambda(def) => {
                let inner = types.child(def.params.iter().cloned());
                let body = def.body.infer_type(&inner)?;
                def.ret.expect(&body)?;
                def.ty()
            }
            Expr::FuncCall(call) => call.infer_type(types)?,
            Expr::MemberAccess(e, member) => match e.infer_type(types)? {
                Type::Record(fields) => match fields.get(member) {
                    Some(t) => t.clone(),
                    None => {
                        return Err(Error::NoSuchMember {
                            member: member.clone(),
                            ty: Type::Record(fields),
                        })
                    }
                },
                ty => {
                    return Err(Error::NotARecord {
                        member: member.clone(),
                        ty,
                    })
                }
            },
            Expr::DoBlock(bindings, result) => {
                let mut inner = types.clone();
                for (name, e) in bindings {
                    let t = e.infer_type(&inner)?;
                    inner = inner.child([(name.clone(), t)]);
                }
                result.infer_type(&inner)?
            }
            Expr::IndexRef(idx) => idx.ty(),
            Expr::InlinedValue(v) => v.get_type(),
        })
    }

    pub fn evaluate(&self, interp: &mut Interpreter) -> Result<Value> {
        Ok(match self {
            Expr::IntLit(i) => Value::Int(*i),
            Expr::StringLit(s) => Value::String(s.clone()),
            Expr::Var(name) => interp.scope().lookup(name)?,
            Expr::RecordLit(fields) => {
                let mut out = BTreeMap::new();
                for (k, e) in fields {
                    out.insert(k.clone(), e.evaluate(interp)?);
                }
                Value::Record(Rc::new(out))
            }
            Expr::Lambda(def) => Value::Function(Function::Lambda(Closure {
                def: def.clone(),
                scope: interp.scope(),
            })),
            Expr::FuncCall(call) => call.evaluate(interp)?,
            Expr::MemberAccess(e, member) => e.evaluate(interp)?.member(member)?,
            Expr::DoBlock(bindings, result) => {
                let mut scope = interp.scope();
                for (name, e) in bindings {
                    let v = interp.evaluate_in(scope.clone(), e)?;
                    scope = scope.child([(name.clone(), v)]);
                }
                interp.evaluate_in(scope, result)?
            }
            Expr::IndexRef(idx) => Value::Index(idx.clone()),
            Expr::InlinedValue(v) => v.clone(),
        })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::IntLit(i) => i.fmt(f),
            Expr::StringLit(s) => write!(f, "{:?}", s),
            Expr::Var(name) => name.fmt(f),
            Expr::RecordLit(fields) => write!(
                f,
                "{{{}}}",
                fields.iter().map(|(k, e)| format!("{k}: {e}")).join(", ")
            ),
            Expr::Lambda(def) => write!(
                f,
                "fn({}): {} => {}",
                def.params.iter().map(|(n, t)| format!("{n}: {t}")).join(", "),
                def.ret,
                def.body
            ),
            Expr::FuncCall(call) => write!(f, "{}({})", call.name, call.args.iter().join(", ")),
            Expr::MemberAccess(e, member) => write!(f, "{e}.{member}"),
            Expr::DoBlock(bindings, result) => {
                write!(f, "do {{ ")?;
                for (name, e) in bindings {
                    write!(f, "let {name} = {e}; ")?;
                }
                write!(f, "{result} }}")
            }
            Expr::IndexRef(idx) => write!(f, "<index {}.{}>", idx.table, idx.column),
            Expr::InlinedValue(v) => v.fmt(f),
        }
    }
}

#[cfg(test)]
fn check(text: &str) -> Result<Type> {
    let types = TypeScope::root().child([
        ("row", Type::record([("id", Type::Int), ("name", Type::String)])),
        ("rows", Type::iterator(Type::record([("id", Type::Int)]))),
    ]);
    crate::parser::parse_expr(text).unwrap().infer_type(&types)
}

#[test]
fn test_infer_type() {
    let cases = vec![
        ("1", Type::Int),
        ("\"hi\"", Type::String),
        ("true", Type::Bool),
        ("row.name", Type::String),
        ("{a: 1, b: row}", Type::record([
            ("a", Type::Int),
            ("b", Type::record([("id", Type::Int), ("name", Type::String)])),
        ])),
        ("plus(row.id, 2)", Type::Int),
        ("fn(x: int): bool => intEq(x, 1)", Type::function(vec![Type::Int], Type::Bool)),
        ("map(rows, fn(r: {id: int}): int => r.id)", Type::iterator(Type::Int)),
        ("filter(rows, fn(r: {id: int}): bool => intGt(r.id, 0))", Type::iterator(Type::record([("id", Type::Int)]))),
        ("do { let x = 1; let y = plus(x, x); {y: y} }", Type::record([("y", Type::Int)])),
    ];
    for (text, expected) in cases {
        println!("Case: {}", text);
        assert_eq!(check(text).unwrap(), expected);
    }
}

#[test]
fn test_infer_type_errors() {
    assert!(matches!(check("plus(1)"), Err(Error::Arity { expected: 2, actual: 1, .. })));
    assert!(matches!(check("plus(1, \"a\")"), Err(Error::TypeMismatch { .. })));
    assert!(matches!(check("row(1)"), Err(Error::NotAFunction(_))));
    assert!(matches!(check("row.id.x"), Err(Error::NotARecord { .. })));
    assert!(matches!(check("row.nope"), Err(Error::NoSuchMember { .. })));
    assert!(matches!(check("nope"), Err(Error::NotInScope(_))));
    assert!(matches!(check("fn(x: int): bool => x"), Err(Error::TypeMismatch { .. })));
    // map's function must accept the iterator's element type.
    assert!(matches!(check("map(rows, fn(x: int): int => x)"), Err(Error::TypeMismatch { .. })));
}

#[test]
fn test_type_mismatch_names_both_types() {
    let e = check("strEq(row.id, \"x\")").unwrap_err();
    assert_eq!(e.to_string(), "type mismatch: expected string, found int");
}

#[test]
fn test_evaluate() {
    let cases = vec![
        ("plus(1, times(2, 3))", Value::Int(7)),
        ("concat(\"a\", \"b\")", Value::String("ab".to_string())),
        ("{a: 1}.a", Value::Int(1)),
        ("do { let x = 2; let f = fn(y: int): int => plus(x, y); f(3) }", Value::Int(5)),
        ("not(and(true, false))", Value::Bool(true)),
    ];
    for (text, expected) in cases {
        println!("Case: {}", text);
        let expr = crate::parser::parse_expr(text).unwrap();
        let mut interp = Interpreter::new();
        assert_eq!(interp.evaluate(&expr).unwrap(), expected);
    }
}

#[test]
fn test_closure_captures_defining_scope() {
    // The inner x shadows nothing at the call site; the closure still sees its own x.
    let text = "do { let x = 1; let f = fn(y: int): int => plus(x, y); let g = fn(x: int): int => f(x); g(10) }";
    let expr = crate::parser::parse_expr(text).unwrap();
    let mut interp = Interpreter::new();
    assert_eq!(interp.evaluate(&expr).unwrap(), Value::Int(11));
}

#[test]
fn test_bound_name_is_not_cached() {
    let cases = vec![
        (
            "do { let apply = fn(g: fn(bool): bool, x: bool): bool => g(x); let id = fn(b: bool): bool => b; or(apply(not, true), apply(id, true)) }",
            Value::Bool(true),
        ),
        (
            "do { let apply = fn(g: fn(bool): bool, x: bool): bool => g(x); let id = fn(b: bool): bool => b; and(apply(id, true), apply(not, false)) }",
            Value::Bool(true),
        ),
        (
            "do { let twice = fn(f: fn(int): int, x: int): int => f(f(x)); let inc = fn(y: int): int => plus(y, 1); plus(twice(inc, 0), twice(inc, 10)) }",
            Value::Int(14),
        ),
    ];
    for (text, expected) in cases {
        println!("Case: {}", text);
        let expr = crate::parser::parse_expr(text).unwrap();
        assert_eq!(expr.infer_type(&TypeScope::root()).unwrap(), expected.get_type());
        let mut interp = Interpreter::new();
        assert_eq!(interp.evaluate(&expr).unwrap(), expected);
    }
}

#[test]
fn test_builtin_resolution_is_cached() {
    let expr = crate::parser::parse_expr("plus(1, 2)").unwrap();
    let mut interp = Interpreter::new();
    interp.evaluate(&expr).unwrap();
    match &expr {
        Expr::FuncCall(call) => assert_eq!(call.resolved().map(|f| f.name()), Some("plus")),
        _ => panic!("expected a call"),
    }
}

#[test]
fn test_format_expr() {
    let text = "map(rows, fn(r: {id: int}): {id: int} => {id: r.id})";
    let expr = crate::parser::parse_expr(text).unwrap();
    assert_eq!(format!("{}", expr), text);
}
