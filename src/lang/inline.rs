//! Inlining replaces the free variables of an expression with the values they are bound to,
//! so that repeated evaluation (once per row) skips the scope walk.
//!
//! Names bound inside the expression by lambdas and `do` blocks are left alone.  Member access
//! on an inlined record is folded, which turns `tables.t.id` into a direct index reference.
//! Calls that resolve to a built-in get their resolution cached.  The result evaluates to the
//! same value as the input.

use std::rc::Rc;

use super::{Expr, FuncCall, LambdaDef, Scope, Value};

pub struct Inliner<'a> {
    scope: &'a Scope,
    bound: Vec<String>,
}

impl<'a> Inliner<'a> {
    pub fn new(scope: &'a Scope) -> Self {
        Inliner {
            scope,
            bound: vec![],
        }
    }

    fn is_bound(&self, name: &str) -> bool {
        self.bound.iter().any(|b| b == name)
    }

    fn value_expr(v: Value) -> Expr {
        match v {
            Value::Index(idx) => Expr::IndexRef(idx),
            v => Expr::InlinedValue(v),
        }
    }

    pub fn inline(&mut self, expr: &Expr) -> Expr {
        match expr {
            Expr::Var(name) if !self.is_bound(name) => match self.scope.lookup(name) {
                Ok(v) => Self::value_expr(v),
                // Left for evaluation to report.
                Err(_) => expr.clone(),
            },
            Expr::IntLit(_) | Expr::StringLit(_) | Expr::Var(_) | Expr::IndexRef(_) | Expr::InlinedValue(_) => {
                expr.clone()
            }
            Expr::RecordLit(fields) => Expr::RecordLit(
                fields
                    .iter()
                    .map(|(k, e)| (k.clone(), self.inline(e)))
                    .collect(),
            ),
            Expr::Lambda(def) => {
                let n = self.bound.len();
                self.bound.extend(def.params.iter().map(|(name, _)| name.clone()));
                let body = self.inline(&def.body);
                self.bound.truncate(n);
                Expr::Lambda(Rc::new(LambdaDef {
                    params: def.params.clone(),
                    ret: def.ret.clone(),
                    body: Rc::new(body),
                }))
            }
            Expr::FuncCall(call) => {
                let args = call.args.iter().map(|a| self.inline(a)).collect();
                let out = FuncCall::new(&call.name, args);
                if let Some(f) = call.resolved() {
                    out.resolve_to(f.clone());
                } else if !self.is_bound(&call.name) {
                    if let Ok(Value::Function(f @ super::Function::Builtin(_))) = self.scope.lookup(&call.name) {
                        out.resolve_to(f);
                    }
                }
                Expr::FuncCall(out)
            }
            Expr::MemberAccess(e, member) => match self.inline(e) {
                Expr::InlinedValue(v @ Value::Record(_)) => match v.member(member) {
                    Ok(m) => Self::value_expr(m),
                    Err(_) => Expr::MemberAccess(Box::new(Expr::InlinedValue(v)), member.clone()),
                },
                e => Expr::MemberAccess(Box::new(e), member.clone()),
            },
            Expr::DoBlock(bindings, result) => {
                let n = self.bound.len();
                let mut out = Vec::with_capacity(bindings.len());
                for (name, e) in bindings {
                    out.push((name.clone(), self.inline(e)));
                    self.bound.push(name.clone());
                }
                let result = self.inline(result);
                self.bound.truncate(n);
                Expr::DoBlock(out, Box::new(result))
            }
        }
    }
}

#[test]
fn test_inline_free_variables_only() {
    let scope = Scope::root().child([
        ("x", Value::Int(5)),
        ("r", Value::record([("a", Value::record([("b", Value::Int(7))]))])),
    ]);
    let cases = vec![
        ("plus(x, 1)", "plus(5, 1)"),
        ("fn(x: int): int => plus(x, 1)", "fn(x: int): int => plus(x, 1)"),
        ("r.a.b", "7"),
        ("do { let y = x; let x = 2; plus(x, y) }", "do { let y = 5; let x = 2; plus(x, y) }"),
        ("unknown", "unknown"),
    ];
    for (input, expected) in cases {
        println!("Case: {}", input);
        let expr = crate::parser::parse_expr(input).unwrap();
        let inlined = Inliner::new(&scope).inline(&expr);
        assert_eq!(format!("{}", inlined), expected);
    }
}

#[test]
fn test_inlining_preserves_results() {
    let scope = Scope::root().child([("x", Value::Int(5))]);
    let cases = vec![
        "plus(x, 1)",
        "do { let f = fn(y: int): int => times(x, y); f(x) }",
        "{a: x, b: {c: x}}.b.c",
    ];
    for text in cases {
        println!("Case: {}", text);
        let expr = crate::parser::parse_expr(text).unwrap();
        let inlined = Inliner::new(&scope).inline(&expr);
        let mut interp = super::Interpreter::with_scope(scope.clone());
        let a = interp.evaluate(&expr).unwrap();
        let b = interp.evaluate(&inlined).unwrap();
        assert_eq!(a, b);
    }
}

#[test]
fn test_inline_caches_builtins() {
    let expr = crate::parser::parse_expr("plus(1, 2)").unwrap();
    match Inliner::new(&Scope::root()).inline(&expr) {
        Expr::FuncCall(call) => assert!(call.resolved().is_some()),
        _ => panic!("expected a call"),
    }
}
