//! The interpreter evaluates expressions with an explicit stack of frames.
//!
//! Every call pushes a frame holding the callee, the scope its body runs in, and the query
//! path anchor of the row being produced.  Live registration reads the anchor of the
//! innermost frame to learn where in the nested result a new listener belongs.

use std::rc::Rc;

use crate::live::{LiveQueryInfo, QueryPath};

use super::{Bindings, Error, Expr, Function, Result, Scope, Value};

pub struct Frame {
    /// The body being evaluated, for lambda frames.
    pub expr: Option<Rc<Expr>>,
    pub scope: Rc<Scope>,
    pub callee: Option<Function>,
    pub path: QueryPath,
}

pub struct Interpreter {
    stack: Vec<Frame>,
    live: Option<Rc<LiveQueryInfo>>,
    /// Set by a live scan when it yields a row; taken by the next call, which is the
    /// mapping of that row.
    pending_path: Option<QueryPath>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_scope(Scope::root())
    }

    pub fn with_scope(scope: Rc<Scope>) -> Self {
        Interpreter {
            stack: vec![Frame {
                expr: None,
                scope,
                callee: None,
                path: QueryPath::root(),
            }],
            live: None,
            pending_path: None,
        }
    }

    /// makes `listen` built-ins evaluated by this interpreter register listeners.
    pub fn set_live(&mut self, info: LiveQueryInfo) {
        for frame in self.stack.iter_mut() {
            frame.path = info.base_path.clone();
        }
        self.live = Some(Rc::new(info));
    }

    pub fn live_info(&self) -> Option<Rc<LiveQueryInfo>> {
        self.live.clone()
    }

    fn top(&self) -> &Frame {
        // The root frame is never popped.
        &self.stack[self.stack.len() - 1]
    }

    pub fn scope(&self) -> Rc<Scope> {
        self.top().scope.clone()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn current_path(&self) -> QueryPath {
        self.top().path.clone()
    }

    pub fn set_row_path(&mut self, path: QueryPath) {
        self.pending_path = Some(path);
    }

    pub fn evaluate(&mut self, expr: &Expr) -> Result<Value> {
        expr.evaluate(self)
    }

    /// evaluates `expr` with `scope` in place of the current scope.
    pub fn evaluate_in(&mut self, scope: Rc<Scope>, expr: &Expr) -> Result<Value> {
        let path = self.current_path();
        self.stack.push(Frame {
            expr: None,
            scope,
            callee: None,
            path,
        });
        let result = expr.evaluate(self);
        self.stack.pop();
        result
    }

    pub fn call(&mut self, f: &Function, args: Vec<Value>) -> Result<Value> {
        if f.arity() != args.len() {
            return Err(Error::Arity {
                name: f.name().to_string(),
                expected: f.arity(),
                actual: args.len(),
            });
        }
        let path = self.pending_path.take().unwrap_or_else(|| self.current_path());
        match f {
            Function::Lambda(closure) => {
                let names = closure.def.params.iter().map(|(n, _)| n.clone());
                let scope = closure.scope.child(names.zip(args));
                let body = closure.def.body.clone();
                self.stack.push(Frame {
                    expr: Some(body.clone()),
                    scope,
                    callee: Some(f.clone()),
                    path,
                });
                let result = body.evaluate(self);
                self.stack.pop();
                result
            }
            Function::Builtin(b) => {
                let mut bindings = Bindings::new();
                for ((_, declared), arg) in b.params.iter().zip(args.iter()) {
                    let actual = arg.get_type();
                    if !declared.match_into(&actual, &mut bindings) {
                        return Err(Error::TypeMismatch {
                            expected: declared.clone(),
                            actual,
                        });
                    }
                }
                let names = b.params.iter().map(|(n, _)| *n);
                let scope = Scope::root().child(names.zip(args.iter().cloned()));
                self.stack.push(Frame {
                    expr: None,
                    scope,
                    callee: Some(f.clone()),
                    path,
                });
                let result = (b.imp)(self, args);
                self.stack.pop();
                let value = result?;
                let (declared, _) = b.ret.substitute(&bindings)?;
                let actual = value.get_type();
                if declared.matches(&actual).is_none() {
                    return Err(Error::ReturnContract {
                        name: b.name.to_string(),
                        declared,
                        actual,
                    });
                }
                Ok(value)
            }
        }
    }
}

#[test]
fn test_frames_are_popped_after_errors() {
    let mut interp = Interpreter::new();
    let expr = crate::parser::parse_expr("do { let f = fn(x: int): int => plus(x, \"a\"); f(1) }").unwrap();
    assert!(interp.evaluate(&expr).is_err());
    assert_eq!(interp.depth(), 1);
    let expr = crate::parser::parse_expr("plus(9223372036854775807, 1)").unwrap();
    assert!(matches!(interp.evaluate(&expr), Err(Error::Overflow(_))));
    assert_eq!(interp.depth(), 1);
}

#[test]
fn test_call_checks_arity() {
    let mut interp = Interpreter::new();
    let plus = interp.scope().lookup("plus").unwrap().into_function().unwrap();
    assert!(matches!(
        interp.call(&plus, vec![Value::Int(1)]),
        Err(Error::Arity { expected: 2, actual: 1, .. })
    ));
}

#[test]
fn test_builtin_return_contract() {
    use super::builtins::Builtin;
    use super::Type;
    fn liar(_: &mut Interpreter, _: Vec<Value>) -> Result<Value> {
        Ok(Value::String("not an int".to_string()))
    }
    let b: &'static Builtin = Box::leak(Box::new(Builtin {
        name: "liar",
        params: vec![("x", Type::var("A"))],
        ret: Type::var("A"),
        imp: liar,
    }));
    let mut interp = Interpreter::new();
    match interp.call(&Function::Builtin(b), vec![Value::Int(1)]) {
        Err(Error::ReturnContract { declared, actual, .. }) => {
            assert_eq!(declared, Type::Int);
            assert_eq!(actual, Type::String);
        }
        other => panic!("expected a contract violation, got {:?}", other),
    }
    assert_eq!(interp.depth(), 1);
}
