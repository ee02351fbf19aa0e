//! Evaluator for inline bindings
//!
//! Values are `serde_json::Value`; truthiness and `+` follow JavaScript so
//! bindings read the way template authors expect. The only way out of the
//! sandbox is `call("module", ...)`, resolved against the module registry.

use std::collections::HashMap;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use super::ast::{BinaryOp, Expr, LogicOp, Program, Stmt, UnaryOp};
use super::parser::number;
use super::{CallContext, ModuleRegistry};
use crate::error::{NullsError, Result};
use crate::html::escape::escape_text;

/// Evaluate a compiled program
pub async fn run(program: &Program, cx: CallContext<'_>, modules: &ModuleRegistry) -> Result<Value> {
    let mut machine = Machine {
        cx,
        modules,
        scopes: vec![HashMap::new()],
    };
    match program {
        Program::Expression(expr) => machine.eval(expr).await,
        Program::Block(body) => match machine.exec_block(body).await? {
            Flow::Return(value) => Ok(value),
            Flow::Next => Ok(Value::Null),
        },
    }
}

enum Flow {
    Next,
    Return(Value),
}

struct Machine<'a> {
    cx: CallContext<'a>,
    modules: &'a ModuleRegistry,
    scopes: Vec<HashMap<String, Value>>,
}

impl<'a> Machine<'a> {
    fn exec_block<'s>(&'s mut self, body: &'s [Stmt]) -> BoxFuture<'s, Result<Flow>> {
        Box::pin(async move {
            self.scopes.push(HashMap::new());
            let mut flow = Flow::Next;
            for stmt in body {
                match self.exec(stmt).await {
                    Ok(Flow::Next) => {}
                    Ok(ret) => {
                        flow = ret;
                        break;
                    }
                    Err(e) => {
                        self.scopes.pop();
                        return Err(e);
                    }
                }
            }
            self.scopes.pop();
            Ok(flow)
        })
    }

    async fn exec(&mut self, stmt: &Stmt) -> Result<Flow> {
        match stmt {
            Stmt::Let(name, expr) => {
                let value = self.eval(expr).await?;
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(name.clone(), value);
                }
                Ok(Flow::Next)
            }
            Stmt::Assign(name, expr) => {
                let value = self.eval(expr).await?;
                let scope = self
                    .scopes
                    .iter_mut()
                    .rev()
                    .find(|s| s.contains_key(name))
                    .ok_or_else(|| fail(format!("assignment to undeclared variable '{}'", name)))?;
                scope.insert(name.clone(), value);
                Ok(Flow::Next)
            }
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(e) => self.eval(e).await?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            Stmt::If(cond, then, otherwise) => {
                if is_truthy(&self.eval(cond).await?) {
                    self.exec_block(then).await
                } else {
                    self.exec_block(otherwise).await
                }
            }
            Stmt::ForOf(name, items, body) => {
                let items = match self.eval(items).await? {
                    Value::Array(items) => items,
                    Value::Object(map) => map.into_iter().map(|(k, _)| Value::String(k)).collect(),
                    Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
                    other => return Err(fail(format!("{} is not iterable", type_name(&other)))),
                };
                for item in items {
                    self.scopes.push(HashMap::from([(name.clone(), item)]));
                    let flow = self.exec_block(body).await;
                    self.scopes.pop();
                    if let Flow::Return(v) = flow? {
                        return Ok(Flow::Return(v));
                    }
                }
                Ok(Flow::Next)
            }
            Stmt::Expr(expr) => {
                self.eval(expr).await?;
                Ok(Flow::Next)
            }
        }
    }

    fn eval<'s>(&'s mut self, expr: &'s Expr) -> BoxFuture<'s, Result<Value>> {
        Box::pin(async move {
            match expr {
                Expr::Literal(v) => Ok(v.clone()),
                Expr::Var(name) => self.lookup(name),
                Expr::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.eval(item).await?);
                    }
                    Ok(Value::Array(out))
                }
                Expr::Object(fields) => {
                    let mut out = Map::new();
                    for (k, e) in fields {
                        let v = self.eval(e).await?;
                        out.insert(k.clone(), v);
                    }
                    Ok(Value::Object(out))
                }
                Expr::Member(target, name) => {
                    let target = self.eval(target).await?;
                    member(&target, name)
                }
                Expr::Index(target, index) => {
                    let target = self.eval(target).await?;
                    let index = self.eval(index).await?;
                    index_value(&target, &index)
                }
                Expr::Call(name, args) => {
                    let mut values = Vec::with_capacity(args.len());
                    for a in args {
                        values.push(self.eval(a).await?);
                    }
                    if name == "call" {
                        self.call_module(values).await
                    } else {
                        builtin(name, values)
                    }
                }
                Expr::Unary(op, operand) => {
                    let v = self.eval(operand).await?;
                    match op {
                        UnaryOp::Not => Ok(Value::Bool(!is_truthy(&v))),
                        UnaryOp::Neg => Ok(number(-as_number(&v)?)),
                    }
                }
                Expr::Binary(op, left, right) => {
                    let l = self.eval(left).await?;
                    let r = self.eval(right).await?;
                    binary(*op, &l, &r)
                }
                Expr::Logical(op, left, right) => {
                    let l = self.eval(left).await?;
                    let short = match op {
                        LogicOp::And => !is_truthy(&l),
                        LogicOp::Or => is_truthy(&l),
                        LogicOp::Nullish => !l.is_null(),
                    };
                    if short {
                        Ok(l)
                    } else {
                        self.eval(right).await
                    }
                }
                Expr::Cond(cond, then, otherwise) => {
                    if is_truthy(&self.eval(cond).await?) {
                        self.eval(then).await
                    } else {
                        self.eval(otherwise).await
                    }
                }
            }
        })
    }

    fn lookup(&self, name: &str) -> Result<Value> {
        if let Some(v) = self.scopes.iter().rev().find_map(|s| s.get(name)) {
            return Ok(v.clone());
        }
        match name {
            "request" => Ok(self.cx.exchange.request_json().clone()),
            "args" | "arguments" => Ok(Value::Array(self.cx.args.to_vec())),
            _ => Err(fail(format!("'{}' is not defined", name))),
        }
    }

    async fn call_module(&self, mut values: Vec<Value>) -> Result<Value> {
        if values.is_empty() {
            return Err(fail("call() needs a module path"));
        }
        let path = match values.remove(0) {
            Value::String(p) => p,
            other => return Err(fail(format!("module path must be a string, got {}", type_name(&other)))),
        };
        let script = self
            .modules
            .get(&path)
            .ok_or(NullsError::ModuleNotFound { path })?;
        script
            .call(CallContext::new(self.cx.exchange, &values))
            .await
    }
}

// ============================================================================
// VALUE SEMANTICS
// ============================================================================

/// JavaScript truthiness
pub fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Display form: strings verbatim, integers without a fraction, containers as JSON
pub fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// JavaScript-flavoured name of a value's type, for error messages
pub fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn fail(details: impl Into<String>) -> NullsError {
    NullsError::script(details)
}

fn as_number(v: &Value) -> Result<f64> {
    match v {
        Value::Number(n) => n.as_f64().ok_or_else(|| fail("number out of range")),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Null => Ok(0.0),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| fail(format!("'{}' is not a number", s))),
        other => Err(fail(format!("expected number, got {}", type_name(other)))),
    }
}

fn as_index(v: &Value) -> Option<usize> {
    v.as_f64()
        .filter(|f| *f >= 0.0 && f.fract() == 0.0)
        .map(|f| f as usize)
}

fn member(target: &Value, name: &str) -> Result<Value> {
    match target {
        Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
        Value::Array(items) if name == "length" => Ok(number(items.len() as f64)),
        Value::String(s) if name == "length" => Ok(number(s.chars().count() as f64)),
        Value::Null => Err(fail(format!("cannot read '{}' of null", name))),
        _ => Ok(Value::Null),
    }
}

fn index_value(target: &Value, index: &Value) -> Result<Value> {
    match (target, index) {
        (Value::Null, _) => Err(fail(format!("cannot index null with {}", stringify(index)))),
        (Value::Array(items), i) => Ok(as_index(i)
            .and_then(|i| items.get(i).cloned())
            .unwrap_or(Value::Null)),
        (Value::String(s), i) => Ok(as_index(i)
            .and_then(|i| s.chars().nth(i))
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::Null)),
        (target, key) => member(target, &stringify(key)),
    }
}

fn loose_eq(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => l == r,
    }
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    let arith = |f: fn(f64, f64) -> f64| -> Result<Value> {
        let v = f(as_number(l)?, as_number(r)?);
        if v.is_finite() {
            Ok(number(v))
        } else {
            Err(fail("arithmetic result is not finite"))
        }
    };
    match op {
        BinaryOp::Add => match (l, r) {
            (Value::Number(_), Value::Number(_)) => arith(|a, b| a + b),
            (Value::String(_), _) | (_, Value::String(_)) => {
                Ok(Value::String(stringify(l) + &stringify(r)))
            }
            _ => Err(fail(format!("cannot add {} and {}", type_name(l), type_name(r)))),
        },
        BinaryOp::Sub => arith(|a, b| a - b),
        BinaryOp::Mul => arith(|a, b| a * b),
        BinaryOp::Div => arith(|a, b| a / b),
        BinaryOp::Rem => arith(|a, b| a % b),
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(l, r))),
        BinaryOp::Ne => Ok(Value::Bool(!loose_eq(l, r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = match (l, r) {
                (Value::String(a), Value::String(b)) => a.partial_cmp(b),
                _ => as_number(l)?.partial_cmp(&as_number(r)?),
            };
            let Some(ord) = ord else {
                return Ok(Value::Bool(false));
            };
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ord.is_lt(),
                BinaryOp::Le => ord.is_le(),
                BinaryOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            }))
        }
    }
}

// ============================================================================
// BUILTINS
// ============================================================================

const RANGE_LIMIT: usize = 100_000;

fn builtin(name: &str, args: Vec<Value>) -> Result<Value> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Null);
    let text = |i: usize| stringify(&arg(i));
    match name {
        "len" => Ok(number(match &arg(0) {
            Value::String(s) => s.chars().count(),
            Value::Array(a) => a.len(),
            Value::Object(o) => o.len(),
            Value::Null => 0,
            other => return Err(fail(format!("len() of {}", type_name(other)))),
        } as f64)),
        "str" => Ok(Value::String(text(0))),
        "num" => match as_number(&arg(0))? {
            n if n.is_finite() => Ok(number(n)),
            _ => Err(fail(format!("num() of '{}' is not a finite number", text(0)))),
        },
        "json" => serde_json::to_string(&arg(0))
            .map(Value::String)
            .map_err(|e| fail(e.to_string())),
        "parse" => serde_json::from_str(&text(0)).map_err(|e| fail(format!("parse(): {}", e))),
        "keys" => match arg(0) {
            Value::Object(o) => Ok(Value::Array(o.keys().cloned().map(Value::String).collect())),
            _ => Ok(Value::Array(Vec::new())),
        },
        "values" => match arg(0) {
            Value::Object(o) => Ok(Value::Array(o.values().cloned().collect())),
            Value::Array(a) => Ok(Value::Array(a)),
            _ => Ok(Value::Array(Vec::new())),
        },
        "range" => {
            let (start, end) = if args.len() > 1 {
                (as_number(&arg(0))?, as_number(&arg(1))?)
            } else {
                (0.0, as_number(&arg(0))?)
            };
            if !start.is_finite() || !end.is_finite() {
                return Err(fail("range() bounds must be finite numbers"));
            }
            if end - start > RANGE_LIMIT as f64 {
                return Err(fail(format!("range() is limited to {} items", RANGE_LIMIT)));
            }
            let (start, end) = (start.trunc(), end.trunc());
            let count = if end > start { (end - start) as usize } else { 0 };
            Ok(Value::Array((0..count).map(|i| number(start + i as f64)).collect()))
        }
        "concat" => {
            if !matches!(args.first(), Some(Value::Array(_))) {
                return Ok(Value::String(args.iter().map(stringify).collect()));
            }
            let mut out = Vec::new();
            for a in args {
                match a {
                    Value::Array(items) => out.extend(items),
                    other => out.push(other),
                }
            }
            Ok(Value::Array(out))
        }
        "join" => match arg(0) {
            Value::Array(items) => {
                let sep = if args.len() > 1 { text(1) } else { ",".to_string() };
                Ok(Value::String(
                    items.iter().map(stringify).collect::<Vec<_>>().join(&sep),
                ))
            }
            other => Err(fail(format!("join() of {}", type_name(&other)))),
        },
        "split" => {
            let s = text(0);
            let sep = text(1);
            let parts: Vec<Value> = if sep.is_empty() {
                s.chars().map(|c| Value::String(c.to_string())).collect()
            } else {
                s.split(sep.as_str()).map(|p| Value::String(p.to_string())).collect()
            };
            Ok(Value::Array(parts))
        }
        "lower" => Ok(Value::String(text(0).to_lowercase())),
        "upper" => Ok(Value::String(text(0).to_uppercase())),
        "trim" => Ok(Value::String(text(0).trim().to_string())),
        "escape" => Ok(Value::String(escape_text(&text(0)))),
        "contains" => Ok(Value::Bool(match (arg(0), arg(1)) {
            (Value::String(s), needle) => s.contains(stringify(&needle).as_str()),
            (Value::Array(items), needle) => items.iter().any(|i| loose_eq(i, &needle)),
            (Value::Object(o), key) => o.contains_key(&stringify(&key)),
            _ => false,
        })),
        "starts_with" => Ok(Value::Bool(text(0).starts_with(text(1).as_str()))),
        "default" => Ok(match arg(0) {
            Value::Null => arg(1),
            v => v,
        }),
        _ => Err(fail(format!("unknown function '{}'", name))),
    }
}
