//! Tree-walking interpreter.
//!
//! Results are [`Item`]s rather than bare JSON so that "undefined" (a missing
//! path) stays distinct from `null`, and lambdas can flow into higher-order
//! built-ins without ever becoming JSON.

use std::cell::Cell;
use std::cmp::Ordering;
use std::sync::Arc;

use serde_json::{Map, Number, Value};

use super::ast::{BinaryOp, Expr, Lambda, UnaryOp};
use super::context::ExpressionContext;
use super::functions::FunctionTable;

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

/// A lambda together with the variables visible where it was written.
#[derive(Debug, Clone)]
pub struct Closure {
    pub lambda: Arc<Lambda>,
    captured: Scope,
}

#[derive(Debug, Clone, Default)]
pub enum Item {
    #[default]
    Undefined,
    Value(Value),
    Function(Closure),
}

impl Item {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Item::Undefined)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Item::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Convert to JSON. Undefined becomes `None`; functions are an error.
    pub fn into_json(self) -> Result<Option<Value>, EvalError> {
        match self {
            Item::Undefined => Ok(None),
            Item::Value(v) => Ok(Some(v)),
            Item::Function(_) => Err(EvalError::message(
                "a function cannot be used as a value",
            )),
        }
    }
}

impl From<Value> for Item {
    fn from(v: Value) -> Self {
        Item::Value(v)
    }
}

impl From<Option<Value>> for Item {
    fn from(v: Option<Value>) -> Self {
        v.map(Item::Value).unwrap_or(Item::Undefined)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Evaluation failure before the expression text is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    Message(String),
    UnknownFunction(String),
    Arity { name: String, message: String },
}

impl EvalError {
    pub fn message(msg: impl Into<String>) -> Self {
        EvalError::Message(msg.into())
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Lambda parameter bindings, innermost last.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    vars: Vec<(String, Item)>,
}

impl Scope {
    fn lookup(&self, name: &str) -> Option<&Item> {
        self.vars.iter().rev().find(|(k, _)| k == name).map(|(_, v)| v)
    }
}

// ---------------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------------

/// Deepest evaluation the interpreter allows, counting lambda calls.
pub const MAX_EVAL_DEPTH: usize = 128;

pub struct Interpreter<'a> {
    ctx: &'a ExpressionContext,
    functions: &'a FunctionTable,
    depth: Cell<usize>,
}

impl<'a> Interpreter<'a> {
    pub fn new(ctx: &'a ExpressionContext, functions: &'a FunctionTable) -> Self {
        Self {
            ctx,
            functions,
            depth: Cell::new(0),
        }
    }

    pub fn context(&self) -> &ExpressionContext {
        self.ctx
    }

    /// Evaluate a whole expression at top level.
    pub fn run(&self, expr: &Expr) -> Result<Item, EvalError> {
        self.eval(expr, &Scope::default())
    }

    /// Invoke a function item with positional arguments.
    ///
    /// Missing parameters are bound to undefined; extra arguments are
    /// ignored, so `function($v) {..}` works with callers that pass
    /// `(value, index, array)`.
    pub fn apply(&self, f: &Item, args: Vec<Item>) -> Result<Item, EvalError> {
        let Item::Function(closure) = f else {
            return Err(EvalError::message("expected a function argument"));
        };
        let mut scope = closure.captured.clone();
        let mut args = args.into_iter();
        for param in &closure.lambda.params {
            scope
                .vars
                .push((param.clone(), args.next().unwrap_or_default()));
        }
        self.eval(&closure.lambda.body, &scope)
    }

    fn eval(&self, expr: &Expr, scope: &Scope) -> Result<Item, EvalError> {
        let depth = self.depth.get();
        if depth >= MAX_EVAL_DEPTH {
            return Err(EvalError::message(format!(
                "evaluation nested more than {MAX_EVAL_DEPTH} levels deep"
            )));
        }
        self.depth.set(depth + 1);
        let result = self.eval_node(expr, scope);
        self.depth.set(depth);
        result
    }

    fn eval_node(&self, expr: &Expr, scope: &Scope) -> Result<Item, EvalError> {
        match expr {
            Expr::Literal(v) => Ok(Item::Value(v.clone())),

            Expr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(v) = self.eval(item, scope)?.into_json()? {
                        out.push(v);
                    }
                }
                Ok(Item::Value(Value::Array(out)))
            }

            Expr::Object(entries) => {
                let mut out = Map::new();
                for (key, value) in entries {
                    let key = match self.eval(key, scope)? {
                        Item::Value(Value::String(s)) => s,
                        Item::Value(other) => stringify(&other),
                        _ => return Err(EvalError::message("object keys must be strings")),
                    };
                    if let Some(v) = self.eval(value, scope)?.into_json()? {
                        out.insert(key, v);
                    }
                }
                Ok(Item::Value(Value::Object(out)))
            }

            Expr::Name(name) => Ok(self.ctx.lookup(name).cloned().into()),

            Expr::Variable(name) => {
                if name.is_empty() {
                    return Ok(Item::Value(self.ctx.root_value()));
                }
                if let Some(item) = scope.lookup(name) {
                    return Ok(item.clone());
                }
                Ok(self.ctx.variable(name).into())
            }

            Expr::Field(base, field) => {
                let base = self.eval(base, scope)?;
                Ok(field_of(base.as_value(), field))
            }

            Expr::Index(base, index) => {
                let base = self.eval(base, scope)?;
                let index = self.eval(index, scope)?;
                Ok(index_of(base.as_value(), index.as_value()))
            }

            Expr::Call { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, scope)?);
                }
                if let Some(f @ Item::Function(_)) = scope.lookup(name) {
                    return self.apply(f, values);
                }
                self.functions.call(name, self, values)
            }

            Expr::Lambda(lambda) => Ok(Item::Function(Closure {
                lambda: Arc::clone(lambda),
                captured: scope.clone(),
            })),

            Expr::Unary(UnaryOp::Not, operand) => {
                let v = self.eval(operand, scope)?;
                Ok(Item::Value(Value::Bool(!truthy(&v))))
            }

            Expr::Unary(UnaryOp::Neg, operand) => match self.eval(operand, scope)? {
                Item::Undefined => Ok(Item::Undefined),
                Item::Value(v) => {
                    let n = as_number(&v)
                        .ok_or_else(|| EvalError::message(format!("cannot negate {}", type_name(&v))))?;
                    Ok(Item::Value(number(-n)?))
                }
                Item::Function(_) => Err(EvalError::message("cannot negate a function")),
            },

            Expr::Binary(BinaryOp::And, lhs, rhs) => {
                if !truthy(&self.eval(lhs, scope)?) {
                    return Ok(Item::Value(Value::Bool(false)));
                }
                Ok(Item::Value(Value::Bool(truthy(&self.eval(rhs, scope)?))))
            }

            Expr::Binary(BinaryOp::Or, lhs, rhs) => {
                if truthy(&self.eval(lhs, scope)?) {
                    return Ok(Item::Value(Value::Bool(true)));
                }
                Ok(Item::Value(Value::Bool(truthy(&self.eval(rhs, scope)?))))
            }

            Expr::Binary(op, lhs, rhs) => {
                let l = self.eval(lhs, scope)?;
                let r = self.eval(rhs, scope)?;
                binary(*op, l, r)
            }

            Expr::Conditional {
                test,
                then,
                otherwise,
            } => {
                if truthy(&self.eval(test, scope)?) {
                    self.eval(then, scope)
                } else if let Some(otherwise) = otherwise {
                    self.eval(otherwise, scope)
                } else {
                    Ok(Item::Undefined)
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Path steps
// ---------------------------------------------------------------------------

/// `base.field`. Arrays map the step across elements and flatten one level.
fn field_of(base: Option<&Value>, field: &str) -> Item {
    match base {
        Some(Value::Object(map)) => map.get(field).cloned().into(),
        Some(Value::Array(items)) => {
            let mut out = Vec::new();
            for item in items {
                if let Item::Value(v) = field_of(Some(item), field) {
                    match v {
                        Value::Array(inner) => out.extend(inner),
                        other => out.push(other),
                    }
                }
            }
            if out.is_empty() {
                Item::Undefined
            } else {
                Item::Value(Value::Array(out))
            }
        }
        _ => Item::Undefined,
    }
}

fn index_of(base: Option<&Value>, index: Option<&Value>) -> Item {
    match (base, index) {
        (Some(Value::Array(items)), Some(Value::Number(n))) => {
            let Some(i) = n.as_f64().map(|f| f.floor() as i64) else {
                return Item::Undefined;
            };
            let len = items.len() as i64;
            let i = if i < 0 { len + i } else { i };
            if (0..len).contains(&i) {
                Item::Value(items[i as usize].clone())
            } else {
                Item::Undefined
            }
        }
        (Some(base @ (Value::Object(_) | Value::Array(_))), Some(Value::String(key))) => {
            field_of(Some(base), key)
        }
        _ => Item::Undefined,
    }
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

fn binary(op: BinaryOp, l: Item, r: Item) -> Result<Item, EvalError> {
    if matches!(l, Item::Function(_)) || matches!(r, Item::Function(_)) {
        return Err(EvalError::message("functions cannot be used as operands"));
    }
    let lv = l.as_value();
    let rv = r.as_value();

    let result = match op {
        BinaryOp::Eq => Value::Bool(loose_eq(lv, rv)),
        BinaryOp::NotEq => Value::Bool(!loose_eq(lv, rv)),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let (Some(a), Some(b)) = (lv, rv) else {
                return Ok(Item::Value(Value::Bool(false)));
            };
            let ord = compare(a, b)?;
            Value::Bool(match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::LtEq => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            })
        }
        BinaryOp::In => Value::Bool(contains(rv, lv)),
        BinaryOp::Concat => {
            let mut s = lv.map(stringify).unwrap_or_default();
            s.push_str(&rv.map(stringify).unwrap_or_default());
            Value::String(s)
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            let (Some(a), Some(b)) = (lv, rv) else {
                return Ok(Item::Undefined);
            };
            if let (BinaryOp::Add, Value::String(x), Value::String(y)) = (op, a, b) {
                return Ok(Item::Value(Value::String(format!("{x}{y}"))));
            }
            let x = as_number(a).ok_or_else(|| arith_error(op, a))?;
            let y = as_number(b).ok_or_else(|| arith_error(op, b))?;
            let n = match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                BinaryOp::Mul => x * y,
                BinaryOp::Div if y == 0.0 => return Err(EvalError::message("division by zero")),
                BinaryOp::Div => x / y,
                _ if y == 0.0 => return Err(EvalError::message("modulo by zero")),
                _ => x % y,
            };
            number(n)?
        }
        BinaryOp::And => Value::Bool(lv.is_some_and(truthy_value) && rv.is_some_and(truthy_value)),
        BinaryOp::Or => Value::Bool(lv.is_some_and(truthy_value) || rv.is_some_and(truthy_value)),
    };
    Ok(Item::Value(result))
}

fn arith_error(op: BinaryOp, v: &Value) -> EvalError {
    let symbol = match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        _ => "%",
    };
    EvalError::message(format!(
        "operator '{symbol}' expects numbers, got {}",
        type_name(v)
    ))
}

fn contains(haystack: Option<&Value>, needle: Option<&Value>) -> bool {
    match haystack {
        Some(Value::Array(items)) => items.iter().any(|i| loose_eq(Some(i), needle)),
        Some(Value::String(s)) => needle.is_some_and(|n| s.contains(&stringify(n))),
        Some(Value::Object(map)) => matches!(needle, Some(Value::String(k)) if map.contains_key(k)),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Shared value helpers (also used by the function table)
// ---------------------------------------------------------------------------

/// `false`, `null`, undefined, `0`, `""` and `[]` are falsy.
pub fn truthy(item: &Item) -> bool {
    match item {
        Item::Undefined => false,
        Item::Function(_) => true,
        Item::Value(v) => truthy_value(v),
    }
}

pub fn truthy_value(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

/// Equality with undefined treated as `null` and numbers compared by value.
pub fn loose_eq(a: Option<&Value>, b: Option<&Value>) -> bool {
    let null = Value::Null;
    deep_eq(a.unwrap_or(&null), b.unwrap_or(&null))
}

pub fn deep_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| deep_eq(p, q))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| deep_eq(v, w)))
        }
        _ => a == b,
    }
}

/// Order two numbers or two strings; anything else is a type error.
pub fn compare(a: &Value, b: &Value) -> Result<Ordering, EvalError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal)),
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(EvalError::message(format!(
            "cannot compare {} with {}",
            type_name(a),
            type_name(b)
        ))),
    }
}

pub fn as_number(v: &Value) -> Option<f64> {
    v.as_f64()
}

/// Build a JSON number, keeping integral results as integers.
pub fn number(n: f64) -> Result<Value, EvalError> {
    if !n.is_finite() {
        return Err(EvalError::message("numeric result is not finite"));
    }
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return Ok(Value::Number(Number::from(n as i64)));
    }
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| EvalError::message("numeric result is not representable"))
}

/// String form used by `&`, `$string` and mixed-text templates.
///
/// Strings are unquoted, `null` is empty, containers are compact JSON.
pub fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

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

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
