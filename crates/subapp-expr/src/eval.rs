//! Tree-walking evaluation against a property context.
//!
//! Evaluation is forgiving in the same places binding expressions are
//! expected to be: reading through `undefined`/`null` yields `undefined`, and
//! calling an `undefined` member yields `undefined`. Calling any other
//! non-function value is an [`EvalError`].

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;

use crate::ast::{BinaryOp, Expr, Literal, LogicalOp, UnaryOp};
use crate::value::Value;

/// A named-property container expressions read from and assign into.
pub trait Context {
    /// Read a property. Missing properties are `Value::Undefined`.
    fn lookup(&self, name: &str) -> Value;

    /// Write a property.
    fn store(&self, name: &str, value: Value);
}

/// Errors raised while evaluating a well-formed expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// The callee of a call expression is not a function.
    NotCallable { callee: String, found: &'static str },
    /// A host function reported a failure.
    Host(String),
    /// An array write too far past the end of the array.
    IndexOutOfRange { index: String, length: usize },
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotCallable { callee, found } => {
                write!(f, "'{callee}' is not a function (found {found})")
            }
            Self::Host(msg) => write!(f, "host function failed: {msg}"),
            Self::IndexOutOfRange { index, length } => {
                write!(f, "index {index} is out of range for an array of length {length}")
            }
        }
    }
}

impl std::error::Error for EvalError {}

/// Standalone property map, handy for evaluating outside a scope.
#[derive(Debug, Default)]
pub struct Vars {
    values: RefCell<BTreeMap<String, Value>>,
}

impl Vars {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(self, name: &str, value: impl Into<Value>) -> Self {
        self.store(name, value.into());
        self
    }
}

impl Context for Vars {
    fn lookup(&self, name: &str) -> Value {
        self.values.borrow().get(name).cloned().unwrap_or_default()
    }

    fn store(&self, name: &str, value: Value) {
        self.values.borrow_mut().insert(name.to_string(), value);
    }
}

/// Named locals layered over another context.
///
/// Reads hit the locals first. Writes to a name that exists as a local stay
/// local; everything else falls through to the underlying context.
pub struct Locals<'a> {
    parent: &'a dyn Context,
    locals: RefCell<BTreeMap<String, Value>>,
}

impl<'a> Locals<'a> {
    pub fn new(parent: &'a dyn Context) -> Self {
        Self {
            parent,
            locals: RefCell::new(BTreeMap::new()),
        }
    }

    /// Builder-style local definition.
    #[must_use]
    pub fn with(self, name: &str, value: impl Into<Value>) -> Self {
        self.locals
            .borrow_mut()
            .insert(name.to_string(), value.into());
        self
    }
}

impl Context for Locals<'_> {
    fn lookup(&self, name: &str) -> Value {
        match self.locals.borrow().get(name) {
            Some(value) => value.clone(),
            None => self.parent.lookup(name),
        }
    }

    fn store(&self, name: &str, value: Value) {
        let mut locals = self.locals.borrow_mut();
        if locals.contains_key(name) {
            locals.insert(name.to_string(), value);
        } else {
            drop(locals);
            self.parent.store(name, value);
        }
    }
}

pub(crate) fn evaluate(expr: &Expr, ctx: &dyn Context) -> Result<Value, EvalError> {
    Ok(match expr {
        Expr::Literal(lit) => literal(lit),
        Expr::Identifier(name) => ctx.lookup(name),
        Expr::Member { object, property } => evaluate(object, ctx)?.member(property),
        Expr::Index { object, index } => {
            let object = evaluate(object, ctx)?;
            let key = evaluate(index, ctx)?;
            object.member(&property_key(&key))
        }
        Expr::Call { callee, args } => call(callee, args, ctx)?,
        Expr::Array(items) => Value::array(
            items
                .iter()
                .map(|item| evaluate(item, ctx))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Expr::Object(entries) => Value::object(
            entries
                .iter()
                .map(|(key, value)| Ok((key.clone(), evaluate(value, ctx)?)))
                .collect::<Result<Vec<_>, EvalError>>()?,
        ),
        Expr::Unary { op, operand } => {
            let value = evaluate(operand, ctx)?;
            match op {
                UnaryOp::Not => Value::Bool(!value.is_truthy()),
                UnaryOp::Negate => Value::Number(-value.to_number()),
                UnaryOp::Plus => Value::Number(value.to_number()),
            }
        }
        Expr::Binary { op, left, right } => {
            let left = evaluate(left, ctx)?;
            let right = evaluate(right, ctx)?;
            binary(*op, &left, &right)
        }
        Expr::Logical { op, left, right } => {
            let left = evaluate(left, ctx)?;
            match (op, left.is_truthy()) {
                (LogicalOp::And, false) | (LogicalOp::Or, true) => left,
                _ => evaluate(right, ctx)?,
            }
        }
        Expr::Conditional {
            test,
            consequent,
            alternate,
        } => {
            if evaluate(test, ctx)?.is_truthy() {
                evaluate(consequent, ctx)?
            } else {
                evaluate(alternate, ctx)?
            }
        }
    })
}

/// Assign into a settable location. The caller has already checked
/// [`Expr::is_assignable`]; any other shape is ignored.
pub(crate) fn assign(expr: &Expr, ctx: &dyn Context, value: Value) -> Result<(), EvalError> {
    match expr {
        Expr::Identifier(name) => ctx.store(name, value),
        Expr::Member { object, property } => {
            container_for(object, ctx)?.set_member(property, value)?;
        }
        Expr::Index { object, index } => {
            let key = property_key(&evaluate(index, ctx)?);
            container_for(object, ctx)?.set_member(&key, value)?;
        }
        _ => {}
    }
    Ok(())
}

/// Resolve the object an assignment writes into, creating empty objects for
/// missing intermediate path segments.
fn container_for(path: &Expr, ctx: &dyn Context) -> Result<Value, EvalError> {
    let current = evaluate(path, ctx)?;
    if !current.is_nullish() {
        return Ok(current);
    }
    let created = Value::object(Vec::<(String, Value)>::new());
    assign(path, ctx, created.clone())?;
    Ok(created)
}

fn literal(lit: &Literal) -> Value {
    match lit {
        Literal::Undefined => Value::Undefined,
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Number(n) => Value::Number(*n),
        Literal::String(s) => Value::string(s),
    }
}

fn property_key(key: &Value) -> String {
    match key {
        Value::String(s) => s.to_string(),
        other => other.to_js_string(),
    }
}

fn call(callee: &Expr, args: &[Expr], ctx: &dyn Context) -> Result<Value, EvalError> {
    let function = evaluate(callee, ctx)?;
    let args = args
        .iter()
        .map(|arg| evaluate(arg, ctx))
        .collect::<Result<Vec<_>, _>>()?;
    match function {
        Value::Function(f) => f.call(&args),
        Value::Undefined | Value::Null => Ok(Value::Undefined),
        other => Err(EvalError::NotCallable {
            callee: describe_callee(callee),
            found: other.type_name(),
        }),
    }
}

fn describe_callee(callee: &Expr) -> String {
    match callee {
        Expr::Identifier(name) => name.clone(),
        Expr::Member { object, property } => format!("{}.{property}", describe_callee(object)),
        Expr::Index { object, .. } => format!("{}[..]", describe_callee(object)),
        _ => "<expression>".to_string(),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => add(left, right),
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
            Value::Bool(compare(op, left, right))
        }
        BinaryOp::Eq => Value::Bool(loose_eq(left, right)),
        BinaryOp::Ne => Value::Bool(!loose_eq(left, right)),
        BinaryOp::StrictEq => Value::Bool(strict_eq(left, right)),
        BinaryOp::StrictNe => Value::Bool(!strict_eq(left, right)),
    }
}

/// `+` skips an `undefined` operand, so `"Hello " + name` renders as
/// `"Hello "` before `name` is set.
fn add(left: &Value, right: &Value) -> Value {
    match (left.is_undefined(), right.is_undefined()) {
        (true, true) => return Value::Undefined,
        (false, true) => return left.clone(),
        (true, false) => return right.clone(),
        (false, false) => {}
    }
    let stringy = |v: &Value| matches!(v, Value::String(_) | Value::Array(_) | Value::Object(_));
    if stringy(left) || stringy(right) {
        Value::from(format!("{}{}", left.to_js_string(), right.to_js_string()))
    } else {
        Value::Number(left.to_number() + right.to_number())
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> bool {
    if let (Value::String(a), Value::String(b)) = (left, right) {
        return match op {
            BinaryOp::Lt => a < b,
            BinaryOp::Gt => a > b,
            BinaryOp::Le => a <= b,
            _ => a >= b,
        };
    }
    let (a, b) = (left.to_number(), right.to_number());
    match op {
        BinaryOp::Lt => a < b,
        BinaryOp::Gt => a > b,
        BinaryOp::Le => a <= b,
        _ => a >= b,
    }
}

fn strict_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a == b,
        _ => left.identical(right),
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (a, b) if a.is_nullish() && b.is_nullish() => true,
        (a, b) if a.is_nullish() || b.is_nullish() => false,
        (Value::Number(_) | Value::String(_) | Value::Bool(_), Value::Number(_) | Value::String(_) | Value::Bool(_))
            if std::mem::discriminant(left) != std::mem::discriminant(right) =>
        {
            left.to_number() == right.to_number()
        }
        _ => strict_eq(left, right),
    }
}
