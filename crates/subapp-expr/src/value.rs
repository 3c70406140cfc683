#![forbid(unsafe_code)]

//! Dynamic values shared between scopes and expressions.
//!
//! Composite values (`Array`, `Object`, `Function`, `Host`) are reference
//! types: cloning a [`Value`] clones the handle, not the contents. This is what
//! gives the two comparison notions their meaning:
//!
//! - [`Value::identical`]: primitives by value, composites by pointer.
//! - [`Value::equals`]: recursive structural comparison.
//!
//! # Invariants
//!
//! 1. `NaN` is identical to `NaN`, so a watch on a `NaN`-valued expression
//!    settles instead of firing on every pass.
//! 2. `identical(a, b)` implies `equals(a, b)`.
//! 3. `deep_copy()` never shares an `Array` or `Object` with its source;
//!    functions and host handles are shared. Cycles are copied as cycles.
//! 4. Walks over composites (`equals`, `deep_copy`, `to_json`,
//!    `to_js_string`, `Debug`) terminate on self-referential values.
//!
//! # Failure Modes
//!
//! | Failure | Effect |
//! |---------|--------|
//! | Array write past [`MAX_ARRAY_INDEX`] or more than [`MAX_ARRAY_GAP`] past the end | `EvalError::IndexOutOfRange`, array unchanged |
//! | Nesting deeper than [`MAX_VALUE_DEPTH`] | `equals` reports unequal |

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::eval::EvalError;

/// Largest array index, as in JavaScript (`2^32 - 2`).
pub const MAX_ARRAY_INDEX: usize = 4_294_967_294;

/// Most holes a single array write may open past the current end.
pub const MAX_ARRAY_GAP: usize = 1024;

/// Deepest composite nesting `equals` descends into.
pub const MAX_VALUE_DEPTH: usize = 512;

/// Shared, mutable array storage.
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

/// Shared, mutable object storage with ordered keys.
pub type ObjectRef = Rc<RefCell<BTreeMap<String, Value>>>;

type NativeFn = dyn Fn(&[Value]) -> Result<Value, EvalError>;

/// A host function callable from expressions.
#[derive(Clone)]
pub struct Callable(Rc<NativeFn>);

impl Callable {
    /// Wrap a closure.
    pub fn new(f: impl Fn(&[Value]) -> Result<Value, EvalError> + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Invoke with positional arguments.
    pub fn call(&self, args: &[Value]) -> Result<Value, EvalError> {
        (self.0)(args)
    }

    /// Whether both handles point at the same function.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callable(..)")
    }
}

/// An opaque handle to a host object (a scope, an element, an injector).
///
/// Expressions can pass it around but cannot look inside it.
#[derive(Clone)]
pub struct HostRef {
    label: &'static str,
    inner: Rc<dyn Any>,
}

impl HostRef {
    /// Wrap a host object under a short descriptive label.
    pub fn new<T: Any>(label: &'static str, value: T) -> Self {
        Self {
            label,
            inner: Rc::new(value),
        }
    }

    /// Descriptive label given at construction.
    #[must_use]
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Borrow the wrapped object if it has type `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Whether both handles wrap the same allocation.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for HostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Host({})", self.label)
    }
}

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    /// Absent property or missing result.
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(ArrayRef),
    Object(ObjectRef),
    Function(Callable),
    Host(HostRef),
}

impl Value {
    /// Build a string value.
    pub fn string(s: impl AsRef<str>) -> Self {
        Self::String(Rc::from(s.as_ref()))
    }

    /// Build a fresh array.
    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Self::Array(Rc::new(RefCell::new(items.into_iter().collect())))
    }

    /// Build a fresh object from key/value pairs.
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Object(Rc::new(RefCell::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        )))
    }

    /// Build a function value.
    pub fn function(f: impl Fn(&[Value]) -> Result<Value, EvalError> + 'static) -> Self {
        Self::Function(Callable::new(f))
    }

    /// Wrap an opaque host object.
    pub fn host<T: Any>(label: &'static str, value: T) -> Self {
        Self::Host(HostRef::new(label, value))
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// `undefined` or `null`.
    #[must_use]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// Whether the value is an array or object.
    #[must_use]
    pub fn is_composite(&self) -> bool {
        matches!(self, Self::Array(_) | Self::Object(_))
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(&**s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_host(&self) -> Option<&HostRef> {
        match self {
            Self::Host(h) => Some(h),
            _ => None,
        }
    }

    /// Short type tag, used in diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Function(_) => "function",
            Self::Host(h) => h.label(),
        }
    }

    /// JavaScript truthiness.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Numeric coercion used by arithmetic and relational operators.
    #[must_use]
    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Number(n) => *n,
            Self::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
            _ => f64::NAN,
        }
    }

    /// Identity comparison: primitives by value, composites by pointer.
    #[must_use]
    pub fn identical(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            (Self::Host(a), Self::Host(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Structural comparison.
    ///
    /// Object keys starting with `$` and function-valued object entries are
    /// ignored on both sides. A pair of composites met again while it is
    /// still being compared counts as equal.
    #[must_use]
    pub fn equals(&self, other: &Self) -> bool {
        self.equals_within(other, &mut Vec::new())
    }

    fn equals_within(&self, other: &Self, open: &mut Vec<(usize, usize)>) -> bool {
        if self.identical(other) {
            return true;
        }
        let (Some(a), Some(b)) = (self.address(), other.address()) else {
            return false;
        };
        if open.contains(&(a, b)) {
            return true;
        }
        if open.len() >= MAX_VALUE_DEPTH {
            return false;
        }
        open.push((a, b));
        let equal = match (self, other) {
            (Self::Array(a), Self::Array(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(x, y)| x.equals_within(y, open))
            }
            (Self::Object(a), Self::Object(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                let significant = |map: &BTreeMap<String, Value>| {
                    map.iter()
                        .filter(|(k, v)| !k.starts_with('$') && !matches!(v, Value::Function(_)))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect::<Vec<_>>()
                };
                let (a, b) = (significant(&a), significant(&b));
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && va.equals_within(vb, open))
            }
            _ => false,
        };
        open.pop();
        equal
    }

    /// Recursive copy of arrays and objects.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        self.copy_with(&mut BTreeMap::new())
    }

    fn copy_with(&self, copies: &mut BTreeMap<usize, Value>) -> Self {
        if let Some(copy) = self.address().and_then(|a| copies.get(&a)) {
            return copy.clone();
        }
        match self {
            Self::Array(items) => {
                let copy: ArrayRef = Rc::default();
                copies.insert(addr(items), Self::Array(Rc::clone(&copy)));
                let filled = items
                    .borrow()
                    .iter()
                    .map(|v| v.copy_with(copies))
                    .collect();
                *copy.borrow_mut() = filled;
                Self::Array(copy)
            }
            Self::Object(map) => {
                let copy: ObjectRef = Rc::default();
                copies.insert(addr(map), Self::Object(Rc::clone(&copy)));
                let filled = map
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.copy_with(copies)))
                    .collect();
                *copy.borrow_mut() = filled;
                Self::Object(copy)
            }
            other => other.clone(),
        }
    }

    /// Allocation address of an array or object, used to detect cycles.
    fn address(&self) -> Option<usize> {
        match self {
            Self::Array(items) => Some(addr(items)),
            Self::Object(map) => Some(addr(map)),
            _ => None,
        }
    }

    /// Read a named member: object key, array index or `length`.
    #[must_use]
    pub fn member(&self, key: &str) -> Value {
        match self {
            Self::Object(map) => map.borrow().get(key).cloned().unwrap_or_default(),
            Self::Array(items) => {
                let items = items.borrow();
                if key == "length" {
                    return Value::Number(items.len() as f64);
                }
                key.parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or_default()
            }
            Self::String(s) if key == "length" => Value::Number(s.chars().count() as f64),
            _ => Value::Undefined,
        }
    }

    /// Write a named member. Writes into primitives, and non-index keys on
    /// arrays, are ignored.
    ///
    /// # Errors
    ///
    /// `EvalError::IndexOutOfRange` for an array index past
    /// [`MAX_ARRAY_INDEX`] or more than [`MAX_ARRAY_GAP`] past the end.
    pub fn set_member(&self, key: &str, value: Value) -> Result<(), EvalError> {
        match self {
            Self::Object(map) => {
                map.borrow_mut().insert(key.to_string(), value);
            }
            Self::Array(items) if is_index_key(key) => {
                let mut items = items.borrow_mut();
                let length = items.len();
                let out_of_range = || EvalError::IndexOutOfRange {
                    index: key.to_string(),
                    length,
                };
                let index = key
                    .parse::<usize>()
                    .ok()
                    .filter(|&i| i <= MAX_ARRAY_INDEX && i <= length.saturating_add(MAX_ARRAY_GAP))
                    .ok_or_else(out_of_range)?;
                if index >= length {
                    let grown = index.checked_add(1).ok_or_else(out_of_range)?;
                    items.resize(grown, Value::Undefined);
                }
                items[index] = value;
            }
            _ => {}
        }
        Ok(())
    }

    /// JavaScript `ToString`, used by `+` concatenation. An array nested
    /// in itself joins as empty.
    #[must_use]
    pub fn to_js_string(&self) -> String {
        self.js_string_within(&mut Vec::new())
    }

    fn js_string_within(&self, open: &mut Vec<usize>) -> String {
        match self {
            Self::Undefined => "undefined".into(),
            Self::Null => "null".into(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::String(s) => s.to_string(),
            Self::Array(items) => {
                let address = addr(items);
                if open.contains(&address) {
                    return String::new();
                }
                open.push(address);
                let joined = items
                    .borrow()
                    .iter()
                    .map(|v| {
                        if v.is_nullish() {
                            String::new()
                        } else {
                            v.js_string_within(open)
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(",");
                open.pop();
                joined
            }
            Self::Object(_) => "[object Object]".into(),
            Self::Function(_) => "function".into(),
            Self::Host(h) => format!("[host {}]", h.label()),
        }
    }

    /// Conversion to JSON. Integral numbers serialize without a fraction;
    /// functions, host handles and back-references become `null`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        self.json_within(&mut Vec::new())
    }

    fn json_within(&self, open: &mut Vec<usize>) -> serde_json::Value {
        let Some(address) = self.address() else {
            return self.json_leaf();
        };
        if open.contains(&address) {
            return serde_json::Value::Null;
        }
        open.push(address);
        let json = match self {
            Self::Array(items) => serde_json::Value::Array(
                items.borrow().iter().map(|v| v.json_within(open)).collect(),
            ),
            Self::Object(map) => serde_json::Value::Object(
                map.borrow()
                    .iter()
                    .filter(|(k, v)| !k.starts_with('$') && !v.is_undefined())
                    .map(|(k, v)| (k.clone(), v.json_within(open)))
                    .collect(),
            ),
            other => other.json_leaf(),
        };
        open.pop();
        json
    }

    fn json_leaf(&self) -> serde_json::Value {
        match self {
            Self::Undefined | Self::Null | Self::Function(_) | Self::Host(_) => {
                serde_json::Value::Null
            }
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
                serde_json::Value::Number(serde_json::Number::from(*n as i64))
            }
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(s) => serde_json::Value::String(s.to_string()),
            Self::Array(_) | Self::Object(_) => self.to_json(),
        }
    }
}

fn addr<T>(rc: &Rc<T>) -> usize {
    Rc::as_ptr(rc).cast::<()>() as usize
}

/// Canonical array index text: digits without a leading zero.
fn is_index_key(key: &str) -> bool {
    !key.is_empty()
        && key.bytes().all(|b| b.is_ascii_digit())
        && (key == "0" || !key.starts_with('0'))
}

/// Format a number the way JavaScript's `Number#toString` does for the
/// common cases.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".into()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".into() } else { "-Infinity".into() }
    } else if n == 0.0 {
        "0".into()
    } else {
        format!("{n}")
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        DebugWithin {
            value: self,
            open: &RefCell::new(Vec::new()),
        }
        .fmt(f)
    }
}

/// `Debug` walker that prints `[Circular]` for back-references.
struct DebugWithin<'a> {
    value: &'a Value,
    open: &'a RefCell<Vec<usize>>,
}

impl fmt::Debug for DebugWithin<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = self.open;
        if let Some(address) = self.value.address() {
            if open.borrow().contains(&address) {
                return f.write_str("[Circular]");
            }
            open.borrow_mut().push(address);
        }
        let result = match self.value {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Array(items) => f
                .debug_list()
                .entries(items.borrow().iter().map(|value| DebugWithin { value, open }))
                .finish(),
            Value::Object(map) => f
                .debug_map()
                .entries(
                    map.borrow()
                        .iter()
                        .map(|(k, value)| (k, DebugWithin { value, open })),
                )
                .finish(),
            Value::Function(c) => c.fmt(f),
            Value::Host(h) => h.fmt(f),
        };
        if self.value.address().is_some() {
            open.borrow_mut().pop();
        }
        result
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(Rc::from(s))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::array(items)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::from(s),
            serde_json::Value::Array(items) => Self::array(items.into_iter().map(Self::from)),
            serde_json::Value::Object(map) => {
                Self::object(map.into_iter().map(|(k, v)| (k, Self::from(v))))
            }
        }
    }
}
