#![forbid(unsafe_code)]

//! Watch registration.
//!
//! A watch pairs a [`WatchSource`] with a listener. During a digest the
//! source is re-read and, when the value differs from the previous read
//! under the chosen [`Equality`], the listener fires with `(new, old)`.
//!
//! # Invariants
//!
//! 1. The first check after registration always fires, with `old == new`.
//! 2. A structural watch stores a deep copy, so later mutation of the
//!    watched composite is detected.
//! 3. [`Deregistration::deregister`] is idempotent and safe after the scope
//!    is gone.
//!
//! # Failure Modes
//!
//! | Failure | Effect |
//! |---------|--------|
//! | Source fails to evaluate | `Failure::Eval` recorded, watch skipped for the round |
//! | Listener returns `Err` | failure recorded, round still counts as dirty |

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use subapp_expr::{EvalError, Expression, Value};

use crate::error::Failure;
use crate::events::EventListener;
use crate::scope::{Scope, ScopeInner};

type GetterFn = dyn Fn(&Scope) -> Result<Value, EvalError>;

/// Callback fired with `(new_value, old_value)`.
pub type WatchListener = dyn FnMut(&Value, &Value) -> Result<(), Failure>;

/// What a watch reads.
#[derive(Clone)]
pub enum WatchSource {
    /// A parsed expression evaluated against the scope.
    Expression(Expression),
    /// A property looked up by name (with ancestor fallback).
    Property(String),
    /// An arbitrary host closure.
    Getter(Rc<GetterFn>),
}

impl WatchSource {
    pub fn getter(f: impl Fn(&Scope) -> Result<Value, EvalError> + 'static) -> Self {
        Self::Getter(Rc::new(f))
    }

    pub(crate) fn read(&self, scope: &Scope) -> Result<Value, EvalError> {
        match self {
            Self::Expression(expr) => expr.evaluate(scope),
            Self::Property(name) => Ok(scope.get(name)),
            Self::Getter(f) => f(scope),
        }
    }
}

impl fmt::Debug for WatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expression(expr) => write!(f, "Expression({})", expr.source()),
            Self::Property(name) => write!(f, "Property({name})"),
            Self::Getter(_) => f.write_str("Getter(..)"),
        }
    }
}

impl From<Expression> for WatchSource {
    fn from(expr: Expression) -> Self {
        Self::Expression(expr)
    }
}

impl From<&str> for WatchSource {
    fn from(name: &str) -> Self {
        Self::Property(name.to_string())
    }
}

impl From<String> for WatchSource {
    fn from(name: String) -> Self {
        Self::Property(name)
    }
}

/// How consecutive reads of a watch are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Equality {
    /// Primitives by value, composites by reference.
    #[default]
    Identity,
    /// Recursive comparison against a stored deep copy.
    Structural,
}

impl Equality {
    /// `Structural` when `structural` is set, `Identity` otherwise.
    #[must_use]
    pub fn from_flag(structural: bool) -> Self {
        if structural {
            Self::Structural
        } else {
            Self::Identity
        }
    }

    #[must_use]
    pub fn same(self, a: &Value, b: &Value) -> bool {
        match self {
            Self::Identity => a.identical(b),
            Self::Structural => a.equals(b),
        }
    }

    fn snapshot(self, value: &Value) -> Value {
        match self {
            Self::Identity => value.clone(),
            Self::Structural => value.deep_copy(),
        }
    }
}

pub(crate) struct Watcher {
    pub(crate) seq: u64,
    source: WatchSource,
    equality: Equality,
    last: RefCell<Option<Value>>,
    listener: RefCell<Box<WatchListener>>,
    pub(crate) live: Cell<bool>,
}

impl Watcher {
    /// Re-read the source and fire the listener on change.
    ///
    /// Returns whether the listener fired.
    pub(crate) fn check(&self, scope: &Scope, failures: &mut Vec<Failure>) -> bool {
        let value = match self.source.read(scope) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(
                    scope = scope.id(),
                    source = ?self.source,
                    error = %err,
                    "watch source failed"
                );
                failures.push(Failure::Eval(err));
                return false;
            }
        };

        let previous = {
            let last = self.last.borrow();
            match &*last {
                Some(last) if self.equality.same(last, &value) => return false,
                Some(last) => last.clone(),
                None => value.clone(),
            }
        };
        *self.last.borrow_mut() = Some(self.equality.snapshot(&value));

        tracing::trace!(scope = scope.id(), source = ?self.source, "watch fired");
        let mut listener = self.listener.borrow_mut();
        if let Err(failure) = (*listener)(&value, &previous) {
            failures.push(failure);
        }
        true
    }
}

impl Scope {
    /// Register a watch on this scope.
    ///
    /// The listener first fires on the next digest that covers this scope.
    /// Watching on a destroyed scope returns an inactive handle.
    pub fn watch(
        &self,
        source: impl Into<WatchSource>,
        listener: impl FnMut(&Value, &Value) -> Result<(), Failure> + 'static,
        equality: Equality,
    ) -> Deregistration {
        let watcher = Rc::new(Watcher {
            seq: self.0.tree.next_seq(),
            source: source.into(),
            equality,
            last: RefCell::new(None),
            listener: RefCell::new(Box::new(listener)),
            live: Cell::new(!self.is_destroyed()),
        });
        if self.is_destroyed() {
            return Deregistration::inactive();
        }
        self.0.watchers.borrow_mut().push(Rc::clone(&watcher));
        Deregistration::new(Target::Watch {
            scope: Rc::downgrade(&self.0),
            watcher: Rc::downgrade(&watcher),
        })
    }
}

enum Target {
    Watch {
        scope: Weak<ScopeInner>,
        watcher: Weak<Watcher>,
    },
    Event {
        scope: Weak<ScopeInner>,
        name: String,
        listener: Weak<EventListener>,
    },
}

/// Handle that removes a watch or event listener.
///
/// Dropping the handle leaves the registration in place; call
/// [`deregister`](Self::deregister) to remove it.
pub struct Deregistration {
    target: RefCell<Option<Target>>,
}

impl Deregistration {
    fn new(target: Target) -> Self {
        Self {
            target: RefCell::new(Some(target)),
        }
    }

    pub(crate) fn for_listener(
        scope: &Scope,
        name: &str,
        listener: &Rc<EventListener>,
    ) -> Self {
        Self::new(Target::Event {
            scope: Rc::downgrade(&scope.0),
            name: name.to_string(),
            listener: Rc::downgrade(listener),
        })
    }

    /// A handle with nothing to remove.
    #[must_use]
    pub fn inactive() -> Self {
        Self {
            target: RefCell::new(None),
        }
    }

    /// Whether the registration is still in place.
    #[must_use]
    pub fn is_active(&self) -> bool {
        match &*self.target.borrow() {
            None => false,
            Some(Target::Watch { watcher, .. }) => {
                watcher.upgrade().is_some_and(|w| w.live.get())
            }
            Some(Target::Event { listener, .. }) => {
                listener.upgrade().is_some_and(|l| l.live.get())
            }
        }
    }

    /// Remove the registration. Subsequent calls do nothing.
    pub fn deregister(&self) {
        let Some(target) = self.target.borrow_mut().take() else {
            return;
        };
        match target {
            Target::Watch { scope, watcher } => {
                let Some(watcher) = watcher.upgrade() else {
                    return;
                };
                watcher.live.set(false);
                if let Some(scope) = scope.upgrade() {
                    scope.watchers.borrow_mut().retain(|w| !Rc::ptr_eq(w, &watcher));
                }
            }
            Target::Event {
                scope,
                name,
                listener,
            } => {
                let Some(listener) = listener.upgrade() else {
                    return;
                };
                listener.live.set(false);
                if let Some(scope) = scope.upgrade() {
                    let mut listeners = scope.listeners.borrow_mut();
                    if let Some(list) = listeners.get_mut(&name) {
                        list.retain(|l| !Rc::ptr_eq(l, &listener));
                        if list.is_empty() {
                            listeners.remove(&name);
                        }
                    }
                }
            }
        }
    }
}

impl fmt::Debug for Deregistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deregistration")
            .field("active", &self.is_active())
            .finish()
    }
}
