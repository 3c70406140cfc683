#![forbid(unsafe_code)]

//! Two-way binding between a parent expression and a child property.
//!
//! The controller keeps `last_known`, the last value both sides agreed on,
//! and reacts to each side from a watch on that side's tree:
//!
//! - parent changed: record the value and queue it for the child;
//! - child changed: re-read the parent and
//!   - do nothing if the parent already holds the child's value,
//!   - let the parent win if it moved away from `last_known` too,
//!   - otherwise queue the child's value for the parent.
//!
//! Writes always go through the receiving tree's pending queue, so neither
//! side is modified from inside the other's digest.
//!
//! # Invariants
//!
//! 1. A value propagated in one direction never bounces back: once it lands,
//!    both sides compare equal and the child watch stops.
//! 2. When both sides diverge from `last_known` between passes, the child
//!    ends up with the parent's value.
//! 3. Literal composite expressions (`{name: name}`, `[a, b]`) are compared
//!    structurally; everything else by identity.
//! 4. All queued writes carry the binding set's [`CancelToken`], so nothing
//!    lands after teardown.
//!
//! # Failure Modes
//!
//! | Failure | Effect |
//! |---------|--------|
//! | Parent expression does not parse | construction fails with `ParseError` |
//! | Child write to a non-assignable parent | child rolled back, `Failure::NotAssignable` from the parent digest |
//! | Parent expression fails to evaluate | `Failure::Eval` from the digest that noticed |

use std::cell::RefCell;
use std::rc::Rc;

use subapp_expr::{AssignError, Expression, ParseError, Value};
use subapp_runtime::{
    CancelToken, Deregistration, Equality, Failure, PendingWrite, Scope, WriteSink,
};

struct TwoWayState {
    parent: Scope,
    child: Scope,
    property: String,
    expression: Expression,
    comparator: Equality,
    last_known: RefCell<Value>,
    token: CancelToken,
}

impl TwoWayState {
    fn push_to_child(&self, value: Value) {
        self.child.schedule_cancellable(
            PendingWrite::property(&self.child, &self.property, value),
            &self.token,
        );
    }

    fn on_parent_change(&self, value: &Value) {
        tracing::trace!(
            property = %self.property,
            expression = self.expression.source(),
            ?value,
            "parent changed"
        );
        *self.last_known.borrow_mut() = value.clone();
        self.push_to_child(value.clone());
    }

    fn on_child_change(self: &Rc<Self>, value: &Value) -> Result<(), Failure> {
        let parent_value = self.expression.evaluate(&self.parent)?;
        let child_value = self.child.get(&self.property);
        if self.comparator.same(&parent_value, &child_value) {
            return Ok(());
        }

        let parent_moved = !self
            .comparator
            .same(&parent_value, &self.last_known.borrow());
        if parent_moved {
            tracing::debug!(
                property = %self.property,
                expression = self.expression.source(),
                parent = ?parent_value,
                discarded = ?value,
                "conflict, parent value wins"
            );
            *self.last_known.borrow_mut() = parent_value.clone();
            self.push_to_child(parent_value);
        } else {
            tracing::trace!(
                property = %self.property,
                expression = self.expression.source(),
                ?value,
                "child changed"
            );
            *self.last_known.borrow_mut() = value.clone();
            let sink: Rc<dyn WriteSink> = self.clone();
            self.parent.schedule_cancellable(
                PendingWrite::Upstream {
                    sink,
                    value: value.clone(),
                },
                &self.token,
            );
        }
        Ok(())
    }
}

impl WriteSink for TwoWayState {
    fn write(&self, value: Value) -> Result<(), Failure> {
        match self.expression.assign(&self.parent, value) {
            Ok(()) => Ok(()),
            Err(AssignError::NotAssignable(err)) => {
                let last_good = self.expression.evaluate(&self.parent)?;
                tracing::warn!(
                    property = %self.property,
                    expression = self.expression.source(),
                    "child wrote to a non-assignable binding, rolling back"
                );
                *self.last_known.borrow_mut() = last_good.clone();
                self.push_to_child(last_good);
                Err(Failure::NotAssignable(err))
            }
            Err(AssignError::Eval(err)) => Err(Failure::Eval(err)),
        }
    }

    fn is_live(&self) -> bool {
        !self.token.is_cancelled() && !self.parent.is_destroyed()
    }
}

/// A live two-way binding.
pub struct TwoWayBinding {
    state: Rc<TwoWayState>,
    parent_watch: Deregistration,
    child_watch: Deregistration,
}

impl TwoWayBinding {
    /// Parse `expression` and bind it to `child[property]`.
    ///
    /// # Errors
    ///
    /// The parse error for a malformed expression; nothing is registered.
    pub fn new(
        parent: &Scope,
        child: &Scope,
        property: &str,
        expression: &str,
        token: &CancelToken,
    ) -> Result<Self, ParseError> {
        let expression = Expression::parse(expression)?;
        Ok(Self::attach(parent, child, property, expression, token))
    }

    /// Bind an already parsed expression.
    pub fn attach(
        parent: &Scope,
        child: &Scope,
        property: &str,
        expression: Expression,
        token: &CancelToken,
    ) -> Self {
        let comparator = Equality::from_flag(expression.is_literal_composite());
        let state = Rc::new(TwoWayState {
            parent: parent.clone(),
            child: child.clone(),
            property: property.to_string(),
            expression,
            comparator,
            last_known: RefCell::new(Value::Undefined),
            token: token.clone(),
        });

        let on_parent = Rc::clone(&state);
        let parent_watch = parent.watch(
            state.expression.clone(),
            move |new, _| {
                on_parent.on_parent_change(new);
                Ok(())
            },
            comparator,
        );

        let on_child = Rc::clone(&state);
        let child_watch = child.watch(
            property,
            move |new, _| on_child.on_child_change(new),
            Equality::Identity,
        );

        tracing::debug!(
            property,
            expression = state.expression.source(),
            structural = comparator == Equality::Structural,
            "two-way binding attached"
        );
        Self {
            state,
            parent_watch,
            child_watch,
        }
    }

    #[must_use]
    pub fn property(&self) -> &str {
        &self.state.property
    }

    #[must_use]
    pub fn expression(&self) -> &Expression {
        &self.state.expression
    }

    /// The value both sides last agreed on.
    #[must_use]
    pub fn last_known(&self) -> Value {
        self.state.last_known.borrow().clone()
    }

    /// Whether the child-side watch is still registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.child_watch.is_active()
    }

    /// Remove both watches. Idempotent.
    pub fn deregister(&self) {
        self.child_watch.deregister();
        self.parent_watch.deregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use subapp_runtime::{EngineConfig, EngineError};
    use tracing_test::traced_test;

    struct Fixture {
        parent: Scope,
        child: Scope,
        binding: TwoWayBinding,
    }

    fn bind(expression: &str) -> Fixture {
        let parent = Scope::new_root(EngineConfig::default());
        let child = Scope::new_root(EngineConfig::default());
        let binding =
            TwoWayBinding::new(&parent, &child, "foo", expression, &CancelToken::new()).unwrap();
        Fixture {
            parent,
            child,
            binding,
        }
    }

    #[test]
    fn parent_value_reaches_child_on_child_digest() {
        let f = bind("bar");
        f.parent.set("bar", "Hello World");
        f.parent.digest().unwrap();
        assert!(f.child.get("foo").is_undefined());
        f.child.digest().unwrap();
        assert_eq!(f.child.get("foo"), Value::from("Hello World"));
        assert_eq!(f.binding.last_known(), Value::from("Hello World"));
    }

    #[test]
    fn child_value_reaches_parent_on_parent_digest() {
        let f = bind("bar");
        f.parent.set("bar", "");
        f.parent.digest().unwrap();
        f.child.digest().unwrap();

        f.child.set("foo", "Hello World");
        f.child.digest().unwrap();
        assert_eq!(f.parent.get("bar"), Value::from(""));
        f.parent.digest().unwrap();
        assert_eq!(f.parent.get("bar"), Value::from("Hello World"));
    }

    #[test]
    fn conflict_from_child_side_keeps_parent() {
        let f = bind("bar");
        f.parent.set("bar", "");
        f.parent.digest().unwrap();
        f.child.digest().unwrap();

        f.parent.set("bar", "Hello World");
        f.child.set("foo", "Goodbye World");
        f.child.digest().unwrap();
        assert_eq!(f.child.get("foo"), Value::from("Hello World"));
        f.parent.digest().unwrap();
        assert_eq!(f.parent.get("bar"), Value::from("Hello World"));
    }

    #[test]
    fn conflict_from_parent_side_keeps_parent() {
        let f = bind("bar");
        f.parent.set("bar", "");
        f.parent.digest().unwrap();
        f.child.digest().unwrap();

        f.parent.set("bar", "Hello World");
        f.child.set("foo", "Goodbye World");
        f.parent.digest().unwrap();
        assert_eq!(f.child.get("foo"), Value::from("Goodbye World"));
        f.child.digest().unwrap();
        assert_eq!(f.child.get("foo"), Value::from("Hello World"));
        f.parent.digest().unwrap();
        assert_eq!(f.parent.get("bar"), Value::from("Hello World"));
    }

    #[test]
    fn nested_parent_path_is_assigned() {
        let f = bind("settings.theme");
        f.parent.digest().unwrap();
        f.child.digest().unwrap();
        f.child.set("foo", "dark");
        f.child.digest().unwrap();
        f.parent.digest().unwrap();
        assert_eq!(
            f.parent.get("settings").member("theme"),
            Value::from("dark")
        );
    }

    #[test]
    fn literal_binding_copies_parent_changes() {
        let f = bind("{name: name}");
        f.parent.set("name", "a");
        f.parent.digest().unwrap();
        f.child.digest().unwrap();
        assert_eq!(f.child.get("foo"), Value::from(json!({"name": "a"})));

        f.parent.set("name", "b");
        f.parent.digest().unwrap();
        f.child.digest().unwrap();
        assert_eq!(f.child.get("foo"), Value::from(json!({"name": "b"})));
    }

    #[test]
    fn literal_binding_keeps_child_value_when_parent_is_unchanged() {
        let f = bind("{name: name}");
        f.parent.set("name", "a");
        f.parent.digest().unwrap();
        f.child.digest().unwrap();
        let before = f.child.get("foo");
        f.parent.digest().unwrap();
        f.child.digest().unwrap();
        assert!(f.child.get("foo").identical(&before));
    }

    #[test]
    #[traced_test]
    fn literal_binding_rejects_child_writes() {
        let f = bind("{name: name}");
        f.parent.set("name", "a");
        f.parent.digest().unwrap();
        f.child.digest().unwrap();

        f.child.set("foo", Value::from(json!({"name": "b"})));
        f.child.digest().unwrap();
        let err = f.parent.digest().unwrap_err();
        assert!(err.has_not_assignable());
        assert_eq!(
            err.failures()[0].to_string(),
            "expression '{name: name}' is not assignable"
        );
        assert!(logs_contain("non-assignable"));

        f.child.digest().unwrap();
        assert_eq!(f.child.get("foo"), Value::from(json!({"name": "a"})));
        assert_eq!(f.parent.get("name"), Value::from("a"));
        assert_eq!(f.parent.digest().map(|_| ()), Ok(()));
    }

    #[test]
    fn every_rejected_write_is_reported() {
        let f = bind("'constant'");
        f.parent.digest().unwrap();
        f.child.digest().unwrap();
        for attempt in ["x", "y"] {
            f.child.set("foo", attempt);
            f.child.digest().unwrap();
            assert!(matches!(f.parent.digest(), Err(EngineError::Failed(_))));
            f.child.digest().unwrap();
            assert_eq!(f.child.get("foo"), Value::from("constant"));
        }
    }

    #[test]
    fn deregister_removes_both_watches() {
        let f = bind("bar");
        assert_eq!(f.parent.watcher_count(), 1);
        assert_eq!(f.child.watcher_count(), 1);
        f.binding.deregister();
        f.binding.deregister();
        assert_eq!(f.parent.watcher_count(), 0);
        assert_eq!(f.child.watcher_count(), 0);
        assert!(!f.binding.is_active());
    }

    #[test]
    fn malformed_expression_registers_nothing() {
        let parent = Scope::new_root(EngineConfig::default());
        let child = Scope::new_root(EngineConfig::default());
        let err = TwoWayBinding::new(&parent, &child, "foo", "a +", &CancelToken::new());
        assert!(err.is_err());
        assert_eq!(parent.watcher_count(), 0);
        assert_eq!(child.watcher_count(), 0);
    }
}
