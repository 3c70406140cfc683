#![forbid(unsafe_code)]

//! Triggers that force a digest of the child tree.
//!
//! Neither trigger writes anything. They exist so the child tree notices
//! writes the bindings already queued for it without waiting for its own
//! digest cadence.
//!
//! # Invariants
//!
//! 1. An [`EventTrigger`] digests the child synchronously inside the
//!    parent's event delivery.
//! 2. An [`ExpressionTrigger`] is only created from a
//!    [`PreparedExpressionTrigger`], which parses up front and registers
//!    nothing until [`install`](PreparedExpressionTrigger::install).
//!
//! # Failure Modes
//!
//! | Failure | Effect |
//! |---------|--------|
//! | Child digest fails | `Failure::Engine` returned to the parent's broadcast or digest |
//! | Child tree destroyed | digest skipped |

use subapp_expr::{Expression, ParseError};
use subapp_runtime::{Deregistration, Equality, Failure, Scope};

fn digest_child(child: &Scope, cause: &str) -> Result<(), Failure> {
    if child.is_destroyed() {
        return Ok(());
    }
    tracing::trace!(child = child.id(), cause, "forcing child digest");
    child.digest().map(|_| ()).map_err(Failure::Engine)
}

/// Digest the child whenever the parent receives an event.
#[derive(Debug)]
pub struct EventTrigger {
    event: String,
    listener: Deregistration,
}

impl EventTrigger {
    pub fn new(parent: &Scope, child: &Scope, event: &str) -> Self {
        let child = child.clone();
        let listener = parent.on(event, move |e| digest_child(&child, &e.name));
        Self {
            event: event.to_string(),
            listener,
        }
    }

    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn deregister(&self) {
        self.listener.deregister();
    }
}

/// A parsed expression trigger that has not registered its watch yet.
#[derive(Debug, Clone)]
pub struct PreparedExpressionTrigger {
    parent: Scope,
    child: Scope,
    expression: Expression,
}

impl PreparedExpressionTrigger {
    /// # Errors
    ///
    /// The parse error for a malformed expression.
    pub fn prepare(parent: &Scope, child: &Scope, expression: &str) -> Result<Self, ParseError> {
        Ok(Self {
            parent: parent.clone(),
            child: child.clone(),
            expression: Expression::parse(expression)?,
        })
    }

    /// Register the parent watch.
    #[must_use]
    pub fn install(self) -> ExpressionTrigger {
        let Self {
            parent,
            child,
            expression,
        } = self;
        let source = expression.source().to_string();
        let cause = source.clone();
        let equality = Equality::from_flag(expression.is_literal_composite());
        let watch = parent.watch(
            expression,
            move |_, _| digest_child(&child, &cause),
            equality,
        );
        ExpressionTrigger { source, watch }
    }
}

/// Digest the child whenever a parent expression changes.
#[derive(Debug)]
pub struct ExpressionTrigger {
    source: String,
    watch: Deregistration,
}

impl ExpressionTrigger {
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn deregister(&self) {
        self.watch.deregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use subapp_expr::Value;
    use subapp_runtime::{EngineConfig, EngineError};

    fn counting_child() -> (Scope, Rc<Cell<usize>>) {
        let child = Scope::new_root(EngineConfig::default());
        let digests = Rc::new(Cell::new(0));
        let seen = Rc::clone(&digests);
        let _ = child.watch(
            subapp_runtime::WatchSource::getter(move |_| {
                seen.set(seen.get() + 1);
                Ok(Value::Null)
            }),
            |_, _| Ok(()),
            Equality::Identity,
        );
        (child, digests)
    }

    #[test]
    fn event_digests_child_synchronously() {
        let parent = Scope::new_root(EngineConfig::default());
        let (child, digests) = counting_child();
        let trigger = EventTrigger::new(&parent, &child, "refresh");
        child.schedule_set("foo", "queued");
        parent.broadcast("refresh").unwrap();
        assert_eq!(child.get("foo"), Value::from("queued"));
        assert!(digests.get() > 0);

        trigger.deregister();
        let before = digests.get();
        parent.broadcast("refresh").unwrap();
        assert_eq!(digests.get(), before);
    }

    #[test]
    fn event_from_a_descendant_scope_is_not_heard() {
        let parent = Scope::new_root(EngineConfig::default());
        let inner = parent.new_child();
        let (child, digests) = counting_child();
        let _t = EventTrigger::new(&parent, &child, "refresh");
        inner.broadcast("refresh").unwrap();
        assert_eq!(digests.get(), 0);
        inner.emit("refresh").unwrap();
        assert!(digests.get() > 0);
    }

    #[test]
    fn prepared_trigger_registers_nothing_until_installed() {
        let parent = Scope::new_root(EngineConfig::default());
        let (child, digests) = counting_child();
        let prepared = PreparedExpressionTrigger::prepare(&parent, &child, "bar").unwrap();
        assert_eq!(parent.watcher_count(), 0);
        let trigger = prepared.install();
        assert_eq!(parent.watcher_count(), 1);
        assert_eq!(trigger.source(), "bar");

        parent.digest().unwrap();
        let after_first = digests.get();
        assert!(after_first > 0);
        parent.digest().unwrap();
        assert_eq!(digests.get(), after_first);
        parent.set("bar", 1);
        parent.digest().unwrap();
        assert!(digests.get() > after_first);
    }

    #[test]
    fn malformed_trigger_expression_fails_to_prepare() {
        let parent = Scope::new_root(EngineConfig::default());
        let child = Scope::new_root(EngineConfig::default());
        assert!(PreparedExpressionTrigger::prepare(&parent, &child, "(").is_err());
    }

    #[test]
    fn digesting_the_same_tree_is_reported() {
        let parent = Scope::new_root(EngineConfig::default());
        let nested = parent.new_child();
        let _t = PreparedExpressionTrigger::prepare(&parent, &nested, "bar")
            .unwrap()
            .install();
        let err = parent.digest().unwrap_err();
        assert_eq!(
            err.failures(),
            &[Failure::Engine(EngineError::DigestInProgress)]
        );
    }

    #[test]
    fn destroyed_child_is_skipped() {
        let parent = Scope::new_root(EngineConfig::default());
        let child = Scope::new_root(EngineConfig::default());
        let _t = EventTrigger::new(&parent, &child, "refresh");
        child.destroy();
        assert_eq!(parent.broadcast("refresh"), Ok(1));
    }
}
