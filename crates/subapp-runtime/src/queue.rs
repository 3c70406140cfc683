#![forbid(unsafe_code)]

//! Pending write queue.
//!
//! Writes destined for a tree are never applied from the middle of another
//! pass. They are queued on the tree and applied at the start of each round
//! of that tree's next digest, so the round's watchers observe them.
//!
//! # Invariants
//!
//! 1. Writes are applied in the order they were scheduled.
//! 2. A write whose [`CancelToken`] is cancelled, or whose target scope is
//!    destroyed, is dropped without being applied.
//! 3. Writes scheduled while the queue is draining are applied in the same
//!    drain.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use subapp_expr::Value;

use crate::error::Failure;
use crate::scope::Scope;

/// Destination for a deferred write that is not a plain property.
///
/// Implementors decide how the value lands (typically by assigning through
/// an expression) and report failures as a [`Failure`].
pub trait WriteSink {
    /// Apply the value.
    fn write(&self, value: Value) -> Result<(), Failure>;

    /// Whether the sink can still accept writes.
    fn is_live(&self) -> bool {
        true
    }
}

/// A deferred write.
pub enum PendingWrite {
    /// Set `name` on `target`.
    Property {
        target: Scope,
        name: String,
        value: Value,
    },
    /// Hand `value` to a sink.
    Upstream { sink: Rc<dyn WriteSink>, value: Value },
}

impl PendingWrite {
    pub fn property(target: &Scope, name: &str, value: Value) -> Self {
        Self::Property {
            target: target.clone(),
            name: name.to_string(),
            value,
        }
    }
}

impl fmt::Debug for PendingWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Property {
                target,
                name,
                value,
            } => f
                .debug_struct("Property")
                .field("target", &target.id())
                .field("name", name)
                .field("value", value)
                .finish(),
            Self::Upstream { value, .. } => {
                f.debug_struct("Upstream").field("value", value).finish()
            }
        }
    }
}

/// Shared cancellation flag for a group of pending writes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Rc<Cell<bool>>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.set(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.get()
    }
}

pub(crate) struct Pending {
    write: PendingWrite,
    token: Option<CancelToken>,
}

pub(crate) enum Applied {
    Written,
    Skipped,
}

impl Pending {
    pub(crate) fn apply(self) -> Result<Applied, Failure> {
        if self.token.as_ref().is_some_and(CancelToken::is_cancelled) {
            tracing::trace!(write = ?self.write, "cancelled write skipped");
            return Ok(Applied::Skipped);
        }
        match self.write {
            PendingWrite::Property {
                target,
                name,
                value,
            } => {
                if target.is_destroyed() {
                    tracing::trace!(scope = target.id(), %name, "write into destroyed scope skipped");
                    return Ok(Applied::Skipped);
                }
                tracing::trace!(scope = target.id(), %name, ?value, "property write");
                target.set(&name, value);
                Ok(Applied::Written)
            }
            PendingWrite::Upstream { sink, value } => {
                if !sink.is_live() {
                    tracing::trace!("write into dead sink skipped");
                    return Ok(Applied::Skipped);
                }
                sink.write(value)?;
                Ok(Applied::Written)
            }
        }
    }
}

impl Scope {
    /// Queue a write for this tree's next digest round.
    ///
    /// Writes scheduled on a destroyed scope are dropped.
    pub fn schedule(&self, write: PendingWrite) {
        self.enqueue(write, None);
    }

    /// Like [`Scope::schedule`], but the write is dropped if `token` is
    /// cancelled before it is applied.
    pub fn schedule_cancellable(&self, write: PendingWrite, token: &CancelToken) {
        self.enqueue(write, Some(token.clone()));
    }

    /// Queue `self[name] = value`.
    pub fn schedule_set(&self, name: &str, value: impl Into<Value>) {
        self.schedule(PendingWrite::property(self, name, value.into()));
    }

    /// Writes queued on this tree and not yet applied.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.0.tree.queue.borrow().len()
    }

    fn enqueue(&self, write: PendingWrite, token: Option<CancelToken>) {
        if self.is_destroyed() {
            tracing::trace!(scope = self.id(), ?write, "schedule on destroyed scope ignored");
            return;
        }
        self.0
            .tree
            .queue
            .borrow_mut()
            .push_back(Pending { write, token });
    }

    pub(crate) fn next_pending(&self) -> Option<Pending> {
        self.0.tree.queue.borrow_mut().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use proptest::prelude::*;
    use std::cell::RefCell;

    struct Recorder(RefCell<Vec<Value>>);

    impl WriteSink for Recorder {
        fn write(&self, value: Value) -> Result<(), Failure> {
            self.0.borrow_mut().push(value);
            Ok(())
        }
    }

    #[test]
    fn writes_wait_for_the_next_digest() {
        let scope = Scope::new_root(EngineConfig::default());
        scope.schedule_set("foo", "bar");
        assert!(scope.get("foo").is_undefined());
        assert_eq!(scope.pending_writes(), 1);
        let report = scope.digest().unwrap();
        assert_eq!(scope.get("foo"), Value::from("bar"));
        assert_eq!(report.writes_applied, 1);
        assert_eq!(scope.pending_writes(), 0);
    }

    #[test]
    fn queue_is_shared_by_the_tree() {
        let root = Scope::new_root(EngineConfig::default());
        let child = root.new_child();
        child.schedule_set("x", 1);
        assert_eq!(root.pending_writes(), 1);
        root.digest().unwrap();
        assert_eq!(child.get_own("x"), Some(Value::from(1)));
    }

    #[test]
    fn cancelled_writes_are_skipped() {
        let scope = Scope::new_root(EngineConfig::default());
        let token = CancelToken::new();
        scope.schedule_cancellable(PendingWrite::property(&scope, "a", Value::from(1)), &token);
        scope.schedule_set("b", 2);
        token.cancel();
        let report = scope.digest().unwrap();
        assert!(scope.get("a").is_undefined());
        assert_eq!(scope.get("b"), Value::from(2));
        assert_eq!(report.writes_applied, 1);
        assert_eq!(report.writes_skipped, 1);
    }

    #[test]
    fn writes_into_destroyed_scopes_are_skipped() {
        let root = Scope::new_root(EngineConfig::default());
        let child = root.new_child();
        root.schedule(PendingWrite::property(&child, "a", Value::from(1)));
        child.destroy();
        root.digest().unwrap();
        assert!(child.get_own("a").is_none());
    }

    #[test]
    fn upstream_writes_reach_the_sink_in_order() {
        let scope = Scope::new_root(EngineConfig::default());
        let sink = Rc::new(Recorder(RefCell::new(Vec::new())));
        for n in 1..=3 {
            scope.schedule(PendingWrite::Upstream {
                sink: sink.clone(),
                value: Value::from(n),
            });
        }
        scope.digest().unwrap();
        assert_eq!(
            *sink.0.borrow(),
            vec![Value::from(1), Value::from(2), Value::from(3)]
        );
    }

    #[test]
    fn destroying_the_root_clears_the_queue() {
        let root = Scope::new_root(EngineConfig::default());
        root.schedule_set("a", 1);
        root.destroy();
        assert_eq!(root.pending_writes(), 0);
        root.schedule_set("a", 1);
        assert_eq!(root.pending_writes(), 0);
    }

    proptest! {
        #[test]
        fn last_scheduled_write_wins(values in proptest::collection::vec(-1000i32..1000, 1..20)) {
            let scope = Scope::new_root(EngineConfig::default());
            for v in &values {
                scope.schedule_set("n", *v);
            }
            let report = scope.digest().unwrap();
            prop_assert_eq!(report.writes_applied, values.len());
            prop_assert_eq!(scope.get("n"), Value::from(*values.last().unwrap()));
        }
    }
}
