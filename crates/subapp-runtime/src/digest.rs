#![forbid(unsafe_code)]

//! Digest passes.
//!
//! A digest runs rounds until the tree settles. Each round first drains the
//! pending write queue, then checks every live watcher of the scope and its
//! descendants in registration order. A round is dirty when any listener
//! fired; the digest ends after the first clean round that leaves the queue
//! empty.
//!
//! # Failure Modes
//!
//! | Failure | Result |
//! |---------|--------|
//! | Digest on a destroyed scope | `EngineError::Destroyed` |
//! | Digest started from inside a digest of the same tree | `EngineError::DigestInProgress` |
//! | Still dirty after `ttl` rounds | `EngineError::Unstable` |
//! | Callback or write failures | `EngineError::Failed` once settled |

use std::rc::Rc;
use std::time::Duration;

use web_time::Instant;

use crate::error::{EngineError, Failure};
use crate::queue::Applied;
use crate::scope::{Scope, Tree};
use crate::watch::Watcher;

/// Summary of a completed digest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DigestReport {
    /// Rounds run, including the final clean one.
    pub rounds: usize,
    /// Listener invocations.
    pub fired: usize,
    /// Pending writes applied.
    pub writes_applied: usize,
    /// Pending writes dropped (cancelled or targeting a destroyed scope).
    pub writes_skipped: usize,
    pub elapsed: Duration,
}

/// Marks the tree as digesting for the lifetime of the guard.
struct DigestGuard {
    tree: Rc<Tree>,
}

impl DigestGuard {
    fn enter(tree: &Rc<Tree>) -> Result<Self, EngineError> {
        if tree.digesting.replace(true) {
            return Err(EngineError::DigestInProgress);
        }
        Ok(Self {
            tree: Rc::clone(tree),
        })
    }
}

impl Drop for DigestGuard {
    fn drop(&mut self) {
        self.tree.digesting.set(false);
    }
}

impl Scope {
    /// Whether a digest of this scope's tree is running.
    #[must_use]
    pub fn is_digesting(&self) -> bool {
        self.0.tree.digesting.get()
    }

    /// Run a digest over this scope and its descendants.
    ///
    /// # Errors
    ///
    /// See the module-level failure table.
    pub fn digest(&self) -> Result<DigestReport, EngineError> {
        if self.is_destroyed() {
            return Err(EngineError::Destroyed);
        }
        let _guard = DigestGuard::enter(&self.0.tree)?;
        let _span = tracing::debug_span!("digest", tree = self.0.tree.id, scope = self.0.id)
            .entered();

        let started = Instant::now();
        let ttl = self.0.tree.config.ttl;
        let mut report = DigestReport::default();
        let mut failures = Vec::new();

        loop {
            report.rounds += 1;
            self.drain_queue(&mut report, &mut failures);

            let mut dirty = false;
            for (scope, watcher) in self.live_watchers() {
                if !watcher.live.get() {
                    continue;
                }
                if watcher.check(&scope, &mut failures) {
                    report.fired += 1;
                    dirty = true;
                }
            }

            if !dirty && self.pending_writes() == 0 {
                break;
            }
            if report.rounds > ttl {
                tracing::warn!(tree = self.0.tree.id, ttl, "digest did not settle");
                return Err(EngineError::Unstable { ttl });
            }
        }

        report.elapsed = started.elapsed();
        tracing::debug!(
            rounds = report.rounds,
            fired = report.fired,
            writes = report.writes_applied,
            failures = failures.len(),
            "digest settled"
        );
        if failures.is_empty() {
            Ok(report)
        } else {
            Err(EngineError::Failed(failures))
        }
    }

    fn drain_queue(&self, report: &mut DigestReport, failures: &mut Vec<Failure>) {
        while let Some(pending) = self.next_pending() {
            match pending.apply() {
                Ok(Applied::Written) => report.writes_applied += 1,
                Ok(Applied::Skipped) => report.writes_skipped += 1,
                Err(failure) => {
                    report.writes_applied += 1;
                    failures.push(failure);
                }
            }
        }
    }

    /// Snapshot of live watchers in the subtree, in registration order.
    fn live_watchers(&self) -> Vec<(Scope, Rc<Watcher>)> {
        let mut all: Vec<(Scope, Rc<Watcher>)> = self
            .subtree()
            .into_iter()
            .flat_map(|scope| {
                let watchers = scope.0.watchers.borrow().clone();
                watchers.into_iter().map(move |w| (scope.clone(), w))
            })
            .collect();
        all.sort_by_key(|(_, w)| w.seq);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::watch::{Equality, WatchSource};
    use std::cell::{Cell, RefCell};
    use subapp_expr::{EvalError, Expression, Value};
    use tracing_test::traced_test;

    fn root() -> Scope {
        Scope::new_root(EngineConfig::default())
    }

    #[test]
    fn settles_after_a_clean_round() {
        let scope = root();
        scope.set("a", 1);
        let _w = scope.watch("a", |_, _| Ok(()), Equality::Identity);
        let report = scope.digest().unwrap();
        assert_eq!(report.rounds, 2);
        assert_eq!(report.fired, 1);
        let report = scope.digest().unwrap();
        assert_eq!(report.rounds, 1);
        assert_eq!(report.fired, 0);
    }

    #[test]
    fn listener_writes_are_seen_in_the_same_digest() {
        let scope = root();
        scope.set("a", 1);
        let writer = scope.clone();
        let _w = scope.watch(
            "a",
            move |new, _| {
                writer.set("b", Value::Number(new.to_number() * 2.0));
                Ok(())
            },
            Equality::Identity,
        );
        let seen = Rc::new(Cell::new(0.0));
        let sink = Rc::clone(&seen);
        let _r = scope.watch(
            "b",
            move |new, _| {
                sink.set(new.to_number());
                Ok(())
            },
            Equality::Identity,
        );
        scope.digest().unwrap();
        assert_eq!(seen.get(), 2.0);
    }

    #[test]
    fn watchers_fire_in_registration_order_across_scopes() {
        let root = root();
        let child = root.new_child();
        let order = Rc::new(RefCell::new(Vec::new()));
        for (scope, label) in [(&child, "child-1"), (&root, "root"), (&child, "child-2")] {
            let order = Rc::clone(&order);
            let _ = scope.watch(
                "x",
                move |_, _| {
                    order.borrow_mut().push(label);
                    Ok(())
                },
                Equality::Identity,
            );
        }
        root.digest().unwrap();
        assert_eq!(*order.borrow(), vec!["child-1", "root", "child-2"]);
    }

    #[test]
    fn child_digest_does_not_check_parent_watchers() {
        let root = root();
        let child = root.new_child();
        let fired = Rc::new(Cell::new(0));
        let count = Rc::clone(&fired);
        let _w = root.watch(
            "x",
            move |_, _| {
                count.set(count.get() + 1);
                Ok(())
            },
            Equality::Identity,
        );
        child.digest().unwrap();
        assert_eq!(fired.get(), 0);
        root.digest().unwrap();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn unstable_watch_hits_ttl() {
        let scope = Scope::new_root(EngineConfig::default().with_ttl(3));
        scope.set("n", 0);
        let writer = scope.clone();
        let _w = scope.watch(
            "n",
            move |new, _| {
                writer.set("n", Value::Number(new.to_number() + 1.0));
                Ok(())
            },
            Equality::Identity,
        );
        assert_eq!(scope.digest(), Err(EngineError::Unstable { ttl: 3 }));
        assert!(!scope.is_digesting());
    }

    #[test]
    #[traced_test]
    fn unstable_digest_logs_a_warning() {
        let scope = Scope::new_root(EngineConfig::default().with_ttl(2));
        let writer = scope.clone();
        let _w = scope.watch(
            WatchSource::getter(|s| Ok(Value::array([s.get("seed")]))),
            move |_, _| {
                writer.set("touched", true);
                Ok(())
            },
            Equality::Identity,
        );
        assert!(matches!(scope.digest(), Err(EngineError::Unstable { ttl: 2 })));
        assert!(logs_contain("digest did not settle"));
    }

    #[test]
    fn nested_digest_of_same_tree_is_rejected() {
        let root = root();
        let child = root.new_child();
        let nested = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&nested);
        let inner = child.clone();
        let _w = root.watch(
            "x",
            move |_, _| {
                *slot.borrow_mut() = Some(inner.digest());
                Ok(())
            },
            Equality::Identity,
        );
        root.digest().unwrap();
        assert_eq!(
            nested.borrow_mut().take(),
            Some(Err(EngineError::DigestInProgress))
        );
    }

    #[test]
    fn digest_of_another_tree_from_a_listener_is_allowed() {
        let parent = root();
        let other = root();
        other.schedule_set("y", 1);
        let target = other.clone();
        let _w = parent.watch(
            "x",
            move |_, _| target.digest().map(|_| ()).map_err(Failure::Engine),
            Equality::Identity,
        );
        parent.digest().unwrap();
        assert_eq!(other.get("y"), Value::from(1));
    }

    #[test]
    fn failures_are_collected_after_settling() {
        let scope = root();
        let boom = Value::function(|_| Err(EvalError::Host("boom".into())));
        scope.set("boom", boom);
        let later = Rc::new(Cell::new(false));
        let flag = Rc::clone(&later);
        let _bad = scope.watch(
            Expression::parse("boom()").unwrap(),
            |_, _| Ok(()),
            Equality::Identity,
        );
        let _good = scope.watch(
            "x",
            move |_, _| {
                flag.set(true);
                Ok(())
            },
            Equality::Identity,
        );
        let err = scope.digest().unwrap_err();
        assert!(later.get());
        assert!(!err.failures().is_empty());
        assert!(err.failures().iter().all(
            |f| matches!(f, Failure::Eval(EvalError::Host(msg)) if msg == "boom")
        ));
    }

    #[test]
    fn destroyed_scope_cannot_digest() {
        let scope = root();
        scope.destroy();
        assert_eq!(scope.digest(), Err(EngineError::Destroyed));
    }

    #[test]
    fn watcher_removed_mid_round_does_not_fire() {
        let scope = root();
        let fired = Rc::new(Cell::new(false));
        let flag = Rc::clone(&fired);
        let second = Rc::new(RefCell::new(None::<crate::watch::Deregistration>));
        let remover = Rc::clone(&second);
        let _first = scope.watch(
            "x",
            move |_, _| {
                if let Some(handle) = remover.borrow().as_ref() {
                    handle.deregister();
                }
                Ok(())
            },
            Equality::Identity,
        );
        *second.borrow_mut() = Some(scope.watch(
            "x",
            move |_, _| {
                flag.set(true);
                Ok(())
            },
            Equality::Identity,
        ));
        scope.digest().unwrap();
        assert!(!fired.get());
    }
}
