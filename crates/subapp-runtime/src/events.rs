#![forbid(unsafe_code)]

//! Named events.
//!
//! `broadcast` walks down from a scope through all descendants, `emit`
//! walks up through all ancestors. Delivery is synchronous; listeners run
//! in registration order within a scope.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::{EngineError, Failure};
use crate::scope::Scope;
use crate::watch::Deregistration;

/// An event being delivered.
#[derive(Debug, Clone)]
pub struct Event {
    pub name: String,
    /// Scope the event was broadcast or emitted from.
    pub origin: Scope,
    /// Scope whose listeners are currently running.
    pub current: Scope,
}

type EventFn = dyn FnMut(&Event) -> Result<(), Failure>;

pub(crate) struct EventListener {
    callback: RefCell<Box<EventFn>>,
    pub(crate) live: Cell<bool>,
}

impl Scope {
    /// Listen for `name` on this scope.
    pub fn on(
        &self,
        name: &str,
        callback: impl FnMut(&Event) -> Result<(), Failure> + 'static,
    ) -> Deregistration {
        if self.is_destroyed() {
            return Deregistration::inactive();
        }
        let listener = Rc::new(EventListener {
            callback: RefCell::new(Box::new(callback)),
            live: Cell::new(true),
        });
        self.0
            .listeners
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .push(Rc::clone(&listener));
        Deregistration::for_listener(self, name, &listener)
    }

    /// Deliver `name` to this scope and every descendant.
    ///
    /// Returns the number of listeners invoked.
    ///
    /// # Errors
    ///
    /// [`EngineError::Destroyed`] on a destroyed scope, or
    /// [`EngineError::Failed`] when any listener failed (every listener
    /// still runs).
    pub fn broadcast(&self, name: &str) -> Result<usize, EngineError> {
        let path = self.subtree();
        self.deliver(name, &path)
    }

    /// Deliver `name` to this scope and every ancestor.
    ///
    /// # Errors
    ///
    /// As for [`Scope::broadcast`].
    pub fn emit(&self, name: &str) -> Result<usize, EngineError> {
        let mut path = vec![self.clone()];
        while let Some(parent) = path.last().and_then(Scope::parent) {
            path.push(parent);
        }
        self.deliver(name, &path)
    }

    fn deliver(&self, name: &str, path: &[Scope]) -> Result<usize, EngineError> {
        if self.is_destroyed() {
            return Err(EngineError::Destroyed);
        }
        let _span = tracing::debug_span!("event", %name, origin = self.id()).entered();
        let mut delivered = 0;
        let mut failures = Vec::new();

        for scope in path {
            let listeners = scope
                .0
                .listeners
                .borrow()
                .get(name)
                .cloned()
                .unwrap_or_default();
            if listeners.is_empty() {
                continue;
            }
            let event = Event {
                name: name.to_string(),
                origin: self.clone(),
                current: scope.clone(),
            };
            for listener in listeners {
                if !listener.live.get() {
                    continue;
                }
                delivered += 1;
                let mut callback = listener.callback.borrow_mut();
                if let Err(failure) = (*callback)(&event) {
                    failures.push(failure);
                }
            }
        }

        tracing::trace!(delivered, "event delivered");
        if failures.is_empty() {
            Ok(delivered)
        } else {
            Err(EngineError::Failed(failures))
        }
    }
}
