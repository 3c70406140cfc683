#![forbid(unsafe_code)]

//! Scope trees.
//!
//! A [`Scope`] is a named-property container. Scopes form a tree; the root
//! owns the tree-wide state (configuration, pending write queue, digest
//! flag) and every descendant shares it.
//!
//! # Ownership
//!
//! Parents hold their children strongly, children hold their parent weakly.
//! Watchers and listeners frequently capture scope handles of their own or
//! another tree; those references are released when the owning scope is
//! destroyed, so long-lived trees should be destroyed rather than dropped.
//!
//! # Invariants
//!
//! 1. Property reads fall back to ancestors; writes are always local.
//! 2. `destroy()` is idempotent. After it returns the scope and its whole
//!    subtree report zero watchers and zero listeners.
//! 3. Destroy hooks of a subtree run children first, then the scope's own
//!    hooks in registration order.
//! 4. Destroying a root empties the tree's pending write queue.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use subapp_expr::{Context, EvalError, Expression, Value};

use crate::config::EngineConfig;
use crate::events::EventListener;
use crate::queue::Pending;
use crate::watch::Watcher;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// State shared by every scope of one tree.
pub(crate) struct Tree {
    pub(crate) id: u64,
    pub(crate) config: EngineConfig,
    pub(crate) queue: RefCell<VecDeque<Pending>>,
    pub(crate) digesting: Cell<bool>,
    next_seq: Cell<u64>,
}

impl Tree {
    /// Registration sequence number, unique within the tree.
    pub(crate) fn next_seq(&self) -> u64 {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        seq
    }
}

type DestroyHook = Box<dyn FnOnce()>;

pub(crate) struct ScopeInner {
    pub(crate) id: u64,
    pub(crate) tree: Rc<Tree>,
    parent: Option<Weak<ScopeInner>>,
    children: RefCell<Vec<Scope>>,
    properties: RefCell<AHashMap<String, Value>>,
    pub(crate) watchers: RefCell<Vec<Rc<Watcher>>>,
    pub(crate) listeners: RefCell<AHashMap<String, Vec<Rc<EventListener>>>>,
    destroy_hooks: RefCell<Vec<DestroyHook>>,
    destroyed: Cell<bool>,
}

/// Handle to a scope. Clones share the same scope.
#[derive(Clone)]
pub struct Scope(pub(crate) Rc<ScopeInner>);

impl Scope {
    /// Create the root scope of a new tree.
    #[must_use]
    pub fn new_root(config: EngineConfig) -> Self {
        let tree = Rc::new(Tree {
            id: next_id(),
            config,
            queue: RefCell::new(VecDeque::new()),
            digesting: Cell::new(false),
            next_seq: Cell::new(0),
        });
        Self::with_tree(tree, None)
    }

    /// Create a child scope in the same tree.
    #[must_use]
    pub fn new_child(&self) -> Self {
        let child = Self::with_tree(Rc::clone(&self.0.tree), Some(Rc::downgrade(&self.0)));
        if !self.is_destroyed() {
            self.0.children.borrow_mut().push(child.clone());
        }
        child
    }

    fn with_tree(tree: Rc<Tree>, parent: Option<Weak<ScopeInner>>) -> Self {
        Self(Rc::new(ScopeInner {
            id: next_id(),
            tree,
            parent,
            children: RefCell::new(Vec::new()),
            properties: RefCell::new(AHashMap::new()),
            watchers: RefCell::new(Vec::new()),
            listeners: RefCell::new(AHashMap::new()),
            destroy_hooks: RefCell::new(Vec::new()),
            destroyed: Cell::new(false),
        }))
    }

    /// Process-unique scope id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Process-unique id of the tree this scope belongs to.
    #[must_use]
    pub fn tree_id(&self) -> u64 {
        self.0.tree.id
    }

    #[must_use]
    pub fn config(&self) -> EngineConfig {
        self.0.tree.config
    }

    #[must_use]
    pub fn parent(&self) -> Option<Scope> {
        self.0.parent.as_ref().and_then(Weak::upgrade).map(Scope)
    }

    /// The topmost reachable ancestor.
    #[must_use]
    pub fn root(&self) -> Scope {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.parent.is_none()
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.0.destroyed.get()
    }

    /// Whether both handles refer to the same scope.
    #[must_use]
    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    #[must_use]
    pub fn same_tree(&self, other: &Scope) -> bool {
        Rc::ptr_eq(&self.0.tree, &other.0.tree)
    }

    #[must_use]
    pub fn children(&self) -> Vec<Scope> {
        self.0.children.borrow().clone()
    }

    /// This scope followed by all of its descendants, depth first.
    pub(crate) fn subtree(&self) -> Vec<Scope> {
        let mut out = Vec::new();
        let mut stack = vec![self.clone()];
        while let Some(scope) = stack.pop() {
            stack.extend(scope.0.children.borrow().iter().rev().cloned());
            out.push(scope);
        }
        out
    }

    /// Read a property, falling back to ancestors.
    #[must_use]
    pub fn get(&self, name: &str) -> Value {
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            if let Some(value) = scope.0.properties.borrow().get(name) {
                return value.clone();
            }
            current = scope.parent();
        }
        Value::Undefined
    }

    /// Read a property of this scope only.
    #[must_use]
    pub fn get_own(&self, name: &str) -> Option<Value> {
        self.0.properties.borrow().get(name).cloned()
    }

    #[must_use]
    pub fn has_own(&self, name: &str) -> bool {
        self.0.properties.borrow().contains_key(name)
    }

    /// Write a property on this scope.
    pub fn set(&self, name: &str, value: impl Into<Value>) {
        self.0
            .properties
            .borrow_mut()
            .insert(name.to_string(), value.into());
    }

    /// Remove a property from this scope, returning its value.
    pub fn remove(&self, name: &str) -> Option<Value> {
        self.0.properties.borrow_mut().remove(name)
    }

    /// Evaluate an expression against this scope.
    pub fn evaluate(&self, expr: &Expression) -> Result<Value, EvalError> {
        expr.evaluate(self)
    }

    /// Wrap this scope as an opaque host value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::host("scope", self.clone())
    }

    /// Recover a scope from a value built by [`Scope::to_value`].
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Scope> {
        value.as_host()?.downcast_ref::<Scope>().cloned()
    }

    /// Register a callback run when this scope is destroyed.
    ///
    /// On an already destroyed scope the callback runs immediately.
    pub fn on_destroy(&self, hook: impl FnOnce() + 'static) {
        if self.is_destroyed() {
            hook();
        } else {
            self.0.destroy_hooks.borrow_mut().push(Box::new(hook));
        }
    }

    /// Destroy this scope and its subtree.
    pub fn destroy(&self) {
        if self.0.destroyed.replace(true) {
            return;
        }
        let _span = tracing::debug_span!("scope_destroy", scope = self.0.id).entered();

        for child in self.children() {
            child.destroy();
        }

        let hooks = std::mem::take(&mut *self.0.destroy_hooks.borrow_mut());
        for hook in hooks {
            hook();
        }

        let watchers = std::mem::take(&mut *self.0.watchers.borrow_mut());
        for watcher in &watchers {
            watcher.live.set(false);
        }
        let listeners = std::mem::take(&mut *self.0.listeners.borrow_mut());
        for listener in listeners.values().flatten() {
            listener.live.set(false);
        }

        if let Some(parent) = self.parent() {
            parent.0.children.borrow_mut().retain(|c| !c.ptr_eq(self));
        }
        if self.is_root() {
            let dropped = self.0.tree.queue.borrow_mut().drain(..).count();
            if dropped > 0 {
                tracing::trace!(tree = self.0.tree.id, dropped, "pending writes discarded");
            }
        }
        tracing::debug!(
            scope = self.0.id,
            watchers = watchers.len(),
            "scope destroyed"
        );
    }

    /// Live watchers registered directly on this scope.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.0
            .watchers
            .borrow()
            .iter()
            .filter(|w| w.live.get())
            .count()
    }

    /// Live watchers on this scope and all of its descendants.
    #[must_use]
    pub fn total_watcher_count(&self) -> usize {
        self.subtree().iter().map(Scope::watcher_count).sum()
    }

    /// Live event listeners registered directly on this scope.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.0
            .listeners
            .borrow()
            .values()
            .flatten()
            .filter(|l| l.live.get())
            .count()
    }
}

impl Context for Scope {
    fn lookup(&self, name: &str) -> Value {
        self.get(name)
    }

    fn store(&self, name: &str, value: Value) {
        self.set(name, value);
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.0.id)
            .field("tree", &self.0.tree.id)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Scope {}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> Scope {
        Scope::new_root(EngineConfig::default())
    }

    #[test]
    fn reads_fall_back_to_ancestors() {
        let root = root();
        let child = root.new_child();
        root.set("name", "parent");
        assert_eq!(child.get("name"), Value::from("parent"));
        child.set("name", "child");
        assert_eq!(child.get("name"), Value::from("child"));
        assert_eq!(root.get("name"), Value::from("parent"));
        assert!(child.get_own("other").is_none());
    }

    #[test]
    fn context_writes_stay_local() {
        let root = root();
        let child = root.new_child();
        let expr = Expression::parse("user.name").unwrap();
        expr.assign(&child, Value::from("x")).unwrap();
        assert!(root.get_own("user").is_none());
        assert_eq!(child.evaluate(&expr).unwrap(), Value::from("x"));
    }

    #[test]
    fn children_share_the_tree() {
        let root = root();
        let child = root.new_child();
        let other = Scope::new_root(EngineConfig::default());
        assert!(child.same_tree(&root));
        assert!(!other.same_tree(&root));
        assert_eq!(child.root(), root);
        assert!(!child.is_root());
    }

    #[test]
    fn scope_round_trips_through_value() {
        let root = root();
        let value = root.to_value();
        assert_eq!(value.type_name(), "scope");
        assert_eq!(Scope::from_value(&value), Some(root));
        assert_eq!(Scope::from_value(&Value::from(1)), None);
    }

    #[test]
    fn destroy_runs_children_first_and_is_idempotent() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let root = root();
        let child = root.new_child();
        for (scope, label) in [(&root, "root-1"), (&child, "child"), (&root, "root-2")] {
            let log = Rc::clone(&log);
            scope.on_destroy(move || log.borrow_mut().push(label));
        }
        root.destroy();
        root.destroy();
        assert_eq!(*log.borrow(), vec!["child", "root-1", "root-2"]);
        assert!(child.is_destroyed());
    }

    #[test]
    fn destroying_a_child_detaches_it() {
        let root = root();
        let child = root.new_child();
        child.destroy();
        assert!(root.children().is_empty());
        assert!(!root.is_destroyed());
    }

    #[test]
    fn on_destroy_after_destroy_runs_immediately() {
        let root = root();
        root.destroy();
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        root.on_destroy(move || flag.set(true));
        assert!(ran.get());
    }
}
