#![forbid(unsafe_code)]

//! Test harness for subapp.
//!
//! Provides a bootstrap double ([`StaticBootstrap`]), helpers that wire two
//! trees together from attribute lists, a [`settle`] loop that digests
//! several trees until they are quiet, JSON snapshots of scope properties,
//! and `proptest` strategies for property tests.
//!
//! # Example
//!
//! ```
//! use subapp_harness::{bind_pair, snapshot};
//!
//! let pair = bind_pair(&[("bind-foo", "bar")]);
//! pair.parent.set("bar", "Hello");
//! pair.sync().unwrap();
//! assert_eq!(snapshot(&pair.child, &["foo"]), serde_json::json!({"foo": "Hello"}));
//! ```

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use subapp_bind::{
    Attributes, BindingSet, Bootstrap, BootstrapError, ChildTree, DeclarationOptions,
    DeclarationSet, EmbedError, EmbedOptions, Embedding, HostElement,
};
use subapp_expr::Value;
use subapp_runtime::{EngineConfig, EngineError, Scope};

/// Passes [`settle`] allows before giving up.
pub const SETTLE_LIMIT: usize = 16;

// ============================================================================
// Bootstrap double
// ============================================================================

/// Stand-in for a child tree's injector, exposed to observers.
#[derive(Debug, Clone)]
pub struct Injector {
    modules: Vec<String>,
}

impl Injector {
    #[must_use]
    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    /// Recover an injector from an observer argument.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_host()?.downcast_ref::<Self>().cloned()
    }
}

/// Bootstrap that knows a fixed set of modules and records every call.
pub struct StaticBootstrap {
    known: Vec<String>,
    config: EngineConfig,
    created: RefCell<Vec<ChildTree>>,
    disposed: Cell<usize>,
}

impl StaticBootstrap {
    #[must_use]
    pub fn new(known: &[&str]) -> Rc<Self> {
        Self::with_config(known, EngineConfig::default())
    }

    #[must_use]
    pub fn with_config(known: &[&str], config: EngineConfig) -> Rc<Self> {
        Rc::new(Self {
            known: known.iter().map(|m| (*m).to_string()).collect(),
            config,
            created: RefCell::new(Vec::new()),
            disposed: Cell::new(0),
        })
    }

    /// Trees created so far, oldest first.
    #[must_use]
    pub fn created(&self) -> Vec<ChildTree> {
        self.created.borrow().clone()
    }

    #[must_use]
    pub fn dispose_count(&self) -> usize {
        self.disposed.get()
    }
}

impl Bootstrap for StaticBootstrap {
    fn create_child_tree(&self, modules: &[String]) -> Result<ChildTree, BootstrapError> {
        if let Some(unknown) = modules.iter().find(|m| !self.known.contains(m)) {
            return Err(BootstrapError::new(format!("unknown module '{unknown}'")));
        }
        let tree = ChildTree {
            scope: Scope::new_root(self.config),
            root_element: Value::object([("tag", Value::from("subapp-root"))]),
            injector: Value::host(
                "injector",
                Injector {
                    modules: modules.to_vec(),
                },
            ),
        };
        tracing::trace!(child = tree.scope.id(), ?modules, "child tree created");
        self.created.borrow_mut().push(tree.clone());
        Ok(tree)
    }

    fn dispose(&self, tree: &ChildTree) {
        self.disposed.set(self.disposed.get() + 1);
        tree.scope.destroy();
    }
}

// ============================================================================
// Wiring
// ============================================================================

#[must_use]
pub fn attributes(pairs: &[(&str, &str)]) -> Attributes {
    pairs.iter().map(|(n, v)| (*n, *v)).collect()
}

/// A parent tree and a child tree joined by a binding set.
pub struct Pair {
    pub parent: Scope,
    pub child: Scope,
    pub bindings: BindingSet,
}

impl Pair {
    /// Digest parent then child until both are quiet.
    ///
    /// # Errors
    ///
    /// The first digest error, or `Unstable` after [`SETTLE_LIMIT`] sweeps.
    pub fn sync(&self) -> Result<usize, EngineError> {
        settle(&[&self.parent, &self.child])
    }
}

/// Attach a binding set between two fresh trees. Duplicates resolve last
/// wins.
#[must_use]
pub fn bind_pair(pairs: &[(&str, &str)]) -> Pair {
    let parent = Scope::new_root(EngineConfig::default());
    let child = Scope::new_root(EngineConfig::default());
    let declarations = DeclarationSet::scan(&attributes(pairs), &DeclarationOptions::default())
        .unwrap_or_default();
    let bindings = BindingSet::attach(&parent, &child, &declarations);
    Pair {
        parent,
        child,
        bindings,
    }
}

/// Embed a child tree under `host` with the given attributes.
///
/// # Errors
///
/// Whatever [`Embedding::attach`] reports.
pub fn embed(
    host: &Scope,
    pairs: &[(&str, &str)],
    bootstrap: &Rc<StaticBootstrap>,
) -> Result<Embedding, EmbedError> {
    let bootstrap: Rc<dyn Bootstrap> = bootstrap.clone();
    Embedding::attach(
        host,
        &HostElement::new(attributes(pairs)),
        bootstrap,
        &EmbedOptions::default(),
    )
}

/// Digest every tree in turn until a full sweep applies no write and fires
/// no watcher. Returns the number of sweeps.
///
/// # Errors
///
/// The first digest error, or `Unstable` after [`SETTLE_LIMIT`] sweeps.
pub fn settle(trees: &[&Scope]) -> Result<usize, EngineError> {
    for sweep in 1..=SETTLE_LIMIT {
        let mut quiet = true;
        for tree in trees {
            let report = tree.digest()?;
            if report.fired > 0 || report.writes_applied > 0 {
                quiet = false;
            }
        }
        if quiet {
            return Ok(sweep);
        }
    }
    Err(EngineError::Unstable { ttl: SETTLE_LIMIT })
}

/// Properties of `scope` as a JSON object, for compact assertions.
#[must_use]
pub fn snapshot(scope: &Scope, names: &[&str]) -> serde_json::Value {
    serde_json::Value::Object(
        names
            .iter()
            .map(|name| ((*name).to_string(), scope.get(name).to_json()))
            .collect(),
    )
}

// ============================================================================
// Strategies
// ============================================================================

pub mod strategies {
    use proptest::prelude::*;
    use subapp_expr::Value;

    /// Which tree a step acts on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Side {
        Parent,
        Child,
    }

    /// Primitive values a property can hold.
    pub fn primitive() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            (-1000i32..1000).prop_map(Value::from),
            "[a-z]{0,6}".prop_map(Value::from),
        ]
    }

    /// Distinct non-empty strings, for values that must differ.
    pub fn distinct_words() -> impl Strategy<Value = (String, String)> {
        ("[a-m]{1,5}", "[n-z]{1,5}")
    }

    /// Arbitrary interleaving of digests.
    pub fn digest_order(max: usize) -> impl Strategy<Value = Vec<Side>> {
        proptest::collection::vec(prop_oneof![Just(Side::Parent), Just(Side::Child)], 1..=max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_rejects_unknown_modules() {
        let bootstrap = StaticBootstrap::new(&["known"]);
        let err = bootstrap
            .create_child_tree(&["known".to_string(), "other".to_string()])
            .unwrap_err();
        assert_eq!(err.message, "unknown module 'other'");
        assert!(bootstrap.created().is_empty());
    }

    #[test]
    fn dispose_destroys_the_child_scope() {
        let bootstrap = StaticBootstrap::new(&[]);
        let tree = bootstrap.create_child_tree(&[]).unwrap();
        bootstrap.dispose(&tree);
        assert!(tree.scope.is_destroyed());
        assert_eq!(bootstrap.dispose_count(), 1);
    }

    #[test]
    fn injector_round_trips_through_a_value() {
        let bootstrap = StaticBootstrap::new(&["a"]);
        let tree = bootstrap.create_child_tree(&["a".to_string()]).unwrap();
        let injector = Injector::from_value(&tree.injector).unwrap();
        assert_eq!(injector.modules(), ["a"]);
    }

    #[test]
    fn settle_reports_sweeps() {
        let pair = bind_pair(&[("bind-foo", "bar")]);
        pair.parent.set("bar", 1);
        let sweeps = pair.sync().unwrap();
        assert!(sweeps >= 2);
        assert_eq!(pair.sync().unwrap(), 1);
    }

    #[test]
    fn snapshot_reads_through_to_json() {
        let scope = Scope::new_root(EngineConfig::default());
        scope.set("a", 1);
        scope.set("b", "x");
        assert_eq!(
            snapshot(&scope, &["a", "b", "c"]),
            serde_json::json!({"a": 1, "b": "x", "c": null})
        );
    }
}
