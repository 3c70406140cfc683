#![forbid(unsafe_code)]

//! Embedding a child tree under a host scope.
//!
//! [`Embedding::attach`] is the link step for one host element:
//!
//! 1. classify the element's attributes;
//! 2. evaluate `modules` against the host scope (missing means none);
//! 3. ask the [`Bootstrap`] collaborator for a child tree;
//! 4. attach the [`BindingSet`];
//! 5. run the `observer` expression once with handles to both trees.
//!
//! When the host scope is destroyed the binding set tears down first, then
//! the child tree is handed back to [`Bootstrap::dispose`].
//!
//! # Failure Modes
//!
//! | Failure | Effect |
//! |---------|--------|
//! | Duplicate declaration under `Duplicates::Reject` | `EmbedError::Declaration`, nothing bootstrapped |
//! | `modules` or `observer` does not parse | `EmbedError::Parse`, nothing bootstrapped |
//! | `modules` is not a list of strings | `EmbedError::InvalidModules`, nothing bootstrapped |
//! | Bootstrap fails | `EmbedError::Bootstrap` |
//! | Observer fails to evaluate | child tree disposed, `EmbedError::Eval` |

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use subapp_expr::{EvalError, Expression, Locals, ParseError, Value};
use subapp_runtime::Scope;

use crate::binding_set::BindingSet;
use crate::declaration::{
    Attributes, DeclarationError, DeclarationOptions, DeclarationSet,
};

/// Handles for a bootstrapped child tree.
#[derive(Debug, Clone)]
pub struct ChildTree {
    pub scope: Scope,
    pub root_element: Value,
    pub injector: Value,
}

/// The collaborator that creates and disposes child trees.
pub trait Bootstrap {
    /// # Errors
    ///
    /// Whatever prevents the tree from being created, such as an unknown
    /// module.
    fn create_child_tree(&self, modules: &[String]) -> Result<ChildTree, BootstrapError>;

    /// Release a tree created by [`create_child_tree`](Self::create_child_tree).
    fn dispose(&self, tree: &ChildTree);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapError {
    pub message: String,
}

impl BootstrapError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bootstrap failed: {}", self.message)
    }
}

impl std::error::Error for BootstrapError {}

/// The element hosting an embedding.
#[derive(Debug, Clone)]
pub struct HostElement {
    attributes: Attributes,
    value: Value,
}

impl HostElement {
    #[must_use]
    pub fn new(attributes: Attributes) -> Self {
        let value = Value::object(
            attributes
                .iter()
                .map(|(name, value)| (name.to_string(), Value::from(value))),
        );
        Self { attributes, value }
    }

    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// The element as seen by expressions. Always the same object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        self.value.clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct EmbedOptions {
    pub declarations: DeclarationOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedError {
    Declaration(DeclarationError),
    Parse {
        attribute: &'static str,
        error: ParseError,
    },
    Eval {
        attribute: &'static str,
        error: EvalError,
    },
    InvalidModules {
        found: &'static str,
    },
    Bootstrap(BootstrapError),
}

impl fmt::Display for EmbedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Declaration(e) => e.fmt(f),
            Self::Parse { attribute, error } => write!(f, "invalid {attribute} expression: {error}"),
            Self::Eval { attribute, error } => write!(f, "{attribute} failed: {error}"),
            Self::InvalidModules { found } => {
                write!(f, "modules must be a list of strings, found {found}")
            }
            Self::Bootstrap(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for EmbedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Declaration(e) => Some(e),
            Self::Parse { error, .. } => Some(error),
            Self::Eval { error, .. } => Some(error),
            Self::InvalidModules { .. } => None,
            Self::Bootstrap(e) => Some(e),
        }
    }
}

impl From<DeclarationError> for EmbedError {
    fn from(e: DeclarationError) -> Self {
        Self::Declaration(e)
    }
}

impl From<BootstrapError> for EmbedError {
    fn from(e: BootstrapError) -> Self {
        Self::Bootstrap(e)
    }
}

fn parse_optional(
    attribute: &'static str,
    text: Option<&str>,
) -> Result<Option<Expression>, EmbedError> {
    text.map(Expression::parse)
        .transpose()
        .map_err(|error| EmbedError::Parse { attribute, error })
}

fn module_list(value: &Value) -> Result<Vec<String>, EmbedError> {
    match value {
        Value::Undefined | Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .borrow()
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or(EmbedError::InvalidModules {
                        found: item.type_name(),
                    })
            })
            .collect(),
        other => Err(EmbedError::InvalidModules {
            found: other.type_name(),
        }),
    }
}

struct Disposal {
    bootstrap: Rc<dyn Bootstrap>,
    tree: ChildTree,
    bindings: BindingSet,
    disposed: Cell<bool>,
}

impl Disposal {
    fn run(&self) {
        if self.disposed.replace(true) {
            return;
        }
        self.bindings.teardown();
        self.bootstrap.dispose(&self.tree);
        tracing::debug!(child = self.tree.scope.id(), "embedding disposed");
    }
}

/// A child tree attached under a host scope.
pub struct Embedding {
    host: Scope,
    modules: Vec<String>,
    disposal: Rc<Disposal>,
}

impl Embedding {
    /// Link `element` under `host`.
    ///
    /// # Errors
    ///
    /// See the module-level failure table. Bad binding declarations are not
    /// errors here; they are reported by [`BindingSet::errors`].
    pub fn attach(
        host: &Scope,
        element: &HostElement,
        bootstrap: Rc<dyn Bootstrap>,
        options: &EmbedOptions,
    ) -> Result<Self, EmbedError> {
        let _span = tracing::debug_span!("embed_attach", host = host.id()).entered();

        let declarations = DeclarationSet::scan(element.attributes(), &options.declarations)?;
        let modules_expr = parse_optional("modules", declarations.modules())?;
        let observer = parse_optional("observer", declarations.observer())?;

        let modules = match &modules_expr {
            Some(expr) => {
                let value = host.evaluate(expr).map_err(|error| EmbedError::Eval {
                    attribute: "modules",
                    error,
                })?;
                module_list(&value)?
            }
            None => Vec::new(),
        };

        let tree = bootstrap.create_child_tree(&modules)?;
        let bindings = BindingSet::attach(host, &tree.scope, &declarations);
        let disposal = Rc::new(Disposal {
            bootstrap,
            tree,
            bindings,
            disposed: Cell::new(false),
        });
        let on_destroy = Rc::clone(&disposal);
        host.on_destroy(move || on_destroy.run());

        if let Some(observer) = observer {
            let tree = &disposal.tree;
            let locals = Locals::new(host)
                .with("$rootScope", host.root().to_value())
                .with("scope", host.to_value())
                .with("element", element.to_value())
                .with("$childRootScope", tree.scope.to_value())
                .with("$childRootElement", tree.root_element.clone())
                .with("$childInjector", tree.injector.clone());
            if let Err(error) = observer.evaluate(&locals) {
                tracing::warn!(
                    observer = observer.source(),
                    %error,
                    "observer failed, disposing child tree"
                );
                disposal.run();
                return Err(EmbedError::Eval {
                    attribute: "observer",
                    error,
                });
            }
        }

        tracing::debug!(
            child = disposal.tree.scope.id(),
            modules = modules.len(),
            "embedding attached"
        );
        Ok(Self {
            host: host.clone(),
            modules,
            disposal,
        })
    }

    #[must_use]
    pub fn host(&self) -> &Scope {
        &self.host
    }

    #[must_use]
    pub fn child(&self) -> &ChildTree {
        &self.disposal.tree
    }

    #[must_use]
    pub fn bindings(&self) -> &BindingSet {
        &self.disposal.bindings
    }

    /// Modules the child tree was bootstrapped with.
    #[must_use]
    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.disposal.disposed.get()
    }

    /// Tear down the bindings and dispose the child tree without destroying
    /// the host. Idempotent, and a no-op once the host is destroyed.
    pub fn detach(&self) {
        self.disposal.run();
    }
}

impl fmt::Debug for Embedding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Embedding")
            .field("host", &self.host.id())
            .field("child", &self.disposal.tree.scope.id())
            .field("modules", &self.modules)
            .field("detached", &self.is_detached())
            .finish()
    }
}
