#![forbid(unsafe_code)]

//! Binding set: every controller attached for one host element.
//!
//! [`BindingSet::attach`] turns a [`DeclarationSet`] into controllers and
//! keeps them in an arena. Expression triggers are parsed in declaration
//! order but installed after every other controller, so the child digest
//! they force never runs ahead of the bindings it is meant to surface.
//!
//! Teardown is hooked to the parent scope's destruction and can also be
//! requested directly. It cancels writes still queued by the set's
//! controllers and removes every watch and listener they registered.
//!
//! # Invariants
//!
//! 1. A declaration that fails to parse is recorded in
//!    [`errors`](BindingSet::errors) and skipped; the others still attach.
//! 2. After teardown no watcher registered by the set remains on either
//!    tree.
//! 3. Teardown runs at most once.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use subapp_expr::ParseError;
use subapp_runtime::{CancelToken, Scope};

use crate::declaration::{Declaration, DeclarationKind, DeclarationSet};
use crate::reflect::Reflection;
use crate::trigger::{EventTrigger, ExpressionTrigger, PreparedExpressionTrigger};
use crate::two_way::TwoWayBinding;

/// A declaration that could not be attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupError {
    pub attribute: String,
    pub kind: DeclarationKind,
    pub error: ParseError,
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} declaration '{}' skipped: {}",
            self.kind, self.attribute, self.error
        )
    }
}

impl std::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

enum Controller {
    TwoWay(TwoWayBinding),
    Reflect(Reflection),
    Event(EventTrigger),
    Expression(ExpressionTrigger),
}

impl Controller {
    fn kind(&self) -> DeclarationKind {
        match self {
            Self::TwoWay(_) => DeclarationKind::Bind,
            Self::Reflect(_) => DeclarationKind::Reflect,
            Self::Event(_) => DeclarationKind::UpdateOn,
            Self::Expression(_) => DeclarationKind::UpdateOnExp,
        }
    }

    fn deregister(&self) {
        match self {
            Self::TwoWay(c) => c.deregister(),
            Self::Reflect(c) => c.deregister(),
            Self::Event(c) => c.deregister(),
            Self::Expression(c) => c.deregister(),
        }
    }
}

struct Inner {
    parent_id: u64,
    child_id: u64,
    controllers: RefCell<Vec<Controller>>,
    errors: Vec<SetupError>,
    token: CancelToken,
    torn_down: Cell<bool>,
}

impl Inner {
    fn teardown(&self) {
        if self.torn_down.replace(true) {
            return;
        }
        self.token.cancel();
        let controllers = std::mem::take(&mut *self.controllers.borrow_mut());
        for controller in &controllers {
            controller.deregister();
        }
        tracing::debug!(
            parent = self.parent_id,
            child = self.child_id,
            controllers = controllers.len(),
            "binding set torn down"
        );
    }
}

/// Controllers attached between one parent scope and one child scope.
#[derive(Clone)]
pub struct BindingSet {
    inner: Rc<Inner>,
}

impl BindingSet {
    /// Attach a controller for every binding and trigger declaration.
    ///
    /// `modules` and `observer` declarations are left to the embedding.
    pub fn attach(parent: &Scope, child: &Scope, declarations: &DeclarationSet) -> Self {
        let _span =
            tracing::debug_span!("binding_set_attach", parent = parent.id(), child = child.id())
                .entered();

        let token = CancelToken::new();
        let mut controllers = Vec::new();
        let mut deferred = Vec::new();
        let mut errors = Vec::new();

        for entry in declarations.entries() {
            let kind = entry.declaration.kind();
            let attached: Result<(), ParseError> = match &entry.declaration {
                Declaration::Bind {
                    property,
                    expression,
                } => TwoWayBinding::new(parent, child, property, expression, &token)
                    .map(|c| controllers.push(Controller::TwoWay(c))),
                Declaration::Reflect { property, template } => {
                    Reflection::new(parent, child, property, template, &token)
                        .map(|c| controllers.push(Controller::Reflect(c)))
                }
                Declaration::UpdateOn { event } => {
                    controllers.push(Controller::Event(EventTrigger::new(parent, child, event)));
                    Ok(())
                }
                Declaration::UpdateOnExp { expression } => {
                    PreparedExpressionTrigger::prepare(parent, child, expression)
                        .map(|p| deferred.push(p))
                }
                Declaration::Modules { .. } | Declaration::Observer { .. } => Ok(()),
            };
            if let Err(error) = attached {
                tracing::warn!(
                    attribute = %entry.attribute,
                    %kind,
                    %error,
                    "declaration skipped"
                );
                errors.push(SetupError {
                    attribute: entry.attribute.clone(),
                    kind,
                    error,
                });
            }
        }

        controllers.extend(
            deferred
                .into_iter()
                .map(|p| Controller::Expression(p.install())),
        );

        tracing::debug!(
            controllers = controllers.len(),
            errors = errors.len(),
            "binding set attached"
        );

        let set = Self {
            inner: Rc::new(Inner {
                parent_id: parent.id(),
                child_id: child.id(),
                controllers: RefCell::new(controllers),
                errors,
                token,
                torn_down: Cell::new(false),
            }),
        };
        let on_destroy = Rc::clone(&set.inner);
        parent.on_destroy(move || on_destroy.teardown());
        set
    }

    /// Declarations that were skipped because they failed to parse.
    #[must_use]
    pub fn errors(&self) -> &[SetupError] {
        &self.inner.errors
    }

    /// Number of live controllers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.controllers.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Kinds of the live controllers, in installation order.
    #[must_use]
    pub fn kinds(&self) -> Vec<DeclarationKind> {
        self.inner
            .controllers
            .borrow()
            .iter()
            .map(Controller::kind)
            .collect()
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.get()
    }

    /// Cancel queued writes and remove every registration. Idempotent.
    pub fn teardown(&self) {
        self.inner.teardown();
    }
}

impl fmt::Debug for BindingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingSet")
            .field("parent", &self.inner.parent_id)
            .field("child", &self.inner.child_id)
            .field("kinds", &self.kinds())
            .field("errors", &self.inner.errors.len())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}
