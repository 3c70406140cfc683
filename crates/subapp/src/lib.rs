#![forbid(unsafe_code)]

//! Public facade for subapp.
//!
//! Re-exports the expression evaluator ([`expr`]), the observation engine
//! ([`runtime`]) and, with the default `bind` feature, the synchronization
//! core ([`bind`]). Most users want the [`prelude`].
//!
//! ```
//! use subapp::prelude::*;
//!
//! let parent = Scope::new_root(EngineConfig::default());
//! let child = Scope::new_root(EngineConfig::default());
//! let declarations = DeclarationSet::scan(
//!     &Attributes::new().with("reflect-greeting", "Hello {{name}}"),
//!     &DeclarationOptions::default(),
//! )
//! .unwrap();
//! let _set = BindingSet::attach(&parent, &child, &declarations);
//!
//! parent.set("name", "World");
//! parent.digest().unwrap();
//! child.digest().unwrap();
//! assert_eq!(child.get("greeting"), Value::from("Hello World"));
//! ```

pub use subapp_expr as expr;
pub use subapp_runtime as runtime;

#[cfg(feature = "bind")]
pub use subapp_bind as bind;

pub use subapp_expr::{EvalError, Expression, ParseError, Value};
pub use subapp_runtime::{EngineConfig, EngineError, Failure, Scope};

#[cfg(feature = "bind")]
pub use subapp_bind::{BindingSet, Embedding};

pub mod prelude {
    pub use subapp_expr::{
        Context, EvalError, Expression, Interpolation, Locals, NotAssignableError, ParseError,
        Value, interpolate,
    };
    pub use subapp_runtime::{
        CancelToken, Deregistration, DigestReport, EngineConfig, EngineError, Equality, Failure,
        PendingWrite, Scope, WatchSource,
    };

    #[cfg(feature = "bind")]
    pub use subapp_bind::{
        Attributes, BindingSet, Bootstrap, BootstrapError, ChildTree, Declaration,
        DeclarationOptions, DeclarationSet, Duplicates, EmbedError, EmbedOptions, Embedding,
        HostElement,
    };
}
