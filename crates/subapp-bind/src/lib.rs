#![forbid(unsafe_code)]

//! Synchronization between a host scope tree and an embedded child tree.
//!
//! - [`DeclarationSet`]: typed declarations classified from host element
//!   attributes (`bind-*`, `reflect-*`, `update-on`, `update-on-exp`,
//!   `modules`, `observer`)
//! - [`TwoWayBinding`]: parent expression <-> child property, parent wins
//!   on conflict
//! - [`Reflection`]: parent template or expression -> child property
//! - [`EventTrigger`], [`ExpressionTrigger`]: force a child digest
//! - [`BindingSet`]: every controller for one element, torn down with the
//!   parent scope
//! - [`Embedding`]: the full link step, including the [`Bootstrap`]
//!   collaborator and the `observer` callback
//!
//! # Architecture
//!
//! Controllers never write into the other tree directly. Each write is
//! queued on the receiving tree and applied at the start of that tree's
//! next digest, so the two trees can be digested in any order.
//!
//! ```
//! use subapp_bind::{Attributes, BindingSet, DeclarationOptions, DeclarationSet};
//! use subapp_runtime::{EngineConfig, Scope};
//!
//! let parent = Scope::new_root(EngineConfig::default());
//! let child = Scope::new_root(EngineConfig::default());
//! let attributes = Attributes::new().with("bind-foo", "bar");
//! let declarations = DeclarationSet::scan(&attributes, &DeclarationOptions::default()).unwrap();
//! let _set = BindingSet::attach(&parent, &child, &declarations);
//!
//! parent.set("bar", "Hello");
//! parent.digest().unwrap();
//! child.digest().unwrap();
//! assert_eq!(child.get("foo").as_str(), Some("Hello"));
//! ```

pub mod binding_set;
pub mod declaration;
pub mod embed;
pub mod reflect;
pub mod trigger;
pub mod two_way;

pub use binding_set::{BindingSet, SetupError};
pub use declaration::{
    Attributes, Declaration, DeclarationError, DeclarationKind, DeclarationOptions,
    DeclarationSet, Duplicates, Entry,
};
pub use embed::{
    Bootstrap, BootstrapError, ChildTree, EmbedError, EmbedOptions, Embedding, HostElement,
};
pub use reflect::{ReflectSource, Reflection};
pub use trigger::{EventTrigger, ExpressionTrigger, PreparedExpressionTrigger};
pub use two_way::TwoWayBinding;
