#![forbid(unsafe_code)]

//! Observation engine for subapp.
//!
//! A single-threaded scope tree with change detection:
//!
//! - [`Scope`]: property container forming a tree, evaluated against by
//!   expressions
//! - [`Scope::watch`]: register a watcher, removed through a
//!   [`Deregistration`]
//! - [`Scope::schedule`]: defer a write to the tree's next digest round
//! - [`Scope::digest`]: run rounds until the tree settles
//! - [`Scope::on`], [`Scope::broadcast`], [`Scope::emit`]: named events
//!
//! # Architecture
//!
//! Scopes are `Rc<..>` handles with interior mutability. Every tree owns one
//! pending write queue and one "digesting" flag; independent trees can
//! digest each other from inside listeners, but a tree never digests itself
//! re-entrantly.
//!
//! ```
//! use subapp_runtime::{EngineConfig, Scope};
//!
//! let root = Scope::new_root(EngineConfig::default());
//! root.schedule_set("greeting", "hello");
//! let report = root.digest().unwrap();
//! assert_eq!(report.writes_applied, 1);
//! assert_eq!(root.get("greeting").as_str(), Some("hello"));
//! ```

pub mod config;
pub mod digest;
pub mod error;
pub mod events;
pub mod queue;
pub mod scope;
pub mod watch;

pub use config::{EngineConfig, TTL_ENV_VAR};
pub use digest::DigestReport;
pub use error::{EngineError, Failure};
pub use events::Event;
pub use queue::{CancelToken, PendingWrite, WriteSink};
pub use scope::Scope;
pub use watch::{Deregistration, Equality, WatchListener, WatchSource};
