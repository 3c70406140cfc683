#![forbid(unsafe_code)]

//! Binding expressions for subapp.
//!
//! This crate provides:
//! - [`Value`], the dynamic value model shared by scopes and expressions
//! - [`Expression`], a parsed expression that can be evaluated and, when it
//!   names a location, assigned
//! - [`interpolate`] for `{{ … }}` text templates
//!
//! # Example
//!
//! ```
//! use subapp_expr::{Expression, Value, Vars};
//!
//! let vars = Vars::new().with("name", "World");
//! let greeting = Expression::parse("'Hello ' + name").unwrap();
//! assert_eq!(greeting.evaluate(&vars).unwrap(), Value::from("Hello World"));
//! ```

pub mod ast;
pub mod eval;
pub mod expression;
pub mod interpolate;
mod lexer;
pub mod parser;
pub mod value;

pub use eval::{Context, EvalError, Locals, Vars};
pub use expression::{AssignError, Expression, NotAssignableError};
pub use interpolate::{Interpolation, Part, interpolate, stringify};
pub use parser::{ParseError, ParseErrorCode, ParseResult, parse_expr};
pub use value::{ArrayRef, Callable, HostRef, ObjectRef, Value};
