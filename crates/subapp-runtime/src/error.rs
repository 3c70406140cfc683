#![forbid(unsafe_code)]

//! Engine errors.

use std::fmt;

use subapp_expr::{EvalError, NotAssignableError};

/// Something that went wrong inside a single watcher, listener or pending
/// write. Failures never abort a digest; they are collected and reported
/// once the pass has settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// A write was routed to an expression that does not name a location.
    NotAssignable(NotAssignableError),
    /// A watch expression, listener or write failed to evaluate.
    Eval(EvalError),
    /// A nested digest or broadcast started from a callback failed.
    Engine(EngineError),
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAssignable(e) => e.fmt(f),
            Self::Eval(e) => e.fmt(f),
            Self::Engine(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NotAssignable(e) => Some(e),
            Self::Eval(e) => Some(e),
            Self::Engine(e) => Some(e),
        }
    }
}

impl From<NotAssignableError> for Failure {
    fn from(e: NotAssignableError) -> Self {
        Self::NotAssignable(e)
    }
}

impl From<EvalError> for Failure {
    fn from(e: EvalError) -> Self {
        Self::Eval(e)
    }
}

impl From<EngineError> for Failure {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

/// Errors returned by digest and event delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A digest was requested while the same tree is already digesting.
    DigestInProgress,
    /// The scope has been destroyed.
    Destroyed,
    /// The digest was still dirty after `ttl` rounds.
    Unstable { ttl: usize },
    /// The pass settled but one or more callbacks failed.
    Failed(Vec<Failure>),
}

impl EngineError {
    /// Failures carried by [`EngineError::Failed`], empty otherwise.
    #[must_use]
    pub fn failures(&self) -> &[Failure] {
        match self {
            Self::Failed(failures) => failures,
            _ => &[],
        }
    }

    /// Whether any collected failure is a non-assignable write, looking
    /// through nested engine failures.
    #[must_use]
    pub fn has_not_assignable(&self) -> bool {
        self.failures().iter().any(|f| match f {
            Failure::NotAssignable(_) => true,
            Failure::Engine(inner) => inner.has_not_assignable(),
            Failure::Eval(_) => false,
        })
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DigestInProgress => f.write_str("digest already in progress"),
            Self::Destroyed => f.write_str("scope has been destroyed"),
            Self::Unstable { ttl } => {
                write!(f, "{ttl} digest iterations reached without settling")
            }
            Self::Failed(failures) => {
                write!(f, "{} failure(s) during digest", failures.len())?;
                for failure in failures {
                    write!(f, "; {failure}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_failures() {
        let err = EngineError::Failed(vec![Failure::NotAssignable(NotAssignableError {
            expression: "{name: name}".into(),
        })]);
        assert_eq!(
            err.to_string(),
            "1 failure(s) during digest; expression '{name: name}' is not assignable"
        );
    }

    #[test]
    fn not_assignable_is_found_through_nesting() {
        let inner = EngineError::Failed(vec![Failure::NotAssignable(NotAssignableError {
            expression: "1".into(),
        })]);
        let outer = EngineError::Failed(vec![Failure::Engine(inner)]);
        assert!(outer.has_not_assignable());
        assert!(!EngineError::Destroyed.has_not_assignable());
    }

    #[test]
    fn unstable_message_names_ttl() {
        assert_eq!(
            EngineError::Unstable { ttl: 10 }.to_string(),
            "10 digest iterations reached without settling"
        );
    }
}
