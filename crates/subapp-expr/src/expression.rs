//! Parsed expression handle.

use std::fmt;
use std::rc::Rc;

use crate::ast::Expr;
use crate::eval::{self, Context, EvalError};
use crate::parser::{ParseResult, parse_expr};
use crate::value::Value;

/// A parsed binding expression. Cheap to clone.
#[derive(Clone)]
pub struct Expression {
    source: Rc<str>,
    ast: Rc<Expr>,
}

impl Expression {
    /// Parse expression text.
    pub fn parse(source: &str) -> ParseResult<Self> {
        let ast = parse_expr(source)?;
        Ok(Self {
            source: Rc::from(source.trim()),
            ast: Rc::new(ast),
        })
    }

    /// The (trimmed) text this expression was parsed from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    /// Evaluate against a context.
    pub fn evaluate(&self, ctx: &dyn Context) -> Result<Value, EvalError> {
        eval::evaluate(&self.ast, ctx)
    }

    #[must_use]
    pub fn is_assignable(&self) -> bool {
        self.ast.is_assignable()
    }

    /// Whether the whole expression is an array or object literal.
    ///
    /// Such expressions build a new value on every evaluation, so anything
    /// watching them has to compare structurally.
    #[must_use]
    pub fn is_literal_composite(&self) -> bool {
        self.ast.is_literal_composite()
    }

    #[must_use]
    pub fn is_constant(&self) -> bool {
        self.ast.is_constant()
    }

    /// Write `value` to the location this expression names.
    ///
    /// # Errors
    ///
    /// [`AssignError::NotAssignable`] when the expression is not a settable
    /// path; [`AssignError::Eval`] when evaluating the path prefix fails.
    pub fn assign(&self, ctx: &dyn Context, value: Value) -> Result<(), AssignError> {
        if !self.is_assignable() {
            return Err(AssignError::NotAssignable(NotAssignableError {
                expression: self.source.to_string(),
            }));
        }
        eval::assign(&self.ast, ctx, value).map_err(AssignError::Eval)
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Expression").field(&&*self.source).finish()
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// An assignment targeted an expression that does not name a location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotAssignableError {
    pub expression: String,
}

impl fmt::Display for NotAssignableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expression '{}' is not assignable", self.expression)
    }
}

impl std::error::Error for NotAssignableError {}

/// Failure from [`Expression::assign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignError {
    NotAssignable(NotAssignableError),
    Eval(EvalError),
}

impl fmt::Display for AssignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAssignable(e) => e.fmt(f),
            Self::Eval(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for AssignError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NotAssignable(e) => Some(e),
            Self::Eval(e) => Some(e),
        }
    }
}

impl From<NotAssignableError> for AssignError {
    fn from(e: NotAssignableError) -> Self {
        Self::NotAssignable(e)
    }
}

impl From<EvalError> for AssignError {
    fn from(e: EvalError) -> Self {
        Self::Eval(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::Vars;

    #[test]
    fn source_is_trimmed() {
        let expr = Expression::parse("  a.b  ").unwrap();
        assert_eq!(expr.source(), "a.b");
        assert_eq!(expr.to_string(), "a.b");
    }

    #[test]
    fn clones_share_the_tree() {
        let expr = Expression::parse("a + 1").unwrap();
        let copy = expr.clone();
        assert!(std::ptr::eq(expr.ast(), copy.ast()));
    }

    #[test]
    fn classification() {
        let path = Expression::parse("user.profile['name']").unwrap();
        assert!(path.is_assignable());
        assert!(!path.is_literal_composite());

        let literal = Expression::parse("{name: name}").unwrap();
        assert!(!literal.is_assignable());
        assert!(literal.is_literal_composite());
        assert!(!literal.is_constant());

        assert!(Expression::parse("[1, 'two']").unwrap().is_constant());
        assert!(!Expression::parse("f()").unwrap().is_assignable());
    }

    #[test]
    fn assign_to_literal_is_rejected() {
        let vars = Vars::new();
        let err = Expression::parse("'fixed'")
            .unwrap()
            .assign(&vars, Value::from(1))
            .unwrap_err();
        assert_eq!(
            err,
            AssignError::NotAssignable(NotAssignableError {
                expression: "'fixed'".into()
            })
        );
        assert_eq!(err.to_string(), "expression ''fixed'' is not assignable");
    }

    #[test]
    fn assign_then_evaluate() {
        let vars = Vars::new();
        let expr = Expression::parse("settings.theme").unwrap();
        expr.assign(&vars, Value::from("dark")).unwrap();
        assert_eq!(expr.evaluate(&vars).unwrap(), Value::from("dark"));
    }
}
