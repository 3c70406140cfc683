//! `{{ … }}` text interpolation.
//!
//! Text outside placeholders is kept verbatim. Each placeholder is parsed as
//! an [`Expression`] and rendered with [`stringify`].
//!
//! # Failure Modes
//!
//! | Failure | Code |
//! |---------|------|
//! | `{{` with no closing `}}` | `UnterminatedInterpolation` |
//! | Malformed placeholder body | code of the inner error, offset into the whole text |

use std::rc::Rc;

use crate::eval::{Context, EvalError};
use crate::expression::Expression;
use crate::parser::{ParseError, ParseErrorCode, ParseResult};
use crate::value::{Value, format_number};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// One segment of interpolated text.
#[derive(Debug, Clone)]
pub enum Part {
    Text(String),
    Expr(Expression),
}

/// Parsed interpolation template.
#[derive(Debug, Clone)]
pub struct Interpolation {
    source: Rc<str>,
    parts: Vec<Part>,
}

impl Interpolation {
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Whether the template contains at least one placeholder.
    #[must_use]
    pub fn has_placeholders(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::Expr(_)))
    }

    /// True when every placeholder is a constant expression.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        self.parts.iter().all(|p| match p {
            Part::Text(_) => true,
            Part::Expr(e) => e.is_constant(),
        })
    }

    /// Render against a context.
    pub fn render(&self, ctx: &dyn Context) -> Result<String, EvalError> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Expr(expr) => out.push_str(&stringify(&expr.evaluate(ctx)?)),
            }
        }
        Ok(out)
    }
}

/// Split `text` into literal runs and parsed placeholders.
///
/// A placeholder holding only whitespace renders as nothing.
pub fn interpolate(text: &str) -> ParseResult<Interpolation> {
    let mut parts = Vec::new();
    let mut pos = 0;

    while let Some(found) = text[pos..].find(OPEN) {
        let open = pos + found;
        if open > pos {
            parts.push(Part::Text(text[pos..open].to_string()));
        }
        let body_start = open + OPEN.len();
        let Some(len) = text[body_start..].find(CLOSE) else {
            return Err(ParseError::new(
                ParseErrorCode::UnterminatedInterpolation,
                "missing closing '}}'",
                text,
                open,
            ));
        };
        let body = &text[body_start..body_start + len];
        if !body.trim().is_empty() {
            let expr = Expression::parse(body).map_err(|err| {
                ParseError::new(err.code, err.message, text, body_start + err.offset)
            })?;
            parts.push(Part::Expr(expr));
        }
        pos = body_start + len + CLOSE.len();
    }

    if pos < text.len() {
        parts.push(Part::Text(text[pos..].to_string()));
    }

    Ok(Interpolation {
        source: Rc::from(text),
        parts,
    })
}

/// Render a value for interpolated output.
///
/// `undefined` and `null` render empty, composites as compact JSON.
#[must_use]
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Undefined | Value::Null | Value::Function(_) | Value::Host(_) => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(*n),
        Value::String(s) => s.to_string(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string(&value.to_json()).unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::Vars;
    use serde_json::json;

    #[test]
    fn renders_placeholders() {
        let tpl = interpolate("Hello {{bar}}").unwrap();
        assert!(tpl.has_placeholders());
        assert_eq!(tpl.render(&Vars::new()).unwrap(), "Hello ");
        let vars = Vars::new().with("bar", "World");
        assert_eq!(tpl.render(&vars).unwrap(), "Hello World");
    }

    #[test]
    fn plain_text_is_constant() {
        let tpl = interpolate("just text").unwrap();
        assert!(!tpl.has_placeholders());
        assert!(tpl.is_constant());
        assert_eq!(tpl.render(&Vars::new()).unwrap(), "just text");
    }

    #[test]
    fn multiple_placeholders_and_expressions() {
        let vars = Vars::new().with("a", 2).with("b", 3);
        let tpl = interpolate("{{a}} + {{b}} = {{ a + b }}").unwrap();
        assert_eq!(tpl.render(&vars).unwrap(), "2 + 3 = 5");
        assert_eq!(tpl.parts().len(), 5);
    }

    #[test]
    fn composites_render_as_json() {
        let vars = Vars::new().with("obj", Value::from(json!({"k": [1, "x"]})));
        let tpl = interpolate("{{obj}}").unwrap();
        assert_eq!(tpl.render(&vars).unwrap(), r#"{"k":[1,"x"]}"#);
    }

    #[test]
    fn blank_placeholder_renders_nothing() {
        let tpl = interpolate("a{{  }}b").unwrap();
        assert_eq!(tpl.render(&Vars::new()).unwrap(), "ab");
    }

    #[test]
    fn unterminated_placeholder() {
        let err = interpolate("Hello {{name").unwrap_err();
        assert_eq!(err.code, ParseErrorCode::UnterminatedInterpolation);
        assert_eq!(err.offset, 6);
    }

    #[test]
    fn inner_error_offsets_are_absolute() {
        let err = interpolate("ab {{ a # }}").unwrap_err();
        assert_eq!(err.code, ParseErrorCode::UnexpectedCharacter);
        assert_eq!(err.source, "ab {{ a # }}");
        assert_eq!(&err.source[err.offset..=err.offset], "#");
    }
}
