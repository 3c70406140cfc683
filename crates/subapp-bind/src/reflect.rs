#![forbid(unsafe_code)]

//! One-way reflection of a parent value into a child property.
//!
//! The reflected text is either a template with `{{ }}` placeholders,
//! rendered to a string, or a plain expression whose value is copied as is.
//! Each change seen by the parent watch queues a write on the child tree.

use std::fmt;

use subapp_expr::{Expression, Interpolation, ParseError, Value, interpolate};
use subapp_runtime::{CancelToken, Deregistration, Equality, PendingWrite, Scope, WatchSource};

/// What a reflection reads from the parent.
#[derive(Clone)]
pub enum ReflectSource {
    Template(Interpolation),
    Expression(Expression),
}

impl ReflectSource {
    /// Text containing placeholders becomes a template, anything else an
    /// expression.
    ///
    /// Unlike `$interpolate`, plain text without placeholders is not
    /// reflected as a constant string: `Hello World` is parsed as an
    /// expression and fails. Quote it (`'Hello World'`) to reflect a
    /// constant.
    ///
    /// # Errors
    ///
    /// The parse error of a placeholder or of the expression.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let template = interpolate(text)?;
        if template.has_placeholders() {
            Ok(Self::Template(template))
        } else {
            Ok(Self::Expression(Expression::parse(text)?))
        }
    }

    #[must_use]
    pub fn source(&self) -> &str {
        match self {
            Self::Template(t) => t.source(),
            Self::Expression(e) => e.source(),
        }
    }

    /// Rendered templates are fresh strings compared by identity. Literal
    /// composite expressions build a new value on every evaluation and are
    /// compared structurally.
    fn into_watch_source(self) -> (WatchSource, Equality) {
        match self {
            Self::Template(template) => (
                WatchSource::getter(move |scope| {
                    template.render(scope).map(|text| Value::string(&text))
                }),
                Equality::Identity,
            ),
            Self::Expression(expr) => {
                let equality = Equality::from_flag(expr.is_literal_composite());
                (WatchSource::Expression(expr), equality)
            }
        }
    }
}

impl fmt::Debug for ReflectSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Template(t) => write!(f, "Template({})", t.source()),
            Self::Expression(e) => write!(f, "Expression({})", e.source()),
        }
    }
}

/// A live reflection.
#[derive(Debug)]
pub struct Reflection {
    property: String,
    source: String,
    watch: Deregistration,
}

impl Reflection {
    /// Parse `text` and reflect it into `child[property]`.
    ///
    /// # Errors
    ///
    /// The parse error for malformed text; nothing is registered.
    pub fn new(
        parent: &Scope,
        child: &Scope,
        property: &str,
        text: &str,
        token: &CancelToken,
    ) -> Result<Self, ParseError> {
        let source = ReflectSource::parse(text)?;
        Ok(Self::attach(parent, child, property, source, token))
    }

    pub fn attach(
        parent: &Scope,
        child: &Scope,
        property: &str,
        source: ReflectSource,
        token: &CancelToken,
    ) -> Self {
        let text = source.source().to_string();
        let target = child.clone();
        let name = property.to_string();
        let token_for_writes = token.clone();
        let (watch_source, equality) = source.into_watch_source();
        let watch = parent.watch(
            watch_source,
            move |new, _| {
                tracing::trace!(property = %name, value = ?new, "reflecting");
                target.schedule_cancellable(
                    PendingWrite::property(&target, &name, new.clone()),
                    &token_for_writes,
                );
                Ok(())
            },
            equality,
        );
        Self {
            property: property.to_string(),
            source: text,
            watch,
        }
    }

    #[must_use]
    pub fn property(&self) -> &str {
        &self.property
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn deregister(&self) {
        self.watch.deregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use subapp_runtime::EngineConfig;

    fn trees() -> (Scope, Scope) {
        (
            Scope::new_root(EngineConfig::default()),
            Scope::new_root(EngineConfig::default()),
        )
    }

    #[test]
    fn template_is_reflected_on_the_next_child_digest() {
        let (parent, child) = trees();
        let _r = Reflection::new(&parent, &child, "foo", "Hello {{bar}}", &CancelToken::new())
            .unwrap();
        parent.set("bar", "");
        parent.digest().unwrap();
        child.digest().unwrap();
        assert_eq!(child.get("foo"), Value::from("Hello "));

        parent.set("bar", "World");
        parent.digest().unwrap();
        assert_eq!(child.get("foo"), Value::from("Hello "));
        child.digest().unwrap();
        assert_eq!(child.get("foo"), Value::from("Hello World"));

        parent.set("bar", "Universe");
        parent.digest().unwrap();
        child.digest().unwrap();
        assert_eq!(child.get("foo"), Value::from("Hello Universe"));
    }

    #[test]
    fn plain_expression_is_evaluated() {
        let (parent, child) = trees();
        let _r = Reflection::new(
            &parent,
            &child,
            "greeting",
            "'Hello ' + name",
            &CancelToken::new(),
        )
        .unwrap();
        parent.set("name", "World");
        parent.digest().unwrap();
        child.digest().unwrap();
        assert_eq!(child.get("greeting"), Value::from("Hello World"));
    }

    #[test]
    fn literal_composite_settles_and_updates_on_structural_change() {
        let (parent, child) = trees();
        let _r = Reflection::new(&parent, &child, "cfg", "{name: name}", &CancelToken::new())
            .unwrap();
        parent.set("name", "a");
        let report = parent.digest().unwrap();
        assert_eq!(report.fired, 1);
        child.digest().unwrap();
        let held = child.get("cfg");
        assert_eq!(held.member("name"), Value::from("a"));

        let report = parent.digest().unwrap();
        assert_eq!(report.fired, 0);
        assert_eq!(child.pending_writes(), 0);
        child.digest().unwrap();
        assert!(child.get("cfg").identical(&held));

        parent.set("name", "b");
        parent.digest().unwrap();
        child.digest().unwrap();
        let updated = child.get("cfg");
        assert!(!updated.identical(&held));
        assert_eq!(updated.member("name"), Value::from("b"));
    }

    #[test]
    fn function_call_result_is_reflected() {
        let (parent, child) = trees();
        parent.set(
            "shout",
            Value::function(|args| {
                let text = args.first().and_then(Value::as_str).unwrap_or_default();
                Ok(Value::string(text.to_uppercase()))
            }),
        );
        let _r = Reflection::new(&parent, &child, "loud", "shout(name)", &CancelToken::new())
            .unwrap();
        parent.set("name", "hi");
        parent.digest().unwrap();
        assert_eq!(parent.digest().unwrap().fired, 0);
        child.digest().unwrap();
        assert_eq!(child.get("loud"), Value::from("HI"));
    }

    #[test]
    fn quoted_text_is_a_constant() {
        let (parent, child) = trees();
        let _r = Reflection::new(&parent, &child, "foo", "'Hello World'", &CancelToken::new())
            .unwrap();
        parent.digest().unwrap();
        child.digest().unwrap();
        assert_eq!(child.get("foo"), Value::from("Hello World"));
    }

    #[test]
    fn child_writes_do_not_flow_back() {
        let (parent, child) = trees();
        let _r = Reflection::new(&parent, &child, "foo", "bar", &CancelToken::new()).unwrap();
        parent.set("bar", 1);
        parent.digest().unwrap();
        child.digest().unwrap();
        child.set("foo", 2);
        child.digest().unwrap();
        parent.digest().unwrap();
        assert_eq!(parent.get("bar"), Value::from(1));
        assert_eq!(child.watcher_count(), 0);
    }

    #[test]
    fn source_kind_follows_placeholders() {
        assert!(matches!(
            ReflectSource::parse("a {{b}}").unwrap(),
            ReflectSource::Template(_)
        ));
        assert!(matches!(
            ReflectSource::parse("a.b").unwrap(),
            ReflectSource::Expression(_)
        ));
        assert!(ReflectSource::parse("Hello {{bar").is_err());
        assert!(ReflectSource::parse("Hello World").is_err());
    }

    #[test]
    fn cancelled_token_drops_reflected_writes() {
        let (parent, child) = trees();
        let token = CancelToken::new();
        let r = Reflection::new(&parent, &child, "foo", "bar", &token).unwrap();
        parent.set("bar", 1);
        parent.digest().unwrap();
        token.cancel();
        r.deregister();
        child.digest().unwrap();
        assert!(child.get("foo").is_undefined());
        assert_eq!(parent.watcher_count(), 0);
    }
}
