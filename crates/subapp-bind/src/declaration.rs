#![forbid(unsafe_code)]

//! Binding declarations read from host element attributes.
//!
//! Each declaration kind has a dedicated matcher over the attribute name.
//! Names may carry an `x` or `data` namespace and use `:`, `-` or `_` as the
//! separator at every joint:
//!
//! | attribute | declaration |
//! |-----------|-------------|
//! | `bind-<name>` | [`Declaration::Bind`] |
//! | `reflect-<name>` | [`Declaration::Reflect`] |
//! | `update-on` | [`Declaration::UpdateOn`] |
//! | `update-on-exp` | [`Declaration::UpdateOnExp`] |
//! | `modules` | [`Declaration::Modules`] |
//! | `observer`, `on-init` | [`Declaration::Observer`] |
//!
//! `<name>` must match `[A-Za-z][A-Za-z0-9]*`; anything else does not match
//! and the attribute is ignored.

use std::fmt;

use ahash::AHashMap;

const NAMESPACES: [&str; 2] = ["x", "data"];

fn is_separator(c: char) -> bool {
    matches!(c, ':' | '-' | '_')
}

fn strip_namespace(name: &str) -> &str {
    NAMESPACES
        .iter()
        .find_map(|ns| {
            let rest = name.strip_prefix(*ns)?;
            rest.strip_prefix(is_separator)
        })
        .unwrap_or(name)
}

/// `keyword` followed by one separator; returns what comes after.
fn after_keyword<'a>(name: &'a str, keyword: &str) -> Option<&'a str> {
    name.strip_prefix(keyword)?.strip_prefix(is_separator)
}

fn is_property_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric())
}

fn property_after<'a>(name: &'a str, keyword: &str) -> Option<&'a str> {
    after_keyword(strip_namespace(name), keyword).filter(|rest| is_property_name(rest))
}

/// `bind-<name>`: returns the child property name.
#[must_use]
pub fn match_bind(name: &str) -> Option<&str> {
    property_after(name, "bind")
}

/// `reflect-<name>`: returns the child property name.
#[must_use]
pub fn match_reflect(name: &str) -> Option<&str> {
    property_after(name, "reflect")
}

#[must_use]
pub fn match_update_on(name: &str) -> bool {
    after_keyword(strip_namespace(name), "update") == Some("on")
}

#[must_use]
pub fn match_update_on_exp(name: &str) -> bool {
    after_keyword(strip_namespace(name), "update")
        .and_then(|rest| after_keyword(rest, "on"))
        == Some("exp")
}

#[must_use]
pub fn match_modules(name: &str) -> bool {
    strip_namespace(name) == "modules"
}

#[must_use]
pub fn match_observer(name: &str) -> bool {
    let name = strip_namespace(name);
    name == "observer" || after_keyword(name, "on") == Some("init")
}

/// Declaration kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclarationKind {
    Bind,
    Reflect,
    UpdateOn,
    UpdateOnExp,
    Modules,
    Observer,
}

impl fmt::Display for DeclarationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bind => "bind",
            Self::Reflect => "reflect",
            Self::UpdateOn => "update-on",
            Self::UpdateOnExp => "update-on-exp",
            Self::Modules => "modules",
            Self::Observer => "observer",
        })
    }
}

/// A typed declaration record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declaration {
    /// Two-way bind child `property` to the parent `expression`.
    Bind { property: String, expression: String },
    /// Reflect the parent interpolation `template` into child `property`.
    Reflect { property: String, template: String },
    /// Digest the child tree whenever the parent receives `event`.
    UpdateOn { event: String },
    /// Digest the child tree whenever the parent `expression` changes.
    UpdateOnExp { expression: String },
    /// Expression yielding the module list for the child tree.
    Modules { expression: String },
    /// Expression invoked once after setup.
    Observer { expression: String },
}

impl Declaration {
    /// Classify one attribute. `None` when no matcher accepts the name.
    #[must_use]
    pub fn from_attribute(name: &str, value: &str) -> Option<Self> {
        let value = value.to_string();
        if let Some(property) = match_bind(name) {
            return Some(Self::Bind {
                property: property.to_string(),
                expression: value,
            });
        }
        if let Some(property) = match_reflect(name) {
            return Some(Self::Reflect {
                property: property.to_string(),
                template: value,
            });
        }
        if match_update_on(name) {
            return Some(Self::UpdateOn { event: value });
        }
        if match_update_on_exp(name) {
            return Some(Self::UpdateOnExp { expression: value });
        }
        if match_modules(name) {
            return Some(Self::Modules { expression: value });
        }
        if match_observer(name) {
            return Some(Self::Observer { expression: value });
        }
        None
    }

    #[must_use]
    pub fn kind(&self) -> DeclarationKind {
        match self {
            Self::Bind { .. } => DeclarationKind::Bind,
            Self::Reflect { .. } => DeclarationKind::Reflect,
            Self::UpdateOn { .. } => DeclarationKind::UpdateOn,
            Self::UpdateOnExp { .. } => DeclarationKind::UpdateOnExp,
            Self::Modules { .. } => DeclarationKind::Modules,
            Self::Observer { .. } => DeclarationKind::Observer,
        }
    }

    /// Child property for `Bind` and `Reflect`.
    #[must_use]
    pub fn property(&self) -> Option<&str> {
        match self {
            Self::Bind { property, .. } | Self::Reflect { property, .. } => Some(property),
            _ => None,
        }
    }

    fn key(&self) -> (DeclarationKind, Option<String>) {
        (self.kind(), self.property().map(str::to_string))
    }
}

/// Ordered attribute list of a host element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes(Vec<(String, String)>);

impl Attributes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append.
    #[must_use]
    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: &str, value: &str) {
        self.0.push((name.to_string(), value.to_string()));
    }

    /// Value of the first attribute called `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        )
    }
}

/// What to do when two attributes declare the same thing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Duplicates {
    /// The later attribute replaces the earlier one.
    #[default]
    LastWins,
    /// Scanning fails with [`DeclarationError::Duplicate`].
    Reject,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeclarationOptions {
    pub duplicates: Duplicates,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclarationError {
    /// Two attributes map to the same kind and child property.
    Duplicate {
        kind: DeclarationKind,
        property: Option<String>,
        first: String,
        second: String,
    },
}

impl fmt::Display for DeclarationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate {
                kind,
                property,
                first,
                second,
            } => {
                write!(f, "duplicate {kind} declaration")?;
                if let Some(property) = property {
                    write!(f, " for '{property}'")?;
                }
                write!(f, ": '{first}' and '{second}'")
            }
        }
    }
}

impl std::error::Error for DeclarationError {}

/// One classified attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Attribute name as written on the element.
    pub attribute: String,
    pub declaration: Declaration,
}

/// All declarations found on one host element, in attribute order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclarationSet {
    entries: Vec<Entry>,
}

impl DeclarationSet {
    /// Classify every attribute.
    ///
    /// # Errors
    ///
    /// [`DeclarationError::Duplicate`] under [`Duplicates::Reject`].
    pub fn scan(
        attributes: &Attributes,
        options: &DeclarationOptions,
    ) -> Result<Self, DeclarationError> {
        let mut entries: Vec<Entry> = Vec::new();
        let mut seen: AHashMap<(DeclarationKind, Option<String>), String> = AHashMap::new();

        for (name, value) in attributes.iter() {
            let Some(declaration) = Declaration::from_attribute(name, value) else {
                tracing::trace!(attribute = name, "attribute ignored");
                continue;
            };
            let key = declaration.key();
            if let Some(first) = seen.get(&key) {
                match options.duplicates {
                    Duplicates::Reject => {
                        return Err(DeclarationError::Duplicate {
                            kind: key.0,
                            property: key.1,
                            first: first.clone(),
                            second: name.to_string(),
                        });
                    }
                    Duplicates::LastWins => {
                        tracing::warn!(
                            kind = %key.0,
                            first = %first,
                            second = name,
                            "duplicate declaration, keeping the later one"
                        );
                        entries.retain(|e| e.declaration.key() != key);
                    }
                }
            }
            seen.insert(key, name.to_string());
            entries.push(Entry {
                attribute: name.to_string(),
                declaration,
            });
        }

        Ok(Self { entries })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Declaration> {
        self.entries.iter().map(|e| &e.declaration)
    }

    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `modules` expression, if declared.
    #[must_use]
    pub fn modules(&self) -> Option<&str> {
        self.iter().find_map(|d| match d {
            Declaration::Modules { expression } => Some(expression.as_str()),
            _ => None,
        })
    }

    /// The `observer` expression, if declared.
    #[must_use]
    pub fn observer(&self) -> Option<&str> {
        self.iter().find_map(|d| match d {
            Declaration::Observer { expression } => Some(expression.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn bind_matcher_accepts_namespaces_and_separators() {
        for name in ["bind-foo", "data-bind-foo", "x:bind:foo", "x_bind_foo", "data:bind_foo"] {
            assert_eq!(match_bind(name), Some("foo"), "{name}");
        }
    }

    #[test]
    fn bind_matcher_rejects_bad_names() {
        for name in ["bind-", "bind-1foo", "bind-foo-bar", "bindfoo", "y-bind-foo", "bind"] {
            assert_eq!(match_bind(name), None, "{name}");
        }
        assert_eq!(match_bind("bind-fooBar2"), Some("fooBar2"));
    }

    #[test]
    fn update_on_and_update_on_exp_are_distinct() {
        assert!(match_update_on("update-on"));
        assert!(match_update_on("data-update_on"));
        assert!(!match_update_on("update-on-exp"));
        assert!(match_update_on_exp("update-on-exp"));
        assert!(match_update_on_exp("x:update:on:exp"));
        assert!(!match_update_on_exp("update-on"));
    }

    #[test]
    fn observer_aliases() {
        assert!(match_observer("observer"));
        assert!(match_observer("on-init"));
        assert!(match_observer("data-on-init"));
        assert!(!match_observer("init"));
        assert!(match_modules("data-modules"));
    }

    #[test]
    fn scan_classifies_in_attribute_order() {
        let attrs = Attributes::new()
            .with("class", "widget")
            .with("update-on-exp", "bar")
            .with("bind-foo", "bar")
            .with("reflect-title", "Hello {{name}}")
            .with("update-on", "refresh")
            .with("modules", "['app']");
        let set = DeclarationSet::scan(&attrs, &DeclarationOptions::default()).unwrap();
        let kinds: Vec<_> = set.iter().map(Declaration::kind).collect();
        assert_eq!(
            kinds,
            vec![
                DeclarationKind::UpdateOnExp,
                DeclarationKind::Bind,
                DeclarationKind::Reflect,
                DeclarationKind::UpdateOn,
                DeclarationKind::Modules,
            ]
        );
        assert_eq!(set.modules(), Some("['app']"));
        assert_eq!(set.observer(), None);
    }

    #[test]
    #[traced_test]
    fn duplicates_last_wins_by_default() {
        let attrs = Attributes::new()
            .with("bind-foo", "first")
            .with("bind-bar", "other")
            .with("data-bind-foo", "second");
        let set = DeclarationSet::scan(&attrs, &DeclarationOptions::default()).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(
            set.entries()[1],
            Entry {
                attribute: "data-bind-foo".into(),
                declaration: Declaration::Bind {
                    property: "foo".into(),
                    expression: "second".into(),
                },
            }
        );
        assert!(logs_contain("duplicate declaration"));
    }

    #[test]
    fn same_property_in_different_kinds_is_not_a_duplicate() {
        let attrs = Attributes::new()
            .with("bind-foo", "a")
            .with("reflect-foo", "b");
        let options = DeclarationOptions {
            duplicates: Duplicates::Reject,
        };
        assert_eq!(DeclarationSet::scan(&attrs, &options).unwrap().len(), 2);
    }

    #[test]
    fn duplicates_can_be_rejected() {
        let attrs = Attributes::new()
            .with("update-on", "a")
            .with("x-update-on", "b");
        let options = DeclarationOptions {
            duplicates: Duplicates::Reject,
        };
        let err = DeclarationSet::scan(&attrs, &options).unwrap_err();
        assert_eq!(
            err.to_string(),
            "duplicate update-on declaration: 'update-on' and 'x-update-on'"
        );
    }

    #[test]
    fn attributes_from_pairs() {
        let attrs: Attributes = [("test", "value"), ("bind-a", "b")].into_iter().collect();
        assert_eq!(attrs.get("test"), Some("value"));
        assert_eq!(attrs.len(), 2);
    }
}
