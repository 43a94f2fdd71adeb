//! Backend filter expression builder.
//!
//! Mirrors the compute API's query grammar: `(key op "value")` atoms
//! joined by AND/OR, composite groups parenthesized. Values are
//! substituted literally — they are enum-like, pre-sanitized strings,
//! and no escaping is performed.

use std::fmt;

/// A rendered filter expression fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter(String);

impl Filter {
    /// Equality atom: `(key = "value")`.
    pub fn eq(key: &str, value: &str) -> Self {
        Self(format!(r#"({key} = "{value}")"#))
    }

    /// Inequality atom: `(key != "value")`.
    pub fn ne(key: &str, value: &str) -> Self {
        Self(format!(r#"({key} != "{value}")"#))
    }

    /// Caller-supplied fragment, wrapped in parentheses and otherwise
    /// inserted verbatim.
    pub fn raw(fragment: &str) -> Self {
        Self(format!("({})", fragment.trim()))
    }

    /// Conjunction: `self AND other`.
    pub fn and(self, other: Filter) -> Self {
        Self(format!("{} AND {}", self.0, other.0))
    }

    /// Conjunction with an optional right-hand side.
    pub fn and_maybe(self, other: Option<Filter>) -> Self {
        match other {
            Some(f) => self.and(f),
            None => self,
        }
    }

    /// Disjunction group: `(a OR b OR ...)`. Empty input yields nothing.
    pub fn any_of(filters: impl IntoIterator<Item = Filter>) -> Option<Self> {
        let parts: Vec<String> = filters.into_iter().map(|f| f.0).collect();
        match parts.len() {
            0 => None,
            1 => Some(Self(parts.into_iter().next().unwrap_or_default())),
            _ => Some(Self(format!("({})", parts.join(" OR ")))),
        }
    }

    pub fn render(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atoms_render_quoted() {
        assert_eq!(Filter::eq("labels.os", "win10").render(), r#"(labels.os = "win10")"#);
        assert_eq!(
            Filter::ne("labels.grid-deleting", "true").render(),
            r#"(labels.grid-deleting != "true")"#
        );
    }

    #[test]
    fn and_chains_stay_flat() {
        let f = Filter::eq("a", "1").and(Filter::eq("b", "2")).and(Filter::eq("c", "3"));
        assert_eq!(f.render(), r#"(a = "1") AND (b = "2") AND (c = "3")"#);
    }

    #[test]
    fn any_of_wraps_disjunctions() {
        let f = Filter::any_of([
            Filter::eq("labels.browser-1", "firefox"),
            Filter::eq("labels.browser-2", "firefox"),
        ])
        .unwrap();
        assert_eq!(
            f.render(),
            r#"((labels.browser-1 = "firefox") OR (labels.browser-2 = "firefox"))"#
        );
    }

    #[test]
    fn any_of_single_element_is_bare() {
        let f = Filter::any_of([Filter::eq("a", "1")]).unwrap();
        assert_eq!(f.render(), r#"(a = "1")"#);
    }

    #[test]
    fn any_of_empty_is_none() {
        assert!(Filter::any_of([]).is_none());
    }

    #[test]
    fn raw_fragments_are_parenthesized_verbatim() {
        let f = Filter::eq("a", "1").and(Filter::raw(r#"labels.pool = "canary""#));
        assert_eq!(f.render(), r#"(a = "1") AND (labels.pool = "canary")"#);
    }
}
