//! File-name filters used by path-set expressions.

use crate::error::{BuildError, Result};
use regex::Regex;
use std::{fmt, sync::Arc};

/// A predicate over file names, composed from exact names, glob patterns,
/// regular expressions and the boolean combinators. Combinators
/// short-circuit.
#[derive(Clone)]
pub enum NameFilter {
    /// Accepts every name
    All,
    /// Accepts nothing
    None,
    Exact(String),
    Pattern(Arc<Regex>),
    Or(Box<NameFilter>, Box<NameFilter>),
    And(Box<NameFilter>, Box<NameFilter>),
    Not(Box<NameFilter>),
}

impl NameFilter {
    /// Builds a filter from a glob pattern.
    ///
    /// The pattern is split on `*`, each literal segment is quoted, and the
    /// segments are rejoined with `.*`. Matching is anchored at both ends.
    pub fn glob(pattern: &str) -> Self {
        let body = pattern.split('*').map(regex::escape).collect::<Vec<_>>().join(".*");
        // only escaped literals and `.*` go into the pattern, so it always compiles
        NameFilter::Pattern(Arc::new(Regex::new(&format!("^{body}$")).unwrap()))
    }

    /// Builds a filter from a raw regular expression, anchored at both ends.
    pub fn regex(pattern: &str) -> Result<Self> {
        let re = Regex::new(&format!("^(?:{pattern})$"))
            .map_err(|err| BuildError::parse(format!("invalid name pattern `{pattern}`: {err}")))?;
        Ok(NameFilter::Pattern(Arc::new(re)))
    }

    pub fn exact(name: impl Into<String>) -> Self {
        NameFilter::Exact(name.into())
    }

    /// `self ∪ other`
    pub fn or(self, other: NameFilter) -> Self {
        NameFilter::Or(Box::new(self), Box::new(other))
    }

    /// `self ∧ ¬other`
    pub fn except(self, other: NameFilter) -> Self {
        NameFilter::And(Box::new(self), Box::new(other.negate()))
    }

    pub fn negate(self) -> Self {
        match self {
            NameFilter::Not(inner) => *inner,
            other => NameFilter::Not(Box::new(other)),
        }
    }

    /// Whether the filter accepts the given file name.
    pub fn accepts(&self, name: &str) -> bool {
        match self {
            NameFilter::All => true,
            NameFilter::None => false,
            NameFilter::Exact(expected) => name == expected,
            NameFilter::Pattern(re) => re.is_match(name),
            NameFilter::Or(a, b) => a.accepts(name) || b.accepts(name),
            NameFilter::And(a, b) => a.accepts(name) && b.accepts(name),
            NameFilter::Not(inner) => !inner.accepts(name),
        }
    }

    /// The non-exclusion part of the filter: `true` unless the name is ruled
    /// out by a negated branch. Directory descent consults this so that
    /// descendant expressions never walk into excluded trees (`.svn` and
    /// friends) while still finding matches below arbitrary directories.
    pub fn allows_descent(&self, name: &str) -> bool {
        match self {
            NameFilter::And(a, b) => a.allows_descent(name) && b.allows_descent(name),
            NameFilter::Or(a, b) => a.allows_descent(name) || b.allows_descent(name),
            NameFilter::Not(inner) => !inner.accepts(name),
            _ => true,
        }
    }
}

/// Names commonly excluded from source walks.
pub fn default_excludes() -> NameFilter {
    NameFilter::glob(".*").or(NameFilter::exact("CVS"))
}

impl fmt::Debug for NameFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameFilter::All => f.write_str("*"),
            NameFilter::None => f.write_str("<none>"),
            NameFilter::Exact(name) => write!(f, "{name:?}"),
            NameFilter::Pattern(re) => write!(f, "/{}/", re.as_str()),
            NameFilter::Or(a, b) => write!(f, "({a:?} | {b:?})"),
            NameFilter::And(a, b) => write!(f, "({a:?} & {b:?})"),
            NameFilter::Not(inner) => write!(f, "!{inner:?}"),
        }
    }
}

impl From<&str> for NameFilter {
    /// Globs if the string contains `*`, otherwise matches exactly.
    fn from(s: &str) -> Self {
        if s.contains('*') {
            NameFilter::glob(s)
        } else {
            NameFilter::exact(s)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_is_anchored() {
        let filter = NameFilter::glob("*.scala");
        assert!(filter.accepts("Main.scala"));
        assert!(filter.accepts(".scala"));
        assert!(!filter.accepts("Main.scala.bak"));
        assert!(!filter.accepts("Main.java"));
    }

    #[test]
    fn glob_quotes_literal_segments() {
        let filter = NameFilter::glob("a+b*.txt");
        assert!(filter.accepts("a+b-1.txt"));
        assert!(!filter.accepts("axb-1.txt"));
    }

    #[test]
    fn combinators_short_circuit_semantics() {
        let filter = NameFilter::glob("*.scala").except(NameFilter::glob("*Test*"));
        assert!(filter.accepts("Build.scala"));
        assert!(!filter.accepts("BuildTest.scala"));
        assert!(!filter.accepts("Build.java"));

        let either = NameFilter::exact("a").or(NameFilter::exact("b"));
        assert!(either.accepts("a") && either.accepts("b") && !either.accepts("c"));
    }

    #[test]
    fn descent_ignores_inclusion_but_honors_exclusion() {
        let filter = NameFilter::glob("*.scala").except(NameFilter::exact(".svn"));
        // a directory named `src` fails the inclusion filter but may still
        // contain matches below it
        assert!(filter.allows_descent("src"));
        assert!(!filter.allows_descent(".svn"));
    }

    #[test]
    fn double_negation_collapses() {
        let filter = NameFilter::exact("x").negate().negate();
        assert!(filter.accepts("x"));
        assert!(matches!(filter, NameFilter::Exact(_)));
    }
}
