// SPDX-License-Identifier: Apache-2.0

use crate::{
    errors::{ExpressionParseErrors, ParseSingleError},
    parsing::{ParseResult, new_span, parse_marker_expr},
};
use std::{cell::RefCell, fmt};

/// A pytest-style boolean expression over identifiers.
///
/// The same syntax is used for marker expressions (`-m`), where an identifier matches if the
/// test carries that marker, and for keyword expressions (`-k`), where an identifier matches
/// if it is a case-insensitive substring of one of the test's keywords. What an identifier
/// means is decided by the caller of [`FilterExpr::matches`].
///
/// An empty expression matches everything.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterExpr {
    input: String,
    root: Option<MarkerNode>,
}

impl FilterExpr {
    /// Parses an expression.
    pub fn parse(input: impl Into<String>) -> Result<Self, ExpressionParseErrors> {
        let input = input.into();
        if input.trim().is_empty() {
            return Ok(Self { input, root: None });
        }

        let errors = RefCell::new(Vec::new());
        let result = parse_marker_expr(new_span(&input, &errors));
        let mut errors = errors.into_inner();
        match result {
            Ok(ParseResult::Valid(root)) if errors.is_empty() => Ok(Self {
                input,
                root: Some(root),
            }),
            _ => {
                if errors.is_empty() {
                    errors.push(ParseSingleError::Unknown);
                }
                Err(ExpressionParseErrors::new(input, errors))
            }
        }
    }

    /// Returns an expression that matches everything.
    pub fn match_all() -> Self {
        Self {
            input: String::new(),
            root: None,
        }
    }

    /// Returns true if this expression matches everything.
    pub fn is_match_all(&self) -> bool {
        self.root.is_none()
    }

    /// Returns the source text of this expression.
    pub fn as_str(&self) -> &str {
        &self.input
    }

    /// Evaluates the expression, calling `is_match` for each identifier.
    pub fn matches(&self, mut is_match: impl FnMut(&str) -> bool) -> bool {
        self.root
            .as_ref()
            .is_none_or(|root| root.evaluate(&mut is_match))
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.input)
    }
}

/// A node in a parsed [`FilterExpr`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarkerNode {
    /// A bare identifier.
    Ident(String),
    /// `not <expr>`
    Not(Box<MarkerNode>),
    /// `<expr> and <expr>`
    And(Box<MarkerNode>, Box<MarkerNode>),
    /// `<expr> or <expr>`
    Or(Box<MarkerNode>, Box<MarkerNode>),
    /// `(<expr>)`
    Parens(Box<MarkerNode>),
}

impl MarkerNode {
    pub(crate) fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    pub(crate) fn and(a: Self, b: Self) -> Self {
        Self::And(Box::new(a), Box::new(b))
    }

    pub(crate) fn or(a: Self, b: Self) -> Self {
        Self::Or(Box::new(a), Box::new(b))
    }

    pub(crate) fn parens(self) -> Self {
        Self::Parens(Box::new(self))
    }

    fn evaluate(&self, is_match: &mut dyn FnMut(&str) -> bool) -> bool {
        match self {
            Self::Ident(name) => is_match(name),
            Self::Not(expr) => !expr.evaluate(is_match),
            Self::And(a, b) => a.evaluate(is_match) && b.evaluate(is_match),
            Self::Or(a, b) => a.evaluate(is_match) || b.evaluate(is_match),
            Self::Parens(expr) => expr.evaluate(is_match),
        }
    }
}

impl fmt::Display for MarkerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(name) => f.write_str(name),
            Self::Not(expr) => write!(f, "not {expr}"),
            Self::And(a, b) => write!(f, "{a} and {b}"),
            Self::Or(a, b) => write!(f, "{a} or {b}"),
            Self::Parens(expr) => write!(f, "({expr})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use test_case::test_case;

    fn markers(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test_case("", &["generic"], true; "empty matches everything")]
    #[test_case("generic", &["generic", "esp32"], true; "single marker")]
    #[test_case("not host_test", &["host_test"], false; "negation")]
    #[test_case("not host_test", &["generic"], true; "negation of absent marker")]
    #[test_case("generic and not qemu", &["generic", "qemu"], false; "conjunction")]
    #[test_case("qemu or host_test", &["host_test"], true; "disjunction")]
    #[test_case("not (a or b)", &["c"], true; "parenthesized")]
    fn test_marker_matching(expr: &str, present: &[&str], expected: bool) {
        let expr = FilterExpr::parse(expr).expect("valid expression");
        let present = markers(present);
        assert_eq!(expr.matches(|name| present.contains(name)), expected);
    }

    #[test]
    fn test_parse_errors_render() {
        let err = FilterExpr::parse("generic and (").unwrap_err();
        assert_eq!(err.input, "generic and (");
        assert!(!err.errors.is_empty());

        let rendered = format!("{:?}", miette::Report::new(err));
        assert!(rendered.contains("expected"), "rendered: {rendered}");
    }

    #[test]
    fn test_display_preserves_input() {
        let expr = FilterExpr::parse("a  and b").unwrap();
        assert_eq!(expr.to_string(), "a  and b");
        assert!(!expr.is_match_all());
        assert!(FilterExpr::match_all().is_match_all());
    }

    proptest! {
        #[test]
        fn proptest_parse_never_panics(input in "[a-z() ]{0,24}") {
            let _ = FilterExpr::parse(input);
        }
    }
}
