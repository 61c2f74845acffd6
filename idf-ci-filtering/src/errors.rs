// SPDX-License-Identifier: Apache-2.0

//! Errors produced while parsing or evaluating expressions.

use miette::{Diagnostic, SourceSpan};
use std::cell::RefCell;
use thiserror::Error;

/// A set of errors that occurred while parsing an expression.
#[derive(Clone, Debug, Error, Diagnostic)]
#[error("failed to parse expression `{input}`")]
#[non_exhaustive]
pub struct ExpressionParseErrors {
    /// The input string.
    #[source_code]
    pub input: String,

    /// The parse errors returned.
    #[related]
    pub errors: Vec<ParseSingleError>,
}

impl ExpressionParseErrors {
    pub(crate) fn new(input: impl Into<String>, errors: Vec<ParseSingleError>) -> Self {
        Self {
            input: input.into(),
            errors,
        }
    }
}

/// A single parse error, with the span in the input it applies to.
#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseSingleError {
    /// An expression was expected.
    #[error("expected expression")]
    ExpectedExpr(#[label("missing expression")] SourceSpan),

    /// A closing parenthesis was expected.
    #[error("expected close parenthesis")]
    ExpectedCloseParenthesis(#[label("missing ')'")] SourceSpan),

    /// A closing bracket was expected.
    #[error("expected close bracket")]
    ExpectedCloseBracket(#[label("missing ']'")] SourceSpan),

    /// A closing quote was expected.
    #[error("unterminated string")]
    UnterminatedString(#[label("missing closing quote")] SourceSpan),

    /// A comparison operator was expected.
    #[error("expected comparison operator")]
    ExpectedOperator(#[label("expected one of `==`, `!=`, `in`, `not in`")] SourceSpan),

    /// A comparison operand was expected.
    #[error("expected operand")]
    ExpectedOperand(#[label("expected a variable, string, integer or list")] SourceSpan),

    /// Input remained after a complete expression.
    #[error("expected end of expression")]
    ExpectedEndOfExpression(#[label("unparsed input")] SourceSpan),

    /// The parser failed in an unexpected way.
    #[error("unknown parsing error")]
    Unknown,
}

/// An error that occurred while evaluating a manifest condition.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConditionEvalError {
    /// The condition refers to a variable that has no value.
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),

    /// The operator cannot be applied to the given operand kinds.
    #[error("cannot apply `{op}` to {left} and {right}")]
    TypeMismatch {
        /// The operator.
        op: &'static str,
        /// The kind of the left operand.
        left: &'static str,
        /// The kind of the right operand.
        right: &'static str,
    },
}

#[derive(Clone, Debug)]
pub(crate) struct State<'a> {
    // A `RefCell` is required here because the state must implement `Clone` to work with winnow.
    errors: &'a RefCell<Vec<ParseSingleError>>,
}

impl<'a> State<'a> {
    pub(crate) fn new(errors: &'a RefCell<Vec<ParseSingleError>>) -> Self {
        Self { errors }
    }

    pub(crate) fn report_error(&self, error: ParseSingleError) {
        self.errors.borrow_mut().push(error);
    }
}
