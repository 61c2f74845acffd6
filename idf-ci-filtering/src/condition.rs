// SPDX-License-Identifier: Apache-2.0

use crate::{
    errors::{ConditionEvalError, ExpressionParseErrors, ParseSingleError},
    parsing::{ParseResult, new_span, parse_condition},
};
use std::{cell::RefCell, fmt};

/// A manifest `if` condition, e.g. `IDF_TARGET in ["esp32", "esp32s3"] and CONFIG_NAME == "psram"`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestCondition {
    input: String,
    root: ConditionNode,
}

impl ManifestCondition {
    /// Parses a condition.
    pub fn parse(input: impl Into<String>) -> Result<Self, ExpressionParseErrors> {
        let input = input.into();
        let errors = RefCell::new(Vec::new());
        let result = parse_condition(new_span(&input, &errors));
        let mut errors = errors.into_inner();
        match result {
            Ok(ParseResult::Valid(root)) if errors.is_empty() => Ok(Self { input, root }),
            _ => {
                if errors.is_empty() {
                    errors.push(ParseSingleError::Unknown);
                }
                Err(ExpressionParseErrors::new(input, errors))
            }
        }
    }

    /// Returns the source text of this condition.
    pub fn as_str(&self) -> &str {
        &self.input
    }

    /// Returns the root node.
    pub fn root(&self) -> &ConditionNode {
        &self.root
    }

    /// Evaluates the condition, resolving variables through `lookup`.
    ///
    /// `and` and `or` short-circuit, so a variable on the right-hand side that is never reached
    /// does not need to be known.
    pub fn evaluate(
        &self,
        lookup: impl Fn(&str) -> Option<Value>,
    ) -> Result<bool, ConditionEvalError> {
        self.root.evaluate(&lookup)
    }
}

impl fmt::Display for ManifestCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.input)
    }
}

/// A node in a parsed [`ManifestCondition`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConditionNode {
    /// `<operand> <op> <operand>`
    Compare {
        /// Left operand.
        left: Operand,
        /// Comparison operator.
        op: CompareOp,
        /// Right operand.
        right: Operand,
    },
    /// `<cond> and <cond>`
    And(Box<ConditionNode>, Box<ConditionNode>),
    /// `<cond> or <cond>`
    Or(Box<ConditionNode>, Box<ConditionNode>),
    /// `(<cond>)`
    Parens(Box<ConditionNode>),
}

impl ConditionNode {
    pub(crate) fn and(a: Self, b: Self) -> Self {
        Self::And(Box::new(a), Box::new(b))
    }

    pub(crate) fn or(a: Self, b: Self) -> Self {
        Self::Or(Box::new(a), Box::new(b))
    }

    pub(crate) fn parens(self) -> Self {
        Self::Parens(Box::new(self))
    }

    fn evaluate(&self, lookup: &dyn Fn(&str) -> Option<Value>) -> Result<bool, ConditionEvalError> {
        match self {
            Self::Compare { left, op, right } => {
                op.apply(&left.resolve(lookup)?, &right.resolve(lookup)?)
            }
            Self::And(a, b) => Ok(a.evaluate(lookup)? && b.evaluate(lookup)?),
            Self::Or(a, b) => Ok(a.evaluate(lookup)? || b.evaluate(lookup)?),
            Self::Parens(expr) => expr.evaluate(lookup),
        }
    }
}

/// An operand in a comparison.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    /// A variable such as `IDF_TARGET`.
    Variable(String),
    /// A quoted string.
    String(String),
    /// An integer literal.
    Integer(i64),
    /// A list literal.
    List(Vec<Operand>),
}

impl Operand {
    fn resolve(&self, lookup: &dyn Fn(&str) -> Option<Value>) -> Result<Value, ConditionEvalError> {
        match self {
            Self::Variable(name) => {
                lookup(name).ok_or_else(|| ConditionEvalError::UnknownVariable(name.clone()))
            }
            Self::String(s) => Ok(Value::String(s.clone())),
            Self::Integer(i) => Ok(Value::Integer(*i)),
            Self::List(items) => items
                .iter()
                .map(|item| item.resolve(lookup))
                .collect::<Result<_, _>>()
                .map(Value::List),
        }
    }
}

/// A comparison operator.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `in`
    In,
    /// `not in`
    NotIn,
}

impl CompareOp {
    fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::In => "in",
            Self::NotIn => "not in",
        }
    }

    fn apply(self, left: &Value, right: &Value) -> Result<bool, ConditionEvalError> {
        match self {
            Self::Eq => Ok(left == right),
            Self::NotEq => Ok(left != right),
            Self::In => self.contains(left, right),
            Self::NotIn => self.contains(left, right).map(|found| !found),
        }
    }

    fn contains(self, needle: &Value, haystack: &Value) -> Result<bool, ConditionEvalError> {
        match (needle, haystack) {
            (_, Value::List(items)) => Ok(items.contains(needle)),
            (Value::String(needle), Value::String(haystack)) => Ok(haystack.contains(needle)),
            _ => Err(ConditionEvalError::TypeMismatch {
                op: self.as_str(),
                left: needle.kind(),
                right: haystack.kind(),
            }),
        }
    }
}

/// The value of a resolved operand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// A string.
    String(String),
    /// An integer.
    Integer(i64),
    /// A list.
    List(Vec<Value>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Self::String(_) => "a string",
            Self::Integer(_) => "an integer",
            Self::List(_) => "a list",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}
