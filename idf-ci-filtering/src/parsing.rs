// SPDX-License-Identifier: Apache-2.0

//! Parsing for marker expressions and manifest conditions.
//!
//! Like the filterset parser this is modeled on, high level parsing functions should:
//! - return `Ok(_)` whenever they have consumed input
//! - on error, push an error into the parsing state and return [`ParseResult::Error`]
//!
//! so that as many errors as possible are reported in a single pass.

use crate::{
    condition::{CompareOp, ConditionNode, Operand},
    errors::{ParseSingleError, State},
    expression::MarkerNode,
};
use miette::SourceSpan;
use std::cell::RefCell;
use winnow::{
    LocatingSlice, ModalParser, Parser,
    ascii::multispace0,
    combinator::{alt, delimited, eof, opt, preceded, repeat, separated, terminated, trace},
    error::ErrMode,
    stream::{Location, SliceLen, Stream},
    token::{take_till, take_while},
};

pub(crate) type Span<'a> = winnow::Stateful<LocatingSlice<&'a str>, State<'a>>;
type Error = ();
type PResult<T> = winnow::ModalResult<T, Error>;

pub(crate) fn new_span<'a>(input: &'a str, errors: &'a RefCell<Vec<ParseSingleError>>) -> Span<'a> {
    Span {
        input: LocatingSlice::new(input),
        state: State::new(errors),
    }
}

/// The result of parsing a subexpression. Errors have already been recorded in the state.
pub(crate) enum ParseResult<T> {
    Valid(T),
    Error,
}

impl<T> ParseResult<T> {
    fn combine(self, other: Self, op: fn(T, T) -> T) -> Self {
        match (self, other) {
            (Self::Valid(a), Self::Valid(b)) => Self::Valid(op(a, b)),
            _ => Self::Error,
        }
    }

    fn map(self, op: fn(T) -> T) -> Self {
        match self {
            Self::Valid(value) => Self::Valid(op(value)),
            Self::Error => Self::Error,
        }
    }
}

fn expect<'a, F, T>(
    mut parser: F,
    make_err: fn(SourceSpan) -> ParseSingleError,
) -> impl ModalParser<Span<'a>, Option<T>, Error>
where
    F: ModalParser<Span<'a>, T, Error>,
{
    move |input: &mut Span<'a>| match parser.parse_next(input) {
        Ok(out) => Ok(Some(out)),
        Err(ErrMode::Backtrack(_)) | Err(ErrMode::Cut(_)) => {
            let start = input.current_token_start();
            let len = input.slice_len();
            input.state.report_error(make_err((start, len).into()));
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn expect_char<'a>(
    c: char,
    make_err: fn(SourceSpan) -> ParseSingleError,
) -> impl ModalParser<Span<'a>, Option<char>, Error> {
    let mut parser = ws(c);
    move |input: &mut Span<'a>| match parser.parse_next(input) {
        Ok(out) => Ok(Some(out)),
        Err(ErrMode::Backtrack(_)) | Err(ErrMode::Cut(_)) => {
            let start = input.current_token_start();
            input.state.report_error(make_err((start, 0).into()));
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn expect_expr<'a, T, P>(inner: P) -> impl ModalParser<Span<'a>, ParseResult<T>, Error>
where
    P: ModalParser<Span<'a>, ParseResult<T>, Error>,
{
    expect(inner, ParseSingleError::ExpectedExpr).map(|res| res.unwrap_or(ParseResult::Error))
}

fn ws<'a, T, P: ModalParser<Span<'a>, T, Error>>(
    mut inner: P,
) -> impl ModalParser<Span<'a>, T, Error> {
    move |input: &mut Span<'a>| {
        let start = input.checkpoint();
        multispace0.void().parse_next(input)?;
        inner.parse_next(input).inspect_err(|_| input.reset(&start))
    }
}

/// Parses `operand (operator operand)*`, folding left with `combine`.
fn binary_chain<'a, T>(
    operand: fn(&mut Span<'a>) -> PResult<ParseResult<T>>,
    operator: fn(&mut Span<'a>) -> PResult<()>,
    combine: fn(T, T) -> T,
) -> impl ModalParser<Span<'a>, ParseResult<T>, Error> {
    move |input: &mut Span<'a>| {
        let first = expect_expr(operand).parse_next(input)?;
        let rest: Vec<ParseResult<T>> =
            repeat(0.., preceded(operator, expect_expr(operand))).parse_next(input)?;
        Ok(rest
            .into_iter()
            .fold(first, |acc, next| acc.combine(next, combine)))
    }
}

// ---
// Marker and keyword expressions
// ---

const MARKER_KEYWORDS: &[&str] = &["and", "or", "not"];

fn is_marker_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | ':' | '+' | '-' | '.' | '[' | ']' | '\\' | '/')
}

fn marker_word<'i>(input: &mut Span<'i>) -> PResult<&'i str> {
    take_while(1.., is_marker_char).parse_next(input)
}

fn marker_keyword<'a>(keyword: &'static str) -> impl ModalParser<Span<'a>, (), Error> {
    marker_word.verify(move |word: &str| word == keyword).void()
}

fn marker_and_operator(input: &mut Span<'_>) -> PResult<()> {
    ws(marker_keyword("and")).parse_next(input)
}

fn marker_or_operator(input: &mut Span<'_>) -> PResult<()> {
    ws(marker_keyword("or")).parse_next(input)
}

fn parse_marker_ident(input: &mut Span<'_>) -> PResult<ParseResult<MarkerNode>> {
    trace(
        "parse_marker_ident",
        marker_word
            .verify(|word: &str| !MARKER_KEYWORDS.contains(&word))
            .map(|word: &str| ParseResult::Valid(MarkerNode::Ident(word.to_owned()))),
    )
    .parse_next(input)
}

fn parse_marker_not(input: &mut Span<'_>) -> PResult<ParseResult<MarkerNode>> {
    trace(
        "parse_marker_not",
        preceded(marker_keyword("not"), expect_expr(parse_marker_basic))
            .map(|expr| expr.map(MarkerNode::negate)),
    )
    .parse_next(input)
}

fn parse_marker_parens(input: &mut Span<'_>) -> PResult<ParseResult<MarkerNode>> {
    trace(
        "parse_marker_parens",
        delimited(
            '(',
            parse_marker_or,
            expect_char(')', ParseSingleError::ExpectedCloseParenthesis),
        )
        .map(|expr| expr.map(MarkerNode::parens)),
    )
    .parse_next(input)
}

fn parse_marker_basic(input: &mut Span<'_>) -> PResult<ParseResult<MarkerNode>> {
    trace(
        "parse_marker_basic",
        ws(alt((
            parse_marker_not,
            parse_marker_parens,
            parse_marker_ident,
        ))),
    )
    .parse_next(input)
}

fn parse_marker_and(input: &mut Span<'_>) -> PResult<ParseResult<MarkerNode>> {
    trace(
        "parse_marker_and",
        binary_chain(parse_marker_basic, marker_and_operator, MarkerNode::and),
    )
    .parse_next(input)
}

// "or" binds less tightly than "and", so parse and within or.
fn parse_marker_or(input: &mut Span<'_>) -> PResult<ParseResult<MarkerNode>> {
    trace(
        "parse_marker_or",
        binary_chain(parse_marker_and, marker_or_operator, MarkerNode::or),
    )
    .parse_next(input)
}

pub(crate) fn parse_marker_expr(
    input: Span<'_>,
) -> Result<ParseResult<MarkerNode>, ErrMode<Error>> {
    let (_, expr) = terminated(
        parse_marker_or,
        expect(ws(eof), ParseSingleError::ExpectedEndOfExpression),
    )
    .parse_peek(input)?;
    Ok(expr)
}

// ---
// Manifest conditions
// ---

const CONDITION_KEYWORDS: &[&str] = &["and", "or", "not", "in"];

fn is_condition_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn condition_word<'i>(input: &mut Span<'i>) -> PResult<&'i str> {
    take_while(1.., is_condition_char).parse_next(input)
}

fn condition_keyword<'a>(keyword: &'static str) -> impl ModalParser<Span<'a>, (), Error> {
    condition_word
        .verify(move |word: &str| word == keyword)
        .void()
}

fn condition_and_operator(input: &mut Span<'_>) -> PResult<()> {
    ws(condition_keyword("and")).parse_next(input)
}

fn condition_or_operator(input: &mut Span<'_>) -> PResult<()> {
    ws(condition_keyword("or")).parse_next(input)
}

fn parse_variable(input: &mut Span<'_>) -> PResult<Operand> {
    trace(
        "parse_variable",
        condition_word
            .verify(|word: &str| {
                word.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
                    && !CONDITION_KEYWORDS.contains(&word)
            })
            .map(|word: &str| Operand::Variable(word.to_owned())),
    )
    .parse_next(input)
}

fn parse_integer(input: &mut Span<'_>) -> PResult<Operand> {
    trace(
        "parse_integer",
        (opt('-'), take_while(1.., |c: char| c.is_ascii_digit()))
            .take()
            .verify_map(|digits: &str| digits.parse().ok())
            .map(Operand::Integer),
    )
    .parse_next(input)
}

fn quoted<'a>(mut quote: char) -> impl ModalParser<Span<'a>, Option<Operand>, Error> {
    move |input: &mut Span<'a>| {
        let start = input.current_token_start();
        let _: char = quote.parse_next(input)?;
        let value: &str = take_till(0.., quote).parse_next(input)?;
        let closed: Option<char> = opt(quote).parse_next(input)?;
        if closed.is_none() {
            let end = input.current_token_start();
            input
                .state
                .report_error(ParseSingleError::UnterminatedString((start, end - start).into()));
            return Ok(None);
        }
        Ok(Some(Operand::String(value.to_owned())))
    }
}

fn parse_string(input: &mut Span<'_>) -> PResult<Option<Operand>> {
    trace("parse_string", alt((quoted('"'), quoted('\'')))).parse_next(input)
}

fn parse_list(input: &mut Span<'_>) -> PResult<Option<Operand>> {
    trace(
        "parse_list",
        delimited(
            '[',
            terminated(separated(0.., parse_operand, ws(',')), opt(ws(','))),
            expect_char(']', ParseSingleError::ExpectedCloseBracket),
        )
        .map(|items: Vec<Option<Operand>>| {
            items
                .into_iter()
                .collect::<Option<Vec<_>>>()
                .map(Operand::List)
        }),
    )
    .parse_next(input)
}

fn parse_operand(input: &mut Span<'_>) -> PResult<Option<Operand>> {
    trace(
        "parse_operand",
        ws(alt((
            parse_string,
            parse_list,
            parse_integer.map(Some),
            parse_variable.map(Some),
        ))),
    )
    .parse_next(input)
}

fn parse_compare_op(input: &mut Span<'_>) -> PResult<CompareOp> {
    trace(
        "parse_compare_op",
        ws(alt((
            "==".value(CompareOp::Eq),
            "!=".value(CompareOp::NotEq),
            (condition_keyword("not"), ws(condition_keyword("in"))).value(CompareOp::NotIn),
            condition_keyword("in").value(CompareOp::In),
        ))),
    )
    .parse_next(input)
}

fn parse_comparison(input: &mut Span<'_>) -> PResult<ParseResult<ConditionNode>> {
    trace("parse_comparison", |input: &mut Span<'_>| {
        let left = parse_operand.parse_next(input)?;
        let Some(op) = expect(parse_compare_op, ParseSingleError::ExpectedOperator)
            .parse_next(input)?
        else {
            return Ok(ParseResult::Error);
        };
        let right = expect(parse_operand, ParseSingleError::ExpectedOperand)
            .parse_next(input)?
            .flatten();
        Ok(match (left, right) {
            (Some(left), Some(right)) => {
                ParseResult::Valid(ConditionNode::Compare { left, op, right })
            }
            _ => ParseResult::Error,
        })
    })
    .parse_next(input)
}

fn parse_condition_parens(input: &mut Span<'_>) -> PResult<ParseResult<ConditionNode>> {
    trace(
        "parse_condition_parens",
        delimited(
            '(',
            parse_condition_or,
            expect_char(')', ParseSingleError::ExpectedCloseParenthesis),
        )
        .map(|expr| expr.map(ConditionNode::parens)),
    )
    .parse_next(input)
}

fn parse_condition_basic(input: &mut Span<'_>) -> PResult<ParseResult<ConditionNode>> {
    trace(
        "parse_condition_basic",
        ws(alt((parse_condition_parens, parse_comparison))),
    )
    .parse_next(input)
}

fn parse_condition_and(input: &mut Span<'_>) -> PResult<ParseResult<ConditionNode>> {
    trace(
        "parse_condition_and",
        binary_chain(
            parse_condition_basic,
            condition_and_operator,
            ConditionNode::and,
        ),
    )
    .parse_next(input)
}

fn parse_condition_or(input: &mut Span<'_>) -> PResult<ParseResult<ConditionNode>> {
    trace(
        "parse_condition_or",
        binary_chain(parse_condition_and, condition_or_operator, ConditionNode::or),
    )
    .parse_next(input)
}

pub(crate) fn parse_condition(
    input: Span<'_>,
) -> Result<ParseResult<ConditionNode>, ErrMode<Error>> {
    let (_, expr) = terminated(
        parse_condition_or,
        expect(ws(eof), ParseSingleError::ExpectedEndOfExpression),
    )
    .parse_peek(input)?;
    Ok(expr)
}
