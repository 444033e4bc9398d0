//! Arithmetic calculator.
//!
//! Evaluates numeric expressions with `+ - * / % ^`, unary minus and
//! parentheses. The only names are the constants `pi` and `e` and the
//! functions `sqrt sin cos tan log ln exp abs`; anything else is rejected.
//!
//! ```text
//! 2 * (3 + 4)      → 14
//! -2 ^ 2           → -4
//! 2 ^ 3 ^ 2        → 512
//! sqrt(16) + pi    → 7.14159…
//! ```

use std::sync::LazyLock;

use pest::Parser;
use pest::iterators::Pairs;
use pest::pratt_parser::{Assoc, Op, PrattParser};
use thiserror::Error;

#[derive(pest_derive::Parser)]
#[grammar = "tools/calculator.pest"]
struct CalculatorParser;

static PRATT: LazyLock<PrattParser<Rule>> = LazyLock::new(|| {
    PrattParser::new()
        .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
        .op(Op::infix(Rule::mul, Assoc::Left)
            | Op::infix(Rule::div, Assoc::Left)
            | Op::infix(Rule::rem, Assoc::Left))
        .op(Op::prefix(Rule::neg))
        .op(Op::infix(Rule::pow, Assoc::Right))
});

/// Calculator failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalcError {
    #[error("expression is empty")]
    Empty,

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("result is not a finite number")]
    NonFinite,
}

/// Evaluate an arithmetic expression.
pub fn evaluate(expr: &str) -> Result<f64, CalcError> {
    if expr.trim().is_empty() {
        return Err(CalcError::Empty);
    }

    let mut pairs = CalculatorParser::parse(Rule::calculation, expr)
        .map_err(|e| CalcError::Syntax(e.variant.message().into_owned()))?;
    let root = pairs
        .next()
        .ok_or_else(|| CalcError::Syntax("no expression".to_string()))?;

    finite(eval(root.into_inner())?)
}

fn eval(pairs: Pairs<Rule>) -> Result<f64, CalcError> {
    PRATT
        .map_primary(|primary| match primary.as_rule() {
            Rule::number => primary
                .as_str()
                .parse::<f64>()
                .map_err(|e| CalcError::Syntax(format!("bad number '{}': {}", primary.as_str(), e))),
            Rule::ident => constant(primary.as_str()),
            Rule::expr => eval(primary.into_inner()),
            Rule::call => {
                let mut inner = primary.into_inner();
                let (Some(name), Some(arg)) = (inner.next(), inner.next()) else {
                    return Err(CalcError::Syntax("malformed function call".to_string()));
                };
                apply(name.as_str(), eval(arg.into_inner())?)
            }
            rule => Err(CalcError::Syntax(format!("unexpected {:?}", rule))),
        })
        .map_prefix(|op, rhs| match op.as_rule() {
            Rule::neg => Ok(-rhs?),
            rule => Err(CalcError::Syntax(format!("unexpected prefix {:?}", rule))),
        })
        .map_infix(|lhs, op, rhs| {
            let (lhs, rhs) = (lhs?, rhs?);
            let value = match op.as_rule() {
                Rule::add => lhs + rhs,
                Rule::sub => lhs - rhs,
                Rule::mul => lhs * rhs,
                Rule::div if rhs == 0.0 => return Err(CalcError::DivisionByZero),
                Rule::div => lhs / rhs,
                Rule::rem if rhs == 0.0 => return Err(CalcError::DivisionByZero),
                Rule::rem => lhs % rhs,
                Rule::pow => lhs.powf(rhs),
                rule => return Err(CalcError::Syntax(format!("unexpected operator {:?}", rule))),
            };
            finite(value)
        })
        .parse(pairs)
}

fn constant(name: &str) -> Result<f64, CalcError> {
    match name {
        "pi" => Ok(std::f64::consts::PI),
        "e" => Ok(std::f64::consts::E),
        other => Err(CalcError::UnknownIdentifier(other.to_string())),
    }
}

fn apply(name: &str, x: f64) -> Result<f64, CalcError> {
    let value = match name {
        "sqrt" => x.sqrt(),
        "sin" => x.sin(),
        "cos" => x.cos(),
        "tan" => x.tan(),
        "log" => x.log10(),
        "ln" => x.ln(),
        "exp" => x.exp(),
        "abs" => x.abs(),
        other => return Err(CalcError::UnknownFunction(other.to_string())),
    };
    finite(value)
}

fn finite(value: f64) -> Result<f64, CalcError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CalcError::NonFinite)
    }
}
