//! Numeric operations with type promotion
//!
//! Integers are exact (`BigInt`). A float operand, or division, moves the
//! computation to `f64`. Results are re-serialised to their shortest
//! round-trippable decimal text so recomputation is stable.

use std::cmp::Ordering;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::ToPrimitive;

use super::parser::{Literal, LiteralKind};
use super::tokenizer::Operator;
use crate::error::EvalError;

/// Apply a binary operator to two literals
pub fn apply(op: Operator, left: &Literal, right: &Literal) -> Result<Literal, EvalError> {
    for operand in [left, right] {
        if operand.kind == LiteralKind::String {
            return Err(EvalError::TypeMismatch {
                op,
                operand: operand.text.clone(),
            });
        }
    }

    let promote = left.kind == LiteralKind::Float
        || right.kind == LiteralKind::Float
        || op == Operator::Div;

    if promote {
        apply_float(op, parse_float(left)?, parse_float(right)?)
    } else {
        apply_int(op, parse_int(left)?, parse_int(right)?)
    }
}

fn apply_int(op: Operator, x: BigInt, y: BigInt) -> Result<Literal, EvalError> {
    let result = match op {
        Operator::Add => x + y,
        Operator::Sub => x - y,
        Operator::Mul => x * y,
        // Division always promotes; kept for exhaustiveness.
        Operator::Div => return apply_float(op, to_float(&x)?, to_float(&y)?),
    };
    Ok(Literal::int(result.to_string()))
}

fn apply_float(op: Operator, x: f64, y: f64) -> Result<Literal, EvalError> {
    let result = match op {
        Operator::Add => x + y,
        Operator::Sub => x - y,
        Operator::Mul => x * y,
        Operator::Div => {
            if y == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            x / y
        }
    };

    Ok(Literal::float(format_float(result)?))
}

/// Shortest decimal text that parses back to `value`, never in exponent form
pub fn format_float(value: f64) -> Result<String, EvalError> {
    if !value.is_finite() {
        return Err(EvalError::Overflow);
    }
    // Normalise -0 so "0" is the only zero spelling.
    let value = if value == 0.0 { 0.0 } else { value };
    Ok(format!("{}", value))
}

fn parse_int(literal: &Literal) -> Result<BigInt, EvalError> {
    BigInt::from_str(&literal.text).map_err(|_| EvalError::InvalidNumber(literal.text.clone()))
}

fn parse_float(literal: &Literal) -> Result<f64, EvalError> {
    literal
        .text
        .parse::<f64>()
        .map_err(|_| EvalError::InvalidNumber(literal.text.clone()))
}

fn to_float(value: &BigInt) -> Result<f64, EvalError> {
    value.to_f64().ok_or(EvalError::Overflow)
}

/// Arbitrary-precision magnitude of a literal's text, for comparisons only
pub fn magnitude(literal: &Literal) -> Result<BigDecimal, EvalError> {
    if literal.kind == LiteralKind::String {
        return Err(EvalError::InvalidNumber(literal.text.clone()));
    }
    BigDecimal::from_str(&normalize_decimal(&literal.text))
        .map_err(|_| EvalError::InvalidNumber(literal.text.clone()))
}

/// Spell out the zeros of forms like ".5" and "1." that the scanner accepts
fn normalize_decimal(text: &str) -> String {
    let (sign, unsigned) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text),
    };
    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(idx) => unsigned.split_at(idx),
        None => (unsigned, ""),
    };

    let mut normalized = String::with_capacity(text.len() + 2);
    normalized.push_str(sign);
    if mantissa.starts_with('.') {
        normalized.push('0');
    }
    normalized.push_str(mantissa);
    if mantissa.ends_with('.') {
        normalized.push('0');
    }
    normalized.push_str(exponent);
    normalized
}

/// Compare two numeric literals by exact magnitude
pub fn compare(left: &Literal, right: &Literal) -> Result<Ordering, EvalError> {
    Ok(magnitude(left)?.cmp(&magnitude(right)?))
}
