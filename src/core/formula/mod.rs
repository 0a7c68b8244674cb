//! Formula language: tokenizer, parser, evaluator and built-in functions
//!
//! A cell value starting with `=` is a formula; its body is an arithmetic
//! expression over integer/float literals, cell references and calls to
//! `SUM`, `AVG`, `MIN`, `MAX` and `EXTERNAL_REF`.

pub mod evaluator;
mod functions;
pub mod math;
pub mod parser;
pub mod tokenizer;

pub use evaluator::{evaluate, CellResolver};
pub use parser::{
    is_cell_identifier, parse_expr, parse_value, Expr, Literal, LiteralKind, ParseError,
    EXTERNAL_REF,
};
pub use tokenizer::{find_all_identifiers, tokenize, Operator, Token, TokenizeError};

/// Leading marker that turns a cell value into a formula
pub const FORMULA_MARKER: char = '=';

/// Result text of a formula that cannot be computed
pub const ERROR_RESULT: &str = "ERROR";

pub fn is_formula(value: &str) -> bool {
    value.starts_with(FORMULA_MARKER)
}

/// Formula body without the marker, or `None` for literals
pub fn formula_body(value: &str) -> Option<&str> {
    value.strip_prefix(FORMULA_MARKER)
}
