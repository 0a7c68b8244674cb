use thiserror::Error;

use crate::core::formula::parser::ParseError;
use crate::core::formula::tokenizer::Operator;

pub type StoreResult<T> = Result<T, StoreError>;
pub type EvalResult<T> = Result<T, ResolveError>;

/// Hard failures coming from the store collaborator. These abort the request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("key not found: {key}")]
    NotFound { key: String },

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("unknown subscription: {0}")]
    UnknownSubscription(String),
}

impl StoreError {
    pub fn not_found(key: impl Into<String>) -> Self {
        StoreError::NotFound { key: key.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Failures while reducing an AST to a literal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("operator '{op}' is not defined for text value {operand:?}")]
    TypeMismatch { op: Operator, operand: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error("numeric overflow")]
    Overflow,

    #[error("invalid number: {0:?}")]
    InvalidNumber(String),

    #[error("unknown function {0:?}")]
    UnknownFunction(String),

    #[error("invalid call: {0}")]
    InvalidCall(String),

    #[error("reference to unknown cell '{0}'")]
    UnknownCell(String),

    #[error("external reference failed: {0}")]
    External(String),

    #[error("expression could not be evaluated")]
    InvalidNode,

    #[error("references nested deeper than {0} levels")]
    DepthExceeded(usize),
}

/// Soft formula error: the formula is stored text that cannot produce a value.
///
/// Never aborts a request. Callers surface it as the `ERROR` result together
/// with the unchanged raw value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("{0}")]
    Eval(#[from] EvalError),

    #[error("cycle dependency detected at cell '{0}'")]
    Cycle(String),

    #[error("dependent cell '{cell}' would fail: {source}")]
    BrokenDependent {
        cell: String,
        source: Box<FormulaError>,
    },
}

impl FormulaError {
    pub fn is_cycle(&self) -> bool {
        match self {
            FormulaError::Cycle(_) => true,
            FormulaError::BrokenDependent { source, .. } => source.is_cycle(),
            _ => false,
        }
    }
}

/// Anything that can stop an evaluation: either a soft formula error or a
/// hard store failure that must be propagated to the request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error(transparent)]
    Formula(#[from] FormulaError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<EvalError> for ResolveError {
    fn from(err: EvalError) -> Self {
        ResolveError::Formula(FormulaError::Eval(err))
    }
}

impl From<ParseError> for ResolveError {
    fn from(err: ParseError) -> Self {
        ResolveError::Formula(FormulaError::Parse(err))
    }
}
