//! Formula parser
//!
//! Converts a token stream into an Abstract Syntax Tree (AST) using recursive
//! descent for primaries and iterative precedence climbing for binary
//! operators. Errors are recorded (first one wins) and parsing carries on,
//! leaving an `Expr::Invalid` marker where the failure happened.

use std::fmt;

use super::tokenizer::{tokenize, Operator, Token, Tokenizer};

/// Reserved function whose single argument is a remote locator, not a cell
pub const EXTERNAL_REF: &str = "EXTERNAL_REF";

/// Type tag carried by literals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    Int,
    Float,
    String,
}

/// A literal value in its canonical textual form.
///
/// Numeric semantics are left to the evaluator; the parser only tags kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Literal {
    pub kind: LiteralKind,
    pub text: String,
}

impl Literal {
    pub fn new(kind: LiteralKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn int(text: impl Into<String>) -> Self {
        Self::new(LiteralKind::Int, text)
    }

    pub fn float(text: impl Into<String>) -> Self {
        Self::new(LiteralKind::Float, text)
    }

    pub fn string(text: impl Into<String>) -> Self {
        Self::new(LiteralKind::String, text)
    }

    pub fn is_numeric(&self) -> bool {
        self.kind != LiteralKind::String
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Abstract Syntax Tree node for formula expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// A cell reference
    Identifier(String),
    /// Unary operation: -expr, +expr
    Unary { op: Operator, operand: Box<Expr> },
    /// Binary operation: left op right
    Binary {
        op: Operator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Parenthesized expression
    Paren(Box<Expr>),
    /// Function call: NAME(arg1, arg2, ...)
    Call { name: String, args: Vec<Expr> },
    /// Parse failure marker
    Invalid,
}

impl Expr {
    /// Number of nodes on the longest root-to-leaf path
    pub fn height(&self) -> usize {
        match self {
            Expr::Literal(_) | Expr::Identifier(_) | Expr::Invalid => 1,
            Expr::Unary { operand, .. } => operand.height() + 1,
            Expr::Binary { left, right, .. } => left.height().max(right.height()) + 1,
            Expr::Paren(inner) => inner.height() + 1,
            Expr::Call { args, .. } => args.iter().map(Expr::height).max().unwrap_or(0) + 1,
        }
    }
}

/// Error during parsing
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Parse error at position {}: {}",
            self.position, self.message
        )
    }
}

impl std::error::Error for ParseError {}

/// Deepest expression tree the parser will build
pub const MAX_NESTING_DEPTH: usize = 256;

/// Parsed subtree together with its height
type Node = (Expr, usize);

/// Parser pulling tokens lazily from a [`Tokenizer`]
pub struct Parser<'a> {
    tokenizer: Tokenizer<'a>,
    current: Token,
    position: usize,
    /// Recursion depth of the descent in progress
    depth: usize,
    error: Option<ParseError>,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut parser = Self {
            tokenizer: Tokenizer::new(source),
            current: Token::Eof,
            position: 0,
            depth: 0,
            error: None,
        };
        parser.advance();
        parser
    }

    /// Parse a full expression; trailing tokens are an error
    pub fn parse(mut self) -> Result<Expr, ParseError> {
        let (expr, _) = self.expression();

        if self.current != Token::Eof {
            let message = format!("Unexpected {} after expression", self.current);
            self.error(message);
        }

        match self.error {
            Some(err) => Err(err),
            None => Ok(expr),
        }
    }

    /// Record an error; only the first one is kept
    fn error(&mut self, message: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(ParseError::new(message, self.position));
        }
    }

    fn too_deep(&mut self) -> Node {
        self.error(format!(
            "Expression nested deeper than {} levels",
            MAX_NESTING_DEPTH
        ));
        (Expr::Invalid, 1)
    }

    /// Wrap a freshly built node, refusing trees taller than the limit
    fn node(&mut self, expr: Expr, height: usize) -> Node {
        if height > MAX_NESTING_DEPTH {
            return self.too_deep();
        }
        (expr, height)
    }

    /// Move to the next token. A tokenizer error ends the stream.
    fn advance(&mut self) {
        self.position = self.tokenizer.offset();
        match self.tokenizer.next_token() {
            Ok(token) => self.current = token,
            Err(err) => {
                if self.error.is_none() {
                    self.error = Some(ParseError::new(err.message, err.position));
                }
                self.current = Token::Eof;
            }
        }
    }

    /// Consume `expected` or record an error
    fn expect(&mut self, expected: &Token) -> bool {
        if &self.current == expected {
            self.advance();
            true
        } else {
            let message = format!("Expected {}, found {}", expected, self.current);
            self.error(message);
            false
        }
    }

    fn expression(&mut self) -> Node {
        self.binary(1)
    }

    /// Precedence climbing: all operators are left-associative
    fn binary(&mut self, min_precedence: u8) -> Node {
        let (mut left, mut height) = self.unary();

        loop {
            let op = match self.current {
                Token::Operator(op) if op.precedence() >= min_precedence => op,
                _ => return (left, height),
            };
            self.advance();

            let (right, right_height) = self.binary(op.precedence() + 1);
            let folded = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
            (left, height) = self.node(folded, height.max(right_height) + 1);
            if matches!(left, Expr::Invalid) {
                return (left, height);
            }
        }
    }

    /// Unary: ( "+" | "-" ) unary | primary
    fn unary(&mut self) -> Node {
        if self.depth >= MAX_NESTING_DEPTH {
            return self.too_deep();
        }
        self.depth += 1;

        let parsed = match self.current {
            Token::Operator(op @ (Operator::Add | Operator::Sub)) => {
                self.advance();
                let (operand, height) = self.unary();
                let expr = Expr::Unary {
                    op,
                    operand: Box::new(operand),
                };
                self.node(expr, height + 1)
            }
            _ => self.primary(),
        };

        self.depth -= 1;
        parsed
    }

    /// Primary: IDENTIFIER | IDENTIFIER "(" args ")" | INT | FLOAT | "(" expr ")"
    fn primary(&mut self) -> Node {
        match self.current.clone() {
            Token::Identifier(name) => {
                if self.tokenizer_at_open_paren() {
                    return self.call(name);
                }
                self.advance();
                (Expr::Identifier(name), 1)
            }
            Token::Int(text) => {
                self.advance();
                (Expr::Literal(Literal::int(text)), 1)
            }
            Token::Float(text) => {
                self.advance();
                (Expr::Literal(Literal::float(text)), 1)
            }
            Token::OpenParen => {
                self.advance();
                let (inner, height) = self.expression();
                if self.expect(&Token::CloseParen) {
                    self.node(Expr::Paren(Box::new(inner)), height + 1)
                } else {
                    (Expr::Invalid, 1)
                }
            }
            token => {
                self.error(format!("Unexpected {}", token));
                (Expr::Invalid, 1)
            }
        }
    }

    /// Whether the token after the current identifier is `(`
    fn tokenizer_at_open_paren(&self) -> bool {
        let mut lookahead = self.tokenizer.clone();
        matches!(lookahead.next_token(), Ok(Token::OpenParen))
    }

    /// Call: NAME "(" ( expr ( "," expr )* )? ")"
    fn call(&mut self, name: String) -> Node {
        // current = name, next = "("
        self.advance();
        debug_assert_eq!(self.current, Token::OpenParen);

        if name.eq_ignore_ascii_case(EXTERNAL_REF) {
            let locator = self.tokenizer.read_raw_argument().to_string();
            self.advance();
            if !self.expect(&Token::CloseParen) {
                return (Expr::Invalid, 1);
            }
            let args = if locator.is_empty() {
                Vec::new()
            } else {
                vec![Expr::Identifier(locator)]
            };
            return (Expr::Call { name, args }, 2);
        }

        self.advance();
        let mut args = Vec::new();
        let mut height = 0;

        if self.current != Token::CloseParen {
            loop {
                let (arg, arg_height) = self.expression();
                args.push(arg);
                height = height.max(arg_height);
                if self.current == Token::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
        }

        if !self.expect(&Token::CloseParen) {
            return (Expr::Invalid, 1);
        }

        self.node(Expr::Call { name, args }, height + 1)
    }
}

/// Parse a formula body (without the leading '=')
pub fn parse_expr(source: &str) -> Result<Expr, ParseError> {
    Parser::new(source).parse()
}

/// Classify raw (non-formula) cell content.
///
/// Text that is entirely an optionally-signed integer or float becomes that
/// numeric literal; anything else, including unscannable text, is kept
/// verbatim as a string literal.
pub fn parse_value(text: &str) -> Literal {
    let Ok(tokens) = tokenize(text) else {
        return Literal::string(text);
    };

    let (negative, number) = match tokens.as_slice() {
        [number] => (false, number),
        [Token::Operator(Operator::Add), number] => (false, number),
        [Token::Operator(Operator::Sub), number] => (true, number),
        _ => return Literal::string(text),
    };

    let signed = |digits: &str| {
        if negative {
            format!("-{}", digits)
        } else {
            digits.to_string()
        }
    };

    match number {
        Token::Int(digits) => Literal::int(signed(digits)),
        Token::Float(digits) => Literal::float(signed(digits)),
        _ => Literal::string(text),
    }
}

/// A valid cell id scans to exactly one identifier token
pub fn is_cell_identifier(text: &str) -> bool {
    matches!(tokenize(text).as_deref(), Ok([Token::Identifier(_)]))
}
