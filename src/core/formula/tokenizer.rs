//! Formula tokenizer
//!
//! Converts formula bodies like "SUM(var1, 2) * 1.5" (the leading '=' already
//! stripped by the caller) into a lazy sequence of tokens.
//!
//! Identifiers are permissive: the first character must be a letter, every
//! following character may be anything printable that is not whitespace and
//! not one of the reserved single-character tokens `+ - * / ( ) ,`. This lets
//! cells be named `á._` or `說`.

use std::fmt;

/// Binary/unary arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
}

impl Operator {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(Operator::Add),
            '-' => Some(Operator::Sub),
            '*' => Some(Operator::Mul),
            '/' => Some(Operator::Div),
            _ => None,
        }
    }

    /// Binding power for precedence climbing; higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            Operator::Add | Operator::Sub => 1,
            Operator::Mul | Operator::Div => 2,
        }
    }

    pub fn symbol(self) -> char {
        match self {
            Operator::Add => '+',
            Operator::Sub => '-',
            Operator::Mul => '*',
            Operator::Div => '/',
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// A token in a formula expression
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Cell reference or function name
    Identifier(String),
    /// Unsigned integer literal, kept as source text
    Int(String),
    /// Unsigned floating literal, kept as source text
    Float(String),
    Operator(Operator),
    OpenParen,
    CloseParen,
    Comma,
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Identifier(name) => write!(f, "identifier {:?}", name),
            Token::Int(text) | Token::Float(text) => write!(f, "number {}", text),
            Token::Operator(op) => write!(f, "'{}'", op),
            Token::OpenParen => write!(f, "'('"),
            Token::CloseParen => write!(f, "')'"),
            Token::Comma => write!(f, "','"),
            Token::Eof => write!(f, "end of input"),
        }
    }
}

/// Error during tokenization
#[derive(Debug, Clone, PartialEq)]
pub struct TokenizeError {
    pub message: String,
    pub position: usize,
}

impl TokenizeError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl fmt::Display for TokenizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tokenize error at position {}: {}",
            self.position, self.message
        )
    }
}

impl std::error::Error for TokenizeError {}

fn is_reserved(c: char) -> bool {
    matches!(c, '+' | '-' | '*' | '/' | '(' | ')' | ',')
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic()
}

/// Format controls, private-use code points and noncharacters. None of them
/// render, so they would let two different ids look the same.
fn is_invisible(c: char) -> bool {
    let noncharacter = (c as u32) & 0xFFFE == 0xFFFE;
    noncharacter
        || matches!(c,
            '\u{00AD}'
            | '\u{0600}'..='\u{0605}'
            | '\u{061C}'
            | '\u{06DD}'
            | '\u{070F}'
            | '\u{0890}'..='\u{0891}'
            | '\u{08E2}'
            | '\u{180E}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{206F}'
            | '\u{E000}'..='\u{F8FF}'
            | '\u{FDD0}'..='\u{FDEF}'
            | '\u{FEFF}'
            | '\u{FFF9}'..='\u{FFFB}'
            | '\u{110BD}'
            | '\u{110CD}'
            | '\u{13430}'..='\u{1343F}'
            | '\u{1BCA0}'..='\u{1BCA3}'
            | '\u{1D173}'..='\u{1D17A}'
            | '\u{E0001}'
            | '\u{E0020}'..='\u{E007F}'
            | '\u{F0000}'..='\u{FFFFD}'
            | '\u{100000}'..='\u{10FFFD}')
}

fn is_identifier_continue(c: char) -> bool {
    !is_reserved(c) && !c.is_whitespace() && !c.is_control() && !is_invisible(c)
}

/// Lazy tokenizer over a formula body.
///
/// The first error is sticky: once a character cannot be scanned, every later
/// call to [`Tokenizer::next_token`] returns that same error.
#[derive(Debug, Clone)]
pub struct Tokenizer<'a> {
    source: &'a str,
    offset: usize,
    error: Option<TokenizeError>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            offset: 0,
            error: None,
        }
    }

    /// Byte offset of the next unread character
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Get the next token; `Token::Eof` once the input is exhausted
    pub fn next_token(&mut self) -> Result<Token, TokenizeError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        self.skip_whitespace();
        let start = self.offset;

        let Some(c) = self.peek() else {
            return Ok(Token::Eof);
        };

        if let Some(op) = Operator::from_char(c) {
            self.advance();
            return Ok(Token::Operator(op));
        }

        let token = match c {
            '(' => {
                self.advance();
                Token::OpenParen
            }
            ')' => {
                self.advance();
                Token::CloseParen
            }
            ',' => {
                self.advance();
                Token::Comma
            }
            c if c.is_ascii_digit() => self.read_number(),
            '.' if self.peek_nth(1).is_some_and(|d| d.is_ascii_digit()) => self.read_number(),
            c if is_identifier_start(c) => self.read_identifier(),
            c => {
                // Consume the offending character so a caller that chooses to
                // recover (see `find_all_identifiers`) makes progress.
                self.advance();
                let err = TokenizeError::new(format!("Unexpected character: '{}'", c), start);
                self.error = Some(err.clone());
                return Err(err);
            }
        };

        Ok(token)
    }

    /// Read raw source text up to (not including) the `)` that closes the
    /// current call, honouring nested parentheses. Returns the trimmed text.
    ///
    /// Used for call arguments that are locators rather than expressions.
    pub fn read_raw_argument(&mut self) -> &'a str {
        let start = self.offset;
        let mut depth = 0usize;

        while let Some(c) = self.peek() {
            match c {
                '(' => depth += 1,
                ')' if depth == 0 => break,
                ')' => depth -= 1,
                _ => {}
            }
            self.advance();
        }

        self.source[start..self.offset].trim()
    }

    fn rest(&self) -> &'a str {
        &self.source[self.offset..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.offset += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn consume_digits(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
    }

    /// Read an unsigned decimal number: digits, optional fraction, optional exponent
    fn read_number(&mut self) -> Token {
        let start = self.offset;
        let mut is_float = false;

        self.consume_digits();

        if self.peek() == Some('.') {
            is_float = true;
            self.advance();
            self.consume_digits();
        }

        if matches!(self.peek(), Some('e' | 'E')) {
            let has_exponent = match self.peek_nth(1) {
                Some('+' | '-') => self.peek_nth(2).is_some_and(|c| c.is_ascii_digit()),
                Some(c) => c.is_ascii_digit(),
                None => false,
            };
            if has_exponent {
                is_float = true;
                self.advance();
                if matches!(self.peek(), Some('+' | '-')) {
                    self.advance();
                }
                self.consume_digits();
            }
        }

        let text = self.source[start..self.offset].to_string();
        if is_float {
            Token::Float(text)
        } else {
            Token::Int(text)
        }
    }

    fn read_identifier(&mut self) -> Token {
        let start = self.offset;
        self.advance();
        while self.peek().is_some_and(is_identifier_continue) {
            self.advance();
        }
        Token::Identifier(self.source[start..self.offset].to_string())
    }
}

/// Tokenize the entire source into a vector of tokens (without `Eof`)
pub fn tokenize(source: &str) -> Result<Vec<Token>, TokenizeError> {
    let mut tokenizer = Tokenizer::new(source);
    let mut tokens = Vec::new();

    loop {
        match tokenizer.next_token()? {
            Token::Eof => return Ok(tokens),
            token => tokens.push(token),
        }
    }
}

/// Every identifier-shaped token in `source`, in order of appearance.
///
/// Purely lexical: no AST is built, so function names are included and
/// unscannable characters are skipped rather than aborting the scan.
pub fn find_all_identifiers(source: &str) -> Vec<String> {
    let mut tokenizer = Tokenizer::new(source);
    let mut identifiers = Vec::new();

    loop {
        match tokenizer.next_token() {
            Ok(Token::Eof) => break,
            Ok(Token::Identifier(name)) => identifiers.push(name),
            Ok(_) => {}
            Err(_) => tokenizer.error = None,
        }
    }

    identifiers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Token {
        Token::Identifier(name.to_string())
    }

    #[test]
    fn test_tokenize_int_and_float() {
        let tokens = tokenize("42 3.567 .5 1.5e10 2E-5").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Int("42".to_string()),
                Token::Float("3.567".to_string()),
                Token::Float(".5".to_string()),
                Token::Float("1.5e10".to_string()),
                Token::Float("2E-5".to_string()),
            ]
        );
    }

    #[test]
    fn test_tokenize_all_operators() {
        let tokens = tokenize("+ - * / ( ) ,").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Operator(Operator::Add),
                Token::Operator(Operator::Sub),
                Token::Operator(Operator::Mul),
                Token::Operator(Operator::Div),
                Token::OpenParen,
                Token::CloseParen,
                Token::Comma,
            ]
        );
    }

    #[test]
    fn test_tokenize_minus_is_always_operator() {
        let tokens = tokenize("-5").unwrap();
        assert_eq!(
            tokens,
            vec![Token::Operator(Operator::Sub), Token::Int("5".to_string())]
        );
    }

    #[test]
    fn test_tokenize_identifier_with_punctuation() {
        let tokens = tokenize("á._+拿").unwrap();
        assert_eq!(
            tokens,
            vec![ident("á._"), Token::Operator(Operator::Add), ident("拿")]
        );
    }

    #[test]
    fn test_invisible_characters_end_identifiers() {
        for text in ["a\u{200B}b", "a\u{FEFF}", "a\u{E000}", "a\u{202E}b", "a\u{FFFF}"] {
            let err = tokenize(text).unwrap_err();
            assert_eq!(err.position, 1, "{:?}", text);
        }
        assert!(tokenize("\u{200D}a").is_err());
    }

    #[test]
    fn test_tokenize_identifier_stops_at_reserved_and_space() {
        let tokens = tokenize("var1*var%2 x!y").unwrap();
        assert_eq!(
            tokens,
            vec![
                ident("var1"),
                Token::Operator(Operator::Mul),
                ident("var%2"),
                ident("x!y"),
            ]
        );
    }

    #[test]
    fn test_tokenize_function_call() {
        let tokens = tokenize("SUM(a, 2)").unwrap();
        assert_eq!(
            tokens,
            vec![
                ident("SUM"),
                Token::OpenParen,
                ident("a"),
                Token::Comma,
                Token::Int("2".to_string()),
                Token::CloseParen,
            ]
        );
    }

    #[test]
    fn test_tokenize_exponent_without_digits_is_not_consumed() {
        let tokens = tokenize("1e").unwrap();
        assert_eq!(tokens, vec![Token::Int("1".to_string()), ident("e")]);
    }

    #[test]
    fn test_tokenize_empty_and_whitespace() {
        assert_eq!(tokenize("").unwrap(), vec![]);
        assert_eq!(tokenize("   ").unwrap(), vec![]);
    }

    #[test]
    fn test_tokenize_error_unexpected_char() {
        let err = tokenize("1 + @").unwrap_err();
        assert!(err.message.contains("Unexpected"));
        assert_eq!(err.position, 4);
    }

    #[test]
    fn test_first_error_is_sticky() {
        let mut tokenizer = Tokenizer::new("@ 1 #");
        let first = tokenizer.next_token().unwrap_err();
        let second = tokenizer.next_token().unwrap_err();
        assert_eq!(first, second);
        assert_eq!(second.position, 0);
    }

    #[test]
    fn test_read_raw_argument_balances_parens() {
        let mut tokenizer = Tokenizer::new("(http://host/a(b)/c) + 1");
        assert_eq!(tokenizer.next_token().unwrap(), Token::OpenParen);
        assert_eq!(tokenizer.read_raw_argument(), "http://host/a(b)/c");
        assert_eq!(tokenizer.next_token().unwrap(), Token::CloseParen);
        assert_eq!(
            tokenizer.next_token().unwrap(),
            Token::Operator(Operator::Add)
        );
    }

    #[test]
    fn test_find_all_identifiers() {
        let identifiers = find_all_identifiers("var1 + var2 * 10 / 2 - var3");
        assert_eq!(identifiers, vec!["var1", "var2", "var3"]);
    }

    #[test]
    fn test_find_all_identifiers_includes_function_names_and_skips_garbage() {
        let identifiers = find_all_identifiers("MAX(a, b) @ c");
        assert_eq!(identifiers, vec!["MAX", "a", "b", "c"]);
    }
}
