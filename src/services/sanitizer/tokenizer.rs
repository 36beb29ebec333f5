//! Lexical scanner for Python source.
//!
//! Only as much of the grammar as comment removal needs: string literals
//! (every prefix, triple quotes, f-string replacement fields), comments,
//! line continuations and bracket nesting. Everything else is `Code`.
//! Concatenating the text of every token reproduces the input exactly.

use super::encoding::coding_cookie;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Comment,
    String,
    Code,
    /// A PEP 263 coding cookie on line 1 or 2.
    EncodingDeclaration,
    /// Line breaks, horizontal whitespace and `\`-newline continuations.
    Structural,
}

/// 1-based line and column (in characters).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub start: Position,
}

impl Token<'_> {
    pub fn is_line_break(&self) -> bool {
        self.kind == TokenKind::Structural && matches!(self.text, "\n" | "\r\n" | "\r")
    }

    pub fn is_horizontal_space(&self) -> bool {
        self.kind == TokenKind::Structural
            && !self.text.is_empty()
            && self.text.chars().all(|c| matches!(c, ' ' | '\t' | '\x0c'))
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexError {
    #[error("unterminated string literal at {0}")]
    UnterminatedString(Position),

    #[error("EOF in triple-quoted string starting at {0}")]
    UnterminatedTripleQuote(Position),

    #[error("EOF in multi-line statement, '{bracket}' opened at {at} is never closed")]
    UnclosedBracket { bracket: char, at: Position },

    #[error("unexpected character after line continuation character at {0}")]
    StrayContinuation(Position),
}

const STRING_PREFIXES: &[&str] = &["r", "u", "f", "b", "t", "br", "rb", "fr", "rf", "tr", "rt"];

fn is_identifier_char(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

fn is_operator_char(c: char) -> bool {
    !(c.is_whitespace()
        || is_identifier_char(c)
        || matches!(c, '#' | '"' | '\'' | '\\' | '(' | ')' | '[' | ']' | '{' | '}'))
}

fn is_string_prefix(word: &str) -> bool {
    word.len() <= 2 && STRING_PREFIXES.contains(&word.to_ascii_lowercase().as_str())
}

/// Split `source` into tokens.
pub fn tokenize(source: &str) -> Result<Vec<Token<'_>>, LexError> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    column: usize,
    tokens: Vec<Token<'a>>,
    brackets: Vec<(char, Position)>,
    seen_code: bool,
    declaration_found: bool,
    /// Start of the pending string token; moves past comments in f-string fields.
    segment: (usize, Position),
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            column: 1,
            tokens: Vec::new(),
            brackets: Vec::new(),
            seen_code: false,
            declaration_found: false,
            segment: (0, Position { line: 1, column: 1 }),
        }
    }

    fn run(mut self) -> Result<Vec<Token<'a>>, LexError> {
        while let Some(c) = self.peek() {
            let start_pos = self.pos;
            let start = self.position();

            match c {
                '\n' | '\r' => {
                    self.bump_line_break();
                    self.push(TokenKind::Structural, start_pos, start);
                }
                ' ' | '\t' | '\x0c' => {
                    while matches!(self.peek(), Some(' ' | '\t' | '\x0c')) {
                        self.bump();
                    }
                    self.push(TokenKind::Structural, start_pos, start);
                }
                '\\' => {
                    self.bump();
                    if !matches!(self.peek(), Some('\n' | '\r')) {
                        return Err(LexError::StrayContinuation(start));
                    }
                    self.bump_line_break();
                    self.push(TokenKind::Structural, start_pos, start);
                }
                '#' => self.comment(start_pos, start),
                '"' | '\'' => self.string_token("", start_pos, start)?,
                c if is_identifier_char(c) => {
                    let word = self.word();
                    if matches!(self.peek(), Some('"' | '\'')) && is_string_prefix(word) {
                        self.string_token(word, start_pos, start)?;
                    } else {
                        self.push(TokenKind::Code, start_pos, start);
                    }
                }
                _ => {
                    self.bump();
                    match c {
                        '(' | '[' | '{' => self.brackets.push((c, start)),
                        ')' | ']' | '}' => {
                            self.brackets.pop();
                        }
                        _ => {
                            while self.peek().is_some_and(is_operator_char) {
                                self.bump();
                            }
                        }
                    }
                    self.push(TokenKind::Code, start_pos, start);
                }
            }
        }

        if let Some(&(bracket, at)) = self.brackets.last() {
            return Err(LexError::UnclosedBracket { bracket, at });
        }
        Ok(self.tokens)
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.src[self.pos..].chars().nth(1)
    }

    fn at_triple(&self, quote: char) -> bool {
        let mut rest = self.src[self.pos..].chars();
        rest.next() == Some(quote) && rest.next() == Some(quote) && rest.next() == Some(quote)
    }

    fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        match c {
            '\n' => self.new_line(),
            '\r' if self.peek() != Some('\n') => self.new_line(),
            _ => self.column += 1,
        }
        Some(c)
    }

    fn bump_line_break(&mut self) {
        if self.bump() == Some('\r') && self.peek() == Some('\n') {
            self.bump();
        }
    }

    fn new_line(&mut self) {
        self.line += 1;
        self.column = 1;
    }

    fn push(&mut self, kind: TokenKind, start_pos: usize, start: Position) {
        self.push_span(kind, start_pos, self.pos, start);
    }

    fn push_span(&mut self, kind: TokenKind, start_pos: usize, end_pos: usize, start: Position) {
        if matches!(kind, TokenKind::Code | TokenKind::String) {
            self.seen_code = true;
        }
        let src = self.src;
        self.tokens.push(Token {
            kind,
            text: &src[start_pos..end_pos],
            start,
        });
    }

    fn word(&mut self) -> &'a str {
        let src = self.src;
        let start = self.pos;
        while self.peek().is_some_and(is_identifier_char) {
            self.bump();
        }
        &src[start..self.pos]
    }

    fn comment(&mut self, start_pos: usize, start: Position) {
        while self.peek().is_some_and(|c| c != '\n' && c != '\r') {
            self.bump();
        }

        let src = self.src;
        let text = &src[start_pos..self.pos];
        let is_declaration = !self.declaration_found
            && !self.seen_code
            && start.line <= 2
            && coding_cookie(text.as_bytes()).is_some();

        if is_declaration {
            self.declaration_found = true;
            self.push(TokenKind::EncodingDeclaration, start_pos, start);
        } else {
            self.push(TokenKind::Comment, start_pos, start);
        }
    }

    /// Scan a whole string literal, prefix included, into `String` tokens.
    ///
    /// Usually one token; comments inside multi-line f-string fields split it.
    fn string_token(&mut self, prefix: &str, start_pos: usize, start: Position) -> Result<(), LexError> {
        self.segment = (start_pos, start);
        self.string(prefix, start)?;
        let (segment_pos, segment_start) = self.segment;
        self.push(TokenKind::String, segment_pos, segment_start);
        Ok(())
    }

    /// Emit a comment found inside an f-string field of a triple-quoted
    /// literal, closing the pending string token in front of it.
    ///
    /// The indentation and line breaks around the comment become `Structural`
    /// tokens, so a comment alone on its line is removed with that line.
    fn field_comment(&mut self) {
        let src = self.src;
        let (segment_pos, segment_start) = self.segment;
        let before = &src[segment_pos..self.pos];
        let code = before.trim_end_matches([' ', '\t', '\x0c']);
        let indent_pos = segment_pos + code.len();
        let indent_start = Position {
            line: self.line,
            column: self.column - (self.pos - indent_pos),
        };

        let break_len = if code.ends_with("\r\n") {
            2
        } else if code.ends_with(['\n', '\r']) {
            1
        } else {
            0
        };
        let break_pos = indent_pos - break_len;

        if break_pos > segment_pos {
            self.push_span(TokenKind::String, segment_pos, break_pos, segment_start);
        }
        if break_len > 0 {
            let line_start = src[..break_pos].rfind(['\n', '\r']).map_or(0, |i| i + 1);
            let break_start = Position {
                line: self.line - 1,
                column: src[line_start..break_pos].chars().count() + 1,
            };
            self.push_span(TokenKind::Structural, break_pos, indent_pos, break_start);
        }
        if self.pos > indent_pos {
            self.push_span(TokenKind::Structural, indent_pos, self.pos, indent_start);
        }

        let comment_pos = self.pos;
        let comment_start = self.position();
        while self.peek().is_some_and(|c| c != '\n' && c != '\r') {
            self.bump();
        }
        self.push(TokenKind::Comment, comment_pos, comment_start);

        if matches!(self.peek(), Some('\n' | '\r')) {
            let break_pos = self.pos;
            let break_start = self.position();
            self.bump_line_break();
            self.push(TokenKind::Structural, break_pos, break_start);
        }
        self.segment = (self.pos, self.position());
    }

    /// Scan a string literal whose prefix has already been consumed.
    fn string(&mut self, prefix: &str, start: Position) -> Result<(), LexError> {
        let prefix = prefix.to_ascii_lowercase();
        let formatted = prefix.contains('f') || prefix.contains('t');

        let Some(quote) = self.bump() else {
            return Err(LexError::UnterminatedString(start));
        };
        let triple = self.peek() == Some(quote) && self.peek_second() == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        let literal = Literal {
            quote,
            triple,
            start,
        };
        self.string_body(&literal, formatted)
    }

    fn string_body(&mut self, literal: &Literal, formatted: bool) -> Result<(), LexError> {
        loop {
            let Some(c) = self.peek() else {
                return Err(literal.unterminated());
            };

            match c {
                '\\' => {
                    self.bump();
                    match self.peek() {
                        None => return Err(literal.unterminated()),
                        Some('{' | '}') if formatted => {}
                        Some('\n' | '\r') => self.bump_line_break(),
                        Some(_) => {
                            self.bump();
                        }
                    }
                }
                '\n' | '\r' if !literal.triple => return Err(literal.unterminated()),
                c if c == literal.quote => {
                    if !literal.triple {
                        self.bump();
                        return Ok(());
                    }
                    if self.at_triple(c) {
                        self.bump();
                        self.bump();
                        self.bump();
                        return Ok(());
                    }
                    self.bump();
                }
                '{' if formatted => {
                    self.bump();
                    if self.peek() == Some('{') {
                        self.bump();
                    } else {
                        self.replacement_field(literal)?;
                    }
                }
                '}' if formatted => {
                    self.bump();
                    if self.peek() == Some('}') {
                        self.bump();
                    }
                }
                _ => {
                    self.bump();
                }
            }
        }
    }

    /// Scan an f-string `{...}` field; the opening brace is already consumed.
    fn replacement_field(&mut self, literal: &Literal) -> Result<(), LexError> {
        let mut depth = 0usize;
        loop {
            let Some(c) = self.peek() else {
                return Err(literal.unterminated());
            };

            match c {
                '\n' | '\r' if !literal.triple => return Err(literal.unterminated()),
                '#' if literal.triple => self.field_comment(),
                // Runs to the end of the line, past the closing quote.
                '#' => return Err(literal.unterminated()),
                '"' | '\'' => {
                    let nested = self.position();
                    self.string("", nested)?;
                }
                c if is_identifier_char(c) => {
                    let nested = self.position();
                    let word = self.word();
                    if matches!(self.peek(), Some('"' | '\'')) && is_string_prefix(word) {
                        self.string(word, nested)?;
                    }
                }
                '(' | '[' | '{' => {
                    depth += 1;
                    self.bump();
                }
                ')' | ']' => {
                    depth = depth.saturating_sub(1);
                    self.bump();
                }
                '}' => {
                    self.bump();
                    if depth == 0 {
                        return Ok(());
                    }
                    depth -= 1;
                }
                ':' if depth == 0 => {
                    self.bump();
                    return self.format_spec(literal);
                }
                _ => {
                    self.bump();
                }
            }
        }
    }

    /// Scan a format spec up to the closing brace of its field.
    fn format_spec(&mut self, literal: &Literal) -> Result<(), LexError> {
        loop {
            match self.peek() {
                None => return Err(literal.unterminated()),
                Some('\n' | '\r') if !literal.triple => return Err(literal.unterminated()),
                Some('{') => {
                    self.bump();
                    self.replacement_field(literal)?;
                }
                Some('}') => {
                    self.bump();
                    return Ok(());
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
    }
}

struct Literal {
    quote: char,
    triple: bool,
    start: Position,
}

impl Literal {
    fn unterminated(&self) -> LexError {
        if self.triple {
            LexError::UnterminatedTripleQuote(self.start)
        } else {
            LexError::UnterminatedString(self.start)
        }
    }
}
