//! Lexer for annotation bodies and loop code.
//!
//! The lexer converts a slice of an annotated source file into tokens.
//! Slices keep their position in the enclosing file so that spans point at
//! the right line and column.

use crate::frontend::token::{Token, TokenKind};
use crate::utils::location::{Span, SourceLocation};
use crate::utils::errors::{LexerError, LexerErrorKind};
use unicode_xid::UnicodeXID;
use std::iter::Peekable;
use std::str::Chars;

/// A lexer for tokenizing annotation text.
pub struct Lexer<'a> {
    /// The source text
    source: &'a str,
    /// Character iterator
    chars: Peekable<Chars<'a>>,
    /// Current byte offset within `source`
    offset: usize,
    /// Offset of `source` within the enclosing file
    base_offset: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// Current column number (1-indexed)
    column: usize,
    /// Start of current token
    token_start: SourceLocation,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for a whole file.
    pub fn new(source: &'a str) -> Self {
        Self::with_origin(source, SourceLocation::start())
    }

    /// Create a lexer for a slice that starts at `origin` in its file.
    pub fn with_origin(source: &'a str, origin: SourceLocation) -> Self {
        Self {
            source,
            chars: source.chars().peekable(),
            offset: 0,
            base_offset: origin.offset,
            line: origin.line,
            column: origin.column,
            token_start: origin,
        }
    }

    /// Get the current location.
    fn current_location(&self) -> SourceLocation {
        SourceLocation::new(self.line, self.column, self.base_offset + self.offset)
    }

    /// Mark the start of a new token.
    fn mark_token_start(&mut self) {
        self.token_start = self.current_location();
    }

    /// Create a span from token start to current location.
    fn make_span(&self) -> Span {
        Span::from_locations(self.token_start, self.current_location())
    }

    /// Text of the current token.
    fn lexeme(&self) -> &'a str {
        &self.source[self.token_start.offset - self.base_offset..self.offset]
    }

    /// Peek at the current character without consuming it.
    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    /// Peek at the next character (one ahead).
    fn peek_next(&self) -> Option<char> {
        let mut chars = self.source[self.offset..].chars();
        chars.next();
        chars.next()
    }

    /// Consume and return the current character.
    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.offset += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Consume the current character if it matches.
    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Skip whitespace, C comments and `#` line comments.
    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\r') | Some('\n') => {
                    self.advance();
                }
                Some('#') => {
                    while self.peek().is_some() && self.peek() != Some('\n') {
                        self.advance();
                    }
                }
                Some('/') => {
                    if self.peek_next() == Some('/') {
                        while self.peek().is_some() && self.peek() != Some('\n') {
                            self.advance();
                        }
                    } else if self.peek_next() == Some('*') {
                        self.advance();
                        self.advance();
                        loop {
                            match self.advance() {
                                Some('*') if self.peek() == Some('/') => {
                                    self.advance();
                                    break;
                                }
                                None => break,
                                _ => {}
                            }
                        }
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        }
    }

    /// Create a token with the given kind.
    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(kind, self.make_span(), self.lexeme().to_string())
    }

    /// Create an error.
    fn make_error(&self, message: &str, kind: LexerErrorKind) -> LexerError {
        LexerError {
            message: message.to_string(),
            span: self.make_span(),
            kind,
        }
    }

    fn eat_digits(&mut self) {
        while self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            self.advance();
        }
    }

    /// Scan a number literal; the first digit (or '.') is consumed.
    fn scan_number(&mut self, leading_dot: bool) -> Result<Token, LexerError> {
        self.eat_digits();
        let mut is_float = leading_dot;

        if !leading_dot && self.peek() == Some('.') && self.peek_next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            is_float = true;
            self.advance();
            self.eat_digits();
        }

        if self.peek() == Some('e') || self.peek() == Some('E') {
            is_float = true;
            self.advance();
            if self.peek() == Some('+') || self.peek() == Some('-') {
                self.advance();
            }
            if !self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                return Err(self.make_error(
                    "Invalid floating-point exponent",
                    LexerErrorKind::InvalidNumber,
                ));
            }
            self.eat_digits();
        }

        if is_float {
            Ok(self.make_token(TokenKind::Float))
        } else {
            Ok(self.make_token(TokenKind::Integer))
        }
    }

    /// Scan an identifier or keyword.
    fn scan_identifier(&mut self) -> Token {
        while self.peek().map(|c| c.is_xid_continue() || c == '_').unwrap_or(false) {
            self.advance();
        }
        let kind = TokenKind::keyword(self.lexeme()).unwrap_or(TokenKind::Identifier);
        self.make_token(kind)
    }

    /// Scan a string literal; the opening quote is consumed.
    fn scan_string(&mut self, quote: char) -> Result<Token, LexerError> {
        loop {
            match self.advance() {
                Some(c) if c == quote => break,
                Some('\\') => {
                    if self.advance().is_none() {
                        return Err(self.make_error(
                            "Unterminated string literal",
                            LexerErrorKind::UnterminatedString,
                        ));
                    }
                }
                Some('\n') | None => {
                    return Err(self.make_error(
                        "Unterminated string literal",
                        LexerErrorKind::UnterminatedString,
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(self.make_token(TokenKind::String))
    }

    /// Scan the next token.
    pub fn next_token(&mut self) -> Result<Token, LexerError> {
        self.skip_whitespace();
        self.mark_token_start();

        let c = match self.advance() {
            Some(c) => c,
            None => return Ok(self.make_token(TokenKind::Eof)),
        };

        match c {
            '(' => Ok(self.make_token(TokenKind::LeftParen)),
            ')' => Ok(self.make_token(TokenKind::RightParen)),
            '[' => Ok(self.make_token(TokenKind::LeftBracket)),
            ']' => Ok(self.make_token(TokenKind::RightBracket)),
            '{' => Ok(self.make_token(TokenKind::LeftBrace)),
            '}' => Ok(self.make_token(TokenKind::RightBrace)),
            ',' => Ok(self.make_token(TokenKind::Comma)),
            ';' => Ok(self.make_token(TokenKind::Semicolon)),
            ':' => Ok(self.make_token(TokenKind::Colon)),

            '+' => {
                if self.match_char('=') {
                    Ok(self.make_token(TokenKind::PlusEqual))
                } else if self.match_char('+') {
                    Ok(self.make_token(TokenKind::PlusPlus))
                } else {
                    Ok(self.make_token(TokenKind::Plus))
                }
            }
            '-' => {
                if self.match_char('=') {
                    Ok(self.make_token(TokenKind::MinusEqual))
                } else if self.match_char('-') {
                    Ok(self.make_token(TokenKind::MinusMinus))
                } else {
                    Ok(self.make_token(TokenKind::Minus))
                }
            }
            '*' => {
                if self.match_char('=') {
                    Ok(self.make_token(TokenKind::StarEqual))
                } else {
                    Ok(self.make_token(TokenKind::Star))
                }
            }
            '/' => {
                if self.match_char('=') {
                    Ok(self.make_token(TokenKind::SlashEqual))
                } else {
                    Ok(self.make_token(TokenKind::Slash))
                }
            }
            '%' => Ok(self.make_token(TokenKind::Percent)),

            '=' => {
                if self.match_char('=') {
                    Ok(self.make_token(TokenKind::EqualEqual))
                } else {
                    Ok(self.make_token(TokenKind::Equal))
                }
            }
            '!' => {
                if self.match_char('=') {
                    Ok(self.make_token(TokenKind::BangEqual))
                } else {
                    Ok(self.make_token(TokenKind::Bang))
                }
            }
            '<' => {
                if self.match_char('=') {
                    Ok(self.make_token(TokenKind::LessEqual))
                } else {
                    Ok(self.make_token(TokenKind::Less))
                }
            }
            '>' => {
                if self.match_char('=') {
                    Ok(self.make_token(TokenKind::GreaterEqual))
                } else {
                    Ok(self.make_token(TokenKind::Greater))
                }
            }
            '&' => {
                if self.match_char('&') {
                    Ok(self.make_token(TokenKind::AmpAmp))
                } else {
                    Err(self.make_error(
                        "Expected '&&', found single '&'",
                        LexerErrorKind::UnexpectedChar,
                    ))
                }
            }
            '|' => {
                if self.match_char('|') {
                    Ok(self.make_token(TokenKind::PipePipe))
                } else {
                    Err(self.make_error(
                        "Expected '||', found single '|'",
                        LexerErrorKind::UnexpectedChar,
                    ))
                }
            }

            '"' | '\'' => self.scan_string(c),

            '.' if self.peek().map(|d| d.is_ascii_digit()).unwrap_or(false) => self.scan_number(true),
            c if c.is_ascii_digit() => self.scan_number(false),

            c if c.is_xid_start() || c == '_' => Ok(self.scan_identifier()),

            _ => Err(self.make_error(
                &format!("Unexpected character: '{}'", c),
                LexerErrorKind::UnexpectedChar,
            )),
        }
    }

    /// Collect all tokens into a vector.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexerError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let is_eof = token.is_eof();
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Token> {
        Lexer::new(source).tokenize().unwrap()
    }

    fn token_kinds(source: &str) -> Vec<TokenKind> {
        lex(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_empty() {
        let tokens = lex("  \n\t ");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Eof);
    }

    #[test]
    fn test_param_declaration() {
        let kinds = token_kinds("param T1_I[] = [1,16,32];");
        assert_eq!(kinds, vec![
            TokenKind::Param,
            TokenKind::Identifier,
            TokenKind::LeftBracket,
            TokenKind::RightBracket,
            TokenKind::Equal,
            TokenKind::LeftBracket,
            TokenKind::Integer,
            TokenKind::Comma,
            TokenKind::Integer,
            TokenKind::Comma,
            TokenKind::Integer,
            TokenKind::RightBracket,
            TokenKind::Semicolon,
            TokenKind::Eof,
        ]);
    }

    #[test]
    fn test_hash_comments() {
        let tokens = lex("param U[] = [1]; # unroll\n# whole line\nlet N = 4;");
        assert!(tokens.iter().all(|t| t.lexeme != "unroll"));
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Let));
    }

    #[test]
    fn test_single_quoted_strings() {
        let tokens = lex("arg build_command = 'gcc -O3 @CFLAGS';");
        assert_eq!(tokens[3].kind, TokenKind::String);
        assert_eq!(tokens[3].string_value(), "gcc -O3 @CFLAGS");
    }

    #[test]
    fn test_loop_header() {
        let kinds = token_kinds("for(i=0; i<=N-1; i++)");
        assert!(kinds.contains(&TokenKind::PlusPlus));
        assert!(kinds.contains(&TokenKind::LessEqual));
    }

    #[test]
    fn test_numbers() {
        let tokens = lex("123 45.67 1e10 .5 32.12");
        assert_eq!(tokens[0].kind, TokenKind::Integer);
        assert_eq!(tokens[1].kind, TokenKind::Float);
        assert_eq!(tokens[2].kind, TokenKind::Float);
        assert_eq!(tokens[3].kind, TokenKind::Float);
        assert_eq!(tokens[3].lexeme, ".5");
    }

    #[test]
    fn test_origin_offsets() {
        let file = "int x;\n/*@ begin Loop(x = 1;) @*/";
        let start = file.find("x = 1").unwrap();
        let origin = SourceLocation::new(2, 16, start);
        let tokens = Lexer::with_origin(&file[start..start + 6], origin).tokenize().unwrap();
        assert_eq!(tokens[0].span.start_line, 2);
        assert_eq!(tokens[0].span.start_column, 16);
        assert_eq!(tokens[0].span.start_offset, start);
        assert_eq!(tokens[0].lexeme, "x");
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new("arg a = 'oops;\n").tokenize().unwrap_err();
        assert_eq!(err.kind, LexerErrorKind::UnterminatedString);
    }

    #[test]
    fn test_single_ampersand_is_error() {
        assert!(Lexer::new("f(&x)").tokenize().is_err());
    }
}
