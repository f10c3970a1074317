//! Token types for the annotation language.
//!
//! One token set covers both halves of an annotated file: the
//! Python-flavored tuning blocks (`def`, `param`, `range(...)`, `True`)
//! and the C subset used for loop bodies (`for`, `+=`, `i++`).

use crate::utils::location::Span;
use std::fmt;

/// A token in the source code.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// The source span
    pub span: Span,
    /// The lexeme (raw text)
    pub lexeme: String,
}

impl Token {
    /// Create a new token.
    pub fn new(kind: TokenKind, span: Span, lexeme: String) -> Self {
        Self { kind, span, lexeme }
    }

    /// Check if this is an EOF token.
    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }

    /// Contents of a string literal without its quotes.
    pub fn string_value(&self) -> &str {
        let s = self.lexeme.as_str();
        if s.len() >= 2 {
            &s[1..s.len() - 1]
        } else {
            s
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.kind, self.lexeme)
    }
}

/// The kind of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Literals
    /// Integer literal
    Integer,
    /// Floating-point literal
    Float,
    /// String literal, single or double quoted
    String,

    /// Identifier (parameter, array, loop index, function name)
    Identifier,

    // Annotation keywords
    /// `def` section header
    Def,
    /// `param` declaration
    Param,
    /// `constraint` declaration
    Constraint,
    /// `arg` setting
    Arg,
    /// `decl` input variable
    Decl,
    /// `let` constant
    Let,
    /// `static` storage qualifier
    Static,
    /// `transform` statement
    Transform,
    /// `and`
    And,
    /// `or`
    Or,
    /// `not`
    Not,
    /// `True` / `true`
    True,
    /// `False` / `false`
    False,

    // C keywords
    /// `for`
    For,
    /// `if`
    If,
    /// `else`
    Else,
    /// `int`
    Int,
    /// `double`
    Double,
    /// `float`
    FloatType,

    // Arithmetic operators
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `++`
    PlusPlus,
    /// `--`
    MinusMinus,

    // Comparison operators
    /// `==`
    EqualEqual,
    /// `!=`
    BangEqual,
    /// `<`
    Less,
    /// `<=`
    LessEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterEqual,

    // Assignment operators
    /// `=`
    Equal,
    /// `+=`
    PlusEqual,
    /// `-=`
    MinusEqual,
    /// `*=`
    StarEqual,
    /// `/=`
    SlashEqual,

    // Logical operators
    /// `&&`
    AmpAmp,
    /// `||`
    PipePipe,
    /// `!`
    Bang,

    // Delimiters
    /// `(`
    LeftParen,
    /// `)`
    RightParen,
    /// `[`
    LeftBracket,
    /// `]`
    RightBracket,
    /// `{`
    LeftBrace,
    /// `}`
    RightBrace,
    /// `,`
    Comma,
    /// `;`
    Semicolon,
    /// `:`
    Colon,

    /// End of input
    Eof,
}

impl TokenKind {
    /// Check if this is an assignment operator.
    pub fn is_assignment(&self) -> bool {
        use TokenKind::*;
        matches!(self, Equal | PlusEqual | MinusEqual | StarEqual | SlashEqual)
    }

    /// Get the keyword for a string, if it is a keyword.
    pub fn keyword(s: &str) -> Option<TokenKind> {
        match s {
            "def" => Some(TokenKind::Def),
            "param" => Some(TokenKind::Param),
            "constraint" => Some(TokenKind::Constraint),
            "arg" => Some(TokenKind::Arg),
            "decl" => Some(TokenKind::Decl),
            "let" => Some(TokenKind::Let),
            "static" => Some(TokenKind::Static),
            "transform" => Some(TokenKind::Transform),
            "and" => Some(TokenKind::And),
            "or" => Some(TokenKind::Or),
            "not" => Some(TokenKind::Not),
            "True" | "true" => Some(TokenKind::True),
            "False" | "false" => Some(TokenKind::False),
            "for" => Some(TokenKind::For),
            "if" => Some(TokenKind::If),
            "else" => Some(TokenKind::Else),
            "int" => Some(TokenKind::Int),
            "double" => Some(TokenKind::Double),
            "float" => Some(TokenKind::FloatType),
            _ => None,
        }
    }

    /// Get a human-readable name for this token kind.
    pub fn name(&self) -> &'static str {
        use TokenKind::*;
        match self {
            Integer => "integer",
            Float => "float",
            String => "string",
            Identifier => "identifier",
            Def => "def",
            Param => "param",
            Constraint => "constraint",
            Arg => "arg",
            Decl => "decl",
            Let => "let",
            Static => "static",
            Transform => "transform",
            And => "and",
            Or => "or",
            Not => "not",
            True => "True",
            False => "False",
            For => "for",
            If => "if",
            Else => "else",
            Int => "int",
            Double => "double",
            FloatType => "float",
            Plus => "+",
            Minus => "-",
            Star => "*",
            Slash => "/",
            Percent => "%",
            PlusPlus => "++",
            MinusMinus => "--",
            EqualEqual => "==",
            BangEqual => "!=",
            Less => "<",
            LessEqual => "<=",
            Greater => ">",
            GreaterEqual => ">=",
            Equal => "=",
            PlusEqual => "+=",
            MinusEqual => "-=",
            StarEqual => "*=",
            SlashEqual => "/=",
            AmpAmp => "&&",
            PipePipe => "||",
            Bang => "!",
            LeftParen => "(",
            RightParen => ")",
            LeftBracket => "[",
            RightBracket => "]",
            LeftBrace => "{",
            RightBrace => "}",
            Comma => ",",
            Semicolon => ";",
            Colon => ":",
            Eof => "end of annotation",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_lookup() {
        assert_eq!(TokenKind::keyword("param"), Some(TokenKind::Param));
        assert_eq!(TokenKind::keyword("True"), Some(TokenKind::True));
        assert_eq!(TokenKind::keyword("false"), Some(TokenKind::False));
        assert_eq!(TokenKind::keyword("range"), None);
    }

    #[test]
    fn test_string_value_strips_quotes() {
        let tok = Token::new(TokenKind::String, Span::dummy(), "'omp parallel for'".to_string());
        assert_eq!(tok.string_value(), "omp parallel for");
    }

    #[test]
    fn test_is_assignment() {
        assert!(TokenKind::PlusEqual.is_assignment());
        assert!(!TokenKind::EqualEqual.is_assignment());
    }
}
