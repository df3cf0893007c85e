//! Token types for the Akizora lexer.

use crate::Location;

/// Token kinds in the Akizora template language
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Raw text outside of {{ }}
    Text(String),

    /// Opening delimiter {{
    ActionOpen,
    /// Closing delimiter }}
    ActionClose,

    /// Identifier, keyword or function name
    Identifier(String),
    /// Dot symbol .
    Dot,
    /// Dollar symbol $ (the render root)
    Dollar,
    /// Pipe symbol |
    Pipe,

    /// String literal with escapes already decoded
    StringLiteral(String),
    /// Keyword: true / false
    BoolLiteral(bool),
    /// Number literal, kept as written
    NumberLiteral(String),

    /// Whitespace inside an action (separates operands)
    Whitespace(String),

    /// End of file
    Eof,
}

/// A token with its kind and source location
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub location: Location,
}

impl Token {
    pub fn new(kind: TokenKind, location: Location) -> Self {
        Self { kind, location }
    }

    /// Returns the keyword this token spells, if any
    pub fn keyword(&self) -> Option<Keyword> {
        match &self.kind {
            TokenKind::Identifier(s) => Keyword::from_ident(s),
            _ => None,
        }
    }
}

/// Action keywords. The lexer emits them as identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    If,
    Else,
    Range,
    With,
    End,
    Template,
    Define,
    Block,
}

impl Keyword {
    pub fn from_ident(s: &str) -> Option<Self> {
        match s {
            "if" => Some(Keyword::If),
            "else" => Some(Keyword::Else),
            "range" => Some(Keyword::Range),
            "with" => Some(Keyword::With),
            "end" => Some(Keyword::End),
            "template" => Some(Keyword::Template),
            "define" => Some(Keyword::Define),
            "block" => Some(Keyword::Block),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::Range => "range",
            Keyword::With => "with",
            Keyword::End => "end",
            Keyword::Template => "template",
            Keyword::Define => "define",
            Keyword::Block => "block",
        }
    }
}
