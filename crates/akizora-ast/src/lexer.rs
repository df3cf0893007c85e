//! Hand-written lexer for Akizora templates.
//!
//! Text outside `{{ }}` becomes `Text` tokens; inside an action the lexer
//! reads fields, variables, literals, identifiers and `|`. Comments and the
//! `{{-`/`-}}` trim markers are handled here too.

use crate::token::{Token, TokenKind};
use crate::{Location, ParseError};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";
const COMMENT_OPEN: &str = "/*";
const COMMENT_CLOSE: &str = "*/";

/// Tokenize a template source in one call
pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    Lexer::new(source).tokenize()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState {
    InText,
    InAction,
    InString { raw: bool },
}

/// Lexer for tokenizing Akizora template source
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    byte_offset: usize,
    state: LexState,
    action_start: Location,
    string_start: Location,
    trim_next_text: bool,
}

impl Lexer {
    /// Create a new lexer for the given source
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            byte_offset: 0,
            state: LexState::InText,
            action_start: Location::default(),
            string_start: Location::default(),
            trim_next_text: false,
        }
    }

    /// Tokenize the source and return a vector of tokens
    pub fn tokenize(&mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();

        while !self.eof() {
            match self.state {
                LexState::InText => self.tokenize_text(&mut tokens)?,
                LexState::InAction => self.tokenize_action(&mut tokens)?,
                LexState::InString { raw } => self.tokenize_string(&mut tokens, raw)?,
            }
        }

        match self.state {
            LexState::InText => {}
            LexState::InAction => {
                return Err(ParseError::syntax("unclosed action", self.action_start));
            }
            LexState::InString { .. } => {
                return Err(ParseError::syntax(
                    "unterminated string literal",
                    self.string_start,
                ));
            }
        }

        tokens.push(Token::new(TokenKind::Eof, self.location()));
        Ok(tokens)
    }

    fn tokenize_text(&mut self, tokens: &mut Vec<Token>) -> Result<(), ParseError> {
        if self.trim_next_text {
            self.trim_next_text = false;
            while self.current_char().map_or(false, Self::is_whitespace) {
                self.advance();
            }
        }

        let start = self.location();
        let mut text = String::new();

        while !self.eof() && !self.match_str(OPEN) {
            text.push(self.advance());
        }

        // `{{- ` trims the whitespace that precedes it
        let trim_before = !self.eof() && self.is_trim_marker(self.pos + OPEN.len());
        if trim_before {
            let trimmed_len = text.trim_end_matches(Self::is_whitespace).len();
            text.truncate(trimmed_len);
        }

        if !text.is_empty() {
            tokens.push(Token::new(TokenKind::Text(text), start));
        }

        if !self.eof() {
            self.consume_open(tokens, trim_before)?;
        }

        Ok(())
    }

    fn consume_open(
        &mut self,
        tokens: &mut Vec<Token>,
        trim_before: bool,
    ) -> Result<(), ParseError> {
        let start = self.location();
        self.advance(); // {
        self.advance(); // {
        if trim_before {
            self.advance(); // -
        }
        self.action_start = start;

        if self.is_comment_start(trim_before) {
            return self.skip_comment(start);
        }

        tokens.push(Token::new(TokenKind::ActionOpen, start));
        self.state = LexState::InAction;
        Ok(())
    }

    /// A comment begins right after `{{` or after `{{- `
    fn is_comment_start(&self, trim_before: bool) -> bool {
        let mut lookahead = self.pos;
        if trim_before {
            while lookahead < self.chars.len() && Self::is_whitespace(self.chars[lookahead]) {
                lookahead += 1;
            }
        }
        self.match_str_at(lookahead, COMMENT_OPEN)
    }

    fn skip_comment(&mut self, start: Location) -> Result<(), ParseError> {
        while self.current_char().map_or(false, Self::is_whitespace) {
            self.advance();
        }
        self.advance(); // /
        self.advance(); // *

        while !self.eof() && !self.match_str(COMMENT_CLOSE) {
            self.advance();
        }
        if self.eof() {
            return Err(ParseError::syntax("unclosed comment", start));
        }
        self.advance(); // *
        self.advance(); // /

        if self.match_str(" -}}") {
            self.advance(); // space
            self.advance(); // -
            self.trim_next_text = true;
        }
        if !self.match_str(CLOSE) {
            return Err(ParseError::syntax("comment ends before closing delimiter", start));
        }
        self.advance(); // }
        self.advance(); // }
        Ok(())
    }

    fn tokenize_action(&mut self, tokens: &mut Vec<Token>) -> Result<(), ParseError> {
        if self.match_str(CLOSE) {
            self.consume_close(tokens);
            return Ok(());
        }

        let Some(c) = self.current_char() else {
            return Ok(());
        };

        match c {
            c if Self::is_whitespace(c) => self.tokenize_whitespace(tokens),
            '.' => {
                self.add_single_char_token(tokens, TokenKind::Dot);
                // Directly after a dot only an integer index is valid
                if self.current_char().map_or(false, |c| c.is_ascii_digit()) {
                    self.tokenize_index(tokens);
                }
            }
            '$' => self.add_single_char_token(tokens, TokenKind::Dollar),
            '|' => self.add_single_char_token(tokens, TokenKind::Pipe),
            '"' => self.start_string(false),
            '`' => self.start_string(true),
            c if c.is_ascii_digit() => self.tokenize_number(tokens)?,
            '-' | '+' if self.peek_char().map_or(false, |c| c.is_ascii_digit()) => {
                self.tokenize_number(tokens)?
            }
            c if Self::is_ident_start(c) => self.tokenize_identifier(tokens),
            _ => {
                return Err(ParseError::syntax(
                    format!("unexpected character '{}' in action", c),
                    self.location(),
                ));
            }
        }

        Ok(())
    }

    fn consume_close(&mut self, tokens: &mut Vec<Token>) {
        let start = self.location();
        self.advance(); // }
        self.advance(); // }
        tokens.push(Token::new(TokenKind::ActionClose, start));
        self.state = LexState::InText;
    }

    fn tokenize_whitespace(&mut self, tokens: &mut Vec<Token>) {
        let start = self.location();
        let mut value = String::new();

        while let Some(c) = self.current_char() {
            if Self::is_whitespace(c) {
                value.push(self.advance());
            } else {
                break;
            }
        }

        // ` -}}` trims the whitespace that follows the action
        if self.match_str("-}}") {
            self.advance(); // -
            self.trim_next_text = true;
        }

        tokens.push(Token::new(TokenKind::Whitespace(value), start));
    }

    fn start_string(&mut self, raw: bool) {
        self.string_start = self.location();
        self.advance(); // opening quote
        self.state = LexState::InString { raw };
    }

    fn tokenize_string(&mut self, tokens: &mut Vec<Token>, raw: bool) -> Result<(), ParseError> {
        let quote = if raw { '`' } else { '"' };
        let mut value = String::new();

        loop {
            let Some(c) = self.current_char() else {
                return Err(ParseError::syntax(
                    "unterminated string literal",
                    self.string_start,
                ));
            };

            if c == quote {
                self.advance();
                break;
            }
            if !raw && c == '\n' {
                return Err(ParseError::syntax(
                    "unterminated string literal",
                    self.string_start,
                ));
            }
            if !raw && c == '\\' {
                value.push(self.consume_escape()?);
                continue;
            }
            value.push(self.advance());
        }

        tokens.push(Token::new(TokenKind::StringLiteral(value), self.string_start));
        self.state = LexState::InAction;
        Ok(())
    }

    fn consume_escape(&mut self) -> Result<char, ParseError> {
        let location = self.location();
        self.advance(); // backslash

        let Some(c) = self.current_char() else {
            return Err(ParseError::syntax("unterminated string literal", self.string_start));
        };
        self.advance();

        let decoded = match c {
            'n' => Some('\n'),
            't' => Some('\t'),
            'r' => Some('\r'),
            '0' => Some('\0'),
            '\\' => Some('\\'),
            '"' => Some('"'),
            '\'' => Some('\''),
            'x' => self.consume_hex(2).filter(|c| c.is_ascii()),
            'u' => self.consume_hex(4),
            _ => None,
        };

        decoded.ok_or_else(|| {
            ParseError::syntax(format!("invalid escape sequence '\\{}'", c), location)
        })
    }

    fn consume_hex(&mut self, digits: usize) -> Option<char> {
        let mut code = 0u32;
        for _ in 0..digits {
            let digit = self.current_char()?.to_digit(16)?;
            self.advance();
            code = code * 16 + digit;
        }
        char::from_u32(code)
    }

    fn tokenize_index(&mut self, tokens: &mut Vec<Token>) {
        let start = self.location();
        let mut value = String::new();
        while self.current_char().map_or(false, |c| c.is_ascii_digit()) {
            value.push(self.advance());
        }
        tokens.push(Token::new(TokenKind::NumberLiteral(value), start));
    }

    fn tokenize_number(&mut self, tokens: &mut Vec<Token>) -> Result<(), ParseError> {
        let start = self.location();
        let mut value = String::new();

        if matches!(self.current_char(), Some('-' | '+')) {
            value.push(self.advance());
        }
        while self.current_char().map_or(false, |c| c.is_ascii_digit()) {
            value.push(self.advance());
        }
        if self.current_char() == Some('.')
            && self.peek_char().map_or(false, |c| c.is_ascii_digit())
        {
            value.push(self.advance());
            while self.current_char().map_or(false, |c| c.is_ascii_digit()) {
                value.push(self.advance());
            }
        }

        if self.current_char().map_or(false, Self::is_ident_cont) {
            return Err(ParseError::syntax(
                format!("bad number syntax: '{}{}'", value, self.advance()),
                start,
            ));
        }

        tokens.push(Token::new(TokenKind::NumberLiteral(value), start));
        Ok(())
    }

    fn tokenize_identifier(&mut self, tokens: &mut Vec<Token>) {
        let start = self.location();
        let mut value = String::new();

        while let Some(c) = self.current_char() {
            if Self::is_ident_cont(c) {
                value.push(self.advance());
            } else {
                break;
            }
        }

        let kind = match value.as_str() {
            "true" => TokenKind::BoolLiteral(true),
            "false" => TokenKind::BoolLiteral(false),
            _ => TokenKind::Identifier(value),
        };
        tokens.push(Token::new(kind, start));
    }

    fn add_single_char_token(&mut self, tokens: &mut Vec<Token>, kind: TokenKind) {
        let location = self.location();
        self.advance();
        tokens.push(Token::new(kind, location));
    }

    /// `{{-` counts as a trim marker only when followed by whitespace
    fn is_trim_marker(&self, at: usize) -> bool {
        self.chars.get(at) == Some(&'-')
            && self.chars.get(at + 1).map_or(false, |c| Self::is_whitespace(*c))
    }

    fn location(&self) -> Location {
        Location::new(self.line, self.column, self.byte_offset)
    }

    fn eof(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn current_char(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_char(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> char {
        let c = self.chars[self.pos];
        self.pos += 1;
        self.byte_offset += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        c
    }

    fn match_str(&self, s: &str) -> bool {
        self.match_str_at(self.pos, s)
    }

    fn match_str_at(&self, at: usize, s: &str) -> bool {
        let Some(remaining) = self.chars.get(at..) else {
            return false;
        };
        let mut expected = s.chars();
        let mut actual = remaining.iter();
        loop {
            match (expected.next(), actual.next()) {
                (None, _) => return true,
                (Some(a), Some(b)) if a == *b => continue,
                _ => return false,
            }
        }
    }

    fn is_ident_start(c: char) -> bool {
        c.is_ascii_alphabetic() || c == '_'
    }

    fn is_ident_cont(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '_'
    }

    fn is_whitespace(c: char) -> bool {
        matches!(c, ' ' | '\t' | '\r' | '\n')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_plain_text() {
        let tokens = kinds("Hello, world!");
        assert_eq!(
            tokens,
            vec![TokenKind::Text("Hello, world!".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_field_action() {
        let tokens = kinds("{{.Name}}");
        assert_eq!(
            tokens,
            vec![
                TokenKind::ActionOpen,
                TokenKind::Dot,
                TokenKind::Identifier("Name".to_string()),
                TokenKind::ActionClose,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_index_after_dot() {
        let tokens = kinds("{{.Items.0.Name}}");
        assert_eq!(tokens[3], TokenKind::Dot);
        assert_eq!(tokens[4], TokenKind::NumberLiteral("0".to_string()));
        assert_eq!(tokens[5], TokenKind::Dot);
    }

    #[test]
    fn test_keywords_are_identifiers() {
        let tokens = tokenize("{{range .Items}}").unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Identifier("range".to_string()));
        assert_eq!(tokens[1].keyword(), Some(crate::token::Keyword::Range));
        assert!(matches!(tokens[2].kind, TokenKind::Whitespace(_)));
    }

    #[test]
    fn test_literals() {
        let tokens = kinds(r#"{{eq "a\tb" -1.5 true}}"#);
        assert!(tokens.contains(&TokenKind::StringLiteral("a\tb".to_string())));
        assert!(tokens.contains(&TokenKind::NumberLiteral("-1.5".to_string())));
        assert!(tokens.contains(&TokenKind::BoolLiteral(true)));
    }

    #[test]
    fn test_raw_string_keeps_backslashes() {
        let tokens = kinds("{{`a\\n`}}");
        assert_eq!(tokens[1], TokenKind::StringLiteral("a\\n".to_string()));
    }

    #[test]
    fn test_unicode_escape() {
        let tokens = kinds(r#"{{"é"}}"#);
        assert_eq!(tokens[1], TokenKind::StringLiteral("é".to_string()));
    }

    #[test]
    fn test_invalid_escape_error() {
        let result = tokenize(r#"{{"\q"}}"#);
        match result {
            Err(ParseError::Syntax { message, .. }) => {
                assert!(message.contains("invalid escape sequence"))
            }
            other => panic!("Expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_unclosed_action_error() {
        let result = tokenize("Hello {{.Name");
        match result {
            Err(ParseError::Syntax { message, location }) => {
                assert_eq!(message, "unclosed action");
                assert_eq!(location.column, 7);
            }
            other => panic!("Expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_unterminated_string_error() {
        assert!(matches!(
            tokenize("{{\"abc}}"),
            Err(ParseError::Syntax { .. })
        ));
    }

    #[test]
    fn test_comment_skipped() {
        let tokens = kinds("before{{/* a comment */}}after");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Text("before".to_string()),
                TokenKind::Text("after".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unclosed_comment_error() {
        match tokenize("{{/* never closed") {
            Err(ParseError::Syntax { message, .. }) => assert!(message.contains("unclosed comment")),
            other => panic!("Expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_trim_markers() {
        let tokens = kinds("a  \n {{- .X -}} \n b");
        assert_eq!(tokens[0], TokenKind::Text("a".to_string()));
        assert_eq!(tokens[tokens.len() - 2], TokenKind::Text("b".to_string()));
    }

    #[test]
    fn test_trim_markers_on_comment() {
        let tokens = kinds("a \n{{- /* gone */ -}}\n b");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Text("a".to_string()),
                TokenKind::Text("b".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_negative_number_is_not_trim_marker() {
        let tokens = kinds("x {{-3}}");
        assert_eq!(tokens[0], TokenKind::Text("x ".to_string()));
        assert_eq!(tokens[2], TokenKind::NumberLiteral("-3".to_string()));
    }

    #[test]
    fn test_location_tracking() {
        let tokens = tokenize("ab\ncd{{.X}}").unwrap();
        assert_eq!(tokens[1].location, Location::new(2, 3, 5));
    }
}
