//! Lexer, parser and AST arena for Akizora templates.
//!
//! The tree is stored as an arena: every [`Template`] owns a flat list of
//! nodes and block bodies refer to their children by [`NodeId`].

use std::fmt;

use thiserror::Error;

pub mod lexer;
pub mod parser;
pub mod token;

pub use lexer::{tokenize, Lexer};
pub use parser::Parser;
pub use token::{Keyword, Token, TokenKind};

// ============================================================================
// Location
// ============================================================================

/// Location in source code (1-indexed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Location {
    pub line: usize,
    pub column: usize,
    pub byte_offset: usize,
}

impl Location {
    pub fn new(line: usize, column: usize, byte_offset: usize) -> Self {
        Self {
            line,
            column,
            byte_offset,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

// ============================================================================
// AST Nodes
// ============================================================================

/// Index of a node inside its template's arena.
pub type NodeId = usize;

/// A parsed template: a node arena plus the ids of its top-level nodes.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    nodes: Vec<Node>,
    root: Vec<NodeId>,
    location: Location,
}

impl Template {
    pub fn new(
        name: impl Into<String>,
        nodes: Vec<Node>,
        root: Vec<NodeId>,
        location: Location,
    ) -> Self {
        Self {
            name: name.into(),
            nodes,
            root,
            location,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn root(&self) -> &[NodeId] {
        &self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn location(&self) -> Location {
        self.location
    }
}

/// Result of parsing one source: the main template and every
/// `{{define}}`/`{{block}}` body found in it.
#[derive(Debug, Clone)]
pub struct Parsed {
    pub main: Template,
    pub defines: Vec<Template>,
}

#[derive(Debug, Clone)]
pub enum Node {
    Text(TextNode),
    Output(OutputNode),
    If(IfNode),
    Range(RangeNode),
    With(WithNode),
    Include(IncludeNode),
}

/// Raw text content, copied to the output verbatim.
#[derive(Debug, Clone)]
pub struct TextNode {
    pub content: String,
    pub location: Location,
}

/// Interpolation: {{ pipeline }}
#[derive(Debug, Clone)]
pub struct OutputNode {
    pub pipeline: Pipeline,
    pub location: Location,
}

/// Conditional block: {{if cond}} ... {{else if cond}} ... {{else}} ... {{end}}
#[derive(Debug, Clone)]
pub struct IfNode {
    pub condition: Pipeline,
    pub then_branch: Vec<NodeId>,
    pub else_branch: Option<Vec<NodeId>>,
    pub location: Location,
}

/// Loop block: {{range source}} ... {{else}} ... {{end}}
#[derive(Debug, Clone)]
pub struct RangeNode {
    pub source: Pipeline,
    pub body: Vec<NodeId>,
    pub else_branch: Option<Vec<NodeId>>,
    pub location: Location,
}

/// Rebinding block: {{with value}} ... {{else}} ... {{end}}
#[derive(Debug, Clone)]
pub struct WithNode {
    pub value: Pipeline,
    pub body: Vec<NodeId>,
    pub else_branch: Option<Vec<NodeId>>,
    pub location: Location,
}

/// Include directive: {{template "name" data}}
#[derive(Debug, Clone)]
pub struct IncludeNode {
    pub name: String,
    pub data: Option<Pipeline>,
    pub location: Location,
}

/// A `|`-separated chain of commands.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub commands: Vec<Command>,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub enum Command {
    /// A bare value: field path or literal
    Operand(Operand),
    /// A builtin function call; a piped value is appended as the last argument
    Call {
        func: Builtin,
        args: Vec<Operand>,
        location: Location,
    },
}

#[derive(Debug, Clone)]
pub enum Operand {
    Field(FieldPath),
    Literal(Literal),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Bool(bool),
    Integer(i64),
    Float(f64),
}

/// Where a field path starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRoot {
    /// `.`: the current value
    Dot,
    /// `$`: the value the template was executed with
    Root,
}

/// One step of a field path, resolved against data at render time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accessor {
    Field(String),
    Index(usize),
}

impl fmt::Display for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accessor::Field(name) => f.write_str(name),
            Accessor::Index(index) => write!(f, "{}", index),
        }
    }
}

/// A dot-separated path (e.g., `.User.Emails.0`).
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPath {
    pub root: PathRoot,
    pub accessors: Vec<Accessor>,
    pub location: Location,
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.root == PathRoot::Root {
            f.write_str("$")?;
        }
        if self.accessors.is_empty() && self.root == PathRoot::Dot {
            return f.write_str(".");
        }
        for accessor in &self.accessors {
            write!(f, ".{}", accessor)?;
        }
        Ok(())
    }
}

/// The fixed set of functions callable from a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Not,
    And,
    Or,
    Eq,
    Ne,
    Len,
    Html,
    Js,
    UrlQuery,
    Print,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "not" => Some(Builtin::Not),
            "and" => Some(Builtin::And),
            "or" => Some(Builtin::Or),
            "eq" => Some(Builtin::Eq),
            "ne" => Some(Builtin::Ne),
            "len" => Some(Builtin::Len),
            "html" => Some(Builtin::Html),
            "js" => Some(Builtin::Js),
            "urlquery" => Some(Builtin::UrlQuery),
            "print" => Some(Builtin::Print),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Not => "not",
            Builtin::And => "and",
            Builtin::Or => "or",
            Builtin::Eq => "eq",
            Builtin::Ne => "ne",
            Builtin::Len => "len",
            Builtin::Html => "html",
            Builtin::Js => "js",
            Builtin::UrlQuery => "urlquery",
            Builtin::Print => "print",
        }
    }

    /// Accepted argument count as (min, max); `None` means unbounded.
    pub fn arity(&self) -> (usize, Option<usize>) {
        match self {
            Builtin::Not | Builtin::Len => (1, Some(1)),
            Builtin::Html | Builtin::Js | Builtin::UrlQuery => (1, Some(1)),
            Builtin::Eq => (2, None),
            Builtin::Ne => (2, Some(2)),
            Builtin::And | Builtin::Or => (1, None),
            Builtin::Print => (0, None),
        }
    }

    /// Escapers the contextual escaper may replace when they end a pipeline
    pub fn is_predefined_escaper(&self) -> bool {
        matches!(self, Builtin::Html | Builtin::UrlQuery)
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Lexical error: bad delimiters, literals or characters
    #[error("syntax error at {location}: {message}")]
    Syntax { message: String, location: Location },

    /// Structural error: bad nesting, unknown keyword, malformed pipeline
    #[error("parse error at {location}: {message}")]
    Parse { message: String, location: Location },
}

impl ParseError {
    pub fn syntax(message: impl Into<String>, location: Location) -> Self {
        ParseError::Syntax {
            message: message.into(),
            location,
        }
    }

    pub fn parse(message: impl Into<String>, location: Location) -> Self {
        ParseError::Parse {
            message: message.into(),
            location,
        }
    }

    pub fn location(&self) -> Location {
        match self {
            ParseError::Syntax { location, .. } | ParseError::Parse { location, .. } => *location,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ParseError::Syntax { message, .. } | ParseError::Parse { message, .. } => message,
        }
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse a template source string into an AST.
pub fn parse(name: &str, source: &str) -> Result<Parsed, ParseError> {
    let tokens = tokenize(source)?;
    Parser::new(name, tokens).parse()
}
