//! Error types for the Akizora template engine.

use std::fmt;

use thiserror::Error;

// Re-export Location from akizora-ast
pub use akizora_ast::Location;
use akizora_ast::ParseError;

/// All errors that can occur in Akizora
#[derive(Error, Debug)]
pub enum Error {
    #[error("Syntax error at line {}, column {}: {message}", location.line, location.column)]
    Syntax { message: String, location: Location },

    #[error("Parse error at line {}, column {}: {message}", location.line, location.column)]
    Parse { message: String, location: Location },

    #[error("Ambiguous context at line {}, column {}: {message}", location.line, location.column)]
    AmbiguousContext { message: String, location: Location },

    #[error("Undefined template '{name}' at line {}, column {}", location.line, location.column)]
    UndefinedTemplate { name: String, location: Location },

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("Data error: {0}")]
    Data(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn ambiguous(message: impl Into<String>, location: Location) -> Self {
        Error::AmbiguousContext {
            message: message.into(),
            location,
        }
    }

    /// Source location of compile and execution errors
    pub fn location(&self) -> Option<Location> {
        match self {
            Error::Syntax { location, .. }
            | Error::Parse { location, .. }
            | Error::AmbiguousContext { location, .. }
            | Error::UndefinedTemplate { location, .. } => Some(*location),
            Error::Execution(e) => Some(e.location),
            Error::Data(_) | Error::Io(_) => None,
        }
    }

    /// Kind of a render-time failure, if this is one
    pub fn execution_kind(&self) -> Option<ExecutionErrorKind> {
        match self {
            Error::Execution(e) => Some(e.kind),
            _ => None,
        }
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::Syntax { message, location } => Error::Syntax { message, location },
            ParseError::Parse { message, location } => Error::Parse { message, location },
        }
    }
}

/// What went wrong while executing a compiled template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionErrorKind {
    FieldNotFound,
    IndexOutOfRange,
    TypeMismatch,
    NilDereference,
    IncludeDepthExceeded,
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionErrorKind::FieldNotFound => "Field not found",
            ExecutionErrorKind::IndexOutOfRange => "Index out of range",
            ExecutionErrorKind::TypeMismatch => "Type mismatch",
            ExecutionErrorKind::NilDereference => "Nil dereference",
            ExecutionErrorKind::IncludeDepthExceeded => "Include depth exceeded",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} at line {}, column {}: {message}", location.line, location.column)]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    pub message: String,
    pub location: Location,
}

impl ExecutionError {
    pub fn new(kind: ExecutionErrorKind, message: impl Into<String>, location: Location) -> Self {
        Self {
            kind,
            message: message.into(),
            location,
        }
    }
}

/// Result type alias for Akizora operations
pub type Result<T> = std::result::Result<T, Error>;
