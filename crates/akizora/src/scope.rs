//! Data scope during rendering: the `.` stack and the `$` root.

use std::borrow::Cow;

use akizora_ast::{Accessor, FieldPath, PathRoot};

use crate::binding::{self, Miss};
use crate::config::MissingKeyPolicy;
use crate::error::{ExecutionError, ExecutionErrorKind};
use crate::value::Value;

static NULL: Value = Value::Null;

/// Dot and root bindings for path resolution during rendering
pub struct Scope<'a> {
    root: Cow<'a, Value>,
    dot_stack: Vec<Cow<'a, Value>>,
    missing_key: MissingKeyPolicy,
}

impl<'a> Scope<'a> {
    /// Create a scope where both `.` and `$` are `root`
    pub fn new(root: Cow<'a, Value>, missing_key: MissingKeyPolicy) -> Self {
        Self {
            root,
            dot_stack: Vec::new(),
            missing_key,
        }
    }

    pub fn dot(&self) -> &Cow<'a, Value> {
        self.dot_stack.last().unwrap_or(&self.root)
    }

    /// Rebind dot (range element, with value)
    pub fn push_dot(&mut self, value: Cow<'a, Value>) {
        self.dot_stack.push(value);
    }

    /// Restore the previous dot
    pub fn pop_dot(&mut self) {
        self.dot_stack.pop();
    }

    /// Resolve a field path (e.g., `.User.Emails.0`, `$.Title`)
    pub fn resolve(&self, path: &FieldPath) -> Result<Cow<'a, Value>, ExecutionError> {
        let start = match path.root {
            PathRoot::Dot => self.dot(),
            PathRoot::Root => &self.root,
        };
        match start {
            Cow::Borrowed(value) => self.walk(*value, path).map(Cow::Borrowed),
            Cow::Owned(value) => self.walk(value, path).map(|v| Cow::Owned(v.clone())),
        }
    }

    fn walk<'v>(&self, start: &'v Value, path: &FieldPath) -> Result<&'v Value, ExecutionError> {
        let mut value = start;
        for accessor in &path.accessors {
            value = match binding::step(value, accessor) {
                Ok(next) => next,
                Err(Miss::MissingKey) if self.missing_key == MissingKeyPolicy::EmptyString => {
                    return Ok(&NULL);
                }
                Err(miss) => return Err(miss_error(miss, accessor, path)),
            };
        }
        Ok(value)
    }
}

fn miss_error(miss: Miss, accessor: &Accessor, path: &FieldPath) -> ExecutionError {
    let (kind, message) = match miss {
        Miss::MissingKey => (
            ExecutionErrorKind::FieldNotFound,
            format!("map has no entry for key \"{}\" in {}", accessor, path),
        ),
        Miss::OutOfRange { len } => (
            ExecutionErrorKind::IndexOutOfRange,
            format!("index {} out of range (length {}) in {}", accessor, len, path),
        ),
        Miss::Nil => (
            ExecutionErrorKind::NilDereference,
            format!("nil value while evaluating \"{}\" in {}", accessor, path),
        ),
        Miss::NotIndexable { type_name } => (
            ExecutionErrorKind::TypeMismatch,
            format!("can't evaluate \"{}\" on a {} in {}", accessor, type_name, path),
        ),
    };
    ExecutionError::new(kind, message, path.location)
}
