//! Renderer for executing compiled Akizora programs.
//!
//! Output is written straight to the sink as ops are visited, so a failing
//! render leaves everything before the failing op in place.

use std::borrow::Cow;
use std::io::Write;

use akizora_ast::{Builtin, Command, Literal, Location, Operand, Pipeline};

use crate::error::{Error, ExecutionError, ExecutionErrorKind, Result};
use crate::escape;
use crate::program::{Op, OpId, Program, Unit};
use crate::scope::Scope;
use crate::value::Value;

/// Renderer for a compiled program
pub struct Renderer<'p, W: Write> {
    program: &'p Program,
    sink: &'p mut W,
    depth: usize,
}

impl<'p, W: Write> Renderer<'p, W> {
    pub fn new(program: &'p Program, sink: &'p mut W) -> Self {
        Self {
            program,
            sink,
            depth: 0,
        }
    }

    /// Render the entry unit with `data` as both `.` and `$`
    pub fn render(&mut self, data: &Value) -> Result<()> {
        let program = self.program;
        let entry = program.entry();
        let mut scope = Scope::new(Cow::Borrowed(data), program.config().missing_key);
        self.render_nodes(entry, entry.root(), &mut scope)?;
        self.sink.flush()?;
        Ok(())
    }

    fn render_nodes<'d>(
        &mut self,
        unit: &'p Unit,
        ids: &[OpId],
        scope: &mut Scope<'d>,
    ) -> Result<()> {
        for &id in ids {
            match unit.op(id) {
                Op::Text(text) => self.sink.write_all(text.as_bytes())?,
                Op::Output {
                    pipeline, escapers, ..
                } => {
                    let value = self.eval_pipeline(pipeline, scope)?;
                    let output = escape::apply(escapers, &value);
                    self.sink.write_all(output.as_bytes())?;
                }
                Op::If {
                    condition,
                    then_branch,
                    else_branch,
                    ..
                } => {
                    let value = self.eval_pipeline(condition, scope)?;
                    if value.is_truthy() {
                        self.render_nodes(unit, then_branch, scope)?;
                    } else if let Some(else_branch) = else_branch {
                        self.render_nodes(unit, else_branch, scope)?;
                    }
                }
                Op::Range {
                    source,
                    body,
                    else_branch,
                    location,
                } => {
                    let value = self.eval_pipeline(source, scope)?;
                    let items = range_items(value, *location)?;
                    if items.is_empty() {
                        if let Some(else_branch) = else_branch {
                            self.render_nodes(unit, else_branch, scope)?;
                        }
                        continue;
                    }
                    for item in items {
                        scope.push_dot(item);
                        let result = self.render_nodes(unit, body, scope);
                        scope.pop_dot();
                        result?;
                    }
                }
                Op::With {
                    value,
                    body,
                    else_branch,
                    ..
                } => {
                    let value = self.eval_pipeline(value, scope)?;
                    if value.is_truthy() {
                        scope.push_dot(value);
                        let result = self.render_nodes(unit, body, scope);
                        scope.pop_dot();
                        result?;
                    } else if let Some(else_branch) = else_branch {
                        self.render_nodes(unit, else_branch, scope)?;
                    }
                }
                Op::Include {
                    name,
                    unit: target,
                    data,
                    location,
                } => {
                    let program = self.program;
                    let Some(target) = target.and_then(|id| program.unit(id)) else {
                        return Err(Error::UndefinedTemplate {
                            name: name.clone(),
                            location: *location,
                        });
                    };
                    self.render_include(target, data.as_ref(), *location, scope)?;
                }
            }
        }
        Ok(())
    }

    fn render_include<'d>(
        &mut self,
        target: &'p Unit,
        data: Option<&Pipeline>,
        location: Location,
        scope: &Scope<'d>,
    ) -> Result<()> {
        let max_depth = self.program.config().max_include_depth;
        if self.depth >= max_depth {
            return Err(ExecutionError::new(
                ExecutionErrorKind::IncludeDepthExceeded,
                format!(
                    "exceeded maximum template depth ({}) including '{}'",
                    max_depth,
                    target.name()
                ),
                location,
            )
            .into());
        }

        let value = match data {
            Some(pipeline) => self.eval_pipeline(pipeline, scope)?,
            None => Cow::Owned(Value::Null),
        };
        let mut inner = Scope::new(value, self.program.config().missing_key);

        self.depth += 1;
        let result = self.render_nodes(target, target.root(), &mut inner);
        self.depth -= 1;
        result
    }

    fn eval_pipeline<'d>(
        &self,
        pipeline: &Pipeline,
        scope: &Scope<'d>,
    ) -> Result<Cow<'d, Value>> {
        let mut result: Option<Cow<'d, Value>> = None;
        for command in &pipeline.commands {
            let value = match command {
                Command::Operand(operand) => self.eval_operand(operand, scope)?,
                Command::Call {
                    func,
                    args,
                    location,
                } => self.eval_call(*func, args, result.take(), *location, scope)?,
            };
            result = Some(value);
        }
        Ok(result.unwrap_or(Cow::Owned(Value::Null)))
    }

    fn eval_operand<'d>(&self, operand: &Operand, scope: &Scope<'d>) -> Result<Cow<'d, Value>> {
        match operand {
            Operand::Field(path) => Ok(scope.resolve(path)?),
            Operand::Literal(literal) => Ok(Cow::Owned(literal_value(literal))),
        }
    }

    /// Call a builtin; a piped value is the last argument
    fn eval_call<'d>(
        &self,
        func: Builtin,
        args: &[Operand],
        piped: Option<Cow<'d, Value>>,
        location: Location,
        scope: &Scope<'d>,
    ) -> Result<Cow<'d, Value>> {
        if let Builtin::And | Builtin::Or = func {
            // stop at the first falsy (and) or truthy (or) argument
            let stop_when = func == Builtin::Or;
            let values = args
                .iter()
                .map(|arg| self.eval_operand(arg, scope))
                .chain(piped.map(Ok));
            let mut last = None;
            for value in values {
                let value = value?;
                let done = value.is_truthy() == stop_when;
                last = Some(value);
                if done {
                    break;
                }
            }
            return Ok(last.unwrap_or(Cow::Owned(Value::Null)));
        }

        let mut values = args
            .iter()
            .map(|arg| self.eval_operand(arg, scope))
            .collect::<Result<Vec<_>>>()?;
        values.extend(piped);
        Ok(Cow::Owned(call_builtin(func, &values, location)?))
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::String(s) => Value::String(s.clone()),
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Integer(n) => Value::Integer(*n),
        Literal::Float(x) => Value::Float(*x),
    }
}

/// Elements a range visits: arrays in order, objects in key order, nothing for null
fn range_items(value: Cow<'_, Value>, location: Location) -> Result<Vec<Cow<'_, Value>>> {
    match value {
        Cow::Borrowed(Value::Array(items)) => Ok(items.iter().map(Cow::Borrowed).collect()),
        Cow::Borrowed(Value::Object(map)) => Ok(map.values().map(Cow::Borrowed).collect()),
        Cow::Owned(Value::Array(items)) => Ok(items.into_iter().map(Cow::Owned).collect()),
        Cow::Owned(Value::Object(map)) => Ok(map.into_values().map(Cow::Owned).collect()),
        Cow::Borrowed(Value::Null) | Cow::Owned(Value::Null) => Ok(Vec::new()),
        other => Err(ExecutionError::new(
            ExecutionErrorKind::TypeMismatch,
            format!("range can't iterate over {}", other.type_name()),
            location,
        )
        .into()),
    }
}

fn type_mismatch(message: String, location: Location) -> ExecutionError {
    ExecutionError::new(ExecutionErrorKind::TypeMismatch, message, location)
}

/// Equality of basic values; `None` when the types cannot be compared
fn basic_eq(a: &Value, b: &Value) -> Option<bool> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(true),
        (Value::Null, _) | (_, Value::Null) => Some(false),
        (Value::Bool(x), Value::Bool(y)) => Some(x == y),
        (Value::Integer(x), Value::Integer(y)) => Some(x == y),
        (Value::Float(x), Value::Float(y)) => Some(x == y),
        (Value::Integer(x), Value::Float(y)) | (Value::Float(y), Value::Integer(x)) => {
            Some(*x as f64 == *y)
        }
        (Value::String(x), Value::String(y)) => Some(x == y),
        _ => None,
    }
}

fn compare(
    func: Builtin,
    a: &Value,
    b: &Value,
    location: Location,
) -> std::result::Result<bool, ExecutionError> {
    basic_eq(a, b).ok_or_else(|| {
        type_mismatch(
            format!(
                "{}: incompatible types for comparison ({} and {})",
                func.name(),
                a.type_name(),
                b.type_name()
            ),
            location,
        )
    })
}

fn is_string(value: &Value) -> bool {
    matches!(value, Value::String(_))
}

/// Operands joined with spaces where neither side is a string
fn sprint(args: &[Cow<'_, Value>]) -> String {
    let mut output = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 && !is_string(&args[i - 1]) && !is_string(arg) {
            output.push(' ');
        }
        output.push_str(&arg.to_string());
    }
    output
}

fn call_builtin(
    func: Builtin,
    args: &[Cow<'_, Value>],
    location: Location,
) -> std::result::Result<Value, ExecutionError> {
    let arity_error = || {
        type_mismatch(
            format!("wrong number of arguments for {}: {}", func.name(), args.len()),
            location,
        )
    };
    match func {
        Builtin::Not => match args {
            [value] => Ok(Value::Bool(!value.is_truthy())),
            _ => Err(arity_error()),
        },
        Builtin::And => Ok(args
            .iter()
            .find(|v| !v.is_truthy())
            .or(args.last())
            .map(|v| Value::clone(v))
            .unwrap_or_default()),
        Builtin::Or => Ok(args
            .iter()
            .find(|v| v.is_truthy())
            .or(args.last())
            .map(|v| Value::clone(v))
            .unwrap_or_default()),
        Builtin::Eq => match args.split_first() {
            Some((first, rest)) if !rest.is_empty() => {
                for other in rest {
                    if compare(func, first, other, location)? {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            _ => Err(arity_error()),
        },
        Builtin::Ne => match args {
            [a, b] => Ok(Value::Bool(!compare(func, a, b, location)?)),
            _ => Err(arity_error()),
        },
        Builtin::Len => match args {
            [value] => match &**value {
                Value::String(s) => Ok(Value::Integer(s.len() as i64)),
                Value::Array(items) => Ok(Value::Integer(items.len() as i64)),
                Value::Object(map) => Ok(Value::Integer(map.len() as i64)),
                other => Err(type_mismatch(
                    format!("len of {}", other.type_name()),
                    location,
                )),
            },
            _ => Err(arity_error()),
        },
        Builtin::Html => Ok(Value::String(escape::html(&sprint(args)))),
        Builtin::Js => Ok(Value::String(escape::js_string(&sprint(args)))),
        Builtin::UrlQuery => Ok(Value::String(escape::url_query(&sprint(args)))),
        Builtin::Print => Ok(Value::String(sprint(args))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(source: &str, data: serde_json::Value) -> Result<String> {
        crate::compile("test", source)?.render(&Value::from_json(data))
    }

    #[test]
    fn test_render_text() {
        assert_eq!(render("Hello, world!", json!({})).unwrap(), "Hello, world!");
    }

    #[test]
    fn test_render_fields() {
        let result = render(
            "Hello {{.Name}}, you have {{.Count}} items.",
            json!({"Name": "Bob", "Count": 3}),
        )
        .unwrap();
        assert_eq!(result, "Hello Bob, you have 3 items.");
    }

    #[test]
    fn test_render_range_with_else() {
        let source = "{{range .Items}}[{{.}}]{{else}}none{{end}}";
        assert_eq!(render(source, json!({"Items": ["a", "b"]})).unwrap(), "[a][b]");
        assert_eq!(render(source, json!({"Items": []})).unwrap(), "none");
        assert_eq!(render(source, json!({"Items": null})).unwrap(), "none");
    }

    #[test]
    fn test_range_over_object_in_key_order() {
        let result = render("{{range .}}{{.}},{{end}}", json!({"b": 2, "a": 1})).unwrap();
        assert_eq!(result, "1,2,");
    }

    #[test]
    fn test_range_type_mismatch() {
        let err = render("{{range .N}}x{{end}}", json!({"N": 3})).unwrap_err();
        assert_eq!(err.execution_kind(), Some(ExecutionErrorKind::TypeMismatch));
    }

    #[test]
    fn test_with_rebinds_dot() {
        let source = "{{with .User}}{{.Name}} of {{$.Site}}{{else}}anonymous{{end}}";
        assert_eq!(
            render(source, json!({"User": {"Name": "Ann"}, "Site": "x"})).unwrap(),
            "Ann of x"
        );
        assert_eq!(
            render(source, json!({"User": null, "Site": "x"})).unwrap(),
            "anonymous"
        );
    }

    #[test]
    fn test_builtins() {
        let data = json!({"A": 1, "B": 0, "S": "abc", "L": [1, 2, 3]});
        assert_eq!(render("{{not .B}}", data.clone()).unwrap(), "true");
        assert_eq!(render("{{and .A .B}}", data.clone()).unwrap(), "0");
        assert_eq!(render("{{or .B .S}}", data.clone()).unwrap(), "abc");
        assert_eq!(render("{{eq .A 2 1}}", data.clone()).unwrap(), "true");
        assert_eq!(render("{{ne .S \"abc\"}}", data.clone()).unwrap(), "false");
        assert_eq!(render("{{len .L}} {{.S | len}}", data.clone()).unwrap(), "3 3");
        assert_eq!(render("{{print 1 2 \"x\" 3}}", data.clone()).unwrap(), "1 2x3");
        assert_eq!(
            render("{{urlquery .S | print}}", json!({"S": "a b&c"})).unwrap(),
            "a%20b%26c"
        );
    }

    #[test]
    fn test_and_short_circuits() {
        let result = render(
            "{{if and .Missing.Deep .X}}y{{else}}n{{end}}",
            json!({"Missing": null}),
        );
        // the first operand already fails to resolve
        assert!(result.is_err());

        let result = render("{{if and false .Nothing.Deep}}y{{else}}n{{end}}", json!({"Nothing": null}));
        assert_eq!(result.unwrap(), "n");
    }

    #[test]
    fn test_eq_incompatible_types() {
        let err = render("{{eq .S 1}}", json!({"S": "1"})).unwrap_err();
        assert_eq!(err.execution_kind(), Some(ExecutionErrorKind::TypeMismatch));
    }

    #[test]
    fn test_partial_output_on_error() {
        let program = crate::compile("test", "before {{.Missing}} after").unwrap();
        let mut sink = Vec::new();
        let err = program
            .execute(&Value::from_json(json!({})), &mut sink)
            .unwrap_err();
        assert_eq!(err.execution_kind(), Some(ExecutionErrorKind::FieldNotFound));
        assert_eq!(String::from_utf8(sink).unwrap(), "before ");
    }

    #[test]
    fn test_include_depth_exceeded() {
        let source = "{{define \"loop\"}}x{{template \"loop\" .}}{{end}}{{template \"loop\" .}}";
        let config = crate::Config::default().with_max_include_depth(5);
        let program = crate::compile_with("test", source, &config).unwrap();
        let mut sink = Vec::new();
        let err = program.execute(&Value::Null, &mut sink).unwrap_err();
        assert_eq!(
            err.execution_kind(),
            Some(ExecutionErrorKind::IncludeDepthExceeded)
        );
        assert_eq!(String::from_utf8(sink).unwrap(), "xxxxx");
    }
}
