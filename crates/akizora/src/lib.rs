//! Akizora - templates that escape by context
//!
//! Akizora compiles Go-style templates once and renders them many times:
//! - Output is escaped for the markup around it (text, attributes, URLs,
//!   `<script>` and `<style>` bodies)
//! - Contexts that cannot be decided statically are compile errors
//! - A compiled [`Program`] is immutable and can be shared between threads
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//!
//! let result = akizora::render(
//!     "Hello, {{.Name}}!",
//!     json!({"Name": "World"}),
//! ).unwrap();
//!
//! assert_eq!(result, "Hello, World!");
//! ```

pub mod analyzer;
pub mod binding;
pub mod config;
pub mod error;
pub mod escape;
pub mod html_context;
pub mod program;
pub mod renderer;
pub mod scope;
pub mod value;

pub use akizora_ast::{Location, ParseError, Template};
pub use binding::Lookup;
pub use config::{Config, MissingKeyPolicy};
pub use error::{Error, ExecutionError, ExecutionErrorKind, Result};
pub use escape::Escaper;
pub use program::{Op, Program, Unit};
pub use renderer::Renderer;
pub use value::Value;

use std::collections::HashMap;

use log::debug;

/// Named template sources compiled together, so one can include another
///
/// # Example
///
/// ```rust
/// use akizora::{Config, TemplateSet};
/// use serde_json::json;
///
/// let mut set = TemplateSet::new(Config::default());
/// set.add("item", "<li>{{.}}</li>").unwrap();
/// set.add("list", "<ul>{{range .}}{{template \"item\" .}}{{end}}</ul>").unwrap();
///
/// let program = set.compile("list").unwrap();
/// let result = program.render_json(json!(["a", "b"])).unwrap();
/// assert_eq!(result, "<ul><li>a</li><li>b</li></ul>");
/// ```
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    config: Config,
    templates: HashMap<String, Template>,
}

impl TemplateSet {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            templates: HashMap::new(),
        }
    }

    /// Parse `source` as template `name`, adding its `define`s too
    pub fn add(&mut self, name: &str, source: &str) -> Result<&mut Self> {
        let parsed = akizora_ast::parse(name, source)?;
        let mut added = parsed.defines;
        added.push(parsed.main);

        if let Some(dup) = added.iter().find(|t| self.templates.contains_key(t.name())) {
            return Err(Error::Parse {
                message: format!("template \"{}\" redefined", dup.name()),
                location: dup.location(),
            });
        }

        for template in added {
            debug!("added template '{}'", template.name());
            self.templates.insert(template.name().to_string(), template);
        }
        Ok(self)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Compile the template `entry` and everything it includes
    pub fn compile(&self, entry: &str) -> Result<Program> {
        if !self.contains(entry) {
            return Err(Error::UndefinedTemplate {
                name: entry.to_string(),
                location: Location::default(),
            });
        }
        analyzer::analyze(&self.templates, entry, &self.config)
    }
}

/// Compile a single source with the default configuration
///
/// # Example
///
/// ```rust
/// use akizora::Value;
/// use serde_json::json;
///
/// let program = akizora::compile("page", "<p>{{.}}</p>").unwrap();
/// let result = program.render(&Value::from_json(json!("<b>"))).unwrap();
/// assert_eq!(result, "<p>&lt;b&gt;</p>");
/// ```
pub fn compile(name: &str, source: &str) -> Result<Program> {
    compile_with(name, source, &Config::default())
}

/// Compile a single source
pub fn compile_with(name: &str, source: &str, config: &Config) -> Result<Program> {
    let mut set = TemplateSet::new(config.clone());
    set.add(name, source)?;
    set.compile(name)
}

/// Convenience function: compile and render in one call
pub fn render(source: &str, data: serde_json::Value) -> Result<String> {
    compile("main", source)?.render_json(data)
}
