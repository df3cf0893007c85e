//! Compiled templates.
//!
//! A [`Program`] holds one [`Unit`] per (template, entry context) pair the
//! analyzer specialised. Each unit keeps the arena layout of the template it
//! was lowered from: op ids are the template's node ids.

use std::io::Write;

use akizora_ast::{Location, Node, Pipeline, Template};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::escape::Escaper;
use crate::renderer::Renderer;
use crate::value::Value;

/// Index of a unit inside its program.
pub type UnitId = usize;
/// Index of an op inside its unit.
pub type OpId = usize;

#[derive(Debug, Clone)]
pub enum Op {
    Text(String),
    Output {
        pipeline: Pipeline,
        escapers: Vec<Escaper>,
        location: Location,
    },
    If {
        condition: Pipeline,
        then_branch: Vec<OpId>,
        else_branch: Option<Vec<OpId>>,
        location: Location,
    },
    Range {
        source: Pipeline,
        body: Vec<OpId>,
        else_branch: Option<Vec<OpId>>,
        location: Location,
    },
    With {
        value: Pipeline,
        body: Vec<OpId>,
        else_branch: Option<Vec<OpId>>,
        location: Location,
    },
    Include {
        name: String,
        unit: Option<UnitId>,
        data: Option<Pipeline>,
        location: Location,
    },
}

impl Op {
    fn lower(node: &Node) -> Self {
        match node {
            Node::Text(n) => Op::Text(n.content.clone()),
            Node::Output(n) => Op::Output {
                pipeline: n.pipeline.clone(),
                escapers: Vec::new(),
                location: n.location,
            },
            Node::If(n) => Op::If {
                condition: n.condition.clone(),
                then_branch: n.then_branch.clone(),
                else_branch: n.else_branch.clone(),
                location: n.location,
            },
            Node::Range(n) => Op::Range {
                source: n.source.clone(),
                body: n.body.clone(),
                else_branch: n.else_branch.clone(),
                location: n.location,
            },
            Node::With(n) => Op::With {
                value: n.value.clone(),
                body: n.body.clone(),
                else_branch: n.else_branch.clone(),
                location: n.location,
            },
            Node::Include(n) => Op::Include {
                name: n.name.clone(),
                unit: None,
                data: n.data.clone(),
                location: n.location,
            },
        }
    }
}

/// One template specialised for one entry context
#[derive(Debug, Clone)]
pub struct Unit {
    name: String,
    context: String,
    ops: Vec<Op>,
    root: Vec<OpId>,
}

impl Unit {
    pub(crate) fn lower(template: &Template, context: String) -> Self {
        Self {
            name: template.name().to_string(),
            context,
            ops: template.nodes().iter().map(Op::lower).collect(),
            root: template.root().to_vec(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entry context this unit was specialised for, for diagnostics
    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn root(&self) -> &[OpId] {
        &self.root
    }

    pub fn op(&self, id: OpId) -> &Op {
        &self.ops[id]
    }

    pub(crate) fn op_mut(&mut self, id: OpId) -> &mut Op {
        &mut self.ops[id]
    }

    /// Every output carries escapers and every include is linked
    pub(crate) fn validate(&self, unit_count: usize) -> Result<()> {
        for op in &self.ops {
            match op {
                Op::Output {
                    escapers, location, ..
                } if escapers.is_empty() => {
                    return Err(Error::ambiguous(
                        format!("no escaper chosen for output in '{}'", self.name),
                        *location,
                    ));
                }
                Op::Include {
                    name,
                    unit,
                    location,
                    ..
                } if !unit.map_or(false, |id| id < unit_count) => {
                    return Err(Error::UndefinedTemplate {
                        name: name.clone(),
                        location: *location,
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// An executable, immutable template
#[derive(Debug, Clone)]
pub struct Program {
    name: String,
    units: Vec<Unit>,
    entry: UnitId,
    config: Config,
}

impl Program {
    pub(crate) fn new(name: String, units: Vec<Unit>, entry: UnitId, config: Config) -> Self {
        Self {
            name,
            units,
            entry,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(id)
    }

    pub fn entry(&self) -> &Unit {
        &self.units[self.entry]
    }

    /// Render into `sink`. On error, output written so far stays in the sink.
    pub fn execute<W: Write>(&self, data: &Value, sink: &mut W) -> Result<()> {
        Renderer::new(self, sink).render(data)
    }

    /// Render to a string
    pub fn render(&self, data: &Value) -> Result<String> {
        let mut buf = Vec::new();
        self.execute(data, &mut buf)?;
        String::from_utf8(buf)
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }

    /// Render with JSON data
    pub fn render_json(&self, data: serde_json::Value) -> Result<String> {
        self.render(&Value::from_json(data))
    }
}
