//! Context analysis: walks templates with the markup automaton and decides
//! the escapers of every output action.

use std::collections::{HashMap, HashSet};

use akizora_ast::{Builtin, Command, Location, Node, NodeId, Pipeline, Template};
use log::{debug, trace};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::escape::Escaper;
use crate::html_context::{Context, State};
use crate::program::{Op, Program, Unit, UnitId};

/// Contexts a single template may be specialised for
const MAX_SPECIALIZATIONS: usize = 64;

/// Compile `entry` out of `templates` into a program.
pub fn analyze(
    templates: &HashMap<String, Template>,
    entry: &str,
    config: &Config,
) -> Result<Program> {
    let mut analyzer = Analyzer::new(templates);
    let entry_unit = if config.autoescape {
        let (id, out) = analyzer.specialize(entry, Context::text(), Location::default())?;
        debug!("template '{}' ends in context {}", entry, out);
        id
    } else {
        analyzer.lower_verbatim(entry, Location::default())?
    };

    let unit_count = analyzer.units.len();
    for unit in &analyzer.units {
        unit.validate(unit_count)?;
    }
    debug!("compiled template '{}' into {} unit(s)", entry, unit_count);
    Ok(Program::new(
        entry.to_string(),
        analyzer.units,
        entry_unit,
        config.clone(),
    ))
}

struct Analyzer<'t> {
    templates: &'t HashMap<String, Template>,
    units: Vec<Unit>,
    specialized: HashMap<(String, Context), UnitId>,
    /// Output context of every finished unit
    outputs: HashMap<UnitId, Context>,
    /// Units entered again while still being analysed
    recursive: HashSet<UnitId>,
    /// Number of units lowered per template name
    counts: HashMap<String, usize>,
}

impl<'t> Analyzer<'t> {
    fn new(templates: &'t HashMap<String, Template>) -> Self {
        Self {
            templates,
            units: Vec::new(),
            specialized: HashMap::new(),
            outputs: HashMap::new(),
            recursive: HashSet::new(),
            counts: HashMap::new(),
        }
    }

    fn template(&self, name: &str, location: Location) -> Result<&'t Template> {
        let templates = self.templates;
        templates.get(name).ok_or_else(|| Error::UndefinedTemplate {
            name: name.to_string(),
            location,
        })
    }

    /// Unit for `name` entered in `ctx`, and the context it leaves behind
    fn specialize(
        &mut self,
        name: &str,
        ctx: Context,
        location: Location,
    ) -> Result<(UnitId, Context)> {
        let key = (name.to_string(), ctx.clone());
        if let Some(&id) = self.specialized.get(&key) {
            return Ok(match self.outputs.get(&id) {
                Some(out) => (id, out.clone()),
                None => {
                    // still on the stack: assume it ends where it starts
                    self.recursive.insert(id);
                    (id, ctx)
                }
            });
        }

        let template = self.template(name, location)?;
        let count = self.counts.entry(name.to_string()).or_insert(0);
        *count += 1;
        if *count > MAX_SPECIALIZATIONS {
            return Err(Error::ambiguous(
                format!(
                    "template '{}' needs more than {} contexts",
                    name, MAX_SPECIALIZATIONS
                ),
                location,
            ));
        }
        let id = self.units.len();
        self.units.push(Unit::lower(template, ctx.to_string()));
        self.specialized.insert(key, id);
        debug!("specializing template '{}' for context {}", name, ctx);

        let out = self.analyze_list(id, template, template.root(), ctx.clone())?;
        if let Some(reason) = out.error {
            return Err(Error::ambiguous(reason, template.location()));
        }
        if self.recursive.contains(&id) && out != ctx {
            return Err(Error::ambiguous(
                format!(
                    "recursive template '{}' starts in context {} but ends in {}",
                    name, ctx, out
                ),
                template.location(),
            ));
        }
        self.outputs.insert(id, out.clone());
        Ok((id, out))
    }

    fn analyze_list(
        &mut self,
        unit: UnitId,
        template: &'t Template,
        ids: &[NodeId],
        ctx: Context,
    ) -> Result<Context> {
        ids.iter()
            .try_fold(ctx, |ctx, &id| self.analyze_node(unit, template, id, ctx))
    }

    fn analyze_node(
        &mut self,
        unit: UnitId,
        template: &'t Template,
        id: NodeId,
        ctx: Context,
    ) -> Result<Context> {
        match template.node(id) {
            Node::Text(n) => {
                let out = ctx.advance(&n.content);
                match out.error {
                    Some(reason) => Err(Error::ambiguous(reason, n.location)),
                    None => Ok(out),
                }
            }
            Node::Output(n) => {
                let ctx = ctx.nudge();
                let escapers = ctx
                    .escapers()
                    .map_err(|reason| Error::ambiguous(format!("{} {}", reason, ctx), n.location))?;
                let stripped = strip_predefined_escapers(&n.pipeline);
                trace!(
                    "{}: output at {} escaped with {:?}",
                    template.name(),
                    n.location,
                    escapers
                );
                if let Op::Output {
                    pipeline,
                    escapers: slot,
                    ..
                } = self.units[unit].op_mut(id)
                {
                    *pipeline = stripped;
                    *slot = escapers;
                }
                Ok(ctx.after_output())
            }
            Node::If(n) => self.analyze_branches(
                unit,
                template,
                &n.then_branch,
                n.else_branch.as_deref(),
                ctx,
                ("if", n.location),
            ),
            Node::With(n) => self.analyze_branches(
                unit,
                template,
                &n.body,
                n.else_branch.as_deref(),
                ctx,
                ("with", n.location),
            ),
            Node::Range(n) => {
                let body_out = self.analyze_list(unit, template, &n.body, ctx.clone())?;
                let loop_ctx = Context::join(&ctx, &body_out)
                    .ok_or_else(|| range_error(&ctx, &body_out, n.location))?;
                if loop_ctx != ctx {
                    // later iterations start where the previous one stopped
                    let again = self.analyze_list(unit, template, &n.body, loop_ctx.clone())?;
                    match Context::join(&loop_ctx, &again) {
                        Some(fixed) if fixed == loop_ctx => {}
                        _ => return Err(range_error(&loop_ctx, &again, n.location)),
                    }
                }
                match &n.else_branch {
                    Some(ids) => {
                        let else_out = self.analyze_list(unit, template, ids, ctx)?;
                        Context::join(&loop_ctx, &else_out).ok_or_else(|| {
                            branch_error("range", &loop_ctx, &else_out, n.location)
                        })
                    }
                    None => Ok(loop_ctx),
                }
            }
            Node::Include(n) => {
                if matches!(
                    ctx.state,
                    State::TagName | State::AttrName | State::AfterName | State::BeforeValue
                ) {
                    return Err(Error::ambiguous(
                        format!("{{{{template \"{}\"}}}} inside a tag, in {}", n.name, ctx),
                        n.location,
                    ));
                }
                let (target, out) = self.specialize(&n.name, ctx, n.location)?;
                if let Op::Include { unit: slot, .. } = self.units[unit].op_mut(id) {
                    *slot = Some(target);
                }
                Ok(out)
            }
        }
    }

    fn analyze_branches(
        &mut self,
        unit: UnitId,
        template: &'t Template,
        body: &[NodeId],
        else_branch: Option<&[NodeId]>,
        ctx: Context,
        (keyword, location): (&str, Location),
    ) -> Result<Context> {
        let body_out = self.analyze_list(unit, template, body, ctx.clone())?;
        let else_out = match else_branch {
            Some(ids) => self.analyze_list(unit, template, ids, ctx)?,
            None => ctx,
        };
        Context::join(&body_out, &else_out)
            .ok_or_else(|| branch_error(keyword, &body_out, &else_out, location))
    }

    /// Lowering without escaping: one unit per template, outputs written as-is
    fn lower_verbatim(&mut self, name: &str, location: Location) -> Result<UnitId> {
        let key = (name.to_string(), Context::text());
        if let Some(&id) = self.specialized.get(&key) {
            return Ok(id);
        }

        let template = self.template(name, location)?;
        let id = self.units.len();
        self.units.push(Unit::lower(template, "verbatim".to_string()));
        self.specialized.insert(key, id);

        for (node_id, node) in template.nodes().iter().enumerate() {
            match node {
                Node::Output(_) => {
                    if let Op::Output { escapers, .. } = self.units[id].op_mut(node_id) {
                        *escapers = vec![Escaper::Verbatim];
                    }
                }
                Node::Include(n) => {
                    let target = self.lower_verbatim(&n.name, n.location)?;
                    if let Op::Include { unit, .. } = self.units[id].op_mut(node_id) {
                        *unit = Some(target);
                    }
                }
                _ => {}
            }
        }
        Ok(id)
    }
}

fn branch_error(keyword: &str, a: &Context, b: &Context, location: Location) -> Error {
    Error::ambiguous(
        format!(
            "{{{{{}}}}} branches end in different contexts: {} and {}",
            keyword, a, b
        ),
        location,
    )
}

fn range_error(before: &Context, after: &Context, location: Location) -> Error {
    Error::ambiguous(
        format!(
            "{{{{range}}}} body changes the context from {} to {}",
            before, after
        ),
        location,
    )
}

/// Drop trailing `html`/`urlquery` calls; the contextual escapers replace them.
fn strip_predefined_escapers(pipeline: &Pipeline) -> Pipeline {
    let mut stripped = pipeline.clone();
    while let Some(Command::Call { func, args, .. }) = stripped.commands.last() {
        if !func.is_predefined_escaper() {
            break;
        }
        if stripped.commands.len() == 1 {
            // `{{html .X}}` keeps its argument, `{{html .X .Y}}` prints them
            let command = match args.as_slice() {
                [operand] => Command::Operand(operand.clone()),
                _ => Command::Call {
                    func: Builtin::Print,
                    args: args.clone(),
                    location: pipeline.location,
                },
            };
            stripped.commands = vec![command];
            break;
        }
        stripped.commands.pop();
    }
    stripped
}
