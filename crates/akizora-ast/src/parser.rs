//! Recursive descent parser for Akizora templates.
//!
//! Builds the node arena of each template from the token stream. Block
//! actions open a frame that the matching `{{end}}` closes.

use crate::token::{Keyword, Token, TokenKind};
use crate::{
    Accessor, Builtin, Command, FieldPath, IfNode, IncludeNode, Literal, Location, Node, NodeId,
    Operand, OutputNode, ParseError, Parsed, PathRoot, Pipeline, RangeNode, Template, TextNode,
    WithNode,
};

type Result<T> = std::result::Result<T, ParseError>;

/// How a list of nodes ended
enum Terminator {
    Eof,
    End(Location),
    Else(Location),
    ElseIf(Pipeline, Location),
}

/// What a single `{{ ... }}` action turned into
enum Action {
    Node(NodeId),
    Defined,
    Terminator(Terminator),
}

/// Recursive descent parser for Akizora templates
pub struct Parser {
    name: String,
    tokens: Vec<Token>,
    pos: usize,
    nodes: Vec<Node>,
    defines: Vec<Template>,
}

impl Parser {
    /// Create a new parser from a token stream
    pub fn new(name: impl Into<String>, tokens: Vec<Token>) -> Self {
        Self {
            name: name.into(),
            tokens,
            pos: 0,
            nodes: Vec::new(),
            defines: Vec::new(),
        }
    }

    /// Parse the token stream into the main template and its definitions
    pub fn parse(&mut self) -> Result<Parsed> {
        let (root, terminator) = self.parse_list(true)?;
        match terminator {
            Terminator::Eof => {}
            Terminator::End(location) => {
                return Err(ParseError::parse("unexpected {{end}}", location));
            }
            Terminator::Else(location) | Terminator::ElseIf(_, location) => {
                return Err(ParseError::parse("unexpected {{else}}", location));
            }
        }

        let main = Template::new(
            self.name.clone(),
            std::mem::take(&mut self.nodes),
            root,
            Location::new(1, 1, 0),
        );
        Ok(Parsed {
            main,
            defines: std::mem::take(&mut self.defines),
        })
    }

    fn parse_list(&mut self, top_level: bool) -> Result<(Vec<NodeId>, Terminator)> {
        let mut ids = Vec::new();

        loop {
            let token = self.current_token().clone();
            match token.kind {
                TokenKind::Eof => return Ok((ids, Terminator::Eof)),
                TokenKind::Text(content) => {
                    self.advance_token();
                    ids.push(self.push(Node::Text(TextNode {
                        content,
                        location: token.location,
                    })));
                }
                TokenKind::ActionOpen => {
                    self.advance_token();
                    self.skip_whitespace();
                    match self.parse_action(token.location, top_level)? {
                        Action::Node(id) => ids.push(id),
                        Action::Defined => {}
                        Action::Terminator(terminator) => return Ok((ids, terminator)),
                    }
                }
                _ => return self.unexpected_token(None),
            }
        }
    }

    fn parse_action(&mut self, location: Location, top_level: bool) -> Result<Action> {
        let Some(keyword) = self.current_token().keyword() else {
            let pipeline = self.parse_pipeline("command")?;
            self.consume_close()?;
            let id = self.push(Node::Output(OutputNode { pipeline, location }));
            return Ok(Action::Node(id));
        };
        self.advance_token();

        match keyword {
            Keyword::If => {
                let condition = self.parse_pipeline("if")?;
                self.consume_close()?;
                self.parse_if_tail(condition, location).map(Action::Node)
            }
            Keyword::Range => self.parse_range(location).map(Action::Node),
            Keyword::With => self.parse_with(location).map(Action::Node),
            Keyword::End => {
                self.consume_close()?;
                Ok(Action::Terminator(Terminator::End(location)))
            }
            Keyword::Else => {
                self.skip_whitespace();
                if self.current_token().keyword() == Some(Keyword::If) {
                    self.advance_token();
                    let condition = self.parse_pipeline("if")?;
                    self.consume_close()?;
                    return Ok(Action::Terminator(Terminator::ElseIf(condition, location)));
                }
                self.consume_close()?;
                Ok(Action::Terminator(Terminator::Else(location)))
            }
            Keyword::Template => self.parse_include(location).map(Action::Node),
            Keyword::Define => {
                if !top_level {
                    return Err(ParseError::parse(
                        "{{define}} is only allowed at the top level",
                        location,
                    ));
                }
                self.parse_define(location)?;
                Ok(Action::Defined)
            }
            Keyword::Block => self.parse_block(location).map(Action::Node),
        }
    }

    fn parse_if_tail(&mut self, condition: Pipeline, location: Location) -> Result<NodeId> {
        let (then_branch, terminator) = self.parse_list(false)?;

        let else_branch = match terminator {
            Terminator::End(_) => None,
            Terminator::Else(_) => Some(self.parse_list_until_end("if", location)?),
            Terminator::ElseIf(condition, else_location) => {
                Some(vec![self.parse_if_tail(condition, else_location)?])
            }
            Terminator::Eof => return Err(Self::unterminated("if", location)),
        };

        Ok(self.push(Node::If(IfNode {
            condition,
            then_branch,
            else_branch,
            location,
        })))
    }

    fn parse_range(&mut self, location: Location) -> Result<NodeId> {
        let source = self.parse_pipeline("range")?;
        self.consume_close()?;
        let (body, else_branch) = self.parse_body_with_else("range", location)?;

        Ok(self.push(Node::Range(RangeNode {
            source,
            body,
            else_branch,
            location,
        })))
    }

    fn parse_with(&mut self, location: Location) -> Result<NodeId> {
        let value = self.parse_pipeline("with")?;
        self.consume_close()?;
        let (body, else_branch) = self.parse_body_with_else("with", location)?;

        Ok(self.push(Node::With(WithNode {
            value,
            body,
            else_branch,
            location,
        })))
    }

    fn parse_body_with_else(
        &mut self,
        keyword: &str,
        location: Location,
    ) -> Result<(Vec<NodeId>, Option<Vec<NodeId>>)> {
        let (body, terminator) = self.parse_list(false)?;
        match terminator {
            Terminator::End(_) => Ok((body, None)),
            Terminator::Else(_) => Ok((body, Some(self.parse_list_until_end(keyword, location)?))),
            Terminator::ElseIf(_, else_location) => Err(ParseError::parse(
                format!("'else if' is not allowed in {}", keyword),
                else_location,
            )),
            Terminator::Eof => Err(Self::unterminated(keyword, location)),
        }
    }

    fn parse_list_until_end(&mut self, keyword: &str, location: Location) -> Result<Vec<NodeId>> {
        let (ids, terminator) = self.parse_list(false)?;
        match terminator {
            Terminator::End(_) => Ok(ids),
            Terminator::Else(else_location) | Terminator::ElseIf(_, else_location) => {
                Err(ParseError::parse(
                    format!("unexpected 'else' after 'else' in {}", keyword),
                    else_location,
                ))
            }
            Terminator::Eof => Err(Self::unterminated(keyword, location)),
        }
    }

    fn parse_include(&mut self, location: Location) -> Result<NodeId> {
        let name = self.parse_template_name("template")?;
        self.skip_whitespace();
        let data = if self.at_close() {
            None
        } else {
            Some(self.parse_pipeline("template")?)
        };
        self.consume_close()?;

        Ok(self.push(Node::Include(IncludeNode {
            name,
            data,
            location,
        })))
    }

    fn parse_define(&mut self, location: Location) -> Result<()> {
        let name = self.parse_template_name("define")?;
        self.consume_close()?;
        self.parse_definition(name, "define", location)
    }

    fn parse_block(&mut self, location: Location) -> Result<NodeId> {
        let name = self.parse_template_name("block")?;
        let data = self.parse_pipeline("block")?;
        self.consume_close()?;
        self.parse_definition(name.clone(), "block", location)?;

        Ok(self.push(Node::Include(IncludeNode {
            name,
            data: Some(data),
            location,
        })))
    }

    /// Parse a definition body into its own arena
    fn parse_definition(&mut self, name: String, keyword: &str, location: Location) -> Result<()> {
        if name == self.name || self.defines.iter().any(|t| t.name() == name) {
            return Err(ParseError::parse(
                format!("template \"{}\" redefined", name),
                location,
            ));
        }

        let outer = std::mem::take(&mut self.nodes);
        let body = self.parse_list_until_end(keyword, location);
        let inner = std::mem::replace(&mut self.nodes, outer);
        let root = body?;

        self.defines.push(Template::new(name, inner, root, location));
        Ok(())
    }

    fn parse_template_name(&mut self, keyword: &str) -> Result<String> {
        self.skip_whitespace();
        let token = self.current_token().clone();
        match token.kind {
            TokenKind::StringLiteral(name) => {
                self.advance_token();
                Ok(name)
            }
            _ => Err(ParseError::parse(
                format!("expected quoted template name in {}", keyword),
                token.location,
            )),
        }
    }

    fn parse_pipeline(&mut self, context: &str) -> Result<Pipeline> {
        self.skip_whitespace();
        let location = self.current_token().location;
        if self.at_close() {
            return Err(ParseError::parse(
                format!("missing value for {}", context),
                location,
            ));
        }

        let mut commands = Vec::new();
        loop {
            commands.push(self.parse_command(commands.is_empty())?);
            self.skip_whitespace();

            match self.current_token().kind {
                TokenKind::Pipe => {
                    let pipe_location = self.current_token().location;
                    self.advance_token();
                    self.skip_whitespace();
                    if self.at_close() || self.at_pipe() {
                        return Err(ParseError::parse(
                            "missing command after '|'",
                            pipe_location,
                        ));
                    }
                }
                TokenKind::ActionClose => break,
                _ => return self.unexpected_token(Some("Unexpected token in pipeline")),
            }
        }

        Ok(Pipeline { commands, location })
    }

    fn parse_command(&mut self, first: bool) -> Result<Command> {
        let token = self.current_token().clone();

        let TokenKind::Identifier(name) = &token.kind else {
            if !first {
                return Err(ParseError::parse(
                    "non-function command in pipeline stage",
                    token.location,
                ));
            }
            let operand = self.parse_operand()?;
            self.skip_whitespace();
            if !self.at_close() && !self.at_pipe() {
                return self.unexpected_token(Some("Unexpected operand after value"));
            }
            return Ok(Command::Operand(operand));
        };

        if let Some(keyword) = token.keyword() {
            return Err(ParseError::parse(
                format!("unexpected keyword '{}' in pipeline", keyword.as_str()),
                token.location,
            ));
        }
        let func = Builtin::from_name(name).ok_or_else(|| {
            ParseError::parse(format!("function \"{}\" not defined", name), token.location)
        })?;
        self.advance_token();

        let mut args = Vec::new();
        loop {
            let spaced = self.skip_whitespace();
            if self.at_close() || self.at_pipe() {
                break;
            }
            if !spaced {
                return self.unexpected_token(Some("Missing space between arguments"));
            }
            args.push(self.parse_operand()?);
        }

        let supplied = args.len() + usize::from(!first);
        Self::check_arity(func, supplied, token.location)?;

        Ok(Command::Call {
            func,
            args,
            location: token.location,
        })
    }

    fn parse_operand(&mut self) -> Result<Operand> {
        let token = self.current_token().clone();
        match token.kind {
            TokenKind::Dot => {
                self.advance_token();
                self.parse_field_path(PathRoot::Dot, token.location)
            }
            TokenKind::Dollar => {
                self.advance_token();
                self.parse_field_path(PathRoot::Root, token.location)
            }
            TokenKind::StringLiteral(value) => {
                self.advance_token();
                Ok(Operand::Literal(Literal::String(value)))
            }
            TokenKind::BoolLiteral(value) => {
                self.advance_token();
                Ok(Operand::Literal(Literal::Bool(value)))
            }
            TokenKind::NumberLiteral(text) => {
                self.advance_token();
                Self::parse_number(&text, token.location).map(Operand::Literal)
            }
            _ => self.unexpected_token(Some("Expected operand")),
        }
    }

    /// Parse the accessors following a leading `.` or `$`
    fn parse_field_path(&mut self, root: PathRoot, location: Location) -> Result<Operand> {
        let mut accessors = Vec::new();

        if root == PathRoot::Dot {
            match self.parse_accessor()? {
                Some(accessor) => accessors.push(accessor),
                None if matches!(self.current_token().kind, TokenKind::Dot) => {
                    return Err(Self::malformed_path(location));
                }
                None => {}
            }
        }

        while !accessors.is_empty() || root == PathRoot::Root {
            if !matches!(self.current_token().kind, TokenKind::Dot) {
                break;
            }
            let dot_location = self.current_token().location;
            self.advance_token();
            match self.parse_accessor()? {
                Some(accessor) => accessors.push(accessor),
                None => return Err(Self::malformed_path(dot_location)),
            }
        }

        Ok(Operand::Field(FieldPath {
            root,
            accessors,
            location,
        }))
    }

    fn parse_accessor(&mut self) -> Result<Option<Accessor>> {
        let token = self.current_token().clone();
        let accessor = match token.kind {
            TokenKind::Identifier(name) => Accessor::Field(name),
            TokenKind::BoolLiteral(value) => Accessor::Field(value.to_string()),
            TokenKind::NumberLiteral(text) => {
                let index = text
                    .parse::<usize>()
                    .map_err(|_| Self::malformed_path(token.location))?;
                Accessor::Index(index)
            }
            _ => return Ok(None),
        };
        self.advance_token();
        Ok(Some(accessor))
    }

    fn parse_number(text: &str, location: Location) -> Result<Literal> {
        let literal = if text.contains('.') {
            text.parse::<f64>().ok().map(Literal::Float)
        } else {
            text.parse::<i64>().ok().map(Literal::Integer)
        };
        literal.ok_or_else(|| ParseError::parse(format!("bad number: {}", text), location))
    }

    fn check_arity(func: Builtin, supplied: usize, location: Location) -> Result<()> {
        let (min, max) = func.arity();
        if supplied >= min && max.map_or(true, |max| supplied <= max) {
            return Ok(());
        }

        let wanted = match max {
            Some(max) if max == min => min.to_string(),
            Some(max) => format!("{} to {}", min, max),
            None => format!("at least {}", min),
        };
        Err(ParseError::parse(
            format!(
                "wrong number of args for {}: want {}, got {}",
                func.name(),
                wanted,
                supplied
            ),
            location,
        ))
    }

    fn malformed_path(location: Location) -> ParseError {
        ParseError::parse("malformed field path", location)
    }

    fn unterminated(keyword: &str, location: Location) -> ParseError {
        ParseError::parse(format!("unexpected EOF: unclosed {}", keyword), location)
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn current_token(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance_token(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn at_close(&self) -> bool {
        matches!(self.current_token().kind, TokenKind::ActionClose)
    }

    fn at_pipe(&self) -> bool {
        matches!(self.current_token().kind, TokenKind::Pipe)
    }

    fn consume_close(&mut self) -> Result<()> {
        self.skip_whitespace();
        if !self.at_close() {
            return self.unexpected_token(Some("Expected '}}'"));
        }
        self.advance_token();
        Ok(())
    }

    /// Skip whitespace tokens; returns whether any were skipped
    fn skip_whitespace(&mut self) -> bool {
        let mut skipped = false;
        while matches!(self.current_token().kind, TokenKind::Whitespace(_)) {
            self.advance_token();
            skipped = true;
        }
        skipped
    }

    fn unexpected_token<T>(&self, message: Option<&str>) -> Result<T> {
        let token = self.current_token();
        let msg = match message {
            Some(m) => format!("{}: {:?}", m, token.kind),
            None => format!("Unexpected token: {:?}", token.kind),
        };
        Err(ParseError::parse(msg, token.location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn main(source: &str) -> Template {
        parse("test", source).unwrap().main
    }

    fn field(template: &Template, id: NodeId) -> FieldPath {
        match template.node(id) {
            Node::Output(output) => match &output.pipeline.commands[0] {
                Command::Operand(Operand::Field(path)) => path.clone(),
                other => panic!("Expected field operand, got {:?}", other),
            },
            other => panic!("Expected Output node, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_text() {
        let template = main("Hello, world!");
        assert_eq!(template.root().len(), 1);
        if let Node::Text(node) = template.node(template.root()[0]) {
            assert_eq!(node.content, "Hello, world!");
        } else {
            panic!("Expected Text node");
        }
    }

    #[test]
    fn test_parse_field_path() {
        let template = main("{{.User.Emails.0}}");
        let path = field(&template, template.root()[0]);
        assert_eq!(path.root, PathRoot::Dot);
        assert_eq!(
            path.accessors,
            vec![
                Accessor::Field("User".to_string()),
                Accessor::Field("Emails".to_string()),
                Accessor::Index(0),
            ]
        );
        assert_eq!(path.to_string(), ".User.Emails.0");
    }

    #[test]
    fn test_parse_bare_dot_and_root() {
        let template = main("{{.}}{{$}}{{$.Title}}");
        let dot = field(&template, template.root()[0]);
        assert!(dot.accessors.is_empty());
        let root = field(&template, template.root()[1]);
        assert_eq!(root.root, PathRoot::Root);
        let title = field(&template, template.root()[2]);
        assert_eq!(title.to_string(), "$.Title");
    }

    #[test]
    fn test_parse_if_else_block() {
        let template = main("{{if .Show}}Yes{{else}}No{{end}}");
        if let Node::If(node) = template.node(template.root()[0]) {
            assert_eq!(node.then_branch.len(), 1);
            assert_eq!(node.else_branch.as_ref().map(Vec::len), Some(1));
        } else {
            panic!("Expected If node");
        }
    }

    #[test]
    fn test_parse_else_if_chain() {
        let template = main("{{if .A}}a{{else if .B}}b{{else}}c{{end}}");
        assert_eq!(template.root().len(), 1);
        let Node::If(outer) = template.node(template.root()[0]) else {
            panic!("Expected If node");
        };
        let else_branch = outer.else_branch.as_ref().unwrap();
        let Node::If(inner) = template.node(else_branch[0]) else {
            panic!("Expected nested If node");
        };
        assert!(inner.else_branch.is_some());
    }

    #[test]
    fn test_parse_range_with_else() {
        let template = main("{{range .Items}}<li>{{.}}</li>{{else}}none{{end}}");
        if let Node::Range(node) = template.node(template.root()[0]) {
            assert_eq!(node.body.len(), 3);
            assert!(node.else_branch.is_some());
        } else {
            panic!("Expected Range node");
        }
    }

    #[test]
    fn test_parse_pipeline_with_call() {
        let template = main("{{.Items | len}}{{eq .A \"x\"}}");
        let Node::Output(output) = template.node(template.root()[0]) else {
            panic!("Expected Output node");
        };
        assert_eq!(output.pipeline.commands.len(), 2);
        assert!(matches!(
            output.pipeline.commands[1],
            Command::Call { func: Builtin::Len, .. }
        ));
    }

    #[test]
    fn test_parse_define_and_template() {
        let parsed = parse("page", "{{define \"row\"}}<td>{{.}}</td>{{end}}{{template \"row\" .X}}")
            .unwrap();
        assert_eq!(parsed.defines.len(), 1);
        assert_eq!(parsed.defines[0].name(), "row");
        assert_eq!(parsed.main.root().len(), 1);
        if let Node::Include(include) = parsed.main.node(parsed.main.root()[0]) {
            assert_eq!(include.name, "row");
            assert!(include.data.is_some());
        } else {
            panic!("Expected Include node");
        }
    }

    #[test]
    fn test_parse_block_defines_and_includes() {
        let parsed = parse("page", "{{block \"title\" .}}Default{{end}}").unwrap();
        assert_eq!(parsed.defines[0].name(), "title");
        assert!(matches!(
            parsed.main.node(parsed.main.root()[0]),
            Node::Include(_)
        ));
    }

    #[test]
    fn test_unmatched_end_error() {
        let err = parse("t", "text{{end}}").unwrap_err();
        assert!(matches!(err, ParseError::Parse { .. }));
        assert!(err.message().contains("unexpected {{end}}"));
    }

    #[test]
    fn test_unclosed_if_error() {
        let err = parse("t", "{{if .X}}open").unwrap_err();
        assert!(err.message().contains("unclosed if"));
        assert_eq!(err.location().column, 1);
    }

    #[test]
    fn test_else_outside_block_error() {
        assert!(parse("t", "{{else}}").is_err());
    }

    #[test]
    fn test_else_if_in_range_error() {
        assert!(parse("t", "{{range .X}}{{else if .Y}}{{end}}").is_err());
    }

    #[test]
    fn test_unknown_function_error() {
        let err = parse("t", "{{frobnicate .X}}").unwrap_err();
        assert!(err.message().contains("function \"frobnicate\" not defined"));
    }

    #[test]
    fn test_empty_pipeline_error() {
        let err = parse("t", "{{ }}").unwrap_err();
        assert!(err.message().contains("missing value"));
        assert!(parse("t", "{{if}}{{end}}").is_err());
        assert!(parse("t", "{{.X | }}").is_err());
    }

    #[test]
    fn test_malformed_path_error() {
        let err = parse("t", "{{.A..B}}").unwrap_err();
        assert!(err.message().contains("malformed field path"));
    }

    #[test]
    fn test_wrong_arity_error() {
        let err = parse("t", "{{len}}").unwrap_err();
        assert!(err.message().contains("wrong number of args for len"));
        assert!(parse("t", "{{.A | not .B}}").is_err());
    }

    #[test]
    fn test_define_not_at_top_level_error() {
        assert!(parse("t", "{{if .X}}{{define \"a\"}}{{end}}{{end}}").is_err());
    }

    #[test]
    fn test_redefined_template_error() {
        let err = parse("t", "{{define \"a\"}}{{end}}{{define \"a\"}}{{end}}").unwrap_err();
        assert!(err.message().contains("redefined"));
    }
}
