//! Markup context tracking for the escaper.
//!
//! [`Context`] is the state of a small HTML/JS/CSS/URL automaton. Literal
//! template text moves it forward with [`Context::advance`]; at every output
//! action the current context decides which escapers apply
//! ([`Context::escapers`]).

use std::borrow::Cow;
use std::fmt;

use crate::escape::Escaper;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// HTML body text
    Text,
    /// Body of `<textarea>` or `<title>`
    Rcdata,
    TagName,
    /// Inside a tag, between attributes
    Tag,
    AttrName,
    /// After an attribute name, before any `=`
    AfterName,
    /// After `=`, before the value starts
    BeforeValue,
    /// Plain attribute value
    Attr,
    /// URL attribute value
    Url,
    Js,
    JsDqStr,
    JsSqStr,
    JsBqStr,
    JsRegexp,
    JsLineCmt,
    JsBlockCmt,
    Css,
    CssDqStr,
    CssSqStr,
    /// Inside `url("...")`
    CssDqUrl,
    /// Inside `url('...')`
    CssSqUrl,
    /// Inside an unquoted `url(...)`
    CssUrl,
    CssCmt,
    HtmlCmt,
    /// Nothing can safely be inserted here
    Error,
}

/// How the current attribute value ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delim {
    None,
    DoubleQuote,
    SingleQuote,
    SpaceOrTagEnd,
}

/// Kind of the attribute being read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrKind {
    None,
    Plain,
    Url,
    Script,
    Style,
}

/// Elements whose body is not HTML text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Element {
    None,
    Script,
    Style,
    Textarea,
    Title,
}

/// Position inside a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlPart {
    /// Nothing written yet, the scheme is still open
    None,
    /// In the scheme, authority or path
    PreQuery,
    /// After `?` or `#`
    QueryOrFrag,
    /// Branches disagree
    Unknown,
}

/// What a `/` means at the current JS position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JsCtx {
    Regexp,
    DivOp,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Context {
    pub state: State,
    pub delim: Delim,
    pub attr: AttrKind,
    pub element: Element,
    pub url_part: UrlPart,
    pub js_ctx: JsCtx,
    /// Tag or attribute name read so far when text stops inside one
    pub pending_name: String,
    /// The tag being read is an end tag
    pub end_tag: bool,
    /// Why the context is `State::Error`
    pub error: Option<&'static str>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            state: State::Text,
            delim: Delim::None,
            attr: AttrKind::None,
            element: Element::None,
            url_part: UrlPart::None,
            js_ctx: JsCtx::Regexp,
            pending_name: String::new(),
            end_tag: false,
            error: None,
        }
    }
}

impl Element {
    fn from_name(name: &str) -> Self {
        match name {
            "script" => Element::Script,
            "style" => Element::Style,
            "textarea" => Element::Textarea,
            "title" => Element::Title,
            _ => Element::None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Element::None => "",
            Element::Script => "script",
            Element::Style => "style",
            Element::Textarea => "textarea",
            Element::Title => "title",
        }
    }

    fn body_state(&self) -> State {
        match self {
            Element::None => State::Text,
            Element::Script => State::Js,
            Element::Style => State::Css,
            Element::Textarea | Element::Title => State::Rcdata,
        }
    }
}

impl AttrKind {
    /// Classify an attribute by its (lowercased) name
    pub fn from_name(name: &str) -> Self {
        let name = name.strip_prefix("data-").unwrap_or(name);
        let name = match name.split_once(':') {
            Some(("xmlns", _)) => return AttrKind::Url,
            Some((_, local)) => local,
            None => name,
        };
        if name.starts_with("on") {
            return AttrKind::Script;
        }
        match name {
            "style" => AttrKind::Style,
            "action" | "archive" | "background" | "cite" | "classid" | "codebase" | "data"
            | "formaction" | "href" | "icon" | "longdesc" | "manifest" | "poster" | "profile"
            | "src" | "srcset" | "usemap" | "xmlns" => AttrKind::Url,
            _ if name.contains("src") || name.contains("uri") || name.contains("url") => {
                AttrKind::Url
            }
            _ => AttrKind::Plain,
        }
    }

    fn value_state(&self) -> State {
        match self {
            AttrKind::Url => State::Url,
            AttrKind::Script => State::Js,
            AttrKind::Style => State::Css,
            AttrKind::None | AttrKind::Plain => State::Attr,
        }
    }
}

fn is_tag_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b':' | b'_')
}

fn is_html_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\x0c' | b'\r')
}

fn is_js_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'$')
}

/// Index of `</name` (case-insensitive) closing a raw-text element
fn find_end_tag(s: &[u8], from: usize, name: &str) -> Option<usize> {
    let name = name.as_bytes();
    let mut k = from;
    while let Some(offset) = s[k..].windows(2).position(|w| w == b"</") {
        let start = k + offset;
        let name_start = start + 2;
        let name_end = name_start + name.len();
        if name_end <= s.len()
            && s[name_start..name_end].eq_ignore_ascii_case(name)
            && s.get(name_end).map_or(true, |b| !is_tag_name_byte(*b))
        {
            return Some(start);
        }
        k = name_start;
    }
    None
}

fn find_attr_end(s: &[u8], from: usize, delim: Delim) -> Option<usize> {
    let rest = &s[from..];
    let offset = match delim {
        Delim::None => None,
        Delim::DoubleQuote => rest.iter().position(|b| *b == b'"'),
        Delim::SingleQuote => rest.iter().position(|b| *b == b'\''),
        Delim::SpaceOrTagEnd => rest.iter().position(|b| is_html_space(*b) || *b == b'>'),
    };
    offset.map(|o| from + o)
}

/// Closing quote, skipping backslash escapes
fn find_unescaped(s: &[u8], from: usize, quote: u8) -> Option<usize> {
    let mut k = from;
    while k < s.len() {
        match s[k] {
            b'\\' => k += 2,
            b if b == quote => return Some(k),
            _ => k += 1,
        }
    }
    None
}

/// Closing `/` of a regexp literal, ignoring ones inside `[...]`
fn find_regexp_end(s: &[u8], from: usize) -> Option<usize> {
    let mut in_class = false;
    let mut k = from;
    while k < s.len() {
        match s[k] {
            b'\\' => {
                k += 2;
                continue;
            }
            b'[' => in_class = true,
            b']' => in_class = false,
            b'/' if !in_class => return Some(k),
            _ => {}
        }
        k += 1;
    }
    None
}

fn find_seq(s: &[u8], from: usize, seq: &[u8]) -> Option<usize> {
    s[from..]
        .windows(seq.len())
        .position(|w| w == seq)
        .map(|o| from + o)
}

const NAMED_ENTITIES: &[(&str, char)] = &[
    ("amp", '&'),
    ("apos", '\''),
    ("bsol", '\\'),
    ("colon", ':'),
    ("comma", ','),
    ("equals", '='),
    ("grave", '`'),
    ("gt", '>'),
    ("lpar", '('),
    ("lt", '<'),
    ("nbsp", '\u{a0}'),
    ("NewLine", '\n'),
    ("num", '#'),
    ("period", '.'),
    ("quest", '?'),
    ("quot", '"'),
    ("rpar", ')'),
    ("semi", ';'),
    ("sol", '/'),
    ("Tab", '\t'),
];

/// Character reference at the start of `s` (just after `&`) and its length
fn decode_reference(s: &[u8]) -> Option<(char, usize)> {
    if let Some(rest) = s.strip_prefix(b"#") {
        let (radix, digits_at) = match rest.first() {
            Some(b'x' | b'X') => (16, 2),
            _ => (10, 1),
        };
        let len = s[digits_at..]
            .iter()
            .take_while(|b| b.is_ascii_hexdigit() && (radix == 16 || b.is_ascii_digit()))
            .count();
        if len == 0 {
            return None;
        }
        let digits = std::str::from_utf8(&s[digits_at..digits_at + len]).ok()?;
        let c = u32::from_str_radix(digits, radix)
            .ok()
            .and_then(char::from_u32)
            .unwrap_or('\u{fffd}');
        let end = digits_at + len;
        let end = if s.get(end) == Some(&b';') { end + 1 } else { end };
        return Some((c, end));
    }
    let len = s.iter().take_while(|b| b.is_ascii_alphanumeric()).count();
    if s.get(len) != Some(&b';') {
        return None;
    }
    let name = std::str::from_utf8(&s[..len]).ok()?;
    NAMED_ENTITIES
        .iter()
        .find(|(entity, _)| *entity == name)
        .map(|(_, c)| (*c, len + 1))
}

/// Attribute value text as the browser hands it to the JS, CSS or URL parser
fn decode_entities(s: &[u8]) -> Cow<'_, [u8]> {
    if !s.contains(&b'&') {
        return Cow::Borrowed(s);
    }
    let mut out = Vec::with_capacity(s.len());
    let mut k = 0;
    while k < s.len() {
        if s[k] == b'&' {
            if let Some((c, len)) = decode_reference(&s[k + 1..]) {
                let mut buf = [0; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                k += 1 + len;
                continue;
            }
        }
        out.push(s[k]);
        k += 1;
    }
    Cow::Owned(out)
}

fn trim_end_space(s: &[u8]) -> &[u8] {
    let len = s.iter().rposition(|b| !is_html_space(*b)).map_or(0, |p| p + 1);
    &s[..len]
}

/// `s` ends with the CSS identifier `keyword`, case-insensitively
fn ends_with_css_keyword(s: &[u8], keyword: &[u8]) -> bool {
    if s.len() < keyword.len() {
        return false;
    }
    let start = s.len() - keyword.len();
    s[start..].eq_ignore_ascii_case(keyword)
        && (start == 0
            || !(s[start - 1].is_ascii_alphanumeric() || matches!(s[start - 1], b'-' | b'_')))
}

const REGEXP_PRECEDERS: &[&[u8]] = &[
    b"break",
    b"case",
    b"continue",
    b"delete",
    b"do",
    b"else",
    b"finally",
    b"in",
    b"instanceof",
    b"return",
    b"throw",
    b"try",
    b"typeof",
    b"void",
];

/// What a `/` following `segment` would start
fn next_js_ctx(segment: &[u8], previous: JsCtx) -> JsCtx {
    let end = segment
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|p| p + 1)
        .unwrap_or(0);
    let s = &segment[..end];
    let Some(&last) = s.last() else {
        return previous;
    };
    match last {
        b'+' | b'-' => {
            // `x++ /` divides, `x + /` starts a regexp
            let run = s.iter().rev().take_while(|b| **b == last).count();
            if run % 2 == 1 {
                JsCtx::Regexp
            } else {
                JsCtx::DivOp
            }
        }
        b'.' => {
            if s.len() >= 2 && s[s.len() - 2].is_ascii_digit() {
                JsCtx::DivOp
            } else {
                JsCtx::Regexp
            }
        }
        b',' | b'<' | b'>' | b'=' | b'*' | b'%' | b'&' | b'|' | b'^' | b'?' | b'!' | b'~'
        | b'(' | b'[' | b'{' | b'}' | b';' | b':' => JsCtx::Regexp,
        _ => {
            let word_start = s
                .iter()
                .rposition(|b| !is_js_ident_byte(*b))
                .map(|p| p + 1)
                .unwrap_or(0);
            if REGEXP_PRECEDERS.contains(&&s[word_start..]) {
                JsCtx::Regexp
            } else {
                JsCtx::DivOp
            }
        }
    }
}

impl Context {
    /// Context at the start of an HTML document
    pub fn text() -> Self {
        Self::default()
    }

    fn error(reason: &'static str) -> Self {
        Self {
            state: State::Error,
            error: Some(reason),
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.state == State::Error
    }

    /// Move the context across a run of literal text
    pub fn advance(&self, text: &str) -> Context {
        let mut ctx = self.clone();
        let s = text.as_bytes();
        let mut i = 0;
        while i < s.len() && !ctx.is_error() {
            i = ctx.step(s, i);
        }
        ctx
    }

    fn in_element_body(&self) -> bool {
        self.element != Element::None
            && self.delim == Delim::None
            && !matches!(
                self.state,
                State::Text
                    | State::TagName
                    | State::Tag
                    | State::AttrName
                    | State::AfterName
                    | State::BeforeValue
                    | State::HtmlCmt
                    | State::Error
            )
    }

    fn step(&mut self, s: &[u8], i: usize) -> usize {
        if self.delim != Delim::None {
            let end = find_attr_end(s, i, self.delim);
            let value = decode_entities(&s[i..end.unwrap_or(s.len())]);
            self.advance_inner(&value);
            return match end {
                None => s.len(),
                Some(end) => {
                    let unquoted = self.delim == Delim::SpaceOrTagEnd;
                    self.leave_attr();
                    if unquoted {
                        end
                    } else {
                        end + 1
                    }
                }
            };
        }

        if self.in_element_body() {
            let name = self.element.name();
            let end = find_end_tag(s, i, name);
            self.advance_inner(&s[i..end.unwrap_or(s.len())]);
            return match end {
                None => s.len(),
                Some(end) => {
                    *self = Context {
                        state: State::Tag,
                        end_tag: true,
                        ..Context::default()
                    };
                    end + 2 + name.len()
                }
            };
        }

        match self.state {
            State::Text => self.step_text(s, i),
            State::TagName => self.step_tag_name(s, i),
            State::Tag => self.step_tag(s, i),
            State::AttrName => self.step_attr_name(s, i),
            State::AfterName => self.step_after_name(s, i),
            State::BeforeValue => self.step_before_value(s, i),
            State::HtmlCmt => match find_seq(s, i, b"-->") {
                Some(end) => {
                    self.state = State::Text;
                    end + 3
                }
                None => s.len(),
            },
            _ => {
                self.advance_inner(&s[i..]);
                s.len()
            }
        }
    }

    fn step_text(&mut self, s: &[u8], i: usize) -> usize {
        let mut k = i;
        while let Some(offset) = s[k..].iter().position(|b| *b == b'<') {
            let lt = k + offset;
            if s[lt..].starts_with(b"<!--") {
                self.state = State::HtmlCmt;
                return lt + 4;
            }
            let (end_tag, name_start) = match s.get(lt + 1) {
                Some(b'/') => (true, lt + 2),
                _ => (false, lt + 1),
            };
            match s.get(name_start) {
                // text ends right after `<` or `</`
                None => {
                    self.start_tag(end_tag);
                    return s.len();
                }
                Some(b) if b.is_ascii_alphabetic() => {
                    self.start_tag(end_tag);
                    return name_start;
                }
                Some(_) => k = lt + 1,
            }
        }
        s.len()
    }

    fn start_tag(&mut self, end_tag: bool) {
        self.state = State::TagName;
        self.end_tag = end_tag;
        self.pending_name.clear();
    }

    fn step_tag_name(&mut self, s: &[u8], i: usize) -> usize {
        let len = s[i..].iter().take_while(|b| is_tag_name_byte(**b)).count();
        let end = i + len;
        self.pending_name
            .push_str(&String::from_utf8_lossy(&s[i..end]).to_ascii_lowercase());
        if end == s.len() {
            return end;
        }
        self.element = if self.end_tag {
            Element::None
        } else {
            Element::from_name(&self.pending_name)
        };
        self.pending_name.clear();
        self.state = State::Tag;
        end
    }

    fn step_tag(&mut self, s: &[u8], i: usize) -> usize {
        let k = i + s[i..]
            .iter()
            .take_while(|b| is_html_space(**b) || **b == b'/')
            .count();
        match s.get(k) {
            None => k,
            Some(b'>') => {
                self.close_tag();
                k + 1
            }
            Some(_) => {
                self.state = State::AttrName;
                self.pending_name.clear();
                k
            }
        }
    }

    fn close_tag(&mut self) {
        let element = if self.end_tag {
            Element::None
        } else {
            self.element
        };
        *self = Context {
            state: element.body_state(),
            element,
            ..Context::default()
        };
    }

    fn step_attr_name(&mut self, s: &[u8], i: usize) -> usize {
        let len = s[i..]
            .iter()
            .take_while(|b| !is_html_space(**b) && !matches!(**b, b'=' | b'>' | b'/'))
            .count();
        let end = i + len;
        self.pending_name
            .push_str(&String::from_utf8_lossy(&s[i..end]).to_ascii_lowercase());
        if end == s.len() {
            return end;
        }
        self.attr = AttrKind::from_name(&self.pending_name);
        self.pending_name.clear();
        self.state = State::AfterName;
        end
    }

    fn step_after_name(&mut self, s: &[u8], i: usize) -> usize {
        let k = i + s[i..].iter().take_while(|b| is_html_space(**b)).count();
        match s.get(k) {
            None => k,
            Some(b'=') => {
                self.state = State::BeforeValue;
                k + 1
            }
            Some(_) => {
                // attribute without a value
                self.state = State::Tag;
                self.attr = AttrKind::None;
                k
            }
        }
    }

    fn step_before_value(&mut self, s: &[u8], i: usize) -> usize {
        let k = i + s[i..].iter().take_while(|b| is_html_space(**b)).count();
        match s.get(k) {
            None => k,
            Some(b'>') => {
                self.state = State::Tag;
                self.attr = AttrKind::None;
                k
            }
            Some(b'"') => {
                self.enter_value(Delim::DoubleQuote);
                k + 1
            }
            Some(b'\'') => {
                self.enter_value(Delim::SingleQuote);
                k + 1
            }
            Some(_) => {
                self.enter_value(Delim::SpaceOrTagEnd);
                k
            }
        }
    }

    fn enter_value(&mut self, delim: Delim) {
        self.state = self.attr.value_state();
        self.delim = delim;
        self.url_part = UrlPart::None;
        self.js_ctx = JsCtx::Regexp;
    }

    fn leave_attr(&mut self) {
        self.state = State::Tag;
        self.delim = Delim::None;
        self.attr = AttrKind::None;
        self.url_part = UrlPart::None;
        self.js_ctx = JsCtx::Regexp;
    }

    /// Advance the states nested in an attribute value or element body
    fn advance_inner(&mut self, s: &[u8]) {
        let mut i = 0;
        while i < s.len() && !self.is_error() {
            i = self.step_inner(s, i);
        }
    }

    fn step_inner(&mut self, s: &[u8], i: usize) -> usize {
        match self.state {
            State::Url => {
                self.advance_url(&s[i..]);
                s.len()
            }
            State::Js => self.step_js(s, i),
            State::JsDqStr => self.close_js_quote(s, i, b'"'),
            State::JsSqStr => self.close_js_quote(s, i, b'\''),
            State::JsBqStr => self.close_js_quote(s, i, b'`'),
            State::JsRegexp => match find_regexp_end(s, i) {
                Some(end) => {
                    self.state = State::Js;
                    self.js_ctx = JsCtx::DivOp;
                    end + 1
                }
                None => s.len(),
            },
            State::JsLineCmt => match s[i..].iter().position(|b| *b == b'\n') {
                Some(offset) => {
                    self.state = State::Js;
                    i + offset + 1
                }
                None => s.len(),
            },
            State::JsBlockCmt => match find_seq(s, i, b"*/") {
                Some(end) => {
                    self.state = State::Js;
                    end + 2
                }
                None => s.len(),
            },
            State::Css => self.step_css(s, i),
            State::CssDqStr => self.close_css_quote(s, i, b'"'),
            State::CssSqStr => self.close_css_quote(s, i, b'\''),
            State::CssDqUrl => self.close_css_url(s, i, b'"'),
            State::CssSqUrl => self.close_css_url(s, i, b'\''),
            State::CssUrl => self.close_css_url(s, i, b')'),
            State::CssCmt => match find_seq(s, i, b"*/") {
                Some(end) => {
                    self.state = State::Css;
                    end + 2
                }
                None => s.len(),
            },
            _ => s.len(),
        }
    }

    fn step_js(&mut self, s: &[u8], i: usize) -> usize {
        let Some(offset) = s[i..]
            .iter()
            .position(|b| matches!(b, b'"' | b'\'' | b'`' | b'/'))
        else {
            self.js_ctx = next_js_ctx(&s[i..], self.js_ctx);
            return s.len();
        };
        let j = i + offset;
        self.js_ctx = next_js_ctx(&s[i..j], self.js_ctx);
        match s[j] {
            b'"' => self.state = State::JsDqStr,
            b'\'' => self.state = State::JsSqStr,
            b'`' => self.state = State::JsBqStr,
            _ => match s.get(j + 1) {
                Some(b'/') => {
                    self.state = State::JsLineCmt;
                    return j + 2;
                }
                Some(b'*') => {
                    self.state = State::JsBlockCmt;
                    return j + 2;
                }
                _ => match self.js_ctx {
                    JsCtx::Regexp => self.state = State::JsRegexp,
                    JsCtx::DivOp => self.js_ctx = JsCtx::Regexp,
                    JsCtx::Unknown => {
                        *self = Context::error("'/' could start a division or a regexp");
                        return s.len();
                    }
                },
            },
        }
        j + 1
    }

    fn close_js_quote(&mut self, s: &[u8], i: usize, quote: u8) -> usize {
        match find_unescaped(s, i, quote) {
            Some(end) => {
                self.state = State::Js;
                self.js_ctx = JsCtx::DivOp;
                end + 1
            }
            None => s.len(),
        }
    }

    fn advance_url(&mut self, rest: &[u8]) {
        if rest.iter().any(|b| *b == b'?' || *b == b'#') {
            self.url_part = UrlPart::QueryOrFrag;
        } else if self.url_part == UrlPart::None && rest.iter().any(|b| !b.is_ascii_whitespace())
        {
            self.url_part = UrlPart::PreQuery;
        }
    }

    fn step_css(&mut self, s: &[u8], i: usize) -> usize {
        let mut k = i;
        while k < s.len() {
            match s[k] {
                b'(' if ends_with_css_keyword(trim_end_space(&s[..k]), b"url") => {
                    let j = k + 1 + s[k + 1..]
                        .iter()
                        .take_while(|b| is_html_space(**b))
                        .count();
                    self.url_part = UrlPart::None;
                    return match s.get(j) {
                        Some(b'"') => {
                            self.state = State::CssDqUrl;
                            j + 1
                        }
                        Some(b'\'') => {
                            self.state = State::CssSqUrl;
                            j + 1
                        }
                        _ => {
                            self.state = State::CssUrl;
                            j
                        }
                    };
                }
                b'"' => {
                    self.state = State::CssDqStr;
                    return k + 1;
                }
                b'\'' => {
                    self.state = State::CssSqStr;
                    return k + 1;
                }
                b'/' if s.get(k + 1) == Some(&b'*') => {
                    self.state = State::CssCmt;
                    return k + 2;
                }
                _ => k += 1,
            }
        }
        s.len()
    }

    fn close_css_quote(&mut self, s: &[u8], i: usize, quote: u8) -> usize {
        match find_unescaped(s, i, quote) {
            Some(end) => {
                self.state = State::Css;
                end + 1
            }
            None => s.len(),
        }
    }

    fn close_css_url(&mut self, s: &[u8], i: usize, end: u8) -> usize {
        let stop = s[i..].iter().position(|b| *b == end).map(|o| i + o);
        self.advance_url(&s[i..stop.unwrap_or(s.len())]);
        match stop {
            Some(stop) => {
                self.state = State::Css;
                self.url_part = UrlPart::None;
                stop + 1
            }
            None => s.len(),
        }
    }

    /// Context an output action actually lands in: a value right after `=`
    /// starts an unquoted attribute value.
    pub fn nudge(&self) -> Context {
        let mut ctx = self.clone();
        match self.state {
            State::BeforeValue => ctx.enter_value(Delim::SpaceOrTagEnd),
            State::AfterName => {
                ctx.state = State::Tag;
                ctx.attr = AttrKind::None;
            }
            _ => {}
        }
        ctx
    }

    /// Context after an output action has written a value
    pub fn after_output(&self) -> Context {
        let mut ctx = self.clone();
        if ctx.state == State::Js {
            ctx.js_ctx = JsCtx::DivOp;
        }
        ctx
    }

    /// Escapers for an output action in this (nudged) context, innermost first
    pub fn escapers(&self) -> Result<Vec<Escaper>, String> {
        let mut escapers = match self.state {
            State::Text | State::Rcdata => vec![Escaper::HtmlText],
            State::Attr => Vec::new(),
            State::Url | State::CssDqUrl | State::CssSqUrl | State::CssUrl => self.url_escapers()?,
            State::Js => vec![Escaper::JsValue],
            State::JsDqStr | State::JsSqStr | State::JsBqStr => vec![Escaper::JsString],
            State::JsRegexp => vec![Escaper::JsRegexp],
            State::Css => vec![Escaper::CssValue],
            State::CssDqStr | State::CssSqStr => vec![Escaper::CssString],
            State::HtmlCmt | State::JsLineCmt | State::JsBlockCmt | State::CssCmt => {
                return Ok(vec![Escaper::Comment])
            }
            State::TagName => return Err("action in a tag name".to_string()),
            State::Tag | State::AttrName | State::AfterName | State::BeforeValue => {
                return Err("action in an attribute name or between attributes".to_string())
            }
            State::Error => {
                return Err(self.error.unwrap_or("action in an unknown context").to_string())
            }
        };
        match self.delim {
            Delim::None => {}
            Delim::SpaceOrTagEnd => escapers.push(Escaper::HtmlAttrUnquoted),
            Delim::DoubleQuote | Delim::SingleQuote => escapers.push(Escaper::HtmlAttr),
        }
        Ok(escapers)
    }

    fn url_escapers(&self) -> Result<Vec<Escaper>, String> {
        match self.url_part {
            UrlPart::None => Ok(vec![Escaper::UrlFilter, Escaper::UrlNormalize]),
            UrlPart::PreQuery => Ok(vec![Escaper::UrlNormalize]),
            UrlPart::QueryOrFrag => Ok(vec![Escaper::UrlQuery]),
            UrlPart::Unknown => Err("cannot tell which part of a URL the action is in".to_string()),
        }
    }

    /// Context after two control-flow paths meet, if they can be reconciled
    pub fn join(a: &Context, b: &Context) -> Option<Context> {
        if a.is_error() {
            return Some(a.clone());
        }
        if b.is_error() {
            return Some(b.clone());
        }
        if a == b {
            return Some(a.clone());
        }

        let mut c = a.clone();
        c.url_part = b.url_part;
        if c == *b {
            c.url_part = UrlPart::Unknown;
            return Some(c);
        }

        let mut c = a.clone();
        c.js_ctx = b.js_ctx;
        if c == *b {
            c.js_ctx = JsCtx::Unknown;
            return Some(c);
        }

        // `<a href={{if .X}}{{.X}}{{end}}>`: one side already entered the value
        let (na, nb) = (a.nudge(), b.nudge());
        if na != *a || nb != *b {
            return Context::join(&na, &nb);
        }
        None
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{:?}", self.state)?;
        if self.delim != Delim::None {
            write!(f, " delim={:?}", self.delim)?;
        }
        if self.attr != AttrKind::None {
            write!(f, " attr={:?}", self.attr)?;
        }
        if self.element != Element::None {
            write!(f, " element={:?}", self.element)?;
        }
        if self.url_part != UrlPart::None {
            write!(f, " url={:?}", self.url_part)?;
        }
        if self.js_ctx != JsCtx::Regexp {
            write!(f, " js={:?}", self.js_ctx)?;
        }
        if !self.pending_name.is_empty() {
            write!(f, " name={:?}", self.pending_name)?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn after(text: &str) -> Context {
        Context::text().advance(text)
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(after("Hello, world! 1 < 2"), Context::text());
        assert_eq!(after("<p class=\"x\">body</p>"), Context::text());
        assert_eq!(after("<!DOCTYPE html><html>"), Context::text());
    }

    #[test]
    fn test_quoted_url_attribute() {
        let ctx = after("<a href=\"");
        assert_eq!(ctx.state, State::Url);
        assert_eq!(ctx.delim, Delim::DoubleQuote);
        assert_eq!(ctx.url_part, UrlPart::None);

        let ctx = after("<a href='/search?q=");
        assert_eq!(ctx.delim, Delim::SingleQuote);
        assert_eq!(ctx.url_part, UrlPart::QueryOrFrag);

        let ctx = after("<a href=\"/users/");
        assert_eq!(ctx.url_part, UrlPart::PreQuery);
    }

    #[test]
    fn test_unquoted_attribute_ends_at_space() {
        let ctx = after("<input value=");
        assert_eq!(ctx.state, State::BeforeValue);
        let ctx = ctx.nudge();
        assert_eq!(ctx.state, State::Attr);
        assert_eq!(ctx.delim, Delim::SpaceOrTagEnd);
        assert_eq!(ctx.advance(" checked>"), Context::text());
    }

    #[test]
    fn test_tag_states() {
        assert_eq!(after("<di").state, State::TagName);
        assert_eq!(after("<div ").state, State::Tag);
        assert_eq!(after("<div cla").state, State::AttrName);
        assert_eq!(after("<div class").state, State::AttrName);
        assert_eq!(after("<div class ").state, State::AfterName);
    }

    #[test]
    fn test_script_element() {
        let ctx = after("<script>var x = ");
        assert_eq!(ctx.state, State::Js);
        assert_eq!(ctx.element, Element::Script);
        assert_eq!(ctx.js_ctx, JsCtx::Regexp);

        assert_eq!(after("<script>var s = \"").state, State::JsDqStr);
        assert_eq!(after("<script>var s = 'a").state, State::JsSqStr);
        assert_eq!(after("<script>var s = `").state, State::JsBqStr);
        assert_eq!(after("<script>var r = /").state, State::JsRegexp);
        assert_eq!(after("<script>x = a / ").js_ctx, JsCtx::Regexp);
        assert_eq!(after("<script>// note").state, State::JsLineCmt);
        assert_eq!(after("<script>/* note").state, State::JsBlockCmt);
        assert_eq!(after("<script>var s = \"</script>"), Context::text());
        assert_eq!(after("<script>x = 1;</SCRIPT >"), Context::text());
    }

    #[test]
    fn test_js_slash_ambiguity() {
        assert_eq!(next_js_ctx(b"x = a", JsCtx::Regexp), JsCtx::DivOp);
        assert_eq!(next_js_ctx(b"return", JsCtx::DivOp), JsCtx::Regexp);
        assert_eq!(next_js_ctx(b"x++", JsCtx::Regexp), JsCtx::DivOp);
        assert_eq!(next_js_ctx(b"x +", JsCtx::DivOp), JsCtx::Regexp);
        assert_eq!(next_js_ctx(b"  ", JsCtx::DivOp), JsCtx::DivOp);

        let unknown = Context {
            state: State::Js,
            element: Element::Script,
            js_ctx: JsCtx::Unknown,
            ..Context::default()
        };
        assert!(unknown.advance("/").is_error());
    }

    #[test]
    fn test_event_handler_attribute() {
        let ctx = after("<button onclick=\"go(");
        assert_eq!(ctx.state, State::Js);
        assert_eq!(ctx.attr, AttrKind::Script);
        assert_eq!(ctx.delim, Delim::DoubleQuote);
        assert_eq!(ctx.advance(")\">"), Context::text());
    }

    #[test]
    fn test_style_element_and_attribute() {
        let ctx = after("<style>p { color: ");
        assert_eq!(ctx.state, State::Css);
        assert_eq!(after("<style>p { font-family: \"").state, State::CssDqStr);
        assert_eq!(after("<style>/* c").state, State::CssCmt);
        assert_eq!(after("<style>p{}</style>"), Context::text());

        let ctx = after("<p style=\"color: ");
        assert_eq!(ctx.state, State::Css);
        assert_eq!(ctx.attr, AttrKind::Style);
    }

    #[test]
    fn test_css_url() {
        let ctx = after("<style>p { background: url('");
        assert_eq!(ctx.state, State::CssSqUrl);
        assert_eq!(ctx.url_part, UrlPart::None);
        assert_eq!(after("<style>p { background: URL( \"").state, State::CssDqUrl);
        assert_eq!(after("<style>p { background: url(").state, State::CssUrl);
        assert_eq!(after("<style>p { background: url(/img?").url_part, UrlPart::QueryOrFrag);
        assert_eq!(after("<style>p { background: url(/a.png) ").state, State::Css);
        assert_eq!(after("<style>p { background: url('/a.png') }").state, State::Css);
        assert_eq!(after("<style>p { x: myurl(").state, State::Css);

        let ctx = after("<p style=\"background: url(");
        assert_eq!(ctx.state, State::CssUrl);
        assert_eq!(ctx.delim, Delim::DoubleQuote);
    }

    #[test]
    fn test_attribute_value_entities_are_decoded() {
        // `&quot;` closes the JS string it opened
        let ctx = after("<button onclick='f(\"&quot;");
        assert_eq!(ctx.state, State::Js);
        assert_eq!(after("<button onclick=\"f(&#39;").state, State::JsSqStr);
        assert_eq!(after("<button onclick=\"f(&#x27;x&#x27;, ").state, State::Js);
        assert_eq!(after("<p style=\"content: &quot;").state, State::CssDqStr);
        assert_eq!(after("<a href=\"/p&#63;q=").url_part, UrlPart::QueryOrFrag);
        assert_eq!(after("<a href=\"/p&amp;q=&unknown;").url_part, UrlPart::PreQuery);
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(&*decode_entities(b"a&lt;b&gt;&amp;"), b"a<b>&");
        assert_eq!(&*decode_entities(b"&#34;&#x22;&quot;&apos;"), b"\"\"\"'");
        assert_eq!(&*decode_entities(b"&#58x"), b":x");
        assert_eq!(&*decode_entities(b"&nope; & &#;"), b"&nope; & &#;");
        assert!(matches!(decode_entities(b"plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_rcdata() {
        let ctx = after("<title>");
        assert_eq!(ctx.state, State::Rcdata);
        assert_eq!(ctx.advance("<b>not a tag</b>").state, State::Rcdata);
        assert_eq!(ctx.advance("x</title>"), Context::text());
    }

    #[test]
    fn test_html_comment() {
        assert_eq!(after("<!-- note").state, State::HtmlCmt);
        assert_eq!(after("<!-- <a href=\" -->"), Context::text());
    }

    #[test]
    fn test_attr_kind() {
        assert_eq!(AttrKind::from_name("href"), AttrKind::Url);
        assert_eq!(AttrKind::from_name("data-src"), AttrKind::Url);
        assert_eq!(AttrKind::from_name("xlink:href"), AttrKind::Url);
        assert_eq!(AttrKind::from_name("imageurl"), AttrKind::Url);
        assert_eq!(AttrKind::from_name("onload"), AttrKind::Script);
        assert_eq!(AttrKind::from_name("style"), AttrKind::Style);
        assert_eq!(AttrKind::from_name("title"), AttrKind::Plain);
    }

    #[test]
    fn test_escapers() {
        assert_eq!(Context::text().escapers(), Ok(vec![Escaper::HtmlText]));
        assert_eq!(
            after("<a href=\"").escapers(),
            Ok(vec![
                Escaper::UrlFilter,
                Escaper::UrlNormalize,
                Escaper::HtmlAttr
            ])
        );
        assert_eq!(
            after("<a href=\"/p?q=").escapers(),
            Ok(vec![Escaper::UrlQuery, Escaper::HtmlAttr])
        );
        assert_eq!(
            after("<input value=").nudge().escapers(),
            Ok(vec![Escaper::HtmlAttrUnquoted])
        );
        assert_eq!(
            after("<script>var x = ").escapers(),
            Ok(vec![Escaper::JsValue])
        );
        assert_eq!(
            after("<a onclick='f(\"").escapers(),
            Ok(vec![Escaper::JsString, Escaper::HtmlAttr])
        );
        assert_eq!(
            after("<style>p { background: url('").escapers(),
            Ok(vec![Escaper::UrlFilter, Escaper::UrlNormalize])
        );
        assert_eq!(
            after("<p style='background: url(/i?s=").escapers(),
            Ok(vec![Escaper::UrlQuery, Escaper::HtmlAttr])
        );
        assert_eq!(after("<!-- ").escapers(), Ok(vec![Escaper::Comment]));
        assert!(after("<").escapers().is_err());
        assert!(after("<div ").escapers().is_err());
    }

    #[test]
    fn test_join() {
        let a = after("<a href=\"");
        let b = after("<a href=\"/x");
        let joined = Context::join(&a, &b).unwrap();
        assert_eq!(joined.url_part, UrlPart::Unknown);
        assert!(joined.escapers().is_err());

        let js = after("<script>");
        let div = js.advance("x");
        assert_eq!(Context::join(&js, &div).unwrap().js_ctx, JsCtx::Unknown);

        assert_eq!(Context::join(&Context::text(), &a), None);

        let before = after("<a href=");
        let entered = before.nudge().advance("x");
        assert!(Context::join(&before, &entered).is_some());
    }
}
