//! Output escapers, one per markup context.
//!
//! An output action carries a list of escapers chosen by the context
//! analyzer; [`apply`] runs them innermost-first over the printed value.

use std::fmt;

use crate::value::Value;

/// Replacement for URLs whose scheme is not allowed
pub const FILTERED_URL: &str = "#ZgotmplZ";
/// Replacement for unsafe CSS values and empty unquoted attribute values
pub const FILTERED_VALUE: &str = "ZgotmplZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Escaper {
    HtmlText,
    HtmlAttr,
    HtmlAttrUnquoted,
    UrlFilter,
    UrlNormalize,
    UrlQuery,
    JsValue,
    JsString,
    JsRegexp,
    CssValue,
    CssString,
    Comment,
    Verbatim,
}

impl Escaper {
    pub fn name(&self) -> &'static str {
        match self {
            Escaper::HtmlText => "html_text",
            Escaper::HtmlAttr => "html_attr",
            Escaper::HtmlAttrUnquoted => "html_attr_unquoted",
            Escaper::UrlFilter => "url_filter",
            Escaper::UrlNormalize => "url_normalize",
            Escaper::UrlQuery => "url_query",
            Escaper::JsValue => "js_value",
            Escaper::JsString => "js_string",
            Escaper::JsRegexp => "js_regexp",
            Escaper::CssValue => "css_value",
            Escaper::CssString => "css_string",
            Escaper::Comment => "comment",
            Escaper::Verbatim => "verbatim",
        }
    }

    /// Escape a raw value; only `JsValue` looks at more than the printed form
    pub fn escape_value(&self, value: &Value) -> String {
        match self {
            Escaper::JsValue => js_value(value),
            _ => self.escape_str(&value.to_string()),
        }
    }

    /// Escape already-printed text
    pub fn escape_str(&self, input: &str) -> String {
        match self {
            Escaper::HtmlText => html(input),
            Escaper::HtmlAttr => html_attr(input),
            Escaper::HtmlAttrUnquoted => html_attr_unquoted(input),
            Escaper::UrlFilter => url_filter(input),
            Escaper::UrlNormalize => url_normalize(input),
            Escaper::UrlQuery => url_query(input),
            Escaper::JsValue => js_value(&Value::String(input.to_string())),
            Escaper::JsString => js_string(input),
            Escaper::JsRegexp => js_regexp(input),
            Escaper::CssValue => css_value(input),
            Escaper::CssString => css_string(input),
            Escaper::Comment => String::new(),
            Escaper::Verbatim => input.to_string(),
        }
    }
}

impl fmt::Display for Escaper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Run `escapers` over `value`, innermost first
pub fn apply(escapers: &[Escaper], value: &Value) -> String {
    let Some((first, rest)) = escapers.split_first() else {
        return value.to_string();
    };
    let mut output = first.escape_value(value);
    for escaper in rest {
        output = escaper.escape_str(&output);
    }
    output
}

fn replace_chars(input: &str, replacement: impl Fn(char) -> Option<&'static str>) -> String {
    let mut output = String::with_capacity(input.len());
    for c in input.chars() {
        match replacement(c) {
            Some(r) => output.push_str(r),
            None => output.push(c),
        }
    }
    output
}

fn html_replacement(c: char) -> Option<&'static str> {
    match c {
        '&' => Some("&amp;"),
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        '"' => Some("&quot;"),
        '\'' => Some("&#39;"),
        '\0' => Some("\u{FFFD}"),
        _ => None,
    }
}

/// Escape HTML special characters: & < > " '
pub fn html(input: &str) -> String {
    replace_chars(input, html_replacement)
}

/// Escape for a quoted attribute value
pub fn html_attr(input: &str) -> String {
    replace_chars(input, |c| match c {
        '+' => Some("&#43;"),
        _ => html_replacement(c),
    })
}

/// Escape for an unquoted attribute value; whitespace and `=` would end or split it
pub fn html_attr_unquoted(input: &str) -> String {
    if input.is_empty() {
        return FILTERED_VALUE.to_string();
    }
    replace_chars(input, |c| match c {
        '\t' => Some("&#9;"),
        '\n' => Some("&#10;"),
        '\x0c' => Some("&#12;"),
        '\r' => Some("&#13;"),
        ' ' => Some("&#32;"),
        '+' => Some("&#43;"),
        '=' => Some("&#61;"),
        '`' => Some("&#96;"),
        _ => html_replacement(c),
    })
}

/// Replace URLs with a scheme other than http, https or mailto
pub fn url_filter(input: &str) -> String {
    if let Some(colon) = input.find(':') {
        let scheme = &input[..colon];
        if !scheme.contains(&['/', '?', '#'][..]) {
            let scheme = scheme.trim().to_ascii_lowercase();
            if !matches!(scheme.as_str(), "http" | "https" | "mailto") {
                return FILTERED_URL.to_string();
            }
        }
    }
    input.to_string()
}

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

fn percent_encode(input: &str, keep: impl Fn(u8) -> bool) -> String {
    let mut output = String::with_capacity(input.len());
    for &b in input.as_bytes() {
        if keep(b) {
            output.push(b as char);
        } else {
            output.push_str(&format!("%{:02X}", b));
        }
    }
    output
}

/// Percent-encode what cannot appear in a URL, keeping its structure and existing escapes
pub fn url_normalize(input: &str) -> String {
    percent_encode(input, |b| {
        is_unreserved(b)
            || matches!(
                b,
                b'!' | b'#'
                    | b'$'
                    | b'%'
                    | b'&'
                    | b'*'
                    | b'+'
                    | b','
                    | b'/'
                    | b':'
                    | b';'
                    | b'='
                    | b'?'
                    | b'@'
                    | b'['
                    | b']'
            )
    })
}

/// Percent-encode everything but unreserved characters (query values, `urlquery`)
pub fn url_query(input: &str) -> String {
    percent_encode(input, is_unreserved)
}

fn js_string_replacement(c: char) -> Option<&'static str> {
    match c {
        '\0' => Some("\\u0000"),
        '\t' => Some("\\t"),
        '\n' => Some("\\n"),
        '\x0b' => Some("\\u000b"),
        '\x0c' => Some("\\f"),
        '\r' => Some("\\r"),
        '"' => Some("\\u0022"),
        '$' => Some("\\u0024"),
        '&' => Some("\\u0026"),
        '\'' => Some("\\u0027"),
        '+' => Some("\\u002b"),
        '/' => Some("\\/"),
        '<' => Some("\\u003c"),
        '=' => Some("\\u003d"),
        '>' => Some("\\u003e"),
        '\\' => Some("\\\\"),
        '`' => Some("\\u0060"),
        '\u{2028}' => Some("\\u2028"),
        '\u{2029}' => Some("\\u2029"),
        _ => None,
    }
}

fn push_js_char(output: &mut String, c: char, replacement: Option<&'static str>) {
    match replacement {
        Some(r) => output.push_str(r),
        None if (c as u32) < 0x20 => output.push_str(&format!("\\u{:04x}", c as u32)),
        None => output.push(c),
    }
}

/// Escape for the inside of a JS string literal (any quote style); also the `js` builtin
pub fn js_string(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    for c in input.chars() {
        push_js_char(&mut output, c, js_string_replacement(c));
    }
    output
}

/// Escape for the inside of a JS regexp literal
pub fn js_regexp(input: &str) -> String {
    if input.is_empty() {
        // `//` would start a line comment
        return "(?:)".to_string();
    }
    let mut output = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '$' | '(' | ')' | '*' | '+' | '-' | '.' | '?' | '[' | ']' | '^' | '{' | '|' | '}' => {
                output.push('\\');
                output.push(c);
            }
            _ => push_js_char(&mut output, c, js_string_replacement(c)),
        }
    }
    output
}

fn is_js_ident_part(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Render a value as a JS expression: strings quoted, everything else as JSON
pub fn js_value(value: &Value) -> String {
    let literal = match value {
        Value::String(s) => return format!("\"{}\"", js_string(s)),
        Value::Float(f) if !f.is_finite() => "null".to_string(),
        other => other.to_json().to_string(),
    };
    // JSON strings nested in arrays/objects may still carry markup characters
    let literal = replace_chars(&literal, |c| match c {
        '<' => Some("\\u003c"),
        '>' => Some("\\u003e"),
        '&' => Some("\\u0026"),
        '\'' => Some("\\u0027"),
        '\u{2028}' => Some("\\u2028"),
        '\u{2029}' => Some("\\u2029"),
        _ => None,
    });
    let first = literal.chars().next();
    let last = literal.chars().last();
    if first.map_or(false, is_js_ident_part) || last.map_or(false, is_js_ident_part) {
        // keep `x-{{.}}` from gluing into `x--1` or an identifier
        format!(" {} ", literal)
    } else {
        literal
    }
}

/// Pass a CSS value through, or replace it when it could break out of the value
pub fn css_value(input: &str) -> String {
    let forbidden = input.chars().any(|c| {
        matches!(
            c,
            '\0' | '"'
                | '\''
                | '('
                | ')'
                | '/'
                | ';'
                | '@'
                | '['
                | '\\'
                | ']'
                | '`'
                | '{'
                | '}'
                | '<'
                | '>'
                | '\n'
                | '\r'
                | '\x0c'
        )
    });
    let folded: String = input
        .chars()
        .filter(|c| *c != '-')
        .flat_map(char::to_lowercase)
        .collect();
    if forbidden
        || input.contains("--")
        || folded.contains("expression")
        || folded.contains("mozbinding")
    {
        return FILTERED_VALUE.to_string();
    }
    input.to_string()
}

/// Escape for the inside of a CSS string with hex escapes
pub fn css_string(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        let needs_escape = matches!(
            c,
            '\0' | '\t'
                | '\n'
                | '\x0c'
                | '\r'
                | '"'
                | '&'
                | '\''
                | '('
                | ')'
                | '+'
                | '/'
                | ':'
                | ';'
                | '<'
                | '>'
                | '\\'
                | '{'
                | '}'
        );
        if !needs_escape {
            output.push(c);
            continue;
        }
        output.push_str(&format!("\\{:x}", c as u32));
        // a following hex digit or space would be read as part of the escape
        if chars
            .peek()
            .map_or(false, |next| next.is_ascii_hexdigit() || *next == ' ')
        {
            output.push(' ');
        }
    }
    output
}
