//! Integration tests for `define`, `block` and `template`.

use akizora::{compile, compile_with, Config, Error, ExecutionErrorKind, TemplateSet};
use pretty_assertions::assert_eq;
use serde_json::json;

// ============================================================================
// Basic include
// ============================================================================

#[test]
fn include_with_data() {
    let program = compile(
        "page",
        "{{define \"greeting\"}}Hello, {{.}}!{{end}}{{template \"greeting\" .User.Name}}",
    )
    .unwrap();
    let result = program
        .render_json(json!({"User": {"Name": "Alice"}}))
        .unwrap();
    assert_eq!(result, "Hello, Alice!");
}

#[test]
fn include_without_data_gets_null_dot() {
    let result = akizora::render("{{define \"d\"}}[{{.}}]{{end}}{{template \"d\"}}", json!("x"))
        .unwrap();
    assert_eq!(result, "[]");
}

#[test]
fn block_renders_its_default_body() {
    let result = akizora::render(
        "<title>{{block \"title\" .}}Default {{.}}{{end}}</title>",
        json!("page"),
    )
    .unwrap();
    assert_eq!(result, "<title>Default page</title>");
}

#[test]
fn include_undefined_template() {
    let err = compile("page", "a{{template \"missing\" .}}b").unwrap_err();
    match err {
        Error::UndefinedTemplate { name, location } => {
            assert_eq!(name, "missing");
            assert_eq!(location.line, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

// ============================================================================
// Context specialisation
// ============================================================================

#[test]
fn same_template_escaped_per_call_site() {
    let program = compile(
        "page",
        "{{define \"v\"}}{{.}}{{end}}<p>{{template \"v\" .}}</p><a href=\"{{template \"v\" .}}\">",
    )
    .unwrap();
    assert_eq!(program.units().len(), 3);

    let result = program.render_json(json!("a b<")).unwrap();
    assert_eq!(result, "<p>a b&lt;</p><a href=\"a%20b%3C\">");
}

#[test]
fn include_inside_script() {
    let result = akizora::render(
        "{{define \"val\"}}{{.}}{{end}}<script>var x = {{template \"val\" .}};</script>",
        json!("s"),
    )
    .unwrap();
    assert_eq!(result, "<script>var x = \"s\";</script>");
}

#[test]
fn specialisations_are_shared() {
    let program = compile(
        "page",
        "{{define \"v\"}}<b>{{.}}</b>{{end}}{{template \"v\" .A}}{{template \"v\" .B}}",
    )
    .unwrap();
    assert_eq!(program.units().len(), 2);
    let result = program.render_json(json!({"A": 1, "B": "<"})).unwrap();
    assert_eq!(result, "<b>1</b><b>&lt;</b>");
}

// ============================================================================
// Recursion
// ============================================================================

#[test]
fn recursive_tree() {
    let source = "{{define \"tree\"}}<li>{{.Name}}{{if .Children}}<ul>\
                  {{range .Children}}{{template \"tree\" .}}{{end}}</ul>{{end}}</li>{{end}}\
                  <ul>{{template \"tree\" .}}</ul>";
    let data = json!({
        "Name": "root",
        "Children": [
            {"Name": "a", "Children": []},
            {"Name": "b", "Children": []}
        ]
    });
    let result = akizora::render(source, data).unwrap();
    assert_eq!(result, "<ul><li>root<ul><li>a</li><li>b</li></ul></li></ul>");
}

#[test]
fn recursive_template_must_keep_its_context() {
    let err = compile(
        "page",
        "{{define \"r\"}}{{template \"r\" .}}<a title=\"{{end}}{{template \"r\" .}}",
    )
    .unwrap_err();
    assert!(matches!(err, Error::AmbiguousContext { .. }), "{err}");
}

#[test]
fn recursive_include_inside_a_tag_is_rejected() {
    let err = compile(
        "t",
        "{{define \"r\"}}<a{{template \"r\"}}{{end}}{{template \"r\"}}",
    )
    .unwrap_err();
    assert!(matches!(err, Error::AmbiguousContext { .. }), "{err}");
}

#[test]
fn unbounded_recursion_hits_depth_limit() {
    let config = Config::default().with_max_include_depth(3);
    let program = compile_with(
        "page",
        "{{define \"loop\"}}{{template \"loop\" .}}{{end}}{{template \"loop\" .}}",
        &config,
    )
    .unwrap();
    let err = program.render_json(json!({})).unwrap_err();
    assert_eq!(
        err.execution_kind(),
        Some(ExecutionErrorKind::IncludeDepthExceeded)
    );
}

// ============================================================================
// Template sets
// ============================================================================

#[test]
fn template_set_across_sources() {
    let mut set = TemplateSet::new(Config::default());
    set.add(
        "layout",
        "<html><body>{{template \"content\" .}}</body></html>",
    )
    .unwrap();
    set.add("content", "<h1>{{.Title}}</h1>").unwrap();

    let program = set.compile("layout").unwrap();
    let result = program.render_json(json!({"Title": "A & B"})).unwrap();
    assert_eq!(result, "<html><body><h1>A &amp; B</h1></body></html>");
}

#[test]
fn template_set_unknown_entry() {
    let set = TemplateSet::new(Config::default());
    assert!(matches!(
        set.compile("nothing"),
        Err(Error::UndefinedTemplate { .. })
    ));
}
