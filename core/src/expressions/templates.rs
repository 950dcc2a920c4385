//! Template engines
//!
//! `mustache` supports interpolation (escaped `{{ x }}`, raw `{{{ x }}}` /
//! `{{& x }}`), comments, sections (`{{#x}}`) and inverted sections (`{{^x}}`).
//! Partials and delimiter changes are rejected since templates have no partial
//! source. `nunjucks` is rendered with minijinja, which supports the full set
//! of control expressions.

use serde::{Deserialize, Serialize};

use super::path::VarPath;
use crate::types::{JsonObject, JsonValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateEngine {
    Mustache,
    Nunjucks,
}

impl TemplateEngine {
    pub fn from_tag(tag: &str) -> Option<TemplateEngine> {
        match tag {
            "mustache" => Some(TemplateEngine::Mustache),
            "nunjucks" => Some(TemplateEngine::Nunjucks),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            TemplateEngine::Mustache => "mustache",
            TemplateEngine::Nunjucks => "nunjucks",
        }
    }
}

/// Render `source` against `context`. Errors are plain messages; callers
/// attribute them to a brick and field.
pub fn render(engine: TemplateEngine, source: &str, context: &JsonValue) -> Result<String, String> {
    match engine {
        TemplateEngine::Mustache => render_mustache(source, context),
        TemplateEngine::Nunjucks => render_nunjucks(source, context),
    }
}

/* ===================== Mustache ===================== */

#[derive(Debug)]
enum Node {
    Text(String),
    Variable { name: String, raw: bool },
    Section { name: String, inverted: bool, children: Vec<Node> },
}

fn render_mustache(source: &str, context: &JsonValue) -> Result<String, String> {
    let nodes = parse_mustache(source)?;
    let mut out = String::with_capacity(source.len());
    let mut stack = vec![context];
    render_nodes(&nodes, &mut stack, &mut out)?;
    Ok(out)
}

fn parse_mustache(source: &str) -> Result<Vec<Node>, String> {
    // Open sections: (name, inverted, nodes collected before the section)
    let mut open: Vec<(String, bool, Vec<Node>)> = Vec::new();
    let mut nodes = Vec::new();
    let mut rest = source;

    while let Some(start) = rest.find("{{") {
        if start > 0 {
            nodes.push(Node::Text(rest[..start].to_string()));
        }
        let position = source.len() - rest.len() + start;
        let after = &rest[start + 2..];

        let (tag, raw, consumed) = if let Some(inner) = after.strip_prefix('{') {
            let close = inner
                .find("}}}")
                .ok_or_else(|| format!("unclosed tag at position {position}"))?;
            (&inner[..close], true, close + 4)
        } else {
            let close = after
                .find("}}")
                .ok_or_else(|| format!("unclosed tag at position {position}"))?;
            let tag = after[..close].trim();
            match tag.strip_prefix('&') {
                Some(name) => (name, true, close + 2),
                None => (tag, false, close + 2),
            }
        };
        rest = &after[consumed..];

        let tag = tag.trim();
        match tag.chars().next() {
            Some('!') => {}
            Some(c @ ('#' | '^')) => {
                let name = tag[1..].trim().to_string();
                if name.is_empty() {
                    return Err(format!("empty section name at position {position}"));
                }
                open.push((name, c == '^', std::mem::take(&mut nodes)));
            }
            Some('/') => {
                let name = tag[1..].trim();
                let (open_name, inverted, parent) = open
                    .pop()
                    .ok_or_else(|| format!("unopened section `{name}` at position {position}"))?;
                if open_name != name {
                    return Err(format!("section `{open_name}` closed by `{name}`"));
                }
                let children = std::mem::replace(&mut nodes, parent);
                nodes.push(Node::Section {
                    name: open_name,
                    inverted,
                    children,
                });
            }
            Some(c @ ('>' | '=')) => {
                return Err(format!("unsupported mustache tag `{c}`"));
            }
            None => return Err("empty tag".to_string()),
            Some(_) => nodes.push(Node::Variable {
                name: tag.to_string(),
                raw,
            }),
        }
    }

    if let Some((name, _, _)) = open.last() {
        return Err(format!("unclosed section `{name}`"));
    }
    if !rest.is_empty() {
        nodes.push(Node::Text(rest.to_string()));
    }
    Ok(nodes)
}

fn render_nodes<'a>(nodes: &[Node], stack: &mut Vec<&'a JsonValue>, out: &mut String) -> Result<(), String> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Variable { name, raw } => {
                let text = resolve(name, stack)?.map(display_value).unwrap_or_default();
                if *raw {
                    out.push_str(&text);
                } else {
                    out.push_str(&escape_html(&text));
                }
            }
            Node::Section {
                name,
                inverted: true,
                children,
            } => {
                if !resolve(name, stack)?.is_some_and(is_truthy) {
                    render_nodes(children, stack, out)?;
                }
            }
            Node::Section { name, children, .. } => match resolve(name, stack)? {
                Some(JsonValue::Array(items)) => {
                    for item in items {
                        stack.push(item);
                        render_nodes(children, stack, out)?;
                        stack.pop();
                    }
                }
                Some(value) if is_truthy(value) => {
                    stack.push(value);
                    render_nodes(children, stack, out)?;
                    stack.pop();
                }
                _ => {}
            },
        }
    }
    Ok(())
}

/// Resolve a tag name against the context stack, innermost first. `.` is the
/// current item.
fn resolve<'a>(name: &str, stack: &[&'a JsonValue]) -> Result<Option<&'a JsonValue>, String> {
    if name == "." {
        return Ok(stack.last().copied());
    }
    let path = VarPath::parse(name).map_err(|e| e.to_string())?;
    let frame = stack
        .iter()
        .rev()
        .copied()
        .find(|frame| matches!(frame, JsonValue::Object(map) if map.contains_key(path.root())));
    Ok(frame.and_then(|frame| path.lookup(frame)))
}

fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null | JsonValue::Bool(false) => false,
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Number(n) => n.as_f64() != Some(0.0),
        _ => true,
    }
}

fn display_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            '/' => escaped.push_str("&#x2F;"),
            '`' => escaped.push_str("&#x60;"),
            '=' => escaped.push_str("&#x3D;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/* ===================== Nunjucks ===================== */

fn render_nunjucks(source: &str, context: &JsonValue) -> Result<String, String> {
    let env = minijinja::Environment::new();
    let source = strip_variable_sigils(source);
    let context = strip_context_sigils(context);
    env.render_str(&source, &context).map_err(|e| e.to_string())
}

/// Context keys are exposed without their `@` so `{{ @input.x }}` and
/// `{{ input.x }}` both work.
fn strip_context_sigils(context: &JsonValue) -> JsonValue {
    match context {
        JsonValue::Object(map) => {
            let stripped: JsonObject = map
                .iter()
                .map(|(k, v)| (k.strip_prefix('@').unwrap_or(k).to_string(), v.clone()))
                .collect();
            JsonValue::Object(stripped)
        }
        other => other.clone(),
    }
}

/// Drop `@` sigils in front of identifiers inside `{{ }}` / `{% %}` tags,
/// leaving string literals and text outside tags alone.
fn strip_variable_sigils(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut in_tag = false;
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if !in_tag {
            if c == '{' && matches!(next, Some('{') | Some('%')) {
                in_tag = true;
                out.push(c);
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            out.push(c);
            i += 1;
            continue;
        }

        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
                out.push(c);
            }
            None => match c {
                '"' | '\'' => {
                    quote = Some(c);
                    out.push(c);
                }
                '}' | '%' if next == Some('}') => {
                    in_tag = false;
                    out.push(c);
                    out.push('}');
                    i += 2;
                    continue;
                }
                '@' => {
                    let prev_is_ident = out
                        .chars()
                        .last()
                        .is_some_and(|p| p.is_alphanumeric() || p == '_');
                    let next_is_ident = next.is_some_and(|n| n.is_alphabetic() || n == '_');
                    if prev_is_ident || !next_is_ident {
                        out.push(c);
                    }
                }
                _ => out.push(c),
            },
        }
        i += 1;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mustache_interpolates_and_escapes() {
        let ctx = json!({"@input": {"name": "<b>Ada</b>", "count": 3}});

        let escaped = render(TemplateEngine::Mustache, "Hi {{ @input.name }}!", &ctx).unwrap();
        assert_eq!(escaped, "Hi &lt;b&gt;Ada&lt;&#x2F;b&gt;!");

        let raw = render(TemplateEngine::Mustache, "{{{@input.name}}} x{{& @input.count}}", &ctx).unwrap();
        assert_eq!(raw, "<b>Ada</b> x3");
    }

    #[test]
    fn test_mustache_missing_values_render_empty() {
        let ctx = json!({});
        let out = render(TemplateEngine::Mustache, "[{{ @input.nope }}]{{! note }}", &ctx).unwrap();
        assert_eq!(out, "[]");
    }

    #[test]
    fn test_mustache_sections_iterate_arrays_and_scope_objects() {
        let ctx = json!({"@input": {
            "items": [{"name": "a"}, {"name": "<b>"}],
            "tags": ["x", "y"],
            "user": {"name": "Ada"},
            "title": "T"
        }});

        let list = render(
            TemplateEngine::Mustache,
            "{{#@input.items}}[{{name}}|{{@input.title}}]{{/@input.items}}",
            &ctx,
        )
        .unwrap();
        assert_eq!(list, "[a|T][&lt;b&gt;|T]");

        let implicit = render(TemplateEngine::Mustache, "{{#@input.tags}}{{.}},{{/@input.tags}}", &ctx).unwrap();
        assert_eq!(implicit, "x,y,");

        let scoped = render(TemplateEngine::Mustache, "{{#@input.user}}hi {{name}}{{/@input.user}}", &ctx).unwrap();
        assert_eq!(scoped, "hi Ada");
    }

    #[test]
    fn test_mustache_falsy_sections_skip_and_inverted_sections_render() {
        let ctx = json!({"@input": {"empty": [], "off": false, "none": null, "on": true}});
        let source = "{{#@input.empty}}a{{/@input.empty}}{{#@input.off}}b{{/@input.off}}\
                      {{#@input.none}}c{{/@input.none}}{{#@input.missing}}d{{/@input.missing}}\
                      {{#@input.on}}e{{/@input.on}}";
        assert_eq!(render(TemplateEngine::Mustache, source, &ctx).unwrap(), "e");

        let inverted = "{{^@input.empty}}1{{/@input.empty}}{{^@input.off}}2{{/@input.off}}\
                        {{^@input.missing}}3{{/@input.missing}}{{^@input.on}}4{{/@input.on}}";
        assert_eq!(render(TemplateEngine::Mustache, inverted, &ctx).unwrap(), "123");
    }

    #[test]
    fn test_mustache_rejects_malformed_sections_partials_and_unclosed_tags() {
        let ctx = json!({});
        assert!(render(TemplateEngine::Mustache, "{{#items}}x", &ctx).is_err());
        assert!(render(TemplateEngine::Mustache, "{{#items}}x{{/other}}", &ctx).is_err());
        assert!(render(TemplateEngine::Mustache, "x{{/items}}", &ctx).is_err());
        assert!(render(TemplateEngine::Mustache, "{{> footer}}", &ctx).is_err());
        assert!(render(TemplateEngine::Mustache, "hello {{ name", &ctx).is_err());
    }

    #[test]
    fn test_nunjucks_supports_control_expressions() {
        let ctx = json!({"@input": {"items": ["a", "b"], "admin": true}});
        let source = "{% for x in @input.items %}{{ x }}{% endfor %}{% if @input.admin %}!{% endif %}";

        let out = render(TemplateEngine::Nunjucks, source, &ctx).unwrap();
        assert_eq!(out, "ab!");
    }

    #[test]
    fn test_nunjucks_keeps_at_signs_in_strings_and_text() {
        let ctx = json!({"@user": "ada"});
        let out = render(TemplateEngine::Nunjucks, "mail @{{ @user ~ '@example.com' }}", &ctx).unwrap();
        assert_eq!(out, "mail @ada@example.com");
    }

    #[test]
    fn test_nunjucks_syntax_error_is_reported() {
        let ctx = json!({});
        assert!(render(TemplateEngine::Nunjucks, "{% if %}", &ctx).is_err());
    }
}
