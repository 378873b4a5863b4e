//! Secret templates.
//!
//! The subset of the vault agent template language that secret
//! annotations use:
//!
//! ```text
//! {{- with secret "internal/data/database/config" -}}
//! postgresql://{{ .Data.data.username }}:{{ .Data.data.password }}@postgres:5432/wizard
//! {{- end -}}
//! ```
//!
//! `{{-` trims whitespace before the action and `-}}` after it. Inside a
//! `with secret` block, `.Data` is the secret's response data, so
//! `.Data.data.<key>` reads a KV v2 key and `.Data.metadata.version` its
//! version. Missing keys are errors; nothing renders half-filled.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{SecretError, SecretResult};
use crate::source::SecretData;

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Field(Vec<String>),
    WithSecret { path: String, body: Vec<Node> },
}

#[derive(Debug)]
enum Token {
    Text(String),
    Action(String),
}

/// Vault paths referenced by `with secret` blocks, in order of first use.
pub fn secret_paths(template: &str) -> SecretResult<Vec<String>> {
    let nodes = parse(template)?;
    let mut out = Vec::new();
    collect_paths(&nodes, &mut out);
    Ok(out)
}

/// Render `template` against already-fetched secrets keyed by path.
pub fn render(template: &str, secrets: &BTreeMap<String, SecretData>) -> SecretResult<String> {
    let nodes = parse(template)?;
    let mut out = String::new();
    render_nodes(&nodes, None, secrets, &mut out)?;
    Ok(out)
}

/// Default rendering when a file has no template: one `key: value`
/// line per secret key, sorted.
pub fn render_default(secret: &SecretData) -> SecretResult<String> {
    let values = secret.values().ok_or_else(|| {
        SecretError::Template(format!("secret {} has no data object", secret.path))
    })?;
    let sorted: BTreeMap<&String, &Value> = values.iter().collect();
    let mut out = String::new();
    for (key, value) in sorted {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(&display(value));
        out.push('\n');
    }
    Ok(out)
}

fn collect_paths(nodes: &[Node], out: &mut Vec<String>) {
    for node in nodes {
        if let Node::WithSecret { path, body } = node {
            if !out.contains(path) {
                out.push(path.clone());
            }
            collect_paths(body, out);
        }
    }
}

fn render_nodes(
    nodes: &[Node],
    scope: Option<&SecretData>,
    secrets: &BTreeMap<String, SecretData>,
    out: &mut String,
) -> SecretResult<()> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Field(fields) => {
                let secret = scope.ok_or_else(|| {
                    SecretError::Template(format!(
                        "`.{}` used outside a with secret block",
                        fields.join(".")
                    ))
                })?;
                out.push_str(&display(lookup(secret, fields)?));
            }
            Node::WithSecret { path, body } => {
                let secret = secrets.get(path).ok_or_else(|| {
                    SecretError::Template(format!("secret {path} was not fetched"))
                })?;
                render_nodes(body, Some(secret), secrets, out)?;
            }
        }
    }
    Ok(())
}

fn lookup<'a>(secret: &'a SecretData, fields: &[String]) -> SecretResult<&'a Value> {
    let missing = || SecretError::MissingKey {
        path: secret.path.clone(),
        key: fields.join("."),
    };
    let (first, rest) = fields.split_first().ok_or_else(missing)?;
    if first != "Data" {
        return Err(SecretError::Template(format!(
            "unsupported field `.{}`",
            fields.join(".")
        )));
    }
    let mut value = &secret.raw;
    for field in rest {
        value = value.get(field.as_str()).ok_or_else(missing)?;
    }
    Ok(value)
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "<no value>".to_string(),
        other => other.to_string(),
    }
}

fn parse(template: &str) -> SecretResult<Vec<Node>> {
    let tokens = tokenize(template)?;
    let mut stack: Vec<(String, Vec<Node>)> = Vec::new();
    let mut current: Vec<Node> = Vec::new();

    for token in tokens {
        match token {
            Token::Text(text) if text.is_empty() => {}
            Token::Text(text) => current.push(Node::Text(text)),
            Token::Action(action) => {
                if action.starts_with("/*") {
                    continue;
                } else if action == "end" {
                    let (path, parent) = stack
                        .pop()
                        .ok_or_else(|| SecretError::Template("unexpected {{ end }}".to_string()))?;
                    let body = std::mem::replace(&mut current, parent);
                    current.push(Node::WithSecret { path, body });
                } else if let Some(rest) = action.strip_prefix("with ") {
                    let path = parse_with_secret(rest.trim())?;
                    stack.push((path, std::mem::take(&mut current)));
                } else if let Some(field) = action.strip_prefix('.') {
                    let fields: Vec<String> = field
                        .split('.')
                        .filter(|f| !f.is_empty())
                        .map(str::to_string)
                        .collect();
                    current.push(Node::Field(fields));
                } else {
                    return Err(SecretError::Template(format!(
                        "unsupported action `{{{{ {action} }}}}`"
                    )));
                }
            }
        }
    }

    if let Some((path, _)) = stack.pop() {
        return Err(SecretError::Template(format!(
            "with secret \"{path}\" is missing {{{{ end }}}}"
        )));
    }
    Ok(current)
}

/// `secret "path"` with optional extra arguments, which are ignored.
fn parse_with_secret(args: &str) -> SecretResult<String> {
    let rest = args
        .strip_prefix("secret")
        .map(str::trim_start)
        .ok_or_else(|| SecretError::Template(format!("unsupported with `{args}`")))?;
    let quoted = rest
        .strip_prefix('"')
        .and_then(|r| r.split_once('"'))
        .map(|(path, _)| path);
    match quoted {
        Some(path) if !path.is_empty() => Ok(path.to_string()),
        _ => Err(SecretError::Template(format!(
            "with secret needs a quoted path, got `{rest}`"
        ))),
    }
}

/// Split into text and `{{ action }}` tokens, applying trim markers.
fn tokenize(template: &str) -> SecretResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = template;
    let mut trim_next = false;

    while let Some(open) = rest.find("{{") {
        let mut text = &rest[..open];
        if trim_next {
            text = text.trim_start();
        }
        let after_open = &rest[open + 2..];
        let close = after_open
            .find("}}")
            .ok_or_else(|| SecretError::Template("unclosed {{".to_string()))?;
        let mut action = &after_open[..close];

        if let Some(stripped) = action.strip_prefix("- ") {
            text = text.trim_end();
            action = stripped;
        }
        trim_next = false;
        if let Some(stripped) = action.strip_suffix(" -") {
            trim_next = true;
            action = stripped;
        }

        tokens.push(Token::Text(text.to_string()));
        tokens.push(Token::Action(action.trim().to_string()));
        rest = &after_open[close + 2..];
    }

    let tail = if trim_next { rest.trim_start() } else { rest };
    tokens.push(Token::Text(tail.to_string()));
    Ok(tokens)
}
