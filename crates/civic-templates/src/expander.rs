//! Template Expansion
//!
//! Body processing order over a fully merged template:
//! 1. partials - `{{> name key=value ...}}` loads the named partial and
//!    renders it with its own argument scope;
//! 2. variables - `{{ name }}` substitutes from the scope;
//! 3. conditionals - `{{#if expr}}...{{/if}}` blocks are kept or dropped.
//!
//! Unknown variables stay in place; unknown partials render to an inline
//! marker comment.

use crate::definition::split_header;
use crate::error::TemplateError;
use crate::loader::TemplateLoader;
use crate::Template;
use chrono::{Datelike, Utc};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;

fn variable_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\}\}").unwrap())
}

fn partial_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{>\s*([A-Za-z_][A-Za-z0-9_-]*)([^}]*)\}\}").unwrap())
}

/// Optional header of a partial file, declaring its parameter list.
#[derive(Debug, Default, Deserialize)]
struct PartialHeader {
    #[serde(default)]
    params: Vec<String>,
}

/// Fill scope gaps the way a clerk would expect a fresh document to look.
/// Only unset keys are touched.
pub fn apply_smart_defaults(scope: &mut HashMap<String, String>, record_type: &str) {
    let today = Utc::now().format("%Y-%m-%d").to_string();
    let year = Utc::now().year();

    let date = scope.entry("date".to_string()).or_insert(today).clone();
    scope.entry("created".to_string()).or_insert_with(|| date.clone());
    scope.entry("updated".to_string()).or_insert_with(|| date.clone());
    scope
        .entry("author".to_string())
        .or_insert_with(|| "unknown".to_string());
    scope
        .entry("version".to_string())
        .or_insert_with(|| "1.0.0".to_string());
    scope
        .entry("status".to_string())
        .or_insert_with(|| "draft".to_string());
    scope
        .entry("fiscal_year".to_string())
        .or_insert_with(|| year.to_string());

    let number_field = match record_type {
        "bylaw" => Some(("bylaw_number", "BYL")),
        "policy" => Some(("policy_number", "POL")),
        "resolution" => Some(("resolution_number", "RES")),
        _ => None,
    };
    if let Some((field, prefix)) = number_field {
        scope
            .entry(field.to_string())
            .or_insert_with(|| format!("{prefix}-{year}-001"));
    }
}

/// Evaluate the conditional grammar: `field`, `!field`,
/// `field == 'value'`, `field != 'value'`. A bare field is truthy when it
/// is present and a non-empty string.
pub fn evaluate_condition(expr: &str, scope: &HashMap<String, String>) -> bool {
    let expr = expr.trim();

    for (op, negate) in [("==", false), ("!=", true)] {
        if let Some((field, literal)) = expr.split_once(op) {
            let field = field.trim();
            let literal = literal
                .trim()
                .trim_matches('\'')
                .trim_matches('"');
            let actual = scope.get(field).map(String::as_str).unwrap_or("");
            return (actual == literal) != negate;
        }
    }

    if let Some(field) = expr.strip_prefix('!') {
        return !is_truthy(field.trim(), scope);
    }
    is_truthy(expr, scope)
}

fn is_truthy(field: &str, scope: &HashMap<String, String>) -> bool {
    scope.get(field).map(|v| !v.trim().is_empty()).unwrap_or(false)
}

pub struct TemplateExpander<'a> {
    loader: &'a TemplateLoader,
}

impl<'a> TemplateExpander<'a> {
    pub fn new(loader: &'a TemplateLoader) -> Self {
        Self { loader }
    }

    /// Render a merged template body against the caller scope. Smart
    /// defaults are applied to a copy of the scope first.
    pub fn expand(
        &self,
        template: &Template,
        scope: &HashMap<String, String>,
    ) -> Result<String, TemplateError> {
        let mut scope = scope.clone();
        apply_smart_defaults(&mut scope, &template.header.record_type);

        let body = self.expand_partials(&template.body, &scope)?;
        let body = expand_variables(&body, &scope);
        Ok(expand_conditionals(&body, &scope))
    }

    fn expand_partials(
        &self,
        body: &str,
        scope: &HashMap<String, String>,
    ) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(body.len());
        let mut last_end = 0;
        for caps in partial_re().captures_iter(body) {
            let whole = caps.get(0).unwrap();
            let name = &caps[1];
            let args = parse_partial_args(&caps[2], scope);

            out.push_str(&body[last_end..whole.start()]);
            match self.loader.load_partial(name)? {
                Some(text) => {
                    out.push_str(&render_partial(name, &text, &args));
                }
                None => {
                    tracing::debug!(partial = name, "unknown partial in template body");
                    out.push_str(&format!("<!-- partial '{name}' not found -->"));
                }
            }
            last_end = whole.end();
        }
        out.push_str(&body[last_end..]);
        Ok(out)
    }
}

/// Parse space-separated `key=value` partial arguments. Unquoted values
/// naming a caller variable bind by reference; otherwise quotes are
/// stripped and the literal is used.
fn parse_partial_args(
    raw: &str,
    scope: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut args = HashMap::new();
    for token in raw.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        let resolved = if (value.starts_with('\'') && value.ends_with('\''))
            || (value.starts_with('"') && value.ends_with('"'))
        {
            value[1..value.len() - 1].to_string()
        } else if let Some(bound) = scope.get(value) {
            bound.clone()
        } else {
            value.to_string()
        };
        args.insert(key.to_string(), resolved);
    }
    args
}

/// Expand a partial with its own scope. A partial may carry a header
/// declaring its parameter list; arguments outside it are still passed
/// through, the declaration is advisory.
fn render_partial(name: &str, text: &str, args: &HashMap<String, String>) -> String {
    let (header, body) = match split_header(text) {
        Some((header, body)) => (header, body),
        None => ("", text),
    };
    if !header.is_empty() {
        if let Ok(parsed) = serde_yaml::from_str::<PartialHeader>(header) {
            for key in args.keys() {
                if !parsed.params.is_empty() && !parsed.params.contains(key) {
                    tracing::debug!(partial = name, param = %key,
                        "argument not in partial's declared parameter list");
                }
            }
        }
    }
    let body = body.trim_start_matches('\n');
    let rendered = expand_variables(body, args);
    expand_conditionals(&rendered, args)
}

fn expand_variables(body: &str, scope: &HashMap<String, String>) -> String {
    variable_re()
        .replace_all(body, |caps: &regex::Captures<'_>| {
            match scope.get(&caps[1]) {
                Some(value) => value.clone(),
                // Unknown variables stay as placeholders.
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Resolve `{{#if expr}}...{{/if}}` blocks innermost-first, so nesting
/// works without a recursive parser.
fn expand_conditionals(body: &str, scope: &HashMap<String, String>) -> String {
    let mut text = body.to_string();
    loop {
        let Some(close) = text.find("{{/if}}") else {
            break;
        };
        let Some(open) = text[..close].rfind("{{#if") else {
            break;
        };
        let Some(expr_end) = text[open..close].find("}}") else {
            break;
        };
        let expr = text[open + 5..open + expr_end].trim().to_string();
        let inner = text[open + expr_end + 2..close].to_string();
        let replacement = if evaluate_condition(&expr, scope) {
            inner
        } else {
            String::new()
        };
        text.replace_range(open..close + 7, &replacement);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn scope(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn write(dir: &Path, relative: &str, content: &str) {
        let path = dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn template(record_type: &str, body: &str) -> Template {
        Template::parse(
            &format!("---\nname: default\ntype: {record_type}\n---\n\n{body}"),
            "test",
        )
        .unwrap()
    }

    #[test]
    fn test_variable_expansion_leaves_unknowns() {
        let vars = scope(&[("title", "Open Data"), ("department", "Records")]);
        let out = expand_variables("# {{ title }} / {{department}} / {{ missing }}", &vars);
        assert_eq!(out, "# Open Data / Records / {{ missing }}");
    }

    #[test]
    fn test_conditional_grammar() {
        let vars = scope(&[("status", "draft"), ("empty", "")]);
        assert!(evaluate_condition("status", &vars));
        assert!(!evaluate_condition("empty", &vars));
        assert!(!evaluate_condition("missing", &vars));
        assert!(evaluate_condition("!missing", &vars));
        assert!(evaluate_condition("status == 'draft'", &vars));
        assert!(evaluate_condition("status != 'active'", &vars));
        assert!(!evaluate_condition("status == \"active\"", &vars));
    }

    #[test]
    fn test_conditionals_support_nesting() {
        let vars = scope(&[("status", "active"), ("department", "Records")]);
        let body = "{{#if status == 'active'}}A{{#if department}}B{{/if}}{{/if}}{{#if missing}}C{{/if}}";
        assert_eq!(expand_conditionals(body, &vars), "AB");
    }

    #[test]
    fn test_smart_defaults_only_fill_gaps() {
        let mut vars = scope(&[("status", "active"), ("date", "2024-05-01")]);
        apply_smart_defaults(&mut vars, "bylaw");

        assert_eq!(vars["status"], "active");
        assert_eq!(vars["created"], "2024-05-01");
        assert_eq!(vars["updated"], "2024-05-01");
        assert_eq!(vars["author"], "unknown");
        assert_eq!(vars["version"], "1.0.0");
        assert!(vars["bylaw_number"].starts_with("BYL-"));
        assert!(vars.contains_key("fiscal_year"));

        let mut plain = HashMap::new();
        apply_smart_defaults(&mut plain, "minutes");
        assert!(!plain.contains_key("bylaw_number"));
        assert_eq!(plain["status"], "draft");
    }

    #[test]
    fn test_full_expansion_with_partial() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "partials/signature_block.md",
            "---\nparams: [clerk, office]\n---\n\nSigned, {{ clerk }} ({{ office }})\n",
        );
        let loader = TemplateLoader::new(tmp.path());
        let expander = TemplateExpander::new(&loader);

        let template = template(
            "policy",
            "# {{ title }}\n\n{{#if department}}Dept: {{ department }}\n{{/if}}{{> signature_block clerk=author office='City Hall' }}\n",
        );
        let vars = scope(&[
            ("title", "Open Data"),
            ("department", "Records"),
            ("author", "jdoe"),
        ]);

        let out = expander.expand(&template, &vars).unwrap();
        assert!(out.contains("# Open Data"));
        assert!(out.contains("Dept: Records"));
        assert!(out.contains("Signed, jdoe (City Hall)"));
    }

    #[test]
    fn test_unknown_partial_renders_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = TemplateLoader::new(tmp.path());
        let expander = TemplateExpander::new(&loader);

        let template = template("policy", "{{> nope }}\n");
        let out = expander.expand(&template, &HashMap::new()).unwrap();
        assert!(out.contains("<!-- partial 'nope' not found -->"));
    }

    #[test]
    fn test_partial_args_bind_by_reference_or_literal() {
        let vars = scope(&[("author", "jdoe")]);
        let args = parse_partial_args(" clerk=author office='City Hall' code=A-1", &vars);
        assert_eq!(args["clerk"], "jdoe");
        assert_eq!(args["office"], "City Hall");
        assert_eq!(args["code"], "A-1");
    }
}
