use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::models::ExecutionContext;
use crate::utils::data_path::{lookup, parse_path, PathSegment};

// `{{expr}}` first, then `{name}`; one pass so substituted text is never rescanned.
static REFERENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}|\{([A-Za-z_][A-Za-z0-9_.\-]*)\}")
        .expect("template reference regex")
});

static WHOLE_EXPRESSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{\{\s*([^{}]+?)\s*\}\}$").expect("whole expression regex"));

fn split_head(path: &str) -> Option<(String, Vec<PathSegment>)> {
    let mut segments = parse_path(path);
    if segments.is_empty() {
        return None;
    }
    let head = match segments.remove(0) {
        PathSegment::Key(key) => key,
        PathSegment::Index(index) => index.to_string(),
    };
    Some((head, segments))
}

fn lookup_in<'a>(
    map: &'a std::collections::HashMap<String, Value>,
    path: &str,
) -> Option<&'a Value> {
    let (head, rest) = split_head(path)?;
    lookup(map.get(&head)?, &rest)
}

/// Resolves a `{{...}}` expression. `None` means undefined.
fn resolve_expression<'a>(expression: &str, context: &'a ExecutionContext) -> Option<&'a Value> {
    let expression = expression.trim();
    if let Some(rest) = expression.strip_prefix("step.") {
        return lookup_in(&context.steps, rest);
    }
    if let Some(rest) = expression.strip_prefix("integration.") {
        return lookup_in(&context.integrations, rest);
    }
    if let Some(rest) = expression
        .strip_prefix("var.")
        .or_else(|| expression.strip_prefix("variables."))
    {
        return lookup_in(&context.variables, rest);
    }
    lookup_in(&context.variables, expression)
}

pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Number(num) => num.to_string(),
        Value::Bool(flag) => flag.to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

fn resolve_capture<'a>(caps: &Captures<'_>, context: &'a ExecutionContext) -> Option<&'a Value> {
    if let Some(expression) = caps.get(1) {
        return resolve_expression(expression.as_str(), context);
    }
    caps.get(2)
        .and_then(|name| lookup_in(&context.variables, name.as_str()))
}

/// Substitutes `{name}` and `{{step.<id>.<path>}}` references. Unknown
/// references stay verbatim. Nothing is escaped.
pub fn resolve(text: &str, context: &ExecutionContext) -> String {
    resolve_encoded(text, context, |raw| raw.to_string())
}

/// Like [`resolve`], passing every substituted value through `encode`.
pub fn resolve_encoded<F>(text: &str, context: &ExecutionContext, encode: F) -> String
where
    F: Fn(&str) -> String,
{
    if !text.contains('{') {
        return text.to_string();
    }
    REFERENCE_RE
        .replace_all(text, |caps: &Captures<'_>| {
            match resolve_capture(caps, context) {
                Some(value) => encode(&stringify(value)),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// References that would be left verbatim by [`resolve`].
pub fn unresolved_references(text: &str, context: &ExecutionContext) -> Vec<String> {
    REFERENCE_RE
        .captures_iter(text)
        .filter(|caps| resolve_capture(caps, context).is_none())
        .map(|caps| caps[0].to_string())
        .collect()
}

/// Walks a structured value and substitutes inside string leaves only. A leaf
/// that is exactly one `{{expr}}` takes the referenced value with its type.
pub fn resolve_value(value: &Value, context: &ExecutionContext) -> Value {
    match value {
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| resolve_value(v, context)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, entry)| (key.clone(), resolve_value(entry, context)))
                .collect(),
        ),
        Value::String(text) => {
            if let Some(caps) = WHOLE_EXPRESSION_RE.captures(text) {
                if let Some(found) = resolve_expression(&caps[1], context) {
                    return found.clone();
                }
            }
            Value::String(resolve(text, context))
        }
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::{resolve, resolve_encoded, resolve_value, unresolved_references};
    use crate::models::ExecutionContext;
    use serde_json::Value;

    fn context() -> ExecutionContext {
        ExecutionContext::new()
            .with_variable("city", "Paris")
            .with_variable("limit", 5)
            .with_step(
                "fetch",
                serde_json::json!({"user": {"id": 42, "tags": ["a", "b"]}}),
            )
    }

    #[test]
    fn resolve_substitutes_flat_variables() {
        assert_eq!(
            resolve("https://x.test/weather?q={city}", &context()),
            "https://x.test/weather?q=Paris"
        );
    }

    #[test]
    fn resolve_leaves_unknown_references_verbatim() {
        assert_eq!(resolve("a={missing}&b={city}", &context()), "a={missing}&b=Paris");
        assert_eq!(
            resolve("{{step.fetch.user.email}}", &context()),
            "{{step.fetch.user.email}}"
        );
    }

    #[test]
    fn resolve_walks_step_outputs() {
        assert_eq!(resolve("id={{step.fetch.user.id}}", &context()), "id=42");
        assert_eq!(resolve("{{ step.fetch.user.tags.1 }}", &context()), "b");
    }

    #[test]
    fn resolve_does_not_rescan_substituted_values() {
        let ctx = ExecutionContext::new()
            .with_variable("a", "{b}")
            .with_variable("b", "boom");
        assert_eq!(resolve("{a}", &ctx), "{b}");
    }

    #[test]
    fn resolve_encoded_only_encodes_substituted_text() {
        let ctx = ExecutionContext::new().with_variable("q", "a b");
        let out = resolve_encoded("/search/{q}?x=1", &ctx, |raw| raw.replace(' ', "%20"));
        assert_eq!(out, "/search/a%20b?x=1");
    }

    #[test]
    fn resolve_value_substitutes_only_string_leaves() {
        let body = serde_json::json!({
            "city": "{city}",
            "user": "{{step.fetch.user}}",
            "count": 3,
            "nested": ["{limit}", "{nope}"]
        });
        let out = resolve_value(&body, &context());
        assert_eq!(out["city"], Value::String("Paris".to_string()));
        assert_eq!(out["user"]["id"], serde_json::json!(42));
        assert_eq!(out["count"], serde_json::json!(3));
        assert_eq!(out["nested"][0], Value::String("5".to_string()));
        assert_eq!(out["nested"][1], Value::String("{nope}".to_string()));
    }

    #[test]
    fn resolve_value_keeps_json_structure_when_value_contains_quotes() {
        let ctx = ExecutionContext::new().with_variable("name", "a\"b}");
        let out = resolve_value(&serde_json::json!({"n": "{name}"}), &ctx);
        assert_eq!(out["n"], Value::String("a\"b}".to_string()));
    }

    #[test]
    fn unresolved_references_lists_missing_tokens() {
        assert_eq!(
            unresolved_references("{city}/{missing}", &context()),
            vec!["{missing}".to_string()]
        );
    }
}
