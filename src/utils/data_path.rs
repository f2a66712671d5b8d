use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Splits `a.b[0].c` into segments. Empty segments are dropped.
pub fn parse_path(path: &str) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let flush = |current: &mut String, segments: &mut Vec<PathSegment>| {
        let trimmed = current.trim().trim_matches('"').trim_matches('\'');
        if !trimmed.is_empty() {
            segments.push(match trimmed.parse::<usize>() {
                Ok(index) => PathSegment::Index(index),
                Err(_) => PathSegment::Key(trimmed.to_string()),
            });
        }
        current.clear();
    };
    for ch in path.trim().chars() {
        match ch {
            '.' | '[' | ']' => flush(&mut current, &mut segments),
            _ => current.push(ch),
        }
    }
    flush(&mut current, &mut segments);
    segments
}

/// Walks `target` key by key. `None` means some segment was missing.
pub fn lookup<'a>(target: &'a Value, segments: &[PathSegment]) -> Option<&'a Value> {
    let mut current = target;
    for segment in segments {
        current = match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => map.get(key)?,
            (PathSegment::Index(index), Value::Array(items)) => items.get(*index)?,
            (PathSegment::Index(index), Value::Object(map)) => map.get(&index.to_string())?,
            _ => return None,
        };
    }
    Some(current)
}

pub fn lookup_path<'a>(target: &'a Value, path: &str) -> Option<&'a Value> {
    lookup(target, &parse_path(path))
}

#[cfg(test)]
mod tests {
    use super::{lookup_path, parse_path, PathSegment};

    #[test]
    fn parse_path_handles_brackets_and_dots() {
        assert_eq!(
            parse_path("items[2].name"),
            vec![
                PathSegment::Key("items".to_string()),
                PathSegment::Index(2),
                PathSegment::Key("name".to_string()),
            ]
        );
    }

    #[test]
    fn lookup_path_walks_nested_objects() {
        let value = serde_json::json!({"user": {"emails": ["a@x.test", "b@x.test"]}});
        assert_eq!(
            lookup_path(&value, "user.emails.1").and_then(|v| v.as_str()),
            Some("b@x.test")
        );
        assert!(lookup_path(&value, "user.phone").is_none());
        assert!(lookup_path(&value, "user.emails.7").is_none());
    }
}
