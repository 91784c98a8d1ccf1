//! Redaction of sensitive fields before payloads leave the process

use reqwest::header::HeaderMap;
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::config::RedactionConfig;

/// Replacement for masked values
pub const MASK_VALUE: &str = "*******";

pub const TRUNCATION_SUFFIX: &str = "... [truncated]";

/// Filter applied to structured data before transmission
pub trait Redact: std::fmt::Debug + Send + Sync {
    fn redact(&self, value: Value) -> Value;

    fn redact_map(&self, map: Map<String, Value>) -> Map<String, Value> {
        match self.redact(Value::Object(map)) {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

/// Removes or masks object keys by name, at any nesting depth.
///
/// Key matching is case-insensitive. A key listed in both sets is removed.
#[derive(Debug, Clone, Default)]
pub struct FieldRedactor {
    exclude: HashSet<String>,
    mask: HashSet<String>,
}

impl FieldRedactor {
    pub fn new<E, M>(exclude: E, mask: M) -> Self
    where
        E: IntoIterator,
        E::Item: AsRef<str>,
        M: IntoIterator,
        M::Item: AsRef<str>,
    {
        Self {
            exclude: exclude.into_iter().map(|k| k.as_ref().to_lowercase()).collect(),
            mask: mask.into_iter().map(|k| k.as_ref().to_lowercase()).collect(),
        }
    }

    pub fn from_config(config: &RedactionConfig) -> Self {
        Self::new(&config.exclude, &config.mask)
    }

    fn redact_object(&self, map: Map<String, Value>) -> Map<String, Value> {
        map.into_iter()
            .filter_map(|(key, value)| {
                let lowered = key.to_lowercase();
                if self.exclude.contains(&lowered) {
                    None
                } else if self.mask.contains(&lowered) {
                    Some((key, Value::String(MASK_VALUE.to_string())))
                } else {
                    Some((key, self.redact(value)))
                }
            })
            .collect()
    }
}

impl Redact for FieldRedactor {
    fn redact(&self, value: Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.redact_object(map)),
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.redact(v)).collect()),
            other => other,
        }
    }
}

/// Render headers as a JSON object and redact them.
///
/// Repeated headers are joined with `, `; non-UTF-8 values are dropped.
pub fn filter_headers(headers: &HeaderMap, redactor: &dyn Redact) -> Map<String, Value> {
    let mut map = Map::new();
    for name in headers.keys() {
        let values: Vec<&str> = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        if values.is_empty() {
            continue;
        }
        map.insert(name.as_str().to_string(), Value::String(values.join(", ")));
    }
    redactor.redact_map(map)
}

/// Char-boundary safe truncation
pub fn truncate_chars(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}{}", &content[..end], TRUNCATION_SUFFIX),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE, SET_COOKIE};
    use serde_json::json;

    fn body_redactor() -> FieldRedactor {
        FieldRedactor::new(["password", "token"], ["email"])
    }

    #[test]
    fn test_redacts_nested_fields_case_insensitively() {
        let value = json!({
            "user": {
                "Email": "a@b.c",
                "PASSWORD": "hunter2",
                "profile": {"token": "t", "name": "Ann"}
            },
            "items": [{"email": "x@y.z", "id": 1}],
            "status": "ok"
        });

        let redacted = body_redactor().redact(value);
        assert_eq!(
            redacted,
            json!({
                "user": {
                    "Email": MASK_VALUE,
                    "profile": {"name": "Ann"}
                },
                "items": [{"email": MASK_VALUE, "id": 1}],
                "status": "ok"
            })
        );
    }

    #[test]
    fn test_exclude_wins_over_mask() {
        let redactor = FieldRedactor::new(["secret"], ["secret"]);
        let redacted = redactor.redact(json!({"secret": 1, "keep": 2}));
        assert_eq!(redacted, json!({"keep": 2}));
    }

    #[test]
    fn test_scalars_pass_through() {
        assert_eq!(body_redactor().redact(json!("password")), json!("password"));
        assert_eq!(body_redactor().redact(json!(3)), json!(3));
    }

    #[test]
    fn test_filter_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.append(SET_COOKIE, HeaderValue::from_static("a=1"));
        headers.append(SET_COOKIE, HeaderValue::from_static("b=2"));

        let redactor = FieldRedactor::new(["Authorization"], Vec::<String>::new());
        let map = filter_headers(&headers, &redactor);

        assert!(map.get("authorization").is_none());
        assert_eq!(map["content-type"], "application/json");
        assert_eq!(map["set-cookie"], "a=1, b=2");
    }

    #[test]
    fn test_truncate_chars_on_char_boundaries() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 5), "hello");

        let truncated = truncate_chars(&"é".repeat(12), 10);
        assert!(truncated.ends_with(TRUNCATION_SUFFIX));
        assert_eq!(truncated.chars().count(), 10 + TRUNCATION_SUFFIX.chars().count());
    }
}
