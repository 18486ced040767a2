//! Recursive redaction of sensitive detail values.

use std::sync::LazyLock;

use regex::Regex;

use crate::value::{Details, Value};

/// Replacement for redacted values.
pub const REDACTED: &str = "[REDACTED]";

/// Top-level detail key that requests sealing when set to `true`.
pub const CONFIDENTIAL_MARKER: &str = "$confidential";

/// Key terms whose values are always redacted, matched case-insensitively.
///
/// Keys are split into segments at `_`, `-`, `.`, whitespace and camelCase
/// humps. Terms of up to three characters must equal a whole segment, so
/// `key` matches `api_key` and `signingKey` but not `monkey` or
/// `keyboard_layout`. Longer terms match anywhere in the key.
pub const SENSITIVE_TERMS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "api_key",
    "apikey",
    "private_key",
    "key",
    "credential",
    "ssn",
    "social_security",
    "identity_number",
    "national_id",
    "card_number",
    "cvv",
];

/// Patterns scrubbed out of free-text values, with their replacement.
const VALUE_PATTERNS: &[(&str, &str)] = &[
    (r"(?i)\bbearer\s+[a-z0-9\-._~+/]+=*", "Bearer [REDACTED]"),
    (r"\beyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+", REDACTED),
    (
        r"(?i)\b(password|passwd|pwd|secret|token|api[_-]?key)=[^&\s]+",
        "$1=[REDACTED]",
    ),
];

const SEGMENT_TERM_MAX: usize = 3;

static SCRUBBERS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    VALUE_PATTERNS
        .iter()
        .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, *replacement)))
        .collect()
});

/// Output of [`Sanitizer::sanitize`].
#[derive(Debug, Clone, PartialEq)]
pub struct Sanitized {
    /// Details with sensitive values replaced.
    pub details: Details,
    /// Paths of values that were coerced to text.
    pub coerced: Vec<String>,
    /// Whether the caller marked the payload confidential.
    pub confidential: bool,
    /// Number of values redacted.
    pub redactions: usize,
}

/// Redacts sensitive keys and scrubs credential-shaped text.
///
/// Never fails: values it cannot represent deterministically are coerced to
/// text and their path recorded.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    terms: Vec<String>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self {
            terms: SENSITIVE_TERMS.iter().map(|t| (*t).to_owned()).collect(),
        }
    }
}

impl Sanitizer {
    /// Sanitizer with the default denylist.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key term to the denylist.
    #[must_use]
    pub fn with_term(mut self, term: impl Into<String>) -> Self {
        self.terms.push(term.into().to_lowercase());
        self
    }

    /// Whether a key names a sensitive value. See [`SENSITIVE_TERMS`] for
    /// the matching rule.
    #[must_use]
    pub fn is_sensitive_key(&self, key: &str) -> bool {
        let key = normalize_key(key);
        self.terms.iter().any(|term| {
            if term.len() <= SEGMENT_TERM_MAX {
                key.split('_').any(|segment| segment == term)
            } else {
                key.contains(term.as_str())
            }
        })
    }

    /// Sanitize a details map.
    #[must_use]
    pub fn sanitize(&self, mut details: Details) -> Sanitized {
        let confidential = matches!(details.remove(CONFIDENTIAL_MARKER), Some(Value::Bool(true)));
        let mut walk = Walk::default();
        let details = details
            .into_iter()
            .map(|(key, value)| {
                let value = self.sanitize_entry(&key, value, &key, &mut walk);
                (key, value)
            })
            .collect();
        Sanitized {
            details,
            coerced: walk.coerced,
            confidential,
            redactions: walk.redactions,
        }
    }

    fn sanitize_entry(&self, key: &str, value: Value, path: &str, walk: &mut Walk) -> Value {
        if self.is_sensitive_key(key) && !matches!(value, Value::Null) {
            walk.redactions = walk.redactions.saturating_add(1);
            return Value::Text(REDACTED.to_owned());
        }
        self.sanitize_value(value, path, walk)
    }

    fn sanitize_value(&self, value: Value, path: &str, walk: &mut Walk) -> Value {
        match value {
            Value::Float(f) if !f.is_finite() => {
                walk.coerced.push(path.to_owned());
                Value::Text(f.to_string())
            },
            Value::Text(text) => {
                let scrubbed = scrub_text(&text);
                if scrubbed != text {
                    walk.redactions = walk.redactions.saturating_add(1);
                }
                Value::Text(scrubbed)
            },
            Value::List(items) => Value::List(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| self.sanitize_value(item, &format!("{path}[{i}]"), walk))
                    .collect(),
            ),
            Value::Map(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| {
                        let child = format!("{path}.{k}");
                        let v = self.sanitize_entry(&k, v, &child, walk);
                        (k, v)
                    })
                    .collect(),
            ),
            other => other,
        }
    }
}

#[derive(Default)]
struct Walk {
    coerced: Vec<String>,
    redactions: usize,
}

fn scrub_text(text: &str) -> String {
    let mut out = text.to_owned();
    for (re, replacement) in SCRUBBERS.iter() {
        if re.is_match(&out) {
            out = re.replace_all(&out, *replacement).into_owned();
        }
    }
    out
}

// `x-API-Key` -> `x_api_key`, `signingKey` -> `signing_key`.
fn normalize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len().saturating_add(4));
    let mut after_lower = false;
    for c in key.chars() {
        if c == '-' || c == '.' || c.is_whitespace() {
            out.push('_');
        } else {
            if c.is_uppercase() && after_lower {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        }
        after_lower = c.is_lowercase() || c.is_ascii_digit();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(json: serde_json::Value) -> Details {
        match Value::from_json(json) {
            Value::Map(map) => map,
            other => panic!("expected map, got {other:?}"),
        }
    }

    #[test]
    fn test_patterns_compile() {
        assert_eq!(SCRUBBERS.len(), VALUE_PATTERNS.len());
    }

    #[test]
    fn test_sensitive_keys_redacted_case_insensitive() {
        let out = Sanitizer::new().sanitize(details(serde_json::json!({
            "Password": "hunter2",
            "API-Key": "abc",
            "username": "alice",
        })));
        assert_eq!(out.details["Password"], Value::from(REDACTED));
        assert_eq!(out.details["API-Key"], Value::from(REDACTED));
        assert_eq!(out.details["username"], Value::from("alice"));
        assert_eq!(out.redactions, 2);
    }

    #[test]
    fn test_nested_redaction() {
        let out = Sanitizer::new().sanitize(details(serde_json::json!({
            "request": {"headers": {"x-auth-token": "t"}, "items": [{"cvv": 123}]},
        })));
        let Value::Map(request) = &out.details["request"] else {
            panic!("request should stay a map");
        };
        let Value::Map(headers) = &request["headers"] else {
            panic!("headers should stay a map");
        };
        assert_eq!(headers["x-auth-token"], Value::from(REDACTED));
        let Value::List(items) = &request["items"] else {
            panic!("items should stay a list");
        };
        let Value::Map(item) = &items[0] else {
            panic!("item should stay a map");
        };
        assert_eq!(item["cvv"], Value::from(REDACTED));
    }

    #[test]
    fn test_bearer_token_scrubbed_from_text() {
        let out = Sanitizer::new().sanitize(details(serde_json::json!({
            "header": "Authorization: Bearer abc.def-123",
            "url": "https://x.test/cb?code=1&token=zzz",
        })));
        assert_eq!(out.details["header"], Value::from("Authorization: Bearer [REDACTED]"));
        assert_eq!(out.details["url"], Value::from("https://x.test/cb?code=1&token=[REDACTED]"));
    }

    #[test]
    fn test_non_finite_float_coerced() {
        let mut input = Details::new();
        input.insert("ratio".into(), Value::Float(f64::NAN));
        let out = Sanitizer::new().sanitize(input);
        assert_eq!(out.details["ratio"], Value::from("NaN"));
        assert_eq!(out.coerced, vec!["ratio".to_owned()]);
    }

    #[test]
    fn test_confidential_marker_removed() {
        let out = Sanitizer::new().sanitize(details(serde_json::json!({
            "$confidential": true,
            "diagnosis": "x",
        })));
        assert!(out.confidential);
        assert!(!out.details.contains_key(CONFIDENTIAL_MARKER));
    }

    #[test]
    fn test_custom_term() {
        let sanitizer = Sanitizer::new().with_term("diagnosis");
        assert!(sanitizer.is_sensitive_key("Diagnosis_Code"));
    }

    #[test]
    fn test_short_terms_match_whole_segments() {
        let sanitizer = Sanitizer::new();
        for sensitive in ["key", "api_key", "signingKey", "ssh-key", "X-API-Key", "user.ssn", "cardCVV"] {
            assert!(sanitizer.is_sensitive_key(sensitive), "{sensitive} should be redacted");
        }
        for plain in ["monkey", "keyboard_layout", "turnkey", "business_name", "cvvalue"] {
            assert!(!sanitizer.is_sensitive_key(plain), "{plain} should be kept");
        }
        // Longer terms still match inside a segment.
        assert!(sanitizer.is_sensitive_key("userpassword"));
        assert!(sanitizer.is_sensitive_key("refreshTokens"));
    }

    #[test]
    fn test_null_sensitive_value_kept() {
        let out = Sanitizer::new().sanitize(details(serde_json::json!({"password": null})));
        assert_eq!(out.details["password"], Value::Null);
        assert_eq!(out.redactions, 0);
    }
}
