use once_cell::sync::Lazy;
use regex::Regex;

static BEARER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9_\-\.=+/]+").expect("valid regex"));

static JWT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\beyJ[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]*").expect("valid regex")
});

static NAMED_SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)"?(token|id_token|access_token|secret|password)"?\s*[:=]\s*"?([^"\s,}&]{6,})"?"#)
        .expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedactionResult {
    pub content: String,
    pub redaction_count: usize,
}

/// Strips credentials from response bodies and messages before they are logged.
#[derive(Debug, Default, Clone)]
pub struct Redactor;

impl Redactor {
    pub fn new() -> Self {
        Self
    }

    pub fn redact(&self, input: &str) -> RedactionResult {
        if input.is_empty() {
            return RedactionResult {
                content: String::new(),
                redaction_count: 0,
            };
        }

        let mut redaction_count = 0usize;

        redaction_count += BEARER_PATTERN.find_iter(input).count();
        let result = BEARER_PATTERN.replace_all(input, "Bearer [REDACTED]");

        redaction_count += JWT_PATTERN.find_iter(&result).count();
        let result = JWT_PATTERN.replace_all(&result, "[REDACTED_JWT]");

        redaction_count += NAMED_SECRET_PATTERN.find_iter(&result).count();
        let result = NAMED_SECRET_PATTERN.replace_all(&result, |caps: &regex::Captures<'_>| {
            let key = caps
                .get(1)
                .map(|m| m.as_str())
                .unwrap_or("secret")
                .to_ascii_lowercase();
            format!("{}=[REDACTED]", key)
        });

        RedactionResult {
            content: result.into_owned(),
            redaction_count,
        }
    }
}
