//! Regex-based secret redaction.
//!
//! Three rule sets live here: replacements for archived rollout logs, a
//! lighter pass for console summaries, and labelled detection patterns for
//! the review secret scan.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

struct Replacement {
    pattern: Regex,
    replacement: &'static str,
}

fn rule(pattern: &str, replacement: &'static str) -> Replacement {
    Replacement {
        pattern: Regex::new(pattern).expect("valid redaction pattern"),
        replacement,
    }
}

static ROLLOUT_RULES: LazyLock<Vec<Replacement>> = LazyLock::new(|| {
    vec![
        rule(
            r"-----BEGIN [A-Z ]+PRIVATE KEY-----[\s\S]+?-----END [A-Z ]+PRIVATE KEY-----",
            "[REDACTED_PRIVATE_KEY]",
        ),
        rule(r"\bAKIA[0-9A-Z]{16}\b", "[REDACTED_AWS_ACCESS_KEY]"),
        rule(r"\bASIA[0-9A-Z]{16}\b", "[REDACTED_AWS_SESSION_KEY]"),
        rule(
            r"(?i)(aws[^\n]{0,20}?(secret|access)?_?key)\s*[:=]\s*[A-Za-z0-9/+=]{20,}",
            "${1}=[REDACTED_AWS_SECRET]",
        ),
        rule(r"\bgh[pousr]_[A-Za-z0-9]{36,}\b", "[REDACTED_GH_TOKEN]"),
        rule(r"\bxox[baprs]-[A-Za-z0-9-]+\b", "[REDACTED_SLACK_TOKEN]"),
        rule(r"\bsk-[A-Za-z0-9]{20,}\b", "[REDACTED_API_KEY]"),
        rule(r"(?i)(bearer\s+)[A-Za-z0-9\-._~+/]+=*", "${1}[REDACTED_TOKEN]"),
        rule(
            r#"(?i)\b(token|api[-_]?key|secret|password|passwd|pwd)\b\s*[:=]\s*[^\s'"]+"#,
            "${1}=[REDACTED]",
        ),
    ]
});

static STREAM_RULES: LazyLock<Vec<Replacement>> = LazyLock::new(|| {
    vec![
        rule(
            r#"(?i)\b(api[_-]?key|access[_-]?key|secret|token|password)\b\s*=\s*([^\s'"\\]+)"#,
            "${1}=REDACTED",
        ),
        rule(
            r"(?i)\b(authorization)\s*:\s*(bearer)\s+(\S+)",
            "${1}: ${2} REDACTED",
        ),
        rule(
            r"(?i)(--(?:api[-_]key|token|password|secret))\s+(\S+)",
            "${1} REDACTED",
        ),
    ]
});

/// 偵測模式與標籤，用於 review 文件掃描
pub static SECRET_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (
            r"-----BEGIN [A-Z ]+PRIVATE KEY-----[\s\S]+?-----END [A-Z ]+PRIVATE KEY-----",
            "private key block",
        ),
        (r"\bAKIA[0-9A-Z]{16}\b", "aws access key id"),
        (r"\bASIA[0-9A-Z]{16}\b", "aws session key id"),
        (r"\bgh[pousr]_[A-Za-z0-9]{36,}\b", "github token"),
        (r"\bxox[baprs]-[A-Za-z0-9-]+\b", "slack token"),
        (r"\bsk-[A-Za-z0-9]{20,}\b", "api key"),
        (r"(?i)(bearer\s+)[A-Za-z0-9\-._~+/]+=*", "bearer token"),
        (
            r#"(?i)\b(token|api[-_]?key|secret|password|passwd|pwd)\b\s*[:=]\s*[^\s'"]+"#,
            "credential assignment",
        ),
    ]
    .into_iter()
    .map(|(pattern, label)| (Regex::new(pattern).expect("valid secret pattern"), label))
    .collect()
});

fn apply(rules: &[Replacement], text: &str) -> String {
    rules.iter().fold(text.to_string(), |acc, rule| {
        rule.pattern
            .replace_all(&acc, rule.replacement)
            .into_owned()
    })
}

/// 封存 rollout 用的完整遮蔽
pub fn redact_text(text: &str) -> String {
    apply(&ROLLOUT_RULES, text)
}

/// Recursively redacts every string inside a JSON value. Keys are left alone.
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(redact_text(s)),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), redact_value(item)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Best-effort pass for console summaries. Not a secrets scanner.
pub fn redact_stream_text(text: &str) -> String {
    apply(&STREAM_RULES, text)
}
