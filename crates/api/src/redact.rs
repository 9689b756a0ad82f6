use once_cell::sync::Lazy;
use regex::Regex;

/// Key/value pairs whose values must never reach a log line.
static REDACT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // JSON style: "passphrase": "value"
        r#"(?i)("(?:[a-z_]*(?:passphrase|password|secret|token|session|cookie|api_?key)[a-z_]*)"\s*:\s*")([^"]*)(")"#,
        // Header or env style: Cookie: session=..., ARLO_SESSION=...
        r"(?i)(\b(?:cookie|authorization|[a-z_]*(?:session|token|secret|password))\s*[:=]\s*)([^\s,;]+)()",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Redacts values that look like secrets in a string.
///
/// Key names are preserved so logs still show which field was present.
///
/// ```
/// use arlo_api::redact_sensitive;
///
/// assert_eq!(redact_sensitive(r#"{"passphrase": "hunter2"}"#), r#"{"passphrase": "[REDACTED]"}"#);
/// ```
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for pattern in REDACT_PATTERNS.iter() {
        redacted = pattern.replace_all(&redacted, "${1}[REDACTED]${3}").into_owned();
    }
    redacted
}
