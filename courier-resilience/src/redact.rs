//! Secret redaction for log lines and surfaced error text
//!
//! Provider error bodies can echo request credentials back. Anything that
//! ends up in a log line or a terminal error must pass through [`redact`]
//! first.

use once_cell::sync::Lazy;
use regex::Regex;

static KEY_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(api[_-]?key|secret|password|token|authorization)(["']?\s*[:=]\s*["']?)([^\s"'&,;]+)"#)
        .expect("valid redaction pattern")
});

static BEARER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)bearer\s+[A-Za-z0-9._~+/=-]+").expect("valid redaction pattern"));

/// Mask credential-looking values in `input`
pub fn redact(input: &str) -> String {
    let masked = KEY_VALUE.replace_all(input, |caps: &regex::Captures<'_>| {
        format!("{}{}***", &caps[1], &caps[2])
    });
    BEARER.replace_all(&masked, "Bearer ***").into_owned()
}
