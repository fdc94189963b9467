//! Redaction of sensitive values in error messages before they reach logs.
//!
//! Client keys travel in request URLs (`cfenc=`) and are JWTs, so both forms
//! are scrubbed, along with email addresses and IPv4 addresses.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PATTERNS: Vec<(Regex, &'static str)> = vec![
        // Client key passed as a query parameter
        (Regex::new(r"cfenc=[^&\s]+").unwrap(), "cfenc=[REDACTED]"),
        // Bare JWTs (client keys, tokens)
        (
            Regex::new(r"eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]*").unwrap(),
            "[CLIENT_KEY]"
        ),
        (Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").unwrap(), "[IP]"),
        (Regex::new(r"[\w.+-]+@[\w.-]+\.\w+").unwrap(), "[EMAIL]"),
    ];
}

/// Sanitize a message by replacing sensitive values with placeholders.
///
/// ```
/// use customfit::error::sanitize_message;
///
/// let message = "POST /v1/cfe?cfenc=secret-key from 10.1.2.3";
/// let sanitized = sanitize_message(message);
/// assert_eq!(sanitized, "POST /v1/cfe?cfenc=[REDACTED] from [IP]");
/// ```
pub fn sanitize_message(message: &str) -> String {
    let mut result = message.to_string();

    for (pattern, replacement) in PATTERNS.iter() {
        result = pattern.replace_all(&result, *replacement).to_string();
    }

    result
}
