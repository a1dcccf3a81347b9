//! Transient-failure classification for error messages.
//!
//! Distinguishes between transient errors (should retry) and fatal errors
//! (surface immediately). Classification is purely textual so it works for
//! any error type that can render a human-readable message.

use regex::Regex;
use std::sync::OnceLock;

/// Signatures of failures that usually clear up on their own.
const TRANSIENT_PATTERNS: &[&str] = &[
    // Rate limiting
    r"rate[\s_-]?limit",
    r"too many requests",
    r"\b429\b",
    // Timeouts
    r"time[\s_-]?out",
    r"timed out",
    // Connection reset
    r"econnreset",
    r"connection reset",
    r"socket hang up",
    // DNS
    r"enotfound",
    r"eai_again",
    r"getaddrinfo",
    r"\bdns\b",
    // Gateway / availability
    r"\b50[234]\b",
    r"bad gateway",
    r"service unavailable",
    r"temporarily unavailable",
    r"try again",
    // Generic network
    r"network error",
];

fn transient_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!("(?i)(?:{})", TRANSIENT_PATTERNS.join("|"));
        Regex::new(&pattern).expect("transient pattern list is a valid regex")
    })
}

/// Check whether an error message describes a transient failure.
///
/// Case-insensitive; never panics on any input.
pub fn is_retryable_error(message: &str) -> bool {
    transient_regex().is_match(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_signatures() {
        assert!(is_retryable_error("Rate limit exceeded"));
        assert!(is_retryable_error("HTTP 429 Too Many Requests"));
        assert!(is_retryable_error("request timeout after 30s"));
        assert!(is_retryable_error("operation TIMED OUT"));
        assert!(is_retryable_error("read ECONNRESET"));
        assert!(is_retryable_error("getaddrinfo ENOTFOUND api.trello.com"));
        assert!(is_retryable_error("upstream returned 502"));
        assert!(is_retryable_error("503 Service Unavailable"));
        assert!(is_retryable_error("Gateway error 504"));
        assert!(is_retryable_error("Please try again later"));
        assert!(is_retryable_error("Network Error"));
    }

    #[test]
    fn test_fatal_messages() {
        assert!(!is_retryable_error("401 Unauthorized"));
        assert!(!is_retryable_error("invalid board id"));
        assert!(!is_retryable_error("permission denied"));
        assert!(!is_retryable_error(""));
        // Digits inside larger numbers are not status codes
        assert!(!is_retryable_error("card 150299 not found"));
    }
}
