//! Failure classification by message and type-name heuristics.

use conductor_types::recovery::ErrorCategory;

/// Keyword table checked in order; the first category with a hit wins.
const KEYWORDS: &[(ErrorCategory, &[&str])] = &[
    (ErrorCategory::Network, &["network", "connection", "unreachable"]),
    (ErrorCategory::RateLimit, &["rate limit", "too many requests", "429"]),
    (ErrorCategory::Auth, &["auth", "unauthorized", "401", "403"]),
    (ErrorCategory::Resource, &["memory", "disk", "resource", "quota"]),
    (ErrorCategory::Validation, &["validation", "invalid", "bad request", "400"]),
];

/// Map an error to a category.
///
/// `type_name` is the error's type (for example from
/// `std::any::type_name`); a timeout in either the message or the type wins
/// over every other keyword.
pub fn categorize_error(message: &str, type_name: &str) -> ErrorCategory {
    let message = message.to_lowercase();
    let type_name = type_name.to_lowercase();

    if message.contains("timeout") || message.contains("timed out") || type_name.contains("timeout")
    {
        return ErrorCategory::Timeout;
    }

    KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| message.contains(w)))
        .map(|(category, _)| *category)
        .unwrap_or(ErrorCategory::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_each_category() {
        let cases = [
            ("Request timeout after 30s", ErrorCategory::Timeout),
            ("operation timed out", ErrorCategory::Timeout),
            ("Connection refused", ErrorCategory::Network),
            ("host unreachable", ErrorCategory::Network),
            ("HTTP 429 Too Many Requests", ErrorCategory::RateLimit),
            ("rate limit exceeded", ErrorCategory::RateLimit),
            ("401 Unauthorized", ErrorCategory::Auth),
            ("out of memory", ErrorCategory::Resource),
            ("disk quota exceeded", ErrorCategory::Resource),
            ("invalid argument", ErrorCategory::Validation),
            ("400 bad request", ErrorCategory::Validation),
            ("something odd happened", ErrorCategory::Unknown),
        ];
        for (message, expected) in cases {
            assert_eq!(categorize_error(message, ""), expected, "{message}");
        }
    }

    #[test]
    fn timeout_type_name_wins() {
        assert_eq!(
            categorize_error("invalid state", "tokio::time::error::Elapsed::TimeoutError"),
            ErrorCategory::Timeout
        );
    }

    #[test]
    fn earlier_categories_take_precedence() {
        // "network" is checked before "invalid".
        assert_eq!(
            categorize_error("invalid network configuration", ""),
            ErrorCategory::Network
        );
    }
}
