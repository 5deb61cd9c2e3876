// Download failure classification: turns raw tool diagnostics into short user-safe text.

use crate::config::{ERROR_MESSAGE_LIMIT, GENERIC_FAILURE_LIMIT};
use crate::error::truncate_chars;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    AgeRestricted,
    Private,
    Unavailable,
    Copyright,
    Generic(String),
}

impl FailureKind {
    pub fn message(&self) -> String {
        match self {
            FailureKind::AgeRestricted => "Age-restricted or sign-in required".to_string(),
            FailureKind::Private => "Video is private".to_string(),
            FailureKind::Unavailable => "Video is unavailable".to_string(),
            FailureKind::Copyright => "Blocked by copyright".to_string(),
            FailureKind::Generic(detail) if detail.is_empty() => "Download failed".to_string(),
            FailureKind::Generic(detail) => format!("Download failed: {}", detail),
        }
    }
}

/// Keep only what follows the last `ERROR:` marker, dropping tool prefixes
/// and stack noise that precede it.
fn strip_tool_noise(raw: &str) -> &str {
    match raw.rfind("ERROR:") {
        Some(idx) => raw[idx + "ERROR:".len()..].trim(),
        None => raw.trim(),
    }
}

pub fn classify_failure(raw: &str) -> FailureKind {
    let text = strip_tool_noise(raw);
    let lower = text.to_lowercase();

    if lower.contains("sign in")
        || lower.contains("age-restricted")
        || lower.contains("age restricted")
        || lower.contains("confirm your age")
        || lower.contains("inappropriate for some users")
    {
        return FailureKind::AgeRestricted;
    }
    if lower.contains("private") {
        return FailureKind::Private;
    }
    if lower.contains("unavailable") {
        return FailureKind::Unavailable;
    }
    if lower.contains("copyright") {
        return FailureKind::Copyright;
    }

    FailureKind::Generic(truncate_chars(text, GENERIC_FAILURE_LIMIT))
}

/// Classified message ready for an `error` event.
pub fn failure_message(raw: &str) -> String {
    truncate_chars(&classify_failure(raw).message(), ERROR_MESSAGE_LIMIT)
}
