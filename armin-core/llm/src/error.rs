use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

/// Longest backend message ever shown to the user
pub const MAX_ERROR_CHARS: usize = 200;

static ERROR_BLOB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\{"error":.*?\}"#).expect("ERROR_BLOB pattern is valid"));

/// Normalized failure of any backend call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("rate limited by the backend")]
    RateLimited,

    #[error("blocked by safety filters")]
    SafetyBlocked,

    #[error("model not found")]
    ModelNotFound,

    #[error("no usable API credential")]
    AuthMissing,

    /// Sanitized backend message, at most [`MAX_ERROR_CHARS`] characters
    #[error("{0}")]
    Unknown(String),
}

impl GenerationError {
    /// Classify a raw backend error payload or status line by known substrings.
    pub fn classify(raw: &str) -> Self {
        debug!(raw = %raw, "Classifying backend error");

        let has = |needles: &[&str]| needles.iter().any(|n| raw.contains(n));

        if has(&["429", "RESOURCE_EXHAUSTED", "quota"]) {
            GenerationError::RateLimited
        } else if has(&["SAFETY"]) {
            GenerationError::SafetyBlocked
        } else if has(&["404", "NOT_FOUND"]) {
            GenerationError::ModelNotFound
        } else if has(&[
            "API_KEY_INVALID",
            "API key not valid",
            "401",
            "UNAUTHENTICATED",
            "PERMISSION_DENIED",
        ]) {
            GenerationError::AuthMissing
        } else {
            GenerationError::Unknown(sanitize(raw))
        }
    }

    pub fn unknown(message: impl AsRef<str>) -> Self {
        GenerationError::Unknown(sanitize(message.as_ref()))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GenerationError::RateLimited)
    }

    /// Text safe to show in the conversation and in notices
    pub fn user_message(&self) -> String {
        match self {
            GenerationError::RateLimited => {
                "⚠️ Usage quota reached. Please try again in a few minutes.".to_string()
            }
            GenerationError::SafetyBlocked => {
                "⚠️ The content was not generated because of safety restrictions.".to_string()
            }
            GenerationError::ModelNotFound => {
                "⚠️ The selected model was not found. Please choose another model in settings."
                    .to_string()
            }
            GenerationError::AuthMissing => {
                "⚠️ No valid API key. Add one in settings or set GEMINI_API_KEY.".to_string()
            }
            GenerationError::Unknown(message) => sanitize(message),
        }
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => GenerationError::classify(&format!("{}: {}", status, error)),
            None => GenerationError::classify(&error.to_string()),
        }
    }
}

impl From<serde_json::Error> for GenerationError {
    fn from(error: serde_json::Error) -> Self {
        GenerationError::unknown(format!("Malformed backend response: {}", error))
    }
}

/// Replace embedded JSON error blobs and truncate.
fn sanitize(raw: &str) -> String {
    let replaced = ERROR_BLOB.replace_all(raw, "server communication error");
    replaced.chars().take(MAX_ERROR_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limited() {
        assert_eq!(
            GenerationError::classify("Request failed with status 429 Too Many Requests"),
            GenerationError::RateLimited
        );
        assert_eq!(
            GenerationError::classify(r#"{"status":"RESOURCE_EXHAUSTED"}"#),
            GenerationError::RateLimited
        );
        assert_eq!(
            GenerationError::classify("You exceeded your current quota"),
            GenerationError::RateLimited
        );
    }

    #[test]
    fn test_classify_safety() {
        assert_eq!(
            GenerationError::classify("finishReason: SAFETY"),
            GenerationError::SafetyBlocked
        );
    }

    #[test]
    fn test_classify_not_found() {
        assert_eq!(
            GenerationError::classify("404 Not Found: models/nope is not found"),
            GenerationError::ModelNotFound
        );
        assert_eq!(
            GenerationError::classify(r#"{"status":"NOT_FOUND"}"#),
            GenerationError::ModelNotFound
        );
    }

    #[test]
    fn test_classify_credential() {
        assert_eq!(
            GenerationError::classify("400 Bad Request: API key not valid. Please pass a valid API key."),
            GenerationError::AuthMissing
        );
        assert_eq!(
            GenerationError::classify(r#"{"reason":"API_KEY_INVALID"}"#),
            GenerationError::AuthMissing
        );
    }

    #[test]
    fn test_rate_limit_wins_over_later_rules() {
        assert_eq!(
            GenerationError::classify("429 while checking SAFETY on a 404 route"),
            GenerationError::RateLimited
        );
    }

    #[test]
    fn test_classify_unknown_truncates() {
        let raw = "x".repeat(500);
        match GenerationError::classify(&raw) {
            GenerationError::Unknown(message) => assert_eq!(message.chars().count(), 200),
            other => panic!("expected Unknown, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_replaces_error_blob() {
        let error = GenerationError::classify(r#"failed: {"error":"boom"} then more"#);
        assert_eq!(
            error,
            GenerationError::Unknown("failed: server communication error then more".to_string())
        );
    }

    #[test]
    fn test_truncation_counts_characters() {
        let raw = "ش".repeat(300);
        let message = GenerationError::classify(&raw).user_message();
        assert_eq!(message.chars().count(), 200);
    }

    #[test]
    fn test_user_message_never_empty() {
        for error in [
            GenerationError::RateLimited,
            GenerationError::SafetyBlocked,
            GenerationError::ModelNotFound,
            GenerationError::AuthMissing,
        ] {
            assert!(!error.user_message().is_empty());
        }
    }
}
