//! Error types and error-code classification for remote API calls.

use thiserror::Error;

/// Codes the platform returns when a caller is being throttled.
pub const RATE_LIMIT_CODES: [i64; 3] = [
    6,  // too many requests per second
    9,  // flood control
    29, // method rate limit reached
];

/// Codes for which retrying with the same credential is pointless.
pub const PERMANENT_CODES: [i64; 11] = [
    5,   // authorization failed
    7,   // permission denied
    15,  // access denied
    18,  // user deleted or banned
    27,  // group token invalid
    28,  // application token invalid
    100, // invalid parameter
    113, // invalid user id
    203, // access to group denied
    917, // no access to the conversation
    925, // not an admin of the conversation
];

/// How the retry loop should react to a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Back off exponentially and retry the same credential.
    Transient,
    /// Sleep proportionally to the wait count and retry without spending an attempt.
    RateLimit,
    /// Give up on this credential for this call.
    Permanent,
}

/// Classify a remote error code.
///
/// Codes outside both catalogs are treated as transient.
pub fn classify_code(code: i64) -> ErrorClass {
    if RATE_LIMIT_CODES.contains(&code) {
        ErrorClass::RateLimit
    } else if PERMANENT_CODES.contains(&code) {
        ErrorClass::Permanent
    } else {
        ErrorClass::Transient
    }
}

/// Errors that can occur when calling the remote API.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Network failure or a remote error worth retrying.
    #[error("transient error{}: {message}", code_suffix(*.code))]
    Transient { code: Option<i64>, message: String },

    /// The platform is throttling this credential.
    #[error("rate limited ({code}): {message}")]
    RateLimited { code: i64, message: String },

    /// Retrying with the same credential will not help.
    #[error("permanent error ({code}): {message}")]
    Permanent { code: i64, message: String },

    /// The response did not have the expected shape.
    #[error("malformed response from {method}: {message}")]
    Decode { method: String, message: String },
}

fn code_suffix(code: Option<i64>) -> String {
    code.map(|c| format!(" ({c})")).unwrap_or_default()
}

impl ApiError {
    /// Build an error from a remote `{error_code, error_msg}` body.
    pub fn from_remote(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        match classify_code(code) {
            ErrorClass::RateLimit => Self::RateLimited { code, message },
            ErrorClass::Permanent => Self::Permanent { code, message },
            ErrorClass::Transient => Self::Transient {
                code: Some(code),
                message,
            },
        }
    }

    /// Create a network error.
    #[inline]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Transient {
            code: None,
            message: message.into(),
        }
    }

    /// Create a decode error for a method.
    #[inline]
    pub fn decode(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Retry class of this error. Malformed payloads are not retried.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transient { .. } => ErrorClass::Transient,
            Self::RateLimited { .. } => ErrorClass::RateLimit,
            Self::Permanent { .. } | Self::Decode { .. } => ErrorClass::Permanent,
        }
    }

    /// The remote error code, if the platform returned one.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Transient { code, .. } => *code,
            Self::RateLimited { code, .. } | Self::Permanent { code, .. } => Some(*code),
            Self::Decode { .. } => None,
        }
    }

    #[inline]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Extract a short error message suitable for progress lines.
#[inline]
pub fn short_error_message(e: &impl std::error::Error) -> String {
    let full = e.to_string();
    full.lines().next().unwrap_or(&full).to_string()
}

/// Result type for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogs_do_not_overlap() {
        for code in RATE_LIMIT_CODES {
            assert!(!PERMANENT_CODES.contains(&code), "code {code} in both sets");
        }
    }

    #[test]
    fn classify_known_codes() {
        assert_eq!(classify_code(6), ErrorClass::RateLimit);
        assert_eq!(classify_code(29), ErrorClass::RateLimit);
        assert_eq!(classify_code(5), ErrorClass::Permanent);
        assert_eq!(classify_code(925), ErrorClass::Permanent);
        assert_eq!(classify_code(10), ErrorClass::Transient);
        assert_eq!(classify_code(13), ErrorClass::Transient);
    }

    #[test]
    fn unknown_codes_are_transient() {
        assert_eq!(classify_code(4242), ErrorClass::Transient);
    }

    #[test]
    fn from_remote_picks_variant() {
        assert!(ApiError::from_remote(6, "slow down").is_rate_limited());
        assert!(matches!(
            ApiError::from_remote(15, "denied"),
            ApiError::Permanent { code: 15, .. }
        ));
        assert_eq!(ApiError::from_remote(10, "oops").code(), Some(10));
    }

    #[test]
    fn decode_errors_are_not_retried() {
        let err = ApiError::decode("groups.getMembers", "missing items");
        assert_eq!(err.class(), ErrorClass::Permanent);
        assert_eq!(err.code(), None);
    }

    #[test]
    fn display_includes_code_when_present() {
        assert_eq!(
            ApiError::from_remote(10, "internal").to_string(),
            "transient error (10): internal"
        );
        assert_eq!(
            ApiError::network("connection reset").to_string(),
            "transient error: connection reset"
        );
    }

    #[test]
    fn short_error_message_takes_first_line() {
        let err = ApiError::network("line one\nline two");
        assert_eq!(short_error_message(&err), "transient error: line one");
    }
}
