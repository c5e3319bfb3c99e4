//! Error classification
//!
//! Every fallible operation in the engine funnels its errors through the
//! classifier, which tags them as retryable, permanent, or rate-limited.
//! The retry engine consults the tag to decide whether another attempt is
//! worth making.

use std::fmt;
use std::io;
use std::time::Duration;

/// Classification of an error for retry purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient failure, another attempt may succeed
    Retryable,
    /// Definitive failure, retrying will not help
    Permanent,
    /// Server asked us to back off for the carried duration
    RateLimited { retry_after: Duration },
}

impl ErrorCategory {
    /// Whether the retry engine should attempt again
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorCategory::Permanent)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Retryable => write!(f, "retryable"),
            ErrorCategory::Permanent => write!(f, "permanent"),
            ErrorCategory::RateLimited { retry_after } => {
                write!(f, "rate-limited (retry after {}s)", retry_after.as_secs())
            }
        }
    }
}

/// An error carrying its retry classification
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ClassifiedError {
    /// Human-readable description, preserved through retry layers
    pub message: String,
    /// Retry classification
    pub category: ErrorCategory,
}

impl ClassifiedError {
    /// Create a retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            category: ErrorCategory::Retryable,
        }
    }

    /// Create a permanent error
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            category: ErrorCategory::Permanent,
        }
    }

    /// Create a rate-limited error with the server-provided delay
    pub fn rate_limited(message: impl Into<String>, retry_after: Duration) -> Self {
        Self {
            message: message.into(),
            category: ErrorCategory::RateLimited { retry_after },
        }
    }

    /// Classify an arbitrary error value
    ///
    /// Precedence: explicit classification on the error itself, then io
    /// error kinds, then message substrings, then permanent as the
    /// conservative default.
    pub fn classify(err: &(dyn std::error::Error + 'static)) -> Self {
        // Already classified: keep the original category
        if let Some(classified) = err.downcast_ref::<ClassifiedError>() {
            return classified.clone();
        }

        // Walk the source chain looking for an io error
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
        while let Some(e) = current {
            if let Some(io_err) = e.downcast_ref::<io::Error>() {
                return Self {
                    message: err.to_string(),
                    category: classify_io(io_err),
                };
            }
            current = e.source();
        }

        Self {
            message: err.to_string(),
            category: classify_message(&err.to_string()),
        }
    }
}

impl From<io::Error> for ClassifiedError {
    fn from(err: io::Error) -> Self {
        Self {
            category: classify_io(&err),
            message: err.to_string(),
        }
    }
}

/// Classify an io error by kind, falling back to raw errno inspection
pub fn classify_io(err: &io::Error) -> ErrorCategory {
    use io::ErrorKind;

    match err.kind() {
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::TimedOut
        | ErrorKind::WouldBlock
        | ErrorKind::Interrupted
        | ErrorKind::UnexpectedEof => ErrorCategory::Retryable,
        ErrorKind::PermissionDenied
        | ErrorKind::NotFound
        | ErrorKind::AlreadyExists
        | ErrorKind::InvalidInput
        | ErrorKind::InvalidData => ErrorCategory::Permanent,
        _ => classify_errno(err.raw_os_error()),
    }
}

/// Syscall-level classification for kinds std does not map
fn classify_errno(errno: Option<i32>) -> ErrorCategory {
    // EAGAIN, EINTR, EBUSY, ENFILE, EMFILE, ENOMEM, ENOBUFS, ETIMEDOUT
    const TRANSIENT: &[i32] = &[11, 4, 16, 23, 24, 12, 105, 110];
    match errno {
        Some(code) if TRANSIENT.contains(&code) => ErrorCategory::Retryable,
        _ => ErrorCategory::Permanent,
    }
}

/// Classify an HTTP status code, honoring a `Retry-After` header value
pub fn classify_http_status(status: u16, retry_after: Option<u64>) -> ErrorCategory {
    match status {
        429 => ErrorCategory::RateLimited {
            retry_after: Duration::from_secs(retry_after.unwrap_or(30)),
        },
        500 | 502 | 503 | 504 | 529 => ErrorCategory::Retryable,
        400 | 401 | 403 | 404 => ErrorCategory::Permanent,
        s if s >= 500 => ErrorCategory::Retryable,
        _ => ErrorCategory::Permanent,
    }
}

/// Substring-based classification for errors carrying only a message
pub fn classify_message(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();

    const RETRYABLE: &[&str] = &["timeout", "temporary", "rate limit", "overloaded"];
    const PERMANENT: &[&str] = &[
        "permission denied",
        "forbidden",
        "not found",
        "invalid",
        "unauthorized",
    ];

    if RETRYABLE.iter().any(|m| lower.contains(m)) {
        return ErrorCategory::Retryable;
    }
    if PERMANENT.iter().any(|m| lower.contains(m)) {
        return ErrorCategory::Permanent;
    }

    // Unknown errors do not loop
    ErrorCategory::Permanent
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_classification_wins() {
        let err = ClassifiedError::retryable("connection flaked");
        let classified = ClassifiedError::classify(&err);
        assert_eq!(classified.category, ErrorCategory::Retryable);
        assert_eq!(classified.message, "connection flaked");
    }

    #[test]
    fn test_io_connection_refused_is_retryable() {
        let err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(classify_io(&err), ErrorCategory::Retryable);
    }

    #[test]
    fn test_io_not_found_is_permanent() {
        let err = io::Error::new(io::ErrorKind::NotFound, "missing");
        assert_eq!(classify_io(&err), ErrorCategory::Permanent);
    }

    #[test]
    fn test_errno_eagain_is_retryable() {
        let err = io::Error::from_raw_os_error(11);
        assert_eq!(classify_io(&err), ErrorCategory::Retryable);
    }

    #[test]
    fn test_http_429_carries_retry_after() {
        let cat = classify_http_status(429, Some(12));
        assert_eq!(
            cat,
            ErrorCategory::RateLimited {
                retry_after: Duration::from_secs(12)
            }
        );
    }

    #[test]
    fn test_http_429_default_retry_after() {
        match classify_http_status(429, None) {
            ErrorCategory::RateLimited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(30));
            }
            other => panic!("expected rate-limited, got {other}"),
        }
    }

    #[test]
    fn test_http_529_is_retryable() {
        assert_eq!(classify_http_status(529, None), ErrorCategory::Retryable);
    }

    #[test]
    fn test_http_4xx_is_permanent() {
        for status in [400, 401, 403, 404] {
            assert_eq!(classify_http_status(status, None), ErrorCategory::Permanent);
        }
    }

    #[test]
    fn test_message_substrings() {
        assert_eq!(classify_message("Request TIMEOUT"), ErrorCategory::Retryable);
        assert_eq!(classify_message("server overloaded"), ErrorCategory::Retryable);
        assert_eq!(
            classify_message("Permission denied: /etc"),
            ErrorCategory::Permanent
        );
        assert_eq!(classify_message("resource not found"), ErrorCategory::Permanent);
    }

    #[test]
    fn test_unknown_is_permanent() {
        assert_eq!(classify_message("something odd happened"), ErrorCategory::Permanent);
    }

    #[test]
    fn test_io_error_in_source_chain() {
        #[derive(Debug, thiserror::Error)]
        #[error("wrapper: {0}")]
        struct Wrapper(#[source] io::Error);

        let err = Wrapper(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        let classified = ClassifiedError::classify(&err);
        assert_eq!(classified.category, ErrorCategory::Retryable);
    }
}
