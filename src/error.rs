//! Crate-level error taxonomy.
//!
//! Three layers: [`RequestError`] describes one failed network attempt
//! against a collaborator, [`RetryError`] is what the backoff wrapper
//! surfaces once its budget is spent (or the failure is non-retryable),
//! and [`ChatError`] is what lifecycle operations return to the caller.

use thiserror::Error;

/// Failure of a single network operation against an external collaborator.
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    /// The collaborator replied with HTTP 429.
    #[error("rate limited (HTTP 429)")]
    RateLimited {
        /// Seconds from the `Retry-After` header, when the server sent one.
        retry_after: Option<u64>,
    },
    /// Any other non-2xx HTTP response.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    /// Transport-level failure: connect, timeout, DNS, broken stream.
    #[error("network error: {0}")]
    Network(String),
    /// The response body could not be parsed as the expected shape.
    #[error("malformed response: {0}")]
    Json(String),
}

impl RequestError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RequestError::RateLimited { .. })
    }

    /// A 4xx response other than 429. These are retried only when the
    /// policy opts in (see [`crate::retry::RetryPolicy::retry_client_errors`]).
    pub fn is_client_error(&self) -> bool {
        matches!(self, RequestError::Http { status, .. } if (400..500).contains(status))
    }
}

/// Outcome of running an operation through the backoff wrapper.
#[derive(Debug, Clone, Error)]
pub enum RetryError {
    /// Every attempt failed; carries the last underlying error.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: RequestError,
    },
    /// The failure was classified non-retryable; no backoff was applied.
    #[error("request failed: {0}")]
    Fatal(#[source] RequestError),
}

impl RetryError {
    /// The underlying error of the final attempt, whichever variant.
    pub fn last_error(&self) -> &RequestError {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Fatal(err) => err,
        }
    }
}

/// Errors surfaced by room-lifecycle operations.
///
/// `Auth`, `Capacity` and `NoPeer` are terminal for the attempt and are
/// never fed through the retry wrapper.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("wrong password for room '{room_id}'")]
    Auth { room_id: String },
    #[error("room '{room_id}' is full ({max_users} users)")]
    Capacity { room_id: String, max_users: usize },
    #[error("no peer present in room '{room_id}'")]
    NoPeer { room_id: String },
    /// The translation collaborator failed after retries and the fallback
    /// policy is [`crate::lifecycle::TranslationFallback::Fail`].
    #[error("translation failed: {0}")]
    Translation(#[source] RetryError),
    /// A datastore operation failed after retries.
    #[error("datastore operation failed: {0}")]
    Store(#[from] RetryError),
    /// A stored record did not deserialize into the expected shape.
    #[error("malformed record at '{path}': {detail}")]
    Corrupt { path: String, detail: String },
    #[error("not currently in a room")]
    NoSession,
}

/// Errors from loading the TOML configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_is_rate_limited() {
        let err = RequestError::RateLimited { retry_after: Some(30) };
        assert!(err.is_rate_limited());
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_http_404_is_client_error() {
        let err = RequestError::Http { status: 404, body: "not found".to_string() };
        assert!(err.is_client_error());
        assert!(!err.is_rate_limited());
    }

    #[test]
    fn test_http_500_is_not_client_error() {
        let err = RequestError::Http { status: 500, body: String::new() };
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_http_429_variant_is_not_client_error() {
        // 429 gets its own variant; the Http variant never carries it.
        let err = RequestError::RateLimited { retry_after: None };
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_network_is_neither() {
        let err = RequestError::Network("connection refused".to_string());
        assert!(!err.is_client_error());
        assert!(!err.is_rate_limited());
    }

    #[test]
    fn test_retry_error_last_error_exhausted() {
        let err = RetryError::Exhausted {
            attempts: 3,
            last: RequestError::Network("reset".to_string()),
        };
        assert!(matches!(err.last_error(), RequestError::Network(_)));
    }

    #[test]
    fn test_retry_error_last_error_fatal() {
        let err = RetryError::Fatal(RequestError::Http { status: 404, body: String::new() });
        assert!(err.last_error().is_client_error());
    }

    #[test]
    fn test_exhausted_display_mentions_attempts() {
        let err = RetryError::Exhausted {
            attempts: 3,
            last: RequestError::RateLimited { retry_after: None },
        };
        let s = err.to_string();
        assert!(s.contains("3 attempts"), "display: {s}");
    }

    #[test]
    fn test_chat_error_display_auth() {
        let err = ChatError::Auth { room_id: "room123".to_string() };
        assert!(err.to_string().contains("room123"));
    }

    #[test]
    fn test_chat_error_display_capacity() {
        let err = ChatError::Capacity { room_id: "r".to_string(), max_users: 2 };
        let s = err.to_string();
        assert!(s.contains("full"), "display: {s}");
        assert!(s.contains('2'), "display: {s}");
    }

    #[test]
    fn test_chat_error_from_retry_error() {
        let retry = RetryError::Fatal(RequestError::Network("down".to_string()));
        let chat: ChatError = retry.into();
        assert!(matches!(chat, ChatError::Store(_)));
    }

    #[test]
    fn test_errors_implement_std_error() {
        fn assert_error<E: std::error::Error>(_: &E) {}
        assert_error(&RequestError::Network("x".to_string()));
        assert_error(&RetryError::Fatal(RequestError::Network("x".to_string())));
        assert_error(&ChatError::NoSession);
    }
}
