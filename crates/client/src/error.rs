//! Client error types.
//!
//! Two families live here:
//!
//! - [`Error`]: failures surfaced by [`MeteringClient`](crate::MeteringClient)
//!   calls: argument validation failures produced locally, and transport
//!   failures forwarded verbatim from the configured transport.
//! - [`ConfigError`]: configuration values rejected at construction
//!   time, naming the offending field.
//!
//! Cache misses are **not** errors: the caches report "not cached,
//! dispatch remotely" through typed decision enums, and the facade
//! resolves them before the caller ever sees anything.

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by client calls.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// The request failed local validation; the transport was never
    /// invoked.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong with the request.
        message: String,
    },

    /// The transport failed to complete the remote call. Produced by
    /// transport implementations and forwarded unchanged by the client.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
        /// The underlying error, when the transport supplied one.
        #[source]
        source: Option<BoxError>,
    },
}

impl Error {
    /// Creates an `InvalidArgument` error with the given message.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument { message: message.into() }
    }

    /// Creates a `Transport` error with the given message.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into(), source: None }
    }

    /// Creates a `Transport` error with a message and source error.
    #[must_use]
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport { message: message.into(), source: Some(Arc::new(source)) }
    }
}

/// Error returned when a configuration value fails validation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A field that must be positive was zero or negative.
    #[error("invalid {field}: must be positive (got {value})")]
    MustBePositive {
        /// The name of the configuration field.
        field: &'static str,
        /// A human-readable representation of the invalid value.
        value: String,
    },

    /// A required collaborator was not supplied.
    #[error("missing {field}: a {field} must be configured")]
    Missing {
        /// The name of the missing field.
        field: &'static str,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn invalid_argument_displays_message() {
        let err = Error::invalid_argument("operation field is required");
        assert_eq!(err.to_string(), "invalid argument: operation field is required");
    }

    #[test]
    fn transport_preserves_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::transport_with_source("connect failed", io);
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.to_string(), "transport error: connect failed");
    }

    #[test]
    fn config_error_names_the_field() {
        let err = ConfigError::MustBePositive { field: "flush_interval", value: "0ms".into() };
        assert!(err.to_string().contains("flush_interval"));
    }
}
