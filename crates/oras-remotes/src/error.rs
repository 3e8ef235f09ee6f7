//! Error types for registry operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Errors that can occur while talking to a registry.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The reference text does not match `host/namespace[:tag|@digest]`.
    #[error("malformed reference '{reference}': {reason}")]
    MalformedReference {
        /// Reference string.
        reference: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The reference names a different namespace than the registry serves.
    #[error("namespace '{actual}' does not match registry namespace '{expected}'")]
    NamespaceMismatch {
        /// Namespace the registry was built for.
        expected: String,
        /// Namespace found in the reference.
        actual: String,
    },

    /// The reference names a different host than the registry serves.
    #[error("host '{actual}' does not match registry host '{expected}'")]
    HostMismatch {
        /// Host the registry was built for.
        expected: String,
        /// Host found in the reference.
        actual: String,
    },

    /// The registry answered with a status the operation does not accept.
    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus {
        /// HTTP status code.
        status: u16,
        /// Request URL.
        url: String,
    },

    /// No credential resolves the challenge.
    #[error("access denied for realm '{realm}', service '{service}', scope '{scope}': {reason}")]
    AccessDenied {
        /// Token realm.
        realm: String,
        /// Token service.
        service: String,
        /// Requested scope.
        scope: String,
        /// Why access could not be obtained.
        reason: String,
    },

    /// The token endpoint refused or returned garbage.
    #[error("token exchange with {realm} failed: {reason}")]
    TokenExchangeFailed {
        /// Token realm.
        realm: String,
        /// Failure reason.
        reason: String,
    },

    /// No standing credential exists for the user at the host.
    #[error("no credential for user '{username}' at {host}")]
    NotLoggedIn {
        /// Registry host.
        host: String,
        /// Username.
        username: String,
    },

    /// A digest string failed validation.
    #[error("invalid digest '{digest}'")]
    InvalidDigest {
        /// Digest string.
        digest: String,
    },

    /// The server reported a different digest than expected.
    #[error("got digest {actual}, expected {expected}")]
    DigestMismatch {
        /// Expected digest.
        expected: String,
        /// Digest reported by the server.
        actual: String,
    },

    /// Transferred or advertised size disagrees with the descriptor.
    #[error("unexpected size {actual}, expected {expected}")]
    SizeMismatch {
        /// Expected size in bytes.
        expected: u64,
        /// Actual size in bytes.
        actual: u64,
    },

    /// The content is already present in the registry.
    #[error("{reference}: already exists")]
    AlreadyExists {
        /// Reference that already exists.
        reference: String,
    },

    /// The operation is outside what this client implements.
    #[error("{operation} has not been implemented")]
    NotImplemented {
        /// Operation name.
        operation: String,
    },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// A `WWW-Authenticate` header could not be understood.
    #[error("invalid authentication challenge: {header}")]
    InvalidChallenge {
        /// Raw header value.
        header: String,
    },

    /// A URL could not be formatted or parsed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// URL string.
        url: String,
    },

    /// Failed to connect to the registry.
    #[error("failed to connect to {url}: {source}")]
    ConnectionFailed {
        /// Target URL.
        url: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// Any other HTTP-layer failure.
    #[error("HTTP error: {source}")]
    Http {
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {source}")]
    Json {
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// File I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// File path, empty when unknown.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A credential-helper subprocess failed.
    #[error("credential helper '{command}' failed: {message}")]
    Helper {
        /// Helper invocation.
        command: String,
        /// Captured output or failure reason.
        message: String,
    },

    /// The background push ended before the writer committed.
    #[error("upload of {reference} was aborted before commit")]
    UploadAborted {
        /// Reference being pushed.
        reference: String,
    },

    /// A streamed request body cannot be sent a second time.
    #[error("retry request, cannot reset the stream")]
    StreamConsumed,

    /// Remote uploads cannot be truncated.
    #[error("cannot truncate remote upload")]
    TruncateUnsupported,
}

impl RemoteError {
    /// Returns true when the registry answered 404.
    ///
    /// A registry without the referrers extension surfaces here.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::UnexpectedStatus { status: 404, .. })
    }

    /// Returns true if retrying the whole operation might succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } | Self::UploadAborted { .. } => true,
            Self::UnexpectedStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn unexpected(response: &reqwest::Response) -> Self {
        Self::UnexpectedStatus {
            status: response.status().as_u16(),
            url: response.url().to_string(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::ConnectionFailed {
                url: err
                    .url()
                    .map_or_else(|| "unknown".to_string(), ToString::to_string),
                source: err,
            }
        } else {
            Self::Http { source: err }
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json { source: err }
    }
}

impl From<std::io::Error> for RemoteError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<url::ParseError> for RemoteError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl {
            url: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_unexpected_status() {
        let err = RemoteError::UnexpectedStatus {
            status: 404,
            url: "https://registry.example.com/v2/library/app/manifests/v1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unexpected HTTP status 404 from https://registry.example.com/v2/library/app/manifests/v1"
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn test_error_display_digest_mismatch() {
        let err = RemoteError::DigestMismatch {
            expected: "sha256:aaa".to_string(),
            actual: "sha256:bbb".to_string(),
        };
        assert_eq!(err.to_string(), "got digest sha256:bbb, expected sha256:aaa");
    }

    #[test]
    fn test_retryable() {
        let throttled = RemoteError::UnexpectedStatus {
            status: 429,
            url: String::new(),
        };
        let denied = RemoteError::AccessDenied {
            realm: "r".to_string(),
            service: "s".to_string(),
            scope: String::new(),
            reason: "no credential".to_string(),
        };
        assert!(throttled.is_retryable());
        assert!(!denied.is_retryable());
        assert!(!RemoteError::Cancelled.is_retryable());
    }
}
