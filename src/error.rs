/*!
 * Error types for the DS3 client
 */

use std::fmt;
use std::io;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Ds3Error>;

#[derive(Debug, Error)]
pub enum Ds3Error {
    /// Local I/O failure (object channels, request bodies)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Network failure reported by the HTTP stack
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server kept answering with temporary redirects
    #[error("Too many redirects: gave up after {0} redirect(s)")]
    TooManyRedirects(u32),

    /// A request body that cannot be re-read was handed to the transport
    #[error("Request body requires rewind support")]
    RequiresRewind,

    /// The server answered with a status the command does not accept
    #[error("Request failed with status {status}: {body}")]
    FailedRequest { status: u16, body: String },

    /// RETRY-LATER answer without a usable Retry-After header
    #[error("Expected Retry-After header in the response")]
    RetryAfterExpected,

    /// Chunk allocation retry budget exhausted
    #[error("Reached the limit of {0} allocation retries")]
    NoMoreRetries(i32),

    /// Response body length disagrees with the declared Content-Length
    #[error(
        "The Content length for {file_name} ({content_length}) not match the number of byte read ({total_bytes})"
    )]
    ContentLengthMismatch {
        file_name: String,
        content_length: u64,
        total_bytes: u64,
    },

    /// Signature could not be computed
    #[error("Signing error: {0}")]
    Signing(String),

    /// Invalid client or job configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// XML payload could not be encoded or decoded
    #[error("XML processing error: {0}")]
    Xml(String),

    /// Listener registration or a second transfer on a job that already started
    #[error("Job {0} is already running")]
    JobRunning(Uuid),

    /// A recovered job does not have the requested direction
    #[error("Cannot recover job: expected a {expected} job but the server reported {actual}")]
    JobRecovery { expected: String, actual: String },

    /// A transfer completion was reported for a range the job never contained
    #[error("Unknown object part {name} (offset {offset}, length {length})")]
    UnknownObjectPart {
        name: String,
        offset: u64,
        length: u64,
    },

    /// A worker task panicked or was cancelled
    #[error("Transfer task failed: {0}")]
    TaskFailed(String),
}

impl Ds3Error {
    /// HTTP status carried by the error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Ds3Error::FailedRequest { status, .. } => Some(*status),
            Ds3Error::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Check if the failure is network-level and worth a job recovery attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Ds3Error::Io(err) => is_io_transient(err),
            Ds3Error::Http(err) => err.is_connect() || err.is_timeout() || err.is_request(),
            Ds3Error::FailedRequest { status, .. } => matches!(status, 500 | 502 | 503 | 504),
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            Ds3Error::Io(_) => ErrorCategory::IoError,
            Ds3Error::Http(_) | Ds3Error::TooManyRedirects(_) => ErrorCategory::Network,
            Ds3Error::RequiresRewind | Ds3Error::InvalidConfig(_) => ErrorCategory::Configuration,
            Ds3Error::FailedRequest { .. } | Ds3Error::RetryAfterExpected | Ds3Error::Xml(_) => {
                ErrorCategory::Protocol
            }
            Ds3Error::NoMoreRetries(_) => ErrorCategory::Retry,
            Ds3Error::ContentLengthMismatch { .. } => ErrorCategory::Integrity,
            Ds3Error::Signing(_) => ErrorCategory::Security,
            Ds3Error::JobRunning(_)
            | Ds3Error::JobRecovery { .. }
            | Ds3Error::UnknownObjectPart { .. }
            | Ds3Error::TaskFailed(_) => ErrorCategory::Job,
        }
    }
}

fn is_io_transient(err: &io::Error) -> bool {
    use io::ErrorKind::*;
    matches!(
        err.kind(),
        ConnectionRefused
            | ConnectionReset
            | ConnectionAborted
            | NotConnected
            | BrokenPipe
            | TimedOut
            | Interrupted
    )
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    IoError,
    Network,
    Configuration,
    Protocol,
    Retry,
    Integrity,
    Security,
    Job,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::IoError => write!(f, "io"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Retry => write!(f, "retry"),
            ErrorCategory::Integrity => write!(f, "integrity"),
            ErrorCategory::Security => write!(f, "security"),
            ErrorCategory::Job => write!(f, "job"),
        }
    }
}

impl From<quick_xml::DeError> for Ds3Error {
    fn from(err: quick_xml::DeError) -> Self {
        Ds3Error::Xml(err.to_string())
    }
}

impl From<quick_xml::SeError> for Ds3Error {
    fn from(err: quick_xml::SeError) -> Self {
        Ds3Error::Xml(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Ds3Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Ds3Error::TaskFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_length_mismatch_display() {
        let err = Ds3Error::ContentLengthMismatch {
            file_name: "object".to_string(),
            content_length: 4,
            total_bytes: 8,
        };
        assert_eq!(
            err.to_string(),
            "The Content length for object (4) not match the number of byte read (8)"
        );
        assert_eq!(err.category(), ErrorCategory::Integrity);
    }

    #[test]
    fn test_status_code() {
        let err = Ds3Error::FailedRequest {
            status: 404,
            body: "not found".to_string(),
        };
        assert_eq!(err.status_code(), Some(404));
        assert_eq!(Ds3Error::RequiresRewind.status_code(), None);
    }

    #[test]
    fn test_retryable() {
        assert!(Ds3Error::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset")).is_retryable());
        assert!(!Ds3Error::Io(io::Error::new(io::ErrorKind::NotFound, "gone")).is_retryable());
        assert!(Ds3Error::FailedRequest {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(!Ds3Error::TooManyRedirects(5).is_retryable());
        assert!(!Ds3Error::NoMoreRetries(3).is_retryable());
        assert!(!Ds3Error::Signing("bad key".to_string()).is_retryable());
    }

    #[test]
    fn test_redirect_display() {
        assert_eq!(
            Ds3Error::TooManyRedirects(5).to_string(),
            "Too many redirects: gave up after 5 redirect(s)"
        );
        assert_eq!(Ds3Error::TooManyRedirects(5).category().to_string(), "network");
    }
}
