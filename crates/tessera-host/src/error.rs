//! Error types for the host boundary.

use thiserror::Error;

/// Result type for host-boundary operations.
pub type Result<T> = std::result::Result<T, HostError>;

/// Errors raised by the origin adapters.
#[derive(Error, Debug)]
pub enum HostError {
    /// Transport-level failure
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Remote server answered with a non-success status
    #[error("Remote import failed: HTTP {status} from {locator}")]
    Status {
        /// The locator that was fetched
        locator: String,
        /// The HTTP status code
        status: u16,
    },

    /// Remote source served with a content type the pipeline does not
    /// accept
    #[error("Unsupported content type '{content_type}' from {locator}")]
    UnsupportedContentType {
        /// The locator that was fetched
        locator: String,
        /// The content type the server reported
        content_type: String,
    },

    /// Locator could not be parsed
    #[error("Invalid locator: {0}")]
    InvalidLocator(#[from] url::ParseError),
}
