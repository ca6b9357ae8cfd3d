//! Error types for the agent execution context runtime

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the crate.
///
/// Mirrors the error taxonomy a Context must support: client input
/// errors are raised before a Context exists, precondition violations
/// fail one operation and leave the Context usable, producer errors
/// are only ever captured as data inside a fan-out result (never
/// propagated across the fan-out boundary), and the rest are fatal
/// runtime errors that propagate out of the Context.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error (connector transport failures)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Output transport I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Client input error: missing assistant_id, empty messages, malformed JSON
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Precondition violation: delta on a non-streaming message, End on an
    /// unknown id, wrong-type delta payload. Fails the one operation only.
    #[error("Precondition violation: {0}")]
    Precondition(String),

    /// Producer error: LLM connector, MCP tool, or sub-agent failure.
    /// Captured as the `error` field of a fan-out result entry.
    #[error("Producer error: {0}")]
    Producer(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// API error from a connector's remote server
    #[error("API error: {0}")]
    Api(String),

    /// Streaming error
    #[error("Streaming error: {0}")]
    Stream(String),

    /// Tool execution error
    #[error("Tool execution error: {0}")]
    Tool(String),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Cooperative cancellation observed; not a persistence-layer error
    #[error("Cancelled")]
    Cancelled,

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Error::Precondition(msg.into())
    }

    pub fn producer(msg: impl Into<String>) -> Self {
        Error::Producer(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn api(msg: impl Into<String>) -> Self {
        Error::Api(msg.into())
    }

    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    pub fn timeout() -> Self {
        Error::Timeout
    }

    /// True for producer-kind errors a fan-out coordinator captures as data
    /// rather than ever letting escape the coordinator boundary.
    pub fn is_producer_kind(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::Api(_) | Error::Tool(_) | Error::Producer(_) | Error::Timeout
        )
    }
}
