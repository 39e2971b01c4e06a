//! Error types for the search library.

use thiserror::Error;

/// Result type alias for search operations.
pub type Result<T> = std::result::Result<T, SearchError>;

/// Errors that can occur during search operations.
#[derive(Error, Debug)]
pub enum SearchError {
    /// Caller supplied an invalid argument or configuration value.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a status the engine cannot work with.
    #[error("Unexpected HTTP status {status} from {url}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// URL of the response.
        url: String,
    },

    /// Reading an image file or writing a download failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The response did not have the shape the engine expects.
    #[error("[{engine}] {message}{}", .details.as_ref().map(|d| format!("\n Details: {d}")).unwrap_or_default())]
    Parsing {
        /// Engine that failed to parse.
        engine: String,
        /// Human-readable description.
        message: String,
        /// Optional extra context (offending fragment, key path).
        details: Option<String>,
    },

    /// URL parsing error.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl SearchError {
    /// Builds a parsing error for `engine`.
    pub fn parsing(engine: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parsing {
            engine: engine.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Attaches details to a parsing error. Other variants are returned as-is.
    pub fn with_details(self, details: impl Into<String>) -> Self {
        match self {
            Self::Parsing {
                engine, message, ..
            } => Self::Parsing {
                engine,
                message,
                details: Some(details.into()),
            },
            other => other,
        }
    }

    /// Wraps a JSON decoding failure as a parsing error for `engine`.
    pub fn json(engine: impl Into<String>, err: serde_json::Error) -> Self {
        Self::parsing(engine, "response is not valid JSON").with_details(err.to_string())
    }

    /// Wraps a JSON shape mismatch (missing or mistyped field) for `engine`.
    pub fn shape(engine: impl Into<String>, err: serde_json::Error) -> Self {
        Self::parsing(engine, "unexpected response shape").with_details(err.to_string())
    }

    /// Returns true for network, status and I/O failures.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Status { .. } | Self::Io(_))
    }

    /// Returns the engine name carried by a parsing error.
    pub fn engine(&self) -> Option<&str> {
        match self {
            Self::Parsing { engine, .. } => Some(engine),
            _ => None,
        }
    }
}
