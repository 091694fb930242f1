//! Error taxonomy.
//!
//! | Type | Raised by | Meaning |
//! |------|-----------|---------|
//! | [`FetchError`] | `fetch` | transport failure, timeout, or non-success HTTP status |
//! | [`ProviderError`] | providers, registry | one provider could not serve a request |
//! | [`ToolError`] | orchestrator, tools | what the transport layer reports to callers |
//! | [`PersistError`] | `store` | snapshot could not be read or written |
//!
//! Per-provider failures are normally folded into warnings by the
//! orchestrator; only [`ToolError`] crosses the transport boundary.

use thiserror::Error;

/// Failure while fetching from an upstream website.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("invalid URL '{0}'")]
    InvalidUrl(String),

    #[error("fetch client for {0} is closed")]
    Closed(String),
}

impl FetchError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Network errors, timeouts, 429 and 5xx are transient; everything
    /// else fails fast.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Transport { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::InvalidUrl(_) | FetchError::Closed(_) => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::Status { status: 404, .. })
    }

    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else if let Some(status) = err.status() {
            FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            }
        } else {
            FetchError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// Failure of a single provider operation.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider initialisation failed: {0}")]
    Initialisation(String),

    #[error("provider '{0}' is not registered")]
    NotRegistered(String),

    #[error("{0}")]
    Fetch(#[from] FetchError),

    #[error("unexpected payload: {0}")]
    Parse(String),

    #[error("{0} not found")]
    NotFound(String),
}

impl ProviderError {
    /// Transient failures are retried inside the provider.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Fetch(err) => err.is_transient(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Parse(err.to_string())
    }
}

/// Errors surfaced through the tool interface.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("provider '{0}' is not registered")]
    ProviderNotRegistered(String),

    /// No candidate could satisfy the request.
    #[error("{message}")]
    ProviderAggregateFailure {
        message: String,
        warnings: Vec<String>,
    },

    /// The single explicitly requested provider failed.
    #[error("{provider_id}: {source}")]
    ProviderOperation {
        provider_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("{0}")]
    Internal(String),
}

impl ToolError {
    /// Accumulated per-provider warnings, when the error carries any.
    pub fn warnings(&self) -> &[String] {
        match self {
            ToolError::ProviderAggregateFailure { warnings, .. } => warnings,
            _ => &[],
        }
    }
}

impl From<ProviderError> for ToolError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotRegistered(id) => ToolError::ProviderNotRegistered(id),
            other => ToolError::Internal(other.to_string()),
        }
    }
}

/// Failure loading or saving the registry snapshot.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("snapshot I/O on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("snapshot writer task failed: {0}")]
    Task(String),
}
