use std::time::Duration;
use thiserror::Error;

use crate::order::OrderState;

/// Errors that abort a whole call. These indicate a malformed request or an
/// unusable environment rather than a condition worth retrying.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Unsupported item type: {0}")]
    UnsupportedItemType(String),

    #[error("Bundle '{bundle}' is not available for item type '{item_type}'")]
    InvalidBundle { item_type: String, bundle: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Planet API key not provided. Set PL_API_KEY or pass an explicit key")]
    MissingApiKey,

    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(#[source] ProviderError),

    #[error("Unable to serialize metadata: {0}")]
    Serialization(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Outcome of a failed call against the remote service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Service unreachable: {0}")]
    Unreachable(String),

    #[error("Rate limited by remote service")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Request rejected {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Rate limiting, 5xx and connection failures may clear up on their own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Server { .. } | Self::Unreachable(_)
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Maps an HTTP status and response body to the matching variant.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Unauthorized(message),
            429 => Self::RateLimited { retry_after: None },
            500..=599 => Self::Server { status, message },
            _ => Self::Rejected { status, message },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), err.to_string());
        }
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        Self::Unreachable(err.to_string())
    }
}

/// Per-order problem, recorded on the order's report instead of aborting the batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrderError {
    #[error("Order submission failed: {0}")]
    Submission(#[source] ProviderError),

    #[error("Order {order_id} still {last_state} after waiting {waited:?}")]
    Timeout {
        order_id: String,
        last_state: OrderState,
        waited: Duration,
    },

    #[error("Unable to poll order {order_id}: {source}")]
    Status {
        order_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("Order {order_id} finished in state {state}")]
    Failed { order_id: String, state: OrderState },
}

/// Per-archive problem, recorded on the matching `DownloadResult`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DownloadError {
    #[error("Order {order_id} is not ready for download (state: {state})")]
    OrderNotReady { order_id: String, state: OrderState },

    #[error("Order {0} completed without any archives")]
    NoArchives(String),

    #[error("Transfer failed: {0}")]
    Transfer(#[source] ProviderError),

    #[error("Incomplete transfer: expected {expected} bytes, received {received}")]
    Incomplete { expected: u64, received: u64 },

    #[error("Unable to write archive: {0}")]
    Io(String),
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
