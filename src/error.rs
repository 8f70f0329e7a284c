use thiserror::Error;

/// Failures that abort the run before any report is written.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("could not parse billing page: {reason} (page text: {snippet:?})")]
    Parse { reason: String, snippet: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Failures posting the notification comment. Logged, never fatal.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("comment request failed: {0}")]
    Transport(String),

    #[error("comment API rejected the request with HTTP {status}")]
    Rejected { status: u16 },
}

pub type Result<T> = std::result::Result<T, MonitorError>;
