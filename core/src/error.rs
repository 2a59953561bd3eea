use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("Request to '{url}' failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to '{url}' returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Vulnerability feed error: {message}")]
    Feed { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Option store error: {message}")]
    Store { message: String },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Invalid or missing cron key")]
    Forbidden,
}

impl WatchdogError {
    /// HTTP status carried by the error, if the remote end answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            WatchdogError::HttpStatus { status, .. } => Some(*status),
            WatchdogError::Http { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, WatchdogError>;
