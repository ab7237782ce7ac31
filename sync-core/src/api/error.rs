use thiserror::Error;

#[derive(Error, Debug)]
pub enum RestError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Token expired or invalid")]
    TokenExpired,

    #[error("Rate limited: {retry_after:?}")]
    RateLimit { retry_after: Option<u64> },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Record not found")]
    NotFound,

    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl RestError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RestError::Network(_) => true,
            RestError::Server { status, .. } if *status >= 500 => true,
            RestError::RateLimit { .. } => true,
            _ => false,
        }
    }

    /// True when the service could not be reached at all
    pub fn is_connection_failure(&self) -> bool {
        match self {
            RestError::Network(e) => e.is_connect() || e.is_timeout(),
            RestError::Server { status, .. } => *status == 502 || *status == 503,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RestError>;
