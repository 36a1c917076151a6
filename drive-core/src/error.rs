use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Invalid folder identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Rate limited: {retry_after:?}")]
    RateLimit { retry_after: Option<u64> },

    #[error("Unsupported file type '{mime_type}' for {file_id}")]
    Unsupported { file_id: String, mime_type: String },

    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },

    #[error("Transient failure: {0}")]
    Transient(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Network(_) => true,
            ProviderError::Server { status, .. } if *status >= 500 => true,
            ProviderError::RateLimit { .. } => true,
            ProviderError::Transient(_) => true,
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimit { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// True when the folder or file exists but the credential cannot see it,
    /// or when it does not exist at all. Drive answers both with 403/404.
    pub fn is_access_denied(&self) -> bool {
        matches!(
            self,
            ProviderError::NotFound(_) | ProviderError::PermissionDenied(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryability() {
        let rate_limit = ProviderError::RateLimit { retry_after: Some(30) };
        assert!(rate_limit.is_retryable());
        assert_eq!(rate_limit.retry_after(), Some(30));

        let denied = ProviderError::PermissionDenied("folder".to_string());
        assert!(!denied.is_retryable());
        assert!(denied.is_access_denied());

        let server = ProviderError::Server {
            status: 503,
            message: "backend unavailable".to_string(),
        };
        assert!(server.is_retryable());

        let client = ProviderError::Server {
            status: 400,
            message: "bad request".to_string(),
        };
        assert!(!client.is_retryable());
        assert!(!client.is_access_denied());
    }
}
