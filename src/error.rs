use thiserror::Error;

/// Type alias for Result with TriageError
pub type Result<T> = std::result::Result<T, TriageError>;

/// Error types for the classification subsystem
#[derive(Error, Debug)]
pub enum TriageError {
    /// Provider API returned an error
    #[error("Provider API error: {0}")]
    ApiError(String),

    /// Rate limit exceeded - should retry after specified seconds
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// The model answered with no text
    #[error("Empty response from {0}")]
    EmptyResponse(String),

    /// The model answered with text that is not the expected JSON object
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// A required field is absent from the model answer
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Circuit breaker is open (rejecting requests)
    #[error("Circuit breaker open: {message}. Will retry after {retry_after_secs} seconds")]
    CircuitBreakerOpen {
        message: String,
        retry_after_secs: u64,
    },

    /// Caller cancelled a running batch
    #[error("Operation cancelled after {completed} records")]
    OperationCancelled { completed: usize },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Result store errors
    #[error("Store error: {0}")]
    StoreError(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl TriageError {
    /// Check if the error is transient and the provider may recover
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TriageError::RateLimitExceeded { .. }
                | TriageError::ServerError { .. }
                | TriageError::NetworkError(_)
                | TriageError::CircuitBreakerOpen { .. }
        )
    }

    /// Check if the error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// Parse the Retry-After header from an HTTP response
///
/// Accepts the delay-seconds form only. LLM providers never send the
/// HTTP-date form in practice; a missing or unparseable header yields the
/// default of 5 seconds.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> u64 {
    const DEFAULT_RETRY_AFTER: u64 = 5;

    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

/// Map a non-success HTTP status from a provider into a TriageError
pub(crate) fn from_status(
    provider: &str,
    status: reqwest::StatusCode,
    headers: &reqwest::header::HeaderMap,
    body: &str,
) -> TriageError {
    let status_code = status.as_u16();
    let message = format!(
        "{} HTTP {}: {}",
        provider,
        status_code,
        status.canonical_reason().unwrap_or("Unknown")
    );

    match status_code {
        429 => TriageError::RateLimitExceeded {
            retry_after: parse_retry_after(headers),
        },
        500..=599 => TriageError::ServerError {
            status: status_code,
            message,
        },
        _ => {
            let snippet: String = body.chars().take(200).collect();
            TriageError::ApiError(format!("{} - {}", message, snippet))
        }
    }
}

impl From<reqwest::Error> for TriageError {
    fn from(error: reqwest::Error) -> Self {
        // Request URLs may carry credentials and end up in logs
        let error = error.without_url();

        if let Some(status) = error.status() {
            let status_code = status.as_u16();
            if status.is_server_error() {
                return TriageError::ServerError {
                    status: status_code,
                    message: error.to_string(),
                };
            }
            if status_code == 429 {
                return TriageError::RateLimitExceeded { retry_after: 5 };
            }
            return TriageError::ApiError(error.to_string());
        }

        if error.is_decode() {
            return TriageError::MalformedResponse(error.to_string());
        }

        // Timeouts, refused connections, TLS failures
        TriageError::NetworkError(error.to_string())
    }
}
