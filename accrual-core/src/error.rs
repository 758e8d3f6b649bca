//! Error types for the accrual core

use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

/// Result type for accrual operations
pub type Result<T> = std::result::Result<T, Error>;

/// Accrual core errors
#[derive(Error, Debug)]
pub enum Error {
    /// Order number fails the Luhn check or is not numeric
    #[error("Invalid order number: {0:?}")]
    InvalidOrderNumber(String),

    /// Malformed request input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Order already registered by another user
    #[error("Order {0} was registered by another user")]
    OrderConflict(String),

    /// Withdrawal exceeds the current balance
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    /// Provider unreachable or answered with an unexpected status
    #[error("Accrual provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Provider asked us to back off
    #[error("Accrual provider throttled, retry after {}s", retry_after.as_secs())]
    ProviderThrottled { retry_after: Duration },

    /// Provider call exceeded its deadline
    #[error("Accrual provider timed out after {0:?}")]
    ProviderTimeout(Duration),

    /// Provider body could not be interpreted
    #[error("Malformed provider response: {0}")]
    MalformedProviderResponse(String),

    /// Storage failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Provider-side failures that are retried on the next poll
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::ProviderUnavailable(_)
                | Error::ProviderThrottled { .. }
                | Error::ProviderTimeout(_)
                | Error::MalformedProviderResponse(_)
        )
    }

    /// HTTP status the transport layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidOrderNumber(_) => 422,
            Error::Validation(_) => 400,
            Error::OrderConflict(_) => 409,
            Error::InsufficientFunds { .. } => 402,
            Error::ProviderUnavailable(_) => 502,
            Error::ProviderThrottled { .. } => 502,
            Error::ProviderTimeout(_) => 504,
            Error::MalformedProviderResponse(_) => 502,
            Error::Database(_) => 500,
            Error::Config(_) => 500,
            Error::Internal(_) => 500,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            Error::InvalidOrderNumber(_) => "invalid_order_number",
            Error::Validation(_) => "validation_error",
            Error::OrderConflict(_) => "order_conflict",
            Error::InsufficientFunds { .. } => "insufficient_funds",
            Error::ProviderUnavailable(_) => "provider_unavailable",
            Error::ProviderThrottled { .. } => "provider_throttled",
            Error::ProviderTimeout(_) => "provider_timeout",
            Error::MalformedProviderResponse(_) => "provider_response_error",
            Error::Database(_) => "database_error",
            Error::Config(_) => "config_error",
            Error::Internal(_) => "internal_error",
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}
