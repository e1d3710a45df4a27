use thiserror::Error;

/// The session layer's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// No remote identity matches the normalized phone number.
    #[error("No account is registered with this phone number")]
    UserNotFound,

    /// The phone number matched but the password did not.
    #[error("Wrong password")]
    WrongPassword,

    /// The remote identity service could not be reached or answered with an error.
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The remote identity service did not answer within the client-side timeout.
    #[error("Request timed out")]
    Timeout,

    /// The durable store failed to read or write.
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    /// An operation that needs a signed-in identity was called without one.
    #[error("No active session")]
    NoActiveSession,

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A persisted or remote payload could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        AppError::StorageFailure(e.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AppError::Timeout
        } else {
            AppError::NetworkUnavailable(e.to_string())
        }
    }
}

impl From<sonic_rs::Error> for AppError {
    fn from(e: sonic_rs::Error) -> Self {
        AppError::Serialization(e.to_string())
    }
}

impl From<garde::Report> for AppError {
    fn from(report: garde::Report) -> Self {
        AppError::Validation(report.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for AppError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        AppError::Timeout
    }
}

impl AppError {
    /// Whether the UI should offer a plain "try again" for this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::NetworkUnavailable(_) | AppError::Timeout | AppError::StorageFailure(_)
        )
    }

    /// The message shown to the user for this error.
    ///
    /// Credential errors keep their own messages because they lead to
    /// different recovery flows; everything else collapses into a generic
    /// retry prompt.
    pub fn user_message(&self) -> String {
        match self {
            AppError::UserNotFound => {
                tracing::warn!("Login failed: unknown phone number");
                "This phone number is not registered. Register or contact support.".to_string()
            }

            AppError::WrongPassword => {
                tracing::warn!("Login failed: wrong password");
                "Wrong password. Try again or reset your password.".to_string()
            }

            AppError::NetworkUnavailable(msg) => {
                tracing::warn!("Network error: {}", msg);
                "Could not reach the server. Please try again.".to_string()
            }

            AppError::Timeout => {
                tracing::warn!("Network timeout");
                "Could not reach the server. Please try again.".to_string()
            }

            AppError::StorageFailure(msg) => {
                tracing::error!("Storage error: {}", msg);
                "Something went wrong. Please try again.".to_string()
            }

            AppError::NoActiveSession => {
                tracing::debug!("No active session");
                "You are signed out. Please sign in again.".to_string()
            }

            AppError::Validation(msg) => {
                tracing::debug!("Validation error: {}", msg);
                msg.clone()
            }

            AppError::Serialization(msg) => {
                tracing::error!("Serialization error: {}", msg);
                "Something went wrong. Please try again.".to_string()
            }
        }
    }
}
