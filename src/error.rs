//! Error types for AlertIQ.

/// Top-level error type for the processor.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Audit log error: {0}")]
    Audit(#[from] AuditError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mailbox provider errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Authentication failed: {reason}")]
    AuthFailed { reason: String },

    #[error("Mailbox request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Failed to decode message {message_id}: {reason}")]
    Decode { message_id: String, reason: String },

    #[error("Failed to build outgoing message: {0}")]
    MessageBuild(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Classifier provider errors.
///
/// `InvalidResponse` is the one non-retried variant: the model answered but
/// the answer did not satisfy the response contract.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Empty response from provider {provider}")]
    EmptyResponse { provider: String },

    #[error("Invalid response: {reason}")]
    InvalidResponse { reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClassifierError {
    /// Whether the shared backoff helper should retry this error.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidResponse { .. } | Self::Json(_))
    }
}

/// Notification delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    MessageBuild(String),

    #[error("SMTP transport error: {0}")]
    Smtp(String),

    #[error("Send via mailbox API failed: {0}")]
    MailboxSend(#[from] MailboxError),
}

/// Audit store errors.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Failed to create audit store at {path}: {reason}")]
    Create { path: String, reason: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the processor.
pub type Result<T> = std::result::Result<T, Error>;
