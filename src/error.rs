use thiserror::Error;

/// Type alias for Result with TriageError
pub type Result<T> = std::result::Result<T, TriageError>;

/// Error taxonomy for the triage engine
#[derive(Error, Debug)]
pub enum TriageError {
    /// Malformed or out-of-range request; rejected before any job is created
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced batch does not exist
    #[error("Batch not found: {0}")]
    NotFound(String),

    /// Credential refresh failed, or the retried call still failed authorization
    #[error("Reauthentication required: {0}")]
    RequiresReauth(String),

    /// Provider signalled that the access token is no longer valid
    #[error("Authorization expired: {0}")]
    AuthExpired(String),

    /// Mail provider returned an error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Network-related error (connection issues, transport failures)
    #[error("Network error: {0}")]
    Network(String),

    /// Remote call exceeded its deadline
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    /// Classification backend errors; contained inside the engine
    #[error("Classification error: {0}")]
    Classification(String),

    /// Label-related errors
    #[error("Label error: {0}")]
    Label(String),

    /// Persistence layer errors
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TriageError {
    /// Check whether the provider rejected the call because the access token
    /// has expired. CredentialGuard reacts to exactly this signal.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, TriageError::AuthExpired(_))
    }

    /// Check whether the caller must re-run the authentication handshake
    pub fn requires_reauth(&self) -> bool {
        matches!(self, TriageError::RequiresReauth(_))
    }

    /// Check if the error is transient and a later attempt may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, TriageError::Network(_) | TriageError::Timeout(_))
    }
}
