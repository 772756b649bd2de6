//! Error types for the authentication layer

/// Result type for authentication operations
pub type Result<T> = std::result::Result<T, AuthError>;

/// Failures reported by the identity provider or the transport in front of it
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider throttled the request
    #[error("Rate limited by identity provider")]
    RateLimited,

    /// The bearer token was rejected
    #[error("Access token rejected by identity provider")]
    Unauthorized,

    /// The user has not approved the device code yet
    #[error("Authorization pending")]
    AuthorizationPending,

    /// The client is polling too fast
    #[error("Slow down requested by identity provider")]
    SlowDown,

    /// The device code is no longer valid
    #[error("Device code expired")]
    ExpiredToken,

    /// Any other error response
    #[error("Identity provider returned {status} {code}: {message}")]
    Service {
        /// HTTP status
        status: u16,
        /// Provider error code
        code: String,
        /// Human readable detail
        message: String,
    },

    /// The response was well-formed but unusable
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    /// A configured endpoint could not be parsed
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Transport level failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body did not decode
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProviderError {
    /// Rate limiting and token rejection can be remediated and retried once
    pub fn is_remediable(&self) -> bool {
        matches!(self, ProviderError::RateLimited | ProviderError::Unauthorized)
    }
}

/// Failures of the secure store backing tokens and registrations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem failure
    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored document could not be (de)serialized
    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend specific failure
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by the device authorization flow
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Registering the client failed
    #[error("Client registration failed: {0}")]
    Registration(#[source] ProviderError),

    /// Starting device authorization failed, even with a fresh registration
    #[error("Device authorization failed: {0}")]
    DeviceAuthorization(#[source] ProviderError),

    /// The provider returned a device authorization we cannot present
    #[error("Invalid device authorization: {0}")]
    InvalidDeviceAuthorization(String),

    /// The user did not complete verification before the device code lapsed
    #[error("Device authorization expired - please restart authentication")]
    DeviceAuthorizationExpired,

    /// Token polling failed with something other than pending or slow down
    #[error("Device token polling failed: {0}")]
    TokenPolling(#[source] ProviderError),

    /// The verification URL could not be presented
    #[error("Failed to present verification URL: {0}")]
    Presenter(String),

    /// The secure store failed
    #[error(transparent)]
    Store(#[from] StoreError),
}
