//! Error types for discovery and resolution

use sso_auth::{AuthError, ProviderError};
use sso_common::CommonError;

/// Result type for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Broker errors
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Authentication failed
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The identity provider failed, after any remediation
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A model value failed to parse or validate
    #[error(transparent)]
    Model(#[from] CommonError),

    /// The via chain revisits a role
    #[error("Role chain loop detected: {arn} via {via}")]
    RoleChainCycle {
        /// Role whose via closes the loop
        arn: String,
        /// Already visited via target
        via: String,
    },

    /// The role is not present in the role table
    #[error("Unknown role: {0}")]
    UnknownRole(String),

    /// The role-assumption call failed
    #[error("Unable to assume {arn}: {message}")]
    AssumeRole {
        /// Target role
        arn: String,
        /// Provider detail
        message: String,
    },

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// A discovery worker stopped unexpectedly
    #[error("Discovery worker failed: {0}")]
    Worker(String),
}
