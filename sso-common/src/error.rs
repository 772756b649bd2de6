//! Error types for the shared data model

/// Result type for model operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised while parsing or validating model values
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommonError {
    /// The string is neither a role ARN nor an `account:Role` pair
    #[error("Invalid role ARN: {0}")]
    InvalidArn(String),

    /// Account ids are 12 decimal digits at most
    #[error("Invalid account id: {0}")]
    InvalidAccountId(String),

    /// Role credentials are missing a required field
    #[error("Incomplete role credentials: missing {field}")]
    IncompleteCredentials {
        /// Name of the empty field
        field: &'static str,
    },
}
