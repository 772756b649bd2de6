//! Shared data model for the SSO credential broker.
//!
//! Authentication produces [`ClientRegistration`] and [`AccessToken`].
//! Discovery fills a [`RoleTable`] which the chain resolver reads when it
//! issues [`RoleCredentials`].

#![warn(missing_docs)]

pub mod arn;
pub mod error;
pub mod types;

pub use arn::{
    account_id_to_string, make_role_arn, normalize_account_id, normalize_role_arn, parse_role_arn,
};
pub use error::{CommonError, Result};
pub use types::*;

/// Largest account id the cloud provider hands out
pub const MAX_ACCOUNT_ID: u64 = 999_999_999_999;

/// Client registrations are considered expired this many seconds early
pub const REGISTRATION_SAFETY_MARGIN_SECS: i64 = 60 * 60;

/// Access tokens and role credentials are considered expired this many seconds early
pub const TOKEN_SAFETY_MARGIN_SECS: i64 = 60;
