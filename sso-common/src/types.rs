//! Core data model types

use crate::error::{CommonError, Result};
use crate::{REGISTRATION_SAFETY_MARGIN_SECS, TOKEN_SAFETY_MARGIN_SECS};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifies this application instance to the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRegistration {
    /// Provider assigned client id
    pub client_id: String,
    /// Provider assigned client secret
    pub client_secret: String,
    /// When the registration was issued
    pub issued_at: DateTime<Utc>,
    /// When the provider stops honouring the registration
    pub expires_at: DateTime<Utc>,
    /// Authorization endpoint advertised at registration, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,
    /// Token endpoint advertised at registration, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
}

impl ClientRegistration {
    /// Whether the registration should be replaced before use
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Expiry check against an explicit clock
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at - Duration::seconds(REGISTRATION_SAFETY_MARGIN_SECS)
    }
}

/// State of one in-flight device authorization attempt. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAuthorization {
    /// Opaque code exchanged for a token while polling
    pub device_code: String,
    /// Short code the user confirms in the browser
    pub user_code: String,
    /// Page where the user enters the code
    pub verification_uri: String,
    /// Page with the code already filled in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_uri_complete: Option<String>,
    /// Lifetime of the device code
    pub expires_in_seconds: u64,
    /// Provider requested delay between polls, 0 when unspecified
    pub poll_interval_seconds: u64,
}

impl DeviceAuthorization {
    /// URL to hand to the user, preferring the pre-filled variant
    pub fn presentation_url(&self) -> &str {
        self.verification_uri_complete
            .as_deref()
            .filter(|url| !url.is_empty())
            .unwrap_or(&self.verification_uri)
    }
}

/// Bearer token for the account and role APIs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    /// Bearer value
    pub value: String,
    /// Absolute expiry reported by the provider
    pub expires_at: DateTime<Utc>,
    /// When the token was received, used to scale the safety margin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,
    /// OIDC id token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Refresh token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Token type, usually `Bearer`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl AccessToken {
    /// Build a token that expires `expires_in` seconds from now
    pub fn expiring_in(value: impl Into<String>, expires_in: i64) -> Self {
        let now = Utc::now();
        Self {
            value: value.into(),
            expires_at: now + Duration::seconds(expires_in),
            issued_at: Some(now),
            id_token: None,
            refresh_token: None,
            token_type: None,
        }
    }

    /// Whether the token is inside its safety margin
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Expiry check against an explicit clock
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at - self.safety_margin()
    }

    /// One minute, or half the issued lifetime for tokens shorter than two minutes
    ///
    /// The usual fixed one-minute margin is relaxed for short tokens, which
    /// would otherwise count as expired the moment they are issued. A token
    /// without an issue time always gets the full minute.
    pub fn safety_margin(&self) -> Duration {
        let margin = Duration::seconds(TOKEN_SAFETY_MARGIN_SECS);
        match self.issued_at {
            Some(issued_at) => {
                let half_life = (self.expires_at - issued_at) / 2;
                margin.min(half_life.max(Duration::zero()))
            }
            None => margin,
        }
    }
}

/// An account visible to the authenticated identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    /// Position in the provider's listing order
    pub index: usize,
    /// 12 digit account id
    pub account_id: String,
    /// Display name
    pub display_name: String,
    /// Root email of the account
    pub email_address: String,
}

/// A role the identity may obtain credentials for, directly or through a chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRecord {
    /// 12 digit account id
    pub account_id: String,
    /// Role name without path
    pub role_name: String,
    /// Canonical role ARN, the key used for metadata carry-over
    pub arn: String,
    /// ARN of the role that must be assumed first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via_arn: Option<String>,
    /// Expiry of the last credentials issued for this role (local metadata)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Usage history tag (local metadata)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<String>,
    /// Account display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,
    /// Configured profile name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// Configured default region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_region: Option<String>,
}

impl RoleRecord {
    /// Copy the locally tracked fields over from a previous record for the same ARN
    pub fn carry_metadata_from(&mut self, previous: &RoleRecord) {
        self.expires_at = previous.expires_at;
        self.history = previous.history.clone();
    }
}

/// Short-lived cloud credentials for one role. The core never caches these.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleCredentials {
    /// 12 digit account id
    pub account_id: String,
    /// Role name
    pub role_name: String,
    /// Access key id
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Session token
    pub session_token: String,
    /// Absolute expiry
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for RoleCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleCredentials")
            .field("account_id", &self.account_id)
            .field("role_name", &self.role_name)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl RoleCredentials {
    /// Ensure none of the secret fields came back empty
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("access_key_id", &self.access_key_id),
            ("secret_access_key", &self.secret_access_key),
            ("session_token", &self.session_token),
        ];
        for (field, value) in fields {
            if value.is_empty() {
                return Err(CommonError::IncompleteCredentials { field });
            }
        }
        Ok(())
    }

    /// Whether the credentials are inside their safety margin
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at - Duration::seconds(TOKEN_SAFETY_MARGIN_SECS)
    }

    /// Canonical ARN of the role these credentials belong to
    pub fn role_arn(&self) -> Result<String> {
        crate::arn::make_role_arn(&self.account_id, &self.role_name)
    }
}

/// Map from account id to that account's roles keyed by role name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleTable {
    /// Roles per account
    pub accounts: BTreeMap<String, BTreeMap<String, RoleRecord>>,
}

impl RoleTable {
    /// Look up a role by account and name
    pub fn get(&self, account_id: &str, role_name: &str) -> Option<&RoleRecord> {
        self.accounts.get(account_id)?.get(role_name)
    }

    /// Look up a role by ARN
    pub fn find_by_arn(&self, arn: &str) -> Option<&RoleRecord> {
        self.roles().find(|role| role.arn == arn)
    }

    /// Mutable lookup by ARN
    pub fn find_by_arn_mut(&mut self, arn: &str) -> Option<&mut RoleRecord> {
        self.accounts
            .values_mut()
            .flat_map(|roles| roles.values_mut())
            .find(|role| role.arn == arn)
    }

    /// Iterate over every role in account then role name order
    pub fn roles(&self) -> impl Iterator<Item = &RoleRecord> {
        self.accounts.values().flat_map(|roles| roles.values())
    }

    /// Insert or replace a single role
    pub fn insert(&mut self, role: RoleRecord) {
        self.accounts
            .entry(role.account_id.clone())
            .or_default()
            .insert(role.role_name.clone(), role);
    }

    /// Replace everything known about one account
    pub fn replace_account(&mut self, account_id: &str, roles: Vec<RoleRecord>) {
        let roles = roles
            .into_iter()
            .map(|role| (role.role_name.clone(), role))
            .collect();
        self.accounts.insert(account_id.to_string(), roles);
    }

    /// Number of roles across all accounts
    pub fn len(&self) -> usize {
        self.accounts.values().map(BTreeMap::len).sum()
    }

    /// True when no roles are known
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
