//! Identity provider client interfaces
//!
//! Two remote APIs sit behind these traits: the OIDC device-authorization API
//! and the portal API that lists accounts and roles and issues credentials.
//! [`crate::client::SsoHttpClient`] implements both over HTTP; tests substitute
//! scripted doubles.

use crate::error::ProviderError;
use async_trait::async_trait;
use sso_common::{AccessToken, ClientRegistration, DeviceAuthorization, RoleCredentials};
use std::sync::Arc;

/// Client name announced at registration
pub const CLIENT_NAME: &str = "sso-broker";

/// Client type announced at registration
pub const CLIENT_TYPE: &str = "public";

/// Grant type used while polling for the device token
pub const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// OIDC device-authorization endpoints
#[async_trait]
pub trait OidcApi: Send + Sync {
    /// Register this application instance
    async fn register_client(
        &self,
        client_name: &str,
        client_type: &str,
    ) -> Result<ClientRegistration, ProviderError>;

    /// Request a device code for `start_url`
    async fn start_device_authorization(
        &self,
        registration: &ClientRegistration,
        start_url: &str,
    ) -> Result<DeviceAuthorization, ProviderError>;

    /// Exchange the device code for a token. Pending and slow down come back as errors.
    async fn create_token(
        &self,
        registration: &ClientRegistration,
        device: &DeviceAuthorization,
    ) -> Result<AccessToken, ProviderError>;
}

/// Account, role and credential issuance endpoints
#[async_trait]
pub trait PortalApi: Send + Sync {
    /// One page of visible accounts
    async fn list_accounts(
        &self,
        access_token: &str,
        next_token: Option<&str>,
    ) -> Result<AccountPage, ProviderError>;

    /// One page of roles granted in `account_id`
    async fn list_account_roles(
        &self,
        access_token: &str,
        account_id: &str,
        next_token: Option<&str>,
    ) -> Result<RolePage, ProviderError>;

    /// Issue short-lived credentials for a directly granted role
    async fn get_role_credentials(
        &self,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<RoleCredentials, ProviderError>;

    /// Invalidate the session server side
    async fn logout(&self, access_token: &str) -> Result<(), ProviderError>;
}

/// Account entry as returned by the portal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSummary {
    /// Account id, possibly without leading zeros
    pub account_id: String,
    /// Display name
    pub account_name: String,
    /// Root email
    pub email_address: String,
}

/// One page of accounts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountPage {
    /// Accounts on this page
    pub accounts: Vec<AccountSummary>,
    /// Continuation token, `None` on the last page
    pub next_token: Option<String>,
}

/// Role entry as returned by the portal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSummary {
    /// Account the role lives in
    pub account_id: String,
    /// Role name
    pub role_name: String,
}

/// One page of roles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolePage {
    /// Roles on this page
    pub roles: Vec<RoleSummary>,
    /// Continuation token, `None` on the last page
    pub next_token: Option<String>,
}

/// Empty continuation tokens mean "no more pages"
pub fn continuation(token: Option<String>) -> Option<String> {
    token.filter(|t| !t.is_empty())
}

/// Both halves of the identity provider, possibly backed by one client
#[derive(Clone)]
pub struct ProviderClients {
    /// Device authorization API
    pub oidc: Arc<dyn OidcApi>,
    /// Account and role API
    pub portal: Arc<dyn PortalApi>,
}

impl ProviderClients {
    /// Use one client for both APIs
    pub fn from_client<C>(client: Arc<C>) -> Self
    where
        C: OidcApi + PortalApi + 'static,
    {
        Self {
            oidc: client.clone(),
            portal: client,
        }
    }
}
