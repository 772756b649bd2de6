//! Role chain resolver
//!
//! Roles granted directly through SSO get credentials from the portal. A
//! role configured with `via` is reached by first resolving the via role and
//! then assuming the target with those credentials. The set of ARNs visited
//! so far travels with each recursive step, so a loop in the configuration
//! ends in [`BrokerError::RoleChainCycle`].

use crate::config::SsoSettings;
use crate::error::{BrokerError, Result};
use crate::remediation::{call_with_remediation, RetryPolicy};
use crate::sts::{AssumeRoleRequest, RoleAssumer};
use futures::future::BoxFuture;
use sso_auth::{Authenticator, PortalApi};
use sso_common::{make_role_arn, normalize_account_id, parse_role_arn, RoleCredentials};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Longest session name the role-assumption API accepts
pub const MAX_SESSION_NAME_LEN: usize = 64;

/// Session name for a hop, derived from the identity doing the assuming
pub fn session_name(via_role: &str, via_account_id: &str) -> String {
    let mut name = format!("{}@{}", via_role, via_account_id);
    if name.len() > MAX_SESSION_NAME_LEN {
        let cut = (0..=MAX_SESSION_NAME_LEN)
            .rev()
            .find(|i| name.is_char_boundary(*i))
            .unwrap_or(0);
        name.truncate(cut);
    }
    name
}

/// Issues credentials for any configured or directly granted role
pub struct RoleChainResolver {
    auth: Arc<Authenticator>,
    portal: Arc<dyn PortalApi>,
    assumer: Arc<dyn RoleAssumer>,
    settings: Arc<SsoSettings>,
    retry: RetryPolicy,
}

impl RoleChainResolver {
    /// Create a resolver sharing `auth` with discovery
    pub fn new(
        auth: Arc<Authenticator>,
        portal: Arc<dyn PortalApi>,
        assumer: Arc<dyn RoleAssumer>,
        settings: Arc<SsoSettings>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            auth,
            portal,
            assumer,
            settings,
            retry,
        }
    }

    /// Credentials for `role_name` in `account_id`, following any via chain
    pub async fn get_credentials(
        &self,
        account_id: &str,
        role_name: &str,
    ) -> Result<RoleCredentials> {
        let account_id = normalize_account_id(account_id)?;
        let credentials = self
            .resolve(account_id, role_name.to_string(), HashSet::new())
            .await?;
        info!(
            account_id = %credentials.account_id,
            role = %credentials.role_name,
            expires_at = %credentials.expires_at,
            "issued role credentials"
        );
        Ok(credentials)
    }

    /// ARNs from the first directly issued role to the target, in hop order
    pub fn role_chain(&self, account_id: &str, role_name: &str) -> Result<Vec<String>> {
        let mut arn = make_role_arn(account_id, role_name)?;
        let mut visited = HashSet::new();
        let mut chain = Vec::new();

        loop {
            visited.insert(arn.clone());
            chain.push(arn.clone());
            let (account_id, role_name) = parse_role_arn(&arn)?;
            let Some(via) = self.settings.via_arn(&account_id, &role_name)? else {
                break;
            };
            if visited.contains(&via) {
                return Err(BrokerError::RoleChainCycle { arn, via });
            }
            arn = via;
        }

        chain.reverse();
        Ok(chain)
    }

    fn resolve(
        &self,
        account_id: String,
        role_name: String,
        mut visited: HashSet<String>,
    ) -> BoxFuture<'_, Result<RoleCredentials>> {
        Box::pin(async move {
            let arn = make_role_arn(&account_id, &role_name)?;
            visited.insert(arn.clone());

            let Some(via_arn) = self.settings.via_arn(&account_id, &role_name)? else {
                return self.issue_direct(&account_id, &role_name).await;
            };
            if visited.contains(&via_arn) {
                return Err(BrokerError::RoleChainCycle { arn, via: via_arn });
            }

            let (via_account, via_role) = parse_role_arn(&via_arn)?;
            debug!(%arn, via = %via_arn, "resolving via role first");
            let via_credentials = self.resolve(via_account, via_role, visited).await?;

            let role = self.settings.role(&account_id, &role_name);
            let request = AssumeRoleRequest {
                role_arn: arn,
                session_name: session_name(
                    &via_credentials.role_name,
                    &via_credentials.account_id,
                ),
                external_id: role.and_then(|r| r.external_id.clone()),
                source_identity: role.and_then(|r| r.source_identity.clone()),
            };
            self.assumer.assume_role(&via_credentials, &request).await
        })
    }

    async fn issue_direct(&self, account_id: &str, role_name: &str) -> Result<RoleCredentials> {
        debug!(%account_id, role = %role_name, "requesting role credentials");
        let portal = &self.portal;
        let credentials = call_with_remediation(
            &self.auth,
            &self.retry,
            "get_role_credentials",
            |token| async move {
                portal
                    .get_role_credentials(&token.value, account_id, role_name)
                    .await
            },
        )
        .await?;
        credentials.validate()?;
        Ok(credentials)
    }
}
