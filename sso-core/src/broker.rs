//! One SSO instance wired end to end

use crate::config::{BrokerConfig, SsoSettings};
use crate::discovery::{DiscoveryOptions, RoleDiscovery};
use crate::error::{BrokerError, Result};
use crate::resolver::RoleChainResolver;
use crate::sts::{RoleAssumer, StsRoleAssumer};
use sso_auth::{
    presenter_for, AuthError, Authenticator, JsonFileStore, ProviderClients, SecureStore,
    SsoHttpClient, VerificationPresenter,
};
use sso_common::{AccessToken, AccountRecord, RoleCredentials, RoleRecord, RoleTable};
use std::sync::Arc;
use tracing::debug;

/// Authentication, discovery and resolution for one SSO instance
pub struct SsoBroker {
    name: String,
    settings: Arc<SsoSettings>,
    auth: Arc<Authenticator>,
    discovery: Arc<RoleDiscovery>,
    resolver: RoleChainResolver,
}

impl SsoBroker {
    /// Assemble a broker from its collaborators
    pub fn new(
        name: impl Into<String>,
        settings: SsoSettings,
        options: DiscoveryOptions,
        providers: ProviderClients,
        store: Arc<dyn SecureStore>,
        presenter: Arc<dyn VerificationPresenter>,
        assumer: Arc<dyn RoleAssumer>,
    ) -> Self {
        let settings = Arc::new(settings);
        let auth = Arc::new(Authenticator::new(
            settings.store_key(),
            settings.start_url.clone(),
            providers.clone(),
            store,
            presenter,
        ));
        let discovery = Arc::new(RoleDiscovery::new(
            auth.clone(),
            providers.portal.clone(),
            settings.clone(),
            options,
        ));
        let resolver = RoleChainResolver::new(
            auth.clone(),
            providers.portal,
            assumer,
            settings.clone(),
            options.retry,
        );

        Self {
            name: name.into(),
            settings,
            auth,
            discovery,
            resolver,
        }
    }

    /// Broker for a configured instance using the HTTP client, JSON store and STS
    pub fn from_config(config: &BrokerConfig, name: Option<&str>) -> Result<Self> {
        let (name, settings) = config.sso(name)?;
        let client = Arc::new(SsoHttpClient::new(&settings.sso_region)?);
        let store = JsonFileStore::open(config.store_path()?).map_err(AuthError::from)?;
        let presenter = presenter_for(config.url_action, &config.url_exec_command)?;
        let sts_region = settings
            .default_region
            .clone()
            .unwrap_or_else(|| settings.sso_region.clone());

        Ok(Self::new(
            name,
            settings.clone(),
            config.discovery_options(),
            ProviderClients::from_client(client),
            Arc::new(store),
            presenter,
            Arc::new(StsRoleAssumer::new(sts_region)),
        ))
    }

    /// Instance name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instance settings
    pub fn settings(&self) -> &SsoSettings {
        &self.settings
    }

    /// Shared authenticator
    pub fn authenticator(&self) -> &Arc<Authenticator> {
        &self.auth
    }

    /// Discovery engine
    pub fn discovery(&self) -> &Arc<RoleDiscovery> {
        &self.discovery
    }

    /// Chain resolver
    pub fn resolver(&self) -> &RoleChainResolver {
        &self.resolver
    }

    /// See [`Authenticator::ensure_authenticated`]
    pub async fn ensure_authenticated(&self) -> Result<AccessToken> {
        Ok(self.auth.ensure_authenticated().await?)
    }

    /// See [`Authenticator::force_reauthenticate`]
    pub async fn force_reauthenticate(&self) -> Result<AccessToken> {
        Ok(self.auth.force_reauthenticate().await?)
    }

    /// See [`Authenticator::logout`]
    pub async fn logout(&self) -> Result<()> {
        Ok(self.auth.logout().await?)
    }

    /// Drop the cached token and client registration, and forget role expiries
    pub async fn flush(&self) -> Result<()> {
        self.auth.flush().await?;
        self.discovery.mark_roles_expired().await;
        Ok(())
    }

    /// See [`RoleDiscovery::list_accounts`]
    pub async fn list_accounts(&self) -> Result<Vec<AccountRecord>> {
        self.discovery.list_accounts().await
    }

    /// See [`RoleDiscovery::list_roles`]
    pub async fn list_roles(&self, account: &AccountRecord) -> Result<Vec<RoleRecord>> {
        self.discovery.list_roles(account).await
    }

    /// See [`RoleDiscovery::refresh_all`]
    pub async fn refresh_all(&self, concurrency: usize) -> Result<RoleTable> {
        self.discovery.refresh_all(concurrency).await
    }

    /// Snapshot of the role table
    pub async fn role_table(&self) -> RoleTable {
        self.discovery.role_table().await
    }

    /// Issue credentials and note their expiry and use in the role table
    pub async fn get_credentials(
        &self,
        account_id: &str,
        role_name: &str,
    ) -> Result<RoleCredentials> {
        let credentials = self.resolver.get_credentials(account_id, role_name).await?;
        let arn = credentials.role_arn()?;

        match self
            .discovery
            .set_role_expires(&arn, credentials.expires_at)
            .await
        {
            Ok(()) => self.discovery.record_usage(&arn).await?,
            Err(BrokerError::UnknownRole(_)) => debug!(%arn, "role not in table yet"),
            Err(e) => return Err(e),
        }
        Ok(credentials)
    }
}
