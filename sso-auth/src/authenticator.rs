//! Device authorization state machine
//!
//! One [`Authenticator`] exists per identity-provider instance. It owns the
//! current access token behind a read/write lock and serialises the full
//! reauthentication flow behind a separate mutex, so concurrent callers that
//! observe an expired or rejected token wait for a single flow and then reuse
//! its result.
//!
//! ```text
//! cached registration ──┐
//!   (or register)       ▼
//!               start device authorization ──fail──► register again, retry once
//!                       │
//!                       ▼
//!               present verification URL
//!                       │
//!                       ▼
//!               poll create_token ◄── pending: sleep interval
//!                       │         ◄── slow down: interval += 5s, sleep
//!                       ▼
//!               store token, persist
//! ```

use crate::error::{AuthError, ProviderError, Result};
use crate::presenter::VerificationPresenter;
use crate::provider::{ProviderClients, CLIENT_NAME, CLIENT_TYPE};
use crate::store::SecureStore;
use sso_common::{AccessToken, ClientRegistration, DeviceAuthorization};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Added to the poll interval whenever the provider asks us to slow down
pub const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Poll interval used when the provider does not specify one
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Authentication state for one identity-provider instance
pub struct Authenticator {
    store_key: String,
    start_url: String,
    client_name: String,
    providers: ProviderClients,
    store: Arc<dyn SecureStore>,
    presenter: Arc<dyn VerificationPresenter>,
    token: RwLock<Option<AccessToken>>,
    reauth: Mutex<()>,
}

impl Authenticator {
    /// `store_key` addresses this instance in the secure store
    pub fn new(
        store_key: impl Into<String>,
        start_url: impl Into<String>,
        providers: ProviderClients,
        store: Arc<dyn SecureStore>,
        presenter: Arc<dyn VerificationPresenter>,
    ) -> Self {
        Self {
            store_key: store_key.into(),
            start_url: start_url.into(),
            client_name: CLIENT_NAME.to_string(),
            providers,
            store,
            presenter,
            token: RwLock::new(None),
            reauth: Mutex::new(()),
        }
    }

    /// Override the client name announced at registration
    pub fn with_client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    /// Key used in the secure store
    pub fn store_key(&self) -> &str {
        &self.store_key
    }

    /// Return a valid token, running the device flow if none is cached
    pub async fn ensure_authenticated(&self) -> Result<AccessToken> {
        if let Some(token) = self.cached_token().await? {
            return Ok(token);
        }

        let guard = self.reauth.lock().await;
        // Another caller may have finished a flow while we waited
        if let Some(token) = self.cached_token().await? {
            return Ok(token);
        }
        self.run_device_flow(&guard).await
    }

    /// Run the device flow even if a valid token is cached
    pub async fn force_reauthenticate(&self) -> Result<AccessToken> {
        let guard = self.reauth.lock().await;
        self.run_device_flow(&guard).await
    }

    /// Reauthenticate after `stale` was rejected, unless a concurrent caller
    /// already replaced it with a token that is still valid
    pub async fn reauthenticate_if_stale(&self, stale: &AccessToken) -> Result<AccessToken> {
        let guard = self.reauth.lock().await;
        let current = self.token.read().await.clone();
        if let Some(current) = current {
            if current.value != stale.value && !current.is_expired() {
                debug!("token already refreshed by another caller");
                return Ok(current);
            }
        }
        self.run_device_flow(&guard).await
    }

    /// Best-effort server side logout, then forget the token locally
    pub async fn logout(&self) -> Result<()> {
        let _guard = self.reauth.lock().await;
        let cached = self.token.write().await.take();
        let token = match cached {
            Some(token) => Some(token),
            None => self.store.get_token(&self.store_key)?,
        };

        let Some(token) = token else {
            debug!("no access token to log out");
            return Ok(());
        };

        if token.is_expired() {
            debug!("access token already expired, skipping server side logout");
        } else if let Err(e) = self.providers.portal.logout(&token.value).await {
            warn!(error = %e, "server side logout failed");
        }
        self.store.delete_token(&self.store_key)?;
        info!("Logged out");
        Ok(())
    }

    /// Forget the token and client registration without contacting the provider
    pub async fn flush(&self) -> Result<()> {
        let _guard = self.reauth.lock().await;
        self.token.write().await.take();
        self.store.delete_token(&self.store_key)?;
        self.store.delete_client_registration(&self.store_key)?;
        debug!(key = %self.store_key, "flushed cached authentication state");
        Ok(())
    }

    async fn cached_token(&self) -> Result<Option<AccessToken>> {
        {
            let token = self.token.read().await;
            if let Some(token) = token.as_ref().filter(|t| !t.is_expired()) {
                return Ok(Some(token.clone()));
            }
        }

        match self.store.get_token(&self.store_key)? {
            Some(token) if !token.is_expired() => {
                debug!("using stored access token");
                *self.token.write().await = Some(token.clone());
                Ok(Some(token))
            }
            Some(_) => {
                debug!("stored access token expired");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Full reauthentication. Requires the reauth guard.
    async fn run_device_flow(&self, _guard: &MutexGuard<'_, ()>) -> Result<AccessToken> {
        let (registration, device) = self.start_device_authorization().await?;

        if device.presentation_url().is_empty() {
            return Err(AuthError::InvalidDeviceAuthorization(
                "no verification URL".to_string(),
            ));
        }
        self.presenter.present(&device).await?;
        info!("Waiting for SSO authentication...");

        let token = self.poll_for_token(&registration, &device).await?;
        *self.token.write().await = Some(token.clone());

        if let Err(e) = self.store.save_token(&self.store_key, &token) {
            warn!(error = %e, "unable to persist access token");
        }
        info!(expires_at = %token.expires_at, "SSO authentication complete");
        Ok(token)
    }

    async fn client_registration(&self, force: bool) -> Result<ClientRegistration> {
        if !force {
            match self.store.get_client_registration(&self.store_key)? {
                Some(registration) if !registration.is_expired() => return Ok(registration),
                Some(_) => debug!("cached client registration expired"),
                None => debug!("no cached client registration"),
            }
        }

        let registration = self
            .providers
            .oidc
            .register_client(&self.client_name, CLIENT_TYPE)
            .await
            .map_err(AuthError::Registration)?;
        debug!(client_id = %registration.client_id, "registered client");

        if let Err(e) = self
            .store
            .save_client_registration(&self.store_key, &registration)
        {
            warn!(error = %e, "unable to persist client registration");
        }
        Ok(registration)
    }

    async fn start_device_authorization(
        &self,
    ) -> Result<(ClientRegistration, DeviceAuthorization)> {
        let registration = self.client_registration(false).await?;
        match self
            .providers
            .oidc
            .start_device_authorization(&registration, &self.start_url)
            .await
        {
            Ok(device) => Ok((registration, device)),
            Err(e) => {
                warn!(error = %e, "device authorization failed, registering a new client");
                let registration = self.client_registration(true).await?;
                let device = self
                    .providers
                    .oidc
                    .start_device_authorization(&registration, &self.start_url)
                    .await
                    .map_err(AuthError::DeviceAuthorization)?;
                Ok((registration, device))
            }
        }
    }

    async fn poll_for_token(
        &self,
        registration: &ClientRegistration,
        device: &DeviceAuthorization,
    ) -> Result<AccessToken> {
        let mut interval = match device.poll_interval_seconds {
            0 => DEFAULT_POLL_INTERVAL,
            secs => Duration::from_secs(secs),
        };
        let deadline = (device.expires_in_seconds > 0)
            .then(|| Instant::now() + Duration::from_secs(device.expires_in_seconds));

        loop {
            match self
                .providers
                .oidc
                .create_token(registration, device)
                .await
            {
                Ok(token) => return Ok(token),
                Err(ProviderError::AuthorizationPending) => {
                    debug!(?interval, "authorization pending");
                }
                Err(ProviderError::SlowDown) => {
                    interval += SLOW_DOWN_STEP;
                    debug!(?interval, "slowing down token polling");
                }
                Err(ProviderError::ExpiredToken) => {
                    return Err(AuthError::DeviceAuthorizationExpired)
                }
                Err(e) => return Err(AuthError::TokenPolling(e)),
            }

            sleep(interval).await;
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(AuthError::DeviceAuthorizationExpired);
            }
        }
    }
}
