//! Common test utilities shared across integration and E2E tests

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sso_auth::{
    AccountPage, AccountSummary, MemoryStore, OidcApi, PortalApi, ProviderClients, ProviderError,
    RolePage, RoleSummary, VerificationPresenter,
};
use sso_common::{
    make_role_arn, AccessToken, ClientRegistration, DeviceAuthorization, RoleCredentials,
};
use sso_core::{
    AssumeRoleRequest, BrokerConfig, DiscoveryOptions, RoleAssumer, SsoBroker, SsoSettings,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Setup logging for tests
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Instance used by every fixture
pub const START_URL: &str = "https://example.awsapps.com/start";

/// Config document with one SSO instance and the given account tables appended
pub fn config_with(accounts: &str) -> BrokerConfig {
    let document = format!(
        r#"
max_backoff = "50ms"
progress_interval = "1s"

[sso.Default]
sso_region = "us-east-1"
start_url = "{}"
default_region = "eu-west-1"
{}
"#,
        START_URL, accounts
    );
    BrokerConfig::from_toml_str(&document).expect("valid test config")
}

/// Device flow double that issues `token-1`, `token-2`, ... one per flow
#[derive(Default)]
pub struct ScriptedOidc {
    pending_polls: usize,
    expires_in: i64,
    polls: AtomicUsize,
    flows: AtomicUsize,
    registrations: AtomicUsize,
}

impl ScriptedOidc {
    pub fn new() -> Self {
        Self {
            expires_in: 3600,
            ..Default::default()
        }
    }

    /// Answer pending `polls` times before each token is issued
    pub fn with_pending_polls(mut self, polls: usize) -> Self {
        self.pending_polls = polls;
        self
    }

    /// Lifetime of issued tokens
    pub fn with_expires_in(mut self, expires_in: i64) -> Self {
        self.expires_in = expires_in;
        self
    }

    /// Device authorizations started so far
    pub fn flows(&self) -> usize {
        self.flows.load(Ordering::SeqCst)
    }

    /// Token polls so far
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    /// Client registrations so far
    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OidcApi for ScriptedOidc {
    async fn register_client(
        &self,
        client_name: &str,
        _client_type: &str,
    ) -> Result<ClientRegistration, ProviderError> {
        let n = self.registrations.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ClientRegistration {
            client_id: format!("{}-client-{}", client_name, n),
            client_secret: "client-secret".to_string(),
            issued_at: Utc::now(),
            expires_at: Utc::now() + Duration::days(90),
            authorization_endpoint: None,
            token_endpoint: None,
        })
    }

    async fn start_device_authorization(
        &self,
        _registration: &ClientRegistration,
        start_url: &str,
    ) -> Result<DeviceAuthorization, ProviderError> {
        assert_eq!(start_url, START_URL);
        let n = self.flows.fetch_add(1, Ordering::SeqCst) + 1;
        self.polls.store(0, Ordering::SeqCst);
        Ok(DeviceAuthorization {
            device_code: format!("device-{}", n),
            user_code: "ABCD-EFGH".to_string(),
            verification_uri: "https://device.sso.us-east-1.amazonaws.com/".to_string(),
            verification_uri_complete: Some(
                "https://device.sso.us-east-1.amazonaws.com/?user_code=ABCD-EFGH".to_string(),
            ),
            expires_in_seconds: 600,
            poll_interval_seconds: 1,
        })
    }

    async fn create_token(
        &self,
        _registration: &ClientRegistration,
        device: &DeviceAuthorization,
    ) -> Result<AccessToken, ProviderError> {
        let polls = self.polls.fetch_add(1, Ordering::SeqCst);
        if polls < self.pending_polls {
            return Err(ProviderError::AuthorizationPending);
        }
        let n = device.device_code.trim_start_matches("device-");
        Ok(AccessToken::expiring_in(
            format!("token-{}", n),
            self.expires_in,
        ))
    }
}

/// Remediable failures a portal double can inject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    RateLimited,
    Unauthorized,
    Unavailable,
}

impl Fault {
    fn into_error(self) -> ProviderError {
        match self {
            Fault::RateLimited => ProviderError::RateLimited,
            Fault::Unauthorized => ProviderError::Unauthorized,
            Fault::Unavailable => ProviderError::Service {
                status: 503,
                code: "ServiceUnavailable".to_string(),
                message: "try later".to_string(),
            },
        }
    }
}

const ANY_ACCOUNT: &str = "*";

/// Portal double backed by in-memory accounts and role grants
#[derive(Default)]
pub struct FakePortal {
    accounts: Vec<AccountSummary>,
    roles: BTreeMap<String, Vec<String>>,
    page_size: usize,
    role_page_size: usize,
    role_faults: Mutex<HashMap<String, VecDeque<Fault>>>,
    rejected_tokens: Mutex<HashSet<(String, String)>>,
    account_pages: AtomicUsize,
    role_calls: Mutex<Vec<String>>,
    credential_calls: Mutex<Vec<String>>,
    logouts: Mutex<Vec<String>>,
}

impl FakePortal {
    pub fn new() -> Self {
        Self {
            page_size: 100,
            role_page_size: 100,
            ..Default::default()
        }
    }

    /// Grant `roles` in a new account named `name`
    pub fn with_account(mut self, account_id: &str, name: &str, roles: &[&str]) -> Self {
        self.accounts.push(AccountSummary {
            account_id: account_id.to_string(),
            account_name: name.to_string(),
            email_address: format!("{}@example.com", name),
        });
        self.roles.insert(
            account_id.to_string(),
            roles.iter().map(|r| r.to_string()).collect(),
        );
        self
    }

    /// Accounts per page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Roles per page
    pub fn with_role_page_size(mut self, role_page_size: usize) -> Self {
        self.role_page_size = role_page_size;
        self
    }

    /// Fail the next role listings for `account_id` with `faults`, in order
    pub fn fail_roles(self, account_id: &str, faults: &[Fault]) -> Self {
        self.role_faults
            .lock()
            .unwrap()
            .insert(account_id.to_string(), faults.iter().copied().collect());
        self
    }

    /// Answer role and credential calls made with `token` as unauthorized
    pub fn reject_token(self, token: &str) -> Self {
        self.reject_token_in(ANY_ACCOUNT, token)
    }

    /// Answer role listings for `account_id` made with `token` as unauthorized
    pub fn reject_token_in(self, account_id: &str, token: &str) -> Self {
        self.rejected_tokens
            .lock()
            .unwrap()
            .insert((account_id.to_string(), token.to_string()));
        self
    }

    pub fn account_pages(&self) -> usize {
        self.account_pages.load(Ordering::SeqCst)
    }

    /// Account ids of every role listing, successful or not
    pub fn role_calls(&self) -> Vec<String> {
        self.role_calls.lock().unwrap().clone()
    }

    /// `account/role` of every direct credential request
    pub fn credential_calls(&self) -> Vec<String> {
        self.credential_calls.lock().unwrap().clone()
    }

    /// Tokens logged out
    pub fn logouts(&self) -> Vec<String> {
        self.logouts.lock().unwrap().clone()
    }

    fn check_token(&self, account_id: &str, access_token: &str) -> Result<(), ProviderError> {
        let rejected = self.rejected_tokens.lock().unwrap();
        for scope in [ANY_ACCOUNT, account_id] {
            if rejected.contains(&(scope.to_string(), access_token.to_string())) {
                return Err(ProviderError::Unauthorized);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PortalApi for FakePortal {
    async fn list_accounts(
        &self,
        _access_token: &str,
        next_token: Option<&str>,
    ) -> Result<AccountPage, ProviderError> {
        self.account_pages.fetch_add(1, Ordering::SeqCst);
        let start: usize = next_token.map(|t| t.parse().unwrap()).unwrap_or(0);
        let end = (start + self.page_size).min(self.accounts.len());
        Ok(AccountPage {
            accounts: self.accounts[start..end].to_vec(),
            next_token: (end < self.accounts.len()).then(|| end.to_string()),
        })
    }

    async fn list_account_roles(
        &self,
        access_token: &str,
        account_id: &str,
        next_token: Option<&str>,
    ) -> Result<RolePage, ProviderError> {
        self.role_calls.lock().unwrap().push(account_id.to_string());
        self.check_token(account_id, access_token)?;
        let fault = self
            .role_faults
            .lock()
            .unwrap()
            .get_mut(account_id)
            .and_then(|faults| faults.pop_front());
        if let Some(fault) = fault {
            return Err(fault.into_error());
        }

        let granted = self.roles.get(account_id).map(Vec::as_slice).unwrap_or_default();
        let start: usize = next_token.map(|t| t.parse().unwrap()).unwrap_or(0);
        let end = (start + self.role_page_size).min(granted.len());
        Ok(RolePage {
            roles: granted[start..end]
                .iter()
                .map(|role_name| RoleSummary {
                    account_id: account_id.to_string(),
                    role_name: role_name.clone(),
                })
                .collect(),
            next_token: (end < granted.len()).then(|| end.to_string()),
        })
    }

    async fn get_role_credentials(
        &self,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<RoleCredentials, ProviderError> {
        self.credential_calls
            .lock()
            .unwrap()
            .push(format!("{}/{}", account_id, role_name));
        self.check_token(account_id, access_token)?;
        Ok(issued_credentials(account_id, role_name, "ASIADIRECT"))
    }

    async fn logout(&self, access_token: &str) -> Result<(), ProviderError> {
        self.logouts.lock().unwrap().push(access_token.to_string());
        Ok(())
    }
}

/// Credentials for `account_id/role_name` with a recognisable key prefix
pub fn issued_credentials(account_id: &str, role_name: &str, key_prefix: &str) -> RoleCredentials {
    RoleCredentials {
        account_id: account_id.to_string(),
        role_name: role_name.to_string(),
        access_key_id: format!("{}{}", key_prefix, role_name.to_uppercase()),
        secret_access_key: format!("secret-for-{}", role_name),
        session_token: format!("session-for-{}", role_name),
        expires_at: Utc::now() + Duration::hours(1),
    }
}

/// One recorded assume-role hop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumeCall {
    /// ARN of the credentials used for the call
    pub caller: String,
    pub request: AssumeRoleRequest,
}

/// Role assumer that records every hop
#[derive(Default)]
pub struct RecordingAssumer {
    calls: Mutex<Vec<AssumeCall>>,
}

impl RecordingAssumer {
    pub fn calls(&self) -> Vec<AssumeCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RoleAssumer for RecordingAssumer {
    async fn assume_role(
        &self,
        credentials: &RoleCredentials,
        request: &AssumeRoleRequest,
    ) -> sso_core::Result<RoleCredentials> {
        self.calls.lock().unwrap().push(AssumeCall {
            caller: credentials.role_arn()?,
            request: request.clone(),
        });
        let (account_id, role_name) = sso_common::parse_role_arn(&request.role_arn)?;
        Ok(issued_credentials(&account_id, &role_name, "ASIAASSUMED"))
    }
}

/// Presenter that only counts
#[derive(Default)]
pub struct CountingPresenter {
    presented: AtomicUsize,
}

impl CountingPresenter {
    pub fn presented(&self) -> usize {
        self.presented.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VerificationPresenter for CountingPresenter {
    async fn present(&self, device: &DeviceAuthorization) -> sso_auth::Result<()> {
        assert!(!device.presentation_url().is_empty());
        self.presented.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A broker wired to doubles, with handles on each
pub struct Harness {
    pub broker: SsoBroker,
    pub oidc: Arc<ScriptedOidc>,
    pub portal: Arc<FakePortal>,
    pub assumer: Arc<RecordingAssumer>,
    pub presenter: Arc<CountingPresenter>,
    pub store: Arc<MemoryStore>,
}

impl Harness {
    pub fn new(config: &BrokerConfig, portal: FakePortal) -> Self {
        Self::with_oidc(config, portal, ScriptedOidc::new())
    }

    pub fn with_oidc(config: &BrokerConfig, portal: FakePortal, oidc: ScriptedOidc) -> Self {
        let (name, settings) = config.sso(None).expect("default instance");
        Self::assemble(name, settings.clone(), config.discovery_options(), portal, oidc)
    }

    /// Broker over settings built in code, bypassing config normalization
    pub fn with_settings(settings: SsoSettings, portal: FakePortal) -> Self {
        let options = config_with("").discovery_options();
        Self::assemble("Default", settings, options, portal, ScriptedOidc::new())
    }

    fn assemble(
        name: &str,
        settings: SsoSettings,
        options: DiscoveryOptions,
        portal: FakePortal,
        oidc: ScriptedOidc,
    ) -> Self {
        let oidc = Arc::new(oidc);
        let portal = Arc::new(portal);
        let assumer = Arc::new(RecordingAssumer::default());
        let presenter = Arc::new(CountingPresenter::default());
        let store = Arc::new(MemoryStore::new());

        let providers = ProviderClients {
            oidc: oidc.clone(),
            portal: portal.clone(),
        };
        let broker = SsoBroker::new(
            name,
            settings,
            options,
            providers,
            store.clone(),
            presenter.clone(),
            assumer.clone(),
        );

        Self {
            broker,
            oidc,
            portal,
            assumer,
            presenter,
            store,
        }
    }
}

/// Canonical ARN for a test role
pub fn arn(account_id: &str, role_name: &str) -> String {
    make_role_arn(account_id, role_name).expect("valid test role")
}
