//! Configuration management for the SSO broker

use crate::discovery::DiscoveryOptions;
use crate::error::{BrokerError, Result};
use crate::remediation::RetryPolicy;
use crate::{DEFAULT_MAX_BACKOFF_SECS, DEFAULT_PROGRESS_INTERVAL_SECS, DEFAULT_THREADS};
use serde::{Deserialize, Serialize};
use sso_auth::UrlAction;
use sso_common::{normalize_account_id, normalize_role_arn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// SSO instance used when none is named
    #[serde(default = "BrokerConfig::default_sso_name")]
    pub default_sso: String,
    /// Discovery worker pool size
    #[serde(default = "BrokerConfig::default_threads")]
    pub threads: usize,
    /// How to present the verification URL
    #[serde(default)]
    pub url_action: UrlAction,
    /// Command for `url_action = "exec"`, `%s` is replaced by the URL
    #[serde(default)]
    pub url_exec_command: Vec<String>,
    /// Ceiling for the jittered rate-limit backoff
    #[serde(default = "BrokerConfig::default_max_backoff", with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Delay before discovery prints its progress notice
    #[serde(
        default = "BrokerConfig::default_progress_interval",
        with = "humantime_serde"
    )]
    pub progress_interval: Duration,
    /// Token store location
    #[serde(default = "BrokerConfig::default_store_path")]
    pub store_path: String,
    /// Configured SSO instances by name
    #[serde(default)]
    pub sso: BTreeMap<String, SsoSettings>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            default_sso: Self::default_sso_name(),
            threads: Self::default_threads(),
            url_action: UrlAction::default(),
            url_exec_command: Vec::new(),
            max_backoff: Self::default_max_backoff(),
            progress_interval: Self::default_progress_interval(),
            store_path: Self::default_store_path(),
            sso: BTreeMap::new(),
        }
    }
}

/// One SSO identity-provider instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SsoSettings {
    /// Region hosting the SSO instance
    pub sso_region: String,
    /// User portal start URL
    pub start_url: String,
    /// Region applied to roles without their own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_region: Option<String>,
    /// Per-account settings keyed by account id
    #[serde(default)]
    pub accounts: BTreeMap<String, AccountSettings>,
}

/// Per-account settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountSettings {
    /// Display name override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Region applied to roles in this account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_region: Option<String>,
    /// Per-role settings keyed by role name
    #[serde(default)]
    pub roles: BTreeMap<String, RoleSettings>,
}

/// Per-role settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleSettings {
    /// Role to assume through, as an ARN or `account:Role`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via: Option<String>,
    /// External id passed to the role-assumption call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Source identity passed to the role-assumption call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_identity: Option<String>,
    /// Profile name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// Region override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_region: Option<String>,
}

impl BrokerConfig {
    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            let config = Self::default();
            config.save_to(&config_path)?;
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from `path`
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BrokerError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and normalise a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: BrokerConfig = toml::from_str(content)
            .map_err(|e| BrokerError::Config(format!("Failed to parse config: {}", e)))?;
        config.normalize()?;
        Ok(config)
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                BrokerError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| BrokerError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| BrokerError::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| BrokerError::Config("Cannot determine home directory".to_string()))?;

        Ok(home.join(".config").join("sso-broker").join("config.toml"))
    }

    /// Expanded token store path
    pub fn store_path(&self) -> Result<PathBuf> {
        expand_path(&self.store_path)
    }

    /// Select an SSO instance by name, or the default one
    pub fn sso(&self, name: Option<&str>) -> Result<(&str, &SsoSettings)> {
        let name = name.unwrap_or(&self.default_sso);
        self.sso
            .get_key_value(name)
            .map(|(name, settings)| (name.as_str(), settings))
            .ok_or_else(|| BrokerError::Config(format!("Unknown SSO instance: {}", name)))
    }

    /// Discovery tuning derived from this configuration
    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            progress_interval: self.progress_interval,
            retry: RetryPolicy {
                max_backoff: self.max_backoff,
            },
        }
    }

    fn normalize(&mut self) -> Result<()> {
        if self.threads == 0 {
            return Err(BrokerError::Config("threads must be at least 1".to_string()));
        }
        if self.progress_interval.is_zero() {
            self.progress_interval = Self::default_progress_interval();
        }
        for (name, sso) in self.sso.iter_mut() {
            sso.normalize()
                .map_err(|e| BrokerError::Config(format!("[sso.{}] {}", name, e)))?;
        }
        Ok(())
    }

    fn default_sso_name() -> String {
        "Default".to_string()
    }

    fn default_threads() -> usize {
        DEFAULT_THREADS
    }

    fn default_max_backoff() -> Duration {
        Duration::from_secs(DEFAULT_MAX_BACKOFF_SECS)
    }

    fn default_progress_interval() -> Duration {
        Duration::from_secs(DEFAULT_PROGRESS_INTERVAL_SECS)
    }

    fn default_store_path() -> String {
        "~/.config/sso-broker/store.json".to_string()
    }
}

impl SsoSettings {
    /// Opaque key addressing this instance in the token store
    pub fn store_key(&self) -> String {
        format!("{}|{}", self.sso_region, self.start_url)
    }

    /// Settings for one account
    pub fn account(&self, account_id: &str) -> Option<&AccountSettings> {
        let account_id = normalize_account_id(account_id).ok()?;
        self.accounts.get(&account_id).or_else(|| {
            self.accounts
                .iter()
                .find(|(key, _)| normalize_account_id(key).ok().as_deref() == Some(&account_id))
                .map(|(_, account)| account)
        })
    }

    /// Settings for one role
    pub fn role(&self, account_id: &str, role_name: &str) -> Option<&RoleSettings> {
        self.account(account_id)?.roles.get(role_name)
    }

    /// Canonical via ARN for a role, if it is chained
    ///
    /// Settings built in code may still carry the short `account:Role` form.
    pub fn via_arn(
        &self,
        account_id: &str,
        role_name: &str,
    ) -> std::result::Result<Option<String>, sso_common::CommonError> {
        self.role(account_id, role_name)
            .and_then(|role| role.via.as_deref())
            .map(normalize_role_arn)
            .transpose()
    }

    /// Zero-pad account keys and canonicalise via ARNs
    fn normalize(&mut self) -> std::result::Result<(), sso_common::CommonError> {
        let mut accounts = BTreeMap::new();
        for (account_id, mut account) in std::mem::take(&mut self.accounts) {
            for role in account.roles.values_mut() {
                if let Some(via) = role.via.as_deref() {
                    role.via = Some(normalize_role_arn(via)?);
                }
            }
            accounts.insert(normalize_account_id(&account_id)?, account);
        }
        self.accounts = accounts;
        Ok(())
    }
}

fn expand_path(path: &str) -> Result<PathBuf> {
    match path.strip_prefix('~') {
        Some(rest) => {
            let home = dirs::home_dir().ok_or_else(|| {
                BrokerError::Config("Cannot determine home directory".to_string())
            })?;
            Ok(home.join(rest.trim_start_matches('/')))
        }
        None => Ok(PathBuf::from(path)),
    }
}
