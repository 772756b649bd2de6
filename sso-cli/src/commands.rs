//! CLI command implementations

use anyhow::{Context, Result};
use serde_json::json;
use sso_common::RoleCredentials;
use sso_core::{BrokerConfig, SsoBroker};
use std::path::{Path, PathBuf};
use tracing::info;

/// Load the configuration from `path`, or the default location
pub fn load_config(path: Option<&Path>) -> Result<BrokerConfig> {
    match path {
        Some(path) => BrokerConfig::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => BrokerConfig::load().context("Failed to load config"),
    }
}

/// Build the broker for the selected SSO instance
pub fn open_broker(config: &BrokerConfig, sso: Option<&str>) -> Result<SsoBroker> {
    let broker = SsoBroker::from_config(config, sso).context("Failed to set up SSO broker")?;
    info!(sso = %broker.name(), start_url = %broker.settings().start_url, "using SSO instance");
    Ok(broker)
}

/// Execute the login command
pub async fn execute_login(broker: &SsoBroker, force: bool) -> Result<()> {
    let token = if force {
        broker.force_reauthenticate().await
    } else {
        broker.ensure_authenticated().await
    }
    .context("Authentication failed")?;

    println!(
        "✓ Logged in to {} (token expires {})",
        broker.name(),
        token.expires_at.to_rfc3339()
    );
    Ok(())
}

/// Execute the logout command
pub async fn execute_logout(broker: &SsoBroker) -> Result<()> {
    broker.logout().await.context("Logout failed")?;
    println!("✓ Logged out of {}", broker.name());
    Ok(())
}

/// Execute the flush command
pub async fn execute_flush(broker: &SsoBroker) -> Result<()> {
    broker
        .flush()
        .await
        .context("Failed to flush cached authentication state")?;
    println!("✓ Flushed cached token and client registration");
    Ok(())
}

/// Execute the list command
pub async fn execute_list(broker: &SsoBroker, threads: usize) -> Result<()> {
    let table = broker
        .refresh_all(threads)
        .await
        .context("Role discovery failed")?;

    if table.is_empty() {
        println!("No roles found");
        return Ok(());
    }

    println!("{:<12}  {:<24}  {:<32}  VIA", "ACCOUNT", "NAME", "ROLE");
    for role in table.roles() {
        println!(
            "{:<12}  {:<24}  {:<32}  {}",
            role.account_id,
            role.account_name.as_deref().unwrap_or("-"),
            role.role_name,
            role.via_arn.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

/// Execute the credentials command
pub async fn execute_credentials(broker: &SsoBroker, account: &str, role: &str) -> Result<()> {
    let credentials = broker
        .get_credentials(account, role)
        .await
        .with_context(|| format!("Failed to get credentials for {}:{}", account, role))?;

    println!("{}", serde_json::to_string_pretty(&credential_process_json(&credentials))?);
    Ok(())
}

/// Execute the config-path command
pub fn execute_config_path(path: Option<&Path>) -> Result<()> {
    let path: PathBuf = match path {
        Some(path) => path.to_path_buf(),
        None => BrokerConfig::config_path().context("Failed to resolve config path")?,
    };
    println!("{}", path.display());
    Ok(())
}

/// Credentials in the external credential-process document format
fn credential_process_json(credentials: &RoleCredentials) -> serde_json::Value {
    json!({
        "Version": 1,
        "AccessKeyId": credentials.access_key_id,
        "SecretAccessKey": credentials.secret_access_key,
        "SessionToken": credentials.session_token,
        "Expiration": credentials.expires_at.to_rfc3339(),
    })
}
