//! Role discovery engine
//!
//! Enumerates every account visible to the authenticated identity and every
//! role within each account, merging the results into a [`RoleTable`].
//!
//! `refresh_all` fetches the first account on the calling task so that a
//! rejected token is repaired exactly once before any worker starts. The
//! remaining accounts are pushed onto a bounded work channel drained by a
//! fixed pool of workers; a coordinator merges their results one account at
//! a time under the table's write lock.
//!
//! A refresh that is still running after the progress interval logs a single
//! notice, whichever stage it is in.

use crate::config::SsoSettings;
use crate::error::{BrokerError, Result};
use crate::remediation::{call_with_remediation, RetryPolicy};
use crate::DEFAULT_PROGRESS_INTERVAL_SECS;
use chrono::{DateTime, Utc};
use sso_auth::{continuation, Authenticator, PortalApi};
use sso_common::{make_role_arn, normalize_account_id, AccountRecord, RoleRecord, RoleTable};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, OnceCell, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval};
use tracing::{debug, info, warn};

/// Discovery tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// Delay before the one-time progress notice
    pub progress_interval: Duration,
    /// Rate limit and reauthentication policy
    pub retry: RetryPolicy,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            progress_interval: Duration::from_secs(DEFAULT_PROGRESS_INTERVAL_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

type AccountRoles = (AccountRecord, Vec<RoleRecord>);

/// One-time notice for a refresh outliving the progress interval
struct Progress {
    ticker: Interval,
    advised: bool,
    completed: usize,
    total: usize,
}

impl Progress {
    fn start(interval: Duration) -> Self {
        let period = interval.max(Duration::from_millis(10));
        Self {
            ticker: interval_at(Instant::now() + period, period),
            advised: false,
            completed: 0,
            total: 0,
        }
    }

    fn advise(&mut self) {
        info!(
            completed = self.completed,
            total = self.total,
            "Please wait, still discovering roles across accounts..."
        );
        self.advised = true;
    }

    /// Drive `work` to completion, advising once if the ticker fires first
    async fn watch<F: Future>(&mut self, work: F) -> F::Output {
        tokio::pin!(work);
        loop {
            tokio::select! {
                output = &mut work => return output,
                _ = self.ticker.tick(), if !self.advised => self.advise(),
            }
        }
    }
}

/// Next page to request, or `None` once a listing is exhausted
///
/// Empty tokens end the listing, and so does a token the portal already
/// handed out.
fn next_page(
    requested: &mut HashSet<String>,
    token: Option<String>,
    listing: &str,
) -> Option<String> {
    let token = continuation(token)?;
    if !requested.insert(token.clone()) {
        warn!(listing, %token, "portal repeated a continuation token, stopping");
        return None;
    }
    Some(token)
}

/// Owns the role table for one SSO instance
pub struct RoleDiscovery {
    auth: Arc<Authenticator>,
    portal: Arc<dyn PortalApi>,
    settings: Arc<SsoSettings>,
    options: DiscoveryOptions,
    accounts: OnceCell<Vec<AccountRecord>>,
    roles: RwLock<HashMap<String, Vec<RoleRecord>>>,
    table: RwLock<RoleTable>,
}

impl RoleDiscovery {
    /// Create an engine with an empty role table
    pub fn new(
        auth: Arc<Authenticator>,
        portal: Arc<dyn PortalApi>,
        settings: Arc<SsoSettings>,
        options: DiscoveryOptions,
    ) -> Self {
        Self {
            auth,
            portal,
            settings,
            options,
            accounts: OnceCell::new(),
            roles: RwLock::new(HashMap::new()),
            table: RwLock::new(RoleTable::default()),
        }
    }

    /// Copy of the current role table
    pub async fn role_table(&self) -> RoleTable {
        self.table.read().await.clone()
    }

    /// All visible accounts, fetched once per process
    pub async fn list_accounts(&self) -> Result<Vec<AccountRecord>> {
        let accounts = self
            .accounts
            .get_or_try_init(|| self.fetch_accounts())
            .await?;
        Ok(accounts.clone())
    }

    /// All roles granted in `account`, fetched once per account per process
    pub async fn list_roles(&self, account: &AccountRecord) -> Result<Vec<RoleRecord>> {
        if let Some(roles) = self.roles.read().await.get(&account.account_id) {
            return Ok(roles.clone());
        }

        let roles = self.fetch_roles(account).await?;
        self.roles
            .write()
            .await
            .insert(account.account_id.clone(), roles.clone());
        Ok(roles)
    }

    /// Rebuild the role table with at most `concurrency` workers
    pub async fn refresh_all(self: &Arc<Self>, concurrency: usize) -> Result<RoleTable> {
        let mut progress = Progress::start(self.options.progress_interval);
        let accounts = progress.watch(self.list_accounts()).await?;
        progress.total = accounts.len();
        let previous = self.role_table().await;

        if let Some((first, rest)) = accounts.split_first() {
            let roles = progress.watch(self.list_roles(first)).await?;
            self.merge_account(first, roles, &previous).await;
            progress.completed += 1;

            if !rest.is_empty() {
                self.fan_out(rest, concurrency, &previous, &mut progress).await?;
            }
        }

        self.finish_refresh(&accounts, &previous).await?;
        let table = self.role_table().await;
        info!(
            accounts = table.accounts.len(),
            roles = table.len(),
            "role discovery complete"
        );
        Ok(table)
    }

    /// Stamp a role as just used
    pub async fn record_usage(&self, arn: &str) -> Result<()> {
        let mut table = self.table.write().await;
        let role = table
            .find_by_arn_mut(arn)
            .ok_or_else(|| BrokerError::UnknownRole(arn.to_string()))?;
        role.history = Some(Utc::now().timestamp().to_string());
        Ok(())
    }

    /// Record when the last credentials issued for a role expire
    pub async fn set_role_expires(&self, arn: &str, expires_at: DateTime<Utc>) -> Result<()> {
        let mut table = self.table.write().await;
        let role = table
            .find_by_arn_mut(arn)
            .ok_or_else(|| BrokerError::UnknownRole(arn.to_string()))?;
        role.expires_at = Some(expires_at);
        Ok(())
    }

    /// Forget every recorded expiry
    pub async fn mark_roles_expired(&self) {
        let mut table = self.table.write().await;
        for roles in table.accounts.values_mut() {
            for role in roles.values_mut() {
                role.expires_at = None;
            }
        }
    }

    async fn fetch_accounts(&self) -> Result<Vec<AccountRecord>> {
        let mut records: Vec<AccountRecord> = Vec::new();
        let mut seen = HashSet::new();
        let mut requested = HashSet::new();
        let mut next_token: Option<String> = None;

        loop {
            let page_token = next_token.as_deref();
            let portal = &self.portal;
            let page = call_with_remediation(
                &self.auth,
                &self.options.retry,
                "list_accounts",
                |token| async move { portal.list_accounts(&token.value, page_token).await },
            )
            .await?;

            for summary in page.accounts {
                let account_id = normalize_account_id(&summary.account_id)?;
                if !seen.insert(account_id.clone()) {
                    debug!(%account_id, "skipping duplicate account");
                    continue;
                }
                records.push(AccountRecord {
                    index: records.len(),
                    account_id,
                    display_name: summary.account_name,
                    email_address: summary.email_address,
                });
            }

            next_token = next_page(&mut requested, page.next_token, "accounts");
            if next_token.is_none() {
                break;
            }
        }

        info!(count = records.len(), "discovered accounts");
        Ok(records)
    }

    async fn fetch_roles(&self, account: &AccountRecord) -> Result<Vec<RoleRecord>> {
        let mut roles: Vec<RoleRecord> = Vec::new();
        let mut seen = HashSet::new();
        let mut requested = HashSet::new();
        let mut next_token: Option<String> = None;

        loop {
            let page_token = next_token.as_deref();
            let portal = &self.portal;
            let account_id = account.account_id.as_str();
            let page = call_with_remediation(
                &self.auth,
                &self.options.retry,
                "list_account_roles",
                |token| async move {
                    portal
                        .list_account_roles(&token.value, account_id, page_token)
                        .await
                },
            )
            .await?;

            for summary in page.roles {
                if !seen.insert(summary.role_name.clone()) {
                    debug!(role = %summary.role_name, "skipping duplicate role");
                    continue;
                }
                roles.push(self.role_record(
                    &account.account_id,
                    &summary.role_name,
                    Some(&account.display_name),
                )?);
            }

            next_token = next_page(&mut requested, page.next_token, "roles");
            if next_token.is_none() {
                break;
            }
        }

        debug!(account_id = %account.account_id, count = roles.len(), "discovered roles");
        Ok(roles)
    }

    fn role_record(
        &self,
        account_id: &str,
        role_name: &str,
        account_name: Option<&str>,
    ) -> Result<RoleRecord> {
        let account = self.settings.account(account_id);
        let role = self.settings.role(account_id, role_name);

        Ok(RoleRecord {
            account_id: normalize_account_id(account_id)?,
            role_name: role_name.to_string(),
            arn: make_role_arn(account_id, role_name)?,
            via_arn: self.settings.via_arn(account_id, role_name)?,
            expires_at: None,
            history: None,
            account_name: account_name
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .or_else(|| account.and_then(|a| a.name.clone())),
            profile: role.and_then(|r| r.profile.clone()),
            default_region: role
                .and_then(|r| r.default_region.clone())
                .or_else(|| account.and_then(|a| a.default_region.clone()))
                .or_else(|| self.settings.default_region.clone()),
        })
    }

    async fn fan_out(
        self: &Arc<Self>,
        accounts: &[AccountRecord],
        concurrency: usize,
        previous: &RoleTable,
        progress: &mut Progress,
    ) -> Result<()> {
        let workers = concurrency.clamp(1, accounts.len());
        let (work_tx, work_rx) = mpsc::channel::<AccountRecord>(accounts.len());
        let (result_tx, mut result_rx) = mpsc::channel::<Result<AccountRoles>>(workers);

        for account in accounts {
            work_tx
                .send(account.clone())
                .await
                .map_err(|_| BrokerError::Worker("work queue closed".to_string()))?;
        }
        drop(work_tx);

        let work_rx = Arc::new(Mutex::new(work_rx));
        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|worker| {
                let this = Arc::clone(self);
                let work_rx = Arc::clone(&work_rx);
                let result_tx = result_tx.clone();
                tokio::spawn(async move {
                    loop {
                        let next = work_rx.lock().await.recv().await;
                        let Some(account) = next else { break };
                        debug!(worker, account_id = %account.account_id, "fetching roles");
                        let result = this
                            .list_roles(&account)
                            .await
                            .map(|roles| (account, roles));
                        if result_tx.send(result).await.is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();
        drop(result_tx);
        debug!(workers, accounts = accounts.len(), "started discovery workers");

        let mut completed = 0usize;

        let outcome = loop {
            tokio::select! {
                received = result_rx.recv() => match received {
                    Some(Ok((account, roles))) => {
                        self.merge_account(&account, roles, previous).await;
                        completed += 1;
                        progress.completed += 1;
                    }
                    Some(Err(e)) => break Err(e),
                    None => break Ok(()),
                },
                _ = progress.ticker.tick(), if !progress.advised => progress.advise(),
            }
        };

        if outcome.is_err() {
            for handle in &handles {
                handle.abort();
            }
        }
        for handle in handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    return Err(BrokerError::Worker(e.to_string()));
                }
            }
        }
        outcome?;

        if completed != accounts.len() {
            return Err(BrokerError::Worker(format!(
                "discovered {} of {} accounts",
                completed,
                accounts.len()
            )));
        }
        Ok(())
    }

    /// Replace one account's roles, carrying local metadata forward by ARN
    async fn merge_account(
        &self,
        account: &AccountRecord,
        roles: Vec<RoleRecord>,
        previous: &RoleTable,
    ) {
        let mut table = self.table.write().await;
        let replaced = table.accounts.remove(&account.account_id).unwrap_or_default();

        let merged = roles
            .into_iter()
            .map(|mut role| {
                let old = replaced
                    .get(&role.role_name)
                    .or_else(|| previous.find_by_arn(&role.arn));
                if let Some(old) = old {
                    role.carry_metadata_from(old);
                }
                role
            })
            .collect();
        table.replace_account(&account.account_id, merged);
    }

    /// Drop vanished accounts and add roles only reachable through a via chain
    async fn finish_refresh(
        &self,
        accounts: &[AccountRecord],
        previous: &RoleTable,
    ) -> Result<()> {
        let mut chained = Vec::new();
        for (account_id, account) in &self.settings.accounts {
            for (role_name, role) in &account.roles {
                if role.via.is_some() {
                    chained.push(self.role_record(account_id, role_name, None)?);
                }
            }
        }

        let visible: HashSet<&str> = accounts.iter().map(|a| a.account_id.as_str()).collect();
        let mut table = self.table.write().await;
        table
            .accounts
            .retain(|account_id, _| visible.contains(account_id.as_str()));

        for mut role in chained {
            if table.get(&role.account_id, &role.role_name).is_some() {
                continue;
            }
            if let Some(old) = previous.find_by_arn(&role.arn) {
                role.carry_metadata_from(old);
            }
            table.insert(role);
        }
        Ok(())
    }
}
