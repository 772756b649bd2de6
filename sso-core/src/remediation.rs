//! Single-remediation retry policy for provider calls
//!
//! A provider call that hits a rate limit or a rejected token is remediated
//! once (jittered sleep, or one serialised reauthentication) and retried
//! once. Whatever the retry returns is final.

use crate::error::Result;
use crate::DEFAULT_MAX_BACKOFF_SECS;
use rand::Rng;
use sso_auth::{Authenticator, ProviderError};
use sso_common::AccessToken;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Retry tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound of the random rate-limit delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_backoff: Duration::from_secs(DEFAULT_MAX_BACKOFF_SECS),
        }
    }
}

impl RetryPolicy {
    /// Uniformly random delay in `[0, max_backoff]`
    pub fn jitter(&self) -> Duration {
        let ceiling = self.max_backoff.as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }
}

/// Run `call` with a fresh token, remediating one rate limit or rejection
pub async fn call_with_remediation<T, F, Fut>(
    auth: &Authenticator,
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T>
where
    F: FnMut(AccessToken) -> Fut,
    Fut: Future<Output = std::result::Result<T, ProviderError>>,
{
    let token = auth.ensure_authenticated().await?;
    match call(token.clone()).await {
        Ok(value) => return Ok(value),
        Err(ProviderError::RateLimited) => {
            let delay = policy.jitter();
            warn!(operation, ?delay, "rate limited, retrying once");
            sleep(delay).await;
        }
        Err(ProviderError::Unauthorized) => {
            warn!(operation, "access token rejected, reauthenticating");
            auth.reauthenticate_if_stale(&token).await?;
        }
        Err(e) => return Err(e.into()),
    }

    let token = auth.ensure_authenticated().await?;
    Ok(call(token).await?)
}
