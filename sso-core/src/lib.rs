//! # sso-core: role discovery and chained credential resolution
//!
//! Builds on [`sso_auth::Authenticator`] to enumerate every account and role
//! the user can reach and to issue short-lived credentials for any of them,
//! assuming through configured intermediate ("via") roles where needed.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────────────┐
//!                    │      SsoBroker       │
//!                    └──────────────────────┘
//!                      │                 │
//!                      ▼                 ▼
//!          ┌─────────────────┐   ┌──────────────────────┐
//!          │  RoleDiscovery  │   │  RoleChainResolver   │
//!          │  worker pool    │   │  visited set         │
//!          │  RwLock<Table>  │   │  RoleAssumer (STS)   │
//!          └─────────────────┘   └──────────────────────┘
//!                      │                 │
//!                      └──────┬──────────┘
//!                             ▼
//!              Arc<Authenticator> (shared token)
//! ```

#![warn(missing_docs)]

pub mod broker;
pub mod config;
pub mod discovery;
pub mod error;
pub mod remediation;
pub mod resolver;
pub mod sts;

// Re-exports for convenience
pub use broker::SsoBroker;
pub use config::{AccountSettings, BrokerConfig, RoleSettings, SsoSettings};
pub use discovery::{DiscoveryOptions, RoleDiscovery};
pub use error::{BrokerError, Result};
pub use remediation::RetryPolicy;
pub use resolver::{session_name, RoleChainResolver};
pub use sts::{AssumeRoleRequest, RoleAssumer, StsRoleAssumer};

/// Default size of the discovery worker pool
pub const DEFAULT_THREADS: usize = 5;

/// Default ceiling for the jittered rate-limit backoff
pub const DEFAULT_MAX_BACKOFF_SECS: u64 = 5;

/// Default delay before the one-time discovery progress notice
pub const DEFAULT_PROGRESS_INTERVAL_SECS: u64 = 2;
