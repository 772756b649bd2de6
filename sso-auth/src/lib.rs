//! # sso-auth: device authorization for the SSO credential broker
//!
//! Authenticates a user against an SSO identity provider with the OAuth2
//! device-authorization grant and keeps the resulting bearer token fresh.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Authenticator (one per SSO instance)        │
//! │  token: RwLock<Option<AccessToken>>          │
//! │  reauth: Mutex<()>                           │
//! └──────────────────────────────────────────────┘
//!        │               │                │
//!        ▼               ▼                ▼
//!  ┌───────────┐   ┌─────────────┐   ┌──────────────────────┐
//!  │ OidcApi   │   │ SecureStore │   │ VerificationPresenter│
//!  │ PortalApi │   │ (key/value) │   │ print / open / exec  │
//!  └───────────┘   └─────────────┘   └──────────────────────┘
//!        │
//!        ▼
//!  SsoHttpClient (reqwest)
//! ```

#![warn(missing_docs)]

pub mod authenticator;
pub mod client;
pub mod error;
pub mod presenter;
pub mod provider;
pub mod store;

// Re-exports for convenience
pub use authenticator::{Authenticator, DEFAULT_POLL_INTERVAL, SLOW_DOWN_STEP};
pub use client::SsoHttpClient;
pub use error::{AuthError, ProviderError, Result, StoreError};
pub use presenter::{
    presenter_for, BrowserPresenter, CommandPresenter, PrintPresenter, UrlAction,
    VerificationPresenter,
};
pub use provider::{
    continuation, AccountPage, AccountSummary, OidcApi, PortalApi, ProviderClients, RolePage,
    RoleSummary,
};
pub use store::{JsonFileStore, MemoryStore, SecureStore};
