//! Cloud role-assumption adapter

use crate::error::{BrokerError, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sts::config::{Credentials, Region};
use aws_sdk_sts::error::DisplayErrorContext;
use chrono::DateTime;
use sso_common::{parse_role_arn, RoleCredentials};
use tracing::debug;

/// Parameters of one assume-role hop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumeRoleRequest {
    /// Role being assumed
    pub role_arn: String,
    /// Session name recorded by the provider
    pub session_name: String,
    /// Optional external id
    pub external_id: Option<String>,
    /// Optional source identity
    pub source_identity: Option<String>,
}

/// Exchanges one role's credentials for another's
#[async_trait]
pub trait RoleAssumer: Send + Sync {
    /// Assume `request.role_arn` using `credentials`
    async fn assume_role(
        &self,
        credentials: &RoleCredentials,
        request: &AssumeRoleRequest,
    ) -> Result<RoleCredentials>;
}

/// STS `AssumeRole` through the AWS SDK, which signs the request
#[derive(Debug, Clone)]
pub struct StsRoleAssumer {
    region: String,
}

impl StsRoleAssumer {
    /// Call STS in `region`
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
        }
    }
}

#[async_trait]
impl RoleAssumer for StsRoleAssumer {
    async fn assume_role(
        &self,
        credentials: &RoleCredentials,
        request: &AssumeRoleRequest,
    ) -> Result<RoleCredentials> {
        let (account_id, role_name) = parse_role_arn(&request.role_arn)?;
        let provider = Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            Some(credentials.session_token.clone()),
            None,
            "sso-broker",
        );
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .credentials_provider(provider)
            .load()
            .await;
        let client = aws_sdk_sts::Client::new(&config);

        debug!(role_arn = %request.role_arn, session = %request.session_name, "assuming role");
        let output = client
            .assume_role()
            .role_arn(&request.role_arn)
            .role_session_name(&request.session_name)
            .set_external_id(request.external_id.clone())
            .set_source_identity(request.source_identity.clone())
            .send()
            .await
            .map_err(|e| BrokerError::AssumeRole {
                arn: request.role_arn.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let issued = output.credentials().ok_or_else(|| BrokerError::AssumeRole {
            arn: request.role_arn.clone(),
            message: "response did not include credentials".to_string(),
        })?;
        let expires_at = DateTime::from_timestamp(issued.expiration().secs(), 0).ok_or_else(|| {
            BrokerError::AssumeRole {
                arn: request.role_arn.clone(),
                message: "expiration out of range".to_string(),
            }
        })?;

        let assumed = RoleCredentials {
            account_id,
            role_name,
            access_key_id: issued.access_key_id().to_string(),
            secret_access_key: issued.secret_access_key().to_string(),
            session_token: issued.session_token().to_string(),
            expires_at,
        };
        assumed.validate()?;
        Ok(assumed)
    }
}
