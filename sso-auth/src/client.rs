//! HTTP client for the SSO OIDC and portal REST APIs

use crate::error::ProviderError;
use crate::provider::{
    continuation, AccountPage, AccountSummary, OidcApi, PortalApi, RolePage, RoleSummary,
    DEVICE_GRANT_TYPE,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sso_common::{AccessToken, ClientRegistration, DeviceAuthorization, RoleCredentials};
use tracing::debug;
use url::Url;

const BEARER_HEADER: &str = "x-amz-sso_bearer_token";
const ERROR_TYPE_HEADER: &str = "x-amzn-errortype";
const PAGE_SIZE: &str = "1000";
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Talks to one SSO region
#[derive(Clone, Debug)]
pub struct SsoHttpClient {
    oidc_url: String,
    portal_url: String,
    client: reqwest::Client,
}

impl SsoHttpClient {
    /// Client for the public endpoints of `region`
    pub fn new(region: &str) -> Result<Self, ProviderError> {
        Self::with_endpoints(
            &format!("https://oidc.{}.amazonaws.com", region),
            &format!("https://portal.sso.{}.amazonaws.com", region),
        )
    }

    /// Client for explicit endpoints
    pub fn with_endpoints(oidc_url: &str, portal_url: &str) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            oidc_url: base_url(oidc_url)?,
            portal_url: base_url(portal_url)?,
            client,
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ProviderError> {
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn portal_get(&self, path: &str, access_token: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.portal_url, path))
            .header(BEARER_HEADER, access_token)
    }
}

fn base_url(raw: &str) -> Result<String, ProviderError> {
    let url =
        Url::parse(raw).map_err(|e| ProviderError::InvalidEndpoint(format!("{}: {}", raw, e)))?;
    Ok(url.as_str().trim_end_matches('/').to_string())
}

fn timestamp(secs: i64, field: &str) -> Result<DateTime<Utc>, ProviderError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| ProviderError::InvalidResponse(format!("{} out of range: {}", field, secs)))
}

fn required(value: Option<String>, field: &str) -> Result<String, ProviderError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ProviderError::InvalidResponse(format!("missing {}", field)))
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    error_description: Option<String>,
    #[serde(rename = "__type")]
    error_type: Option<String>,
    #[serde(alias = "Message")]
    message: Option<String>,
}

async fn error_from_response(response: Response) -> ProviderError {
    let status = response.status();
    let header_code = response
        .headers()
        .get(ERROR_TYPE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(':').next().unwrap_or(value).to_string());
    let text = response.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();

    let code = header_code
        .or(body.error)
        .or(body.error_type.map(|t| t.rsplit('#').next().unwrap_or(&t).to_string()))
        .unwrap_or_default();
    let message = body
        .error_description
        .or(body.message)
        .unwrap_or(text);
    classify_error(status, &code, message)
}

/// Map a provider error response onto the error taxonomy
pub(crate) fn classify_error(status: StatusCode, code: &str, message: String) -> ProviderError {
    match code {
        "authorization_pending" | "AuthorizationPendingException" => {
            ProviderError::AuthorizationPending
        }
        "slow_down" | "SlowDownException" => ProviderError::SlowDown,
        "expired_token" | "ExpiredTokenException" => ProviderError::ExpiredToken,
        "TooManyRequestsException" => ProviderError::RateLimited,
        "UnauthorizedException" => ProviderError::Unauthorized,
        _ if status == StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited,
        _ if status == StatusCode::UNAUTHORIZED => ProviderError::Unauthorized,
        _ => ProviderError::Service {
            status: status.as_u16(),
            code: code.to_string(),
            message,
        },
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterClientRequest<'a> {
    client_name: &'a str,
    client_type: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterClientResponse {
    client_id: Option<String>,
    client_secret: Option<String>,
    #[serde(default)]
    client_id_issued_at: i64,
    #[serde(default)]
    client_secret_expires_at: i64,
    authorization_endpoint: Option<String>,
    token_endpoint: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartDeviceAuthorizationRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    start_url: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartDeviceAuthorizationResponse {
    device_code: Option<String>,
    user_code: Option<String>,
    verification_uri: Option<String>,
    verification_uri_complete: Option<String>,
    #[serde(default)]
    expires_in: i64,
    #[serde(default)]
    interval: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
    device_code: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: i64,
    id_token: Option<String>,
    refresh_token: Option<String>,
    token_type: Option<String>,
}

#[async_trait]
impl OidcApi for SsoHttpClient {
    async fn register_client(
        &self,
        client_name: &str,
        client_type: &str,
    ) -> Result<ClientRegistration, ProviderError> {
        let request = self
            .client
            .post(format!("{}/client/register", self.oidc_url))
            .json(&RegisterClientRequest {
                client_name,
                client_type,
            });
        let response: RegisterClientResponse = self.send_json(request).await?;

        Ok(ClientRegistration {
            client_id: required(response.client_id, "clientId")?,
            client_secret: required(response.client_secret, "clientSecret")?,
            issued_at: timestamp(response.client_id_issued_at, "clientIdIssuedAt")?,
            expires_at: timestamp(response.client_secret_expires_at, "clientSecretExpiresAt")?,
            authorization_endpoint: response.authorization_endpoint,
            token_endpoint: response.token_endpoint,
        })
    }

    async fn start_device_authorization(
        &self,
        registration: &ClientRegistration,
        start_url: &str,
    ) -> Result<DeviceAuthorization, ProviderError> {
        let request = self
            .client
            .post(format!("{}/device_authorization", self.oidc_url))
            .json(&StartDeviceAuthorizationRequest {
                client_id: &registration.client_id,
                client_secret: &registration.client_secret,
                start_url,
            });
        let response: StartDeviceAuthorizationResponse = self.send_json(request).await?;

        Ok(DeviceAuthorization {
            device_code: required(response.device_code, "deviceCode")?,
            user_code: required(response.user_code, "userCode")?,
            verification_uri: response.verification_uri.unwrap_or_default(),
            verification_uri_complete: response.verification_uri_complete,
            expires_in_seconds: response.expires_in.max(0) as u64,
            poll_interval_seconds: response.interval.max(0) as u64,
        })
    }

    async fn create_token(
        &self,
        registration: &ClientRegistration,
        device: &DeviceAuthorization,
    ) -> Result<AccessToken, ProviderError> {
        let request = self
            .client
            .post(format!("{}/token", self.oidc_url))
            .json(&CreateTokenRequest {
                client_id: &registration.client_id,
                client_secret: &registration.client_secret,
                grant_type: DEVICE_GRANT_TYPE,
                device_code: &device.device_code,
            });
        let response: CreateTokenResponse = self.send_json(request).await?;

        let mut token = AccessToken::expiring_in(
            required(response.access_token, "accessToken")?,
            response.expires_in,
        );
        token.id_token = response.id_token;
        token.refresh_token = response.refresh_token;
        token.token_type = response.token_type;
        Ok(token)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountInfo {
    account_id: Option<String>,
    account_name: Option<String>,
    email_address: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListAccountsResponse {
    #[serde(default)]
    account_list: Vec<AccountInfo>,
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleInfo {
    account_id: Option<String>,
    role_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListAccountRolesResponse {
    #[serde(default)]
    role_list: Vec<RoleInfo>,
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleCredentialsBody {
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    session_token: Option<String>,
    /// Epoch milliseconds
    #[serde(default)]
    expiration: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetRoleCredentialsResponse {
    role_credentials: Option<RoleCredentialsBody>,
}

#[async_trait]
impl PortalApi for SsoHttpClient {
    async fn list_accounts(
        &self,
        access_token: &str,
        next_token: Option<&str>,
    ) -> Result<AccountPage, ProviderError> {
        let mut request = self
            .portal_get("/assignment/accounts", access_token)
            .query(&[("max_result", PAGE_SIZE)]);
        if let Some(next) = next_token {
            request = request.query(&[("next_token", next)]);
        }
        let response: ListAccountsResponse = self.send_json(request).await?;
        debug!(count = response.account_list.len(), "listed accounts page");

        let accounts = response
            .account_list
            .into_iter()
            .map(|info| -> Result<AccountSummary, ProviderError> {
                Ok(AccountSummary {
                    account_id: required(info.account_id, "accountId")?,
                    account_name: info.account_name.unwrap_or_default(),
                    email_address: info.email_address.unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(AccountPage {
            accounts,
            next_token: continuation(response.next_token),
        })
    }

    async fn list_account_roles(
        &self,
        access_token: &str,
        account_id: &str,
        next_token: Option<&str>,
    ) -> Result<RolePage, ProviderError> {
        let mut request = self
            .portal_get("/assignment/roles", access_token)
            .query(&[("account_id", account_id), ("max_result", PAGE_SIZE)]);
        if let Some(next) = next_token {
            request = request.query(&[("next_token", next)]);
        }
        let response: ListAccountRolesResponse = self.send_json(request).await?;

        let roles = response
            .role_list
            .into_iter()
            .map(|info| -> Result<RoleSummary, ProviderError> {
                Ok(RoleSummary {
                    account_id: info.account_id.unwrap_or_else(|| account_id.to_string()),
                    role_name: required(info.role_name, "roleName")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RolePage {
            roles,
            next_token: continuation(response.next_token),
        })
    }

    async fn get_role_credentials(
        &self,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<RoleCredentials, ProviderError> {
        let request = self
            .portal_get("/federation/credentials", access_token)
            .query(&[("account_id", account_id), ("role_name", role_name)]);
        let response: GetRoleCredentialsResponse = self.send_json(request).await?;
        let body = response
            .role_credentials
            .ok_or_else(|| ProviderError::InvalidResponse("missing roleCredentials".into()))?;

        let expires_at = DateTime::from_timestamp_millis(body.expiration).ok_or_else(|| {
            ProviderError::InvalidResponse(format!("expiration out of range: {}", body.expiration))
        })?;
        Ok(RoleCredentials {
            account_id: account_id.to_string(),
            role_name: role_name.to_string(),
            access_key_id: required(body.access_key_id, "accessKeyId")?,
            secret_access_key: required(body.secret_access_key, "secretAccessKey")?,
            session_token: required(body.session_token, "sessionToken")?,
            expires_at,
        })
    }

    async fn logout(&self, access_token: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(format!("{}/logout", self.portal_url))
            .header(BEARER_HEADER, access_token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(())
    }
}
