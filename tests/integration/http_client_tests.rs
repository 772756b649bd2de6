//! SsoHttpClient against a mock SSO OIDC and portal server

use assert_matches::assert_matches;
use serde_json::json;
use sso_auth::{OidcApi, PortalApi, ProviderError, SsoHttpClient};
use sso_broker_tests::common::{config_with, setup_test_logging, START_URL};
use sso_common::{ClientRegistration, DeviceAuthorization};
use sso_core::{AssumeRoleRequest, RoleAssumer, SsoBroker};
use std::sync::Arc;
use wiremock::matchers::{
    body_partial_json, header, method, path, query_param, query_param_is_missing,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BEARER: &str = "x-amz-sso_bearer_token";

async fn client_for(server: &MockServer) -> SsoHttpClient {
    SsoHttpClient::with_endpoints(&server.uri(), &server.uri()).expect("valid mock endpoints")
}

fn registration() -> ClientRegistration {
    ClientRegistration {
        client_id: "cid".to_string(),
        client_secret: "csecret".to_string(),
        issued_at: chrono::Utc::now(),
        expires_at: chrono::Utc::now() + chrono::Duration::days(90),
        authorization_endpoint: None,
        token_endpoint: None,
    }
}

fn device() -> DeviceAuthorization {
    DeviceAuthorization {
        device_code: "dev-code".to_string(),
        user_code: "ABCD-EFGH".to_string(),
        verification_uri: "https://device.example/".to_string(),
        verification_uri_complete: None,
        expires_in_seconds: 600,
        poll_interval_seconds: 5,
    }
}

#[tokio::test]
async fn test_register_client() {
    setup_test_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/client/register"))
        .and(body_partial_json(json!({"clientName": "sso-broker", "clientType": "public"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "clientId": "cid",
            "clientSecret": "csecret",
            "clientIdIssuedAt": 1_700_000_000,
            "clientSecretExpiresAt": 1_707_776_000,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let registration = client.register_client("sso-broker", "public").await.unwrap();

    assert_eq!(registration.client_id, "cid");
    assert_eq!(registration.client_secret, "csecret");
    assert_eq!(registration.issued_at.timestamp(), 1_700_000_000);
    assert_eq!(registration.expires_at.timestamp(), 1_707_776_000);
}

#[tokio::test]
async fn test_start_device_authorization() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/device_authorization"))
        .and(body_partial_json(json!({
            "clientId": "cid",
            "clientSecret": "csecret",
            "startUrl": START_URL,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "deviceCode": "dev-code",
            "userCode": "ABCD-EFGH",
            "verificationUri": "https://device.example/",
            "verificationUriComplete": "https://device.example/?user_code=ABCD-EFGH",
            "expiresIn": 600,
            "interval": 1,
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let device = client
        .start_device_authorization(&registration(), START_URL)
        .await
        .unwrap();

    assert_eq!(device.device_code, "dev-code");
    assert_eq!(device.user_code, "ABCD-EFGH");
    assert_eq!(device.expires_in_seconds, 600);
    assert_eq!(device.poll_interval_seconds, 1);
    assert_eq!(
        device.presentation_url(),
        "https://device.example/?user_code=ABCD-EFGH"
    );
}

#[tokio::test]
async fn test_create_token_signals() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "authorization_pending",
            "error_description": "waiting for the user",
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(400)
                .insert_header("x-amzn-errortype", "SlowDownException:http://internal.amazon.com/")
                .set_body_json(json!({"message": "slow down"})),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "expired_token",
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let (registration, device) = (registration(), device());

    assert_matches!(
        client.create_token(&registration, &device).await,
        Err(ProviderError::AuthorizationPending)
    );
    assert_matches!(
        client.create_token(&registration, &device).await,
        Err(ProviderError::SlowDown)
    );
    assert_matches!(
        client.create_token(&registration, &device).await,
        Err(ProviderError::ExpiredToken)
    );
}

#[tokio::test]
async fn test_create_token_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_partial_json(json!({
            "grantType": "urn:ietf:params:oauth:grant-type:device_code",
            "deviceCode": "dev-code",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accessToken": "access-1",
            "expiresIn": 28800,
            "tokenType": "Bearer",
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let token = client.create_token(&registration(), &device()).await.unwrap();

    assert_eq!(token.value, "access-1");
    assert_eq!(token.token_type.as_deref(), Some("Bearer"));
    assert!(!token.is_expired());
    let lifetime = token.expires_at - chrono::Utc::now();
    assert!(lifetime.num_seconds() > 28_000);
}

#[tokio::test]
async fn test_list_accounts_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/assignment/accounts"))
        .and(header(BEARER, "access-1"))
        .and(query_param_is_missing("next_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accountList": [
                {"accountId": "000000000042", "accountName": "prod", "emailAddress": "prod@example.com"},
                {"accountId": "111111111111", "accountName": "dev", "emailAddress": "dev@example.com"},
            ],
            "nextToken": "page-2",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/assignment/accounts"))
        .and(query_param("next_token", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accountList": [
                {"accountId": "222222222222", "accountName": "tools"},
            ],
            "nextToken": "",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let first = client.list_accounts("access-1", None).await.unwrap();
    assert_eq!(first.accounts.len(), 2);
    assert_eq!(first.accounts[0].account_name, "prod");
    assert_eq!(first.next_token.as_deref(), Some("page-2"));

    let second = client.list_accounts("access-1", Some("page-2")).await.unwrap();
    assert_eq!(second.accounts[0].account_id, "222222222222");
    assert_eq!(second.accounts[0].email_address, "");
    assert_eq!(second.next_token, None);
}

#[tokio::test]
async fn test_list_roles_maps_throttling_and_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/assignment/roles"))
        .and(query_param("account_id", "000000000001"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "message": "Rate exceeded",
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/assignment/roles"))
        .and(query_param("account_id", "000000000002"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "message": "Session token not found or invalid",
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/assignment/roles"))
        .and(query_param("account_id", "000000000003"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    assert_matches!(
        client.list_account_roles("t", "000000000001", None).await,
        Err(ProviderError::RateLimited)
    );
    assert_matches!(
        client.list_account_roles("t", "000000000002", None).await,
        Err(ProviderError::Unauthorized)
    );
    assert_matches!(
        client.list_account_roles("t", "000000000003", None).await,
        Err(ProviderError::Service { status: 500, ref message, .. }) if message == "boom"
    );
}

#[tokio::test]
async fn test_get_role_credentials_reads_millisecond_expiry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/federation/credentials"))
        .and(header(BEARER, "access-1"))
        .and(query_param("account_id", "000000000042"))
        .and(query_param("role_name", "Admin"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "roleCredentials": {
                "accessKeyId": "ASIAEXAMPLE",
                "secretAccessKey": "wJalrXUtnFEMI",
                "sessionToken": "FwoGZXIvYXdzEJr",
                "expiration": 1_893_456_000_123_i64,
            }
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let credentials = client
        .get_role_credentials("access-1", "000000000042", "Admin")
        .await
        .unwrap();

    assert_eq!(credentials.account_id, "000000000042");
    assert_eq!(credentials.role_name, "Admin");
    assert_eq!(credentials.access_key_id, "ASIAEXAMPLE");
    assert_eq!(credentials.expires_at.timestamp_millis(), 1_893_456_000_123);
    assert!(credentials.validate().is_ok());
}

#[tokio::test]
async fn test_incomplete_credentials_are_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/federation/credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "roleCredentials": {
                "accessKeyId": "ASIAEXAMPLE",
                "secretAccessKey": "",
                "sessionToken": "FwoGZXIvYXdzEJr",
                "expiration": 1_893_456_000_000_i64,
            }
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    assert_matches!(
        client.get_role_credentials("t", "000000000042", "Admin").await,
        Err(ProviderError::InvalidResponse(_))
    );
}

#[tokio::test]
async fn test_logout_posts_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/logout"))
        .and(header(BEARER, "access-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    client.logout("access-1").await.unwrap();
}

#[test]
fn test_invalid_endpoint_is_rejected() {
    assert_matches!(
        SsoHttpClient::with_endpoints("not a url", "https://portal.example"),
        Err(ProviderError::InvalidEndpoint(_))
    );
}

struct NoAssume;

#[async_trait::async_trait]
impl RoleAssumer for NoAssume {
    async fn assume_role(
        &self,
        _credentials: &sso_common::RoleCredentials,
        request: &AssumeRoleRequest,
    ) -> sso_core::Result<sso_common::RoleCredentials> {
        panic!("unexpected assume-role call for {}", request.role_arn);
    }
}

#[tokio::test]
async fn test_broker_over_http() {
    setup_test_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/client/register"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "clientId": "cid",
            "clientSecret": "csecret",
            "clientIdIssuedAt": chrono::Utc::now().timestamp(),
            "clientSecretExpiresAt": chrono::Utc::now().timestamp() + 86_400 * 90,
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/device_authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "deviceCode": "dev-code",
            "userCode": "ABCD-EFGH",
            "verificationUri": "https://device.example/",
            "expiresIn": 600,
            "interval": 1,
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accessToken": "access-1",
            "expiresIn": 28800,
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/assignment/accounts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accountList": [{"accountId": "42", "accountName": "prod"}],
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/assignment/roles"))
        .and(query_param("account_id", "000000000042"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "roleList": [{"accountId": "000000000042", "roleName": "Admin"}],
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/federation/credentials"))
        .and(header(BEARER, "access-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "roleCredentials": {
                "accessKeyId": "ASIAEXAMPLE",
                "secretAccessKey": "wJalrXUtnFEMI",
                "sessionToken": "FwoGZXIvYXdzEJr",
                "expiration": (chrono::Utc::now().timestamp() + 3600) * 1000,
            }
        })))
        .mount(&server)
        .await;

    let config = config_with("");
    let (name, settings) = config.sso(None).unwrap();
    let client = Arc::new(client_for(&server).await);
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(sso_auth::JsonFileStore::open(dir.path().join("store.json")).unwrap());
    let broker = SsoBroker::new(
        name,
        settings.clone(),
        config.discovery_options(),
        sso_auth::ProviderClients::from_client(client),
        store.clone(),
        Arc::new(sso_auth::PrintPresenter),
        Arc::new(NoAssume),
    );

    let table = broker.refresh_all(5).await.unwrap();
    assert_eq!(table.len(), 1);
    let admin = table.get("000000000042", "Admin").unwrap();
    assert_eq!(admin.account_name.as_deref(), Some("prod"));

    let credentials = broker.get_credentials("000000000042", "Admin").await.unwrap();
    assert_eq!(credentials.access_key_id, "ASIAEXAMPLE");
    assert!(broker
        .role_table()
        .await
        .get("000000000042", "Admin")
        .unwrap()
        .history
        .is_some());

    let reopened = sso_auth::JsonFileStore::open(store.path()).unwrap();
    let stored = sso_auth::SecureStore::get_token(&reopened, &settings.store_key())
        .unwrap()
        .unwrap();
    assert_eq!(stored.value, "access-1");
}
