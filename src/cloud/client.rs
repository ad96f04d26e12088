use async_trait::async_trait;
use md5::{Digest, Md5};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::{totp, CloudApi, Device};
use crate::config::PluginConfig;
use crate::error::CloudError;

const APP_NAME: &str = "wyze_ios_2.50.0";
const APP_VERSION: &str = "com.hualai.WyzeCam___2.50.0";
const PHONE_ID: &str = "wyze_developer_api";
const SC: &str = "9f275790cab94a72bd206c8876429f3c";
const SV: &str = "9d74946e652647e9b6c9d59326aef104";
const USER_AGENT: &str = "wyze-sdk";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);
const P2P_TOKEN_PID: &str = "P3";
// Access token expired or revoked.
const TOKEN_ERROR_CODES: &[&str] = &["2001", "2002"];

#[derive(Debug, Clone)]
pub struct CloudEndpoints {
    pub auth_url: String,
    pub api_url: String,
}

impl Default for CloudEndpoints {
    fn default() -> Self {
        Self {
            auth_url: "https://auth-prod.api.wyze.com".to_string(),
            api_url: "https://api.wyzecam.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    pub key_id: Option<String>,
    pub api_key: Option<String>,
    pub totp_key: Option<String>,
}

impl From<&PluginConfig> for Credentials {
    fn from(config: &PluginConfig) -> Self {
        Self {
            email: config.email.clone(),
            password: config.password.clone(),
            key_id: config.key_id().map(str::to_string),
            api_key: config.api_key().map(str::to_string),
            totp_key: config.totp_key().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    access_token: String,
    expires_at: Instant,
}

impl Session {
    fn is_valid(&self) -> bool {
        !self.access_token.is_empty() && Instant::now() < self.expires_at
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoginResponse {
    access_token: String,
    expires_in: Option<u64>,
    mfa_options: Option<Vec<String>>,
    mfa_details: Option<Value>,
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiResponse<T> {
    code: Value,
    msg: String,
    data: Option<T>,
}

impl<T> ApiResponse<T> {
    fn code(&self) -> String {
        match &self.code {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DeviceListData {
    device_list: Vec<Device>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PropertyListData {
    property_list: Vec<Property>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Property {
    pid: String,
    value: Value,
}

/// HTTP client for the Wyze cloud. Logs in lazily and again when the token expires.
pub struct WyzeCloud {
    http: Client,
    endpoints: CloudEndpoints,
    credentials: Credentials,
    session: RwLock<Option<Session>>,
}

impl WyzeCloud {
    pub fn new(credentials: Credentials) -> Result<Self, CloudError> {
        Self::with_endpoints(credentials, CloudEndpoints::default())
    }

    pub fn with_endpoints(
        credentials: Credentials,
        endpoints: CloudEndpoints,
    ) -> Result<Self, CloudError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            endpoints,
            credentials,
            session: RwLock::new(None),
        })
    }

    fn api_key_pair(&self) -> Option<(&str, &str)> {
        match (&self.credentials.key_id, &self.credentials.api_key) {
            (Some(key_id), Some(api_key)) => Some((key_id.as_str(), api_key.as_str())),
            _ => None,
        }
    }

    async fn access_token(&self) -> Result<String, CloudError> {
        if let Some(session) = self.session.read().await.as_ref() {
            if session.is_valid() {
                return Ok(session.access_token.clone());
            }
        }

        tracing::debug!("Cloud session missing or expired, logging in");
        self.login().await?;
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
            .ok_or_else(|| CloudError::AuthFailed("no session after login".into()))
    }

    async fn store_session(&self, response: &LoginResponse) {
        let lifetime = response
            .expires_in
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);

        *self.session.write().await = Some(Session {
            access_token: response.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
    }

    async fn verify_totp(&self, totp_key: &str, login: &LoginResponse) -> Result<(), CloudError> {
        let code = totp::generate_now(totp_key)?;
        let verification_id = login
            .mfa_details
            .as_ref()
            .and_then(|d| d.pointer("/totp_apps/0/app_id"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        let response = self
            .http
            .post(format!("{}/user/login", self.endpoints.auth_url))
            .header("User-Agent", USER_AGENT)
            .json(&json!({
                "email": self.credentials.email,
                "password": hash_password(&self.credentials.password),
                "mfa_type": "TotpVerificationCode",
                "verification_id": verification_id,
                "verification_code": code,
            }))
            .send()
            .await?;

        let verified: LoginResponse = decode(response, "TOTP verification response").await?;
        if verified.access_token.is_empty() {
            return Err(CloudError::AuthFailed("TOTP verification failed".into()));
        }

        self.store_session(&verified).await;
        Ok(())
    }

    /// POST to the app API; re-logs in once if the token was rejected.
    async fn api_call<T>(&self, path: &str, extra: Value, what: &'static str) -> Result<T, CloudError>
    where
        T: for<'de> Deserialize<'de> + Default,
    {
        let mut relogged = false;
        loop {
            let token = self.access_token().await?;
            let mut payload = json!({
                "access_token": token,
                "app_name": APP_NAME,
                "app_ver": APP_VERSION,
                "app_version": APP_VERSION,
                "phone_id": PHONE_ID,
                "phone_system_type": "1",
                "sc": SC,
                "sv": SV,
                "ts": chrono::Utc::now().timestamp_millis(),
            });
            if let (Some(payload), Value::Object(extra)) = (payload.as_object_mut(), extra.clone()) {
                payload.extend(extra);
            }

            let response = self
                .http
                .post(format!("{}{}", self.endpoints.api_url, path))
                .header("User-Agent", USER_AGENT)
                .json(&payload)
                .send()
                .await?;

            let body: ApiResponse<T> = decode(response, what).await?;
            let code = body.code();
            if code == "1" {
                return Ok(body.data.unwrap_or_default());
            }

            if TOKEN_ERROR_CODES.contains(&code.as_str()) && !relogged {
                tracing::info!("Cloud access token rejected ({}), logging in again", code);
                *self.session.write().await = None;
                relogged = true;
                continue;
            }

            return Err(CloudError::Api(format!("{} (code {})", body.msg, code)));
        }
    }
}

#[async_trait]
impl CloudApi for WyzeCloud {
    async fn login(&self) -> Result<(), CloudError> {
        let mut payload = json!({
            "email": self.credentials.email,
            "password": hash_password(&self.credentials.password),
        });

        let mut request = self
            .http
            .post(format!("{}/api/user/login", self.endpoints.auth_url))
            .header("User-Agent", USER_AGENT);

        if let Some((key_id, api_key)) = self.api_key_pair() {
            payload["keyid"] = json!(key_id);
            payload["apikey"] = json!(api_key);
            request = request.header("Keyid", key_id).header("Apikey", api_key);
        }

        let response = request.json(&payload).send().await?;
        let login: LoginResponse = decode(response, "login response").await?;

        if login.mfa_options.as_ref().is_some_and(|o| !o.is_empty()) {
            let totp_key = self
                .credentials
                .totp_key
                .as_deref()
                .ok_or(CloudError::MfaRequired)?;
            tracing::debug!("Cloud login requires MFA, verifying TOTP");
            return self.verify_totp(totp_key, &login).await;
        }

        if login.access_token.is_empty() {
            let reason = login
                .description
                .clone()
                .unwrap_or_else(|| "no access token received".to_string());
            return Err(CloudError::AuthFailed(reason));
        }

        self.store_session(&login).await;
        tracing::info!("Logged in to Wyze cloud as {}", self.credentials.email);
        Ok(())
    }

    async fn is_authenticated(&self) -> bool {
        self.session
            .read()
            .await
            .as_ref()
            .is_some_and(Session::is_valid)
    }

    async fn list_devices(&self) -> Result<Vec<Device>, CloudError> {
        let data: DeviceListData = self
            .api_call("/app/v2/home_page/get_object_list", json!({}), "device list")
            .await?;
        Ok(data.device_list)
    }

    async fn p2p_token(&self, mac: &str) -> Result<String, CloudError> {
        let data: PropertyListData = self
            .api_call(
                "/app/v2/device/get_property_list",
                json!({ "device_mac": mac }),
                "property list",
            )
            .await?;

        data.property_list
            .into_iter()
            .find(|p| p.pid == P2P_TOKEN_PID)
            .map(|p| match p.value {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .ok_or_else(|| CloudError::TokenNotFound(mac.to_string()))
    }
}

async fn decode<T>(response: reqwest::Response, what: &'static str) -> Result<T, CloudError>
where
    T: for<'de> Deserialize<'de>,
{
    let status = response.status();
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| CloudError::Decode {
        what,
        reason: if status.is_success() {
            e.to_string()
        } else {
            format!("HTTP {}: {}", status.as_u16(), e)
        },
    })
}

/// The cloud expects the password hashed with MD5 three times, hex-encoded each round.
pub fn hash_password(password: &str) -> String {
    (0..3).fold(password.to_string(), |acc, _| hex::encode(Md5::digest(acc.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> Credentials {
        Credentials {
            email: "user@example.com".into(),
            password: "secret".into(),
            ..Default::default()
        }
    }

    async fn cloud(server: &MockServer, credentials: Credentials) -> WyzeCloud {
        WyzeCloud::with_endpoints(
            credentials,
            CloudEndpoints {
                auth_url: server.uri(),
                api_url: server.uri(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_hash_password_is_triple_md5() {
        let once = hex::encode(Md5::digest(b"secret"));
        let twice = hex::encode(Md5::digest(once.as_bytes()));
        let thrice = hex::encode(Md5::digest(twice.as_bytes()));
        assert_eq!(hash_password("secret"), thrice);
        assert_eq!(hash_password("secret").len(), 32);
    }

    #[tokio::test]
    async fn test_login_stores_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/user/login"))
            .and(body_partial_json(json!({
                "email": "user@example.com",
                "password": hash_password("secret"),
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "token-1",
                "refresh_token": "refresh-1",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let cloud = cloud(&server, credentials()).await;
        assert!(!cloud.is_authenticated().await);
        cloud.login().await.unwrap();
        assert!(cloud.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_login_sends_api_key_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/user/login"))
            .and(header("Keyid", "kid"))
            .and(header("Apikey", "key"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access_token": "token-1"})),
            )
            .mount(&server)
            .await;

        let cloud = cloud(
            &server,
            Credentials {
                key_id: Some("kid".into()),
                api_key: Some("key".into()),
                ..credentials()
            },
        )
        .await;
        cloud.login().await.unwrap();
    }

    #[tokio::test]
    async fn test_login_mfa_without_totp_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/user/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "",
                "mfa_options": ["TotpVerificationCode"]
            })))
            .mount(&server)
            .await;

        let cloud = cloud(&server, credentials()).await;
        assert!(matches!(cloud.login().await, Err(CloudError::MfaRequired)));
    }

    #[tokio::test]
    async fn test_login_mfa_with_totp_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/user/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "mfa_options": ["TotpVerificationCode"],
                "mfa_details": {"totp_apps": [{"app_id": "app-9"}]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/user/login"))
            .and(body_partial_json(json!({
                "mfa_type": "TotpVerificationCode",
                "verification_id": "app-9"
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access_token": "token-mfa"})),
            )
            .mount(&server)
            .await;

        let cloud = cloud(
            &server,
            Credentials {
                totp_key: Some("JBSWY3DPEHPK3PXP".into()),
                ..credentials()
            },
        )
        .await;
        cloud.login().await.unwrap();
        assert!(cloud.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/user/login"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "description": "Invalid User Name or Password"
            })))
            .mount(&server)
            .await;

        let cloud = cloud(&server, credentials()).await;
        match cloud.login().await {
            Err(CloudError::AuthFailed(reason)) => assert!(reason.contains("Invalid User Name")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_devices_logs_in_lazily() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/user/login"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access_token": "token-1"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/app/v2/home_page/get_object_list"))
            .and(body_partial_json(json!({"access_token": "token-1", "sc": SC})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "1",
                "msg": "",
                "data": {"device_list": [
                    {"mac": "AA", "nickname": "Pet Cam", "product_model": "WYZE_CAKP2"},
                    {"mac": "BB", "nickname": "Plug", "product_model": "WLPP1"}
                ]}
            })))
            .mount(&server)
            .await;

        let cloud = cloud(&server, credentials()).await;
        let devices = cloud.list_devices().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].nickname, "Pet Cam");

        // second call reuses the session
        cloud.list_devices().await.unwrap();
    }

    #[tokio::test]
    async fn test_list_devices_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/user/login"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access_token": "token-1"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/app/v2/home_page/get_object_list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "1001",
                "msg": "parameter error"
            })))
            .mount(&server)
            .await;

        let cloud = cloud(&server, credentials()).await;
        match cloud.list_devices().await {
            Err(CloudError::Api(message)) => assert!(message.contains("parameter error")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_p2p_token_property() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/user/login"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access_token": "token-1"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/app/v2/device/get_property_list"))
            .and(body_partial_json(json!({"device_mac": "AA"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 1,
                "data": {"property_list": [
                    {"pid": "P1", "value": "1"},
                    {"pid": "P3", "value": "p2p-secret"}
                ]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/app/v2/device/get_property_list"))
            .and(body_partial_json(json!({"device_mac": "BB"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "1",
                "data": {"property_list": []}
            })))
            .mount(&server)
            .await;

        let cloud = cloud(&server, credentials()).await;
        assert_eq!(cloud.p2p_token("AA").await.unwrap(), "p2p-secret");
        assert!(matches!(
            cloud.p2p_token("BB").await,
            Err(CloudError::TokenNotFound(mac)) if mac == "BB"
        ));
    }
}
