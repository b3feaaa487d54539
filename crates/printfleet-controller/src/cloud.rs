use serde::{Deserialize, Serialize};
use serde_json::Value;

use tracing::{debug, info};

use crate::config::PrinterConfig;
use crate::error::{Error, ErrorKind, Result};

const LOGIN_PATH: &str = "/user-service/user/login";
const PREFERENCE_PATH: &str = "/design-user-service/my/preference";
const BIND_PATH: &str = "/iot-service/api/user/bind";

const VERIFY_CODE_LOGIN: &str = "verifyCode";

fn cloud_error(description: impl Into<std::borrow::Cow<'static, str>>) -> Error {
    Error::new(ErrorKind::Cloud, description)
}

/// Cloud service region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Region {
    /// Worldwide service.
    #[default]
    Global,
    /// Mainland China service.
    China,
}

impl Region {
    /// Returns the base url of the account service.
    #[must_use]
    pub const fn api_base(self) -> &'static str {
        match self {
            Self::Global => "https://api.bambulab.com",
            Self::China => "https://api.bambulab.cn",
        }
    }

    /// Returns the host of the cloud broker.
    #[must_use]
    pub const fn broker_host(self) -> &'static str {
        match self {
            Self::Global => "us.mqtt.bambulab.com",
            Self::China => "cn.mqtt.bambulab.cn",
        }
    }
}

/// Outcome of a login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// The account token.
    Token(String),
    /// A code was sent to the account address. It must be submitted with
    /// [`CloudClient::submit_verification_code`].
    VerificationRequired,
}

/// A printer bound to the account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CloudPrinter {
    /// Serial number.
    #[serde(rename = "dev_id")]
    pub serial: String,
    /// Name given by the owner.
    pub name: String,
    /// Whether the printer is connected to the cloud.
    pub online: bool,
    /// Last reported job status.
    pub print_status: String,
    /// Model name.
    #[serde(rename = "dev_model_name")]
    pub model: String,
    /// Product name.
    #[serde(rename = "dev_product_name")]
    pub product: String,
    /// Access code for local connections.
    #[serde(rename = "dev_access_code")]
    pub access_code: String,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    account: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct VerificationRequest<'a> {
    account: &'a str,
    code: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(rename = "accessToken", default)]
    access_token: String,
    #[serde(rename = "loginType", default)]
    login_type: String,
}

#[derive(Deserialize)]
struct Preference {
    #[serde(default)]
    uid: Value,
}

#[derive(Deserialize)]
struct BoundPrinters {
    #[serde(default)]
    devices: Vec<CloudPrinter>,
}

/// Client of the vendor account service.
///
/// It obtains the account token and lists the printers bound to the account,
/// which can then be reached through the cloud broker.
pub struct CloudClient {
    http: reqwest::Client,
    base_url: String,
    region: Region,
    account: String,
    password: String,
    token: Option<String>,
}

// Credentials stay out of logs.
impl std::fmt::Debug for CloudClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudClient")
            .field("base_url", &self.base_url)
            .field("region", &self.region)
            .field("account", &self.account)
            .field("logged_in", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

impl CloudClient {
    /// Creates a [`CloudClient`] for the given account.
    #[must_use]
    #[inline]
    pub fn new(region: Region, account: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: region.api_base().into(),
            region,
            account: account.into(),
            password: password.into(),
            token: None,
        }
    }

    /// Uses an already obtained account token.
    #[must_use]
    #[inline]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets a different account service url.
    #[must_use]
    #[inline]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Returns the account token, if logged in.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Logs in with the account credentials.
    ///
    /// With a token already available, nothing is sent.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Cloud`] error if the service is unreachable,
    /// rejects the credentials or answers without a token.
    pub async fn login(&mut self) -> Result<LoginOutcome> {
        if let Some(token) = &self.token {
            return Ok(LoginOutcome::Token(token.clone()));
        }

        let response: LoginResponse = self
            .post(
                LOGIN_PATH,
                &LoginRequest {
                    account: &self.account,
                    password: &self.password,
                },
            )
            .await?;

        if response.login_type == VERIFY_CODE_LOGIN {
            info!(account = %self.account, "Login requires a verification code");
            return Ok(LoginOutcome::VerificationRequired);
        }

        self.store_token(response.access_token).map(LoginOutcome::Token)
    }

    /// Completes a login with the code sent to the account address.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Cloud`] error if the service is unreachable or
    /// rejects the code.
    pub async fn submit_verification_code(&mut self, code: &str) -> Result<String> {
        if let Some(token) = &self.token {
            return Ok(token.clone());
        }

        let response: LoginResponse = self
            .post(
                LOGIN_PATH,
                &VerificationRequest {
                    account: &self.account,
                    code,
                },
            )
            .await?;

        self.store_token(response.access_token)
    }

    /// Returns the account user identifier.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Cloud`] error if not logged in or if the
    /// service request fails.
    pub async fn user_id(&self) -> Result<String> {
        let preference: Preference = self.get(PREFERENCE_PATH).await?;

        match preference.uid {
            Value::String(uid) if !uid.is_empty() => Ok(uid),
            Value::Number(uid) => Ok(uid.to_string()),
            _ => Err(cloud_error("The account service returned no user identifier")),
        }
    }

    /// Returns the printers bound to the account.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Cloud`] error if not logged in or if the
    /// service request fails.
    pub async fn bound_printers(&self) -> Result<Vec<CloudPrinter>> {
        let bound: BoundPrinters = self.get(BIND_PATH).await?;
        debug!(printers = bound.devices.len(), "Bound printers retrieved");
        Ok(bound.devices)
    }

    /// Returns the configurations reaching every bound printer through the
    /// cloud broker.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Cloud`] error if not logged in or if a
    /// service request fails.
    pub async fn printer_configs(&self) -> Result<Vec<PrinterConfig>> {
        let token = self.require_token()?;
        let printers = self.bound_printers().await?;
        let username = broker_username(&self.user_id().await?);

        Ok(printers
            .into_iter()
            .map(|printer| {
                PrinterConfig::cloud(
                    self.region.broker_host(),
                    printer.serial,
                    username.as_str(),
                    token,
                )
            })
            .collect())
    }

    fn store_token(&mut self, token: String) -> Result<String> {
        if token.is_empty() {
            return Err(cloud_error("The account service returned no token"));
        }
        info!(account = %self.account, "Logged in");
        self.token = Some(token.clone());
        Ok(token)
    }

    fn require_token(&self) -> Result<&str> {
        self.token
            .as_deref()
            .ok_or_else(|| cloud_error("Not logged in"))
    }

    async fn post<T, R>(&self, path: &str, body: &T) -> Result<R>
    where
        T: Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await?;
        decode(path, response).await
    }

    async fn get<R: serde::de::DeserializeOwned>(&self, path: &str) -> Result<R> {
        let token = self.require_token()?;
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;
        decode(path, response).await
    }
}

async fn decode<R: serde::de::DeserializeOwned>(
    path: &str,
    response: reqwest::Response,
) -> Result<R> {
    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(cloud_error(format!("Request to `{path}` failed: {status}")));
    }
    Ok(response.json().await?)
}

fn broker_username(uid: &str) -> String {
    if uid.starts_with("u_") {
        uid.to_owned()
    } else {
        format!("u_{uid}")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::body::Bytes;
    use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
    use axum::routing::any;

    use serde_json::{Value, json};

    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use crate::error::ErrorKind;

    use super::{CloudClient, LoginOutcome, Region, broker_username};

    #[derive(Debug, Clone)]
    struct Received {
        method: Method,
        path: String,
        authorization: Option<String>,
        body: Value,
    }

    type Log = Arc<Mutex<Vec<Received>>>;

    type Route = (&'static str, u16, Value);

    fn record(log: &Log, method: Method, uri: &Uri, headers: &HeaderMap, body: &[u8]) {
        log.lock().unwrap().push(Received {
            method,
            path: uri.path().to_owned(),
            authorization: headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned),
            body: serde_json::from_slice(body).unwrap_or(Value::Null),
        });
    }

    // An account service answering each route with a fixed status and body.
    struct FakeService {
        url: String,
        received: Log,
        task: JoinHandle<()>,
    }

    impl Drop for FakeService {
        fn drop(&mut self) {
            self.task.abort();
        }
    }

    impl FakeService {
        async fn start(routes: Vec<Route>) -> Self {
            let received = Log::default();

            let mut router = Router::new();
            for (path, status, payload) in routes {
                let status = StatusCode::from_u16(status).unwrap();
                let received = received.clone();
                router = router.route(
                    path,
                    any(
                        move |method: Method, uri: Uri, headers: HeaderMap, body: Bytes| {
                            let received = received.clone();
                            let payload = payload.clone();
                            async move {
                                record(&received, method, &uri, &headers, &body);
                                (status, axum::Json(payload))
                            }
                        },
                    ),
                );
            }
            let router = router.fallback({
                let received = received.clone();
                move |method: Method, uri: Uri, headers: HeaderMap, body: Bytes| {
                    let received = received.clone();
                    async move {
                        record(&received, method, &uri, &headers, &body);
                        StatusCode::NOT_FOUND
                    }
                }
            });

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("http://{}", listener.local_addr().unwrap());
            let task = tokio::spawn(async move {
                axum::serve(listener, router).await.unwrap();
            });

            Self {
                url,
                received,
                task,
            }
        }

        fn received(&self) -> Vec<Received> {
            self.received.lock().unwrap().clone()
        }
    }

    fn create_client(service: &FakeService) -> CloudClient {
        CloudClient::new(Region::Global, "maker@example.com", "secret").base_url(&service.url)
    }

    #[test]
    fn regions() {
        assert_eq!(Region::Global.api_base(), "https://api.bambulab.com");
        assert_eq!(Region::China.broker_host(), "cn.mqtt.bambulab.cn");
        assert_eq!(broker_username("1234"), "u_1234");
        assert_eq!(broker_username("u_1234"), "u_1234");
    }

    #[tokio::test]
    async fn login_with_password() {
        let service = FakeService::start(vec![(
            "/user-service/user/login",
            200,
            json!({ "accessToken": "token-1", "loginType": "" }),
        )])
        .await;
        let mut client = create_client(&service);

        assert_eq!(
            client.login().await.unwrap(),
            LoginOutcome::Token("token-1".into())
        );
        assert_eq!(client.token(), Some("token-1"));

        // Logged in: nothing else is sent.
        assert_eq!(
            client.login().await.unwrap(),
            LoginOutcome::Token("token-1".into())
        );

        let received = service.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].method, Method::POST);
        assert_eq!(received[0].path, "/user-service/user/login");
        assert_eq!(
            received[0].body,
            json!({ "account": "maker@example.com", "password": "secret" })
        );
    }

    #[tokio::test]
    async fn login_with_verification_code() {
        let service = FakeService::start(vec![(
            "/user-service/user/login",
            200,
            json!({ "accessToken": "", "loginType": "verifyCode" }),
        )])
        .await;
        let mut client = create_client(&service);

        assert_eq!(
            client.login().await.unwrap(),
            LoginOutcome::VerificationRequired
        );
        assert_eq!(client.token(), None);

        // The fake service keeps answering without a token.
        assert_eq!(
            client
                .submit_verification_code("123456")
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::Cloud
        );
        assert_eq!(
            service.received()[1].body,
            json!({ "account": "maker@example.com", "code": "123456" })
        );
    }

    #[tokio::test]
    async fn rejected_request() {
        let service = FakeService::start(vec![(
            "/user-service/user/login",
            401,
            json!({ "code": 1, "message": "wrong password" }),
        )])
        .await;
        let mut client = create_client(&service);

        let error = client.login().await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Cloud);
        assert!(error.description().contains("401"));
    }

    #[tokio::test]
    async fn requests_require_token() {
        let service = FakeService::start(Vec::new()).await;
        let client = create_client(&service);

        assert_eq!(
            client.bound_printers().await.unwrap_err().kind(),
            ErrorKind::Cloud
        );
        assert!(service.received().is_empty());
    }

    #[tokio::test]
    async fn printer_configurations() {
        let service = FakeService::start(vec![
            (
                "/design-user-service/my/preference",
                200,
                json!({ "uid": 1_234_567 }),
            ),
            (
                "/iot-service/api/user/bind",
                200,
                json!({
                    "message": "success",
                    "devices": [
                        {
                            "dev_id": "01P00A000000001",
                            "name": "Lab P1S",
                            "online": true,
                            "print_status": "RUNNING",
                            "dev_model_name": "C12",
                            "dev_product_name": "P1S",
                            "dev_access_code": "12345678"
                        },
                        { "dev_id": "00M00A000000002", "name": "Desk A1 mini" }
                    ]
                }),
            ),
        ])
        .await;
        let client = create_client(&service).with_token("token-1");

        assert_eq!(client.user_id().await.unwrap(), "1234567");

        let printers = client.bound_printers().await.unwrap();
        assert_eq!(printers.len(), 2);
        assert_eq!(printers[0].product, "P1S");
        assert!(printers[0].online);
        assert!(!printers[1].online);

        let configs = client.printer_configs().await.unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].serial(), "01P00A000000001");
        assert_eq!(configs[0].host(), "us.mqtt.bambulab.com");
        assert_eq!(configs[0].user(), "u_1234567");
        assert_eq!(configs[0].access_code(), "token-1");
        assert!(configs[0].is_cloud());
        assert!(!configs[1].has_camera());

        assert!(
            service
                .received()
                .iter()
                .all(|request| request.method == Method::GET
                    && request.authorization.as_deref() == Some("Bearer token-1"))
        );
    }
}
