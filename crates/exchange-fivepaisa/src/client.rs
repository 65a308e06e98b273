//! 5paisa REST client: configuration, login and the request envelope.
//!
//! Every call is a JSON POST of the form `{"head": {...}, "body": {...}}`.
//! The head carries the app identity from the credentials blob; the body is
//! endpoint specific. Responses use the same envelope, with a string status
//! in the head (`"0"` on success).

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::auth::{CredentialSource, Credentials};
use crate::error::{BrokerError, Result};

/// 5paisa OpenAPI base URL.
pub const FIVEPAISA_API_URL: &str = "https://Openapi.5paisa.com/VendorsAPI/Service1.svc";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct FivePaisaConfig {
    pub base_url: String,
    pub requests_per_minute: NonZeroU32,
    pub timeout_secs: u64,
    /// Attempts to read an execution price back from the trade book after a
    /// market order.
    pub fill_lookup_attempts: u32,
    pub fill_lookup_delay_ms: u64,
}

impl Default for FivePaisaConfig {
    fn default() -> Self {
        Self {
            base_url: FIVEPAISA_API_URL.to_string(),
            requests_per_minute: nonzero!(120u32),
            timeout_secs: 10,
            fill_lookup_attempts: 3,
            fill_lookup_delay_ms: 500,
        }
    }
}

impl FivePaisaConfig {
    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the rate limit.
    #[must_use]
    pub fn with_rate_limit(mut self, requests_per_minute: NonZeroU32) -> Self {
        self.requests_per_minute = requests_per_minute;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Sets how the client waits for market-order fills.
    #[must_use]
    pub fn with_fill_lookup(mut self, attempts: u32, delay_ms: u64) -> Self {
        self.fill_lookup_attempts = attempts;
        self.fill_lookup_delay_ms = delay_ms;
        self
    }
}

/// Session established by login.
struct Session {
    client_code: String,
    jwt: Option<SecretString>,
    cookie: Option<SecretString>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Head<'a> {
    app_name: &'a str,
    app_ver: &'static str,
    key: &'a str,
    os_name: &'static str,
    request_code: &'a str,
    user_id: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct Envelope<'a, B> {
    head: Head<'a>,
    body: &'a B,
}

#[derive(Debug, Deserialize)]
struct ResponseHead {
    status: Option<String>,
    #[serde(rename = "statusDescription")]
    status_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseEnvelope<T> {
    head: Option<ResponseHead>,
    body: Option<T>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct LoginBody {
    #[serde(rename = "Email_id")]
    email_id: String,
    password: String,
    #[serde(rename = "LocalIP")]
    local_ip: &'static str,
    #[serde(rename = "PublicIP")]
    public_ip: &'static str,
    #[serde(rename = "HDSerailNumber")]
    hd_serial_number: &'static str,
    #[serde(rename = "MACAddress")]
    mac_address: &'static str,
    #[serde(rename = "MachineID")]
    machine_id: &'static str,
    version_no: &'static str,
    request_no: &'static str,
    #[serde(rename = "My2PIN")]
    my_2pin: String,
    connection_type: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LoginResponse {
    client_code: Option<String>,
    message: Option<String>,
    status: Option<i64>,
    #[serde(rename = "JWTToken")]
    jwt_token: Option<String>,
}

/// Authenticated 5paisa session.
///
/// One instance is created per process at the boundary and shared (behind
/// `Arc<dyn BrokerGateway>`) by the strike and order managers.
pub struct FivePaisaClient {
    pub(crate) config: FivePaisaConfig,
    http: Client,
    rate_limiter: Arc<
        RateLimiter<
            governor::state::NotKeyed,
            governor::state::InMemoryState,
            governor::clock::DefaultClock,
        >,
    >,
    credentials: Credentials,
    session: Session,
}

impl std::fmt::Debug for FivePaisaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FivePaisaClient")
            .field("base_url", &self.config.base_url)
            .field("client_code", &self.session.client_code)
            .finish_non_exhaustive()
    }
}

impl FivePaisaClient {
    /// Resolves credentials and logs in.
    ///
    /// # Errors
    /// Returns [`BrokerError::Authentication`] if the broker refuses the
    /// login, or a configuration/network error if it cannot be attempted.
    pub async fn login(config: FivePaisaConfig, source: CredentialSource) -> Result<Self> {
        let credentials = source.resolve()?;

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BrokerError::Network(format!("failed to build HTTP client: {e}")))?;

        let quota = Quota::per_minute(config.requests_per_minute);
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        let mut client = Self {
            config,
            http,
            rate_limiter,
            credentials,
            session: Session {
                client_code: String::new(),
                jwt: None,
                cookie: None,
            },
        };
        client.session = client.authenticate().await?;

        info!(client_code = %client.session.client_code, "Logged in to 5paisa");
        Ok(client)
    }

    async fn authenticate(&self) -> Result<Session> {
        let creds = &self.credentials;
        let body = LoginBody {
            email_id: creds.encrypt(&creds.email)?,
            password: creds.encrypt(creds.password.expose_secret())?,
            local_ip: "192.168.10.10",
            public_ip: "192.168.1.1",
            hd_serial_number: "",
            mac_address: "",
            machine_id: "039377",
            version_no: "1.7",
            request_no: "1",
            my_2pin: creds.encrypt(creds.dob.expose_secret())?,
            connection_type: "1",
        };

        let response = self
            .send("V4/LoginRequestMobileNewbyEmail", "5PLoginV4", &body)
            .await?;
        let cookie = response
            .headers()
            .get(reqwest::header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| SecretString::from(v.to_string()));

        // A refused login comes back as HTTP 200 with a non-zero head status.
        let login: LoginResponse = Self::decode(response).await.map_err(|e| match e {
            BrokerError::Api { message, .. } => BrokerError::Authentication(message),
            other => other,
        })?;
        let client_code = match (login.status, login.client_code) {
            (Some(0), Some(code)) if !code.is_empty() && code != "0" => code,
            (_, _) => {
                return Err(BrokerError::Authentication(
                    login
                        .message
                        .unwrap_or_else(|| "login refused".to_string()),
                ))
            }
        };

        Ok(Session {
            client_code,
            jwt: login.jwt_token.map(SecretString::from),
            cookie,
        })
    }

    /// Returns the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Client code of the logged-in account.
    #[must_use]
    pub fn client_code(&self) -> &str {
        &self.session.client_code
    }

    /// Makes an authenticated call and decodes the response body.
    pub(crate) async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        request_code: &str,
        body: &B,
    ) -> Result<T> {
        let response = self.send(path, request_code, body).await?;
        Self::decode(response).await
    }

    async fn send<B: Serialize>(
        &self,
        path: &str,
        request_code: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        self.rate_limiter.until_ready().await;

        let creds = &self.credentials;
        let envelope = Envelope {
            head: Head {
                app_name: &creds.app_name,
                app_ver: "1.0",
                key: creds.user_key.expose_secret(),
                os_name: "WEB",
                request_code,
                user_id: &creds.user_id,
                password: creds.api_password.expose_secret(),
            },
            body,
        };

        let url = format!("{}/{}", self.config.base_url, path);
        debug!(%url, request_code, "POST");

        let mut request = self
            .http
            .post(&url)
            .header("Accept", "application/json")
            .json(&envelope);
        if let Some(jwt) = &self.session.jwt {
            request = request.bearer_auth(jwt.expose_secret());
        }
        if let Some(cookie) = &self.session.cookie {
            request = request.header(reqwest::header::COOKIE, cookie.expose_secret());
        }

        let response = request.send().await?;
        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return Err(BrokerError::rate_limit(retry_after));
        }

        if status.as_u16() == 401 || status.as_u16() == 403 {
            let text = response.text().await.unwrap_or_default();
            return Err(BrokerError::Authentication(text));
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BrokerError::api(status.as_u16(), text));
        }

        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let envelope: ResponseEnvelope<T> = response.json().await?;

        if let Some(head) = &envelope.head {
            match head.status.as_deref() {
                None | Some("0") => {}
                Some(code) => {
                    return Err(BrokerError::api(
                        code.parse().unwrap_or(500),
                        head.status_description
                            .clone()
                            .unwrap_or_else(|| format!("broker status {code}")),
                    ))
                }
            }
        }

        envelope
            .body
            .ok_or_else(|| BrokerError::Serialization("response has no body".to_string()))
    }
}

/// Formats a timestamp in the broker's `/Date(<millis>)/` notation.
pub(crate) fn format_net_date(at: DateTime<Utc>) -> String {
    format!("/Date({})/", at.timestamp_millis())
}

/// Parses `/Date(1672137000000+0530)/` (the offset is informational; the
/// millisecond count is already UTC).
pub(crate) fn parse_net_date(raw: &str) -> Option<DateTime<Utc>> {
    let inner = raw.trim().strip_prefix("/Date(")?.strip_suffix(")/")?;
    let digits_end = inner
        .char_indices()
        .skip(1)
        .find(|(_, c)| *c == '+' || *c == '-')
        .map_or(inner.len(), |(i, _)| i);
    let millis: i64 = inner[..digits_end].parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

/// Order ids arrive as numbers on some endpoints and strings on others;
/// `0` and empty both mean "not assigned yet".
pub(crate) fn de_order_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    let text = match raw {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => return Ok(None),
    };
    let text = text.trim();
    if text.is_empty() || text == "0" {
        Ok(None)
    } else {
        Ok(Some(text.to_string()))
    }
}
