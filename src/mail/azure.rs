//! Azure Communication Services email client.
//!
//! Requests are authenticated with an HMAC-SHA256 signature computed from the
//! access key of the connection string. Sending is a long running operation:
//! the service accepts the email, then the client polls the operation until
//! it reaches a terminal status.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use super::{
    EmailMessage, EmailProvider, MailError, Result, SendReport, SendStatus,
};
use crate::config::ConfigError;

pub const API_VERSION: &str = "2023-03-31";
const SEND_PATH: &str = "/emails:send";
const OPERATIONS_PATH: &str = "/emails/operations";

const DATE_HEADER: &str = "x-ms-date";
const CONTENT_HASH_HEADER: &str = "x-ms-content-sha256";
const SIGNED_HEADERS: &str = "x-ms-date;host;x-ms-content-sha256";
const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";
const USER_AGENT: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

type HmacSha256 = Hmac<Sha256>;

/// Parsed `endpoint=...;accesskey=...` connection string.
#[derive(Clone, PartialEq)]
pub struct ConnectionString {
    pub endpoint: Url,
    access_key: Vec<u8>,
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("endpoint", &self.endpoint.as_str())
            .field("access_key", &"***")
            .finish()
    }
}

impl FromStr for ConnectionString {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut endpoint = None;
        let mut access_key = None;

        for pair in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            // Base64 keys end with '=', only split on the first one.
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                ConfigError::ConnectionString(format!(
                    "`{pair}` is not a key=value pair"
                ))
            })?;

            match key.trim().to_ascii_lowercase().as_str() {
                "endpoint" => endpoint = Some(value.trim()),
                "accesskey" => access_key = Some(value.trim()),
                _ => (),
            }
        }

        let endpoint = endpoint.ok_or_else(|| {
            ConfigError::ConnectionString("missing `endpoint`".into())
        })?;
        let endpoint = Url::parse(endpoint)?;
        if !matches!(endpoint.scheme(), "http" | "https")
            || endpoint.host_str().is_none()
        {
            return Err(ConfigError::ConnectionString(format!(
                "`{endpoint}` is not an http(s) endpoint"
            )));
        }

        let access_key = access_key.ok_or_else(|| {
            ConfigError::ConnectionString("missing `accesskey`".into())
        })?;
        let access_key = STANDARD.decode(access_key).map_err(|err| {
            ConfigError::ConnectionString(format!(
                "access key is not base64: {err}"
            ))
        })?;

        Ok(Self {
            endpoint,
            access_key,
        })
    }
}

/// Authentication headers for one request.
#[derive(Debug, PartialEq)]
struct Signature {
    date: String,
    content_hash: String,
    authorization: String,
}

fn sign(
    key: &[u8],
    method: &Method,
    url: &Url,
    body: &[u8],
    date: &str,
) -> Result<Signature> {
    let content_hash = STANDARD.encode(Sha256::digest(body));
    let host = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_owned(),
        (None, _) => return Err(MailError::Signature("url has no host".into())),
    };
    let path_and_query = match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_owned(),
    };

    let string_to_sign =
        format!("{method}\n{path_and_query}\n{date};{host};{content_hash}");
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|err| MailError::Signature(err.to_string()))?;
    mac.update(string_to_sign.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    Ok(Signature {
        date: date.to_owned(),
        content_hash,
        authorization: format!(
            "HMAC-SHA256 SignedHeaders={SIGNED_HEADERS}&Signature={signature}"
        ),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    sender_address: &'a str,
    content: Content<'a>,
    recipients: Recipients<'a>,
    attachments: Vec<AttachmentBody<'a>>,
    user_engagement_tracking_disabled: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Content<'a> {
    subject: &'a str,
    plain_text: &'a str,
    html: &'a str,
}

#[derive(Debug, Serialize)]
struct Recipients<'a> {
    to: Vec<Address<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Address<'a> {
    address: &'a str,
    display_name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentBody<'a> {
    name: &'a str,
    content_type: &'a str,
    content_in_base64: String,
}

impl<'a> From<&'a EmailMessage> for SendRequest<'a> {
    fn from(message: &'a EmailMessage) -> Self {
        Self {
            sender_address: &message.sender,
            content: Content {
                subject: &message.subject,
                plain_text: &message.plain_text,
                html: &message.html,
            },
            recipients: Recipients {
                to: message
                    .recipients
                    .iter()
                    .map(|r| Address {
                        address: &r.address,
                        display_name: &r.display_name,
                    })
                    .collect(),
            },
            attachments: message
                .attachments
                .iter()
                .map(|a| AttachmentBody {
                    name: &a.name,
                    content_type: &a.content_type,
                    content_in_base64: STANDARD.encode(&a.content),
                })
                .collect(),
            user_engagement_tracking_disabled: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Operation {
    id: String,
    status: String,
    #[serde(default)]
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Client for the Azure Communication Services email API.
#[derive(Debug, Clone)]
pub struct AzureEmailClient {
    http: reqwest::Client,
    endpoint: Url,
    access_key: Vec<u8>,
    poll_interval: Duration,
}

impl AzureEmailClient {
    /// Create a new [`AzureEmailClient`].
    pub fn new(
        connection: ConnectionString,
        poll_interval: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self::with_http_client(connection, http, poll_interval))
    }

    /// Create a new [`AzureEmailClient`] on top of an existing HTTP client.
    pub fn with_http_client(
        connection: ConnectionString,
        http: reqwest::Client,
        poll_interval: Duration,
    ) -> Self {
        tracing::info!(endpoint = %connection.endpoint, "email client created");

        Self {
            http,
            endpoint: connection.endpoint,
            access_key: connection.access_key,
            poll_interval,
        }
    }

    fn url(&self, path: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.set_path(&format!(
            "{}{path}",
            self.endpoint.path().trim_end_matches('/')
        ));
        url.set_query(Some(&format!("api-version={API_VERSION}")));
        url
    }

    async fn execute(
        &self,
        method: Method,
        url: Url,
        body: Vec<u8>,
    ) -> Result<reqwest::Response> {
        let date = Utc::now().format(DATE_FORMAT).to_string();
        let signature = sign(&self.access_key, &method, &url, &body, &date)?;

        let mut request = self
            .http
            .request(method, url)
            .header(DATE_HEADER, signature.date)
            .header(CONTENT_HASH_HEADER, signature.content_hash)
            .header(AUTHORIZATION, signature.authorization);
        if !body.is_empty() {
            request = request.header(CONTENT_TYPE, "application/json").body(body);
        }

        let response = request.send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(api_error(response).await)
        }
    }

    async fn operation(
        response: reqwest::Response,
    ) -> Result<(Operation, Option<Duration>)> {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs);
        let operation = response.json::<Operation>().await?;
        if operation.id.is_empty() {
            return Err(MailError::Protocol("operation has no identifier".into()));
        }

        Ok((operation, retry_after))
    }

    /// Wait before the next status check.
    ///
    /// `Retry-After` may only lengthen the configured interval.
    fn poll_delay(&self, retry_after: Option<Duration>) -> Duration {
        retry_after.map_or(self.poll_interval, |delay| delay.max(self.poll_interval))
    }
}

async fn api_error(response: reqwest::Response) -> MailError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();

    let detail = match serde_json::from_str::<ErrorResponse>(&text) {
        Ok(body) => body.error,
        Err(_) => ErrorDetail {
            code: status.canonical_reason().unwrap_or("Unknown").to_owned(),
            message: text,
        },
    };

    MailError::Api {
        status: status.as_u16(),
        code: detail.code,
        message: detail.message,
    }
}

#[async_trait]
impl EmailProvider for AzureEmailClient {
    async fn send(&self, message: &EmailMessage) -> Result<SendReport> {
        let body = serde_json::to_vec(&SendRequest::from(message))?;
        let response =
            self.execute(Method::POST, self.url(SEND_PATH), body).await?;
        let (mut operation, mut retry_after) = Self::operation(response).await?;

        tracing::debug!(
            operation_id = operation.id,
            status = operation.status,
            "email accepted by provider"
        );

        loop {
            let status = SendStatus::from(operation.status.as_str());
            if status.is_terminal() {
                return Ok(SendReport {
                    id: operation.id,
                    status,
                    error: operation
                        .error
                        .map(|err| format!("{}: {}", err.code, err.message)),
                });
            }

            tokio::time::sleep(self.poll_delay(retry_after)).await;

            let url = self.url(&format!("{OPERATIONS_PATH}/{}", operation.id));
            let response = self.execute(Method::GET, url, Vec::new()).await?;
            (operation, retry_after) = Self::operation(response).await?;

            tracing::trace!(
                operation_id = operation.id,
                status = operation.status,
                "email operation polled"
            );
        }
    }
}
