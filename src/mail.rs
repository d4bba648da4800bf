//! Outbound email model and delivery provider interface.

pub mod azure;

use std::fmt;

use async_trait::async_trait;

/// Name of the attachment holding the command payload.
pub const ATTACHMENT_NAME: &str = "command.sbd";
/// Content type of the command payload.
pub const ATTACHMENT_CONTENT_TYPE: &str = "application/octet-stream";

pub type Result<T> = std::result::Result<T, MailError>;

/// Errors raised while talking to the delivery provider.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("cannot serialize email: {0}")]
    Json(#[from] serde_json::Error),
    #[error("provider rejected request with status {status}: {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("cannot sign request: {0}")]
    Signature(String),
    #[error("unexpected provider response: {0}")]
    Protocol(String),
}

/// Email recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct Recipient {
    pub address: String,
    pub display_name: String,
}

/// Binary attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

/// Email ready to be delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub sender: String,
    pub recipients: Vec<Recipient>,
    pub subject: String,
    pub plain_text: String,
    pub html: String,
    pub attachments: Vec<Attachment>,
}

/// Status of a delivery operation as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Other(String),
}

impl SendStatus {
    /// Whether the provider will not change the status anymore.
    ///
    /// Unknown statuses are final: only a queued or running operation is
    /// worth polling again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::NotStarted | Self::Running)
    }
}

impl From<&str> for SendStatus {
    fn from(status: &str) -> Self {
        match status {
            "NotStarted" => Self::NotStarted,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            "Canceled" => Self::Canceled,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            Self::NotStarted => "NotStarted",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Canceled => "Canceled",
            Self::Other(status) => status,
        };
        f.write_str(status)
    }
}

/// Last known state of a delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct SendReport {
    /// Provider operation identifier.
    pub id: String,
    pub status: SendStatus,
    /// Error reported alongside a failed status.
    pub error: Option<String>,
}

/// Port for email delivery.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Deliver `message` and wait for the provider to report a status.
    async fn send(&self, message: &EmailMessage) -> Result<SendReport>;
}
