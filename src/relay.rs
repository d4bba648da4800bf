//! Relay a validated command to a buoy through the email provider.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::command::{
    CommandOutcome, CommandRequest, DELIVERY_ERROR, DELIVERY_FAILED,
};
use crate::mail::{
    ATTACHMENT_CONTENT_TYPE, ATTACHMENT_NAME, Attachment, EmailMessage,
    EmailProvider, Recipient, SendStatus,
};

/// Display name used when the request carries none.
pub const DEFAULT_DISPLAY_NAME: &str = "Command Receiver";
/// Status reported when the provider does not answer in time.
pub const TIMED_OUT: &str = "TimedOut";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Terminal state of one delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    /// Provider reported the email as delivered.
    Delivered { transaction_id: String },
    /// Provider reported another status, or never completed.
    Rejected {
        transaction_id: String,
        status: String,
    },
    /// Something failed while building or sending the email.
    Faulted {
        transaction_id: String,
        details: String,
    },
}

impl RelayOutcome {
    pub fn transaction_id(&self) -> &str {
        match self {
            Self::Delivered { transaction_id }
            | Self::Rejected { transaction_id, .. }
            | Self::Faulted { transaction_id, .. } => transaction_id,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Delivered { .. } => "delivered",
            Self::Rejected { .. } => "rejected",
            Self::Faulted { .. } => "faulted",
        }
    }
}

impl From<RelayOutcome> for CommandOutcome {
    fn from(outcome: RelayOutcome) -> Self {
        match outcome {
            RelayOutcome::Delivered { transaction_id } => {
                CommandOutcome::sent(transaction_id)
            },
            RelayOutcome::Rejected {
                transaction_id,
                status,
            } => CommandOutcome::failure(
                DELIVERY_FAILED,
                format!("Email sending failed. Status: {status}"),
                Some(transaction_id),
            ),
            RelayOutcome::Faulted {
                transaction_id,
                details,
            } => CommandOutcome::failure(
                DELIVERY_ERROR,
                details,
                Some(transaction_id),
            ),
        }
    }
}

/// Raw bytes of the `command.sbd` attachment.
pub fn encode_payload(command: &str) -> Vec<u8> {
    command.as_bytes().to_vec()
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Sends commands through a shared [`EmailProvider`].
#[derive(Clone)]
pub struct CommandRelay {
    provider: Arc<dyn EmailProvider>,
    sender: String,
    timeout: Duration,
}

impl CommandRelay {
    /// Create a new [`CommandRelay`].
    pub fn new(
        provider: Arc<dyn EmailProvider>,
        sender: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            sender: sender.into(),
            timeout,
        }
    }

    /// Build the email carrying `request`.
    pub fn compose(
        &self,
        request: &CommandRequest,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> EmailMessage {
        let imei = request.imei();
        let command = request.command();
        let timestamp = now.format(TIMESTAMP_FORMAT);

        let plain_text = format!(
            "Attached is the command for IMEI {imei}.\n\nCommand: {command}\nTimestamp: {timestamp} UTC\nTransaction ID: {transaction_id}"
        );
        let html = format!(
            "<html><body><h3>{}</h3><p><strong>Command:</strong> {}</p><p><strong>Timestamp:</strong> {timestamp} UTC</p><p><strong>Transaction ID:</strong> {transaction_id}</p></body></html>",
            escape_html(imei),
            escape_html(command),
        );

        EmailMessage {
            sender: self.sender.clone(),
            recipients: vec![Recipient {
                address: request.recipient_email().to_owned(),
                display_name: request
                    .recipient_display_name()
                    .filter(|name| !name.trim().is_empty())
                    .unwrap_or(DEFAULT_DISPLAY_NAME)
                    .to_owned(),
            }],
            subject: imei.to_owned(),
            plain_text,
            html,
            attachments: vec![Attachment {
                name: ATTACHMENT_NAME.to_owned(),
                content_type: ATTACHMENT_CONTENT_TYPE.to_owned(),
                content: encode_payload(command),
            }],
        }
    }

    /// Make a single delivery attempt for `request`.
    ///
    /// Never fails: every error is folded into the returned outcome.
    pub async fn relay(&self, request: &CommandRequest) -> RelayOutcome {
        let transaction_id = Uuid::new_v4().to_string();

        tracing::info!(
            imei = request.imei(),
            transaction_id,
            "processing buoy command"
        );

        let message = self.compose(request, &transaction_id, Utc::now());
        let outcome =
            match tokio::time::timeout(self.timeout, self.provider.send(&message))
                .await
            {
                Ok(Ok(report)) if report.status == SendStatus::Succeeded => {
                    tracing::info!(
                        transaction_id,
                        operation_id = report.id,
                        "email sent successfully"
                    );
                    RelayOutcome::Delivered { transaction_id }
                },
                Ok(Ok(report)) => {
                    tracing::error!(
                        transaction_id,
                        operation_id = report.id,
                        status = %report.status,
                        error = report.error,
                        "email sending failed"
                    );
                    RelayOutcome::Rejected {
                        transaction_id,
                        status: report.status.to_string(),
                    }
                },
                Ok(Err(err)) => {
                    tracing::error!(
                        transaction_id,
                        error = %err,
                        "error sending buoy command"
                    );
                    RelayOutcome::Faulted {
                        transaction_id,
                        details: err.to_string(),
                    }
                },
                Err(_) => {
                    tracing::error!(
                        transaction_id,
                        timeout = ?self.timeout,
                        "email provider did not complete in time"
                    );
                    RelayOutcome::Rejected {
                        transaction_id,
                        status: TIMED_OUT.to_owned(),
                    }
                },
            };

        metrics::counter!("buoy_commands_total", "outcome" => outcome.label())
            .increment(1);

        outcome
    }

    /// Relay `request` and render the result.
    pub async fn send(&self, request: &CommandRequest) -> CommandOutcome {
        self.relay(request).await.into()
    }
}
