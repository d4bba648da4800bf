//! Buoy command request, its validation rules and the uniform outcome.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use validator::{Validate, ValidateEmail, ValidationError, ValidationErrors};

/// Delimiter used when several violations are reported at once.
pub const VIOLATION_DELIMITER: &str = "; ";

pub const VALIDATION_FAILED: &str = "Validation failed";
pub const INVALID_BODY: &str = "Invalid request body";
pub const COMMAND_SENT: &str = "Command sent successfully!";
pub const DELIVERY_FAILED: &str = "Failed to send command";
pub const DELIVERY_ERROR: &str = "An error occurred while sending the command";
pub const UNEXPECTED_ERROR: &str = "An unexpected error occurred";

/// Command sent to a buoy, as received on `POST /api/buoy/send-command`.
///
/// Blank strings are read as absent values, so a blank field only reports
/// that it is required.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    #[serde(default, deserialize_with = "blank_as_none")]
    #[validate(
        required(message = "IMEI is required"),
        length(equal = 15, message = "IMEI must be exactly 15 digits"),
        custom(
            function = "crate::command::validate_digits",
            message = "IMEI must contain only digits"
        )
    )]
    pub imei: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    #[validate(
        required(message = "Command is required"),
        length(max = 500, message = "Command cannot exceed 500 characters")
    )]
    pub command: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    #[validate(
        required(message = "Recipient email is required"),
        custom(
            function = "crate::command::validate_email",
            message = "Invalid email address format"
        )
    )]
    pub recipient_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_display_name: Option<String>,
}

impl CommandRequest {
    /// Create a request with every required field set.
    pub fn new(
        imei: impl Into<String>,
        command: impl Into<String>,
        recipient_email: impl Into<String>,
    ) -> Self {
        Self {
            imei: Some(imei.into()),
            command: Some(command.into()),
            recipient_email: Some(recipient_email.into()),
            recipient_display_name: None,
        }
    }

    /// Set recipient display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.recipient_display_name = Some(name.into());
        self
    }

    pub fn imei(&self) -> &str {
        self.imei.as_deref().unwrap_or_default()
    }

    pub fn command(&self) -> &str {
        self.command.as_deref().unwrap_or_default()
    }

    pub fn recipient_email(&self) -> &str {
        self.recipient_email.as_deref().unwrap_or_default()
    }

    pub fn recipient_display_name(&self) -> Option<&str> {
        self.recipient_display_name.as_deref()
    }
}

fn blank_as_none<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.trim().is_empty()))
}

/// Every character must be an ASCII decimal digit.
pub fn validate_digits(value: &str) -> Result<(), ValidationError> {
    if value.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError::new("digits"))
    }
}

/// `local@domain`, where domain holds at least one inner dot.
pub fn validate_email(value: &str) -> Result<(), ValidationError> {
    let dotted_domain = value.rsplit_once('@').is_some_and(|(_, domain)| {
        domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
    });

    if value.validate_email() && dotted_domain {
        Ok(())
    } else {
        Err(ValidationError::new("email"))
    }
}

/// Flatten validation errors into one line.
///
/// Fields are sorted by name and each field keeps the order its rules are
/// declared in, so the same request always yields the same text.
pub fn describe(errors: &ValidationErrors) -> String {
    errors
        .field_errors()
        .into_iter()
        .collect::<BTreeMap<_, _>>()
        .into_values()
        .flat_map(|issues| issues.iter())
        .map(|issue| match &issue.message {
            Some(message) => message.to_string(),
            None => issue.code.to_string(),
        })
        .collect::<Vec<_>>()
        .join(VIOLATION_DELIMITER)
}

/// Result of a command request, returned as the HTTP body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

impl CommandOutcome {
    /// Command handed to the provider and delivered.
    pub fn sent(transaction_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message: COMMAND_SENT.to_owned(),
            error_details: None,
            timestamp: Utc::now(),
            transaction_id: Some(transaction_id.into()),
        }
    }

    /// Any failed outcome.
    pub fn failure(
        message: &str,
        details: impl Into<String>,
        transaction_id: Option<String>,
    ) -> Self {
        Self {
            success: false,
            message: message.to_owned(),
            error_details: Some(details.into()),
            timestamp: Utc::now(),
            transaction_id,
        }
    }

    /// Request rejected before reaching the relay.
    pub fn invalid(errors: &ValidationErrors) -> Self {
        Self::failure(VALIDATION_FAILED, describe(errors), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMEI: &str = "123456789012345";

    fn details(request: &CommandRequest) -> String {
        describe(&request.validate().unwrap_err())
    }

    #[test]
    fn test_valid_request() {
        let request = CommandRequest::new(IMEI, "PING", "a@b.com");
        assert!(request.validate().is_ok());

        let request = request.with_display_name("");
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_imei_rules() {
        let request = CommandRequest::new("123", "PING", "a@b.com");
        assert_eq!(details(&request), "IMEI must be exactly 15 digits");

        let request = CommandRequest::new("12345678901234a", "PING", "a@b.com");
        assert_eq!(details(&request), "IMEI must contain only digits");

        let request = CommandRequest::new("12a", "PING", "a@b.com");
        assert_eq!(
            details(&request),
            "IMEI must be exactly 15 digits; IMEI must contain only digits"
        );

        // Non ASCII digits are refused.
        let request = CommandRequest::new("١٢٣٤٥٦٧٨٩٠١٢٣٤٥", "PING", "a@b.com");
        assert_eq!(details(&request), "IMEI must contain only digits");
    }

    #[test]
    fn test_command_length() {
        let request = CommandRequest::new(IMEI, "x".repeat(500), "a@b.com");
        assert!(request.validate().is_ok());

        // Length is counted in characters, not bytes.
        let request = CommandRequest::new(IMEI, "é".repeat(500), "a@b.com");
        assert!(request.validate().is_ok());

        let request = CommandRequest::new(IMEI, "x".repeat(501), "a@b.com");
        assert_eq!(details(&request), "Command cannot exceed 500 characters");
    }

    #[test]
    fn test_email_rules() {
        for email in ["a@b.com", "first.last+tag@sub.example.org"] {
            let request = CommandRequest::new(IMEI, "PING", email);
            assert!(request.validate().is_ok(), "{email} should be valid");
        }

        for email in ["plain", "a@b", "@b.com", "a@.com", "a@b.com.", "a b@c.com"] {
            let request = CommandRequest::new(IMEI, "PING", email);
            assert_eq!(
                details(&request),
                "Invalid email address format",
                "{email} should be invalid"
            );
        }
    }

    #[test]
    fn test_missing_fields_only_report_required() {
        let request: CommandRequest = serde_json::from_str(
            r#"{"imei": "", "command": "   ", "recipientEmail": null}"#,
        )
        .unwrap();
        assert_eq!(request.imei, None);
        assert_eq!(request.command, None);

        assert_eq!(
            details(&request),
            "Command is required; IMEI is required; Recipient email is required"
        );
    }

    #[test]
    fn test_every_violation_is_collected() {
        let request = CommandRequest::new("1", "x".repeat(600), "nope");
        assert_eq!(
            details(&request),
            "Command cannot exceed 500 characters; IMEI must be exactly 15 digits; Invalid email address format"
        );
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = CommandOutcome::sent("abc");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["message"], COMMAND_SENT);
        assert_eq!(json["transactionId"], "abc");
        assert!(json.get("errorDetails").is_none());
        assert!(json["timestamp"].is_string());

        let outcome = CommandOutcome::failure(VALIDATION_FAILED, "oops", None);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["errorDetails"], "oops");
        assert!(json.get("transactionId").is_none());
    }
}
