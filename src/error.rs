//! Error handler for the buoy command API.
//!
//! Every error is answered with a [`CommandOutcome`] body so callers always
//! receive the same JSON shape.

use std::any::Any;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use validator::ValidationErrors;

use crate::command::{CommandOutcome, INVALID_BODY, UNEXPECTED_ERROR};

pub type Result<T> = std::result::Result<T, ServerError>;

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Validation(_) | ServerError::Axum(_) => {
                StatusCode::BAD_REQUEST
            },
            ServerError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let outcome = match &self {
            ServerError::Validation(errors) => CommandOutcome::invalid(errors),

            ServerError::Axum(rejection) => {
                CommandOutcome::failure(INVALID_BODY, rejection.body_text(), None)
            },

            ServerError::Internal { details, source } => {
                tracing::error!(err = ?source, %details, "server returned 500 status");

                CommandOutcome::failure(UNEXPECTED_ERROR, details.clone(), None)
            },
        };

        (self.status(), Json(outcome)).into_response()
    }
}

/// Text carried by a panic payload.
pub fn panic_message(err: &(dyn Any + Send)) -> String {
    if let Some(message) = err.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = err.downcast_ref::<&str>() {
        (*message).to_owned()
    } else {
        "unknown panic".to_owned()
    }
}

/// Answer a panicking handler with a 500 outcome.
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let details = panic_message(&*err);
    tracing::error!(%details, "handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(CommandOutcome::failure(UNEXPECTED_ERROR, details, None)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;
    use validator::ValidationError;

    use super::*;
    use crate::command::VALIDATION_FAILED;

    async fn outcome(response: Response) -> CommandOutcome {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_validation_response() {
        let mut errors = ValidationErrors::new();
        errors.add(
            "imei",
            ValidationError::new("length")
                .with_message("IMEI must be exactly 15 digits".into()),
        );

        let response = ServerError::from(errors).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let outcome = outcome(response).await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, VALIDATION_FAILED);
        assert_eq!(
            outcome.error_details.as_deref(),
            Some("IMEI must be exactly 15 digits")
        );
        assert_eq!(outcome.transaction_id, None);
    }

    #[tokio::test]
    async fn test_internal_response() {
        let response = ServerError::Internal {
            details: "boom".into(),
            source: None,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let outcome = outcome(response).await;
        assert_eq!(outcome.message, UNEXPECTED_ERROR);
        assert_eq!(outcome.error_details.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_panic_response() {
        let response = panic_response(Box::new("provider exploded"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let outcome = outcome(response).await;
        assert_eq!(outcome.message, UNEXPECTED_ERROR);
        assert_eq!(outcome.error_details.as_deref(), Some("provider exploded"));
    }
}
