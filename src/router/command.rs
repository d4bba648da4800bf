use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use crate::command::{CommandOutcome, CommandRequest};
use crate::error::{Result, ServerError, panic_message};
use crate::relay::CommandRelay;
use crate::router::Valid;

/// Handler to send a command to a buoy.
///
/// Delivery runs on its own task: a caller hanging up does not cancel an
/// email already handed to the provider.
pub async fn handler(
    State(relay): State<Arc<CommandRelay>>,
    Valid(body): Valid<CommandRequest>,
) -> Result<(StatusCode, Json<CommandOutcome>)> {
    tracing::info!(imei = body.imei(), "received command request");

    let outcome = tokio::spawn(async move { relay.send(&body).await })
        .await
        .map_err(|err| {
            let details = if err.is_panic() {
                panic_message(&*err.into_panic())
            } else {
                err.to_string()
            };

            ServerError::Internal {
                details,
                source: None,
            }
        })?;

    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    Ok((status, Json(outcome)))
}
