//! Buoy HTTP API.
pub mod command;
pub mod status;

use axum::Router;
use axum::extract::{FromRequest, Json, Request};
use axum::routing::{get, post};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::AppState;
use crate::error::ServerError;

/// JSON body validated before reaching the handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct Valid<T>(pub T);

impl<T, S> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(
        req: Request,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        // `POST /api/buoy/send-command` goes to `command`.
        .route("/send-command", post(command::handler))
        // `GET /api/buoy/health` goes to `health`.
        .route("/health", get(status::health))
        // `GET /api/buoy/info` goes to `info`.
        .route("/info", get(status::info))
}
