//! Liveness and service description.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Configuration;

const DESCRIPTION: &str =
    "API for sending commands to remote buoy systems via email";

#[derive(Debug, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub service: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Endpoint {
    pub method: String,
    pub path: String,
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Info {
    pub name: String,
    pub version: String,
    pub description: String,
    pub endpoints: Vec<Endpoint>,
    pub timestamp: DateTime<Utc>,
}

fn endpoint(method: &str, path: &str, description: &str) -> Endpoint {
    Endpoint {
        method: method.into(),
        path: path.into(),
        description: description.into(),
    }
}

/// Always healthy while the process serves requests.
pub async fn health(State(config): State<Arc<Configuration>>) -> Json<Health> {
    Json(Health {
        status: "Healthy".into(),
        timestamp: Utc::now(),
        service: config.name.clone(),
    })
}

/// Static API description.
pub async fn info(State(config): State<Arc<Configuration>>) -> Json<Info> {
    Json(Info {
        name: config.name.clone(),
        version: config.version().to_owned(),
        description: DESCRIPTION.into(),
        endpoints: vec![
            endpoint("POST", "/api/buoy/send-command", "Send command to buoy"),
            endpoint("GET", "/api/buoy/health", "Health check"),
            endpoint("GET", "/api/buoy/info", "API information"),
        ],
        timestamp: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;

    use super::*;
    use crate::mail::stub::{Behavior, StubProvider};
    use crate::*;

    #[tokio::test]
    async fn test_health_handler() {
        // Provider state does not matter.
        let provider = Arc::new(StubProvider::new(Behavior::Fault("down".into())));
        let app = app(test_state(provider));

        let response =
            make_request(app, Method::GET, "/api/buoy/health", String::default())
                .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: Health = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.status, "Healthy");
        assert_eq!(body.service, "Buoy Command API");
    }

    #[tokio::test]
    async fn test_info_handler() {
        let app = app(test_state(Arc::new(StubProvider::succeeding())));

        let response =
            make_request(app, Method::GET, "/api/buoy/info", String::default())
                .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: Info = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(body.endpoints.len(), 3);
        assert_eq!(body.endpoints[0].method, "POST");
        assert_eq!(body.endpoints[0].path, "/api/buoy/send-command");
    }
}
