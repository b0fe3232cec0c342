use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use holpaca_proto::{ConnectRequest, DisconnectRequest};

use crate::proxy::ProxyDirectory;

/// Control-plane service exposed to agents.
pub fn router(directory: ProxyDirectory) -> Router {
    Router::new()
        .route("/connect", post(connect))
        .route("/disconnect", post(disconnect))
        .with_state(directory)
}

async fn connect(
    State(directory): State<ProxyDirectory>,
    Json(req): Json<ConnectRequest>,
) -> StatusCode {
    directory.connect(&req.cache_address).await;
    StatusCode::OK
}

async fn disconnect(
    State(directory): State<ProxyDirectory>,
    Json(req): Json<DisconnectRequest>,
) -> StatusCode {
    directory.disconnect(&req.cache_address).await;
    StatusCode::OK
}
