use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use holpaca_proto::{ConnectRequest, DisconnectRequest, GetStatusResponse, ResizeRequest};
use tracing::{error, info, warn};

use crate::{AgentCore, AgentError};

pub(crate) fn router(core: Arc<AgentCore>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/resize", post(resize))
        .with_state(core)
}

async fn status(State(core): State<Arc<AgentCore>>) -> Json<GetStatusResponse> {
    Json(GetStatusResponse { cache_status: core.status() })
}

async fn resize(
    State(core): State<Arc<AgentCore>>,
    Json(req): Json<ResizeRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    core.resize(&req.pool_sizes)
        .map(|_| StatusCode::OK)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("resize: {e}")))
}

/// Normalizes a bare `host:port` into a reqwest-able base URL.
pub(crate) fn base_url(addr: &str) -> String {
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.trim_end_matches('/').to_string()
    } else {
        format!("http://{addr}")
    }
}

/// The agent's control-plane half: a dedicated runtime hosting the RPC
/// server, plus the registration with the orchestrator. Dropping it sends
/// `Disconnect` and stops the server.
pub(crate) struct ControlPlane {
    runtime: tokio::runtime::Runtime,
    server: tokio::task::JoinHandle<()>,
    client: reqwest::Client,
    address: String,
    orchestrator: String,
}

impl ControlPlane {
    pub(crate) fn start(
        core: Arc<AgentCore>,
        address: &str,
        orchestrator: &str,
    ) -> Result<Self, AgentError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(AgentError::Server)?;

        let listener = runtime
            .block_on(tokio::net::TcpListener::bind(address))
            .map_err(AgentError::Server)?;
        // Binding to port 0 is handy in tests; advertise what we actually
        // got, the orchestrator keys proxies by this string.
        let address = match listener.local_addr() {
            Ok(actual) if address.ends_with(":0") => actual.to_string(),
            _ => address.to_string(),
        };

        let app = router(core);
        info!(addr = %address, "agent control server listening");
        let server = runtime.spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "agent control server exited");
            }
        });

        let plane = Self {
            runtime,
            server,
            client: reqwest::Client::new(),
            address,
            orchestrator: base_url(orchestrator),
        };
        plane.register();
        Ok(plane)
    }

    pub(crate) fn address(&self) -> &str {
        &self.address
    }

    /// Registers with the orchestrator. The agent is useless without it, so
    /// this retries with a 1 s backoff until it answers.
    fn register(&self) {
        let url = format!("{}/connect", self.orchestrator);
        let body = ConnectRequest { cache_address: self.address.clone() };
        self.runtime.block_on(async {
            loop {
                match self.client.post(&url).json(&body).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        info!(orchestrator = %self.orchestrator, "registered with orchestrator");
                        return;
                    }
                    Ok(resp) => {
                        warn!(status = %resp.status(), "connect rejected, retrying")
                    }
                    Err(e) => warn!(error = %e, "orchestrator unreachable, retrying"),
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });
    }
}

impl Drop for ControlPlane {
    fn drop(&mut self) {
        let url = format!("{}/disconnect", self.orchestrator);
        let body = DisconnectRequest { cache_address: self.address.clone() };
        let sent = self
            .runtime
            .block_on(async { self.client.post(&url).json(&body).send().await });
        if let Err(e) = sent {
            warn!(error = %e, "disconnect on shutdown failed");
        }
        self.server.abort();
    }
}
