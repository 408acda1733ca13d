//! HTTP control surface.
//!
//! Thin handlers over the shared [`AppState`]; all real behavior lives in
//! `shaper-core`. Errors cross the wire as `{"kind": ..., "message": ...}`
//! so the operator frontend can distinguish failure categories.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use shaper_core::{
    dhcp, net,
    net::InterfaceDetails,
    probe::ProbeReport,
    shaper::ShapingError,
    telemetry::{HistoryEntry, TrafficSnapshot},
    ShapingConfig,
};

use crate::{
    state::AppState,
    system::{self, SystemResources},
};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/status", get(status))
        .route("/config", get(get_config).post(set_config))
        .route("/reset", post(reset))
        .route("/interfaces", get(interfaces))
        .route("/traffic", get(traffic))
        .route("/system-info", get(system_info))
        .route("/dhcp/clients", get(dhcp_clients))
        .route("/dhcp/status", get(dhcp_status))
        .route("/dhcp/restart", post(dhcp_restart))
        .route("/ping-test", post(ping_test))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Error body sent to the operator frontend.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "kind": self.kind, "message": self.message }));
        (self.status, body).into_response()
    }
}

impl From<ShapingError> for ApiError {
    fn from(err: ShapingError) -> Self {
        let (status, kind) = match &err {
            ShapingError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation"),
            ShapingError::InterfaceNotFound(_) => {
                (StatusCode::NOT_FOUND, "interface-not-found")
            }
            ShapingError::PermissionDenied => (StatusCode::FORBIDDEN, "permission-denied"),
            ShapingError::ApplyRejected { .. } => (StatusCode::BAD_GATEWAY, "apply-rejected"),
            ShapingError::Busy => (StatusCode::CONFLICT, "busy"),
        };
        Self { status, kind, message: err.to_string() }
    }
}

impl From<dhcp::Error> for ApiError {
    fn from(err: dhcp::Error) -> Self {
        let (status, kind) = match &err {
            dhcp::Error::DaemonNotRunning => {
                (StatusCode::SERVICE_UNAVAILABLE, "daemon-not-running")
            }
            dhcp::Error::LeaseStoreUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "lease-store-unavailable")
            }
            dhcp::Error::Command(_) => (StatusCode::BAD_GATEWAY, "command-failed"),
        };
        Self { status, kind, message: err.to_string() }
    }
}

async fn root(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "shaperd",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started.elapsed().as_secs(),
    }))
}

#[derive(Serialize)]
struct StatusResponse {
    config: ShapingConfig,
    interfaces: Vec<InterfaceDetails>,
    system: SystemResources,
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        config: state.current_config(),
        interfaces: net::interfaces(),
        system: system::resources(),
    })
}

async fn get_config(State(state): State<Arc<AppState>>) -> Json<ShapingConfig> {
    Json(state.current_config())
}

#[derive(Serialize)]
struct ApplyResponse {
    success: bool,
    message: String,
    config: ShapingConfig,
}

async fn set_config(
    State(state): State<Arc<AppState>>,
    Json(new): Json<ShapingConfig>,
) -> Result<Json<ApplyResponse>, ApiError> {
    let config = state.apply_config(new).await?;
    Ok(Json(ApplyResponse { success: true, message: config.summary(), config }))
}

async fn reset(State(state): State<Arc<AppState>>) -> Result<Json<ApplyResponse>, ApiError> {
    let config = state.reset().await?;
    Ok(Json(ApplyResponse {
        success: true,
        message: "traffic shaping reset to default state".to_string(),
        config,
    }))
}

async fn interfaces() -> Json<Vec<InterfaceDetails>> {
    Json(net::interfaces())
}

#[derive(Serialize)]
struct TrafficResponse {
    #[serde(flatten)]
    latest: TrafficSnapshot,
    history: Vec<HistoryEntry>,
}

async fn traffic(State(state): State<Arc<AppState>>) -> Json<TrafficResponse> {
    Json(TrafficResponse {
        latest: state.traffic.latest().unwrap_or_default(),
        history: state.traffic.history(),
    })
}

async fn system_info(State(state): State<Arc<AppState>>) -> Json<system::SystemInfo> {
    Json(system::info(&state.executor).await)
}

async fn dhcp_clients(State(state): State<Arc<AppState>>) -> Json<dhcp::ClientReport> {
    match state.leases.refresh().await {
        Ok(report) => Json(report),
        Err(err) => {
            tracing::debug!(%err, "lease refresh degraded, serving cached view");
            Json(state.leases.snapshot())
        }
    }
}

async fn dhcp_status(State(state): State<Arc<AppState>>) -> Json<dhcp::DhcpStatus> {
    Json(state.leases.status().await)
}

async fn dhcp_restart(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let daemon = state.leases.restart().await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("{} restarted", daemon.unit()),
    })))
}

#[derive(Debug, Deserialize)]
struct PingRequest {
    #[serde(default = "default_ping_host")]
    host: String,
    #[serde(default = "default_ping_count")]
    count: u32,
}

fn default_ping_host() -> String {
    "8.8.8.8".to_string()
}

fn default_ping_count() -> u32 {
    4
}

async fn ping_test(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PingRequest>,
) -> Json<ProbeReport> {
    Json(state.prober.probe(&request.host, request.count).await)
}

#[cfg(test)]
mod tests {
    use shaper_core::config::ValidationError;

    use super::*;

    #[test]
    fn shaping_errors_map_to_distinct_statuses() {
        let cases = [
            (
                ShapingError::Validation(ValidationError::DelayOutOfRange(10_001)),
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation",
            ),
            (
                ShapingError::InterfaceNotFound("enp9s0".to_string()),
                StatusCode::NOT_FOUND,
                "interface-not-found",
            ),
            (ShapingError::PermissionDenied, StatusCode::FORBIDDEN, "permission-denied"),
            (
                ShapingError::ApplyRejected {
                    command: "tc qdisc add".to_string(),
                    diagnostic: "Invalid argument".to_string(),
                },
                StatusCode::BAD_GATEWAY,
                "apply-rejected",
            ),
            (ShapingError::Busy, StatusCode::CONFLICT, "busy"),
        ];

        for (err, status, kind) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.status, status);
            assert_eq!(api.kind, kind);
        }
    }

    #[test]
    fn dhcp_errors_degrade_to_service_unavailable() {
        let api: ApiError = dhcp::Error::DaemonNotRunning.into();
        assert_eq!(api.status, StatusCode::SERVICE_UNAVAILABLE);

        let api: ApiError = dhcp::Error::LeaseStoreUnavailable("gone".to_string()).into();
        assert_eq!(api.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn ping_request_defaults_match_the_classic_probe() {
        let request: PingRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request.host, "8.8.8.8");
        assert_eq!(request.count, 4);
    }
}
