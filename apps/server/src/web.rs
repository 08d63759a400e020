use crate::control::LoopState;
use crate::planner::{compute_plan, Weather};
use crate::policy::is_home;
use crate::state::{PresenceMode, SharedState};
use anyhow::{Context, Result};
use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use chrono::Local;
use serde::Deserialize;
use serde_json::{json, Value};
use ses_protocol::bus::{Bus, Intent};
use ses_protocol::gateway::ActuatorGateway;
use ses_protocol::relay::Peer;
use ses_protocol::topics::Topics;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

// Shared between the decision loop and the web server
#[derive(Clone)]
pub struct WebState {
    pub state: SharedState,
    pub loop_status: watch::Receiver<LoopState>,
    pub gateway: Arc<dyn ActuatorGateway>,
    pub bus: Arc<dyn Bus>,
    pub topics: Topics,
    pub boiler: Option<Peer>,
}

#[derive(Deserialize)]
pub struct PresenceRequest {
    mode: PresenceMode,
}

#[derive(Deserialize)]
pub struct BoilerRequest {
    on: bool,
}

#[derive(Deserialize)]
pub struct PlanRequest {
    prices: Vec<f64>,
    #[serde(default)]
    weather: Weather,
}

pub fn router(web_state: WebState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(get_status))
        .route("/api/presence", post(set_presence))
        .route("/api/boiler", post(control_boiler))
        .route("/api/plan", post(publish_plan))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .with_state(web_state)
}

pub async fn create_web_server(web_state: WebState, bind: &str, mut stop: watch::Receiver<bool>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding web server to {bind}"))?;
    info!("web server listening on http://{bind}");
    axum::serve(listener, router(web_state))
        .with_graceful_shutdown(async move {
            let _ = stop.wait_for(|stop| *stop).await;
        })
        .await
        .context("web server failed")
}

async fn health() -> axum::Json<Value> {
    axum::Json(json!({
        "ok": true,
        "app": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn get_status(State(web): State<WebState>) -> axum::Json<Value> {
    let snapshot = web.state.snapshot();
    let loop_state = *web.loop_status.borrow();
    axum::Json(json!({
        "home": is_home(&snapshot.presence),
        "loop": loop_state,
        "state": snapshot,
    }))
}

async fn set_presence(
    State(web): State<WebState>,
    Json(request): Json<PresenceRequest>,
) -> axum::Json<Value> {
    web.state.write().presence.mode = request.mode;
    info!(mode = ?request.mode, "presence mode set from web");

    // Retained so a restart picks the mode up again from the broker.
    let intent = Intent::new(web.topics.presence_mode(), json!({ "mode": request.mode })).retained();
    if let Err(e) = web.bus.publish(&intent).await {
        warn!("presence mode not persisted: {e}");
    }
    axum::Json(json!({ "success": true }))
}

async fn control_boiler(
    State(web): State<WebState>,
    Json(request): Json<BoilerRequest>,
) -> axum::Json<Value> {
    let Some(peer) = web.boiler.as_ref() else {
        return axum::Json(json!({
            "success": false,
            "error": "boiler peer not configured"
        }));
    };

    match web.gateway.set_relay(peer, request.on).await {
        Ok(ack) => axum::Json(json!({
            "success": true,
            "ack": ack.body
        })),
        Err(e) => {
            warn!(peer = %peer.url, "manual boiler switch failed: {e}");
            axum::Json(json!({
                "success": false,
                "error": e.to_string()
            }))
        }
    }
}

async fn publish_plan(
    State(web): State<WebState>,
    Json(request): Json<PlanRequest>,
) -> (StatusCode, axum::Json<Value>) {
    let plan = match compute_plan(&request.prices, &request.weather) {
        Ok(plan) => plan,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                axum::Json(json!({ "success": false, "error": e.to_string() })),
            )
        }
    };

    let topic = web.topics.plan_targets(Local::now().date_naive());
    let payload = match serde_json::to_value(&plan) {
        Ok(payload) => payload,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(json!({ "success": false, "error": e.to_string() })),
            )
        }
    };
    match web.bus.publish(&Intent::new(topic.clone(), payload.clone()).retained()).await {
        Ok(()) => {
            info!(topic = %topic, "plan published");
            (
                StatusCode::OK,
                axum::Json(json!({ "success": true, "topic": topic, "plan": payload })),
            )
        }
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            axum::Json(json!({ "success": false, "error": e.to_string() })),
        ),
    }
}
