use crate::perception::DetectionLabels;
use crate::region::RegionMap;
use crate::state::{AppState, SharedObservation};
use crate::storage::Storage;
use axum::Router;
use axum::routing::{get, patch, post};
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub mod handlers;
pub mod responses;
pub mod ws;

/// Everything the dashboard gateway reads or forwards.
#[derive(Clone)]
pub struct GatewayState {
    pub observation: SharedObservation,
    pub app: Arc<RwLock<AppState>>,
    pub storage: Arc<dyn Storage>,
    pub regions: Arc<RegionMap>,
    pub labels: Arc<DetectionLabels>,
    pub frame_interval: Duration,
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::get_health))
        .route(
            "/api/observation",
            get(handlers::get_observation).post(handlers::post_observation),
        )
        .route("/api/detections", post(handlers::post_detections))
        .route("/api/signal", get(handlers::get_signal))
        .route("/api/accidents/{id}", patch(handlers::patch_accident))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}
