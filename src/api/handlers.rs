use crate::api::GatewayState;
use crate::api::responses::{
    AccidentUpdateBody, ApiResponse, ErrorCode, ErrorResponse, HealthBody, HealthStatus,
    ObservationBody, SignalBody,
};
use crate::perception::{self, Detection};
use crate::storage::{ACCIDENT_COLLECTION, Storage, StorageError};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::SystemTime;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{error, info, warn};

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

fn format_timestamp(timestamp: SystemTime) -> Result<String, time::error::Format> {
    OffsetDateTime::from(timestamp).format(&Rfc3339)
}

pub(crate) fn timestamp_or_epoch(timestamp: SystemTime) -> String {
    format_timestamp(timestamp).unwrap_or_else(|err| {
        error!(error = %err, "Failed to format response timestamp");
        "1970-01-01T00:00:00Z".to_string()
    })
}

fn error_response<T>(status: StatusCode, code: ErrorCode, message: &str) -> ApiResponse<T> {
    ApiResponse::Error {
        status,
        body: ErrorResponse {
            error_code: code,
            error_message: message.to_string(),
            timestamp: timestamp_or_epoch(SystemTime::now()),
        },
    }
}

fn internal_error<T>(route: &str, message: &str) -> ApiResponse<T> {
    error!(route, message, "Internal error while handling request");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorCode::InternalError,
        INTERNAL_ERROR_MESSAGE,
    )
}

pub async fn get_health(State(state): State<GatewayState>) -> impl IntoResponse {
    build_health_response(&state, SystemTime::now())
}

pub async fn get_observation(State(state): State<GatewayState>) -> impl IntoResponse {
    build_observation_response(&state, SystemTime::now())
}

pub async fn get_signal(State(state): State<GatewayState>) -> impl IntoResponse {
    build_signal_response(&state, SystemTime::now())
}

#[derive(Debug, Deserialize)]
pub struct DetectionReport {
    pub detections: Vec<Detection>,
    /// Base64 JPEG of the frame the detections came from.
    #[serde(default)]
    pub frame: Option<String>,
}

pub async fn post_detections(
    State(state): State<GatewayState>,
    Json(report): Json<DetectionReport>,
) -> impl IntoResponse {
    build_detections_response(&state, report, SystemTime::now())
}

#[derive(Debug, Deserialize)]
pub struct ObservationReport {
    pub vehicle_counts: BTreeMap<String, u32>,
    pub total_vehicle_count: u32,
    #[serde(default)]
    pub accident_active: bool,
    #[serde(default)]
    pub accident_count: u32,
    #[serde(default)]
    pub confidence: f64,
}

pub async fn post_observation(
    State(state): State<GatewayState>,
    Json(report): Json<ObservationReport>,
) -> impl IntoResponse {
    build_report_response(&state, report, SystemTime::now())
}

/// Downstream status edits on an existing accident record.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccidentStatusUpdate {
    pub er_informed: Option<bool>,
    pub er_dispatched: Option<bool>,
    pub patient_rec: Option<bool>,
}

impl AccidentStatusUpdate {
    pub fn fields(&self) -> Map<String, Value> {
        [
            ("er_informed", self.er_informed),
            ("er_dispatched", self.er_dispatched),
            ("patient_rec", self.patient_rec),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|value| (name.to_string(), Value::Bool(value))))
        .collect()
    }
}

pub async fn patch_accident(
    State(state): State<GatewayState>,
    Path(document_id): Path<String>,
    Json(update): Json<AccidentStatusUpdate>,
) -> impl IntoResponse {
    let storage = state.storage.clone();
    let result = tokio::task::spawn_blocking(move || {
        build_accident_update_response(storage.as_ref(), &document_id, &update, SystemTime::now())
    })
    .await;
    match result {
        Ok(response) => response,
        Err(err) => {
            error!(error = %err, "Accident update task failed");
            internal_error("/api/accidents", "update task failed")
        }
    }
}

fn build_health_response(state: &GatewayState, now: SystemTime) -> ApiResponse<HealthBody> {
    if state.observation.read().is_err() {
        return internal_error("/api/health", "observation lock poisoned");
    }
    let has_signal = match state.app.read() {
        Ok(guard) => guard.signal().is_some(),
        Err(_) => return internal_error("/api/health", "state lock poisoned"),
    };
    let status = if has_signal {
        HealthStatus::Ok
    } else {
        HealthStatus::Degraded
    };
    ApiResponse::Success {
        status: StatusCode::OK,
        body: HealthBody {
            status,
            timestamp: timestamp_or_epoch(now),
        },
    }
}

fn build_observation_response(
    state: &GatewayState,
    now: SystemTime,
) -> ApiResponse<ObservationBody> {
    match state.observation.read() {
        Ok(observation) => ApiResponse::Success {
            status: StatusCode::OK,
            body: ObservationBody {
                observation,
                timestamp: timestamp_or_epoch(now),
            },
        },
        Err(_) => internal_error("/api/observation", "observation lock poisoned"),
    }
}

fn build_signal_response(state: &GatewayState, now: SystemTime) -> ApiResponse<SignalBody> {
    let signal = match state.app.read() {
        Ok(guard) => guard.signal().cloned(),
        Err(_) => return internal_error("/api/signal", "state lock poisoned"),
    };
    match signal {
        Some(signal) => ApiResponse::Success {
            status: StatusCode::OK,
            body: SignalBody {
                signal,
                timestamp: timestamp_or_epoch(now),
            },
        },
        None => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::NoData,
            "Signal controller has not started",
        ),
    }
}

fn build_detections_response(
    state: &GatewayState,
    report: DetectionReport,
    now: SystemTime,
) -> ApiResponse<ObservationBody> {
    let observation = perception::summarize(&report.detections, &state.regions, &state.labels);
    if state.observation.write(observation.clone()).is_err() {
        return internal_error("/api/detections", "observation lock poisoned");
    }
    if let Some(frame) = report.frame {
        match state.app.write() {
            Ok(mut guard) => {
                guard.push_frame(frame);
            }
            Err(_) => warn!("State lock poisoned, frame dropped"),
        }
    }
    ApiResponse::Success {
        status: StatusCode::ACCEPTED,
        body: ObservationBody {
            observation,
            timestamp: timestamp_or_epoch(now),
        },
    }
}

fn build_report_response(
    state: &GatewayState,
    report: ObservationReport,
    now: SystemTime,
) -> ApiResponse<ObservationBody> {
    if let Some(unknown) = report
        .vehicle_counts
        .keys()
        .find(|name| !state.regions.names().any(|region| region == name.as_str()))
    {
        return error_response(
            StatusCode::BAD_REQUEST,
            ErrorCode::InvalidRequest,
            &format!("Unknown region: {unknown}"),
        );
    }
    match perception::report(
        &state.observation,
        report.vehicle_counts,
        report.total_vehicle_count,
        report.accident_active,
        report.accident_count,
        report.confidence,
    ) {
        Ok(observation) => ApiResponse::Success {
            status: StatusCode::ACCEPTED,
            body: ObservationBody {
                observation,
                timestamp: timestamp_or_epoch(now),
            },
        },
        Err(_) => internal_error("/api/observation", "observation lock poisoned"),
    }
}

fn build_accident_update_response(
    storage: &dyn Storage,
    document_id: &str,
    update: &AccidentStatusUpdate,
    now: SystemTime,
) -> ApiResponse<AccidentUpdateBody> {
    let fields = update.fields();
    if fields.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            ErrorCode::InvalidRequest,
            "No status field to update",
        );
    }
    let updated: Vec<String> = fields.keys().cloned().collect();
    match storage.update(ACCIDENT_COLLECTION, document_id, fields) {
        Ok(()) => {
            info!(document_id, fields = ?updated, "Accident status updated");
            ApiResponse::Success {
                status: StatusCode::OK,
                body: AccidentUpdateBody {
                    document_id: document_id.to_string(),
                    updated,
                    timestamp: timestamp_or_epoch(now),
                },
            }
        }
        Err(StorageError::NotFound { .. }) => error_response(
            StatusCode::NOT_FOUND,
            ErrorCode::NotFound,
            "Accident record not found",
        ),
        Err(StorageError::InvalidKey(_)) => error_response(
            StatusCode::BAD_REQUEST,
            ErrorCode::InvalidRequest,
            "Invalid accident id",
        ),
        Err(err) => {
            warn!(document_id, error = %err, "Accident status update failed");
            internal_error("/api/accidents", "storage update failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::{BoundingBox, DetectionLabels};
    use crate::region::{Boundary, Region, RegionMap};
    use crate::signal::Phase;
    use crate::state::{AppState, Observation, SharedObservation, SignalStatus};
    use crate::storage::memory::MemoryStore;
    use serde_json::json;
    use std::sync::{Arc, RwLock};
    use std::time::{Duration, UNIX_EPOCH};

    fn gateway(store: Arc<MemoryStore>) -> GatewayState {
        let regions = RegionMap::new(vec![
            Region {
                name: "A".to_string(),
                boundary: Boundary::rect(0.0, 0.0, 100.0, 100.0),
            },
            Region {
                name: "B".to_string(),
                boundary: Boundary::rect(100.5, 0.0, 200.0, 100.0),
            },
        ])
        .expect("valid regions");
        GatewayState {
            observation: SharedObservation::new(Observation::empty(regions.names())),
            app: Arc::new(RwLock::new(AppState::new())),
            storage: store,
            regions: Arc::new(regions),
            labels: Arc::new(DetectionLabels::default()),
            frame_interval: Duration::from_millis(50),
        }
    }

    #[test]
    fn signal_returns_no_data_before_controller_starts() {
        let state = gateway(Arc::new(MemoryStore::new()));

        match build_signal_response(&state, UNIX_EPOCH) {
            ApiResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body.error_code, ErrorCode::NoData);
            }
            ApiResponse::Success { .. } => panic!("expected no data response"),
        }
    }

    #[test]
    fn signal_returns_published_phase() {
        let state = gateway(Arc::new(MemoryStore::new()));
        state
            .app
            .write()
            .expect("state lock")
            .set_signal(SignalStatus {
                phase: Phase::Green,
                active_region: "A".to_string(),
                next_region: "B".to_string(),
                phase_duration_secs: 4.0,
            });

        match build_signal_response(&state, UNIX_EPOCH + Duration::from_secs(1)) {
            ApiResponse::Success { status, body } => {
                assert_eq!(status, StatusCode::OK);
                assert_eq!(body.signal.active_region, "A");
                assert_eq!(body.timestamp, "1970-01-01T00:00:01Z");
            }
            ApiResponse::Error { status, .. } => panic!("expected success, got {status}"),
        }
    }

    #[test]
    fn detections_replace_observation_and_store_frame() {
        let state = gateway(Arc::new(MemoryStore::new()));
        let report = DetectionReport {
            detections: vec![Detection {
                label: "objects".to_string(),
                bbox: BoundingBox {
                    x1: 120.0,
                    y1: 10.0,
                    x2: 140.0,
                    y2: 30.0,
                },
                confidence: 0.8,
            }],
            frame: Some("/9j/4AAQ".to_string()),
        };

        match build_detections_response(&state, report, UNIX_EPOCH) {
            ApiResponse::Success { status, body } => {
                assert_eq!(status, StatusCode::ACCEPTED);
                assert_eq!(body.observation.vehicle_count("B"), 1);
            }
            ApiResponse::Error { status, .. } => panic!("expected success, got {status}"),
        }
        let current = state.observation.read().expect("observation");
        assert_eq!(current.total_vehicle_count, 1);
        let guard = state.app.read().expect("state lock");
        assert_eq!(guard.frame().map(|frame| frame.sequence), Some(1));
    }

    #[test]
    fn report_rejects_unknown_region() {
        let state = gateway(Arc::new(MemoryStore::new()));
        let report = ObservationReport {
            vehicle_counts: BTreeMap::from([("Z".to_string(), 1)]),
            total_vehicle_count: 1,
            accident_active: false,
            accident_count: 0,
            confidence: 0.0,
        };

        match build_report_response(&state, report, UNIX_EPOCH) {
            ApiResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(body.error_code, ErrorCode::InvalidRequest);
            }
            ApiResponse::Success { .. } => panic!("expected invalid request"),
        }
    }

    #[test]
    fn accident_update_edits_existing_record() {
        let store = Arc::new(MemoryStore::new());
        store
            .write(
                ACCIDENT_COLLECTION,
                "20260116_101530_250_1.5_2.5",
                json!({"er_dispatched": false, "patient_rec": false}),
            )
            .expect("seed record");
        let update = AccidentStatusUpdate {
            er_dispatched: Some(true),
            ..AccidentStatusUpdate::default()
        };

        let response = build_accident_update_response(
            store.as_ref(),
            "20260116_101530_250_1.5_2.5",
            &update,
            UNIX_EPOCH,
        );

        match response {
            ApiResponse::Success { status, body } => {
                assert_eq!(status, StatusCode::OK);
                assert_eq!(body.updated, vec!["er_dispatched".to_string()]);
            }
            ApiResponse::Error { status, .. } => panic!("expected success, got {status}"),
        }
        assert_eq!(
            store.get(ACCIDENT_COLLECTION, "20260116_101530_250_1.5_2.5"),
            Some(json!({"er_dispatched": true, "patient_rec": false}))
        );
    }

    #[test]
    fn accident_update_reports_missing_record_and_empty_body() {
        let store = MemoryStore::new();
        let update = AccidentStatusUpdate {
            patient_rec: Some(true),
            ..AccidentStatusUpdate::default()
        };

        match build_accident_update_response(&store, "missing", &update, UNIX_EPOCH) {
            ApiResponse::Error { status, .. } => assert_eq!(status, StatusCode::NOT_FOUND),
            ApiResponse::Success { .. } => panic!("expected not found"),
        }
        match build_accident_update_response(
            &store,
            "missing",
            &AccidentStatusUpdate::default(),
            UNIX_EPOCH,
        ) {
            ApiResponse::Error { status, .. } => assert_eq!(status, StatusCode::BAD_REQUEST),
            ApiResponse::Success { .. } => panic!("expected bad request"),
        }
    }

    #[test]
    fn health_is_degraded_until_signal_publishes() {
        let state = gateway(Arc::new(MemoryStore::new()));
        match build_health_response(&state, UNIX_EPOCH) {
            ApiResponse::Success { body, .. } => assert_eq!(body.status, HealthStatus::Degraded),
            ApiResponse::Error { status, .. } => panic!("expected success, got {status}"),
        }
    }
}
