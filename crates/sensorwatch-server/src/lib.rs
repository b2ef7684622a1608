//! HTTP query surface for live machine telemetry.
//!
//! Serves the machine list, latest readings, chart series, vibration alerts,
//! summaries and downloads over the shared telemetry buffer. Every handler is
//! a read projection; nothing here mutates the buffer.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use log::info;
use serde::{Deserialize, Serialize};

use sensorwatch_core::config::AlertConfig;
use sensorwatch_core::source::wait_for_shutdown;
use sensorwatch_core::{
    AlertOutcome, BufferStats, ExportFormat, IngestSnapshot, IngestStats, MachineSummary,
    QueryResult, ShutdownSignal, SourceInfo, TelemetryQuery, evaluate, export_filename,
    export_rows,
};

/// Shared server state.
struct AppState {
    query: TelemetryQuery,
    source: Option<(SourceInfo, Arc<IngestStats>)>,
    alert: AlertConfig,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: msg.into() }))
}

#[derive(Serialize)]
struct MachinesResponse {
    machines: Vec<String>,
    total: usize,
}

#[derive(Serialize)]
struct ReadingsResponse {
    machine_id: String,
    count: usize,
    readings: QueryResult,
}

#[derive(Serialize)]
struct AlertResponse {
    machine_id: String,
    alert: bool,
    #[serde(flatten)]
    outcome: AlertOutcome,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    buffer: BufferStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ingest: Option<IngestSnapshot>,
}

#[derive(Deserialize)]
struct LatestParams {
    /// Rows to return (clamped to 1..=buffer capacity).
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct AlertParams {
    /// Vibration threshold in mm/s; defaults to the configured one.
    threshold: Option<f64>,
}

#[derive(Deserialize)]
struct ExportParams {
    /// Restrict to one machine; all retained records otherwise.
    machine: Option<String>,
    /// `csv` (default) or `arrow`.
    format: Option<String>,
}

async fn handle_machines(State(state): State<Arc<AppState>>) -> Json<MachinesResponse> {
    let machines = state.query.list_machines();
    let total = machines.len();
    Json(MachinesResponse { machines, total })
}

async fn handle_latest(
    State(state): State<Arc<AppState>>,
    Path(machine_id): Path<String>,
    Query(params): Query<LatestParams>,
) -> Json<ReadingsResponse> {
    let capacity = state.query.buffer().capacity();
    let limit = params
        .limit
        .unwrap_or(state.alert.latest_limit)
        .clamp(1, capacity);
    let readings = state.query.latest_readings(&machine_id, limit);
    Json(ReadingsResponse {
        count: readings.len(),
        machine_id,
        readings,
    })
}

async fn handle_series(
    State(state): State<Arc<AppState>>,
    Path(machine_id): Path<String>,
) -> Json<ReadingsResponse> {
    let readings = state.query.series_for(&machine_id);
    Json(ReadingsResponse {
        count: readings.len(),
        machine_id,
        readings,
    })
}

async fn handle_alerts(
    State(state): State<Arc<AppState>>,
    Path(machine_id): Path<String>,
    Query(params): Query<AlertParams>,
) -> Result<Json<AlertResponse>, ApiError> {
    let threshold = params.threshold.unwrap_or(state.alert.vibration_threshold);
    if !threshold.is_finite() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "threshold must be a finite number",
        ));
    }
    let latest = state
        .query
        .latest_readings(&machine_id, state.alert.latest_limit);
    let outcome = evaluate(&latest, threshold);
    Ok(Json(AlertResponse {
        machine_id,
        alert: outcome.is_alert(),
        outcome,
    }))
}

async fn handle_summary(
    State(state): State<Arc<AppState>>,
    Path(machine_id): Path<String>,
) -> Result<Json<MachineSummary>, ApiError> {
    state.query.summarize(&machine_id).map(Json).ok_or_else(|| {
        api_error(
            StatusCode::NOT_FOUND,
            format!("No readings for machine {machine_id}. Use /machines to list machines."),
        )
    })
}

async fn handle_export(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ExportParams>,
) -> Result<Response, ApiError> {
    let format: ExportFormat = params
        .format
        .as_deref()
        .unwrap_or("csv")
        .parse()
        .map_err(|e: sensorwatch_core::Error| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let rows = match params.machine.as_deref() {
        Some(id) => state.query.series_for(id),
        None => state.query.all_readings(),
    };
    let bytes = export_rows(&rows, format)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let filename = export_filename(params.machine.as_deref(), format);

    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let buffer = state.query.buffer().stats();
    let ingest = state.source.as_ref().map(|(_, stats)| stats.snapshot());
    let receiving = buffer.len > 0 || ingest.is_some_and(|s| s.accepted > 0);
    Json(HealthResponse {
        status: if receiving { "ok" } else { "waiting" },
        buffer,
        source: state.source.as_ref().map(|(info, _)| info.clone()),
        ingest,
    })
}

async fn handle_index(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let machines = state.query.list_machines();

    Json(serde_json::json!({
        "name": "sensorwatch",
        "version": sensorwatch_core::VERSION,
        "machines": machines.len(),
        "endpoints": {
            "/": "This API index",
            "/machines": "List machines with retained readings",
            "/machines/{id}/latest": {
                "method": "GET",
                "description": "Newest-first readings for one machine",
                "params": {
                    "limit": format!("Rows to return (default: {})", state.alert.latest_limit),
                }
            },
            "/machines/{id}/series": "Oldest-first readings for charting",
            "/machines/{id}/alerts": {
                "method": "GET",
                "description": "Vibration alert over the latest readings",
                "params": {
                    "threshold": format!("mm/s (default: {})", state.alert.vibration_threshold),
                }
            },
            "/machines/{id}/summary": "Aggregates over the retained window",
            "/export": {
                "method": "GET",
                "description": "Download readings",
                "params": {
                    "machine": "Machine ID (default: all machines)",
                    "format": "csv (default) or arrow",
                }
            },
            "/health": "Buffer and ingestion status",
        },
        "examples": {
            "latest": format!("/machines/{}/latest?limit=10", machines.first().map(|s| s.as_str()).unwrap_or("MCH-001")),
            "export_all": "/export?format=csv",
        }
    }))
}

/// Build the axum router.
///
/// `source` is the running adapter's metadata and counters, shown by
/// `/health`.
pub fn build_router(
    query: TelemetryQuery,
    source: Option<(SourceInfo, Arc<IngestStats>)>,
    alert: AlertConfig,
) -> Router {
    let state = Arc::new(AppState {
        query,
        source,
        alert,
    });

    Router::new()
        .route("/", get(handle_index))
        .route("/machines", get(handle_machines))
        .route("/machines/{id}/latest", get(handle_latest))
        .route("/machines/{id}/series", get(handle_series))
        .route("/machines/{id}/alerts", get(handle_alerts))
        .route("/machines/{id}/summary", get(handle_summary))
        .route("/export", get(handle_export))
        .route("/health", get(handle_health))
        .with_state(state)
}

/// Serve `app` on `host:port` until `shutdown` fires.
pub async fn run_server(
    app: Router,
    host: &str,
    port: u16,
    mut shutdown: ShutdownSignal,
) -> sensorwatch_core::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("serving on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { wait_for_shutdown(&mut shutdown).await })
        .await?;
    info!("server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use chrono::{Duration, TimeZone, Utc};
    use sensorwatch_core::{TelemetryBuffer, TelemetryRecord};
    use tower::ServiceExt;

    fn app_with(records: Vec<TelemetryRecord>) -> Router {
        let buffer = Arc::new(TelemetryBuffer::new(50).unwrap());
        for r in records {
            buffer.append(r);
        }
        build_router(TelemetryQuery::new(buffer), None, AlertConfig::default())
    }

    fn sample() -> Vec<TelemetryRecord> {
        let base = Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap();
        [0.2, 0.5, 0.8, 1.4, 1.7]
            .into_iter()
            .zip(0..)
            .map(|(vibration, i)| {
                TelemetryRecord::new("MCH-001", base + Duration::seconds(i * 3))
                    .with_vibration(vibration)
                    .with_rpm(1500 + i)
            })
            .chain(std::iter::once(
                TelemetryRecord::new("MCH-002", base).with_pressure(30.0),
            ))
            .collect()
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let (status, body) = get(app, uri).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_machines() {
        let (status, json) = get_json(app_with(sample()), "/machines").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total"], 2);
        assert_eq!(json["machines"][0], "MCH-001");
    }

    #[tokio::test]
    async fn test_latest_limit_and_order() {
        let (_, json) = get_json(app_with(sample()), "/machines/MCH-001/latest?limit=2").await;
        assert_eq!(json["count"], 2);
        assert_eq!(json["readings"][0]["rpm"], 1504);
        assert_eq!(json["readings"][1]["rpm"], 1503);
    }

    #[tokio::test]
    async fn test_latest_limit_zero_clamped() {
        let (_, json) = get_json(app_with(sample()), "/machines/MCH-001/latest?limit=0").await;
        assert_eq!(json["count"], 1);
    }

    #[tokio::test]
    async fn test_unknown_machine_is_empty() {
        let (status, json) = get_json(app_with(sample()), "/machines/ghost/series").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 0);

        let (status, _) = get(app_with(sample()), "/machines/ghost/summary").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_alerts_default_and_custom_threshold() {
        let (_, json) = get_json(app_with(sample()), "/machines/MCH-001/alerts").await;
        assert_eq!(json["alert"], true);
        assert_eq!(json["triggered_points"].as_array().unwrap().len(), 2);

        let (_, json) =
            get_json(app_with(sample()), "/machines/MCH-001/alerts?threshold=5").await;
        assert_eq!(json["alert"], false);
        assert_eq!(json["message"], "Vibration normal");
    }

    #[tokio::test]
    async fn test_summary() {
        let (status, json) = get_json(app_with(sample()), "/machines/MCH-001/summary").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 5);
        assert_eq!(json["latest"]["rpm"], 1504);
    }

    #[tokio::test]
    async fn test_export_csv_with_filename() {
        let response = app_with(sample())
            .oneshot(
                Request::builder()
                    .uri("/export?machine=MCH-002")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.contains("MCH-002_data.csv"));
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_export_arrow_and_bad_format() {
        let (status, body) = get(app_with(sample()), "/export?format=arrow").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with(b"ARROW1"));

        let (status, json) = get_json(app_with(sample()), "/export?format=xlsx").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("xlsx"));
    }

    #[tokio::test]
    async fn test_export_encoding_failure_is_500() {
        let ts = Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap();
        let app = app_with(vec![TelemetryRecord::new("M1", ts).with_vibration(f64::INFINITY)]);
        let (status, _) = get(app, "/export").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_health_waiting_then_ok() {
        let (_, json) = get_json(app_with(vec![]), "/health").await;
        assert_eq!(json["status"], "waiting");

        let (_, json) = get_json(app_with(sample()), "/health").await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["buffer"]["len"], 6);
    }

    #[tokio::test]
    async fn test_index_lists_endpoints() {
        let (status, json) = get_json(app_with(sample()), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["endpoints"]["/export"].is_object());
    }
}
