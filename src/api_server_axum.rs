use crate::broadcast::MonitorEvent;
use crate::config::{DEFAULT_ALERTS_LIMIT, DEFAULT_HISTORY_LIMIT};
use crate::models::{
    AlertRecord, ChartPoint, ExportRow, HistoryByLevel, MarketSnapshot, MoneynessLevel, Settings,
    SettingsUpdate,
};
use crate::monitor::{MonitorStatus, SettingsUpdateOutcome, SharedMonitor, StartOutcome};
use anyhow::Result;
use axum::{
    Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{
        IntoResponse, Json, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::future::Future;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

// -----------------------------------------------
// API REQUEST/RESPONSE MODELS
// -----------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub processing_time_ms: Option<u64>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T, start_time: Instant) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            processing_time_ms: Some(start_time.elapsed().as_millis() as u64),
        })
    }

    fn err(error: impl ToString, start_time: Instant) -> Json<Self> {
        Json(Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            processing_time_ms: Some(start_time.elapsed().as_millis() as u64),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct MonitoringResponse {
    pub monitoring_active: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<StartOutcome>,
}

// -----------------------------------------------
// APPLICATION STATE
// -----------------------------------------------

#[derive(Clone)]
pub struct AppState {
    monitor: SharedMonitor,
}

impl AppState {
    pub fn new(monitor: SharedMonitor) -> Self {
        Self { monitor }
    }
}

// -----------------------------------------------
// API HANDLERS
// -----------------------------------------------

/// GET /health
async fn health() -> &'static str {
    "OK"
}

/// GET /api/current-data - latest snapshot
async fn get_current_data(State(state): State<AppState>) -> Json<ApiResponse<MarketSnapshot>> {
    let start_time = Instant::now();
    ApiResponse::ok(state.monitor.snapshot(), start_time)
}

/// GET /api/historical-data?limit=1000 - persisted series grouped by level
async fn get_historical_data(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Json<ApiResponse<HistoryByLevel>> {
    let start_time = Instant::now();
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    ApiResponse::ok(state.monitor.history(limit).await, start_time)
}

/// GET /api/chart-data - in-memory series since startup
async fn get_chart_data(State(state): State<AppState>) -> Json<ApiResponse<Vec<ChartPoint>>> {
    let start_time = Instant::now();
    ApiResponse::ok(state.monitor.chart_history().await, start_time)
}

/// GET /api/alerts?limit=50
async fn get_alerts(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Json<ApiResponse<Vec<AlertRecord>>> {
    let start_time = Instant::now();
    let limit = query.limit.unwrap_or(DEFAULT_ALERTS_LIMIT);
    ApiResponse::ok(state.monitor.alerts(limit).await, start_time)
}

/// GET /api/settings
async fn get_settings(State(state): State<AppState>) -> Json<ApiResponse<Settings>> {
    let start_time = Instant::now();
    ApiResponse::ok(state.monitor.settings().await, start_time)
}

/// POST /api/settings - partial update, absent fields keep their value
async fn update_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> (StatusCode, Json<ApiResponse<SettingsUpdateOutcome>>) {
    let start_time = Instant::now();
    match state.monitor.update_settings(update).await {
        Ok(outcome) => (StatusCode::OK, ApiResponse::ok(outcome, start_time)),
        Err(e) => (StatusCode::BAD_REQUEST, ApiResponse::err(e, start_time)),
    }
}

/// POST /api/start-monitoring
async fn start_monitoring(State(state): State<AppState>) -> Json<ApiResponse<MonitoringResponse>> {
    let start_time = Instant::now();
    let outcome = state.monitor.start_monitoring().await;
    let message = outcome.message();

    if outcome.is_active() {
        ApiResponse::ok(
            MonitoringResponse {
                monitoring_active: true,
                message,
                outcome: Some(outcome),
            },
            start_time,
        )
    } else {
        Json(ApiResponse {
            success: false,
            data: Some(MonitoringResponse {
                monitoring_active: false,
                message: message.clone(),
                outcome: Some(outcome),
            }),
            error: Some(message),
            processing_time_ms: Some(start_time.elapsed().as_millis() as u64),
        })
    }
}

/// POST /api/stop-monitoring
async fn stop_monitoring(State(state): State<AppState>) -> Json<ApiResponse<MonitoringResponse>> {
    let start_time = Instant::now();
    let was_active = state.monitor.stop_monitoring().await;
    let message = if was_active {
        "Monitoring stopped"
    } else {
        "Monitoring was not active"
    };
    ApiResponse::ok(
        MonitoringResponse {
            monitoring_active: false,
            message: message.to_string(),
            outcome: None,
        },
        start_time,
    )
}

/// GET /api/status
async fn get_status(State(state): State<AppState>) -> Json<ApiResponse<MonitorStatus>> {
    let start_time = Instant::now();
    ApiResponse::ok(state.monitor.status().await, start_time)
}

/// GET /api/export/{level} - CSV download of one level's series
async fn export_level(State(state): State<AppState>, Path(level): Path<String>) -> Response {
    let start_time = Instant::now();
    let level = match level.parse::<MoneynessLevel>() {
        Ok(level) => level,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, ApiResponse::<()>::err(e, start_time)).into_response();
        }
    };

    let rows = state.monitor.export_level(level).await;
    let filename = format!(
        "dispersion_{}_{}.csv",
        level,
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );

    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        to_csv(&rows),
    )
        .into_response()
}

pub fn to_csv(rows: &[ExportRow]) -> String {
    let mut out = String::from("timestamp,banknifty_spot,net_premium,banknifty_straddle_premium\n");
    for r in rows {
        out.push_str(&format!(
            "{},{:.2},{:.2},{:.2}\n",
            r.timestamp.to_rfc3339(),
            r.index_spot,
            r.net_premium,
            r.index_straddle_premium
        ));
    }
    out
}

/// GET /api/events - live stream; the latest snapshot is sent first when available
async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (latest, mut rx) = state.monitor.subscribe();

    let stream = async_stream::stream! {
        if let Some(snapshot) = latest {
            let json = serde_json::to_string(&snapshot).unwrap_or_default();
            yield Ok(Event::default().event("data_update").data(json));
        }

        loop {
            match rx.recv().await {
                Ok(event) => {
                    let json = match &event {
                        MonitorEvent::DataUpdate(s) => serde_json::to_string(s),
                        MonitorEvent::Alert(a) => serde_json::to_string(a),
                        MonitorEvent::ConnectionStatus(c) => serde_json::to_string(c),
                    }
                    .unwrap_or_default();
                    yield Ok(Event::default().event(event.name()).data(json));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "event subscriber lagged");
                    yield Ok(Event::default().event("lagged").data(format!("{{\"missed\":{n}}}")));
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// -----------------------------------------------
// ROUTER
// -----------------------------------------------

pub fn build_router(monitor: SharedMonitor) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/current-data", get(get_current_data))
        .route("/api/historical-data", get(get_historical_data))
        .route("/api/chart-data", get(get_chart_data))
        .route("/api/alerts", get(get_alerts))
        .route("/api/settings", get(get_settings).post(update_settings))
        .route("/api/start-monitoring", post(start_monitoring))
        .route("/api/stop-monitoring", post(stop_monitoring))
        .route("/api/status", get(get_status))
        .route("/api/export/{level}", get(export_level))
        .route("/api/events", get(event_stream))
        .layer(CorsLayer::permissive())
        .with_state(AppState::new(monitor))
}

pub async fn start_server(
    monitor: SharedMonitor,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = build_router(monitor);

    let addr = format!("127.0.0.1:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "dispersion API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    #[test]
    fn csv_has_header_and_rows() {
        let rows = vec![ExportRow {
            timestamp: Local::now(),
            index_spot: 45012.5,
            net_premium: -1234.567,
            index_straddle_premium: 450.0,
        }];
        let csv = to_csv(&rows);
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "timestamp,banknifty_spot,net_premium,banknifty_straddle_premium");
        assert!(lines[1].ends_with(",45012.50,-1234.57,450.00"));
    }
}
