use anyhow::Context;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::db::Db;
use crate::engine::{DecisionEngine, Estimate};
use crate::state::SharedState;

const DEFAULT_HISTORY: i64 = 50;
const MAX_HISTORY: i64 = 500;

/// Everything the handlers need, passed explicitly.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DecisionEngine>,
    pub shared: SharedState,
    pub db: Db,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/sensor-data", get(api_sensor_data))
        .route("/api/predict", post(api_predict))
        .route("/api/history", get(api_history))
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorBody { error })).into_response()
}

async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    let st = state.shared.read().await;
    Json(st.to_status())
}

async fn api_sensor_data(State(state): State<AppState>) -> Response {
    match state.engine.latest_sensor_snapshot().await {
        Ok(reading) => Json(reading).into_response(),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

#[derive(Debug, Default, Deserialize)]
struct PredictRequest {
    soil_moisture: Option<f64>,
    temperature: Option<f64>,
    humidity: Option<f64>,
    rain_sensor: Option<f64>,
}

#[derive(Serialize)]
struct PredictResponse {
    crop_id: String,
    #[serde(flatten)]
    estimate: Estimate,
}

async fn api_predict(
    State(state): State<AppState>,
    Json(req): Json<PredictRequest>,
) -> impl IntoResponse {
    let estimate = state
        .engine
        .predict_for_request(
            req.soil_moisture.unwrap_or(50.0),
            req.temperature.unwrap_or(25.0),
            req.humidity.unwrap_or(60.0),
            req.rain_sensor.unwrap_or(0.0),
        )
        .await;
    Json(PredictResponse {
        crop_id: state.engine.crop_id().to_string(),
        estimate,
    })
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
}

async fn api_history(State(state): State<AppState>, Query(q): Query<HistoryQuery>) -> Response {
    let limit = q.limit.unwrap_or(DEFAULT_HISTORY).clamp(1, MAX_HISTORY);
    match state.db.recent_decisions(limit).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => {
            error!("history query failed: {e:#}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "history unavailable".into())
        }
    }
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

/// Serve until `stop` turns true.
pub async fn serve(state: AppState, port: u16, mut stop: watch::Receiver<bool>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!("api listening on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !*stop.borrow() {
                if stop.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .context("web server error")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::decision::{CommandStatus, DecisionRecord, PredictionMode};
    use crate::forecast::ForecastResult;
    use crate::ports::CycleLog;
    use crate::testing::{Harness, WHEAT_READING};

    async fn app(h: &Harness) -> (Router, Db) {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let state = AppState {
            engine: Arc::new(h.engine()),
            shared: h.shared.clone(),
            db: db.clone(),
        };
        (router(state), db)
    }

    async fn call(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn status_reports_crop_and_events() {
        let h = Harness::new();
        h.shared.write().await.record_system("hub started".into());
        let (app, _db) = app(&h).await;

        let (status, json) = call(app, get("/api/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["crop_id"], "wheat");
        assert_eq!(json["mqtt_connected"], false);
        assert_eq!(json["events"][0]["detail"], "hub started");
    }

    #[tokio::test]
    async fn sensor_data_passes_through() {
        let h = Harness::new();
        let (app, _db) = app(&h).await;

        let (status, json) = call(app, get("/api/sensor-data")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["soil_moisture"], WHEAT_READING.soil_moisture);
    }

    #[tokio::test]
    async fn sensor_data_unavailable_is_503() {
        let h = Harness::new();
        h.gateway.make_unavailable();
        let (app, _db) = app(&h).await;

        let (status, json) = call(app, get("/api/sensor-data")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(json["error"].as_str().unwrap().contains("no reading"));
    }

    #[tokio::test]
    async fn predict_uses_supplied_values() {
        let h = Harness::new();
        let (app, _db) = app(&h).await;

        let body = r#"{"soil_moisture":50,"temperature":30,"humidity":50,"rain_sensor":0}"#;
        let (status, json) = call(app, post_json("/api/predict", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["volume"], 11.0);
        assert_eq!(json["mode"], "fallback");
        assert_eq!(json["forecast"]["success"], false);
        assert_eq!(json["crop_id"], "wheat");
    }

    #[tokio::test]
    async fn predict_defaults_missing_fields() {
        let h = Harness::new();
        let (app, _db) = app(&h).await;

        // 50/25/60/0: (60-50)*0.6 - (60-50)*0.1 + 5 = 10
        let (status, json) = call(app, post_json("/api/predict", "{}")).await;
        assert_eq!(status, StatusCode::OK);
        assert!((json["volume"].as_f64().unwrap() - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn predict_does_not_command_or_log() {
        let h = Harness::new();
        let (app, db) = app(&h).await;
        call(app, post_json("/api/predict", "{}")).await;
        assert!(h.gateway.commands().is_empty());
        assert_eq!(db.count_decisions().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn history_newest_first_with_limit() {
        let h = Harness::new();
        let (app, db) = app(&h).await;
        for v in [1.0, 2.0, 3.0] {
            let rec = DecisionRecord::new(
                &WHEAT_READING,
                &ForecastResult::unavailable(),
                v,
                PredictionMode::Fallback,
                "wheat",
                CommandStatus::Sent,
            );
            db.append(&rec).await.unwrap();
        }

        let (status, json) = call(app, get("/api/history?limit=2")).await;
        assert_eq!(status, StatusCode::OK);
        let items = json.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["water_volume"], 3.0);
        assert_eq!(items[0]["mode"], "fallback");
        assert_eq!(items[0]["command"], "sent");
    }

    #[tokio::test]
    async fn history_without_limit_is_empty_list() {
        let h = Harness::new();
        let (app, _db) = app(&h).await;
        let (status, json) = call(app, get("/api/history")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, Value::Array(vec![]));
    }
}
