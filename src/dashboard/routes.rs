//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::analysis::SignalSnapshot;
use crate::engine::{AlertHandle, DigestReport, ScanOrchestrator, TopDigest};
use crate::ranking::{RefreshReport, ScanProgress, TechnicalEvaluator};
use crate::types::{
    Alert, Direction, Instrument, Market, RankingEntry, RankingKey, ScoreRecord, ScoutError,
};

/// Scan log entries kept for `/api/scans`.
const SCAN_LOG_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub orchestrator: ScanOrchestrator,
    pub signals: Arc<TechnicalEvaluator>,
    pub alerts: AlertHandle,
    pub digest: Arc<TopDigest>,
    pub global_top: usize,
    pub started_at: DateTime<Utc>,
    pub scan_log: RwLock<Vec<ScanLogEntry>>,
    /// Latest backfill progress of each scan still running.
    pub progress: RwLock<HashMap<RankingKey, ScanProgress>>,
}

impl DashboardState {
    pub fn new(
        orchestrator: ScanOrchestrator,
        signals: Arc<TechnicalEvaluator>,
        alerts: AlertHandle,
        digest: Arc<TopDigest>,
        global_top: usize,
    ) -> Self {
        Self {
            orchestrator,
            signals,
            alerts,
            digest,
            global_top,
            started_at: Utc::now(),
            scan_log: RwLock::new(Vec::new()),
            progress: RwLock::new(HashMap::new()),
        }
    }

    /// Refresh one key, publishing its progress until the refresh ends.
    pub async fn run_tracked_scan(&self, key: RankingKey) -> Result<RefreshReport, ScoutError> {
        let mut handle = self.orchestrator.start_scan(key.market, key.direction);
        while let Some(update) = handle.progress.recv().await {
            self.progress.write().await.insert(key, update);
        }
        let result = handle.wait().await;
        self.progress.write().await.remove(&key);
        self.record_scan(key, &result).await;
        result
    }

    /// Append a finished refresh to the scan log.
    pub async fn record_scan(&self, key: RankingKey, result: &Result<RefreshReport, ScoutError>) {
        let entry = ScanLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            key: key.to_string(),
            held: result.as_ref().map(|r| r.entry.records.len()).unwrap_or(0),
            evaluated: result.as_ref().map(|r| r.evaluated + r.revalidated).unwrap_or(0),
            failures: result.as_ref().map(|r| r.failures).unwrap_or(0),
            error: result.as_ref().err().map(|e| e.to_string()),
        };
        let mut log = self.scan_log.write().await;
        log.push(entry);
        let excess = log.len().saturating_sub(SCAN_LOG_LIMIT);
        log.drain(..excess);
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub uptime_secs: i64,
    pub entries_refreshed: usize,
    pub records_held: usize,
    pub last_scan: Option<String>,
    pub alerts_active: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanLogEntry {
    pub timestamp: String,
    pub key: String,
    pub held: usize,
    pub evaluated: usize,
    pub failures: usize,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    pub owner: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionResponse {
    pub chat: i64,
    pub subscribed: bool,
}

#[derive(Debug, Deserialize)]
pub struct NewAlertRequest {
    pub owner: i64,
    pub symbol: String,
    pub venue: String,
    pub direction: String,
    pub threshold: Decimal,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// `ScoutError` rendered as a JSON error body with a matching status.
#[derive(Debug)]
pub struct ApiError(pub ScoutError);

impl From<ScoutError> for ApiError {
    fn from(e: ScoutError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ScoutError::Validation(_) => StatusCode::BAD_REQUEST,
            ScoutError::InsufficientData { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ScoutError::TransientFetch { .. } => StatusCode::BAD_GATEWAY,
            ScoutError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ScoutError::Persistence(_) | ScoutError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            warn!(error = %self.0, "API request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

fn parse_key(market: &str, direction: &str) -> Result<RankingKey, ApiError> {
    Ok(RankingKey::new(market.parse::<Market>()?, direction.parse::<Direction>()?))
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snapshot = state.orchestrator.cache().snapshot();
    let last_scan = snapshot
        .iter()
        .filter_map(|e| e.refreshed_at)
        .max()
        .map(|t| t.to_rfc3339());
    // a stopped watcher reports no count rather than failing the status call
    let alerts_active = state.alerts.list(None).await.ok().map(|a| a.len());

    Json(StatusResponse {
        status: "RUNNING".into(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        entries_refreshed: snapshot.len(),
        records_held: snapshot.iter().map(|e| e.records.len()).sum(),
        last_scan,
        alerts_active,
    })
}

/// GET /api/rankings
pub async fn get_rankings(State(state): State<AppState>) -> Json<Vec<RankingEntry>> {
    Json(state.orchestrator.cache().snapshot())
}

/// GET /api/rankings/:market/:direction
pub async fn get_ranking(
    State(state): State<AppState>,
    Path((market, direction)): Path<(String, String)>,
) -> Result<Json<RankingEntry>, ApiError> {
    let key = parse_key(&market, &direction)?;
    Ok(Json((*state.orchestrator.cache().entry(key)).clone()))
}

/// GET /api/global/:direction
pub async fn get_global_top(
    State(state): State<AppState>,
    Path(direction): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<ScoreRecord>>, ApiError> {
    let direction: Direction = direction.parse()?;
    let limit = query.limit.unwrap_or(state.global_top);
    Ok(Json(state.orchestrator.cache().global_top(direction, limit)))
}

/// POST /api/scan/:market/:direction
pub async fn post_scan(
    State(state): State<AppState>,
    Path((market, direction)): Path<(String, String)>,
) -> Result<Json<RefreshReport>, ApiError> {
    let key = parse_key(&market, &direction)?;
    // detached so a dropped request still clears its progress entry
    let scan = tokio::spawn({
        let state = state.clone();
        async move { state.run_tracked_scan(key).await }
    });
    let result = scan
        .await
        .map_err(|e| ScoutError::Unavailable(format!("scan task for {key} failed: {e}")))?;
    Ok(Json(result?))
}

/// GET /api/scans/progress
pub async fn get_scan_progress(State(state): State<AppState>) -> Json<Vec<ScanProgress>> {
    let mut running: Vec<ScanProgress> = state.progress.read().await.values().copied().collect();
    running.sort_by_key(|p| p.key);
    Json(running)
}

/// GET /api/scans
pub async fn get_scans(State(state): State<AppState>) -> Json<Vec<ScanLogEntry>> {
    Json(state.scan_log.read().await.clone())
}

/// GET /api/signal/:venue/:symbol
pub async fn get_signal(
    State(state): State<AppState>,
    Path((venue, symbol)): Path<(String, String)>,
) -> Result<Json<SignalSnapshot>, ApiError> {
    let instrument = Instrument::new(symbol, venue);
    Ok(Json(state.signals.snapshot(&instrument).await?))
}

/// GET /api/alerts
pub async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<Vec<Alert>>, ApiError> {
    Ok(Json(state.alerts.list(query.owner).await?))
}

/// POST /api/alerts
pub async fn create_alert(
    State(state): State<AppState>,
    Json(req): Json<NewAlertRequest>,
) -> Result<(StatusCode, Json<Alert>), ApiError> {
    let alert = state
        .alerts
        .add(req.owner, &req.symbol, &req.venue, &req.direction, req.threshold)
        .await?;
    Ok((StatusCode::CREATED, Json(alert)))
}

/// DELETE /api/alerts/:id?owner=
pub async fn delete_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> Result<StatusCode, ApiError> {
    let owner = query
        .owner
        .ok_or_else(|| ScoutError::Validation("owner query parameter is required".into()))?;
    if state.alerts.remove(owner, &id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

/// GET /api/digest/subscribers
pub async fn list_subscribers(State(state): State<AppState>) -> Result<Json<Vec<i64>>, ApiError> {
    Ok(Json(state.digest.subscribers().await?))
}

/// POST /api/digest/subscribers/:chat
pub async fn subscribe(
    State(state): State<AppState>,
    Path(chat): Path<i64>,
) -> Result<(StatusCode, Json<SubscriptionResponse>), ApiError> {
    let status = if state.digest.subscribe(chat).await? {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(SubscriptionResponse {
            chat,
            subscribed: true,
        }),
    ))
}

/// DELETE /api/digest/subscribers/:chat
pub async fn unsubscribe(
    State(state): State<AppState>,
    Path(chat): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.digest.unsubscribe(chat).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

/// POST /api/digest/send
pub async fn send_digest(State(state): State<AppState>) -> Result<Json<DigestReport>, ApiError> {
    Ok(Json(state.digest.broadcast().await?))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
