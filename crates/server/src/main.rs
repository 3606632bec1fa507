use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use server_api::{audit_org, eligible_employees, statuses, toggle, ApiContext};
use shared::{
    domain::OrgId,
    error::{ApiError, ErrorCode},
    protocol::{
        AuditFinding, EmployeeStatus, EmployeeSummary, ServerEvent, ToggleReceipt, ToggleRequest,
    },
};
use storage::Storage;
use tokio::sync::broadcast;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};

mod config;

use config::{load_settings, prepare_database_url};

#[derive(Clone)]
struct AppState {
    api: ApiContext,
    events: broadcast::Sender<ServerEvent>,
}

#[derive(Debug, Deserialize)]
struct OrgQuery {
    org: i64,
}

const MAX_BODY_BYTES: usize = 16 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let api = ApiContext::new(storage);
    let (events, _) = broadcast::channel(256);

    let state = AppState { api, events };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "attendance kiosk server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/employees", get(http_list_employees))
        .route("/status", get(http_statuses))
        .route("/toggle", post(http_toggle))
        .route("/audit", get(http_audit))
        .route("/ws", get(ws_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn http_list_employees(
    State(state): State<Arc<AppState>>,
    Query(q): Query<OrgQuery>,
) -> Result<Json<Vec<EmployeeSummary>>, (StatusCode, Json<ApiError>)> {
    let employees = eligible_employees(&state.api, OrgId(q.org))
        .await
        .map_err(reject)?;
    Ok(Json(employees))
}

async fn http_statuses(
    State(state): State<Arc<AppState>>,
    Query(q): Query<OrgQuery>,
) -> Result<Json<Vec<EmployeeStatus>>, (StatusCode, Json<ApiError>)> {
    let projected = statuses(&state.api, OrgId(q.org)).await.map_err(reject)?;
    Ok(Json(projected))
}

async fn http_toggle(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ToggleRequest>,
) -> Result<Json<ToggleReceipt>, (StatusCode, Json<ApiError>)> {
    let receipt = toggle(&state.api, req.employee_id, req.org_id)
        .await
        .map_err(reject)?;
    let _ = state.events.send(ServerEvent::StatusChanged {
        org_id: req.org_id,
        status: EmployeeStatus {
            employee_id: receipt.employee_id,
            direction: receipt.direction,
        },
    });
    Ok(Json(receipt))
}

async fn http_audit(
    State(state): State<Arc<AppState>>,
    Query(q): Query<OrgQuery>,
) -> Result<Json<Vec<AuditFinding>>, (StatusCode, Json<ApiError>)> {
    let findings = audit_org(&state.api, OrgId(q.org)).await.map_err(reject)?;
    Ok(Json(findings))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

/// Forwards status-change broadcasts to an attached kiosk terminal so idle
/// screens refresh without polling. Inbound frames are ignored.
async fn ws_connection(state: Arc<AppState>, socket: axum::extract::ws::WebSocket) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = state.events.subscribe();

    let send_task = tokio::spawn(async move {
        while let Ok(event) = events_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
}

fn reject(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::NotEligible => StatusCode::FORBIDDEN,
        ErrorCode::ConflictRetryExhausted => StatusCode::CONFLICT,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}
