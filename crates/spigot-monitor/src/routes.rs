use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use spigot_core::{CommandError, CommandKind, Monitor, ScrollbackError};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    #[serde(default)]
    pub command: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuery {
    pub msg: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ScrollbackUpdate {
    pub last_id: u64,
    pub lines: Vec<String>,
}

pub fn router(monitor: Arc<Monitor>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/command", post(submit_command))
        .route("/update-sb", get(update_scrollback))
        .route("/roster", get(roster))
        .route("/status", get(status))
        .route("/diagnostics", get(diagnostics))
        .route("/player/:name", get(player))
        .with_state(monitor)
}

fn kind_name(kind: CommandKind) -> &'static str {
    match kind {
        CommandKind::Clear => "clear",
        CommandKind::QuitAll => "quit-all",
        CommandKind::List => "list",
        CommandKind::Forward => "forward",
    }
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

pub async fn submit_command(
    State(monitor): State<Arc<Monitor>>,
    Json(request): Json<CommandRequest>,
) -> Response {
    match monitor.submit_command(&request.command).await {
        Ok(kind) => {
            debug!(event = "http_command", kind = kind_name(kind));
            (StatusCode::ACCEPTED, Json(json!({ "accepted": kind_name(kind) }))).into_response()
        }
        Err(err @ CommandError::Empty) => bad_request(err.to_string()),
    }
}

pub async fn update_scrollback(
    State(monitor): State<Arc<Monitor>>,
    Query(query): Query<UpdateQuery>,
) -> Response {
    let raw = query.msg.unwrap_or_default();
    let last_seen = match raw.trim().parse::<u64>() {
        Ok(value) => value,
        Err(_) => return bad_request(format!("msg must be a message id, got {raw:?}")),
    };
    match monitor.scrollback().delta(last_seen) {
        Ok(Some((last_id, lines))) => Json(ScrollbackUpdate { last_id, lines }).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(err @ ScrollbackError::AheadOfHistory { .. }) => {
            warn!(event = "scrollback_ahead", error = %err);
            bad_request(err.to_string())
        }
    }
}

pub async fn roster(State(monitor): State<Arc<Monitor>>) -> Json<Vec<String>> {
    Json(monitor.roster())
}

pub async fn status(State(monitor): State<Arc<Monitor>>) -> Response {
    let snapshot = monitor.snapshot();
    Json(json!({
        "status": snapshot.status,
        "pid": snapshot.pid,
        "sessions_started": snapshot.sessions_started,
        "players_online": snapshot.roster.len(),
    }))
    .into_response()
}

pub async fn diagnostics(State(monitor): State<Arc<Monitor>>) -> Response {
    Json(monitor.diagnostics()).into_response()
}

pub async fn player(State(monitor): State<Arc<Monitor>>, Path(name): Path<String>) -> Response {
    if monitor.snapshot().roster.contains(&name) {
        Json(json!({ "name": name, "online": true })).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("{name} is not online") })),
        )
            .into_response()
    }
}
