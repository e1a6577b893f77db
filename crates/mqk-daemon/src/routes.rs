//! Axum router and all HTTP handlers for mqk-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers.  All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    api_types::{HealthResponse, StatusResponse},
    state::{uptime_secs, AppState, BusMsg, StatusSnapshot},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> Response {
    let db_ok = mqk_db::status(&st.pool).await.map(|s| s.ok).unwrap_or(false);
    Json(HealthResponse::new(db_ok, &st.build)).into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> Response {
    let now = chrono::Utc::now();
    let db_ok = mqk_db::status(&st.pool).await.map(|s| s.ok).unwrap_or(false);
    let policy = mqk_db::load_policy_state(&st.pool).await.ok().flatten();

    let full_auto = policy
        .as_ref()
        .and_then(|p| p.full_auto_override)
        .unwrap_or(st.config.autonomy.full_auto);
    let observation_only = policy
        .as_ref()
        .and_then(|p| p.observation_only_until)
        .map(|until| until > now)
        .unwrap_or(false);

    let snapshot = StatusSnapshot {
        daemon_uptime_secs: uptime_secs(),
        db_ok,
        autonomy_enabled: st.config.autonomy.enabled,
        full_auto,
        observation_only,
        heartbeat_enabled: st.config.heartbeat.enabled,
    };

    Json(StatusResponse {
        snapshot,
        service: st.build.service,
        version: st.build.version,
    })
    .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (Server-Sent Events)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(rx: broadcast::Receiver<BusMsg>) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Status(_) => "status",
                    BusMsg::LogLine { .. } => "log",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
