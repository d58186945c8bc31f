use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        extract::{Path, Query, State, WebSocketUpgrade},
        http::StatusCode,
        response::{IntoResponse, Json},
        routing::{delete, get, post},
    },
    serde::Deserialize,
    tower_http::cors::{Any, CorsLayer},
    tracing::info,
};

use manifold_protocol::ChannelKind;

use crate::{mux::Multiplexer, pairing::PairingError, registry::SessionContext, ws};

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
struct AppState {
    mux: Arc<Multiplexer>,
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the front-end router (shared between production startup and tests).
pub fn build_app(mux: Arc<Multiplexer>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_upgrade_handler))
        .route(
            "/sessions",
            post(create_session_handler).get(list_sessions_handler),
        )
        .route("/sessions/{id}", delete(terminate_session_handler))
        .route("/sessions/{id}/messages", get(history_handler))
        .route("/pairing", post(pairing_handler))
        .layer(cors)
        .with_state(AppState { mux })
}

/// Start the front-end HTTP + WebSocket server.
pub async fn start_server(bind: &str, port: u16, mux: Arc<Multiplexer>) -> anyhow::Result<()> {
    let app = build_app(Arc::clone(&mux));

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Startup banner.
    let lines = [
        format!("manifold mux v{}", env!("CARGO_PKG_VERSION")),
        format!("listening on {addr}"),
        format!(
            "upstream: {}",
            if mux.link_open().await { "connected" } else { "down" }
        ),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    axum::serve(listener, app).await?;
    Ok(())
}

// ── Payloads ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionBody {
    user_id: i64,
    channel_type: ChannelKind,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairingBody {
    user_id: i64,
    channel_type: ChannelKind,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserQuery {
    user_id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryQuery {
    user_id: i64,
    #[serde(default = "default_history_limit")]
    limit: u32,
}

fn default_history_limit() -> u32 {
    100
}

fn session_json(ctx: &SessionContext) -> serde_json::Value {
    serde_json::json!({
        "sessionId": ctx.session_id,
        "userId": ctx.user_id,
        "channelType": ctx.channel,
        "isActive": ctx.active,
    })
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".into());
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "hostname": hostname,
        "sessions": state.mux.session_count().await,
        "connections": state.mux.client_count().await,
        "gatewayConnected": state.mux.link_open().await,
    }))
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<UserQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws::handle_connection(socket, query.user_id, state.mux))
}

async fn create_session_handler(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionBody>,
) -> impl IntoResponse {
    match state
        .mux
        .create_session(body.user_id, body.channel_type)
        .await
    {
        Ok(ctx) => (StatusCode::CREATED, Json(session_json(&ctx))).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "session create failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "session create failed" })),
            )
                .into_response()
        },
    }
}

async fn list_sessions_handler(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> impl IntoResponse {
    let sessions: Vec<_> = state
        .mux
        .sessions_for_user(query.user_id)
        .await
        .iter()
        .map(session_json)
        .collect();
    Json(serde_json::json!(sessions))
}

/// Terminating an unknown session is a no-op, so this always answers 204.
async fn terminate_session_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<UserQuery>,
) -> impl IntoResponse {
    if state
        .mux
        .get_session(&session_id)
        .await
        .is_some_and(|ctx| ctx.user_id == query.user_id)
        && let Err(e) = state.mux.terminate_session(&session_id).await
    {
        tracing::error!(session_id, error = %e, "terminate failed");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::NO_CONTENT
}

/// Unknown and foreign sessions both 404 — no session leakage.
async fn history_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    match state
        .mux
        .session_history(query.user_id, &session_id, query.limit)
        .await
    {
        Ok(Some(messages)) => Json(serde_json::json!(messages)).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!(session_id, error = %e, "history fetch failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        },
    }
}

/// Blocks until the pairing exchange resolves: a code, a timeout, a
/// supersession, or shutdown — whichever happens first.
async fn pairing_handler(
    State(state): State<AppState>,
    Json(body): Json<PairingBody>,
) -> impl IntoResponse {
    let ticket = state
        .mux
        .request_pairing(body.user_id, body.channel_type)
        .await;

    match ticket.await {
        Ok(Ok(code)) => Json(serde_json::json!({
            "code": code.code,
            "expiresAt": code.expires_at,
        }))
        .into_response(),
        Ok(Err(err)) => {
            let status = match err {
                PairingError::Superseded => StatusCode::CONFLICT,
                PairingError::TimedOut => StatusCode::GATEWAY_TIMEOUT,
                PairingError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
                PairingError::Gateway(_) => StatusCode::BAD_GATEWAY,
            };
            (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
        },
        // The table was torn down without resolving us; treat as shutdown.
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
