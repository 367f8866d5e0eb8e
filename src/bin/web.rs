//! Hive Web 网关
//!
//! 启动: cargo run --bin hive-web --features web
//! 接口：
//! - POST /apps/:session_id/agent/generate        发起运行，返回 SSE 流
//! - GET  /apps/:session_id/agent/stream-continue 断线续传（?since_timestamp=）
//! - POST /apps/:session_id/agent/stop            请求停止并等待运行退出
//! - GET  /apps/:session_id/agent/history         历史消息

#![cfg(feature = "web")]

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;

use hive::config::load_config;
use hive::core::{HiveError, InMemorySignalStore, ShutdownManager};
use hive::gateway::{DeliveryStream, SseFrame, TeamService};
use hive::llm::MockLlmClient;
use hive::model::Timestamp;
use hive::store::{retention_cutoff, EventStore, MessagePage, SqliteStore};
use hive::team::{LlmClassifier, MockAgentExecutor};

/// 过期事件清理间隔
const PURGE_INTERVAL: Duration = Duration::from_secs(3600);
const MAX_HISTORY_LIMIT: usize = 1000;

struct AppState {
    service: TeamService,
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    prompt: String,
    #[serde(default)]
    framework: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContinueQuery {
    since_timestamp: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: usize,
    /// 分页锚点消息 ID
    last_message_id: Option<String>,
    /// "before"（默认，锚点之前）或 "from"（从锚点起）
    direction: Option<String>,
}

fn default_history_limit() -> usize {
    100
}

fn to_sse(stream: DeliveryStream) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = stream.map(|frame: SseFrame| {
        Ok(Event::default()
            .event(frame.category.as_str())
            .id(frame.id)
            .data(frame.data.to_string()))
    });
    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

fn error_response(e: HiveError) -> Response {
    let status = match &e {
        HiveError::AlreadyRunning(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": e.to_string(), "error_type": e.error_type() }))).into_response()
}

/// POST /apps/:session_id/agent/generate
async fn generate(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(req): Json<GenerateRequest>,
) -> Response {
    if req.prompt.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "prompt is required").into_response();
    }
    match state
        .service
        .generate(&session_id, &req.prompt, req.framework.as_deref())
        .await
    {
        Ok(run) => to_sse(run.stream).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /apps/:session_id/agent/stream-continue
async fn stream_continue(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(q): Query<ContinueQuery>,
) -> Response {
    let since = q.since_timestamp.map(Timestamp::from_secs_f64);
    to_sse(state.service.resume(&session_id, since)).into_response()
}

/// POST /apps/:session_id/agent/stop
async fn stop(State(state): State<Arc<AppState>>, Path(session_id): Path<String>) -> Response {
    match state.service.stop(&session_id).await {
        Ok(exited) => Json(serde_json::json!({ "success": true, "exited": exited })).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /apps/:session_id/agent/history
async fn history(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> Response {
    if q.limit == 0 || q.limit > MAX_HISTORY_LIMIT {
        return (StatusCode::BAD_REQUEST, "limit must be between 1 and 1000").into_response();
    }
    let page = match (q.last_message_id, q.direction.as_deref()) {
        (None, _) => MessagePage::Recent,
        (Some(id), Some("from")) => MessagePage::From(id),
        (Some(id), _) => MessagePage::Before(id),
    };
    match state.service.history(&session_id, &page, q.limit).await {
        Ok(messages) => Json(serde_json::json!({ "messages": messages })).into_response(),
        Err(e) => error_response(e),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    let db_path = cfg.app.db_path();
    if let Some(dir) = db_path.parent() {
        std::fs::create_dir_all(dir).ok();
    }
    let store = Arc::new(SqliteStore::new(&db_path).await.context("Failed to open store")?);
    tracing::info!(db = %db_path.display(), "store opened");

    // 真实部署中执行器与意图模型由外部接入；此处以 Mock 跑通完整链路
    let service = TeamService::new(
        store.clone(),
        Arc::new(MockAgentExecutor::new()),
        Arc::new(InMemorySignalStore::new()),
        cfg.clone(),
    )
    .with_classifier(Arc::new(LlmClassifier::new(Arc::new(MockLlmClient::default()))));
    let state = Arc::new(AppState { service });

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let purge_token = shutdown.token();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(PURGE_INTERVAL);
        loop {
            tokio::select! {
                _ = purge_token.cancelled() => break,
                _ = tick.tick() => match store.purge_events_before(retention_cutoff()).await {
                    Ok(n) if n > 0 => tracing::info!(purged = n, "expired events purged"),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "event purge failed"),
                },
            }
        }
    });

    let app = Router::new()
        .route("/apps/:session_id/agent/generate", post(generate))
        .route("/apps/:session_id/agent/stream-continue", get(stream_continue))
        .route("/apps/:session_id/agent/stop", post(stop))
        .route("/apps/:session_id/agent/history", get(history))
        .with_state(state);

    let addr = format!("0.0.0.0:{}", cfg.web.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(addr = %addr, "hive web gateway listening");

    let token = shutdown.token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .context("Server error")?;
    Ok(())
}
