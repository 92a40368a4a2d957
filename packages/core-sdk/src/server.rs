use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, get_service, post},
    Json, Router,
};
use serde_json::json;
use tower_http::services::ServeDir;

use crate::cancel::CancelRegistry;
use crate::config::{BackendConfigPatch, ConfigStore, SettingsView};
use crate::llm::{ChatResult, Dispatcher};
use crate::models::ChatRequest;
use crate::telemetry;

/**
 * \brief 服务启动参数。
 */
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /** \brief 监听地址，如 "127.0.0.1:3000" */
    pub addr: String,
    /** \brief 前端静态资源目录 */
    pub ui_dir: PathBuf,
    /** \brief GET /settings 是否返回明文密钥 */
    pub expose_api_key: bool,
    /** \brief 上游请求超时 */
    pub upstream_timeout: Option<Duration>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:3000".to_string(),
            ui_dir: PathBuf::from("web"),
            expose_api_key: false,
            upstream_timeout: None,
        }
    }
}

impl ServerOptions {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            addr: std::env::var("SWAGGPT_ADDR").unwrap_or(defaults.addr),
            ui_dir: std::env::var("SWAGGPT_UI_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.ui_dir),
            expose_api_key: std::env::var("SWAGGPT_EXPOSE_API_KEY")
                .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
                .unwrap_or(false),
            upstream_timeout: std::env::var("UPSTREAM_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }
}

/**
 * \brief 各请求共享的状态。
 */
#[derive(Debug, Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub cancels: CancelRegistry,
    pub expose_api_key: bool,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, expose_api_key: bool) -> Self {
        Self {
            dispatcher,
            cancels: CancelRegistry::new(),
            expose_api_key,
        }
    }
}

/**
 * \brief 启动本地 HTTP 服务，提供静态前端与 API。
 */
pub async fn run(options: ServerOptions, store: ConfigStore) -> Result<()> {
    let dispatcher = Dispatcher::new(store, options.upstream_timeout)?;
    let state = AppState::new(dispatcher, options.expose_api_key);

    let static_service =
        get_service(ServeDir::new(&options.ui_dir).append_index_html_on_directories(true));
    let app = router(state).fallback_service(static_service);

    let listener = tokio::net::TcpListener::bind(&options.addr).await?;
    telemetry::log_event(
        "server",
        &format!(
            "listening on http://{} ui_dir={}",
            options.addr,
            options.ui_dir.display()
        ),
    );
    axum::serve(listener, app).await?;
    Ok(())
}

/**
 * \brief API 路由，不含静态资源。
 */
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(post_chat))
        .route("/chat/{request_id}/cancel", post(cancel_chat))
        .route("/settings", get(get_settings).post(update_settings))
        .route("/api/health", get(health_check))
        .with_state(state)
}

/**
 * \brief 转发一次对话请求。客户端断开时 axum 丢弃此 future，出站连接随之关闭。
 */
async fn post_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return rejection_response("server.chat", rejection),
    };
    let handle = match req.request_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => state.cancels.register(id),
        _ => state.cancels.detached(),
    };
    let params = req.params();
    telemetry::log_event(
        "server.chat",
        &format!("model={} messages={}", params.model, req.messages.len()),
    );

    state
        .dispatcher
        .dispatch(&req.messages, &params, handle.token())
        .await
        .into_response()
}

async fn cancel_chat(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Json<serde_json::Value> {
    let cancelled = state.cancels.cancel(request_id.trim());
    telemetry::log_event(
        "server.chat",
        &format!("cancel request_id={} found={}", request_id, cancelled),
    );
    Json(json!({ "cancelled": cancelled }))
}

async fn get_settings(State(state): State<AppState>) -> Json<SettingsView> {
    let cfg = state.dispatcher.store().get();
    Json(SettingsView::from_config(&cfg, state.expose_api_key))
}

async fn update_settings(
    State(state): State<AppState>,
    payload: Result<Json<BackendConfigPatch>, JsonRejection>,
) -> Response {
    let Json(patch) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return rejection_response("server.settings", rejection),
    };
    telemetry::log_event(
        "server.settings",
        &format!("update fields={}", patch.touched_fields().join(",")),
    );
    state.dispatcher.store().update(patch);
    Json(json!({
        "status": "success",
        "message": "Settings updated successfully"
    }))
    .into_response()
}

/**
 * \brief 请求体无法解析时，按统一的 {error, message} 结构返回。
 */
fn rejection_response(category: &str, rejection: JsonRejection) -> Response {
    let status = rejection.status();
    let message = rejection.body_text();
    telemetry::log_error(
        category,
        &format!("rejected body status={} message={}", status.as_u16(), message),
    );
    (
        status,
        Json(json!({ "error": format!("Error: {}", status.as_u16()), "message": message })),
    )
        .into_response()
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cfg = state.dispatcher.store().get();
    Json(json!({
        "ok": true,
        "backend_kind": cfg.backend_kind,
        "in_flight": state.cancels.in_flight(),
    }))
}

impl IntoResponse for ChatResult {
    fn into_response(self) -> Response {
        match self {
            ChatResult::Success(v) => (StatusCode::OK, Json(v)).into_response(),
            ChatResult::UpstreamError { status, message } => {
                let code = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
                (
                    code,
                    Json(json!({ "error": format!("Error: {}", status), "message": message })),
                )
                    .into_response()
            }
            ChatResult::TransportError(message) => (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": "Error: upstream unreachable", "message": message })),
            )
                .into_response(),
            ChatResult::ConfigurationError(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Error: configuration", "message": message })),
            )
                .into_response(),
            ChatResult::Cancelled => StatusCode::NO_CONTENT.into_response(),
        }
    }
}
