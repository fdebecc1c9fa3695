//! 路由配置

use axum::{
    Router,
    extract::{MatchedPath, Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use wecarry_shared::observability::middleware as obs_middleware;
use wecarry_shared::reporting::ErrorReport;

use super::handlers;
use super::state::AppState;

/// 业务 API 路由
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(handlers::create_user))
        .route("/users/{id}", get(handlers::get_user))
        .route("/requests", post(handlers::create_request))
        .route("/requests/{id}", get(handlers::get_request))
        .route("/requests/{id}/status", post(handlers::transition_request))
        .route("/requests/{id}/threads", post(handlers::open_thread))
        .route("/threads/{id}", get(handlers::get_thread))
        .route("/threads/{id}/participants", post(handlers::add_participant))
        .route("/threads/{id}/messages", post(handlers::send_message))
        .route("/threads/{id}/viewed", post(handlers::mark_viewed))
        .route("/threads/{id}/unread", get(handlers::unread_count))
}

/// 身份提供方登录路由
pub fn auth_routes() -> Router<AppState> {
    Router::new().route("/{provider}/login", get(handlers::begin_login))
}

/// 完整应用路由
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api", api_routes())
        .nest("/auth", auth_routes())
        .route("/health", get(handlers::health_check))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            report_server_errors,
        ))
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 把 500 类错误交给错误上报器
///
/// 错误响应在 extensions 中携带 `ErrorReport`，这里补上请求位置后异步上报，
/// 不阻塞响应。
async fn report_server_errors(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let mut response = next.run(request).await;

    if let Some(mut report) = response.extensions_mut().remove::<ErrorReport>() {
        report.context = format!("api:{method} {path}");
        let reporter = state.core.reporter().clone();
        tokio::spawn(async move {
            reporter.report(report).await;
        });
    }

    response
}
