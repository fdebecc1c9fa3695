//! HTTP 请求处理器
//!
//! 调用方身份来自上游认证中间件写入的 `X-WeCarry-User-Id` 头，核心层信任该值。

use axum::{
    Json,
    extract::{FromRequestParts, Path, Query, State},
    http::request::Parts,
};
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use validator::Validate;

use super::dto::{
    AddParticipantRequest, ApiResponse, CreateRequestRequest, CreateUserRequest, LoginQuery,
    LoginResponse, SendMessageRequest, TransitionRequest, UnreadCountDto,
};
use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::error::AppError;
use crate::lifecycle::TransitionOutcome;
use crate::models::{
    Message, Request, RequestId, Thread, ThreadId, ThreadParticipant, User, UserId,
};
use crate::thread::ThreadView;

pub const ACTOR_HEADER: &str = "x-wecarry-user-id";

/// 当前调用方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor(pub UserId);

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ACTOR_HEADER)
            .ok_or_else(|| AppError::Validation(format!("缺少请求头 {ACTOR_HEADER}")))?;

        raw.to_str()
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .map(|id| Actor(UserId(id)))
            .ok_or_else(|| AppError::Validation(format!("请求头 {ACTOR_HEADER} 无效")).into())
    }
}

/// 存活探针
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "wecarry-api"
    }))
}

// ==================== 用户 ====================

pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> ApiResult<Json<ApiResponse<User>>> {
    req.validate()?;
    let user = state
        .core
        .create_user(req.into_new_user(&state.default_locale))
        .await?;
    Ok(Json(ApiResponse::success(user)))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> ApiResult<Json<ApiResponse<User>>> {
    let user = state.core.get_user(id).await?;
    Ok(Json(ApiResponse::success(user)))
}

// ==================== 请求 ====================

pub async fn create_request(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Json(req): Json<CreateRequestRequest>,
) -> ApiResult<Json<ApiResponse<Request>>> {
    req.validate()?;
    let request = state.core.create_request(req.into_new_request(actor)).await?;
    Ok(Json(ApiResponse::success(request)))
}

pub async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
) -> ApiResult<Json<ApiResponse<Request>>> {
    let request = state.core.get_request(id).await?;
    Ok(Json(ApiResponse::success(request)))
}

/// 状态迁移
///
/// 客户端断开时 handler future 被丢弃，drop guard 随之取消令牌；
/// 提交点之前的取消不会产生任何写入。
#[instrument(skip_all, fields(request_id = %id, actor_id = %actor, target = %req.status))]
pub async fn transition_request(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<RequestId>,
    Json(req): Json<TransitionRequest>,
) -> ApiResult<Json<ApiResponse<TransitionOutcome>>> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let outcome = state
        .core
        .transition_request(id, req.status, actor, &cancel)
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

/// 调用方与请求发布者之间的会话，不存在时创建
pub async fn open_thread(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<RequestId>,
) -> ApiResult<Json<ApiResponse<Thread>>> {
    let thread = state.core.get_or_create_thread(id, actor).await?;
    Ok(Json(ApiResponse::success(thread)))
}

// ==================== 会话 ====================

pub async fn get_thread(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ThreadId>,
) -> ApiResult<Json<ApiResponse<ThreadView>>> {
    let view = state.core.get_thread(id, actor).await?;
    Ok(Json(ApiResponse::success(view)))
}

pub async fn add_participant(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ThreadId>,
    Json(req): Json<AddParticipantRequest>,
) -> ApiResult<Json<ApiResponse<Vec<ThreadParticipant>>>> {
    let participants = state.core.add_participant(id, req.user_id, actor).await?;
    Ok(Json(ApiResponse::success(participants)))
}

pub async fn send_message(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ThreadId>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<Json<ApiResponse<Message>>> {
    req.validate()?;
    let message = state.core.send_message(id, actor, &req.content).await?;
    Ok(Json(ApiResponse::success(message)))
}

pub async fn mark_viewed(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ThreadId>,
) -> ApiResult<Json<ApiResponse<ThreadParticipant>>> {
    let participant = state.core.mark_thread_viewed(id, actor).await?;
    Ok(Json(ApiResponse::success(participant)))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ThreadId>,
) -> ApiResult<Json<ApiResponse<UnreadCountDto>>> {
    let unread_count = state.core.unread_count(id, actor).await?;
    Ok(Json(ApiResponse::success(UnreadCountDto {
        thread_id: id,
        unread_count,
    })))
}

// ==================== 登录 ====================

/// 生成身份提供方授权地址
pub async fn begin_login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<LoginQuery>,
) -> ApiResult<Json<ApiResponse<LoginResponse>>> {
    query.validate()?;
    let provider = state.providers.get(&provider)?;
    let session = provider.begin_auth(&query.state)?;
    Ok(Json(ApiResponse::success(LoginResponse::from(session))))
}
