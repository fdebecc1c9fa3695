//! 请求生命周期状态机
//!
//! 校验顺序：边是否存在（InvalidTransition）→ 操作者角色（Forbidden）。
//! 写入由仓储在单个事务内完成，事件在提交成功后才发出。
//! 提交与发事件放在独立任务中执行，调用方在提交后被取消也不会丢事件。

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use wecarry_shared::observability::metrics;

use super::transitions::{ProviderEffect, Role, find_rule};
use crate::error::{AppError, ErrorKey, Result};
use crate::events::{DomainEvent, EventBus, StatusChanged};
use crate::models::{
    ProviderUpdate, Request, RequestId, RequestStatus, StatusChange, StatusChangeOutcome, Thread,
    UserId,
};
use crate::repository::RequestRepositoryTrait;

/// 加锁后发现状态被并发修改时的最大重读次数
const MAX_ATTEMPTS: u32 = 3;

/// 迁移结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionOutcome {
    pub request: Request,
    /// false 表示请求已处于目标状态，本次调用未做任何修改
    pub changed: bool,
    /// 本次迁移建立或复用的会话
    pub thread: Option<Thread>,
}

pub struct StateMachine {
    requests: Arc<dyn RequestRepositoryTrait>,
    bus: Arc<EventBus>,
}

impl StateMachine {
    pub fn new(requests: Arc<dyn RequestRepositoryTrait>, bus: Arc<EventBus>) -> Self {
        Self { requests, bus }
    }

    /// 将请求迁移到目标状态
    #[instrument(skip(self, cancel), fields(request_id = %request_id, to = %target, actor_id = %actor_id))]
    pub async fn transition(
        &self,
        request_id: RequestId,
        target: RequestStatus,
        actor_id: UserId,
        cancel: &CancellationToken,
    ) -> Result<TransitionOutcome> {
        for attempt in 1..=MAX_ATTEMPTS {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            let current = self
                .requests
                .get_request(request_id)
                .await?
                .ok_or_else(|| AppError::not_found("request", request_id))?;
            let role = Role::of(&current, actor_id);

            if current.status == target {
                return Self::already_there(current, role);
            }

            let Some(rule) = find_rule(current.status, target) else {
                metrics::record_transition_rejection(ErrorKey::InvalidTransition.as_str());
                return Err(AppError::InvalidTransition {
                    from: current.status.to_string(),
                    to: target.to_string(),
                });
            };

            if !rule.permits(role) {
                metrics::record_transition_rejection(ErrorKey::NotAuthorized.as_str());
                return Err(AppError::forbidden(format!(
                    "{} 不能将请求从 {} 改为 {}",
                    role.as_str(),
                    current.status,
                    target
                )));
            }

            let change = StatusChange {
                request_id,
                expected: current.status,
                target,
                provider: match rule.provider {
                    ProviderEffect::Keep => ProviderUpdate::Keep,
                    ProviderEffect::SetActor => ProviderUpdate::Set(actor_id),
                    ProviderEffect::Clear => ProviderUpdate::Clear,
                },
                open_thread_with: rule.opens_thread.then_some(actor_id),
                at: Utc::now(),
            };

            // 提交点之前最后一次检查取消
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            match self.commit_and_emit(current.clone(), change, actor_id).await? {
                StatusChangeOutcome::Applied { request, thread } => {
                    metrics::record_transition(current.status.as_str(), target.as_str());
                    info!(from = %current.status, "请求状态已变更");
                    return Ok(TransitionOutcome {
                        request,
                        changed: true,
                        thread,
                    });
                }
                StatusChangeOutcome::Conflict { current: latest } => {
                    warn!(
                        attempt,
                        expected = %current.status,
                        actual = %latest.status,
                        "请求状态被并发修改，重新读取"
                    );
                }
            }
        }

        Err(AppError::ConcurrencyConflict(format!(
            "请求 {request_id} 多次重试后仍被并发修改"
        )))
    }

    /// 请求已处于目标状态：发布者、承接者重复提交视为成功；
    /// 目标为 open 时任何人都视为成功（撤回与拒绝并发时，后到者已不再是承接者）。
    /// 其他人并发提交落败时，重读到的状态不在迁移表中，按 InvalidTransition 拒绝。
    fn already_there(current: Request, role: Role) -> Result<TransitionOutcome> {
        if role == Role::Other && current.status != RequestStatus::Open {
            metrics::record_transition_rejection(ErrorKey::InvalidTransition.as_str());
            return Err(AppError::InvalidTransition {
                from: current.status.to_string(),
                to: current.status.to_string(),
            });
        }

        debug!(status = %current.status, "请求已处于目标状态，忽略");
        Ok(TransitionOutcome {
            request: current,
            changed: false,
            thread: None,
        })
    }

    /// 在独立任务中提交并发出事件
    async fn commit_and_emit(
        &self,
        before: Request,
        change: StatusChange,
        actor_id: UserId,
    ) -> Result<StatusChangeOutcome> {
        let requests = self.requests.clone();
        let bus = self.bus.clone();

        let handle = tokio::spawn(async move {
            let outcome = requests.apply_status_change(&change).await?;

            if let StatusChangeOutcome::Applied { request, .. } = &outcome {
                bus.emit(DomainEvent::RequestStatusChanged(StatusChanged {
                    request_id: request.id,
                    old_status: before.status,
                    new_status: request.status,
                    actor_id,
                    provider_id: request.provider_id.or(before.provider_id),
                }))
                .await;
            }

            Ok::<_, AppError>(outcome)
        });

        handle
            .await
            .map_err(|e| AppError::Internal(format!("状态迁移任务异常退出: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RequestKind, RequestSize, RequestVisibility};
    use crate::repository::MockRequestRepositoryTrait;

    fn request(status: RequestStatus, provider: Option<UserId>) -> Request {
        let now = Utc::now();
        Request {
            id: RequestId(10),
            creator_id: UserId(1),
            provider_id: provider,
            title: "Laptop charger".into(),
            description: String::new(),
            origin: "Lagos".into(),
            destination: "Accra".into(),
            size: RequestSize::Small,
            kind: RequestKind::Request,
            status,
            visibility: RequestVisibility::All,
            needed_after: None,
            needed_before: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn machine(repo: MockRequestRepositoryTrait) -> StateMachine {
        StateMachine::new(Arc::new(repo), Arc::new(EventBus::new()))
    }

    #[tokio::test]
    async fn test_invalid_edge_is_rejected_before_role_check() {
        let mut repo = MockRequestRepositoryTrait::new();
        repo.expect_get_request()
            .returning(|_| Ok(Some(request(RequestStatus::Open, None))));
        repo.expect_apply_status_change().never();

        let err = machine(repo)
            .transition(
                RequestId(10),
                RequestStatus::Delivered,
                UserId(99),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_creator_cannot_commit_to_own_request() {
        let mut repo = MockRequestRepositoryTrait::new();
        repo.expect_get_request()
            .returning(|_| Ok(Some(request(RequestStatus::Open, None))));
        repo.expect_apply_status_change().never();

        let err = machine(repo)
            .transition(
                RequestId(10),
                RequestStatus::Committed,
                UserId(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn test_commit_sets_provider_and_opens_thread() {
        let mut repo = MockRequestRepositoryTrait::new();
        repo.expect_get_request()
            .returning(|_| Ok(Some(request(RequestStatus::Open, None))));
        repo.expect_apply_status_change()
            .withf(|change| {
                change.expected == RequestStatus::Open
                    && change.target == RequestStatus::Committed
                    && change.provider == ProviderUpdate::Set(UserId(2))
                    && change.open_thread_with == Some(UserId(2))
            })
            .times(1)
            .returning(|_| {
                Ok(StatusChangeOutcome::Applied {
                    request: request(RequestStatus::Committed, Some(UserId(2))),
                    thread: None,
                })
            });

        let outcome = machine(repo)
            .transition(
                RequestId(10),
                RequestStatus::Committed,
                UserId(2),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.request.provider_id, Some(UserId(2)));
    }

    #[tokio::test]
    async fn test_cancelled_before_commit_writes_nothing() {
        let mut repo = MockRequestRepositoryTrait::new();
        repo.expect_get_request().never();
        repo.expect_apply_status_change().never();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = machine(repo)
            .transition(RequestId(10), RequestStatus::Committed, UserId(2), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Cancelled));
    }

    #[tokio::test]
    async fn test_conflict_rereads_and_reports_idempotence() {
        let mut repo = MockRequestRepositoryTrait::new();
        let mut reads = 0;
        repo.expect_get_request().returning(move |_| {
            reads += 1;
            if reads == 1 {
                Ok(Some(request(RequestStatus::Open, None)))
            } else {
                Ok(Some(request(RequestStatus::Committed, Some(UserId(2)))))
            }
        });
        repo.expect_apply_status_change().times(1).returning(|_| {
            Ok(StatusChangeOutcome::Conflict {
                current: request(RequestStatus::Committed, Some(UserId(2))),
            })
        });

        let outcome = machine(repo)
            .transition(
                RequestId(10),
                RequestStatus::Committed,
                UserId(2),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(!outcome.changed);
    }

    #[tokio::test]
    async fn test_conflict_loser_with_other_actor_is_invalid_transition() {
        let mut repo = MockRequestRepositoryTrait::new();
        let mut reads = 0;
        repo.expect_get_request().returning(move |_| {
            reads += 1;
            if reads == 1 {
                Ok(Some(request(RequestStatus::Open, None)))
            } else {
                Ok(Some(request(RequestStatus::Committed, Some(UserId(2)))))
            }
        });
        repo.expect_apply_status_change().times(1).returning(|_| {
            Ok(StatusChangeOutcome::Conflict {
                current: request(RequestStatus::Committed, Some(UserId(2))),
            })
        });

        let err = machine(repo)
            .transition(
                RequestId(10),
                RequestStatus::Committed,
                UserId(3),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_outsider_repeat_is_invalid_transition() {
        let mut repo = MockRequestRepositoryTrait::new();
        repo.expect_get_request()
            .returning(|_| Ok(Some(request(RequestStatus::Accepted, Some(UserId(2))))));

        let err = machine(repo)
            .transition(
                RequestId(10),
                RequestStatus::Accepted,
                UserId(3),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_database_failure_surfaces_as_error() {
        let mut repo = MockRequestRepositoryTrait::new();
        repo.expect_get_request()
            .returning(|_| Ok(Some(request(RequestStatus::Committed, Some(UserId(2))))));
        repo.expect_apply_status_change()
            .returning(|_| Err(AppError::Database(sqlx::Error::PoolTimedOut)));

        let err = machine(repo)
            .transition(
                RequestId(10),
                RequestStatus::Accepted,
                UserId(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
    }
}
