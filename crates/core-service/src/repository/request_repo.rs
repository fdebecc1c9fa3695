//! 请求仓储
//!
//! 状态迁移在同一事务内完成：`SELECT ... FOR UPDATE` 锁定请求行，校验当前状态，
//! 写入新状态与承接者，需要时建立会话，最后提交。同一请求上的并发迁移由行锁串行化。

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, instrument};

use super::thread_repo::ensure_thread_in_tx;
use super::traits::RequestRepositoryTrait;
use crate::error::{AppError, Result};
use crate::models::{NewRequest, Request, RequestId, RequestStatus, StatusChange, StatusChangeOutcome};

pub struct RequestRepository {
    pool: PgPool,
}

impl RequestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RequestRepositoryTrait for RequestRepository {
    async fn get_request(&self, id: RequestId) -> Result<Option<Request>> {
        let request = sqlx::query_as::<_, Request>(
            r#"
            SELECT id, creator_id, provider_id, title, description, origin, destination,
                   size, kind, status, visibility, needed_after, needed_before,
                   created_at, updated_at
            FROM requests
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(request)
    }

    async fn create_request(&self, request: &NewRequest) -> Result<Request> {
        let created = sqlx::query_as::<_, Request>(
            r#"
            INSERT INTO requests (creator_id, provider_id, title, description, origin,
                                  destination, size, kind, status, visibility,
                                  needed_after, needed_before, created_at, updated_at)
            VALUES ($1, NULL, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW(), NOW())
            RETURNING id, creator_id, provider_id, title, description, origin, destination,
                      size, kind, status, visibility, needed_after, needed_before,
                      created_at, updated_at
            "#,
        )
        .bind(request.creator_id)
        .bind(&request.title)
        .bind(&request.description)
        .bind(&request.origin)
        .bind(&request.destination)
        .bind(request.size)
        .bind(request.kind)
        .bind(RequestStatus::Open)
        .bind(request.visibility)
        .bind(request.needed_after)
        .bind(request.needed_before)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    #[instrument(skip(self, change), fields(request_id = %change.request_id, to = %change.target))]
    async fn apply_status_change(&self, change: &StatusChange) -> Result<StatusChangeOutcome> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, Request>(
            r#"
            SELECT id, creator_id, provider_id, title, description, origin, destination,
                   size, kind, status, visibility, needed_after, needed_before,
                   created_at, updated_at
            FROM requests
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(change.request_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found("request", change.request_id))?;

        if current.status != change.expected {
            debug!(
                expected = %change.expected,
                actual = %current.status,
                "加锁后状态已变化，放弃本次写入"
            );
            tx.rollback().await?;
            return Ok(StatusChangeOutcome::Conflict { current });
        }

        let provider_id = change.provider.apply(current.provider_id);
        let request = sqlx::query_as::<_, Request>(
            r#"
            UPDATE requests
            SET status = $2, provider_id = $3, updated_at = $4
            WHERE id = $1
            RETURNING id, creator_id, provider_id, title, description, origin, destination,
                      size, kind, status, visibility, needed_after, needed_before,
                      created_at, updated_at
            "#,
        )
        .bind(change.request_id)
        .bind(change.target)
        .bind(provider_id)
        .bind(change.at)
        .fetch_one(&mut *tx)
        .await?;

        let thread = match change.open_thread_with {
            Some(other_id) => Some(
                ensure_thread_in_tx(&mut tx, request.id, request.creator_id, other_id, change.at)
                    .await?,
            ),
            None => None,
        };

        tx.commit().await?;

        Ok(StatusChangeOutcome::Applied { request, thread })
    }
}
