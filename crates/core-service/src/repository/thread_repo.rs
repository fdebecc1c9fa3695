//! 会话仓储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::instrument;

use super::traits::ThreadRepositoryTrait;
use crate::error::{AppError, ErrorKey, Result};
use crate::models::{
    Message, MessageId, NewMessage, RequestId, Thread, ThreadId, ThreadParticipant, UserId,
};

pub struct ThreadRepository {
    pool: PgPool,
}

impl ThreadRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// 在已开启的事务内创建或获取发布者与另一用户之间的会话
///
/// 调用方须已锁定请求行，保证同一对用户不会并发建出两个会话。
pub(crate) async fn ensure_thread_in_tx(
    conn: &mut PgConnection,
    request_id: RequestId,
    creator_id: UserId,
    other_id: UserId,
    at: DateTime<Utc>,
) -> Result<Thread> {
    let existing = sqlx::query_as::<_, Thread>(
        r#"
        SELECT t.id, t.request_id, t.created_at
        FROM threads t
        JOIN thread_participants p ON p.thread_id = t.id
        WHERE t.request_id = $1 AND p.user_id = $2
        ORDER BY t.id
        LIMIT 1
        "#,
    )
    .bind(request_id)
    .bind(other_id)
    .fetch_optional(&mut *conn)
    .await?;

    let thread = match existing {
        Some(thread) => thread,
        None => {
            sqlx::query_as::<_, Thread>(
                r#"
                INSERT INTO threads (request_id, created_at)
                VALUES ($1, $2)
                RETURNING id, request_id, created_at
                "#,
            )
            .bind(request_id)
            .bind(at)
            .fetch_one(&mut *conn)
            .await?
        }
    };

    for user_id in [other_id, creator_id] {
        sqlx::query(
            r#"
            INSERT INTO thread_participants (thread_id, user_id, last_viewed_at)
            VALUES ($1, $2, NULL)
            ON CONFLICT (thread_id, user_id) DO NOTHING
            "#,
        )
        .bind(thread.id)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    }

    Ok(thread)
}

async fn find_participant(
    conn: &mut PgConnection,
    thread_id: ThreadId,
    user_id: UserId,
    lock: bool,
) -> Result<Option<ThreadParticipant>> {
    let sql = if lock {
        r#"
        SELECT thread_id, user_id, last_viewed_at
        FROM thread_participants
        WHERE thread_id = $1 AND user_id = $2
        FOR UPDATE
        "#
    } else {
        r#"
        SELECT thread_id, user_id, last_viewed_at
        FROM thread_participants
        WHERE thread_id = $1 AND user_id = $2
        "#
    };

    let participant = sqlx::query_as::<_, ThreadParticipant>(sql)
        .bind(thread_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(participant)
}

#[async_trait]
impl ThreadRepositoryTrait for ThreadRepository {
    async fn get_thread(&self, id: ThreadId) -> Result<Option<Thread>> {
        let thread = sqlx::query_as::<_, Thread>(
            "SELECT id, request_id, created_at FROM threads WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(thread)
    }

    async fn find_thread(&self, request_id: RequestId, user_id: UserId) -> Result<Option<Thread>> {
        let thread = sqlx::query_as::<_, Thread>(
            r#"
            SELECT t.id, t.request_id, t.created_at
            FROM threads t
            JOIN thread_participants p ON p.thread_id = t.id
            WHERE t.request_id = $1 AND p.user_id = $2
            ORDER BY t.id
            LIMIT 1
            "#,
        )
        .bind(request_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::from(e).with_key(ErrorKey::ThreadsLoadFailure))?;

        Ok(thread)
    }

    #[instrument(skip(self))]
    async fn ensure_thread(
        &self,
        request_id: RequestId,
        creator_id: UserId,
        other_id: UserId,
    ) -> Result<Thread> {
        let mut tx = self.pool.begin().await?;

        // 锁定请求行，与状态迁移事务串行
        sqlx::query_scalar::<_, i64>("SELECT id FROM requests WHERE id = $1 FOR UPDATE")
            .bind(request_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::not_found("request", request_id))?;

        let thread = ensure_thread_in_tx(&mut tx, request_id, creator_id, other_id, Utc::now()).await?;
        tx.commit().await?;

        Ok(thread)
    }

    async fn add_participant(&self, thread_id: ThreadId, user_id: UserId) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO thread_participants (thread_id, user_id, last_viewed_at)
            VALUES ($1, $2, NULL)
            ON CONFLICT (thread_id, user_id) DO NOTHING
            "#,
        )
        .bind(thread_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_participants(&self, thread_id: ThreadId) -> Result<Vec<ThreadParticipant>> {
        let participants = sqlx::query_as::<_, ThreadParticipant>(
            r#"
            SELECT thread_id, user_id, last_viewed_at
            FROM thread_participants
            WHERE thread_id = $1
            ORDER BY user_id
            "#,
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::from(e).with_key(ErrorKey::ThreadsLoadFailure))?;

        Ok(participants)
    }

    #[instrument(skip(self, message), fields(thread_id = %message.thread_id, sender_id = %message.sender_id))]
    async fn append_message(&self, message: &NewMessage) -> Result<Message> {
        let mut tx = self.pool.begin().await?;

        if find_participant(&mut tx, message.thread_id, message.sender_id, true)
            .await?
            .is_none()
        {
            return Err(AppError::NotThreadParticipant {
                thread_id: message.thread_id.value(),
                user_id: message.sender_id.value(),
            });
        }

        let created = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages (thread_id, sender_id, content, sent_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, thread_id, sender_id, content, sent_at
            "#,
        )
        .bind(message.thread_id)
        .bind(message.sender_id)
        .bind(&message.content)
        .bind(message.sent_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::from(e).with_key(ErrorKey::MessageCreateFailure))?;

        // 自己发的消息对自己不算未读
        sqlx::query(
            r#"
            UPDATE thread_participants
            SET last_viewed_at = GREATEST(last_viewed_at, $3)
            WHERE thread_id = $1 AND user_id = $2
            "#,
        )
        .bind(message.thread_id)
        .bind(message.sender_id)
        .bind(created.sent_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(created)
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        let message = sqlx::query_as::<_, Message>(
            "SELECT id, thread_id, sender_id, content, sent_at FROM messages WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }

    async fn mark_viewed(
        &self,
        thread_id: ThreadId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<ThreadParticipant> {
        // GREATEST 忽略 NULL，首次查看直接写入 at
        sqlx::query_as::<_, ThreadParticipant>(
            r#"
            UPDATE thread_participants
            SET last_viewed_at = GREATEST(last_viewed_at, $3)
            WHERE thread_id = $1 AND user_id = $2
            RETURNING thread_id, user_id, last_viewed_at
            "#,
        )
        .bind(thread_id)
        .bind(user_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotThreadParticipant {
            thread_id: thread_id.value(),
            user_id: user_id.value(),
        })
    }

    async fn unread_count(&self, thread_id: ThreadId, user_id: UserId) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;

        let participant = find_participant(&mut conn, thread_id, user_id, false)
            .await?
            .ok_or(AppError::NotThreadParticipant {
                thread_id: thread_id.value(),
                user_id: user_id.value(),
            })?;

        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM messages
            WHERE thread_id = $1
              AND ($2::TIMESTAMPTZ IS NULL OR sent_at > $2)
            "#,
        )
        .bind(thread_id)
        .bind(participant.last_viewed_at)
        .fetch_one(&mut *conn)
        .await?;

        Ok(count)
    }
}
