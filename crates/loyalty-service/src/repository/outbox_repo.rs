//! Outbox 仓储
//!
//! 消息与业务写入同事务入队；分发器以租约方式认领，多实例并发安全

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::instrument;
use uuid::Uuid;

use super::traits::OutboxStore;
use crate::error::Result;
use crate::models::{NewOutboxMessage, OutboxMessage};

pub struct OutboxRepository {
    pool: PgPool,
}

impl OutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 在事务中入队
    pub async fn enqueue_in_tx(tx: &mut PgConnection, message: &NewOutboxMessage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox_messages (id, topic, message_key, payload, trace_id)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(message.id)
        .bind(&message.topic)
        .bind(&message.message_key)
        .bind(&message.payload)
        .bind(&message.trace_id)
        .execute(tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl OutboxStore for OutboxRepository {
    #[instrument(skip(self))]
    async fn claim_batch(&self, limit: i64, lease: Duration) -> Result<Vec<OutboxMessage>> {
        let now = Utc::now();
        let mut messages = sqlx::query_as::<_, OutboxMessage>(
            r#"
            UPDATE outbox_messages
            SET attempts = attempts + 1, locked_until = $2
            WHERE id IN (
                SELECT id FROM outbox_messages
                WHERE delivered_at IS NULL
                  AND dead_at IS NULL
                  AND available_at <= $1
                  AND (locked_until IS NULL OR locked_until < $1)
                ORDER BY created_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, topic, message_key, payload, attempts, last_error, trace_id,
                      available_at, delivered_at, dead_at, created_at
            "#,
        )
        .bind(now)
        .bind(now + lease)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        // RETURNING 不保证顺序
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(messages)
    }

    async fn mark_delivered(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox_messages
            SET delivered_at = NOW(), locked_until = NULL, last_error = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        match retry_at {
            Some(retry_at) => {
                sqlx::query(
                    r#"
                    UPDATE outbox_messages
                    SET last_error = $2, available_at = $3, locked_until = NULL
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(error)
                .bind(retry_at)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE outbox_messages
                    SET last_error = $2, dead_at = NOW(), locked_until = NULL
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(error)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }
}
