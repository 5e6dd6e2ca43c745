//! 持久化网关的 PostgreSQL 实现
//!
//! 针对外部协作方维护的既有表结构查询，不做任何迁移管理。
//! 幂等写入用 ON CONFLICT DO NOTHING 表达；状态更新在 SQL 层
//! 带 `status <> 'seen'` 守卫，保证聚合状态永不回退。

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::debug;

use application::{GatewayError, PersistenceGateway};
use domain::{
    AttachmentInfo, ConversationId, DeliveryStatus, Message, MessageId, ReadMarker, UserId,
};

/// 创建 PostgreSQL 连接池
pub async fn create_pg_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

pub struct PgPersistenceGateway {
    pool: PgPool,
}

impl PgPersistenceGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn storage(err: sqlx::Error) -> GatewayError {
        GatewayError::storage(err.to_string())
    }

    async fn load_attachment(&self, id: i64) -> Result<Option<AttachmentInfo>, GatewayError> {
        let row = sqlx::query(
            "SELECT id, original_name, stored_name, mime_type, file_size \
             FROM attachments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::storage)?;

        Ok(row.map(|row| {
            let stored_name: String = row.get("stored_name");
            AttachmentInfo {
                id: row.get("id"),
                original_name: row.get("original_name"),
                mime_type: row.get("mime_type"),
                file_size: row.get("file_size"),
                url: format!("/uploads/{stored_name}"),
            }
        }))
    }
}

#[async_trait]
impl PersistenceGateway for PgPersistenceGateway {
    async fn list_conversations_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationId>, GatewayError> {
        let rows = sqlx::query(
            "SELECT conversation_id FROM conversation_members \
             WHERE user_id = $1 ORDER BY conversation_id",
        )
        .bind(i64::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(Self::storage)?;

        Ok(rows
            .into_iter()
            .map(|row| ConversationId::new(row.get("conversation_id")))
            .collect())
    }

    async fn insert_message(
        &self,
        sender_id: UserId,
        conversation_id: ConversationId,
        body: Option<String>,
        attachment_id: Option<i64>,
    ) -> Result<Message, GatewayError> {
        let is_member = sqlx::query(
            "SELECT 1 FROM conversation_members WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(i64::from(conversation_id))
        .bind(i64::from(sender_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::storage)?
        .is_some();
        if !is_member {
            return Err(GatewayError::NotMember);
        }

        if let Some(id) = attachment_id {
            let usable = sqlx::query(
                "SELECT 1 FROM attachments \
                 WHERE id = $1 AND conversation_id = $2 AND uploader_id = $3 \
                   AND message_id IS NULL",
            )
            .bind(id)
            .bind(i64::from(conversation_id))
            .bind(i64::from(sender_id))
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::storage)?
            .is_some();
            if !usable {
                return Err(GatewayError::invalid_attachment(
                    "attachment not available for this message",
                ));
            }
        }

        let row = sqlx::query(
            "INSERT INTO messages (conversation_id, sender_id, body, attachment_id, status) \
             VALUES ($1, $2, $3, $4, 'sent') \
             RETURNING id, created_at",
        )
        .bind(i64::from(conversation_id))
        .bind(i64::from(sender_id))
        .bind(&body)
        .bind(attachment_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Self::storage)?;

        let message_id = MessageId::new(row.get("id"));
        let created_at = row.get("created_at");

        let attachment = match attachment_id {
            Some(id) => {
                sqlx::query("UPDATE attachments SET message_id = $1 WHERE id = $2")
                    .bind(i64::from(message_id))
                    .bind(id)
                    .execute(&self.pool)
                    .await
                    .map_err(Self::storage)?;
                self.load_attachment(id).await?
            }
            None => None,
        };

        debug!(%message_id, %conversation_id, "message row inserted");

        Ok(Message {
            id: message_id,
            conversation_id,
            sender_id,
            body,
            attachment,
            status: DeliveryStatus::Sent,
            created_at,
        })
    }

    async fn list_unread_message_ids(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<Vec<MessageId>, GatewayError> {
        let rows = sqlx::query(
            "SELECT m.id FROM messages m \
             LEFT JOIN message_reads mr ON mr.message_id = m.id AND mr.user_id = $1 \
             WHERE m.conversation_id = $2 AND m.sender_id <> $1 AND mr.message_id IS NULL \
             ORDER BY m.id",
        )
        .bind(i64::from(user_id))
        .bind(i64::from(conversation_id))
        .fetch_all(&self.pool)
        .await
        .map_err(Self::storage)?;

        Ok(rows
            .into_iter()
            .map(|row| MessageId::new(row.get("id")))
            .collect())
    }

    async fn insert_read_markers(&self, markers: &[ReadMarker]) -> Result<(), GatewayError> {
        if markers.is_empty() {
            return Ok(());
        }
        let message_ids: Vec<i64> = markers.iter().map(|m| i64::from(m.message_id)).collect();
        let user_ids: Vec<i64> = markers.iter().map(|m| i64::from(m.user_id)).collect();

        sqlx::query(
            "INSERT INTO message_reads (message_id, user_id, read_at) \
             SELECT m, u, NOW() FROM UNNEST($1::bigint[], $2::bigint[]) AS t(m, u) \
             ON CONFLICT DO NOTHING",
        )
        .bind(&message_ids)
        .bind(&user_ids)
        .execute(&self.pool)
        .await
        .map_err(Self::storage)?;

        Ok(())
    }

    async fn membership_of(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<UserId>, GatewayError> {
        let rows = sqlx::query(
            "SELECT user_id FROM conversation_members WHERE conversation_id = $1",
        )
        .bind(i64::from(conversation_id))
        .fetch_all(&self.pool)
        .await
        .map_err(Self::storage)?;

        Ok(rows
            .into_iter()
            .map(|row| UserId::new(row.get("user_id")))
            .collect())
    }

    async fn message_sender(
        &self,
        message_id: MessageId,
    ) -> Result<Option<UserId>, GatewayError> {
        let row = sqlx::query("SELECT sender_id FROM messages WHERE id = $1")
            .bind(i64::from(message_id))
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::storage)?;

        Ok(row.map(|row| UserId::new(row.get("sender_id"))))
    }

    async fn count_read_markers(
        &self,
        message_id: MessageId,
        readers: &[UserId],
    ) -> Result<usize, GatewayError> {
        if readers.is_empty() {
            return Ok(0);
        }
        let reader_ids: Vec<i64> = readers.iter().map(|&u| i64::from(u)).collect();
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM message_reads \
             WHERE message_id = $1 AND user_id = ANY($2)",
        )
        .bind(i64::from(message_id))
        .bind(&reader_ids)
        .fetch_one(&self.pool)
        .await
        .map_err(Self::storage)?;

        let count: i64 = row.get("n");
        Ok(count as usize)
    }

    async fn update_message_status(
        &self,
        message_id: MessageId,
        status: DeliveryStatus,
    ) -> Result<bool, GatewayError> {
        // seen 是终态；值未变化时也不算更新，避免空转广播
        let result = sqlx::query(
            "UPDATE messages SET status = $2 \
             WHERE id = $1 AND status <> 'seen' AND status <> $2",
        )
        .bind(i64::from(message_id))
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(Self::storage)?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_read_watermark(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO conversation_read_status \
                 (conversation_id, user_id, last_read_at, last_read_msg_id) \
             VALUES ($1, $2, NOW(), (SELECT MAX(id) FROM messages WHERE conversation_id = $1)) \
             ON CONFLICT (conversation_id, user_id) DO UPDATE \
                 SET last_read_at = NOW(), last_read_msg_id = EXCLUDED.last_read_msg_id",
        )
        .bind(i64::from(conversation_id))
        .bind(i64::from(user_id))
        .execute(&self.pool)
        .await
        .map_err(Self::storage)?;

        Ok(())
    }
}
