//! 持久化网关边界
//!
//! 核心只通过这组固定操作访问消息/会话存储，存储内部的表结构不在本层关心。
//! 所有调用方都应该经过 [`Gateway`] 包装器走超时路径，
//! 并且调用期间不得持有连接注册表的锁。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use domain::{ConversationId, DeliveryStatus, Message, MessageId, ReadMarker, UserId};

use crate::error::ApplicationError;

/// 网关操作错误
#[derive(Debug, Error)]
pub enum GatewayError {
    /// 请求者不是会话成员
    #[error("not a member of the conversation")]
    NotMember,
    /// 附件不存在、不归发送者所有、或已经挂在别的消息上
    #[error("invalid attachment: {reason}")]
    InvalidAttachment { reason: String },
    #[error("not found: {resource}")]
    NotFound { resource: String },
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl GatewayError {
    pub fn invalid_attachment(reason: impl Into<String>) -> Self {
        Self::InvalidAttachment {
            reason: reason.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

/// 持久化网关trait
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// 列出用户所属的全部会话（准入时的自动订阅用）
    async fn list_conversations_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationId>, GatewayError>;

    /// 校验发送者成员资格与附件归属并落库，返回完整的持久化记录
    async fn insert_message(
        &self,
        sender_id: UserId,
        conversation_id: ConversationId,
        body: Option<String>,
        attachment_id: Option<i64>,
    ) -> Result<Message, GatewayError>;

    /// 会话内由其他成员发出、且请求者还没有已读标记的消息
    async fn list_unread_message_ids(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<Vec<MessageId>, GatewayError>;

    /// 幂等写入已读标记；已存在的标记直接跳过，不算失败
    async fn insert_read_markers(&self, markers: &[ReadMarker]) -> Result<(), GatewayError>;

    /// 会话的完整成员名单
    async fn membership_of(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<UserId>, GatewayError>;

    /// 某条消息的发送者（重算聚合状态时要把发送者从名单里排除）
    async fn message_sender(&self, message_id: MessageId)
        -> Result<Option<UserId>, GatewayError>;

    /// 统计 readers 中已经有该消息已读标记的人数
    async fn count_read_markers(
        &self,
        message_id: MessageId,
        readers: &[UserId],
    ) -> Result<usize, GatewayError>;

    /// 更新消息状态。seen 不会被覆盖；返回该行是否真的发生了变化
    async fn update_message_status(
        &self,
        message_id: MessageId,
        status: DeliveryStatus,
    ) -> Result<bool, GatewayError>;

    /// 无条件推进 (会话, 用户) 的已读水位到当前最大消息 id
    async fn upsert_read_watermark(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<(), GatewayError>;
}

/// 网关调用包装器：统一加超时，超时视为上游错误。
/// 调用失败或超时不会产生任何广播，也不会留下半生不熟的注册表状态。
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<dyn PersistenceGateway>,
    timeout: Duration,
}

impl Gateway {
    pub fn new(inner: Arc<dyn PersistenceGateway>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, ApplicationError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(ApplicationError::from),
            Err(_) => Err(ApplicationError::upstream(
                "persistence gateway call timed out",
            )),
        }
    }

    pub async fn list_conversations_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationId>, ApplicationError> {
        self.call(self.inner.list_conversations_for_user(user_id))
            .await
    }

    pub async fn insert_message(
        &self,
        sender_id: UserId,
        conversation_id: ConversationId,
        body: Option<String>,
        attachment_id: Option<i64>,
    ) -> Result<Message, ApplicationError> {
        self.call(
            self.inner
                .insert_message(sender_id, conversation_id, body, attachment_id),
        )
        .await
    }

    pub async fn list_unread_message_ids(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<Vec<MessageId>, ApplicationError> {
        self.call(self.inner.list_unread_message_ids(user_id, conversation_id))
            .await
    }

    pub async fn insert_read_markers(
        &self,
        markers: &[ReadMarker],
    ) -> Result<(), ApplicationError> {
        self.call(self.inner.insert_read_markers(markers)).await
    }

    pub async fn membership_of(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<UserId>, ApplicationError> {
        self.call(self.inner.membership_of(conversation_id)).await
    }

    pub async fn message_sender(
        &self,
        message_id: MessageId,
    ) -> Result<Option<UserId>, ApplicationError> {
        self.call(self.inner.message_sender(message_id)).await
    }

    pub async fn count_read_markers(
        &self,
        message_id: MessageId,
        readers: &[UserId],
    ) -> Result<usize, ApplicationError> {
        self.call(self.inner.count_read_markers(message_id, readers))
            .await
    }

    pub async fn update_message_status(
        &self,
        message_id: MessageId,
        status: DeliveryStatus,
    ) -> Result<bool, ApplicationError> {
        self.call(self.inner.update_message_status(message_id, status))
            .await
    }

    pub async fn upsert_read_watermark(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<(), ApplicationError> {
        self.call(self.inner.upsert_read_watermark(conversation_id, user_id))
            .await
    }
}

/// 内存实现的持久化网关（用于测试和本地开发）
pub mod memory {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use tokio::sync::RwLock;

    use domain::AttachmentInfo;

    /// 测试用的附件登记项
    #[derive(Debug, Clone)]
    struct StoredAttachment {
        conversation_id: ConversationId,
        uploader_id: UserId,
        message_id: Option<MessageId>,
        info: AttachmentInfo,
    }

    #[derive(Default)]
    struct MemoryState {
        memberships: HashMap<ConversationId, Vec<UserId>>,
        messages: HashMap<MessageId, Message>,
        reads: HashSet<(MessageId, UserId)>,
        watermarks: HashMap<(ConversationId, UserId), Option<MessageId>>,
        attachments: HashMap<i64, StoredAttachment>,
        next_message_id: i64,
    }

    #[derive(Default)]
    pub struct MemoryPersistenceGateway {
        state: RwLock<MemoryState>,
    }

    impl MemoryPersistenceGateway {
        pub fn new() -> Self {
            Self::default()
        }

        /// 登记一个会话及其成员名单
        pub async fn seed_conversation(
            &self,
            conversation_id: ConversationId,
            members: impl IntoIterator<Item = UserId>,
        ) {
            let mut state = self.state.write().await;
            state
                .memberships
                .insert(conversation_id, members.into_iter().collect());
        }

        /// 登记一个尚未挂到消息上的附件
        pub async fn seed_attachment(
            &self,
            id: i64,
            conversation_id: ConversationId,
            uploader_id: UserId,
            original_name: &str,
            mime_type: &str,
            file_size: i64,
        ) {
            let mut state = self.state.write().await;
            state.attachments.insert(
                id,
                StoredAttachment {
                    conversation_id,
                    uploader_id,
                    message_id: None,
                    info: AttachmentInfo {
                        id,
                        original_name: original_name.to_string(),
                        mime_type: mime_type.to_string(),
                        file_size,
                        url: format!("/uploads/{id}"),
                    },
                },
            );
        }

        pub async fn message_status(&self, message_id: MessageId) -> Option<DeliveryStatus> {
            let state = self.state.read().await;
            state.messages.get(&message_id).map(|m| m.status)
        }

        pub async fn message_count(&self) -> usize {
            self.state.read().await.messages.len()
        }

        pub async fn read_marker_count(&self) -> usize {
            self.state.read().await.reads.len()
        }

        pub async fn watermark(
            &self,
            conversation_id: ConversationId,
            user_id: UserId,
        ) -> Option<Option<MessageId>> {
            let state = self.state.read().await;
            state.watermarks.get(&(conversation_id, user_id)).copied()
        }
    }

    #[async_trait]
    impl PersistenceGateway for MemoryPersistenceGateway {
        async fn list_conversations_for_user(
            &self,
            user_id: UserId,
        ) -> Result<Vec<ConversationId>, GatewayError> {
            let state = self.state.read().await;
            let mut ids: Vec<ConversationId> = state
                .memberships
                .iter()
                .filter(|(_, members)| members.contains(&user_id))
                .map(|(&id, _)| id)
                .collect();
            ids.sort();
            Ok(ids)
        }

        async fn insert_message(
            &self,
            sender_id: UserId,
            conversation_id: ConversationId,
            body: Option<String>,
            attachment_id: Option<i64>,
        ) -> Result<Message, GatewayError> {
            let mut state = self.state.write().await;
            let is_member = state
                .memberships
                .get(&conversation_id)
                .map(|members| members.contains(&sender_id))
                .unwrap_or(false);
            if !is_member {
                return Err(GatewayError::NotMember);
            }

            let attachment = match attachment_id {
                Some(id) => {
                    let stored = state
                        .attachments
                        .get(&id)
                        .ok_or_else(|| GatewayError::invalid_attachment("attachment not found"))?;
                    if stored.conversation_id != conversation_id
                        || stored.uploader_id != sender_id
                        || stored.message_id.is_some()
                    {
                        return Err(GatewayError::invalid_attachment(
                            "attachment not available for this message",
                        ));
                    }
                    Some(stored.info.clone())
                }
                None => None,
            };

            state.next_message_id += 1;
            let message_id = MessageId::new(state.next_message_id);
            let message = Message {
                id: message_id,
                conversation_id,
                sender_id,
                body,
                attachment,
                status: DeliveryStatus::Sent,
                created_at: chrono::Utc::now(),
            };
            if let Some(id) = attachment_id {
                if let Some(stored) = state.attachments.get_mut(&id) {
                    stored.message_id = Some(message_id);
                }
            }
            state.messages.insert(message_id, message.clone());
            Ok(message)
        }

        async fn list_unread_message_ids(
            &self,
            user_id: UserId,
            conversation_id: ConversationId,
        ) -> Result<Vec<MessageId>, GatewayError> {
            let state = self.state.read().await;
            let mut ids: Vec<MessageId> = state
                .messages
                .values()
                .filter(|m| {
                    m.conversation_id == conversation_id
                        && m.sender_id != user_id
                        && !state.reads.contains(&(m.id, user_id))
                })
                .map(|m| m.id)
                .collect();
            ids.sort();
            Ok(ids)
        }

        async fn insert_read_markers(&self, markers: &[ReadMarker]) -> Result<(), GatewayError> {
            let mut state = self.state.write().await;
            for marker in markers {
                state.reads.insert((marker.message_id, marker.user_id));
            }
            Ok(())
        }

        async fn membership_of(
            &self,
            conversation_id: ConversationId,
        ) -> Result<Vec<UserId>, GatewayError> {
            let state = self.state.read().await;
            Ok(state
                .memberships
                .get(&conversation_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn message_sender(
            &self,
            message_id: MessageId,
        ) -> Result<Option<UserId>, GatewayError> {
            let state = self.state.read().await;
            Ok(state.messages.get(&message_id).map(|m| m.sender_id))
        }

        async fn count_read_markers(
            &self,
            message_id: MessageId,
            readers: &[UserId],
        ) -> Result<usize, GatewayError> {
            let state = self.state.read().await;
            Ok(readers
                .iter()
                .filter(|&&u| state.reads.contains(&(message_id, u)))
                .count())
        }

        async fn update_message_status(
            &self,
            message_id: MessageId,
            status: DeliveryStatus,
        ) -> Result<bool, GatewayError> {
            let mut state = self.state.write().await;
            let message = state
                .messages
                .get_mut(&message_id)
                .ok_or_else(|| GatewayError::not_found(format!("message {message_id}")))?;
            let advanced = message.status.advance(status);
            let changed = advanced != message.status;
            message.status = advanced;
            Ok(changed)
        }

        async fn upsert_read_watermark(
            &self,
            conversation_id: ConversationId,
            user_id: UserId,
        ) -> Result<(), GatewayError> {
            let mut state = self.state.write().await;
            let max_id = state
                .messages
                .values()
                .filter(|m| m.conversation_id == conversation_id)
                .map(|m| m.id)
                .max();
            state.watermarks.insert((conversation_id, user_id), max_id);
            Ok(())
        }
    }
}
