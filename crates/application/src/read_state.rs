//! 读状态引擎
//!
//! 处理 mark_seen 请求：找出会话里请求者还没读过的他人消息，幂等落下
//! 已读标记，然后对照完整成员名单重算每条消息的聚合状态并广播真正
//! 发生的状态变更。已读水位的推进是无条件的，和单条标记是否新增无关。

use std::sync::Arc;

use tracing::{info, warn};

use domain::{ConversationId, DeliveryStatus, ReadMarker, ServerEvent, UserId};

use crate::error::ApplicationError;
use crate::gateway::Gateway;
use crate::registry::ConnectionRegistry;

/// mark_seen 的执行结果，用于应答请求连接
#[derive(Debug, Clone, Copy)]
pub struct MarkSeenOutcome {
    pub conversation_id: ConversationId,
    /// 本次新落下已读标记的消息数
    pub updated: usize,
}

pub struct ReadStateEngine {
    gateway: Gateway,
    registry: Arc<ConnectionRegistry>,
}

impl ReadStateEngine {
    pub fn new(gateway: Gateway, registry: Arc<ConnectionRegistry>) -> Self {
        Self { gateway, registry }
    }

    pub async fn mark_seen(
        &self,
        reader_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<MarkSeenOutcome, ApplicationError> {
        // 成员资格每次重查，避免订阅状态被当成授权依据
        let members = self.gateway.membership_of(conversation_id).await?;
        if !members.contains(&reader_id) {
            return Err(ApplicationError::forbidden(
                "not a member of this conversation",
            ));
        }

        let unread = self
            .gateway
            .list_unread_message_ids(reader_id, conversation_id)
            .await?;

        if !unread.is_empty() {
            let markers: Vec<ReadMarker> = unread
                .iter()
                .map(|&message_id| ReadMarker::new(message_id, reader_id))
                .collect();
            self.gateway.insert_read_markers(&markers).await?;

            for &message_id in &unread {
                let Some(sender_id) = self.gateway.message_sender(message_id).await? else {
                    warn!(%message_id, "unread message disappeared before status recompute");
                    continue;
                };
                // 聚合名单 = 成员 − 该消息的发送者
                let readers: Vec<UserId> = members
                    .iter()
                    .copied()
                    .filter(|&member| member != sender_id)
                    .collect();
                let read_count = self
                    .gateway
                    .count_read_markers(message_id, &readers)
                    .await?;
                let next = if read_count >= readers.len() {
                    DeliveryStatus::Seen
                } else {
                    DeliveryStatus::Delivered
                };
                let changed = self
                    .gateway
                    .update_message_status(message_id, next)
                    .await?;
                if changed {
                    self.registry
                        .send_to_room(
                            conversation_id,
                            ServerEvent::MessageStatus {
                                message_id,
                                conversation_id,
                                status: next,
                            },
                            None,
                        )
                        .await;
                }
            }

            info!(
                %conversation_id,
                %reader_id,
                marked = unread.len(),
                "read markers recorded"
            );
        }

        // 水位推进无条件执行，保证未读数查询单调
        self.gateway
            .upsert_read_watermark(conversation_id, reader_id)
            .await?;

        Ok(MarkSeenOutcome {
            conversation_id,
            updated: unread.len(),
        })
    }
}
