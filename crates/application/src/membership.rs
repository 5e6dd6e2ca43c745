//! 会话成员变更中继
//!
//! 成员名单的持久化修改由外部协作方完成，这里只负责把存活连接搬进/
//! 搬出对应房间，并把变更通知推给相关各方。全部推送都是尽力而为。

use std::sync::Arc;

use tracing::info;

use domain::{ConnectionId, ConversationId, ServerEvent, UserId};

use crate::registry::ConnectionRegistry;

pub struct MembershipRelay {
    registry: Arc<ConnectionRegistry>,
}

impl MembershipRelay {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// 新建会话后，客户端自己申请加入房间
    pub async fn join_conversation(
        &self,
        connection_id: ConnectionId,
        conversation_id: ConversationId,
    ) {
        self.registry.subscribe(connection_id, conversation_id).await;
    }

    /// 群组创建完成：创建者连接入房，所有成员的存活连接入房并收到通知
    pub async fn group_created(
        &self,
        connection_id: ConnectionId,
        conversation_id: ConversationId,
        member_ids: &[UserId],
    ) {
        self.registry.subscribe(connection_id, conversation_id).await;
        for &member in member_ids {
            self.registry.subscribe_user(member, conversation_id).await;
            self.registry
                .send_to_user(member, ServerEvent::AddedToGroup { conversation_id })
                .await;
        }
        info!(%conversation_id, members = member_ids.len(), "group rooms populated");
    }

    /// 管理端把用户加入已有群组
    pub async fn member_added(&self, conversation_id: ConversationId, user_id: UserId) {
        self.registry.subscribe_user(user_id, conversation_id).await;
        self.registry
            .send_to_user(user_id, ServerEvent::AddedToGroup { conversation_id })
            .await;
        self.registry
            .send_to_room(
                conversation_id,
                ServerEvent::GroupUpdated { conversation_id },
                None,
            )
            .await;
    }

    /// 管理端把用户移出群组：先摘连接再发通知，
    /// 被移除者只通过用户通道收到 removed_from_group，不再收到房间广播
    pub async fn member_removed(&self, conversation_id: ConversationId, user_id: UserId) {
        self.registry.unsubscribe_user(user_id, conversation_id).await;
        self.registry
            .send_to_user(user_id, ServerEvent::RemovedFromGroup { conversation_id })
            .await;
        self.registry
            .send_to_room(
                conversation_id,
                ServerEvent::GroupUpdated { conversation_id },
                None,
            )
            .await;
    }

    /// 用户自己退群：只摘当前连接，其余设备由各自的请求处理
    pub async fn user_left_group(
        &self,
        connection_id: ConnectionId,
        conversation_id: ConversationId,
    ) {
        self.registry.unsubscribe(connection_id, conversation_id).await;
        self.registry
            .send_to_room(
                conversation_id,
                ServerEvent::GroupUpdated { conversation_id },
                None,
            )
            .await;
    }
}
