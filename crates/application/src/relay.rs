//! 消息中继
//!
//! 接收已认证连接的发消息请求：先经网关校验并落库，成功后才向房间
//! 广播。网关拒绝或超时都不会产生任何广播——未持久化的消息绝不外发。

use std::sync::Arc;

use tracing::info;

use domain::{ConversationId, DeliveryStatus, Message, ServerEvent, UserId};

use crate::error::ApplicationError;
use crate::gateway::Gateway;
use crate::registry::ConnectionRegistry;

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub conversation_id: ConversationId,
    pub body: Option<String>,
    pub attachment_id: Option<i64>,
    /// 客户端本地乐观消息的对账标识，原样回传
    pub client_msg_id: Option<String>,
}

pub struct MessageRelay {
    gateway: Gateway,
    registry: Arc<ConnectionRegistry>,
}

impl MessageRelay {
    pub fn new(gateway: Gateway, registry: Arc<ConnectionRegistry>) -> Self {
        Self { gateway, registry }
    }

    /// 发送一条消息并广播给房间内的每条连接（含发送者自己的其它设备）。
    /// 返回持久化后的完整记录，调用方用它应答请求。
    pub async fn send_message(
        &self,
        sender_id: UserId,
        request: SendMessageRequest,
    ) -> Result<Message, ApplicationError> {
        let body = request
            .body
            .map(|b| b.trim().to_owned())
            .filter(|b| !b.is_empty());
        Message::validate_content(body.as_deref(), request.attachment_id)?;

        let message = self
            .gateway
            .insert_message(
                sender_id,
                request.conversation_id,
                body,
                request.attachment_id,
            )
            .await?;

        info!(
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            sender_id = %sender_id,
            "message persisted, broadcasting"
        );

        self.registry
            .send_to_room(
                request.conversation_id,
                ServerEvent::NewMessage {
                    message: message.clone(),
                    client_msg_id: request.client_msg_id,
                },
                None,
            )
            .await;

        // 投递提示：房间里有别的成员在线就立刻回报 delivered。
        // 这是乐观提示，权威状态由读状态引擎在确认已读时重算。
        if self
            .registry
            .has_other_member_connected(request.conversation_id, sender_id)
            .await
        {
            self.registry
                .send_to_user(
                    sender_id,
                    ServerEvent::MessageStatus {
                        message_id: message.id,
                        conversation_id: request.conversation_id,
                        status: DeliveryStatus::Delivered,
                    },
                )
                .await;
        }

        Ok(message)
    }
}
