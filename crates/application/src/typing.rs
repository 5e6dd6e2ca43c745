//! 输入中信号中继
//!
//! 无状态、尽力而为：不落库、不限流、不合并，抖动由客户端自己去抖。
//! 唯一的校验是连接必须已订阅该会话房间。

use std::sync::Arc;

use domain::{ConnectionId, ConversationId, ServerEvent, UserId};

use crate::error::ApplicationError;
use crate::registry::ConnectionRegistry;

pub struct TypingRelay {
    registry: Arc<ConnectionRegistry>,
}

impl TypingRelay {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// 广播给房间内除发起连接外的每条连接。
    /// 同一用户的其它设备也会收到，和房间语义保持一致。
    pub async fn set_typing(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        conversation_id: ConversationId,
        is_typing: bool,
    ) -> Result<(), ApplicationError> {
        if !self
            .registry
            .is_subscribed(connection_id, conversation_id)
            .await
        {
            return Err(ApplicationError::forbidden(
                "connection is not subscribed to this conversation",
            ));
        }
        self.registry
            .send_to_room(
                conversation_id,
                ServerEvent::Typing {
                    conversation_id,
                    user_id,
                    is_typing,
                },
                Some(connection_id),
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    const CONVERSATION: ConversationId = ConversationId(42);

    #[tokio::test]
    async fn typing_excludes_the_emitting_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = TypingRelay::new(registry.clone());

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        registry.admit(a, UserId::new(1), tx_a).await;
        registry.admit(b, UserId::new(2), tx_b).await;
        registry.subscribe(a, CONVERSATION).await;
        registry.subscribe(b, CONVERSATION).await;

        relay
            .set_typing(a, UserId::new(1), CONVERSATION, true)
            .await
            .unwrap();

        assert!(rx_a.try_recv().is_err());
        match rx_b.try_recv().unwrap() {
            ServerEvent::Typing {
                user_id, is_typing, ..
            } => {
                assert_eq!(user_id, UserId::new(1));
                assert!(is_typing);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsubscribed_connection_is_rejected() {
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = TypingRelay::new(registry.clone());

        let (tx, _rx) = mpsc::unbounded_channel();
        let a = ConnectionId::generate();
        registry.admit(a, UserId::new(1), tx).await;

        let result = relay.set_typing(a, UserId::new(1), CONVERSATION, true).await;
        assert!(matches!(result, Err(ApplicationError::Forbidden(_))));
    }
}
