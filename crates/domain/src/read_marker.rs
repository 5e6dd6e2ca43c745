use crate::value_objects::{MessageId, UserId};

/// 已读标记：记录某个成员已经看过某条消息。
/// 每个 (message_id, user_id) 对至多一条，重复创建是幂等操作。
/// 对应的已读水位（每会话每用户的最大已读消息 id）由网关直接推进。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ReadMarker {
    pub message_id: MessageId,
    pub user_id: UserId,
}

impl ReadMarker {
    pub fn new(message_id: MessageId, user_id: UserId) -> Self {
        Self { message_id, user_id }
    }
}
