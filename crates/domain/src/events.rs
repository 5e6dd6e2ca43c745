//! 服务器推送事件
//!
//! 核心向客户端推送的全部事件变体。线上传输为 `type` 标签的 JSON，
//! 由 web-api 层在发送任务里做序列化。

use serde::{Deserialize, Serialize};

use crate::message::{DeliveryStatus, Message};
use crate::value_objects::{ConversationId, MessageId, UserId};

/// 推送给客户端的事件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// 新消息广播（含发送者自己的其它设备）
    NewMessage {
        message: Message,
        #[serde(skip_serializing_if = "Option::is_none")]
        client_msg_id: Option<String>,
    },
    /// 消息投递状态变更
    MessageStatus {
        message_id: MessageId,
        conversation_id: ConversationId,
        status: DeliveryStatus,
    },
    /// 在线状态变更，推送给所有连接
    Presence { user_id: UserId, online: bool },
    /// 输入中信号，尽力而为，不持久化
    Typing {
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    },
    /// 准入完成后推送一次：该连接已订阅的会话列表
    JoinedConversations { conversation_ids: Vec<ConversationId> },
    /// who_is_online 查询的应答
    OnlineList { user_ids: Vec<UserId> },
    /// 被拉入新会话
    AddedToGroup { conversation_id: ConversationId },
    /// 被移出会话
    RemovedFromGroup { conversation_id: ConversationId },
    /// 会话成员名单发生变化
    GroupUpdated { conversation_id: ConversationId },
    /// send_message 请求的应答，只发给请求连接
    SendAck {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<Message>,
        #[serde(skip_serializing_if = "Option::is_none")]
        client_msg_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// mark_seen 请求的应答，只发给请求连接
    SeenAck {
        conversation_id: ConversationId,
        updated: usize,
    },
    /// 请求级错误，只发给出错请求所在的连接
    Error { code: String, message: String },
    /// 心跳应答
    Pong,
}
