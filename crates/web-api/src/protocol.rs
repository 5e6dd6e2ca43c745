//! 客户端请求协议
//!
//! 一条 WebSocket 上传输 `type` 标签的 JSON，请求变体是封闭集合。
//! 无法识别的请求不会断开连接，只回一个错误帧。

use serde::Deserialize;

/// 客户端发来的请求
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    /// 发送消息；`client_msg_id` 用于客户端对账本地乐观消息
    SendMessage {
        conversation_id: i64,
        body: Option<String>,
        attachment_id: Option<i64>,
        client_msg_id: Option<String>,
    },
    /// 把会话里他人发的消息全部标记为已读
    MarkSeen { conversation_id: i64 },
    /// 输入中信号
    Typing {
        conversation_id: i64,
        is_typing: bool,
    },
    /// 新建会话后主动加入房间
    JoinConversation { conversation_id: i64 },
    /// 查询当前在线名单
    WhoIsOnline,
    /// 群组创建完成，把所有成员的连接拉进房间
    GroupCreated {
        conversation_id: i64,
        member_ids: Vec<i64>,
    },
    /// 管理端向群组加人
    MemberAdded {
        conversation_id: i64,
        user_id: i64,
    },
    /// 管理端从群组移人
    MemberRemoved {
        conversation_id: i64,
        user_id: i64,
    },
    /// 自己退群
    UserLeftGroup { conversation_id: i64 },
    /// 心跳
    Ping,
}
