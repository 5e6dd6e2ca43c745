use std::fmt;
use std::str::FromStr;

use crate::errors::DomainError;
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

/// 消息投递状态机
/// 状态只会向前推进：sent → delivered → seen，永不回退
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Seen,
}

impl DeliveryStatus {
    /// 向前推进状态；如果目标状态不比当前状态靠前则保持原状。
    /// 特别地，`Seen` 之后任何输入都不再改变状态。
    pub fn advance(self, next: DeliveryStatus) -> DeliveryStatus {
        if next > self {
            next
        } else {
            self
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Seen => "seen",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(DeliveryStatus::Sent),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "seen" => Ok(DeliveryStatus::Seen),
            other => Err(DomainError::invalid_argument(
                "status",
                format!("unknown delivery status: {other}"),
            )),
        }
    }
}

/// 附件元数据。上传与去重由外部协作方负责，这里只携带广播所需的描述信息。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AttachmentInfo {
    pub id: i64,
    pub original_name: String,
    pub mime_type: String,
    pub file_size: i64,
    pub url: String,
}

/// 一条已持久化的消息。投递状态是核心唯一驱动的可变字段。
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub body: Option<String>,
    pub attachment: Option<AttachmentInfo>,
    pub status: DeliveryStatus,
    pub created_at: Timestamp,
}

impl Message {
    /// 校验消息内容：正文和附件至少要有一个，否则不允许转发。
    pub fn validate_content(
        body: Option<&str>,
        attachment_id: Option<i64>,
    ) -> Result<(), DomainError> {
        let body_empty = body.map(|b| b.trim().is_empty()).unwrap_or(true);
        if body_empty && attachment_id.is_none() {
            return Err(DomainError::invalid_argument(
                "body",
                "message requires a body or an attachment",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_advances_forward_only() {
        let status = DeliveryStatus::Sent;
        let status = status.advance(DeliveryStatus::Delivered);
        assert_eq!(status, DeliveryStatus::Delivered);

        // 回退请求被忽略
        assert_eq!(status.advance(DeliveryStatus::Sent), DeliveryStatus::Delivered);

        let status = status.advance(DeliveryStatus::Seen);
        assert_eq!(status, DeliveryStatus::Seen);

        // seen 是终态
        assert_eq!(status.advance(DeliveryStatus::Delivered), DeliveryStatus::Seen);
        assert_eq!(status.advance(DeliveryStatus::Sent), DeliveryStatus::Seen);
    }

    #[test]
    fn status_may_skip_delivered() {
        // 发送时没有任何接收方在线，确认已读后直接跳到 seen
        assert_eq!(
            DeliveryStatus::Sent.advance(DeliveryStatus::Seen),
            DeliveryStatus::Seen
        );
    }

    #[test]
    fn content_requires_body_or_attachment() {
        assert!(Message::validate_content(None, None).is_err());
        assert!(Message::validate_content(Some(""), None).is_err());
        assert!(Message::validate_content(Some("   "), None).is_err());
        assert!(Message::validate_content(Some("hi"), None).is_ok());
        assert!(Message::validate_content(None, Some(7)).is_ok());
        assert!(Message::validate_content(Some(""), Some(7)).is_ok());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            DeliveryStatus::Sent,
            DeliveryStatus::Delivered,
            DeliveryStatus::Seen,
        ] {
            assert_eq!(status.as_str().parse::<DeliveryStatus>().unwrap(), status);
        }
        assert!("read".parse::<DeliveryStatus>().is_err());
    }
}
