use domain::DomainError;
use thiserror::Error;

use crate::gateway::GatewayError;

/// 请求级错误分类，见错误处理设计：
/// Unauthorized 对连接是致命的，其余错误只回给发起请求的连接，从不广播。
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("authentication failed")]
    Unauthorized,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("upstream error: {0}")]
    Upstream(String),
}

impl ApplicationError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        ApplicationError::Forbidden(message.into())
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        ApplicationError::Upstream(message.into())
    }

    /// 错误码，用于错误帧和 HTTP 映射
    pub fn code(&self) -> &'static str {
        match self {
            ApplicationError::Domain(DomainError::InvalidArgument { .. }) => "INVALID_ARGUMENT",
            ApplicationError::Domain(DomainError::NotFound { .. }) => "NOT_FOUND",
            ApplicationError::Unauthorized => "UNAUTHORIZED",
            ApplicationError::Forbidden(_) => "FORBIDDEN",
            ApplicationError::NotFound(_) => "NOT_FOUND",
            ApplicationError::Upstream(_) => "UPSTREAM_ERROR",
        }
    }
}

impl From<GatewayError> for ApplicationError {
    fn from(value: GatewayError) -> Self {
        match value {
            GatewayError::NotMember => {
                ApplicationError::forbidden("not a member of this conversation")
            }
            GatewayError::InvalidAttachment { reason } => {
                ApplicationError::Domain(DomainError::invalid_argument("attachment_id", reason))
            }
            GatewayError::NotFound { resource } => ApplicationError::NotFound(resource),
            GatewayError::Storage { message } => ApplicationError::Upstream(message),
        }
    }
}
