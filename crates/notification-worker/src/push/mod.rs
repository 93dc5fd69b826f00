//! 推送服务客户端
//!
//! `PushClient` 抽象“把一条 topic 消息交给推送服务商”这一动作，
//! 生产实现为 Firebase Cloud Messaging HTTP v1（`FcmClient`），测试中使用 mock。

mod credentials;
mod fcm;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::projector::NotificationPayload;

pub use credentials::ServiceAccountKey;
pub use fcm::FcmClient;

/// 推送客户端错误
#[derive(Debug, Error)]
pub enum PushError {
    #[error("推送请求发送失败: {0}")]
    Transport(String),

    #[error("推送服务拒绝: status={status}, code={code}, message={message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },

    #[error("推送服务响应无法解析: {0}")]
    InvalidResponse(String),

    #[error("获取访问令牌失败: {0}")]
    Auth(String),
}

/// 发往推送服务的 topic 消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushMessage {
    pub topic: String,
    pub data: NotificationPayload,
}

impl PushMessage {
    pub fn new(topic: impl Into<String>, data: NotificationPayload) -> Self {
        Self {
            topic: topic.into(),
            data,
        }
    }
}

/// 推送客户端
///
/// 实现必须可以被多个处理任务共享调用。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushClient: Send + Sync {
    /// 发送一条消息，返回推送服务分配的消息标识
    async fn send(&self, message: &PushMessage) -> Result<String, PushError>;
}
