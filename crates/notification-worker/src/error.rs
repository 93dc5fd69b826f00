//! 通知服务错误类型
//!
//! 按失败阶段划分：入站消息解码、推送数据序列化、推送投递、启动期凭证加载。
//! 所有错误都直接返回给调用方，本服务内部不做重试或死信处理。

use seeforme_shared::error::AppError;
use thiserror::Error;

use crate::push::PushError;

#[derive(Debug, Error)]
pub enum NotificationError {
    /// 入站消息不符合求助事件结构（字段缺失、类型错误或非 JSON）
    #[error("求助事件反序列化失败: {0}")]
    Deserialization(String),

    #[error("通知数据序列化失败: {0}")]
    Serialization(String),

    /// 推送服务拒绝或网络失败，携带推送客户端的原始错误
    #[error("推送发送失败: topic={topic}, 原因={source}")]
    Delivery {
        topic: String,
        #[source]
        source: PushError,
    },

    /// 服务账号密钥不可读或无法解析，启动期致命
    #[error("推送凭证无效: {0}")]
    Credential(String),

    #[error(transparent)]
    Shared(#[from] AppError),
}

impl NotificationError {
    /// 获取错误码，同时用作指标标签
    pub fn code(&self) -> &'static str {
        match self {
            Self::Deserialization(_) => "DESERIALIZATION_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Delivery { .. } => "DELIVERY_ERROR",
            Self::Credential(_) => "CREDENTIAL_ERROR",
            Self::Shared(e) => e.code(),
        }
    }
}
