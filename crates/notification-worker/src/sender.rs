//! 推送通知发送器
//!
//! 把 topic 与 data 负载组装成推送消息，交给推送客户端发送一次。
//! 失败时原样返回 `Delivery` 错误，不重试。

use std::sync::Arc;
use std::time::Instant;

use seeforme_shared::observability::metrics::record_push;
use tracing::info;

use crate::error::NotificationError;
use crate::projector::NotificationPayload;
use crate::push::{PushClient, PushMessage};

/// 投递回执
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// 推送服务分配的消息标识，对本服务不透明
    pub message_id: String,
}

/// 推送通知发送器
///
/// 推送客户端通过 `Arc` 共享，克隆发送器不会复制连接池。
#[derive(Clone)]
pub struct NotificationSender {
    client: Arc<dyn PushClient>,
}

impl NotificationSender {
    pub fn new(client: Arc<dyn PushClient>) -> Self {
        Self { client }
    }

    pub async fn send(
        &self,
        topic: &str,
        payload: NotificationPayload,
    ) -> Result<DeliveryReceipt, NotificationError> {
        let message = PushMessage::new(topic, payload);
        let start = Instant::now();

        match self.client.send(&message).await {
            Ok(message_id) => {
                record_push("success", start.elapsed().as_secs_f64());
                info!(topic, message_id = %message_id, "推送通知已发送");
                Ok(DeliveryReceipt { message_id })
            }
            Err(source) => {
                record_push("failed", start.elapsed().as_secs_f64());
                Err(NotificationError::Delivery {
                    topic: topic.to_string(),
                    source,
                })
            }
        }
    }
}
