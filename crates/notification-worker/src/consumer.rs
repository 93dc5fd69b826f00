//! 求助请求消费者
//!
//! 从 `help-request` topic 消费求助事件，映射为推送 data 负载后发到同名 FCM topic。
//! 每条消息独立处理，不依赖跨消息状态；错误返回给消费循环，由其记录并跳过。

use seeforme_shared::config::AppConfig;
use seeforme_shared::kafka::{ConsumerMessage, KafkaConsumer, topics};
use seeforme_shared::observability::metrics::record_help_request;
use seeforme_shared::observability::tracing::extract_from_headers;
use tokio::sync::watch;
use tracing::{Instrument, Span, debug, info, info_span, warn};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::error::NotificationError;
use crate::event::{HelpRequestEvent, render_instant};
use crate::projector::project;
use crate::sender::{DeliveryReceipt, NotificationSender};

/// 求助请求消费者
pub struct HelpRequestConsumer {
    consumer: KafkaConsumer,
    sender: NotificationSender,
}

impl HelpRequestConsumer {
    pub fn new(config: &AppConfig, sender: NotificationSender) -> Result<Self, NotificationError> {
        let consumer = KafkaConsumer::new(&config.kafka)?;
        Ok(Self { consumer, sender })
    }

    /// 启动消费循环，直到收到 shutdown 信号
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), NotificationError> {
        self.consumer.subscribe(&[topics::HELP_REQUEST])?;

        info!(topic = topics::HELP_REQUEST, "求助请求消费者已启动");

        let sender = self.sender;

        self.consumer
            .start(shutdown, |msg| {
                let sender = &sender;
                async move {
                    let span = record_span(&msg);
                    handle_message(sender, &msg).instrument(span).await.map(|_| ())
                }
            })
            .await;

        info!("求助请求消费者已停止");
        Ok(())
    }
}

/// 单条消息的处理 span
///
/// 消息头带 `traceparent` 时挂到上游链路上；未启用 OpenTelemetry 层时只作为普通日志 span。
fn record_span(msg: &ConsumerMessage) -> Span {
    let span = info_span!(
        "help_request",
        topic = %msg.topic,
        partition = msg.partition,
        offset = msg.offset
    );
    if let Err(e) = span.set_parent(extract_from_headers(&msg.headers)) {
        debug!(error = %e, "未关联上游追踪上下文");
    }
    span
}

/// 处理单条 Kafka 消息：解码 -> 映射 -> 推送
///
/// 拆分为独立函数而非方法，便于在测试中直接调用而无需构造完整的 Consumer。
/// 解码失败时不会调用发送器。
pub async fn handle_message(
    sender: &NotificationSender,
    msg: &ConsumerMessage,
) -> Result<DeliveryReceipt, NotificationError> {
    let result = forward(sender, msg).await;
    record_help_request(match &result {
        Ok(_) => "forwarded",
        Err(e) => e.code(),
    });
    result
}

async fn forward(
    sender: &NotificationSender,
    msg: &ConsumerMessage,
) -> Result<DeliveryReceipt, NotificationError> {
    let event = HelpRequestEvent::from_json_slice(&msg.payload).inspect_err(|e| {
        warn!(error = %e, payload = %msg.payload_lossy(), "求助事件无法解码");
    })?;

    info!(
        request_creator_id = event.request_creator_id,
        created_at = %render_instant(&event.created_at),
        "收到求助请求事件"
    );

    let payload = project(&event)?;
    sender.send(topics::HELP_REQUEST, payload).await
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use opentelemetry::trace::{TraceContextExt, TracerProvider as _};
    use opentelemetry_sdk::trace::SdkTracerProvider;
    use tracing_subscriber::layer::SubscriberExt;

    use super::*;
    use crate::projector::NotificationPayload;
    use crate::push::{MockPushClient, PushError, PushMessage};

    fn message(payload: &str) -> ConsumerMessage {
        ConsumerMessage {
            topic: topics::HELP_REQUEST.to_string(),
            partition: 0,
            offset: 1,
            key: None,
            payload: payload.as_bytes().to_vec(),
            timestamp: None,
            headers: HashMap::new(),
        }
    }

    const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[test]
    fn test_record_span_joins_upstream_trace() {
        let provider = SdkTracerProvider::builder().build();
        let subscriber = tracing_subscriber::registry()
            .with(tracing_opentelemetry::layer().with_tracer(provider.tracer("test")));
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut msg = message("{}");
        msg.headers
            .insert("traceparent".to_string(), TRACEPARENT.to_string());

        let context = record_span(&msg).context();
        let span = context.span();
        let span_context = span.span_context();

        assert!(span_context.is_valid());
        assert_eq!(
            span_context.trace_id().to_string(),
            "4bf92f3577b34da6a3ce929d0e0e4736"
        );
        // 本地 span 是上游 span 的子节点
        assert_ne!(span_context.span_id().to_string(), "00f067aa0ba902b7");
    }

    #[test]
    fn test_record_span_without_traceparent_starts_new_trace() {
        let provider = SdkTracerProvider::builder().build();
        let subscriber = tracing_subscriber::registry()
            .with(tracing_opentelemetry::layer().with_tracer(provider.tracer("test")));
        let _guard = tracing::subscriber::set_default(subscriber);

        let context = record_span(&message("{}")).context();

        assert_ne!(
            context.span().span_context().trace_id().to_string(),
            "4bf92f3577b34da6a3ce929d0e0e4736"
        );
    }

    #[test]
    fn test_record_span_without_otel_layer() {
        let mut msg = message("{}");
        msg.headers
            .insert("traceparent".to_string(), TRACEPARENT.to_string());

        // 未安装 OpenTelemetry 层时不应 panic
        let _span = record_span(&msg);
    }

    #[tokio::test]
    async fn test_forward_help_request() {
        let expected = PushMessage::new(
            "help-request",
            NotificationPayload::from([
                ("requestCreatorId".to_string(), "42".to_string()),
                ("createdAt".to_string(), "2024-01-01T00:00:00Z".to_string()),
            ]),
        );

        let mut client = MockPushClient::new();
        client
            .expect_send()
            .withf(move |message| *message == expected)
            .times(1)
            .returning(|_| Ok("projects/seeforme/messages/1".to_string()));
        let sender = NotificationSender::new(Arc::new(client));

        let receipt = handle_message(
            &sender,
            &message(r#"{"requestCreatorId": 42, "createdAt": "2024-01-01T00:00:00Z"}"#),
        )
        .await
        .unwrap();

        assert_eq!(receipt.message_id, "projects/seeforme/messages/1");
    }

    #[tokio::test]
    async fn test_missing_creator_id_never_reaches_sender() {
        let mut client = MockPushClient::new();
        client.expect_send().times(0);
        let sender = NotificationSender::new(Arc::new(client));

        let err = handle_message(&sender, &message(r#"{"createdAt": "2024-01-01T00:00:00Z"}"#))
            .await
            .unwrap_err();

        assert!(matches!(err, NotificationError::Deserialization(_)));
    }

    #[tokio::test]
    async fn test_invalid_json_never_reaches_sender() {
        let mut client = MockPushClient::new();
        client.expect_send().times(0);
        let sender = NotificationSender::new(Arc::new(client));

        let err = handle_message(&sender, &message("not valid json"))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "DESERIALIZATION_ERROR");
    }

    #[tokio::test]
    async fn test_array_body_never_reaches_sender() {
        let mut client = MockPushClient::new();
        client.expect_send().times(0);
        let sender = NotificationSender::new(Arc::new(client));

        let err = handle_message(&sender, &message(r#"[42, "2024-01-01T00:00:00Z"]"#))
            .await
            .unwrap_err();

        assert!(matches!(err, NotificationError::Deserialization(_)));
    }

    #[tokio::test]
    async fn test_redelivered_record_is_sent_twice() {
        let mut client = MockPushClient::new();
        client
            .expect_send()
            .times(2)
            .returning(|_| Ok("msg-123".to_string()));
        let sender = NotificationSender::new(Arc::new(client));

        let record = message(r#"{"requestCreatorId": 42, "createdAt": "2024-01-01T00:00:00Z"}"#);
        handle_message(&sender, &record).await.unwrap();
        handle_message(&sender, &record).await.unwrap();
    }

    #[tokio::test]
    async fn test_upstream_string_encoding_is_forwarded() {
        // API 服务以字符串形式写入 id 和 epoch 秒，并附带 question 字段
        let mut client = MockPushClient::new();
        client
            .expect_send()
            .withf(|message| {
                message.data.len() == 2
                    && message.data["requestCreatorId"] == "42"
                    && message.data["createdAt"] == "2024-01-01T00:00:00Z"
            })
            .times(1)
            .returning(|_| Ok("msg-123".to_string()));
        let sender = NotificationSender::new(Arc::new(client));

        handle_message(
            &sender,
            &message(r#"{"createdAt":"1704067200","requestCreatorId":"42","question":"help"}"#),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_delivery_failure_propagates() {
        let mut client = MockPushClient::new();
        client
            .expect_send()
            .times(1)
            .returning(|_| Err(PushError::Transport("connection refused".to_string())));
        let sender = NotificationSender::new(Arc::new(client));

        let err = handle_message(
            &sender,
            &message(r#"{"requestCreatorId": 42, "createdAt": "2024-01-01T00:00:00Z"}"#),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, NotificationError::Delivery { .. }));
    }
}
