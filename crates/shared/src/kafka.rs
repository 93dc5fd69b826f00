//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为业务友好的 Consumer 抽象，
//! 统一错误映射、offset 提交与优雅关闭语义，避免各服务重复编写样板代码。

use std::collections::HashMap;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::error::AppError;

// ---------------------------------------------------------------------------
// Topic 常量
// ---------------------------------------------------------------------------

/// 集中管理 Kafka topic 名称，生产方（API 服务）与消费方共用同一份常量
pub mod topics {
    /// 求助请求事件，同时作为 FCM 推送的目标 topic
    pub const HELP_REQUEST: &str = "help-request";
}

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给异步处理函数。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    /// 从 rdkafka 的借用消息构造，提取并拥有所有字段
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                if let Some(raw) = header.value
                    && let Ok(value) = std::str::from_utf8(raw)
                {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            timestamp: msg.timestamp().to_millis(),
            headers,
        }
    }

    /// 将负载视为 UTF-8 字符串返回，用于日志
    pub fn payload_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 消费者
///
/// 关闭 `enable.auto.offset.store`，仅在 handler 返回后才登记 offset，
/// 再交由后台的自动提交写回 broker：消息在处理完成前不会被确认。
pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

impl KafkaConsumer {
    pub fn new(config: &KafkaConfig) -> Result<Self, AppError> {
        let brokers = config.bootstrap_servers()?;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .create()
            .map_err(|e| AppError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(
            brokers = %brokers,
            group_id = %config.consumer_group,
            "Kafka 消费者已初始化"
        );
        Ok(Self { consumer })
    }

    /// 订阅指定的 topic 列表
    pub fn subscribe(&self, topics: &[&str]) -> Result<(), AppError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| AppError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, "已订阅 Kafka topics");
        Ok(())
    }

    /// 启动消费循环
    ///
    /// 使用 `tokio::select!` 同时监听消息流和关闭信号：
    /// - 消息逐条交给 handler 顺序处理，处理完成后才拉取下一条。
    /// - handler 返回错误时记录日志并登记 offset（跳过该消息），循环继续；
    ///   本层不做重试，也不投递死信。
    /// - 关闭信号变为 `true` 时退出循环，正在执行的 handler 会先自然完成。
    pub async fn start<F, Fut, E>(self, mut shutdown: watch::Receiver<bool>, handler: F)
    where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: std::future::Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        use futures::StreamExt;

        let stream = self.consumer.stream();
        futures::pin_mut!(stream);

        info!("Kafka 消费循环已启动");

        loop {
            tokio::select! {
                // 偏向关闭信号，保证收到关闭时能尽快退出
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("收到关闭信号，Kafka 消费循环退出");
                        break;
                    }
                }

                msg_result = stream.next() => {
                    let Some(msg_result) = msg_result else {
                        warn!("Kafka 消息流意外结束");
                        break;
                    };

                    match msg_result {
                        Ok(borrowed_msg) => {
                            let msg = ConsumerMessage::from_borrowed(&borrowed_msg);
                            let topic = msg.topic.clone();
                            let (partition, offset) = (msg.partition, msg.offset);
                            debug!(
                                topic = %topic,
                                partition,
                                offset,
                                key = ?msg.key,
                                timestamp = ?msg.timestamp,
                                "收到 Kafka 消息"
                            );

                            let disposition = settle(&topic, partition, offset, handler(msg).await);

                            if disposition.stores_offset()
                                && let Err(e) = self.consumer.store_offset_from_message(&borrowed_msg)
                            {
                                warn!(error = %e, partition, offset, "登记 offset 失败");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "接收 Kafka 消息出错");
                        }
                    }
                }
            }
        }
    }
}

/// handler 返回后对单条消息的处置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Processed,
    /// 处理失败，记录后跳过，不重试
    Skipped,
}

impl Disposition {
    /// 指标 `kafka_messages_total` 的 outcome 标签
    pub fn outcome(self) -> &'static str {
        match self {
            Disposition::Processed => "processed",
            Disposition::Skipped => "failed",
        }
    }

    /// 跳过的消息同样登记 offset，分区继续向前消费
    pub fn stores_offset(self) -> bool {
        match self {
            Disposition::Processed | Disposition::Skipped => true,
        }
    }
}

/// 根据 handler 结果决定处置，并记录日志与计数
pub fn settle<E: std::fmt::Display>(
    topic: &str,
    partition: i32,
    offset: i64,
    result: Result<(), E>,
) -> Disposition {
    let disposition = match result {
        Ok(()) => Disposition::Processed,
        Err(e) => {
            error!(
                error = %e,
                topic = %topic,
                partition,
                offset,
                "处理 Kafka 消息失败，跳过该消息"
            );
            Disposition::Skipped
        }
    };

    metrics::counter!(
        "kafka_messages_total",
        "topic" => topic.to_string(),
        "outcome" => disposition.outcome()
    )
    .increment(1);

    disposition
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_constants() {
        assert_eq!(topics::HELP_REQUEST, "help-request");
    }

    #[test]
    fn test_consumer_message_creation() {
        let msg = ConsumerMessage {
            topic: "help-request".to_string(),
            partition: 0,
            offset: 42,
            key: None,
            payload: br#"{"requestCreatorId":42}"#.to_vec(),
            timestamp: Some(1_700_000_000_000),
            headers: HashMap::from([(
                "traceparent".to_string(),
                "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".to_string(),
            )]),
        };

        assert_eq!(msg.topic, "help-request");
        assert_eq!(msg.offset, 42);
        assert!(msg.key.is_none());
        assert_eq!(msg.timestamp, Some(1_700_000_000_000));
        assert!(msg.headers.contains_key("traceparent"));
    }

    #[test]
    fn test_payload_lossy_invalid_utf8() {
        let msg = ConsumerMessage {
            topic: "help-request".to_string(),
            partition: 0,
            offset: 0,
            key: None,
            payload: vec![b'o', b'k', 0xFF],
            timestamp: None,
            headers: HashMap::new(),
        };

        assert_eq!(msg.payload_lossy(), "ok\u{FFFD}");
    }

    #[test]
    fn test_settle_success_stores_offset() {
        let disposition = settle::<String>("help-request", 0, 7, Ok(()));

        assert_eq!(disposition, Disposition::Processed);
        assert_eq!(disposition.outcome(), "processed");
        assert!(disposition.stores_offset());
    }

    #[test]
    fn test_settle_failure_skips_and_stores_offset() {
        let disposition = settle("help-request", 0, 8, Err("推送失败: 503"));

        assert_eq!(disposition, Disposition::Skipped);
        assert_eq!(disposition.outcome(), "failed");
        // 失败的消息不会阻塞后续消息
        assert!(disposition.stores_offset());
    }

    #[test]
    fn test_settle_accepts_app_error() {
        let disposition = settle(
            "help-request",
            3,
            9,
            Err(AppError::Internal("handler panicked".to_string())),
        );
        assert_eq!(disposition, Disposition::Skipped);
    }

    #[test]
    fn test_consumer_rejects_empty_brokers() {
        let config = KafkaConfig {
            brokers: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            KafkaConsumer::new(&config),
            Err(AppError::InvalidConfig { .. })
        ));
    }
}
