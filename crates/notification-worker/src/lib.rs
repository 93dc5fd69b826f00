//! 求助通知服务
//!
//! 从 Kafka 消费求助请求事件，映射为推送 data 负载后通过 Firebase Cloud Messaging
//! 推送到 `help-request` topic 的订阅设备（志愿者端）。

pub mod consumer;
pub mod error;
pub mod event;
pub mod projector;
pub mod push;
pub mod sender;
