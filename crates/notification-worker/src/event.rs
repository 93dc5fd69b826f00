//! 求助请求事件
//!
//! API 服务在用户发起求助时写入 `help-request` topic 的消息体。
//! 上游生产者的编码并不统一：`requestCreatorId` 可能是整数或数字字符串，
//! `createdAt` 可能是 RFC 3339 字符串或 epoch 秒（数字或数字字符串），
//! 这里按宽松规则解码，但字段缺失或为 null 一律视为非法消息。

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::NotificationError;

/// 求助请求事件
///
/// 只有字段值，没有独立身份：同一事件被重复投递时会被当作两条事件处理。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelpRequestEvent {
    #[serde(deserialize_with = "creator_id::deserialize")]
    pub request_creator_id: i64,

    #[serde(with = "instant")]
    pub created_at: DateTime<Utc>,
}

impl HelpRequestEvent {
    pub fn new(request_creator_id: i64, created_at: DateTime<Utc>) -> Self {
        Self {
            request_creator_id,
            created_at,
        }
    }

    /// 从 Kafka 消息体解码，未知字段（如 `question`）被忽略
    ///
    /// 消息体必须是 JSON 对象：按位置排列的数组没有字段名，不算合法事件。
    pub fn from_json_slice(payload: &[u8]) -> Result<Self, NotificationError> {
        let value: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| NotificationError::Deserialization(e.to_string()))?;

        if !value.is_object() {
            return Err(NotificationError::Deserialization(format!(
                "求助事件必须是 JSON 对象，实际为: {value}"
            )));
        }

        serde_json::from_value(value).map_err(|e| NotificationError::Deserialization(e.to_string()))
    }
}

mod creator_id {
    use serde::{Deserialize, Deserializer, de};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Int(i64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        match Repr::deserialize(deserializer)
            .map_err(|_| de::Error::custom("requestCreatorId 必须是整数或数字字符串"))?
        {
            Repr::Int(id) => Ok(id),
            Repr::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| de::Error::custom(format!("requestCreatorId 不是合法整数: {text:?}"))),
        }
    }
}

mod instant {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    use super::render_instant;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Seconds(i64),
        FractionalSeconds(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&render_instant(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let repr = Repr::deserialize(deserializer)
            .map_err(|_| de::Error::custom("createdAt 必须是 RFC 3339 字符串或 epoch 秒"))?;

        let parsed = match repr {
            Repr::Seconds(secs) => DateTime::from_timestamp(secs, 0),
            Repr::FractionalSeconds(secs) => from_fractional_seconds(secs),
            Repr::Text(text) => {
                let text = text.trim();
                match DateTime::parse_from_rfc3339(text) {
                    Ok(dt) => Some(dt.with_timezone(&Utc)),
                    Err(_) => text
                        .parse::<i64>()
                        .ok()
                        .and_then(|secs| DateTime::from_timestamp(secs, 0))
                        .or_else(|| text.parse::<f64>().ok().and_then(from_fractional_seconds)),
                }
            }
        };

        parsed.ok_or_else(|| de::Error::custom("createdAt 无法解析为时间点"))
    }

    fn from_fractional_seconds(secs: f64) -> Option<DateTime<Utc>> {
        if !secs.is_finite() {
            return None;
        }
        let whole = secs.floor();
        let nanos = (((secs - whole) * 1e9).round() as u32).min(999_999_999);
        DateTime::from_timestamp(whole as i64, nanos)
    }
}

/// 时间点的文本形式：UTC、`Z` 后缀，秒的小数部分仅在非零时输出
pub fn render_instant(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
