//! 推送数据映射
//!
//! FCM data 消息只接受字符串到字符串的映射。这里借助事件自身的 serde 表示做扁平化：
//! 键即线上字段名，数字按十进制输出，时间点已由事件序列化为 RFC 3339 文本。

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::error::NotificationError;

/// 推送 data 负载
pub type NotificationPayload = BTreeMap<String, String>;

/// 将记录扁平化为推送 data 负载
///
/// 记录必须序列化为 JSON 对象，且每个字段都是标量（数字、字符串、布尔）；
/// 嵌套结构或 null 无法表示为单个字符串，返回 `Serialization` 错误。
pub fn project<T: Serialize + ?Sized>(record: &T) -> Result<NotificationPayload, NotificationError> {
    let value = serde_json::to_value(record)
        .map_err(|e| NotificationError::Serialization(e.to_string()))?;

    let fields = match value {
        Value::Object(fields) => fields,
        other => {
            return Err(NotificationError::Serialization(format!(
                "期望 JSON 对象，实际为 {other}"
            )));
        }
    };

    fields
        .into_iter()
        .map(|(key, value)| {
            let rendered = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(NotificationError::Serialization(format!(
                        "字段 {key} 不是标量: {other}"
                    )));
                }
            };
            Ok((key, rendered))
        })
        .collect()
}
