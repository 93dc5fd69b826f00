//! Firebase Cloud Messaging HTTP v1 客户端

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use seeforme_shared::config::PushConfig;
use seeforme_shared::error::AppError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::credentials::{AccessTokenProvider, ServiceAccountKey};
use super::{PushClient, PushError, PushMessage};
use crate::error::NotificationError;

#[derive(Serialize)]
struct SendRequest<'a> {
    message: &'a PushMessage,
}

#[derive(Deserialize)]
struct SendResponse {
    /// 形如 `projects/{project_id}/messages/{message_id}`
    name: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// FCM HTTP v1 客户端
///
/// 持有连接池与令牌缓存，可在多个处理任务间共享。
pub struct FcmClient {
    http: reqwest::Client,
    send_url: String,
    tokens: AccessTokenProvider,
}

impl FcmClient {
    pub fn new(key: ServiceAccountKey, config: &PushConfig) -> Result<Self, NotificationError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(format!("创建 HTTP 客户端失败: {e}")))?;

        let tokens = AccessTokenProvider::new(&key, http.clone())?;
        let send_url = format!(
            "{}/v1/projects/{}/messages:send",
            config.endpoint.trim_end_matches('/'),
            key.project_id
        );

        Ok(Self {
            http,
            send_url,
            tokens,
        })
    }
}

#[async_trait]
impl PushClient for FcmClient {
    async fn send(&self, message: &PushMessage) -> Result<String, PushError> {
        let token = self.tokens.access_token().await?;

        let response = self
            .http
            .post(&self.send_url)
            .bearer_auth(token)
            .json(&SendRequest { message })
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let body: SendResponse = response
                .json()
                .await
                .map_err(|e| PushError::InvalidResponse(e.to_string()))?;
            debug!(topic = %message.topic, name = %body.name, "FCM 已接受消息");
            return Ok(body.name);
        }

        if status == StatusCode::UNAUTHORIZED {
            warn!("FCM 返回 401，丢弃缓存的访问令牌");
            self.tokens.invalidate().await;
        }

        let body = response.text().await.unwrap_or_default();
        Err(rejection(status, &body))
    }
}

/// 解析 FCM 错误响应体，非标准格式时保留原文
fn rejection(status: StatusCode, body: &str) -> PushError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => PushError::Rejected {
            status: status.as_u16(),
            code: envelope.error.status.unwrap_or_else(|| "UNKNOWN".to_string()),
            message: envelope.error.message,
        },
        Err(_) => PushError::Rejected {
            status: status.as_u16(),
            code: "UNKNOWN".to_string(),
            message: body.to_string(),
        },
    }
}
