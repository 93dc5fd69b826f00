//! 服务账号凭证与访问令牌
//!
//! 用服务账号私钥签发 RS256 JWT，向 Google OAuth2 端点换取访问令牌（JWT bearer grant）。
//! 令牌在过期前 60 秒内视为失效，届时重新换取。

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::PushError;
use crate::error::NotificationError;

const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN_SECS: i64 = 60;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// Firebase 控制台导出的服务账号密钥（JSON）
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type", default)]
    pub key_type: Option<String>,
    pub project_id: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

// 私钥不进日志
impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("private_key_id", &self.private_key_id)
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    /// 读取并解析密钥文件
    pub fn from_file(path: &Path) -> Result<Self, NotificationError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            NotificationError::Credential(format!("读取密钥文件 {} 失败: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, NotificationError> {
        let key: Self = serde_json::from_str(raw)
            .map_err(|e| NotificationError::Credential(format!("密钥文件格式错误: {e}")))?;

        if let Some(key_type) = &key.key_type
            && key_type != "service_account"
        {
            return Err(NotificationError::Credential(format!(
                "不支持的凭证类型: {key_type}"
            )));
        }

        for (field, value) in [
            ("project_id", &key.project_id),
            ("client_email", &key.client_email),
            ("private_key", &key.private_key),
        ] {
            if value.trim().is_empty() {
                return Err(NotificationError::Credential(format!("字段 {field} 为空")));
            }
        }

        Ok(key)
    }
}

#[derive(Serialize)]
struct GrantClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > now
    }
}

/// 访问令牌提供者，内部缓存当前令牌
pub(super) struct AccessTokenProvider {
    client_email: String,
    private_key_id: Option<String>,
    token_uri: String,
    encoding_key: EncodingKey,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl AccessTokenProvider {
    /// 私钥在这里解析，格式错误在启动期暴露
    pub(super) fn new(
        key: &ServiceAccountKey,
        http: reqwest::Client,
    ) -> Result<Self, NotificationError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| NotificationError::Credential(format!("私钥无法解析: {e}")))?;

        Ok(Self {
            client_email: key.client_email.clone(),
            private_key_id: key.private_key_id.clone(),
            token_uri: key.token_uri.clone(),
            encoding_key,
            http,
            cached: Mutex::new(None),
        })
    }

    /// 返回可用的访问令牌，必要时重新换取
    pub(super) async fn access_token(&self) -> Result<String, PushError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && token.is_fresh(Utc::now())
        {
            return Ok(token.token.clone());
        }

        let fresh = self.fetch().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    /// 丢弃缓存的令牌（推送服务返回 401 时调用）
    pub(super) async fn invalidate(&self) {
        self.cached.lock().await.take();
    }

    async fn fetch(&self) -> Result<CachedToken, PushError> {
        let now = Utc::now();
        let claims = GrantClaims {
            iss: &self.client_email,
            scope: FCM_SCOPE,
            aud: &self.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.private_key_id.clone();

        let assertion = jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .map_err(|e| PushError::Auth(format!("签发 JWT 失败: {e}")))?;

        let response = self
            .http
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PushError::Auth(format!("status={}, body={body}", status.as_u16())));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| PushError::InvalidResponse(e.to_string()))?;

        debug!(expires_in = token.expires_in, "已换取新的访问令牌");

        Ok(CachedToken {
            token: token.access_token,
            expires_at: now + Duration::seconds(token.expires_in),
        })
    }
}
