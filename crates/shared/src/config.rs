//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::AppError;
use crate::observability::ObservabilityConfig;

/// Kafka broker 未指定端口时使用的默认端口
const DEFAULT_BROKER_PORT: u16 = 9092;

/// Kafka 配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// 逗号分隔的 broker 地址列表
    pub brokers: String,
    pub consumer_group: String,
    pub auto_offset_reset: String,
    pub session_timeout_ms: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            consumer_group: "help-request-group1".to_string(),
            auto_offset_reset: "earliest".to_string(),
            session_timeout_ms: 10_000,
        }
    }
}

impl KafkaConfig {
    /// 规范化后的 `bootstrap.servers`
    ///
    /// 去掉空白与空项，缺少端口的地址补上 9092。
    pub fn bootstrap_servers(&self) -> Result<String, AppError> {
        let servers: Vec<String> = self
            .brokers
            .split(',')
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(|b| {
                if b.contains(':') {
                    b.to_string()
                } else {
                    format!("{b}:{DEFAULT_BROKER_PORT}")
                }
            })
            .collect();

        if servers.is_empty() {
            return Err(AppError::InvalidConfig {
                field: "kafka.brokers".to_string(),
                message: "至少需要一个 broker 地址".to_string(),
            });
        }

        Ok(servers.join(","))
    }
}

/// 推送服务（Firebase Cloud Messaging）配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// 服务账号密钥文件路径
    pub credentials_path: PathBuf,
    /// FCM API 根地址
    pub endpoint: String,
    pub request_timeout_ms: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            credentials_path: PathBuf::from("config/firebase-service-account.json"),
            endpoint: "https://fcm.googleapis.com".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub kafka: KafkaConfig,
    pub push: PushConfig,
    pub observability: ObservabilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: "notification-worker".to_string(),
            environment: "development".to_string(),
            kafka: KafkaConfig::default(),
            push: PushConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（SEEFORME_ 前缀，段与键之间用双下划线，如 SEEFORME_KAFKA__BROKERS -> kafka.brokers）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("SEEFORME_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        Self::load_from(Path::new(&config_dir), &env, service_name)
    }

    /// 从指定目录加载，环境名由调用方给出
    pub fn load_from(
        config_dir: &Path,
        env: &str,
        service_name: &str,
    ) -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{env}.toml"))).required(false))
            .add_source(
                File::from(config_dir.join(format!("{service_name}.toml"))).required(false),
            )
            .add_source(
                Environment::with_prefix("SEEFORME")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
