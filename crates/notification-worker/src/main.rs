//! 求助通知服务
//!
//! 启动顺序：配置 -> 可观测性 -> 推送凭证 -> FCM 客户端 -> Kafka 消费者。
//! 凭证加载失败直接退出进程。

use std::sync::Arc;

use notification_worker::consumer::HelpRequestConsumer;
use notification_worker::push::{FcmClient, ServiceAccountKey};
use notification_worker::sender::NotificationSender;
use seeforme_shared::config::AppConfig;
use seeforme_shared::observability;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

const SERVICE_NAME: &str = "notification-worker";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(
        environment = %config.environment,
        brokers = %config.kafka.brokers,
        "Starting notification-worker..."
    );

    let key = ServiceAccountKey::from_file(&config.push.credentials_path)?;
    info!(project_id = %key.project_id, "推送凭证已加载");

    let client = FcmClient::new(key, &config.push)?;
    let sender = NotificationSender::new(Arc::new(client));
    let consumer = HelpRequestConsumer::new(&config, sender)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    consumer.run(shutdown_rx).await?;

    info!("notification-worker stopped");
    Ok(())
}

/// 优雅关闭信号处理
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
