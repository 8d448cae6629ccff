//! 主应用程序入口
//!
//! 加载配置、装配存储后端与实时分发中心，启动 Axum 服务。

use std::sync::Arc;

use anyhow::Context;
use application::{MemoryDirectory, MemoryStorage, MonotonicClock};
use config::{AppConfig, StorageBackend};
use infrastructure::{DataUrlUploader, InMemoryRealtimeHub, Infrastructure};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService, StorageBackends};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("加载配置失败")?;
    config.validate().context("配置校验失败")?;

    let backends = storage_backends(&config).await?;
    let jwt_service = JwtService::new(config.jwt.clone());
    let uploader = DataUrlUploader::new(config.chat.max_upload_bytes);

    let state = AppState::assemble(
        backends,
        Arc::new(InMemoryRealtimeHub::new()),
        Arc::new(MonotonicClock::new()),
        config.chat.clone(),
        Arc::new(jwt_service),
        Arc::new(uploader),
    );

    let app = router(state);
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("无法监听 {addr}"))?;

    tracing::info!("聊天服务启动在 http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("聊天服务已停止");
    Ok(())
}

async fn storage_backends(config: &AppConfig) -> anyhow::Result<StorageBackends> {
    match config.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("使用内存存储，重启后数据丢失，用户目录为空");
            let storage = Arc::new(MemoryStorage::new());
            let directory = Arc::new(MemoryDirectory::new());
            Ok(StorageBackends {
                rooms: storage.clone(),
                messages: storage,
                friendships: directory.clone(),
                users: directory,
            })
        }
        StorageBackend::Postgres => {
            tracing::info!(
                "连接数据库: {}",
                config.database.url.split('@').next_back().unwrap_or("unknown")
            );
            let infra = Infrastructure::connect(&config.database)
                .await
                .context("初始化数据库失败")?;
            Ok(StorageBackends {
                rooms: infra.room_repository(),
                messages: infra.message_repository(),
                friendships: infra.friendships(),
                users: infra.users(),
            })
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听退出信号");
        return;
    }
    tracing::info!("收到退出信号，开始关闭");
}
