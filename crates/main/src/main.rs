//! 主应用程序入口
//!
//! 装配存储、离线队列、事件日志、Hub 和限流器，启动 Axum 服务；
//! 收到 Ctrl-C 后停止接收请求，等待后台投递任务完成再退出。

use std::{net::SocketAddr, sync::Arc};

use application::{
    DeliveryPolicy, DeliveryService, DeliveryServiceDependencies, EventPublisher, Hub,
    NoopEventPublisher, RateLimiter, SystemClock,
};
use config::AppConfig;
use infrastructure::{create_pg_pool, KafkaEventPublisher, PgStorage, RedisOfflineQueue, MIGRATOR};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::load()?;
    tracing::info!(config = %cfg.sanitized(), "配置加载完成");

    let pg_pool = create_pg_pool(&cfg.database.url, cfg.database.max_connections).await?;
    MIGRATOR.run(&pg_pool).await?;
    let storage = PgStorage::new(pg_pool);

    let offline_queue = RedisOfflineQueue::connect(
        &cfg.redis.url,
        cfg.redis.offline_key_prefix.clone(),
        cfg.redis.offline_ttl(),
    )
    .await?;

    let event_publisher: Arc<dyn EventPublisher> = if cfg.kafka.enabled {
        Arc::new(KafkaEventPublisher::new(&cfg.kafka)?)
    } else {
        tracing::warn!("Kafka 未启用，消息不会复制到事件日志");
        Arc::new(NoopEventPublisher)
    };

    let (hub, hub_loop) = Hub::start(cfg.websocket.hub_queue_capacity);

    let shutdown = CancellationToken::new();
    let rate_limiter = if cfg.rate_limit.enabled {
        let limiter = Arc::new(RateLimiter::from_config(&cfg.rate_limit));
        limiter.spawn_sweeper(cfg.rate_limit.sweep_interval(), shutdown.clone());
        Some(limiter)
    } else {
        None
    };

    let delivery_service = DeliveryService::new(DeliveryServiceDependencies {
        user_directory: storage.user_directory.clone(),
        conversation_repository: storage.conversation_repository.clone(),
        message_repository: storage.message_repository.clone(),
        offline_queue: Arc::new(offline_queue),
        event_publisher,
        hub: Arc::new(hub),
        clock: Arc::new(SystemClock),
        policy: DeliveryPolicy::from_config(&cfg.delivery),
    });

    let jwt_service = Arc::new(JwtService::new(cfg.jwt.clone()));
    let state = AppState::new(
        delivery_service.clone(),
        jwt_service,
        rate_limiter,
        cfg.websocket.clone(),
    );

    // 启动 Web 服务器
    let app = router(state);
    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("实时投递服务启动在 http://{}", addr);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    delivery_service.shutdown().await;
    shutdown.cancel();
    hub_loop.abort();
    tracing::info!("服务已停止");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "监听退出信号失败");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到退出信号，开始优雅关闭");
}
