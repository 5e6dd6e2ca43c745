//! 主应用程序入口
//!
//! 启动实时消息中继服务。

use std::sync::Arc;
use std::time::Duration;

use application::{
    ConnectionRegistry, Gateway, MembershipRelay, MessageRelay, PersistenceGateway,
    PresenceTracker, ReadStateEngine, TypingRelay,
};
use config::AppConfig;
use infrastructure::{create_pg_pool, PgPersistenceGateway};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env_with_defaults();

    tracing::info!(
        "连接数据库: {}",
        config.database.url.split('@').next_back().unwrap_or("unknown")
    );
    let pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;

    // 持久化网关：所有调用统一走超时包装
    let persistence: Arc<dyn PersistenceGateway> = Arc::new(PgPersistenceGateway::new(pool));
    let gateway = Gateway::new(
        persistence,
        Duration::from_millis(config.gateway.timeout_ms),
    );

    // 进程内共享状态与各组件
    let registry = Arc::new(ConnectionRegistry::new());
    let presence = Arc::new(PresenceTracker::new());
    let relay = Arc::new(MessageRelay::new(gateway.clone(), registry.clone()));
    let read_state = Arc::new(ReadStateEngine::new(gateway.clone(), registry.clone()));
    let typing = Arc::new(TypingRelay::new(registry.clone()));
    let membership = Arc::new(MembershipRelay::new(registry.clone()));
    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));

    let state = AppState::new(
        registry,
        presence,
        relay,
        read_state,
        typing,
        membership,
        gateway,
        jwt_service,
    );

    // 启动 Web 服务器
    let app = router(state);
    let listener =
        tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;

    tracing::info!(
        "实时消息服务启动在 http://{}:{}",
        config.server.host,
        config.server.port
    );
    axum::serve(listener, app).await?;

    Ok(())
}
