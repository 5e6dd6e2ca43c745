//! 集成测试基建：内存网关 + 完整路由 + WebSocket 客户端小工具

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message as TtMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use application::gateway::memory::MemoryPersistenceGateway;
use application::{
    ConnectionRegistry, Gateway, MembershipRelay, MessageRelay, PersistenceGateway,
    PresenceTracker, ReadStateEngine, TypingRelay,
};
use config::JwtConfig;
use domain::{ConversationId, UserId};
use web_api::{router, AppState, JwtService};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct RunningApp {
    pub addr: SocketAddr,
    pub gateway: Arc<MemoryPersistenceGateway>,
    pub jwt: Arc<JwtService>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl RunningApp {
    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/ws?token={}", self.addr, token)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn token(&self, user_id: i64) -> String {
        self.jwt
            .generate_token(UserId::new(user_id), Some(format!("user{user_id}")))
            .expect("token")
    }
}

impl Drop for RunningApp {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// 启动一个挂着内存网关的完整服务。
/// 预置会话 42，成员为用户 1 和用户 2。
pub async fn spawn_app() -> RunningApp {
    let gateway = Arc::new(MemoryPersistenceGateway::new());
    gateway
        .seed_conversation(ConversationId::new(42), [UserId::new(1), UserId::new(2)])
        .await;

    let persistence: Arc<dyn PersistenceGateway> = gateway.clone();
    let wrapped = Gateway::new(persistence, Duration::from_secs(1));

    let registry = Arc::new(ConnectionRegistry::new());
    let presence = Arc::new(PresenceTracker::new());
    let relay = Arc::new(MessageRelay::new(wrapped.clone(), registry.clone()));
    let read_state = Arc::new(ReadStateEngine::new(wrapped.clone(), registry.clone()));
    let typing = Arc::new(TypingRelay::new(registry.clone()));
    let membership = Arc::new(MembershipRelay::new(registry.clone()));
    let jwt = Arc::new(JwtService::new(JwtConfig {
        secret: "integration-test-secret".to_string(),
        expiration_hours: 1,
    }));

    let state = AppState::new(
        registry,
        presence,
        relay,
        read_state,
        typing,
        membership,
        wrapped,
        jwt.clone(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let app = router(state);
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    RunningApp {
        addr,
        gateway,
        jwt,
        shutdown: Some(shutdown_tx),
    }
}

/// 读取下一帧文本事件并解析成 JSON
pub async fn next_json(ws: &mut WsStream) -> serde_json::Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("transport error");
        if let TtMessage::Text(text) = frame {
            return serde_json::from_str(&text).expect("invalid json");
        }
    }
}

/// 跳过无关事件，等到指定类型的事件
pub async fn wait_for_type(ws: &mut WsStream, event_type: &str) -> serde_json::Value {
    loop {
        let value = next_json(ws).await;
        if value["type"] == event_type {
            return value;
        }
    }
}

pub async fn send_json(ws: &mut WsStream, value: serde_json::Value) {
    ws.send(TtMessage::Text(value.to_string().into()))
        .await
        .expect("send");
}
