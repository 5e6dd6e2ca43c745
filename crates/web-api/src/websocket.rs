//! WebSocket 处理器
//!
//! 连接升级时做一次凭证校验，之后该连接被信任。准入流程：
//! 注册连接 → 首连接则广播上线 → 从网关拉取会话并自动入房 →
//! 推送 joined_conversations。断开时 remove 在唯一退出路径上
//! 精确执行一次，末连接才广播下线。

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::Response,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use application::SendMessageRequest;
use domain::{ConnectionId, ConversationId, ServerEvent, UserId};

use crate::protocol::ClientRequest;
use crate::AppState;

/// WebSocket连接查询参数
#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    /// JWT access token
    pub token: String,
}

/// 处理WebSocket连接升级
pub async fn handle_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WebSocketQuery>,
) -> Result<Response, StatusCode> {
    if query.token.is_empty() {
        warn!("WebSocket upgrade failed: empty token");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let user_id = match state.jwt_service.verify_token(&query.token) {
        Ok(user_id) => user_id,
        Err(_) => {
            warn!("WebSocket upgrade failed: invalid token");
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    info!(%user_id, "WebSocket upgrade accepted");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user_id, state)))
}

/// 单条连接的完整生命周期
async fn handle_socket(socket: WebSocket, user_id: UserId, state: AppState) {
    let connection_id = ConnectionId::generate();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ServerEvent>();

    let first = state.registry.admit(connection_id, user_id, event_tx).await;
    if first && state.presence.set_online(user_id).await {
        state
            .registry
            .broadcast_all(ServerEvent::Presence {
                user_id,
                online: true,
            })
            .await;
    }

    // 自动订阅该用户所属的全部会话房间。
    // 网关失败时不入任何房间，推一个空列表，连接依旧可用。
    let conversation_ids = match state.gateway.list_conversations_for_user(user_id).await {
        Ok(ids) => {
            for &conversation_id in &ids {
                state.registry.subscribe(connection_id, conversation_id).await;
            }
            ids
        }
        Err(err) => {
            warn!(%user_id, error = %err, "auto-subscription failed");
            Vec::new()
        }
    };
    state
        .registry
        .send_to_connection(
            connection_id,
            ServerEvent::JoinedConversations { conversation_ids },
        )
        .await;

    let (mut sender, mut receiver) = socket.split();

    // 发送任务：事件序列化后写入socket
    let send_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let payload = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize websocket payload");
                    continue;
                }
            };
            if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                break;
            }
        }
        debug!(%connection_id, "send task finished");
    });

    // 接收任务：按到达顺序逐条处理该连接的请求
    let recv_state = state.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => {
                    dispatch(&recv_state, connection_id, user_id, text.as_str()).await;
                }
                Ok(WsMessage::Close(_)) => {
                    info!(%connection_id, "WebSocket closed by client");
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    debug!(%connection_id, error = %err, "WebSocket transport error");
                    break;
                }
            }
        }
        debug!(%connection_id, "receive task finished");
    });

    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }

    // 清理连接；remove 以 ConnectionId 为键，和同一用户重连的准入互不干扰
    if let Some(removed) = state.registry.remove(connection_id).await {
        if removed.last_connection && state.presence.set_offline(user_id).await {
            state
                .registry
                .broadcast_all(ServerEvent::Presence {
                    user_id,
                    online: false,
                })
                .await;
        }
    }
    info!(%connection_id, %user_id, "WebSocket连接已断开，注册表已清理");
}

/// 把一条客户端请求路由到对应组件。
/// 请求级错误只回给这条连接，从不广播。
async fn dispatch(state: &AppState, connection_id: ConnectionId, user_id: UserId, text: &str) {
    let request: ClientRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(err) => {
            debug!(%connection_id, error = %err, "unrecognized client request");
            state
                .registry
                .send_to_connection(
                    connection_id,
                    ServerEvent::Error {
                        code: "INVALID_ARGUMENT".to_string(),
                        message: "unrecognized request".to_string(),
                    },
                )
                .await;
            return;
        }
    };

    match request {
        ClientRequest::SendMessage {
            conversation_id,
            body,
            attachment_id,
            client_msg_id,
        } => {
            let request = SendMessageRequest {
                conversation_id: ConversationId::new(conversation_id),
                body,
                attachment_id,
                client_msg_id: client_msg_id.clone(),
            };
            let ack = match state.relay.send_message(user_id, request).await {
                Ok(message) => ServerEvent::SendAck {
                    ok: true,
                    message: Some(message),
                    client_msg_id,
                    error: None,
                },
                Err(err) => ServerEvent::SendAck {
                    ok: false,
                    message: None,
                    client_msg_id,
                    error: Some(err.to_string()),
                },
            };
            state.registry.send_to_connection(connection_id, ack).await;
        }
        ClientRequest::MarkSeen { conversation_id } => {
            let conversation_id = ConversationId::new(conversation_id);
            match state.read_state.mark_seen(user_id, conversation_id).await {
                Ok(outcome) => {
                    state
                        .registry
                        .send_to_connection(
                            connection_id,
                            ServerEvent::SeenAck {
                                conversation_id: outcome.conversation_id,
                                updated: outcome.updated,
                            },
                        )
                        .await;
                }
                Err(err) => send_error(state, connection_id, &err).await,
            }
        }
        ClientRequest::Typing {
            conversation_id,
            is_typing,
        } => {
            let conversation_id = ConversationId::new(conversation_id);
            if let Err(err) = state
                .typing
                .set_typing(connection_id, user_id, conversation_id, is_typing)
                .await
            {
                send_error(state, connection_id, &err).await;
            }
        }
        ClientRequest::JoinConversation { conversation_id } => {
            state
                .membership
                .join_conversation(connection_id, ConversationId::new(conversation_id))
                .await;
        }
        ClientRequest::WhoIsOnline => {
            let user_ids = state.presence.snapshot().await;
            state
                .registry
                .send_to_connection(connection_id, ServerEvent::OnlineList { user_ids })
                .await;
        }
        ClientRequest::GroupCreated {
            conversation_id,
            member_ids,
        } => {
            let members: Vec<UserId> = member_ids.into_iter().map(UserId::new).collect();
            state
                .membership
                .group_created(
                    connection_id,
                    ConversationId::new(conversation_id),
                    &members,
                )
                .await;
        }
        ClientRequest::MemberAdded {
            conversation_id,
            user_id: member,
        } => {
            state
                .membership
                .member_added(ConversationId::new(conversation_id), UserId::new(member))
                .await;
        }
        ClientRequest::MemberRemoved {
            conversation_id,
            user_id: member,
        } => {
            state
                .membership
                .member_removed(ConversationId::new(conversation_id), UserId::new(member))
                .await;
        }
        ClientRequest::UserLeftGroup { conversation_id } => {
            state
                .membership
                .user_left_group(connection_id, ConversationId::new(conversation_id))
                .await;
        }
        ClientRequest::Ping => {
            state
                .registry
                .send_to_connection(connection_id, ServerEvent::Pong)
                .await;
        }
    }
}

async fn send_error(
    state: &AppState,
    connection_id: ConnectionId,
    err: &application::ApplicationError,
) {
    state
        .registry
        .send_to_connection(
            connection_id,
            ServerEvent::Error {
                code: err.code().to_string(),
                message: err.to_string(),
            },
        )
        .await;
}
