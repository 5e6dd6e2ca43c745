//! 连接注册表
//!
//! 维护 用户 ↔ 连接 与 会话 ↔ 连接 两个方向的映射，并持有每条连接的
//! 事件发送端。这是所有请求路径共享的唯一可变状态，全部修改都是 O(1)
//! 的内存操作，锁从不跨越任何 await 点被持有。
//!
//! 首连接/末连接的判定必须和映射修改原子完成，所以这里用一把
//! RwLock 罩住整个内部结构，而不是每张表一把锁。

use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use domain::{ConnectionId, ConversationId, ServerEvent, UserId};

/// 每条连接的事件发送端；接收端由 web-api 层的发送任务持有
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

struct ConnectionEntry {
    user_id: UserId,
    rooms: HashSet<ConversationId>,
    sender: EventSender,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    user_connections: HashMap<UserId, HashSet<ConnectionId>>,
    room_connections: HashMap<ConversationId, HashSet<ConnectionId>>,
}

/// 断开连接后的结算信息
#[derive(Debug, Clone, Copy)]
pub struct RemovedConnection {
    pub user_id: UserId,
    /// 这是否是该用户最后一条存活连接
    pub last_connection: bool,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 准入一条已认证的连接；返回这是否是该用户的第一条连接
    pub async fn admit(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        sender: EventSender,
    ) -> bool {
        let mut inner = self.inner.write().await;
        inner.connections.insert(
            connection_id,
            ConnectionEntry {
                user_id,
                rooms: HashSet::new(),
                sender,
            },
        );
        let connections = inner.user_connections.entry(user_id).or_default();
        connections.insert(connection_id);
        let first = connections.len() == 1;
        debug!(%connection_id, %user_id, first, "connection admitted");
        first
    }

    /// 把连接加入会话房间；幂等，未知连接直接忽略
    pub async fn subscribe(&self, connection_id: ConnectionId, conversation_id: ConversationId) {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.connections.get_mut(&connection_id) else {
            return;
        };
        entry.rooms.insert(conversation_id);
        inner
            .room_connections
            .entry(conversation_id)
            .or_default()
            .insert(connection_id);
    }

    /// 把某个用户的全部存活连接加入会话房间
    pub async fn subscribe_user(&self, user_id: UserId, conversation_id: ConversationId) {
        let mut inner = self.inner.write().await;
        let ids: Vec<ConnectionId> = inner
            .user_connections
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for id in ids {
            if let Some(entry) = inner.connections.get_mut(&id) {
                entry.rooms.insert(conversation_id);
            }
            inner
                .room_connections
                .entry(conversation_id)
                .or_default()
                .insert(id);
        }
    }

    pub async fn unsubscribe(&self, connection_id: ConnectionId, conversation_id: ConversationId) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.connections.get_mut(&connection_id) {
            entry.rooms.remove(&conversation_id);
        }
        if let Some(room) = inner.room_connections.get_mut(&conversation_id) {
            room.remove(&connection_id);
            if room.is_empty() {
                inner.room_connections.remove(&conversation_id);
            }
        }
    }

    /// 成员资格被外部撤销时使用：把该用户的所有连接移出房间
    pub async fn unsubscribe_user(&self, user_id: UserId, conversation_id: ConversationId) {
        let mut inner = self.inner.write().await;
        let ids: Vec<ConnectionId> = inner
            .user_connections
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for id in &ids {
            if let Some(entry) = inner.connections.get_mut(id) {
                entry.rooms.remove(&conversation_id);
            }
        }
        if let Some(room) = inner.room_connections.get_mut(&conversation_id) {
            for id in &ids {
                room.remove(id);
            }
            if room.is_empty() {
                inner.room_connections.remove(&conversation_id);
            }
        }
    }

    /// 断开连接：从所有房间和用户映射里摘除。
    /// 以 ConnectionId 为键精确执行一次，不会和同一用户重连的准入竞争。
    pub async fn remove(&self, connection_id: ConnectionId) -> Option<RemovedConnection> {
        let mut inner = self.inner.write().await;
        let entry = inner.connections.remove(&connection_id)?;
        for conversation_id in &entry.rooms {
            if let Some(room) = inner.room_connections.get_mut(conversation_id) {
                room.remove(&connection_id);
                if room.is_empty() {
                    inner.room_connections.remove(conversation_id);
                }
            }
        }
        let mut last_connection = false;
        if let Some(connections) = inner.user_connections.get_mut(&entry.user_id) {
            connections.remove(&connection_id);
            if connections.is_empty() {
                inner.user_connections.remove(&entry.user_id);
                last_connection = true;
            }
        }
        debug!(%connection_id, user_id = %entry.user_id, last_connection, "connection removed");
        Some(RemovedConnection {
            user_id: entry.user_id,
            last_connection,
        })
    }

    pub async fn connections_of(&self, user_id: UserId) -> Vec<ConnectionId> {
        let inner = self.inner.read().await;
        inner
            .user_connections
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn connections_in(&self, conversation_id: ConversationId) -> Vec<ConnectionId> {
        let inner = self.inner.read().await;
        inner
            .room_connections
            .get(&conversation_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn is_subscribed(
        &self,
        connection_id: ConnectionId,
        conversation_id: ConversationId,
    ) -> bool {
        let inner = self.inner.read().await;
        inner
            .connections
            .get(&connection_id)
            .map(|entry| entry.rooms.contains(&conversation_id))
            .unwrap_or(false)
    }

    /// 房间里是否有属于其他用户的连接（投递提示用）
    pub async fn has_other_member_connected(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> bool {
        let inner = self.inner.read().await;
        let Some(room) = inner.room_connections.get(&conversation_id) else {
            return false;
        };
        room.iter().any(|id| {
            inner
                .connections
                .get(id)
                .map(|entry| entry.user_id != user_id)
                .unwrap_or(false)
        })
    }

    /// 发送到单条连接。接收端已关闭时直接跳过，不重试也不上抛。
    pub async fn send_to_connection(&self, connection_id: ConnectionId, event: ServerEvent) {
        let sender = {
            let inner = self.inner.read().await;
            inner
                .connections
                .get(&connection_id)
                .map(|entry| entry.sender.clone())
        };
        if let Some(sender) = sender {
            if sender.send(event).is_err() {
                debug!(%connection_id, "event dropped: connection already closed");
            }
        }
    }

    /// 发送到某个用户的全部连接（多设备同步）
    pub async fn send_to_user(&self, user_id: UserId, event: ServerEvent) {
        let senders = {
            let inner = self.inner.read().await;
            inner
                .user_connections
                .get(&user_id)
                .map(|set| {
                    set.iter()
                        .filter_map(|id| inner.connections.get(id))
                        .map(|entry| entry.sender.clone())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        };
        for sender in senders {
            let _ = sender.send(event.clone());
        }
    }

    /// 发送到会话房间内的所有连接；`except` 用于排除发起方自己的连接
    pub async fn send_to_room(
        &self,
        conversation_id: ConversationId,
        event: ServerEvent,
        except: Option<ConnectionId>,
    ) {
        let senders = {
            let inner = self.inner.read().await;
            inner
                .room_connections
                .get(&conversation_id)
                .map(|set| {
                    set.iter()
                        .filter(|&&id| Some(id) != except)
                        .filter_map(|id| inner.connections.get(id))
                        .map(|entry| entry.sender.clone())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        };
        for sender in senders {
            let _ = sender.send(event.clone());
        }
    }

    /// 发送到进程内的每一条连接（在线状态变更用）
    pub async fn broadcast_all(&self, event: ServerEvent) {
        let senders = {
            let inner = self.inner.read().await;
            inner
                .connections
                .values()
                .map(|entry| entry.sender.clone())
                .collect::<Vec<_>>()
        };
        for sender in senders {
            let _ = sender.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (EventSender, mpsc::UnboundedReceiver<ServerEvent>) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn admit_reports_first_connection_only_once() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new(1);
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();

        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        assert!(registry.admit(a, user, tx1).await);
        assert!(!registry.admit(b, user, tx2).await);
        assert_eq!(registry.connections_of(user).await.len(), 2);
    }

    #[tokio::test]
    async fn remove_reports_last_connection_exactly_once() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new(1);
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();

        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        registry.admit(a, user, tx1).await;
        registry.admit(b, user, tx2).await;

        let removed = registry.remove(a).await.unwrap();
        assert!(!removed.last_connection);
        let removed = registry.remove(b).await.unwrap();
        assert!(removed.last_connection);

        // 重复移除是安全的
        assert!(registry.remove(b).await.is_none());
    }

    #[tokio::test]
    async fn remove_detaches_connection_from_rooms() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new(1);
        let conversation = ConversationId::new(42);
        let (tx, _rx) = channel();

        let conn = ConnectionId::generate();
        registry.admit(conn, user, tx).await;
        registry.subscribe(conn, conversation).await;
        assert_eq!(registry.connections_in(conversation).await.len(), 1);

        registry.remove(conn).await;
        assert!(registry.connections_in(conversation).await.is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_user_clears_every_device() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new(1);
        let conversation = ConversationId::new(42);
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();

        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        registry.admit(a, user, tx1).await;
        registry.admit(b, user, tx2).await;
        registry.subscribe(a, conversation).await;
        registry.subscribe(b, conversation).await;

        registry.unsubscribe_user(user, conversation).await;
        assert!(registry.connections_in(conversation).await.is_empty());
        assert!(!registry.is_subscribed(a, conversation).await);
        assert!(!registry.is_subscribed(b, conversation).await);
    }

    #[tokio::test]
    async fn send_to_room_respects_exclusion() {
        let registry = ConnectionRegistry::new();
        let conversation = ConversationId::new(42);
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();

        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        registry.admit(a, UserId::new(1), tx1).await;
        registry.admit(b, UserId::new(2), tx2).await;
        registry.subscribe(a, conversation).await;
        registry.subscribe(b, conversation).await;

        registry
            .send_to_room(
                conversation,
                ServerEvent::GroupUpdated {
                    conversation_id: conversation,
                },
                Some(a),
            )
            .await;

        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn closed_receiver_is_skipped_silently() {
        let registry = ConnectionRegistry::new();
        let conversation = ConversationId::new(42);
        let (tx1, rx1) = channel();
        let (tx2, mut rx2) = channel();

        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        registry.admit(a, UserId::new(1), tx1).await;
        registry.admit(b, UserId::new(2), tx2).await;
        registry.subscribe(a, conversation).await;
        registry.subscribe(b, conversation).await;

        drop(rx1);
        registry
            .send_to_room(
                conversation,
                ServerEvent::GroupUpdated {
                    conversation_id: conversation,
                },
                None,
            )
            .await;
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn has_other_member_connected_ignores_own_devices() {
        let registry = ConnectionRegistry::new();
        let conversation = ConversationId::new(42);
        let user = UserId::new(1);
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();

        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        registry.admit(a, user, tx1).await;
        registry.admit(b, user, tx2).await;
        registry.subscribe(a, conversation).await;
        registry.subscribe(b, conversation).await;

        // 只有自己的设备在房间里
        assert!(
            !registry
                .has_other_member_connected(conversation, user)
                .await
        );

        let (tx3, _rx3) = channel();
        let c = ConnectionId::generate();
        registry.admit(c, UserId::new(2), tx3).await;
        registry.subscribe(c, conversation).await;
        assert!(
            registry
                .has_other_member_connected(conversation, user)
                .await
        );
    }
}
