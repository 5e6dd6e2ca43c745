//! 在线状态跟踪
//!
//! 在线集合由连接注册表的首连接/末连接信号驱动：
//! 用户在线当且仅当注册表里至少有一条该用户的存活连接。
//! 不做任何持久化，进程重启后由客户端重连重建。

use std::collections::HashSet;

use tokio::sync::RwLock;

use domain::UserId;

#[derive(Default)]
pub struct PresenceTracker {
    online: RwLock<HashSet<UserId>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 标记用户上线；返回是否是新上线（之前不在集合里）
    pub async fn set_online(&self, user_id: UserId) -> bool {
        self.online.write().await.insert(user_id)
    }

    /// 标记用户下线；返回之前是否确实在线
    pub async fn set_offline(&self, user_id: UserId) -> bool {
        self.online.write().await.remove(&user_id)
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.online.read().await.contains(&user_id)
    }

    /// 当前完整在线名单，用于回答新连接的初始查询
    pub async fn snapshot(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.online.read().await.iter().copied().collect();
        ids.sort();
        ids
    }
}
