use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use domain::{ConnectionId, UserId};

use crate::broadcaster::RealtimeHub;
use crate::clock::Clock;
use crate::ports::{FriendshipDirectory, UserDirectory};
use crate::protocol::{Channel, ServerEvent};

/// 在线状态端口。单进程实现见 [`PresenceRegistry`]，横向扩展时可以换成共享存储。
#[async_trait]
pub trait PresencePort: Send + Sync {
    /// 登记连接；该用户从 0 条变为 1 条连接时返回 true
    async fn register(&self, user_id: UserId, connection_id: ConnectionId) -> bool;

    /// 注销连接；该用户最后一条连接断开时返回 true
    async fn deregister(&self, user_id: UserId, connection_id: ConnectionId) -> bool;

    fn is_online(&self, user_id: UserId) -> bool;
}

pub struct PresenceRegistryDependencies {
    pub friendships: Arc<dyn FriendshipDirectory>,
    pub users: Arc<dyn UserDirectory>,
    pub hub: Arc<dyn RealtimeHub>,
    pub clock: Arc<dyn Clock>,
}

/// 进程内在线表：用户 → 连接集合。
///
/// 集合变更和“是否跨越 0/1 边界”的判断在同一次加锁内完成，
/// 好友通知和数据库镜像在释放锁之后进行。
pub struct PresenceRegistry {
    connections: Mutex<HashMap<UserId, HashSet<ConnectionId>>>,
    mirror_writes: tokio::sync::Mutex<()>,
    deps: PresenceRegistryDependencies,
}

impl PresenceRegistry {
    pub fn new(deps: PresenceRegistryDependencies) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            mirror_writes: tokio::sync::Mutex::new(()),
            deps,
        }
    }

    fn state(&self) -> MutexGuard<'_, HashMap<UserId, HashSet<ConnectionId>>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn connection_count(&self, user_id: UserId) -> usize {
        self.state().get(&user_id).map(HashSet::len).unwrap_or(0)
    }

    fn add(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let mut state = self.state();
        let set = state.entry(user_id).or_default();
        set.insert(connection_id) && set.len() == 1
    }

    fn remove(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let mut state = self.state();
        let Some(set) = state.get_mut(&user_id) else {
            return false;
        };
        if !set.remove(&connection_id) {
            return false;
        }
        if set.is_empty() {
            state.remove(&user_id);
            true
        } else {
            false
        }
    }

    /// 通知好友并更新持久化镜像，失败只记日志
    async fn announce(&self, user_id: UserId, is_online: bool) {
        self.mirror(user_id, is_online).await;

        let friends = match self.deps.friendships.friends_of(user_id).await {
            Ok(friends) => friends,
            Err(err) => {
                tracing::warn!(user_id = %user_id, error = %err, "查询好友失败，跳过在线通知");
                return;
            }
        };

        // 期间状态又翻转过，由后一次转换负责通知
        if self.is_online(user_id) != is_online {
            tracing::debug!(user_id = %user_id, "在线状态已变化，放弃过期通知");
            return;
        }

        for friend in friends {
            let event = ServerEvent::Presence { user_id, is_online };
            if let Err(err) = self.deps.hub.publish(Channel::User(friend), event).await {
                tracing::warn!(user_id = %user_id, friend = %friend, error = %err, "在线通知发送失败");
            }
        }
    }

    /// 镜像写入逐个进行，且只写持锁时仍然成立的状态，
    /// 因此最后落库的总是最后一次转换的结果。
    async fn mirror(&self, user_id: UserId, is_online: bool) {
        let _guard = self.mirror_writes.lock().await;
        if self.is_online(user_id) != is_online {
            tracing::debug!(user_id = %user_id, "在线状态已变化，跳过过期的镜像写入");
            return;
        }
        let now = self.deps.clock.now();
        if let Err(err) = self.deps.users.set_presence(user_id, is_online, now).await {
            tracing::warn!(user_id = %user_id, error = %err, "在线状态写库失败");
        }
    }
}

#[async_trait]
impl PresencePort for PresenceRegistry {
    async fn register(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let came_online = self.add(user_id, connection_id);
        if came_online {
            tracing::info!(user_id = %user_id, "用户上线");
            self.announce(user_id, true).await;
        }
        came_online
    }

    async fn deregister(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let went_offline = self.remove(user_id, connection_id);
        if went_offline {
            tracing::info!(user_id = %user_id, "用户下线");
            self.announce(user_id, false).await;
        }
        went_offline
    }

    fn is_online(&self, user_id: UserId) -> bool {
        self.state().contains_key(&user_id)
    }
}
