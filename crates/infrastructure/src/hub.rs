//! 进程内实时分发中心
//!
//! 维护连接、用户、频道三者之间的映射，并把服务端事件扇出到各连接的出站队列。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use application::{BroadcastError, Channel, RealtimeHub, ServerEvent};
use async_trait::async_trait;
use domain::{ConnectionId, UserId};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

struct ConnectionSlot {
    user_id: UserId,
    sender: mpsc::UnboundedSender<ServerEvent>,
    channels: HashSet<Channel>,
}

/// 锁顺序固定为 connections → user_connections → channel_connections
#[derive(Clone, Default)]
pub struct InMemoryRealtimeHub {
    /// 连接存储
    connections: Arc<RwLock<HashMap<ConnectionId, ConnectionSlot>>>,
    /// 用户到连接的映射
    user_connections: Arc<RwLock<HashMap<UserId, HashSet<ConnectionId>>>>,
    /// 频道到连接的映射
    channel_connections: Arc<RwLock<HashMap<Channel, HashSet<ConnectionId>>>>,
}

impl InMemoryRealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn channel_size(&self, channel: Channel) -> usize {
        self.channel_connections
            .read()
            .await
            .get(&channel)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    async fn fan_out(
        &self,
        channel: Channel,
        except: Option<ConnectionId>,
        event: ServerEvent,
    ) -> Result<(), BroadcastError> {
        let connections = self.connections.read().await;
        let channel_connections = self.channel_connections.read().await;
        let Some(targets) = channel_connections.get(&channel) else {
            debug!("频道 {:?} 没有订阅者，跳过 {}", channel, event.name());
            return Ok(());
        };

        let mut delivered = 0usize;
        for connection_id in targets {
            if Some(*connection_id) == except {
                continue;
            }
            let Some(slot) = connections.get(connection_id) else {
                continue;
            };
            // 接收端已关闭说明连接正在注销，丢弃即可
            if slot.sender.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!("连接 {} 的出站队列已关闭", connection_id);
            }
        }
        debug!("{} 投递到 {:?} 的 {} 条连接", event.name(), channel, delivered);
        Ok(())
    }
}

#[async_trait]
impl RealtimeHub for InMemoryRealtimeHub {
    async fn register(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
    ) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        {
            let mut connections = self.connections.write().await;
            connections.insert(
                connection_id,
                ConnectionSlot {
                    user_id,
                    sender,
                    channels: HashSet::new(),
                },
            );
        }
        {
            let mut user_connections = self.user_connections.write().await;
            user_connections
                .entry(user_id)
                .or_default()
                .insert(connection_id);
        }

        info!("连接 {} 已登记，用户 {}", connection_id, user_id);
        receiver
    }

    async fn unregister(&self, connection_id: ConnectionId) {
        let slot = {
            let mut connections = self.connections.write().await;
            match connections.remove(&connection_id) {
                Some(slot) => slot,
                None => {
                    debug!("连接 {} 已经注销", connection_id);
                    return;
                }
            }
        };

        {
            let mut user_connections = self.user_connections.write().await;
            if let Some(owned) = user_connections.get_mut(&slot.user_id) {
                owned.remove(&connection_id);
                if owned.is_empty() {
                    user_connections.remove(&slot.user_id);
                }
            }
        }

        {
            let mut channel_connections = self.channel_connections.write().await;
            for channel in &slot.channels {
                if let Some(members) = channel_connections.get_mut(channel) {
                    members.remove(&connection_id);
                    if members.is_empty() {
                        channel_connections.remove(channel);
                    }
                }
            }
        }

        info!("连接 {} 已注销，用户 {}", connection_id, slot.user_id);
    }

    async fn bind(
        &self,
        connection_id: ConnectionId,
        channel: Channel,
    ) -> Result<(), BroadcastError> {
        let mut connections = self.connections.write().await;
        let slot = connections
            .get_mut(&connection_id)
            .ok_or(BroadcastError::UnknownConnection(connection_id))?;
        slot.channels.insert(channel);

        let mut channel_connections = self.channel_connections.write().await;
        channel_connections
            .entry(channel)
            .or_default()
            .insert(connection_id);
        debug!("连接 {} 订阅 {:?}", connection_id, channel);
        Ok(())
    }

    async fn bind_user(&self, user_id: UserId, channel: Channel) -> Result<(), BroadcastError> {
        let mut connections = self.connections.write().await;
        let user_connections = self.user_connections.read().await;
        let Some(owned) = user_connections.get(&user_id) else {
            return Ok(());
        };

        let mut channel_connections = self.channel_connections.write().await;
        let members = channel_connections.entry(channel).or_default();
        for connection_id in owned {
            if let Some(slot) = connections.get_mut(connection_id) {
                slot.channels.insert(channel);
                members.insert(*connection_id);
            }
        }
        debug!("用户 {} 的 {} 条连接订阅 {:?}", user_id, owned.len(), channel);
        Ok(())
    }

    async fn unbind_user(&self, user_id: UserId, channel: Channel) -> Result<(), BroadcastError> {
        let mut connections = self.connections.write().await;
        let user_connections = self.user_connections.read().await;
        let Some(owned) = user_connections.get(&user_id) else {
            return Ok(());
        };

        let mut channel_connections = self.channel_connections.write().await;
        for connection_id in owned {
            if let Some(slot) = connections.get_mut(connection_id) {
                slot.channels.remove(&channel);
            }
        }
        if let Some(members) = channel_connections.get_mut(&channel) {
            members.retain(|id| !owned.contains(id));
            if members.is_empty() {
                channel_connections.remove(&channel);
            }
        }
        debug!("用户 {} 退订 {:?}", user_id, channel);
        Ok(())
    }

    async fn unbind_channel(&self, channel: Channel) -> Result<(), BroadcastError> {
        let mut connections = self.connections.write().await;
        let mut channel_connections = self.channel_connections.write().await;
        if let Some(members) = channel_connections.remove(&channel) {
            for connection_id in &members {
                if let Some(slot) = connections.get_mut(connection_id) {
                    slot.channels.remove(&channel);
                }
            }
            info!("频道 {:?} 已解散，{} 条连接退订", channel, members.len());
        }
        Ok(())
    }

    async fn publish(&self, channel: Channel, event: ServerEvent) -> Result<(), BroadcastError> {
        self.fan_out(channel, None, event).await
    }

    async fn publish_except(
        &self,
        channel: Channel,
        except: ConnectionId,
        event: ServerEvent,
    ) -> Result<(), BroadcastError> {
        self.fan_out(channel, Some(except), event).await
    }

    async fn send_to(
        &self,
        connection_id: ConnectionId,
        event: ServerEvent,
    ) -> Result<(), BroadcastError> {
        let connections = self.connections.read().await;
        let slot = connections
            .get(&connection_id)
            .ok_or(BroadcastError::UnknownConnection(connection_id))?;
        slot.sender.send(event).map_err(|_| {
            warn!("连接 {} 的出站队列已关闭", connection_id);
            BroadcastError::failed(format!("connection {connection_id} is closing"))
        })
    }
}
