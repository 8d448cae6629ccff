use async_trait::async_trait;
use domain::{ConnectionId, UserId};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::{Channel, ServerEvent};

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast failed: {0}")]
    Failed(String),
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),
}

impl BroadcastError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// 连接与频道的绑定关系以及事件扇出。
///
/// 作为依赖注入到协议处理器中，测试里可以换成记录型实现。
#[async_trait]
pub trait RealtimeHub: Send + Sync {
    /// 登记一条新连接，返回它的出站事件流
    async fn register(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
    ) -> mpsc::UnboundedReceiver<ServerEvent>;

    /// 注销连接并解除它的全部频道绑定
    async fn unregister(&self, connection_id: ConnectionId);

    async fn bind(&self, connection_id: ConnectionId, channel: Channel)
        -> Result<(), BroadcastError>;

    /// 把某用户当前所有在线连接绑定到频道
    async fn bind_user(&self, user_id: UserId, channel: Channel) -> Result<(), BroadcastError>;

    async fn unbind_user(&self, user_id: UserId, channel: Channel)
        -> Result<(), BroadcastError>;

    async fn unbind_channel(&self, channel: Channel) -> Result<(), BroadcastError>;

    async fn publish(&self, channel: Channel, event: ServerEvent) -> Result<(), BroadcastError>;

    async fn publish_except(
        &self,
        channel: Channel,
        except: ConnectionId,
        event: ServerEvent,
    ) -> Result<(), BroadcastError>;

    async fn send_to(
        &self,
        connection_id: ConnectionId,
        event: ServerEvent,
    ) -> Result<(), BroadcastError>;
}
