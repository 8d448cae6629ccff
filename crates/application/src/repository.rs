use std::collections::HashMap;

use async_trait::async_trait;
use domain::{
    ConversationRoom, DomainError, Message, MessageId, RepositoryError, RoomId, Timestamp, UserId,
};
use thiserror::Error;

/// 对房间的一次就地修改，返回 Err 时整个修改作废
pub type RoomChange<'a> =
    &'a mut (dyn FnMut(&mut ConversationRoom) -> Result<(), DomainError> + Send);

#[derive(Debug, Error)]
pub enum RoomChangeError {
    #[error(transparent)]
    Rejected(#[from] DomainError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[async_trait]
pub trait RoomRepository: Send + Sync {
    async fn create(&self, room: ConversationRoom) -> Result<ConversationRoom, RepositoryError>;

    /// 原子地创建私聊：同一对用户已有私聊时返回已有房间，不会产生第二个。
    async fn create_private_if_absent(
        &self,
        room: ConversationRoom,
    ) -> Result<ConversationRoom, RepositoryError>;

    async fn find_by_id(&self, id: RoomId) -> Result<Option<ConversationRoom>, RepositoryError>;

    async fn find_private(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<ConversationRoom>, RepositoryError>;

    /// 在存储的排他锁内读出房间、应用 `change` 并写回成员、经理、名称。
    /// 同一房间上的并发修改依次生效，后一个总能看到前一个的结果。
    async fn modify(
        &self,
        id: RoomId,
        change: RoomChange<'_>,
    ) -> Result<ConversationRoom, RoomChangeError>;

    /// 连同房间内所有消息一起删除
    async fn delete(&self, id: RoomId) -> Result<(), RepositoryError>;

    /// 用户所在的全部房间，按 last_activity_at 倒序
    async fn list_for_member(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationRoom>, RepositoryError>;

    async fn touch(&self, id: RoomId, at: Timestamp) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append(&self, message: Message) -> Result<Message, RepositoryError>;

    /// 严格早于 `before` 的消息，按 (created_at, id) 倒序，最多 `limit` 条
    async fn page(
        &self,
        room_id: RoomId,
        before: Option<Timestamp>,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError>;

    /// 只处理属于该房间且尚未被该用户读过的消息，返回实际新增回执的消息 id
    async fn mark_read(
        &self,
        room_id: RoomId,
        message_ids: &[MessageId],
        user_id: UserId,
        at: Timestamp,
    ) -> Result<Vec<MessageId>, RepositoryError>;

    /// 每个房间里：非本人发送且本人未读的消息数
    async fn count_unread(
        &self,
        room_ids: &[RoomId],
        user_id: UserId,
    ) -> Result<HashMap<RoomId, u64>, RepositoryError>;

    async fn count_in_room(&self, room_id: RoomId) -> Result<u64, RepositoryError>;
}
