//! 进程内存储与用户目录。
//!
//! 用于 `memory` 存储后端和各层测试；房间、私聊索引、消息放在同一把锁下，
//! 私聊“查不到就创建”因此是原子的。

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use domain::{
    pair_key, ConversationRoom, Message, MessageId, RepositoryError, RoomId, Timestamp, UserId,
    UserProfile,
};
use tokio::sync::RwLock;

use crate::ports::{FriendshipDirectory, UserDirectory};
use crate::repository::{MessageRepository, RoomChange, RoomChangeError, RoomRepository};

#[derive(Default)]
struct StorageState {
    rooms: HashMap<RoomId, ConversationRoom>,
    private_index: HashMap<(UserId, UserId), RoomId>,
    /// 每个房间的消息按 (created_at, id) 升序
    messages: HashMap<RoomId, Vec<Message>>,
}

#[derive(Default)]
pub struct MemoryStorage {
    state: RwLock<StorageState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前私聊数量，测试用来检查唯一性
    pub async fn private_room_count(&self, a: UserId, b: UserId) -> usize {
        let key = pair_key(a, b);
        let state = self.state.read().await;
        state
            .rooms
            .values()
            .filter(|room| room.private_pair() == Some(key))
            .count()
    }
}

#[async_trait]
impl RoomRepository for MemoryStorage {
    async fn create(&self, room: ConversationRoom) -> Result<ConversationRoom, RepositoryError> {
        let mut state = self.state.write().await;
        if state.rooms.contains_key(&room.id) {
            return Err(RepositoryError::Conflict);
        }
        if let Some(pair) = room.private_pair() {
            if state.private_index.contains_key(&pair) {
                return Err(RepositoryError::Conflict);
            }
            state.private_index.insert(pair, room.id);
        }
        state.rooms.insert(room.id, room.clone());
        Ok(room)
    }

    async fn create_private_if_absent(
        &self,
        room: ConversationRoom,
    ) -> Result<ConversationRoom, RepositoryError> {
        let pair = room
            .private_pair()
            .ok_or_else(|| RepositoryError::storage("not a private room"))?;

        let mut state = self.state.write().await;
        if let Some(existing) = state
            .private_index
            .get(&pair)
            .and_then(|id| state.rooms.get(id))
        {
            return Ok(existing.clone());
        }
        state.private_index.insert(pair, room.id);
        state.rooms.insert(room.id, room.clone());
        Ok(room)
    }

    async fn find_by_id(&self, id: RoomId) -> Result<Option<ConversationRoom>, RepositoryError> {
        Ok(self.state.read().await.rooms.get(&id).cloned())
    }

    async fn find_private(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<ConversationRoom>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .private_index
            .get(&pair_key(a, b))
            .and_then(|id| state.rooms.get(id))
            .cloned())
    }

    async fn modify(
        &self,
        id: RoomId,
        change: RoomChange<'_>,
    ) -> Result<ConversationRoom, RoomChangeError> {
        let mut state = self.state.write().await;
        let slot = state.rooms.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        let mut room = slot.clone();
        change(&mut room)?;
        *slot = room.clone();
        Ok(room)
    }

    async fn delete(&self, id: RoomId) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let room = state.rooms.remove(&id).ok_or(RepositoryError::NotFound)?;
        if let Some(pair) = room.private_pair() {
            state.private_index.remove(&pair);
        }
        state.messages.remove(&id);
        Ok(())
    }

    async fn list_for_member(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationRoom>, RepositoryError> {
        let state = self.state.read().await;
        let mut rooms: Vec<ConversationRoom> = state
            .rooms
            .values()
            .filter(|room| room.is_member(user_id))
            .cloned()
            .collect();
        rooms.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(rooms)
    }

    async fn touch(&self, id: RoomId, at: Timestamp) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let room = state.rooms.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        room.touch(at);
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for MemoryStorage {
    async fn append(&self, message: Message) -> Result<Message, RepositoryError> {
        let mut state = self.state.write().await;
        if !state.rooms.contains_key(&message.room_id) {
            return Err(RepositoryError::NotFound);
        }
        let log = state.messages.entry(message.room_id).or_default();
        let key = (message.created_at, message.id);
        let position = log.partition_point(|existing| (existing.created_at, existing.id) <= key);
        log.insert(position, message.clone());
        Ok(message)
    }

    async fn page(
        &self,
        room_id: RoomId,
        before: Option<Timestamp>,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let state = self.state.read().await;
        let Some(log) = state.messages.get(&room_id) else {
            return Ok(Vec::new());
        };
        Ok(log
            .iter()
            .rev()
            .filter(|message| before.is_none_or(|cursor| message.created_at < cursor))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_read(
        &self,
        room_id: RoomId,
        message_ids: &[MessageId],
        user_id: UserId,
        at: Timestamp,
    ) -> Result<Vec<MessageId>, RepositoryError> {
        let wanted: HashSet<MessageId> = message_ids.iter().copied().collect();
        let mut state = self.state.write().await;
        let Some(log) = state.messages.get_mut(&room_id) else {
            return Ok(Vec::new());
        };
        let updated = log
            .iter_mut()
            .filter(|message| wanted.contains(&message.id))
            .filter_map(|message| message.mark_read(user_id, at).then_some(message.id))
            .collect();
        Ok(updated)
    }

    async fn count_unread(
        &self,
        room_ids: &[RoomId],
        user_id: UserId,
    ) -> Result<HashMap<RoomId, u64>, RepositoryError> {
        let state = self.state.read().await;
        Ok(room_ids
            .iter()
            .map(|room_id| {
                let count = state
                    .messages
                    .get(room_id)
                    .map(|log| log.iter().filter(|m| m.is_unread_for(user_id)).count())
                    .unwrap_or(0);
                (*room_id, count as u64)
            })
            .collect())
    }

    async fn count_in_room(&self, room_id: RoomId) -> Result<u64, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .get(&room_id)
            .map(|log| log.len() as u64)
            .unwrap_or(0))
    }
}

#[derive(Debug, Clone)]
struct UserRecord {
    profile: UserProfile,
    is_online: bool,
    last_seen: Option<Timestamp>,
}

/// 用户与好友关系的进程内目录
#[derive(Default)]
pub struct MemoryDirectory {
    users: RwLock<HashMap<UserId, UserRecord>>,
    friendships: RwLock<HashSet<(UserId, UserId)>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, profile: UserProfile) {
        self.users.write().await.insert(
            profile.id,
            UserRecord {
                profile,
                is_online: false,
                last_seen: None,
            },
        );
    }

    pub async fn befriend(&self, a: UserId, b: UserId) {
        self.friendships.write().await.insert(pair_key(a, b));
    }

    pub async fn unfriend(&self, a: UserId, b: UserId) {
        self.friendships.write().await.remove(&pair_key(a, b));
    }

    /// 持久化镜像的 (is_online, last_seen)
    pub async fn presence_of(&self, user_id: UserId) -> Option<(bool, Option<Timestamp>)> {
        self.users
            .read()
            .await
            .get(&user_id)
            .map(|record| (record.is_online, record.last_seen))
    }
}

#[async_trait]
impl FriendshipDirectory for MemoryDirectory {
    async fn is_friend(&self, a: UserId, b: UserId) -> Result<bool, RepositoryError> {
        Ok(self.friendships.read().await.contains(&pair_key(a, b)))
    }

    async fn friends_of(&self, user_id: UserId) -> Result<Vec<UserId>, RepositoryError> {
        let friendships = self.friendships.read().await;
        Ok(friendships
            .iter()
            .filter_map(|(a, b)| match (*a == user_id, *b == user_id) {
                (true, false) => Some(*b),
                (false, true) => Some(*a),
                _ => None,
            })
            .collect())
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn profiles(&self, ids: &[UserId]) -> Result<Vec<UserProfile>, RepositoryError> {
        let users = self.users.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| users.get(id).map(|record| record.profile.clone()))
            .collect())
    }

    async fn set_presence(
        &self,
        user_id: UserId,
        is_online: bool,
        at: Timestamp,
    ) -> Result<(), RepositoryError> {
        let mut users = self.users.write().await;
        if let Some(record) = users.get_mut(&user_id) {
            record.is_online = is_online;
            if !is_online {
                record.last_seen = Some(at);
            }
        }
        Ok(())
    }
}
