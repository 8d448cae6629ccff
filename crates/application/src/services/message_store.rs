use std::collections::HashMap;
use std::sync::Arc;

use config::ChatSettings;
use domain::{
    Attachment, ConversationRoom, Message, MessageId, RoomId, Timestamp, UserId, UserProfile,
};

use crate::{
    clock::Clock,
    dto::{MessagePage, MessageView},
    error::ApplicationError,
    ports::UserDirectory,
    repository::{MessageRepository, RoomRepository},
};

pub struct MessageStoreDependencies {
    pub message_repository: Arc<dyn MessageRepository>,
    pub room_repository: Arc<dyn RoomRepository>,
    pub users: Arc<dyn UserDirectory>,
    pub clock: Arc<dyn Clock>,
    pub settings: ChatSettings,
}

/// 每个房间一条只追加的消息日志，外加逐用户的已读回执
pub struct MessageStore {
    deps: MessageStoreDependencies,
}

impl MessageStore {
    pub fn new(deps: MessageStoreDependencies) -> Self {
        Self { deps }
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.deps.settings
    }

    pub async fn append(
        &self,
        room: &ConversationRoom,
        sender_id: UserId,
        content: String,
        attachments: Vec<Attachment>,
    ) -> Result<MessageView, ApplicationError> {
        room.ensure_member(sender_id, "send message")?;

        let now = self.deps.clock.now();
        let message = Message::compose(
            MessageId::random(),
            room.id,
            sender_id,
            content,
            attachments,
            now,
            self.deps.settings.max_content_chars,
        )?;
        let message = self.deps.message_repository.append(message).await?;
        self.deps.room_repository.touch(room.id, now).await?;

        let mut profiles = self.resolve_profiles(&[sender_id]).await?;
        let sender = profiles
            .remove(&sender_id)
            .unwrap_or_else(|| UserProfile::placeholder(sender_id));
        Ok(MessageView::new(message, sender))
    }

    /// 时间戳游标分页：多取一条判断 has_more，返回前翻转为正序
    pub async fn page(
        &self,
        room: &ConversationRoom,
        user_id: UserId,
        cursor: Option<Timestamp>,
        limit: Option<usize>,
    ) -> Result<MessagePage, ApplicationError> {
        room.ensure_member(user_id, "read messages")?;

        let limit = self.deps.settings.clamp_page_size(limit);
        let mut messages = self
            .deps
            .message_repository
            .page(room.id, cursor, limit + 1)
            .await?;
        let has_more = messages.len() > limit;
        messages.truncate(limit);
        messages.reverse();
        let next_cursor = messages.first().map(|message| message.created_at);

        let sender_ids: Vec<UserId> = messages.iter().map(|m| m.sender_id).collect();
        let profiles = self.resolve_profiles(&sender_ids).await?;
        let messages = messages
            .into_iter()
            .map(|message| {
                let sender = profiles
                    .get(&message.sender_id)
                    .cloned()
                    .unwrap_or_else(|| UserProfile::placeholder(message.sender_id));
                MessageView::new(message, sender)
            })
            .collect();

        Ok(MessagePage {
            messages,
            has_more,
            next_cursor,
        })
    }

    /// 幂等；不属于该房间或不存在的 id 直接忽略。返回本次新标记的 id。
    pub async fn mark_read(
        &self,
        room: &ConversationRoom,
        user_id: UserId,
        message_ids: &[MessageId],
    ) -> Result<Vec<MessageId>, ApplicationError> {
        room.ensure_member(user_id, "mark messages read")?;
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let updated = self
            .deps
            .message_repository
            .mark_read(room.id, message_ids, user_id, self.deps.clock.now())
            .await?;
        Ok(updated)
    }

    pub async fn unread_counts(
        &self,
        room_ids: &[RoomId],
        user_id: UserId,
    ) -> Result<HashMap<RoomId, u64>, ApplicationError> {
        if room_ids.is_empty() {
            return Ok(HashMap::new());
        }
        Ok(self
            .deps
            .message_repository
            .count_unread(room_ids, user_id)
            .await?)
    }

    pub async fn message_count(&self, room_id: RoomId) -> Result<u64, ApplicationError> {
        Ok(self.deps.message_repository.count_in_room(room_id).await?)
    }

    async fn resolve_profiles(
        &self,
        ids: &[UserId],
    ) -> Result<HashMap<UserId, UserProfile>, ApplicationError> {
        let mut unique = ids.to_vec();
        unique.sort();
        unique.dedup();
        let profiles = self.deps.users.profiles(&unique).await?;
        Ok(profiles
            .into_iter()
            .map(|profile| (profile.id, profile))
            .collect())
    }
}
