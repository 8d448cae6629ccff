use std::sync::Arc;

use config::ChatSettings;
use domain::{ConversationRoom, DomainError, RepositoryError, RoomId, UserId};

use crate::{
    clock::Clock,
    error::ApplicationError,
    ports::FriendshipDirectory,
    repository::{RoomChange, RoomChangeError, RoomRepository},
};

pub struct RoomDirectoryDependencies {
    pub room_repository: Arc<dyn RoomRepository>,
    pub friendships: Arc<dyn FriendshipDirectory>,
    pub clock: Arc<dyn Clock>,
    pub settings: ChatSettings,
}

/// 私聊解析结果
#[derive(Debug, Clone)]
pub struct PrivateRoom {
    pub room: ConversationRoom,
    /// 本次调用是否新建了房间
    pub created: bool,
}

/// 房间目录：解析会话房间、维护成员与角色不变量
pub struct RoomDirectory {
    deps: RoomDirectoryDependencies,
}

impl RoomDirectory {
    pub fn new(deps: RoomDirectoryDependencies) -> Self {
        Self { deps }
    }

    pub async fn find_room(&self, room_id: RoomId) -> Result<ConversationRoom, ApplicationError> {
        self.deps
            .room_repository
            .find_by_id(room_id)
            .await?
            .ok_or_else(|| DomainError::not_found("room", room_id).into())
    }

    /// 只有成员可以查看房间
    pub async fn get_room(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<ConversationRoom, ApplicationError> {
        let room = self.find_room(room_id).await?;
        room.ensure_member(user_id, "view room")?;
        Ok(room)
    }

    pub async fn list_rooms(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationRoom>, ApplicationError> {
        Ok(self.deps.room_repository.list_for_member(user_id).await?)
    }

    /// 好友之间的唯一私聊，没有就创建。唯一性由存储层保证。
    pub async fn get_or_create_private_room(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<PrivateRoom, ApplicationError> {
        if user_a == user_b {
            return Err(DomainError::invalid_input("toUserId", "cannot message yourself").into());
        }
        if !self.deps.friendships.is_friend(user_a, user_b).await? {
            return Err(DomainError::NotFriends.into());
        }

        if let Some(room) = self.deps.room_repository.find_private(user_a, user_b).await? {
            return Ok(PrivateRoom {
                room,
                created: false,
            });
        }

        let candidate =
            ConversationRoom::new_private(RoomId::random(), user_a, user_b, self.deps.clock.now())?;
        let candidate_id = candidate.id;
        let room = self
            .deps
            .room_repository
            .create_private_if_absent(candidate)
            .await?;
        let created = room.id == candidate_id;
        if created {
            tracing::info!(room_id = %room.id, user_a = %user_a, user_b = %user_b, "创建私聊房间");
        }
        Ok(PrivateRoom { room, created })
    }

    pub async fn create_group(
        &self,
        creator: UserId,
        name: String,
        member_ids: Vec<UserId>,
    ) -> Result<ConversationRoom, ApplicationError> {
        let room = ConversationRoom::new_group(
            RoomId::random(),
            creator,
            name,
            member_ids,
            self.deps.clock.now(),
        )?;
        let room = self.deps.room_repository.create(room).await?;
        tracing::info!(room_id = %room.id, admin = %creator, members = room.members.len(), "创建群聊");
        Ok(room)
    }

    /// 成员与角色的变更都在存储锁内对最新状态重新校验
    async fn change_room(
        &self,
        room_id: RoomId,
        change: RoomChange<'_>,
    ) -> Result<ConversationRoom, ApplicationError> {
        match self.deps.room_repository.modify(room_id, change).await {
            Err(RoomChangeError::Repository(RepositoryError::NotFound)) => {
                Err(DomainError::not_found("room", room_id).into())
            }
            other => Ok(other?),
        }
    }

    /// 返回更新后的房间与实际新增的成员
    pub async fn add_members(
        &self,
        room_id: RoomId,
        acting: UserId,
        new_members: Vec<UserId>,
    ) -> Result<(ConversationRoom, Vec<UserId>), ApplicationError> {
        let require_manager = self.deps.settings.invites_require_manager;
        let mut added = Vec::new();
        let room = self
            .change_room(room_id, &mut |room| {
                added = room.add_members(acting, new_members.iter().copied(), require_manager)?;
                Ok(())
            })
            .await?;
        if !added.is_empty() {
            tracing::info!(room_id = %room_id, acting = %acting, added = added.len(), "群成员增加");
        }
        Ok((room, added))
    }

    pub async fn remove_member(
        &self,
        room_id: RoomId,
        acting: UserId,
        target: UserId,
    ) -> Result<ConversationRoom, ApplicationError> {
        let room = self
            .change_room(room_id, &mut |room| room.remove_member(acting, target))
            .await?;
        tracing::info!(room_id = %room_id, acting = %acting, target = %target, "移除群成员");
        Ok(room)
    }

    /// 退群；房间不是群聊时视为找不到
    pub async fn leave_group(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<ConversationRoom, ApplicationError> {
        let room = self.find_room(room_id).await?;
        if !room.is_group() {
            return Err(DomainError::not_found("group", room_id).into());
        }
        self.remove_member(room_id, user_id, user_id).await
    }

    pub async fn promote_manager(
        &self,
        room_id: RoomId,
        acting: UserId,
        target: UserId,
    ) -> Result<ConversationRoom, ApplicationError> {
        self.change_room(room_id, &mut |room| room.promote_manager(acting, target))
            .await
    }

    pub async fn demote_manager(
        &self,
        room_id: RoomId,
        acting: UserId,
        target: UserId,
    ) -> Result<ConversationRoom, ApplicationError> {
        self.change_room(room_id, &mut |room| room.demote_manager(acting, target))
            .await
    }

    pub async fn rename_group(
        &self,
        room_id: RoomId,
        acting: UserId,
        name: String,
    ) -> Result<ConversationRoom, ApplicationError> {
        self.change_room(room_id, &mut |room| room.rename(acting, name.clone()))
            .await
    }

    /// 删除房间及其全部消息，返回被删除的房间
    pub async fn delete_room(
        &self,
        room_id: RoomId,
        acting: UserId,
    ) -> Result<ConversationRoom, ApplicationError> {
        let room = self.find_room(room_id).await?;
        room.authorize_delete(acting)?;
        self.deps.room_repository.delete(room_id).await?;
        tracing::info!(room_id = %room_id, acting = %acting, kind = room.kind.as_str(), "删除房间");
        Ok(room)
    }
}
