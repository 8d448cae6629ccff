use std::collections::HashMap;
use std::sync::Arc;

use config::ChatSettings;
use domain::{
    Attachment, ConversationRoom, DomainError, MessageId, RoomId, Timestamp, UserId, UserProfile,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    broadcaster::RealtimeHub,
    dto::{MemberView, MessagePage, MessageView, RoomSummary, RoomView},
    error::ApplicationError,
    ports::UserDirectory,
    presence::PresencePort,
    protocol::{Channel, ClientEvent, PrivateMessagePayload, ServerEvent, Session},
    services::{MessageStore, RoomDirectory},
};

/// 发送目标：已有房间，或对方用户（私聊，可能触发建房）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum SendTarget {
    User(UserId),
    Room(RoomId),
}

#[derive(Debug, Clone)]
pub struct SendRequest {
    pub target: SendTarget,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub client_ref: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateGroupRequest {
    pub creator_id: UserId,
    pub name: String,
    pub member_ids: Vec<UserId>,
}

/// 批量发送中单个目标的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub target: SendTarget,
    #[serde(flatten)]
    pub status: BatchStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BatchStatus {
    Delivered { room_id: RoomId, message_id: MessageId },
    Failed { code: String, message: String },
    /// 超时只代表不再等待，发送本身可能仍会完成
    TimedOut,
}

pub struct ChatServiceDependencies {
    pub directory: Arc<RoomDirectory>,
    pub store: Arc<MessageStore>,
    pub presence: Arc<dyn PresencePort>,
    pub hub: Arc<dyn RealtimeHub>,
    pub users: Arc<dyn UserDirectory>,
    pub settings: ChatSettings,
}

/// 实时协议处理器：join / send / typing / read，以及群管理的通知扇出
#[derive(Clone)]
pub struct ChatService {
    deps: Arc<ChatServiceDependencies>,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        Self {
            deps: Arc::new(deps),
        }
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.deps.settings
    }

    /// 登记连接，绑定个人频道和所有所在房间，最后登记在线状态
    pub async fn open_session(
        &self,
        session: Session,
    ) -> Result<mpsc::UnboundedReceiver<ServerEvent>, ApplicationError> {
        let receiver = self
            .deps
            .hub
            .register(session.connection_id, session.user_id)
            .await;

        if let Err(err) = self.bind_session(session).await {
            self.deps.hub.unregister(session.connection_id).await;
            return Err(err);
        }

        self.deps
            .presence
            .register(session.user_id, session.connection_id)
            .await;
        tracing::info!(
            user_id = %session.user_id,
            connection_id = %session.connection_id,
            "实时连接已建立"
        );
        Ok(receiver)
    }

    async fn bind_session(&self, session: Session) -> Result<(), ApplicationError> {
        let hub = &self.deps.hub;
        hub.bind(session.connection_id, Channel::User(session.user_id))
            .await?;
        for room in self.deps.directory.list_rooms(session.user_id).await? {
            hub.bind(session.connection_id, Channel::Room(room.id)).await?;
        }
        Ok(())
    }

    pub async fn close_session(&self, session: Session) {
        self.deps.hub.unregister(session.connection_id).await;
        self.deps
            .presence
            .deregister(session.user_id, session.connection_id)
            .await;
        tracing::info!(
            user_id = %session.user_id,
            connection_id = %session.connection_id,
            "实时连接已关闭"
        );
    }

    /// 处理一条客户端事件，失败只回给发送者
    pub async fn handle(&self, session: Session, event: ClientEvent) {
        let result = match event {
            ClientEvent::JoinRoom(payload) => self.join_room(session, payload.room_id).await,
            ClientEvent::PrivateMessage(payload) => match private_target(&payload) {
                Ok(target) => self
                    .send(
                        session.user_id,
                        SendRequest {
                            target,
                            content: payload.content,
                            attachments: payload.attachments,
                            client_ref: payload.client_ref,
                        },
                    )
                    .await
                    .map(|_| ()),
                Err(err) => Err(err),
            },
            ClientEvent::GroupMessage(payload) => self
                .send(
                    session.user_id,
                    SendRequest {
                        target: SendTarget::Room(payload.room_id),
                        content: payload.content,
                        attachments: payload.attachments,
                        client_ref: payload.client_ref,
                    },
                )
                .await
                .map(|_| ()),
            ClientEvent::Typing(payload) => {
                self.typing(session, payload.room_id, payload.is_typing)
                    .await
            }
            ClientEvent::MessageRead(payload) => self
                .mark_read(session.user_id, payload.room_id, &payload.message_ids)
                .await
                .map(|_| ()),
        };

        if let Err(err) = result {
            self.reject(session, &err).await;
        }
    }

    /// 向单个连接回送 error 事件
    pub async fn reject(&self, session: Session, err: &ApplicationError) {
        tracing::warn!(
            user_id = %session.user_id,
            connection_id = %session.connection_id,
            code = err.code(),
            error = %err,
            "客户端请求被拒绝"
        );
        let event = ServerEvent::error(err.code(), err.public_message());
        if let Err(send_err) = self.deps.hub.send_to(session.connection_id, event).await {
            tracing::debug!(error = %send_err, "错误事件无法送达");
        }
    }

    /// 订阅房间频道，要求是成员
    pub async fn join_room(
        &self,
        session: Session,
        room_id: RoomId,
    ) -> Result<(), ApplicationError> {
        self.deps
            .directory
            .get_room(room_id, session.user_id)
            .await?;
        self.deps
            .hub
            .bind(session.connection_id, Channel::Room(room_id))
            .await?;
        self.deps
            .hub
            .send_to(session.connection_id, ServerEvent::JoinedRoom { room_id })
            .await?;
        Ok(())
    }

    /// 收到 → 授权 → 持久化 → 广播。持久化之后的广播失败不回滚消息。
    pub async fn send(
        &self,
        sender_id: UserId,
        request: SendRequest,
    ) -> Result<MessageView, ApplicationError> {
        let room = match request.target {
            SendTarget::Room(room_id) => self.deps.directory.find_room(room_id).await?,
            SendTarget::User(peer_id) => {
                let resolved = self
                    .deps
                    .directory
                    .get_or_create_private_room(sender_id, peer_id)
                    .await?;
                if resolved.created {
                    self.announce_new_room(&resolved.room, None).await;
                }
                resolved.room
            }
        };

        let message = self
            .deps
            .store
            .append(&room, sender_id, request.content, request.attachments)
            .await?;

        self.publish(
            Channel::Room(room.id),
            ServerEvent::NewMessage {
                room_id: room.id,
                message: message.clone(),
                client_ref: request.client_ref,
            },
        )
        .await;
        Ok(message)
    }

    /// 把同一内容分别发给多个目标，每个目标独立成败、独立超时
    pub async fn send_many(
        &self,
        sender_id: UserId,
        targets: Vec<SendTarget>,
        content: String,
        attachments: Vec<Attachment>,
    ) -> Result<Vec<BatchOutcome>, ApplicationError> {
        if targets.is_empty() {
            return Err(
                DomainError::invalid_input("targets", "at least one target is required").into(),
            );
        }

        let timeout = self.deps.settings.batch_timeout();
        let sends = targets.into_iter().map(|target| {
            let service = self.clone();
            let request = SendRequest {
                target,
                content: content.clone(),
                attachments: attachments.clone(),
                client_ref: None,
            };
            async move {
                let handle = tokio::spawn(async move { service.send(sender_id, request).await });
                let status = match tokio::time::timeout(timeout, handle).await {
                    Ok(Ok(Ok(message))) => BatchStatus::Delivered {
                        room_id: message.room_id,
                        message_id: message.id,
                    },
                    Ok(Ok(Err(err))) => BatchStatus::Failed {
                        code: err.code().to_string(),
                        message: err.public_message(),
                    },
                    Ok(Err(join_err)) => BatchStatus::Failed {
                        code: "INTERNAL".to_string(),
                        message: join_err.to_string(),
                    },
                    Err(_) => BatchStatus::TimedOut,
                };
                BatchOutcome { target, status }
            }
        });

        let outcomes = futures::future::join_all(sends).await;
        let delivered = outcomes
            .iter()
            .filter(|o| matches!(o.status, BatchStatus::Delivered { .. }))
            .count();
        tracing::info!(
            sender_id = %sender_id,
            targets = outcomes.len(),
            delivered,
            "批量发送完成"
        );
        Ok(outcomes)
    }

    /// 不持久化，广播给房间内除发起连接以外的连接
    pub async fn typing(
        &self,
        session: Session,
        room_id: RoomId,
        is_typing: bool,
    ) -> Result<(), ApplicationError> {
        self.deps
            .directory
            .get_room(room_id, session.user_id)
            .await?;
        let username = self
            .deps
            .users
            .profiles(&[session.user_id])
            .await?
            .into_iter()
            .next()
            .map(|profile| profile.display_name)
            .unwrap_or_else(|| session.user_id.to_string());

        self.deps
            .hub
            .publish_except(
                Channel::Room(room_id),
                session.connection_id,
                ServerEvent::Typing {
                    user_id: session.user_id,
                    username,
                    room_id,
                    is_typing,
                },
            )
            .await?;
        Ok(())
    }

    /// 标记已读并把新产生的回执广播给整个房间
    pub async fn mark_read(
        &self,
        user_id: UserId,
        room_id: RoomId,
        message_ids: &[MessageId],
    ) -> Result<Vec<MessageId>, ApplicationError> {
        let room = self.deps.directory.find_room(room_id).await?;
        let updated = self.deps.store.mark_read(&room, user_id, message_ids).await?;
        if !updated.is_empty() {
            self.publish(
                Channel::Room(room_id),
                ServerEvent::MessagesRead {
                    room_id,
                    message_ids: updated.clone(),
                    user_id,
                },
            )
            .await;
        }
        Ok(updated)
    }

    /// 历史消息；首屏加载（无游标）时顺带把别人发的消息标为已读
    pub async fn history(
        &self,
        user_id: UserId,
        room_id: RoomId,
        cursor: Option<Timestamp>,
        limit: Option<usize>,
    ) -> Result<MessagePage, ApplicationError> {
        let room = self.deps.directory.find_room(room_id).await?;
        let page = self.deps.store.page(&room, user_id, cursor, limit).await?;

        if cursor.is_none() {
            let unread: Vec<MessageId> = page
                .messages
                .iter()
                .filter(|m| {
                    m.sender.id != user_id && !m.read_by.iter().any(|r| r.user_id == user_id)
                })
                .map(|m| m.id)
                .collect();
            if !unread.is_empty() && !self.mark_read(user_id, room_id, &unread).await?.is_empty() {
                // 重新读取，返回的 readBy 才包含刚写入的回执
                return self.deps.store.page(&room, user_id, None, limit).await;
            }
        }
        Ok(page)
    }

    pub async fn list_rooms(&self, user_id: UserId) -> Result<Vec<RoomSummary>, ApplicationError> {
        let rooms = self.deps.directory.list_rooms(user_id).await?;
        let room_ids: Vec<RoomId> = rooms.iter().map(|room| room.id).collect();
        let unread = self.deps.store.unread_counts(&room_ids, user_id).await?;

        let mut member_ids: Vec<UserId> = rooms
            .iter()
            .flat_map(|room| room.members.iter().copied())
            .collect();
        member_ids.sort();
        member_ids.dedup();
        let profiles = self.profiles_by_id(&member_ids).await?;

        Ok(rooms
            .into_iter()
            .map(|room| {
                let unread_count = unread.get(&room.id).copied().unwrap_or(0);
                RoomSummary {
                    room: self.view_with(room, &profiles),
                    unread_count,
                }
            })
            .collect())
    }

    pub async fn get_room(
        &self,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<RoomView, ApplicationError> {
        let room = self.deps.directory.get_room(room_id, user_id).await?;
        self.room_view(room).await
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.deps.presence.is_online(user_id)
    }

    pub async fn create_group(
        &self,
        request: CreateGroupRequest,
    ) -> Result<RoomView, ApplicationError> {
        let room = self
            .deps
            .directory
            .create_group(request.creator_id, request.name, request.member_ids)
            .await?;
        Ok(self.announce_new_room(&room, Some(request.creator_id)).await)
    }

    pub async fn add_members(
        &self,
        acting: UserId,
        room_id: RoomId,
        member_ids: Vec<UserId>,
    ) -> Result<RoomView, ApplicationError> {
        let (room, added) = self
            .deps
            .directory
            .add_members(room_id, acting, member_ids)
            .await?;
        let view = self.room_view(room).await?;
        if added.is_empty() {
            return Ok(view);
        }

        for member in &added {
            self.bind_user(*member, room_id).await;
            self.publish(
                Channel::User(*member),
                ServerEvent::AddedToGroup {
                    room_id,
                    room: view.clone(),
                },
            )
            .await;
        }
        self.publish_room_updated(&view).await;
        Ok(view)
    }

    pub async fn remove_member(
        &self,
        acting: UserId,
        room_id: RoomId,
        target: UserId,
    ) -> Result<RoomView, ApplicationError> {
        let room = self
            .deps
            .directory
            .remove_member(room_id, acting, target)
            .await?;
        self.after_departure(room, target).await
    }

    pub async fn leave_group(
        &self,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<RoomView, ApplicationError> {
        let room = self.deps.directory.leave_group(room_id, user_id).await?;
        self.after_departure(room, user_id).await
    }

    pub async fn promote_manager(
        &self,
        acting: UserId,
        room_id: RoomId,
        target: UserId,
    ) -> Result<RoomView, ApplicationError> {
        let room = self
            .deps
            .directory
            .promote_manager(room_id, acting, target)
            .await?;
        self.updated(room).await
    }

    pub async fn demote_manager(
        &self,
        acting: UserId,
        room_id: RoomId,
        target: UserId,
    ) -> Result<RoomView, ApplicationError> {
        let room = self
            .deps
            .directory
            .demote_manager(room_id, acting, target)
            .await?;
        self.updated(room).await
    }

    pub async fn rename_group(
        &self,
        acting: UserId,
        room_id: RoomId,
        name: String,
    ) -> Result<RoomView, ApplicationError> {
        let room = self
            .deps
            .directory
            .rename_group(room_id, acting, name)
            .await?;
        self.updated(room).await
    }

    /// 删除后先通知房间频道，再解除绑定
    pub async fn delete_room(
        &self,
        acting: UserId,
        room_id: RoomId,
    ) -> Result<(), ApplicationError> {
        self.deps.directory.delete_room(room_id, acting).await?;
        self.publish(Channel::Room(room_id), ServerEvent::RoomDeleted { room_id })
            .await;
        if let Err(err) = self.deps.hub.unbind_channel(Channel::Room(room_id)).await {
            tracing::warn!(room_id = %room_id, error = %err, "解除房间频道失败");
        }
        Ok(())
    }

    /// 新房间：所有成员的在线连接加入房间频道，创建者收到 room-created，
    /// 群聊的其他成员收到 added-to-group（私聊双方都收到 room-created）
    async fn announce_new_room(
        &self,
        room: &ConversationRoom,
        creator: Option<UserId>,
    ) -> RoomView {
        for member in &room.members {
            self.bind_user(*member, room.id).await;
        }

        let view = match self.room_view(room.clone()).await {
            Ok(view) => view,
            Err(err) => {
                tracing::warn!(room_id = %room.id, error = %err, "成员资料解析失败");
                self.view_with(room.clone(), &HashMap::new())
            }
        };

        for member in &room.members {
            let event = match creator {
                Some(creator) if creator != *member => ServerEvent::AddedToGroup {
                    room_id: room.id,
                    room: view.clone(),
                },
                _ => ServerEvent::RoomCreated {
                    room_id: room.id,
                    room: view.clone(),
                },
            };
            self.publish(Channel::User(*member), event).await;
        }
        view
    }

    async fn after_departure(
        &self,
        room: ConversationRoom,
        departed: UserId,
    ) -> Result<RoomView, ApplicationError> {
        let room_id = room.id;
        if let Err(err) = self
            .deps
            .hub
            .unbind_user(departed, Channel::Room(room_id))
            .await
        {
            tracing::warn!(room_id = %room_id, user_id = %departed, error = %err, "解除成员频道失败");
        }
        let view = self.room_view(room).await?;
        self.publish_room_updated(&view).await;
        self.publish(
            Channel::User(departed),
            ServerEvent::RoomUpdated {
                room_id,
                room: view.clone(),
            },
        )
        .await;
        Ok(view)
    }

    async fn updated(&self, room: ConversationRoom) -> Result<RoomView, ApplicationError> {
        let view = self.room_view(room).await?;
        self.publish_room_updated(&view).await;
        Ok(view)
    }

    async fn publish_room_updated(&self, view: &RoomView) {
        self.publish(
            Channel::Room(view.id),
            ServerEvent::RoomUpdated {
                room_id: view.id,
                room: view.clone(),
            },
        )
        .await;
    }

    async fn bind_user(&self, user_id: UserId, room_id: RoomId) {
        if let Err(err) = self
            .deps
            .hub
            .bind_user(user_id, Channel::Room(room_id))
            .await
        {
            tracing::warn!(room_id = %room_id, user_id = %user_id, error = %err, "绑定房间频道失败");
        }
    }

    /// 状态已经落库，广播失败只记日志
    async fn publish(&self, channel: Channel, event: ServerEvent) {
        let name = event.name();
        if let Err(err) = self.deps.hub.publish(channel, event).await {
            tracing::warn!(?channel, event = name, error = %err, "广播失败");
        }
    }

    async fn room_view(&self, room: ConversationRoom) -> Result<RoomView, ApplicationError> {
        let profiles = self.profiles_by_id(&room.members).await?;
        Ok(self.view_with(room, &profiles))
    }

    fn view_with(
        &self,
        room: ConversationRoom,
        profiles: &HashMap<UserId, UserProfile>,
    ) -> RoomView {
        let members = room
            .members
            .iter()
            .map(|id| MemberView {
                profile: profiles
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| UserProfile::placeholder(*id)),
                is_online: self.deps.presence.is_online(*id),
            })
            .collect();
        RoomView::new(room, members)
    }

    async fn profiles_by_id(
        &self,
        ids: &[UserId],
    ) -> Result<HashMap<UserId, UserProfile>, ApplicationError> {
        let profiles = self.deps.users.profiles(ids).await?;
        Ok(profiles.into_iter().map(|p| (p.id, p)).collect())
    }
}

fn private_target(payload: &PrivateMessagePayload) -> Result<SendTarget, ApplicationError> {
    match (payload.room_id, payload.to_user_id) {
        (Some(room_id), _) => Ok(SendTarget::Room(room_id)),
        (None, Some(user_id)) => Ok(SendTarget::User(user_id)),
        (None, None) => Err(DomainError::invalid_input(
            "toUserId",
            "either toUserId or roomId is required",
        )
        .into()),
    }
}
