use std::sync::Arc;

use application::{
    AttachmentUploader, ChatService, ChatServiceDependencies, Clock, CredentialVerifier,
    FriendshipDirectory, MessageRepository, MessageStore, MessageStoreDependencies,
    PresenceRegistry, PresenceRegistryDependencies, RealtimeHub, RoomDirectory,
    RoomDirectoryDependencies, RoomRepository, UserDirectory,
};
use config::ChatSettings;

/// 存储后端提供的端口，内存和 PostgreSQL 都按这个形状装配
#[derive(Clone)]
pub struct StorageBackends {
    pub rooms: Arc<dyn RoomRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub friendships: Arc<dyn FriendshipDirectory>,
    pub users: Arc<dyn UserDirectory>,
}

#[derive(Clone)]
pub struct AppState {
    pub chat_service: ChatService,
    pub credentials: Arc<dyn CredentialVerifier>,
    pub uploader: Arc<dyn AttachmentUploader>,
}

impl AppState {
    pub fn new(
        chat_service: ChatService,
        credentials: Arc<dyn CredentialVerifier>,
        uploader: Arc<dyn AttachmentUploader>,
    ) -> Self {
        Self {
            chat_service,
            credentials,
            uploader,
        }
    }

    /// 把存储端口、分发中心和时钟组装成完整的聊天服务
    pub fn assemble(
        backends: StorageBackends,
        hub: Arc<dyn RealtimeHub>,
        clock: Arc<dyn Clock>,
        settings: ChatSettings,
        credentials: Arc<dyn CredentialVerifier>,
        uploader: Arc<dyn AttachmentUploader>,
    ) -> Self {
        let directory = Arc::new(RoomDirectory::new(RoomDirectoryDependencies {
            room_repository: backends.rooms.clone(),
            friendships: backends.friendships.clone(),
            clock: clock.clone(),
            settings: settings.clone(),
        }));
        let store = Arc::new(MessageStore::new(MessageStoreDependencies {
            message_repository: backends.messages,
            room_repository: backends.rooms,
            users: backends.users.clone(),
            clock: clock.clone(),
            settings: settings.clone(),
        }));
        let presence = Arc::new(PresenceRegistry::new(PresenceRegistryDependencies {
            friendships: backends.friendships,
            users: backends.users.clone(),
            hub: hub.clone(),
            clock,
        }));
        let chat_service = ChatService::new(ChatServiceDependencies {
            directory,
            store,
            presence,
            hub,
            users: backends.users,
            settings,
        });

        Self::new(chat_service, credentials, uploader)
    }
}
