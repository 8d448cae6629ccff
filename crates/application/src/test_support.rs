//! 单元测试共用的记录型广播器与内存装配

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use config::ChatSettings;
use domain::{ConnectionId, UserId, UserProfile};
use tokio::sync::mpsc;

use crate::broadcaster::{BroadcastError, RealtimeHub};
use crate::clock::MonotonicClock;
use crate::memory::{MemoryDirectory, MemoryStorage};
use crate::presence::{PresenceRegistry, PresenceRegistryDependencies};
use crate::protocol::{Channel, ServerEvent};
use crate::services::{
    ChatService, ChatServiceDependencies, MessageStore, MessageStoreDependencies, RoomDirectory,
    RoomDirectoryDependencies,
};

#[derive(Default)]
struct Recorded {
    connections: HashMap<ConnectionId, UserId>,
    bindings: HashSet<(ConnectionId, Channel)>,
    user_bindings: HashSet<(UserId, Channel)>,
    published: Vec<(Channel, Option<ConnectionId>, ServerEvent)>,
    direct: Vec<(ConnectionId, ServerEvent)>,
}

/// 只记录调用，不真正投递
#[derive(Default)]
pub struct RecordingHub {
    state: Mutex<Recorded>,
}

impl RecordingHub {
    fn with<R>(&self, f: impl FnOnce(&mut Recorded) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn published_to(&self, channel: Channel) -> Vec<ServerEvent> {
        self.with(|s| {
            s.published
                .iter()
                .filter(|(c, _, _)| *c == channel)
                .map(|(_, _, e)| e.clone())
                .collect()
        })
    }

    pub fn published_named(&self, name: &str) -> Vec<(Channel, ServerEvent)> {
        self.with(|s| {
            s.published
                .iter()
                .filter(|(_, _, e)| e.name() == name)
                .map(|(c, _, e)| (*c, e.clone()))
                .collect()
        })
    }

    pub fn excluded_for(&self, name: &str) -> Vec<Option<ConnectionId>> {
        self.with(|s| {
            s.published
                .iter()
                .filter(|(_, _, e)| e.name() == name)
                .map(|(_, except, _)| *except)
                .collect()
        })
    }

    pub fn sent_to(&self, connection_id: ConnectionId) -> Vec<ServerEvent> {
        self.with(|s| {
            s.direct
                .iter()
                .filter(|(c, _)| *c == connection_id)
                .map(|(_, e)| e.clone())
                .collect()
        })
    }

    pub fn is_bound(&self, connection_id: ConnectionId, channel: Channel) -> bool {
        self.with(|s| s.bindings.contains(&(connection_id, channel)))
    }

    pub fn user_bound(&self, user_id: UserId, channel: Channel) -> bool {
        self.with(|s| s.user_bindings.contains(&(user_id, channel)))
    }

    pub fn clear(&self) {
        self.with(|s| {
            s.published.clear();
            s.direct.clear();
        })
    }
}

#[async_trait]
impl RealtimeHub for RecordingHub {
    async fn register(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
    ) -> mpsc::UnboundedReceiver<ServerEvent> {
        self.with(|s| s.connections.insert(connection_id, user_id));
        let (_tx, rx) = mpsc::unbounded_channel();
        rx
    }

    async fn unregister(&self, connection_id: ConnectionId) {
        self.with(|s| {
            s.connections.remove(&connection_id);
            s.bindings.retain(|(c, _)| *c != connection_id);
        })
    }

    async fn bind(
        &self,
        connection_id: ConnectionId,
        channel: Channel,
    ) -> Result<(), BroadcastError> {
        self.with(|s| s.bindings.insert((connection_id, channel)));
        Ok(())
    }

    async fn bind_user(&self, user_id: UserId, channel: Channel) -> Result<(), BroadcastError> {
        self.with(|s| {
            s.user_bindings.insert((user_id, channel));
            let owned: Vec<ConnectionId> = s
                .connections
                .iter()
                .filter(|(_, u)| **u == user_id)
                .map(|(c, _)| *c)
                .collect();
            for connection in owned {
                s.bindings.insert((connection, channel));
            }
        });
        Ok(())
    }

    async fn unbind_user(&self, user_id: UserId, channel: Channel) -> Result<(), BroadcastError> {
        self.with(|s| {
            s.user_bindings.remove(&(user_id, channel));
            let connections = s.connections.clone();
            s.bindings
                .retain(|(c, ch)| !(*ch == channel && connections.get(c) == Some(&user_id)));
        });
        Ok(())
    }

    async fn unbind_channel(&self, channel: Channel) -> Result<(), BroadcastError> {
        self.with(|s| {
            s.bindings.retain(|(_, ch)| *ch != channel);
            s.user_bindings.retain(|(_, ch)| *ch != channel);
        });
        Ok(())
    }

    async fn publish(&self, channel: Channel, event: ServerEvent) -> Result<(), BroadcastError> {
        self.with(|s| s.published.push((channel, None, event)));
        Ok(())
    }

    async fn publish_except(
        &self,
        channel: Channel,
        except: ConnectionId,
        event: ServerEvent,
    ) -> Result<(), BroadcastError> {
        self.with(|s| s.published.push((channel, Some(except), event)));
        Ok(())
    }

    async fn send_to(
        &self,
        connection_id: ConnectionId,
        event: ServerEvent,
    ) -> Result<(), BroadcastError> {
        self.with(|s| s.direct.push((connection_id, event)));
        Ok(())
    }
}

/// 全内存装配的应用层
pub struct Fixture {
    pub storage: Arc<MemoryStorage>,
    pub users: Arc<MemoryDirectory>,
    pub hub: Arc<RecordingHub>,
    pub rooms: Arc<RoomDirectory>,
    pub store: Arc<MessageStore>,
    pub presence: Arc<PresenceRegistry>,
    pub chat: ChatService,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_settings(ChatSettings::default())
    }

    pub fn with_settings(settings: ChatSettings) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let users = Arc::new(MemoryDirectory::new());
        let hub = Arc::new(RecordingHub::default());
        let clock = Arc::new(MonotonicClock::new());

        let rooms = Arc::new(RoomDirectory::new(RoomDirectoryDependencies {
            room_repository: storage.clone(),
            friendships: users.clone(),
            clock: clock.clone(),
            settings: settings.clone(),
        }));
        let store = Arc::new(MessageStore::new(MessageStoreDependencies {
            message_repository: storage.clone(),
            room_repository: storage.clone(),
            users: users.clone(),
            clock: clock.clone(),
            settings: settings.clone(),
        }));
        let presence = Arc::new(PresenceRegistry::new(PresenceRegistryDependencies {
            friendships: users.clone(),
            users: users.clone(),
            hub: hub.clone(),
            clock,
        }));
        let chat = ChatService::new(ChatServiceDependencies {
            directory: rooms.clone(),
            store: store.clone(),
            presence: presence.clone(),
            hub: hub.clone(),
            users: users.clone(),
            settings,
        });

        Self {
            storage,
            users,
            hub,
            rooms,
            store,
            presence,
            chat,
        }
    }

    pub async fn user(&self, name: &str) -> UserId {
        let id = UserId::random();
        self.users
            .add_user(UserProfile {
                id,
                display_name: name.to_string(),
                avatar_url: None,
            })
            .await;
        id
    }

    pub async fn friends(&self, a: &str, b: &str) -> (UserId, UserId) {
        let a = self.user(a).await;
        let b = self.user(b).await;
        self.users.befriend(a, b).await;
        (a, b)
    }
}
