//! 应用层实现。
//!
//! 房间目录、消息存储、在线状态与实时协议处理器，
//! 以及它们对存储、用户目录、实时广播等外部适配器的抽象。

pub mod broadcaster;
pub mod clock;
pub mod dto;
pub mod error;
pub mod memory;
pub mod ports;
pub mod presence;
pub mod protocol;
pub mod repository;
pub mod services;

#[cfg(test)]
mod test_support;

pub use broadcaster::{BroadcastError, RealtimeHub};
pub use clock::{Clock, MonotonicClock, SystemClock};
pub use dto::{MemberView, MessagePage, MessageView, RoomSummary, RoomView};
pub use error::ApplicationError;
pub use memory::{MemoryDirectory, MemoryStorage};
pub use ports::{
    AttachmentUploader, CredentialVerifier, FriendshipDirectory, UploadError, UserDirectory,
};
pub use presence::{PresencePort, PresenceRegistry, PresenceRegistryDependencies};
pub use protocol::{Channel, ClientEvent, ServerEvent, Session};
pub use repository::{MessageRepository, RoomChange, RoomChangeError, RoomRepository};
pub use services::{
    BatchOutcome, BatchStatus, ChatService, ChatServiceDependencies, CreateGroupRequest,
    MessageStore, MessageStoreDependencies, PrivateRoom, RoomDirectory, RoomDirectoryDependencies,
    SendRequest, SendTarget,
};
