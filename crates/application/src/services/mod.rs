mod chat_service;
mod message_store;
mod room_directory;


pub use chat_service::{
    BatchOutcome, BatchStatus, ChatService, ChatServiceDependencies, CreateGroupRequest,
    SendRequest, SendTarget,
};
pub use message_store::{MessageStore, MessageStoreDependencies};
pub use room_directory::{PrivateRoom, RoomDirectory, RoomDirectoryDependencies};
