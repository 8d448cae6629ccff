//! 实时聊天核心领域模型
//!
//! 会话房间、消息、已读回执等实体及其不变量，不包含任何 I/O。

pub mod errors;
pub mod message;
pub mod room;
pub mod user;
pub mod value_objects;

pub use errors::*;
pub use message::*;
pub use room::*;
pub use user::*;
pub use value_objects::*;
