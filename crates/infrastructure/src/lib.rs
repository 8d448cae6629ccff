//! 基础设施层实现。
//!
//! 提供 PostgreSQL 仓储、进程内实时分发中心、附件上传等适配器，实现应用层定义的接口。

pub mod builder;
pub mod hub;
pub mod migrations;
pub mod repository;
pub mod upload;

pub use builder::{Infrastructure, InfrastructureError};
pub use hub::InMemoryRealtimeHub;
pub use migrations::MIGRATOR;
pub use repository::{
    create_pg_pool, PgMessageRepository, PgRoomRepository, PgStorage, PgUserDirectory,
};
pub use upload::{is_allowed_content_type, DataUrlUploader};
