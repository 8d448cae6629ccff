use std::sync::Arc;

use application::{FriendshipDirectory, MessageRepository, RoomRepository, UserDirectory};
use config::DatabaseConfig;
use thiserror::Error;
use tracing::info;

use crate::{
    migrations::MIGRATOR,
    repository::{create_pg_pool, PgStorage},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// PostgreSQL 后端：连接池、迁移和各个仓储
#[derive(Clone)]
pub struct Infrastructure {
    pub storage: Arc<PgStorage>,
}

impl Infrastructure {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, InfrastructureError> {
        let pool = create_pg_pool(&config.url, config.max_connections).await?;
        MIGRATOR.run(&pool).await?;
        info!("数据库迁移完成，连接池上限 {}", config.max_connections);

        Ok(Self {
            storage: Arc::new(PgStorage::new(pool)),
        })
    }

    pub fn room_repository(&self) -> Arc<dyn RoomRepository> {
        self.storage.room_repository.clone()
    }

    pub fn message_repository(&self) -> Arc<dyn MessageRepository> {
        self.storage.message_repository.clone()
    }

    pub fn friendships(&self) -> Arc<dyn FriendshipDirectory> {
        self.storage.user_directory.clone()
    }

    pub fn users(&self) -> Arc<dyn UserDirectory> {
        self.storage.user_directory.clone()
    }
}
