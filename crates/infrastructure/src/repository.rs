use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use application::{
    FriendshipDirectory, MessageRepository, RoomChange, RoomChangeError, RoomRepository,
    UserDirectory,
};
use async_trait::async_trait;
use domain::{
    pair_key, Attachment, ConversationRoom, Message, MessageId, ReadReceipt, RepositoryError,
    RoomId, RoomKind, Timestamp, UserId, UserProfile,
};
use sqlx::{
    postgres::PgPoolOptions, types::Json, FromRow, PgExecutor, PgPool, Postgres, Transaction,
};
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => RepositoryError::NotFound,
        _ => RepositoryError::storage(err.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

fn uuids<T: Copy + Into<Uuid>>(ids: &[T]) -> Vec<Uuid> {
    ids.iter().map(|id| (*id).into()).collect()
}

#[derive(Debug, FromRow)]
struct RoomRecord {
    id: Uuid,
    kind: String,
    name: Option<String>,
    admin_id: Option<Uuid>,
    created_at: Timestamp,
    last_activity_at: Timestamp,
}

#[derive(Debug, FromRow)]
struct MemberRecord {
    room_id: Uuid,
    user_id: Uuid,
    is_manager: bool,
}

impl RoomRecord {
    fn into_room(self, members: &[MemberRecord]) -> Result<ConversationRoom, RepositoryError> {
        let kind = RoomKind::parse(&self.kind)
            .ok_or_else(|| invalid_data(format!("unknown room kind: {}", self.kind)))?;
        let own: Vec<&MemberRecord> = members.iter().filter(|m| m.room_id == self.id).collect();

        Ok(ConversationRoom {
            id: RoomId::from(self.id),
            kind,
            members: own.iter().map(|m| UserId::from(m.user_id)).collect(),
            name: self.name,
            admin: self.admin_id.map(UserId::from),
            managers: own
                .iter()
                .filter(|m| m.is_manager)
                .map(|m| UserId::from(m.user_id))
                .collect(),
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    room_id: Uuid,
    sender_id: Uuid,
    content: String,
    attachments: Json<Vec<Attachment>>,
    created_at: Timestamp,
}

#[derive(Debug, FromRow)]
struct ReadRecord {
    message_id: Uuid,
    user_id: Uuid,
    read_at: Timestamp,
}

impl MessageRecord {
    fn into_message(self, reads: &[ReadRecord]) -> Message {
        Message {
            id: MessageId::from(self.id),
            room_id: RoomId::from(self.room_id),
            sender_id: UserId::from(self.sender_id),
            content: self.content,
            attachments: self.attachments.0,
            read_by: reads
                .iter()
                .filter(|r| r.message_id == self.id)
                .map(|r| ReadReceipt {
                    user_id: UserId::from(r.user_id),
                    read_at: r.read_at,
                })
                .collect(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ProfileRecord {
    id: Uuid,
    display_name: String,
    avatar_url: Option<String>,
}

impl From<ProfileRecord> for UserProfile {
    fn from(value: ProfileRecord) -> Self {
        UserProfile {
            id: UserId::from(value.id),
            display_name: value.display_name,
            avatar_url: value.avatar_url,
        }
    }
}

const ROOM_COLUMNS: &str = "id, kind, name, admin_id, created_at, last_activity_at";

pub struct PgRoomRepository {
    pool: PgPool,
}

impl PgRoomRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 批量补齐成员列表
    async fn hydrate(
        &self,
        records: Vec<RoomRecord>,
    ) -> Result<Vec<ConversationRoom>, RepositoryError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
        let members = load_members(&self.pool, &ids).await.map_err(map_sqlx_err)?;

        records
            .into_iter()
            .map(|record| record.into_room(&members))
            .collect()
    }

    async fn fetch_one(
        &self,
        sql: &str,
        binds: &[Uuid],
    ) -> Result<Option<ConversationRoom>, RepositoryError> {
        let mut query = sqlx::query_as::<_, RoomRecord>(sql);
        for value in binds {
            query = query.bind(*value);
        }
        let record = query
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        match record {
            Some(record) => Ok(self.hydrate(vec![record]).await?.pop()),
            None => Ok(None),
        }
    }
}

async fn load_members<'e>(
    executor: impl PgExecutor<'e>,
    room_ids: &[Uuid],
) -> Result<Vec<MemberRecord>, sqlx::Error> {
    sqlx::query_as::<_, MemberRecord>(
        r#"
        SELECT room_id, user_id, is_manager
        FROM room_members
        WHERE room_id = ANY($1)
        ORDER BY room_id, position
        "#,
    )
    .bind(room_ids)
    .fetch_all(executor)
    .await
}

async fn insert_room_row(
    tx: &mut Transaction<'_, Postgres>,
    room: &ConversationRoom,
    on_conflict_skip: bool,
) -> Result<bool, sqlx::Error> {
    let (low, high) = match room.private_pair() {
        Some((low, high)) => (Some(Uuid::from(low)), Some(Uuid::from(high))),
        None => (None, None),
    };
    let sql = if on_conflict_skip {
        r#"
        INSERT INTO chat_rooms (id, kind, name, admin_id, pair_low, pair_high, created_at, last_activity_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (pair_low, pair_high) WHERE kind = 'private' DO NOTHING
        "#
    } else {
        r#"
        INSERT INTO chat_rooms (id, kind, name, admin_id, pair_low, pair_high, created_at, last_activity_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#
    };
    let result = sqlx::query(sql)
        .bind(Uuid::from(room.id))
        .bind(room.kind.as_str())
        .bind(room.name.as_deref())
        .bind(room.admin.map(Uuid::from))
        .bind(low)
        .bind(high)
        .bind(room.created_at)
        .bind(room.last_activity_at)
        .execute(&mut **tx)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// 按 `members` 顺序同步成员表，留下的成员保留原来的 joined_at
async fn sync_members(
    tx: &mut Transaction<'_, Postgres>,
    room: &ConversationRoom,
) -> Result<(), sqlx::Error> {
    let members = uuids(&room.members);
    sqlx::query("DELETE FROM room_members WHERE room_id = $1 AND NOT (user_id = ANY($2))")
        .bind(Uuid::from(room.id))
        .bind(&members)
        .execute(&mut **tx)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO room_members (room_id, user_id, position, is_manager)
        SELECT $1, m.user_id, (m.ord - 1)::int, m.user_id = ANY($3)
        FROM UNNEST($2::uuid[]) WITH ORDINALITY AS m(user_id, ord)
        ON CONFLICT (room_id, user_id) DO UPDATE
        SET position = EXCLUDED.position, is_manager = EXCLUDED.is_manager
        "#,
    )
    .bind(Uuid::from(room.id))
    .bind(&members)
    .bind(uuids(&room.managers))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl RoomRepository for PgRoomRepository {
    async fn create(&self, room: ConversationRoom) -> Result<ConversationRoom, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        insert_room_row(&mut tx, &room, false)
            .await
            .map_err(map_sqlx_err)?;
        sync_members(&mut tx, &room).await.map_err(map_sqlx_err)?;
        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(room)
    }

    async fn create_private_if_absent(
        &self,
        room: ConversationRoom,
    ) -> Result<ConversationRoom, RepositoryError> {
        let (a, b) = room
            .private_pair()
            .ok_or_else(|| invalid_data("not a private room"))?;

        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        let inserted = insert_room_row(&mut tx, &room, true)
            .await
            .map_err(map_sqlx_err)?;
        if inserted {
            sync_members(&mut tx, &room).await.map_err(map_sqlx_err)?;
            tx.commit().await.map_err(map_sqlx_err)?;
            return Ok(room);
        }
        tx.rollback().await.map_err(map_sqlx_err)?;

        // 唯一索引上的冲突只会在对方事务提交后返回，此时一定能读到
        self.find_private(a, b)
            .await?
            .ok_or_else(|| invalid_data("private room vanished after conflict"))
    }

    async fn find_by_id(&self, id: RoomId) -> Result<Option<ConversationRoom>, RepositoryError> {
        let sql = format!("SELECT {ROOM_COLUMNS} FROM chat_rooms WHERE id = $1");
        self.fetch_one(&sql, &[Uuid::from(id)]).await
    }

    async fn find_private(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<ConversationRoom>, RepositoryError> {
        let (low, high) = pair_key(a, b);
        let sql = format!(
            "SELECT {ROOM_COLUMNS} FROM chat_rooms \
             WHERE kind = 'private' AND pair_low = $1 AND pair_high = $2"
        );
        self.fetch_one(&sql, &[Uuid::from(low), Uuid::from(high)]).await
    }

    async fn modify(
        &self,
        id: RoomId,
        change: RoomChange<'_>,
    ) -> Result<ConversationRoom, RoomChangeError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        // 行锁把同一房间上的修改串行化，事务提交前其他修改只能等待
        let sql = format!("SELECT {ROOM_COLUMNS} FROM chat_rooms WHERE id = $1 FOR UPDATE");
        let record = sqlx::query_as::<_, RoomRecord>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_err)?
            .ok_or(RepositoryError::NotFound)?;
        let members = load_members(&mut *tx, &[record.id])
            .await
            .map_err(map_sqlx_err)?;
        let mut room = record.into_room(&members)?;

        // 被拒绝时事务随 tx 一起回滚
        change(&mut room)?;

        sqlx::query("UPDATE chat_rooms SET name = $2, admin_id = $3 WHERE id = $1")
            .bind(Uuid::from(room.id))
            .bind(room.name.as_deref())
            .bind(room.admin.map(Uuid::from))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        sync_members(&mut tx, &room).await.map_err(map_sqlx_err)?;
        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(room)
    }

    async fn delete(&self, id: RoomId) -> Result<(), RepositoryError> {
        // 成员、消息、已读回执都随外键级联删除
        let result = sqlx::query("DELETE FROM chat_rooms WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_for_member(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConversationRoom>, RepositoryError> {
        let records = sqlx::query_as::<_, RoomRecord>(
            r#"
            SELECT r.id, r.kind, r.name, r.admin_id, r.created_at, r.last_activity_at
            FROM chat_rooms r
            JOIN room_members m ON m.room_id = r.id
            WHERE m.user_id = $1
            ORDER BY r.last_activity_at DESC, r.id DESC
            "#,
        )
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        self.hydrate(records).await
    }

    async fn touch(&self, id: RoomId, at: Timestamp) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE chat_rooms SET last_activity_at = GREATEST(last_activity_at, $2) WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn receipts(&self, message_ids: &[Uuid]) -> Result<Vec<ReadRecord>, RepositoryError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, ReadRecord>(
            r#"
            SELECT message_id, user_id, read_at
            FROM message_reads
            WHERE message_id = ANY($1)
            ORDER BY read_at, user_id
            "#,
        )
        .bind(message_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn append(&self, message: Message) -> Result<Message, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        sqlx::query(
            r#"
            INSERT INTO messages (id, room_id, sender_id, content, attachments, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.room_id))
        .bind(Uuid::from(message.sender_id))
        .bind(&message.content)
        .bind(Json(&message.attachments))
        .bind(message.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        for receipt in &message.read_by {
            sqlx::query(
                r#"
                INSERT INTO message_reads (message_id, user_id, read_at)
                VALUES ($1, $2, $3)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(Uuid::from(message.id))
            .bind(Uuid::from(receipt.user_id))
            .bind(receipt.read_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(message)
    }

    async fn page(
        &self,
        room_id: RoomId,
        before: Option<Timestamp>,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, room_id, sender_id, content, attachments, created_at
            FROM messages
            WHERE room_id = $1 AND ($2::timestamptz IS NULL OR created_at < $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(Uuid::from(room_id))
        .bind(before)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
        let reads = self.receipts(&ids).await?;
        Ok(records
            .into_iter()
            .map(|record| record.into_message(&reads))
            .collect())
    }

    async fn mark_read(
        &self,
        room_id: RoomId,
        message_ids: &[MessageId],
        user_id: UserId,
        at: Timestamp,
    ) -> Result<Vec<MessageId>, RepositoryError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let inserted: Vec<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO message_reads (message_id, user_id, read_at)
            SELECT m.id, $3, $4
            FROM messages m
            WHERE m.room_id = $1 AND m.id = ANY($2)
            ON CONFLICT DO NOTHING
            RETURNING message_id
            "#,
        )
        .bind(Uuid::from(room_id))
        .bind(uuids(message_ids))
        .bind(Uuid::from(user_id))
        .bind(at)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let inserted: HashSet<Uuid> = inserted.into_iter().collect();
        let mut seen = HashSet::new();
        Ok(message_ids
            .iter()
            .copied()
            .filter(|id| inserted.contains(&Uuid::from(*id)) && seen.insert(*id))
            .collect())
    }

    async fn count_unread(
        &self,
        room_ids: &[RoomId],
        user_id: UserId,
    ) -> Result<HashMap<RoomId, u64>, RepositoryError> {
        if room_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<(Uuid, i64)> = sqlx::query_as(
            r#"
            SELECT m.room_id, COUNT(*)
            FROM messages m
            WHERE m.room_id = ANY($1)
              AND m.sender_id <> $2
              AND NOT EXISTS (
                  SELECT 1 FROM message_reads r
                  WHERE r.message_id = m.id AND r.user_id = $2
              )
            GROUP BY m.room_id
            "#,
        )
        .bind(uuids(room_ids))
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let mut counts: HashMap<RoomId, u64> = room_ids.iter().map(|id| (*id, 0)).collect();
        for (room_id, count) in rows {
            counts.insert(RoomId::from(room_id), u64::try_from(count).unwrap_or(0));
        }
        Ok(counts)
    }

    async fn count_in_room(&self, room_id: RoomId) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE room_id = $1")
            .bind(Uuid::from(room_id))
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

/// 用户资料、在线镜像和好友关系都在同一个库里
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, display_name, avatar_url)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET display_name = EXCLUDED.display_name, avatar_url = EXCLUDED.avatar_url
            "#,
        )
        .bind(Uuid::from(profile.id))
        .bind(&profile.display_name)
        .bind(profile.avatar_url.as_deref())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    /// 双向各写一行
    pub async fn befriend(&self, a: UserId, b: UserId) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO friendships (user_id, friend_id)
            VALUES ($1, $2), ($2, $1)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(Uuid::from(a))
        .bind(Uuid::from(b))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    pub async fn unfriend(&self, a: UserId, b: UserId) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            DELETE FROM friendships
            WHERE (user_id = $1 AND friend_id = $2) OR (user_id = $2 AND friend_id = $1)
            "#,
        )
        .bind(Uuid::from(a))
        .bind(Uuid::from(b))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    pub async fn presence_of(
        &self,
        user_id: UserId,
    ) -> Result<Option<(bool, Option<Timestamp>)>, RepositoryError> {
        sqlx::query_as::<_, (bool, Option<Timestamp>)>(
            "SELECT is_online, last_seen FROM users WHERE id = $1",
        )
        .bind(Uuid::from(user_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }
}

#[async_trait]
impl FriendshipDirectory for PgUserDirectory {
    async fn is_friend(&self, a: UserId, b: UserId) -> Result<bool, RepositoryError> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM friendships WHERE user_id = $1 AND friend_id = $2)",
        )
        .bind(Uuid::from(a))
        .bind(Uuid::from(b))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }

    async fn friends_of(&self, user_id: UserId) -> Result<Vec<UserId>, RepositoryError> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT friend_id FROM friendships WHERE user_id = $1")
                .bind(Uuid::from(user_id))
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
        Ok(ids.into_iter().map(UserId::from).collect())
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn profiles(&self, ids: &[UserId]) -> Result<Vec<UserProfile>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, ProfileRecord>(
            "SELECT id, display_name, avatar_url FROM users WHERE id = ANY($1)",
        )
        .bind(uuids(ids))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        // 保持调用方给出的顺序
        let mut by_id: HashMap<Uuid, UserProfile> = records
            .into_iter()
            .map(|record| (record.id, UserProfile::from(record)))
            .collect();
        Ok(ids
            .iter()
            .filter_map(|id| by_id.remove(&Uuid::from(*id)))
            .collect())
    }

    async fn set_presence(
        &self,
        user_id: UserId,
        is_online: bool,
        at: Timestamp,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE users
            SET is_online = $2,
                last_seen = CASE WHEN $2 THEN last_seen ELSE $3 END
            WHERE id = $1
            "#,
        )
        .bind(Uuid::from(user_id))
        .bind(is_online)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }
}

pub struct PgStorage {
    pub pool: PgPool,
    pub room_repository: Arc<PgRoomRepository>,
    pub message_repository: Arc<PgMessageRepository>,
    pub user_directory: Arc<PgUserDirectory>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            room_repository: Arc::new(PgRoomRepository::new(pool.clone())),
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            user_directory: Arc::new(PgUserDirectory::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
