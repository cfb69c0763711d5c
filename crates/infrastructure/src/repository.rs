use std::sync::Arc;

use application::repository::{
    ConversationRepository, MessagePage, MessageRepository, UserDirectory,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Attachment, Conversation, ConversationId, DirectPair, DirectoryUser, Message, MessageId,
    MessageStatus, RepositoryError, Timestamp, UserId,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

pub(crate) fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        other => RepositoryError::storage(other.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

pub async fn create_pg_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    username: String,
    role: String,
}

impl TryFrom<UserRecord> for DirectoryUser {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        Ok(DirectoryUser {
            id: UserId::from(value.id),
            username: value.username,
            role: value.role.parse().map_err(|err: domain::DomainError| invalid_data(err.to_string()))?,
        })
    }
}

#[derive(Debug, FromRow)]
struct ConversationRecord {
    id: Uuid,
    member_low: Uuid,
    member_high: Uuid,
    last_message_id: Option<Uuid>,
    last_message_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ConversationRecord> for Conversation {
    type Error = RepositoryError;

    fn try_from(value: ConversationRecord) -> Result<Self, Self::Error> {
        let members = DirectPair::new(value.member_low.into(), value.member_high.into())
            .map_err(|err| invalid_data(err.to_string()))?;
        Ok(Conversation {
            id: ConversationId::from(value.id),
            members,
            last_message_id: value.last_message_id.map(MessageId::from),
            last_message_at: value.last_message_at,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    receiver_id: Option<Uuid>,
    content: String,
    message_type: String,
    file_url: Option<String>,
    file_size: Option<i64>,
    duration: Option<i32>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let attachment = value.file_url.map(|file_url| Attachment {
            file_url,
            file_size: value.file_size,
            duration: value.duration,
        });
        Ok(Message {
            id: MessageId::from(value.id),
            conversation_id: ConversationId::from(value.conversation_id),
            sender_id: UserId::from(value.sender_id),
            receiver_id: value.receiver_id.map(UserId::from),
            content: value.content,
            message_type: value
                .message_type
                .parse()
                .map_err(|err: domain::DomainError| invalid_data(err.to_string()))?,
            attachment,
            status: value
                .status
                .parse()
                .map_err(|err: domain::DomainError| invalid_data(err.to_string()))?,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, receiver_id, content, message_type, \
     file_url, file_size, duration, status, created_at, updated_at";

const UNREAD_STATUSES: [MessageStatus; 2] = [MessageStatus::Sent, MessageStatus::Delivered];

fn status_list(statuses: &[MessageStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

/// 转义 LIKE 通配符，关键字按字面匹配
fn like_pattern(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len() + 2);
    escaped.push('%');
    for ch in keyword.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

fn into_messages(records: Vec<MessageRecord>) -> Result<Vec<Message>, RepositoryError> {
    records.into_iter().map(Message::try_from).collect()
}

fn sql_offset(offset: u64) -> i64 {
    i64::try_from(offset).unwrap_or(i64::MAX)
}

#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_id(&self, id: UserId) -> Result<Option<DirectoryUser>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, username, role FROM users WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(DirectoryUser::try_from).transpose()
    }
}

#[derive(Clone)]
pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn find_by_id(&self, id: ConversationId) -> Result<Option<Conversation>, RepositoryError> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT id, member_low, member_high, last_message_id, last_message_at, created_at
            FROM conversations WHERE id = $1
            "#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Conversation::try_from).transpose()
    }

    async fn get_or_create_direct(
        &self,
        members: DirectPair,
        now: Timestamp,
    ) -> Result<Conversation, RepositoryError> {
        // 冲突时做一次空更新以便 RETURNING 返回已有行
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"
            INSERT INTO conversations (id, member_low, member_high, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (member_low, member_high)
            DO UPDATE SET member_low = EXCLUDED.member_low
            RETURNING id, member_low, member_high, last_message_id, last_message_at, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(Uuid::from(members.low()))
        .bind(Uuid::from(members.high()))
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Conversation::try_from(record)
    }

    async fn update_last_message(
        &self,
        id: ConversationId,
        message_id: MessageId,
        at: Timestamp,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE conversations SET last_message_id = $2, last_message_at = $3 WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .bind(Uuid::from(message_id))
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

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn create(&self, message: &Message) -> Result<(), RepositoryError> {
        let attachment = message.attachment.as_ref();
        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, receiver_id, content, message_type,
                                  file_url, file_size, duration, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.conversation_id))
        .bind(Uuid::from(message.sender_id))
        .bind(message.receiver_id.map(Uuid::from))
        .bind(&message.content)
        .bind(message.message_type.as_str())
        .bind(attachment.map(|a| a.file_url.as_str()))
        .bind(attachment.and_then(|a| a.file_size))
        .bind(attachment.and_then(|a| a.duration))
        .bind(message.status.as_str())
        .bind(message.created_at)
        .bind(message.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Message::try_from).transpose()
    }

    async fn update_status(
        &self,
        id: MessageId,
        target: MessageStatus,
        at: Timestamp,
    ) -> Result<bool, RepositoryError> {
        let allowed = status_list(MessageStatus::allowed_predecessors(target));
        if allowed.is_empty() {
            return Ok(false);
        }

        let result = sqlx::query(
            "UPDATE messages SET status = $2, updated_at = $3 WHERE id = $1 AND status = ANY($4)",
        )
        .bind(Uuid::from(id))
        .bind(target.as_str())
        .bind(at)
        .bind(allowed)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
        at: Timestamp,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE messages SET status = 'read', updated_at = $3
            WHERE conversation_id = $1 AND receiver_id = $2 AND status = ANY($4)
            "#,
        )
        .bind(Uuid::from(conversation_id))
        .bind(Uuid::from(reader))
        .bind(at)
        .bind(status_list(&UNREAD_STATUSES))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected())
    }

    async fn find_counterpart(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
    ) -> Result<Option<UserId>, RepositoryError> {
        let sender: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT sender_id FROM messages
            WHERE conversation_id = $1 AND receiver_id = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(Uuid::from(conversation_id))
        .bind(Uuid::from(reader))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(sender.map(UserId::from))
    }

    async fn unread_count(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
    ) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM messages
            WHERE conversation_id = $1 AND receiver_id = $2 AND status = ANY($3)
            "#,
        )
        .bind(Uuid::from(conversation_id))
        .bind(Uuid::from(reader))
        .bind(status_list(&UNREAD_STATUSES))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(count.max(0) as u64)
    }

    async fn list_by_conversation(
        &self,
        conversation_id: ConversationId,
        offset: u64,
        limit: u32,
    ) -> Result<MessagePage, RepositoryError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE conversation_id = $1")
            .bind(Uuid::from(conversation_id))
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at DESC, id DESC
            OFFSET $2 LIMIT $3
            "#
        ))
        .bind(Uuid::from(conversation_id))
        .bind(sql_offset(offset))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(MessagePage {
            total: total.max(0) as u64,
            messages: into_messages(records)?,
        })
    }

    async fn history_before(
        &self,
        conversation_id: ConversationId,
        before: Option<Timestamp>,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE conversation_id = $1 AND ($2::timestamptz IS NULL OR created_at < $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#
        ))
        .bind(Uuid::from(conversation_id))
        .bind(before)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        into_messages(records)
    }

    async fn search(
        &self,
        user: UserId,
        keyword: &str,
        offset: u64,
        limit: u32,
    ) -> Result<MessagePage, RepositoryError> {
        const FILTER: &str = "(sender_id = $1 OR receiver_id = $1) AND status <> 'recalled' \
             AND content ILIKE $2 ESCAPE '\\'";
        let pattern = like_pattern(keyword);

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM messages WHERE {FILTER}"))
            .bind(Uuid::from(user))
            .bind(&pattern)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE {FILTER}
            ORDER BY created_at DESC, id DESC
            OFFSET $3 LIMIT $4
            "#
        ))
        .bind(Uuid::from(user))
        .bind(&pattern)
        .bind(sql_offset(offset))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(MessagePage {
            total: total.max(0) as u64,
            messages: into_messages(records)?,
        })
    }
}

/// 基于同一个连接池的全部 Postgres 仓储
#[derive(Clone)]
pub struct PgStorage {
    pub user_directory: Arc<PgUserDirectory>,
    pub conversation_repository: Arc<PgConversationRepository>,
    pub message_repository: Arc<PgMessageRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            user_directory: Arc::new(PgUserDirectory::new(pool.clone())),
            conversation_repository: Arc::new(PgConversationRepository::new(pool.clone())),
            message_repository: Arc::new(PgMessageRepository::new(pool)),
        }
    }
}
