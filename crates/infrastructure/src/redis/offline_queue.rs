use std::time::Duration;

use application::offline::OfflineQueue;
use async_trait::async_trait;
use domain::{MessageId, RepositoryError, UserId};
use redis::aio::ConnectionManager;

use super::error::{RedisError, RedisResult};

/// 基于 Redis 列表的离线队列，键为 `<prefix><user_id>`
#[derive(Clone)]
pub struct RedisOfflineQueue {
    conn: ConnectionManager,
    key_prefix: String,
    ttl: Duration,
}

impl RedisOfflineQueue {
    pub async fn connect(url: &str, key_prefix: impl Into<String>, ttl: Duration) -> RedisResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self::new(conn, key_prefix, ttl))
    }

    pub fn new(conn: ConnectionManager, key_prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.into(),
            ttl,
        }
    }

    fn key(&self, user_id: UserId) -> String {
        format!("{}{}", self.key_prefix, user_id)
    }
}

#[async_trait]
impl OfflineQueue for RedisOfflineQueue {
    async fn push(&self, user_id: UserId, message_id: MessageId) -> Result<(), RepositoryError> {
        let key = self.key(user_id);
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("RPUSH")
            .arg(&key)
            .arg(message_id.to_string())
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(self.ttl.as_secs().max(1))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(RedisError::from)?;
        Ok(())
    }

    async fn pop_all(&self, user_id: UserId) -> Result<Vec<MessageId>, RepositoryError> {
        let key = self.key(user_id);
        let mut conn = self.conn.clone();
        let (raw, _deleted): (Vec<String>, i64) = redis::pipe()
            .atomic()
            .cmd("LRANGE")
            .arg(&key)
            .arg(0)
            .arg(-1)
            .cmd("DEL")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(RedisError::from)?;

        let ids = raw
            .into_iter()
            .filter_map(|value| match value.parse::<MessageId>() {
                Ok(id) => Some(id),
                Err(err) => {
                    tracing::warn!(user_id = %user_id, value = %value, error = %err, "离线队列中存在无效的消息 id");
                    None
                }
            })
            .collect();
        Ok(ids)
    }
}
