use async_trait::async_trait;
use domain::{MessageId, RepositoryError, UserId};

/// 按用户保存未投递消息 id 的有序队列，整体带过期时间
#[async_trait]
pub trait OfflineQueue: Send + Sync {
    /// 追加到队尾并刷新整个队列的过期时间
    async fn push(&self, user_id: UserId, message_id: MessageId) -> Result<(), RepositoryError>;

    /// 原子地取出并清空整个队列
    async fn pop_all(&self, user_id: UserId) -> Result<Vec<MessageId>, RepositoryError>;
}
