use async_trait::async_trait;
use domain::{
    Conversation, ConversationId, DirectPair, DirectoryUser, Message, MessageId, MessageStatus,
    RepositoryError, Timestamp, UserId,
};

/// 用户目录，只做存在性查询
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> Result<Option<DirectoryUser>, RepositoryError>;
}

/// 一页消息以及满足条件的总数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePage {
    pub total: u64,
    pub messages: Vec<Message>,
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_by_id(&self, id: ConversationId) -> Result<Option<Conversation>, RepositoryError>;

    /// 同一对用户无论谁先发起都返回同一个会话
    async fn get_or_create_direct(
        &self,
        members: DirectPair,
        now: Timestamp,
    ) -> Result<Conversation, RepositoryError>;

    async fn update_last_message(
        &self,
        id: ConversationId,
        message_id: MessageId,
        at: Timestamp,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn create(&self, message: &Message) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError>;

    /// 条件更新：仅当当前状态属于 `MessageStatus::allowed_predecessors(target)` 时生效。
    /// 返回是否有行被更新。
    async fn update_status(
        &self,
        id: MessageId,
        target: MessageStatus,
        at: Timestamp,
    ) -> Result<bool, RepositoryError>;

    /// 把会话中发给 `reader` 且未撤回、未读的消息全部标记为已读，返回更新条数
    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
        at: Timestamp,
    ) -> Result<u64, RepositoryError>;

    /// 会话中给 `reader` 发过消息的另一方
    async fn find_counterpart(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
    ) -> Result<Option<UserId>, RepositoryError>;

    async fn unread_count(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
    ) -> Result<u64, RepositoryError>;

    /// 会话内全部消息，按创建时间倒序分页
    async fn list_by_conversation(
        &self,
        conversation_id: ConversationId,
        offset: u64,
        limit: u32,
    ) -> Result<MessagePage, RepositoryError>;

    /// 创建时间早于 `before` 的消息，按创建时间倒序；`before` 为空时从最新一条开始
    async fn history_before(
        &self,
        conversation_id: ConversationId,
        before: Option<Timestamp>,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError>;

    /// `user` 收发过、内容包含 `keyword`（不区分大小写）且未撤回的消息
    async fn search(
        &self,
        user: UserId,
        keyword: &str,
        offset: u64,
        limit: u32,
    ) -> Result<MessagePage, RepositoryError>;
}
