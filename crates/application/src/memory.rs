//! 进程内实现，用于测试和无外部依赖的本地运行

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use domain::{
    Conversation, ConversationId, DirectPair, DirectoryUser, Message, MessageId, MessageStatus,
    RepositoryError, Timestamp, UserId,
};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::offline::OfflineQueue;
use crate::publisher::{EventPublisher, PublishError};
use crate::repository::{ConversationRepository, MessagePage, MessageRepository, UserDirectory};

#[derive(Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<UserId, DirectoryUser>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user: DirectoryUser) {
        self.users.write().await.insert(user.id, user);
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_id(&self, id: UserId) -> Result<Option<DirectoryUser>, RepositoryError> {
        Ok(self.users.read().await.get(&id).cloned())
    }
}

#[derive(Default)]
pub struct MemoryConversationRepository {
    by_pair: RwLock<HashMap<DirectPair, Conversation>>,
}

impl MemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationRepository for MemoryConversationRepository {
    async fn find_by_id(&self, id: ConversationId) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self
            .by_pair
            .read()
            .await
            .values()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn get_or_create_direct(
        &self,
        members: DirectPair,
        now: Timestamp,
    ) -> Result<Conversation, RepositoryError> {
        let mut by_pair = self.by_pair.write().await;
        let conversation = by_pair
            .entry(members)
            .or_insert_with(|| Conversation::new_direct(ConversationId::generate(), members, now));
        Ok(conversation.clone())
    }

    async fn update_last_message(
        &self,
        id: ConversationId,
        message_id: MessageId,
        at: Timestamp,
    ) -> Result<(), RepositoryError> {
        let mut by_pair = self.by_pair.write().await;
        let conversation = by_pair
            .values_mut()
            .find(|c| c.id == id)
            .ok_or(RepositoryError::NotFound)?;
        conversation.last_message_id = Some(message_id);
        conversation.last_message_at = Some(at);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryMessageRepository {
    messages: RwLock<HashMap<MessageId, Message>>,
    fail_writes: AtomicBool,
}

impl MemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让后续的 `create` 返回存储错误
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }

    /// 直接覆盖一条消息，用于构造历史数据
    pub async fn put(&self, message: Message) {
        self.messages.write().await.insert(message.id, message);
    }
}

#[async_trait]
impl MessageRepository for MemoryMessageRepository {
    async fn create(&self, message: &Message) -> Result<(), RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::storage("memory store unavailable"));
        }
        let mut messages = self.messages.write().await;
        if messages.contains_key(&message.id) {
            return Err(RepositoryError::Conflict);
        }
        messages.insert(message.id, message.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        Ok(self.messages.read().await.get(&id).cloned())
    }

    async fn update_status(
        &self,
        id: MessageId,
        target: MessageStatus,
        at: Timestamp,
    ) -> Result<bool, RepositoryError> {
        let mut messages = self.messages.write().await;
        let Some(message) = messages.get_mut(&id) else {
            return Ok(false);
        };
        if !MessageStatus::allowed_predecessors(target).contains(&message.status) {
            return Ok(false);
        }
        message.status = target;
        message.updated_at = at;
        Ok(true)
    }

    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
        at: Timestamp,
    ) -> Result<u64, RepositoryError> {
        let mut messages = self.messages.write().await;
        let mut updated = 0;
        for message in messages.values_mut().filter(|m| {
            m.conversation_id == conversation_id
                && m.receiver_id == Some(reader)
                && matches!(m.status, MessageStatus::Sent | MessageStatus::Delivered)
        }) {
            message.status = MessageStatus::Read;
            message.updated_at = at;
            updated += 1;
        }
        Ok(updated)
    }

    async fn find_counterpart(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
    ) -> Result<Option<UserId>, RepositoryError> {
        let messages = self.messages.read().await;
        Ok(messages
            .values()
            .filter(|m| m.conversation_id == conversation_id && m.receiver_id == Some(reader))
            .max_by_key(|m| m.created_at)
            .map(|m| m.sender_id))
    }

    async fn unread_count(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
    ) -> Result<u64, RepositoryError> {
        let messages = self.messages.read().await;
        Ok(messages
            .values()
            .filter(|m| {
                m.conversation_id == conversation_id
                    && m.receiver_id == Some(reader)
                    && matches!(m.status, MessageStatus::Sent | MessageStatus::Delivered)
            })
            .count() as u64)
    }

    async fn list_by_conversation(
        &self,
        conversation_id: ConversationId,
        offset: u64,
        limit: u32,
    ) -> Result<MessagePage, RepositoryError> {
        let messages = self.messages.read().await;
        let matching = newest_first(messages.values().filter(|m| m.conversation_id == conversation_id));
        Ok(page_of(matching, offset, limit))
    }

    async fn history_before(
        &self,
        conversation_id: ConversationId,
        before: Option<Timestamp>,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        let matching = newest_first(messages.values().filter(|m| {
            m.conversation_id == conversation_id && before.map_or(true, |at| m.created_at < at)
        }));
        Ok(matching.into_iter().take(limit as usize).collect())
    }

    async fn search(
        &self,
        user: UserId,
        keyword: &str,
        offset: u64,
        limit: u32,
    ) -> Result<MessagePage, RepositoryError> {
        let needle = keyword.to_lowercase();
        let messages = self.messages.read().await;
        let matching = newest_first(messages.values().filter(|m| {
            (m.sender_id == user || m.receiver_id == Some(user))
                && m.status != MessageStatus::Recalled
                && m.content.to_lowercase().contains(&needle)
        }));
        Ok(page_of(matching, offset, limit))
    }
}

/// 按创建时间倒序，时间相同时按 id 保证顺序稳定
fn newest_first<'a>(messages: impl Iterator<Item = &'a Message>) -> Vec<Message> {
    let mut sorted: Vec<Message> = messages.cloned().collect();
    sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    sorted
}

fn page_of(matching: Vec<Message>, offset: u64, limit: u32) -> MessagePage {
    let total = matching.len() as u64;
    let messages = matching
        .into_iter()
        .skip(usize::try_from(offset).unwrap_or(usize::MAX))
        .take(limit as usize)
        .collect();
    MessagePage { total, messages }
}

struct QueuedIds {
    ids: Vec<MessageId>,
    expires_at: Instant,
}

/// 带整体过期时间的离线队列
pub struct MemoryOfflineQueue {
    ttl: Duration,
    queues: Mutex<HashMap<UserId, QueuedIds>>,
}

impl MemoryOfflineQueue {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            queues: Mutex::new(HashMap::new()),
        }
    }

    pub async fn len(&self, user_id: UserId) -> usize {
        let now = Instant::now();
        self.queues
            .lock()
            .await
            .get(&user_id)
            .filter(|q| q.expires_at > now)
            .map_or(0, |q| q.ids.len())
    }
}

impl Default for MemoryOfflineQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(7 * 24 * 60 * 60))
    }
}

#[async_trait]
impl OfflineQueue for MemoryOfflineQueue {
    async fn push(&self, user_id: UserId, message_id: MessageId) -> Result<(), RepositoryError> {
        let now = Instant::now();
        let mut queues = self.queues.lock().await;
        let entry = queues.entry(user_id).or_insert_with(|| QueuedIds {
            ids: Vec::new(),
            expires_at: now,
        });
        if entry.expires_at <= now {
            entry.ids.clear();
        }
        entry.ids.push(message_id);
        entry.expires_at = now + self.ttl;
        Ok(())
    }

    async fn pop_all(&self, user_id: UserId) -> Result<Vec<MessageId>, RepositoryError> {
        let now = Instant::now();
        let mut queues = self.queues.lock().await;
        Ok(queues
            .remove(&user_id)
            .filter(|q| q.expires_at > now)
            .map(|q| q.ids)
            .unwrap_or_default())
    }
}

/// 记录所有发布内容的事件发布器，可配置前 N 次失败
#[derive(Default)]
pub struct RecordingEventPublisher {
    records: Mutex<Vec<(String, Vec<u8>)>>,
    failures_left: AtomicUsize,
}

impl RecordingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(times: usize) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            failures_left: AtomicUsize::new(times),
        }
    }

    pub async fn records(&self) -> Vec<(String, Vec<u8>)> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(&self, key: &str, payload: &[u8]) -> Result<(), PublishError> {
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(PublishError::Transport("simulated broker failure".into()));
        }
        self.records
            .lock()
            .await
            .push((key.to_string(), payload.to_vec()));
        Ok(())
    }
}
