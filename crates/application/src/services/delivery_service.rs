use std::sync::Arc;
use std::time::Duration;

use config::DeliveryConfig;
use domain::{
    Attachment, ConversationId, DirectPair, DomainError, Message, MessageId,
    MessageStatus, MessageType, RealtimeEvent, UserId,
};
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;

use crate::{
    clock::Clock,
    error::ApplicationError,
    hub::RealtimeHub,
    offline::OfflineQueue,
    paging::{history_limit, PageRequest},
    publisher::{EventPublisher, ReplicationRecord},
    repository::{ConversationRepository, MessagePage, MessageRepository, UserDirectory},
    retry::{retry_async, Backoff, RetryConfig},
};

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub message_type: MessageType,
    pub attachment: Option<Attachment>,
}

/// 撤回窗口与复制重试策略
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    pub recall_window: chrono::Duration,
    pub replication: RetryConfig,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            recall_window: chrono::Duration::minutes(2),
            replication: RetryConfig::new(3, Backoff::linear(Duration::from_millis(100))),
        }
    }
}

impl DeliveryPolicy {
    pub fn from_config(cfg: &DeliveryConfig) -> Self {
        Self {
            recall_window: chrono::Duration::seconds(cfg.recall_window_secs as i64),
            replication: RetryConfig::new(
                cfg.replication_max_attempts,
                Backoff::linear(Duration::from_millis(cfg.replication_backoff_ms)),
            ),
        }
    }
}

pub struct DeliveryServiceDependencies {
    pub user_directory: Arc<dyn UserDirectory>,
    pub conversation_repository: Arc<dyn ConversationRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub offline_queue: Arc<dyn OfflineQueue>,
    pub event_publisher: Arc<dyn EventPublisher>,
    pub hub: Arc<dyn RealtimeHub>,
    pub clock: Arc<dyn Clock>,
    pub policy: DeliveryPolicy,
}

/// 消息投递流水线
///
/// 同步部分只做校验和持久化；实时推送、离线兜底和事件日志复制都在后台任务中完成，
/// 失败只记录日志，不影响调用方结果。
#[derive(Clone)]
pub struct DeliveryService {
    deps: Arc<DeliveryServiceDependencies>,
    tasks: TaskTracker,
    /// `drain` 与 `shutdown` 串行执行；值为 true 表示已经关闭
    lifecycle: Arc<Mutex<bool>>,
}

impl DeliveryService {
    pub fn new(deps: DeliveryServiceDependencies) -> Self {
        Self {
            deps: Arc::new(deps),
            tasks: TaskTracker::new(),
            lifecycle: Arc::new(Mutex::new(false)),
        }
    }

    pub fn hub(&self) -> &Arc<dyn RealtimeHub> {
        &self.deps.hub
    }

    pub async fn send_message(&self, request: SendMessageRequest) -> Result<Message, ApplicationError> {
        let members = DirectPair::new(request.sender_id, request.receiver_id)?;
        Message::validate_payload(&request.content, request.attachment.as_ref())?;

        self.deps
            .user_directory
            .find_by_id(request.receiver_id)
            .await?
            .ok_or(DomainError::UserNotFound)?;

        let now = self.deps.clock.now();
        let conversation = self
            .deps
            .conversation_repository
            .get_or_create_direct(members, now)
            .await?;

        let message = Message::new_direct(
            MessageId::generate(),
            conversation.id,
            request.sender_id,
            request.receiver_id,
            request.content,
            request.message_type,
            request.attachment,
            now,
        )?;
        self.deps.message_repository.create(&message).await?;

        if let Err(err) = self
            .deps
            .conversation_repository
            .update_last_message(conversation.id, message.id, now)
            .await
        {
            tracing::warn!(
                conversation_id = %conversation.id,
                message_id = %message.id,
                error = %err,
                "更新会话最后一条消息失败"
            );
        }

        self.spawn_replication(&message);
        self.spawn_push(message.clone());

        Ok(message)
    }

    pub async fn recall_message(
        &self,
        message_id: MessageId,
        requester: UserId,
    ) -> Result<Message, ApplicationError> {
        let mut message = self
            .deps
            .message_repository
            .find_by_id(message_id)
            .await?
            .ok_or(DomainError::MessageNotFound)?;

        let now = self.deps.clock.now();
        message.ensure_recallable(requester, now, self.deps.policy.recall_window)?;

        let updated = self
            .deps
            .message_repository
            .update_status(message_id, MessageStatus::Recalled, now)
            .await?;
        if !updated {
            // 校验之后状态被并发修改（例如已读）
            let current = self
                .deps
                .message_repository
                .find_by_id(message_id)
                .await?
                .map_or(message.status, |m| m.status);
            return Err(DomainError::InvalidStatusTransition {
                from: current,
                to: MessageStatus::Recalled,
            }
            .into());
        }
        message.transition_to(MessageStatus::Recalled, now)?;

        if let Some(counterpart) = message.counterpart_of(requester) {
            let event = RealtimeEvent::MessageStatus {
                message_id,
                status: MessageStatus::Recalled,
                timestamp: now,
            };
            self.spawn_notify(counterpart, event);
        }

        Ok(message)
    }

    /// 批量标记已读并给对方推送已读回执，返回本次更新的消息数
    pub async fn mark_as_read(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
    ) -> Result<u64, ApplicationError> {
        let now = self.deps.clock.now();
        let updated = self
            .deps
            .message_repository
            .mark_read(conversation_id, reader, now)
            .await?;

        let counterpart = self
            .deps
            .message_repository
            .find_counterpart(conversation_id, reader)
            .await?;
        if let Some(counterpart) = counterpart {
            let event = RealtimeEvent::ReadReceipt {
                conversation_id,
                reader_id: reader,
                read_at: now,
            };
            self.spawn_notify(counterpart, event);
        }

        Ok(updated)
    }

    /// 取出并清空离线队列；无法解析的 id 会被跳过
    pub async fn fetch_offline_messages(&self, user_id: UserId) -> Result<Vec<Message>, ApplicationError> {
        let ids = self.deps.offline_queue.pop_all(user_id).await?;
        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            match self.deps.message_repository.find_by_id(id).await {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => {
                    tracing::warn!(user_id = %user_id, message_id = %id, "离线消息不存在，跳过");
                }
                Err(err) => {
                    tracing::warn!(user_id = %user_id, message_id = %id, error = %err, "读取离线消息失败，跳过");
                }
            }
        }
        Ok(messages)
    }

    pub async fn unread_count(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
    ) -> Result<u64, ApplicationError> {
        Ok(self
            .deps
            .message_repository
            .unread_count(conversation_id, reader)
            .await?)
    }

    /// 会话消息分页，最新的在前；只有会话成员可以读取
    pub async fn list_messages(
        &self,
        conversation_id: ConversationId,
        requester: UserId,
        page: PageRequest,
    ) -> Result<MessagePage, ApplicationError> {
        self.ensure_member(conversation_id, requester).await?;
        Ok(self
            .deps
            .message_repository
            .list_by_conversation(conversation_id, page.offset(), page.page_size)
            .await?)
    }

    /// 向前翻页加载历史：返回早于 `before` 的至多 `limit` 条消息，最新的在前。
    /// 游标必须是本会话中的消息。
    pub async fn history_messages(
        &self,
        conversation_id: ConversationId,
        requester: UserId,
        before: Option<MessageId>,
        limit: Option<i64>,
    ) -> Result<Vec<Message>, ApplicationError> {
        self.ensure_member(conversation_id, requester).await?;

        let before_at = match before {
            Some(cursor) => {
                let cursor = self
                    .deps
                    .message_repository
                    .find_by_id(cursor)
                    .await?
                    .filter(|m| m.conversation_id == conversation_id)
                    .ok_or(DomainError::MessageNotFound)?;
                Some(cursor.created_at)
            }
            None => None,
        };

        Ok(self
            .deps
            .message_repository
            .history_before(conversation_id, before_at, history_limit(limit))
            .await?)
    }

    /// 在自己收发过的消息中搜索；关键字为空时直接返回空结果
    pub async fn search_messages(
        &self,
        user_id: UserId,
        keyword: &str,
        page: PageRequest,
    ) -> Result<MessagePage, ApplicationError> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(MessagePage::default());
        }
        Ok(self
            .deps
            .message_repository
            .search(user_id, keyword, page.offset(), page.page_size)
            .await?)
    }

    async fn ensure_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<(), ApplicationError> {
        let conversation = self
            .deps
            .conversation_repository
            .find_by_id(conversation_id)
            .await?
            .ok_or(DomainError::ConversationNotFound)?;
        Ok(conversation.ensure_member(user_id)?)
    }

    /// 外部协作方（群组、通话信令）推送的事件；`user_id` 为空时广播给所有连接
    pub async fn notify(
        &self,
        user_id: Option<UserId>,
        event: &RealtimeEvent,
    ) -> Result<usize, ApplicationError> {
        let accepted = match user_id {
            Some(user_id) => self.deps.hub.send_to_user(user_id, event).await?,
            None => self.deps.hub.broadcast_to_all(event).await?,
        };
        Ok(accepted)
    }

    /// 等待当前所有后台任务完成，之后仍可继续提交任务。
    /// 已经 `shutdown` 时只等待，不会重新打开任务集合。
    pub async fn drain(&self) {
        let shut_down = self.lifecycle.lock().await;
        self.tasks.close();
        self.tasks.wait().await;
        if !*shut_down {
            self.tasks.reopen();
        }
    }

    /// 停止接收新任务并等待进行中的任务结束
    pub async fn shutdown(&self) {
        let mut shut_down = self.lifecycle.lock().await;
        *shut_down = true;
        self.tasks.close();
        tracing::info!(pending = self.tasks.len(), "等待后台投递任务完成");
        self.tasks.wait().await;
    }

    fn spawn_replication(&self, message: &Message) {
        let record = ReplicationRecord::from(message);
        let deps = Arc::clone(&self.deps);
        self.tasks.spawn(async move {
            let payload = match record.to_bytes() {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::error!(message_id = %record.id, error = %err, "序列化复制记录失败");
                    return;
                }
            };
            let publisher = &deps.event_publisher;
            let (key, payload) = (record.key(), payload.as_slice());
            let result = retry_async(
                &deps.policy.replication,
                || publisher.publish(key, payload),
                |attempt, err| {
                    tracing::warn!(message_id = %record.id, attempt, error = %err, "复制消息失败，准备重试");
                },
            )
            .await;
            if let Err(err) = result {
                tracing::error!(
                    message_id = %record.id,
                    attempts = deps.policy.replication.max_attempts,
                    error = %err,
                    "复制消息最终失败"
                );
            }
        });
    }

    fn spawn_push(&self, message: Message) {
        let deps = Arc::clone(&self.deps);
        self.tasks.spawn(async move {
            let Some(receiver) = message.receiver_id else {
                return;
            };

            let accepted = if deps.hub.is_online(receiver).await {
                match deps
                    .hub
                    .send_to_user(receiver, &RealtimeEvent::Message(message.clone()))
                    .await
                {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        tracing::warn!(message_id = %message.id, error = %err, "实时推送失败");
                        0
                    }
                }
            } else {
                0
            };

            if accepted > 0 {
                match deps
                    .message_repository
                    .update_status(message.id, MessageStatus::Delivered, deps.clock.now())
                    .await
                {
                    Ok(true) => {
                        tracing::debug!(message_id = %message.id, connections = accepted, "message delivered");
                    }
                    Ok(false) => {
                        tracing::debug!(message_id = %message.id, "delivered update skipped by status guard");
                    }
                    Err(err) => {
                        tracing::warn!(message_id = %message.id, error = %err, "更新送达状态失败");
                    }
                }
                return;
            }

            if let Err(err) = deps.offline_queue.push(receiver, message.id).await {
                tracing::error!(
                    user_id = %receiver,
                    message_id = %message.id,
                    error = %err,
                    "写入离线队列失败"
                );
            }
        });
    }

    fn spawn_notify(&self, user_id: UserId, event: RealtimeEvent) {
        let deps = Arc::clone(&self.deps);
        self.tasks.spawn(async move {
            if !deps.hub.is_online(user_id).await {
                return;
            }
            if let Err(err) = deps.hub.send_to_user(user_id, &event).await {
                tracing::warn!(user_id = %user_id, event = event.event_type(), error = %err, "推送状态事件失败");
            }
        });
    }
}
