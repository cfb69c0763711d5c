//! 在线连接注册表与消息扇出
//!
//! 注册表按用户 id 保存该用户全部活跃连接；用户在表中当且仅当其连接集合非空，
//! 这是"在线"的唯一定义。注册、注销与全量广播经由单个协调循环串行处理，
//! 定向推送与统计查询直接持有读锁。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{ConnectionId, DeviceLabel, RealtimeEvent, UserId};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("hub loop is not running")]
    Closed,
    #[error("failed to encode event: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    #[error("outbound buffer full")]
    Full,
    #[error("connection closed")]
    Closed,
}

/// 注册表中的连接句柄，持有该连接出站缓冲区的发送端
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: UserId,
    device: DeviceLabel,
    outbound: mpsc::Sender<Arc<str>>,
}

impl ConnectionHandle {
    /// 创建句柄和容量为 `capacity` 的出站缓冲区接收端
    pub fn new(
        user_id: UserId,
        device: DeviceLabel,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: ConnectionId::generate(),
            user_id,
            device,
            outbound: tx,
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn device(&self) -> &DeviceLabel {
        &self.device
    }

    /// 非阻塞入队
    pub fn try_enqueue(&self, payload: Arc<str>) -> Result<(), EnqueueError> {
        self.outbound.try_send(payload).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }
}

/// 实时推送抽象，便于替换为分片实现
#[async_trait]
pub trait RealtimeHub: Send + Sync {
    async fn register(&self, conn: ConnectionHandle) -> Result<(), HubError>;

    async fn unregister(&self, conn_id: ConnectionId, user_id: UserId) -> Result<(), HubError>;

    /// 返回接受了该事件的连接数；用户离线时为 0
    async fn send_to_user(&self, user_id: UserId, event: &RealtimeEvent)
        -> Result<usize, HubError>;

    async fn broadcast_to_all(&self, event: &RealtimeEvent) -> Result<usize, HubError>;

    async fn is_online(&self, user_id: UserId) -> bool;

    async fn online_user_count(&self) -> usize;

    async fn total_connection_count(&self) -> usize;

    async fn device_distribution(&self) -> HashMap<String, usize>;
}

#[derive(Debug, Default)]
struct Registry {
    users: HashMap<UserId, HashMap<ConnectionId, ConnectionHandle>>,
}

impl Registry {
    fn insert(&mut self, conn: ConnectionHandle) {
        self.users
            .entry(conn.user_id)
            .or_default()
            .insert(conn.id, conn);
    }

    fn remove(&mut self, conn_id: ConnectionId, user_id: UserId) -> bool {
        let Some(conns) = self.users.get_mut(&user_id) else {
            return false;
        };
        let removed = conns.remove(&conn_id).is_some();
        if conns.is_empty() {
            self.users.remove(&user_id);
        }
        removed
    }

    fn connection_count(&self) -> usize {
        self.users.values().map(HashMap::len).sum()
    }
}

enum HubCommand {
    Register {
        conn: ConnectionHandle,
        ack: oneshot::Sender<()>,
    },
    Unregister {
        conn_id: ConnectionId,
        user_id: UserId,
        ack: oneshot::Sender<()>,
    },
    Broadcast {
        payload: Arc<str>,
        ack: oneshot::Sender<usize>,
    },
}

#[derive(Clone)]
pub struct Hub {
    registry: Arc<RwLock<Registry>>,
    commands: mpsc::Sender<HubCommand>,
}

impl Hub {
    /// 启动协调循环；所有 `Hub` 克隆被丢弃后循环退出
    pub fn start(queue_capacity: usize) -> (Self, JoinHandle<()>) {
        let registry = Arc::new(RwLock::new(Registry::default()));
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let handle = tokio::spawn(run_loop(Arc::clone(&registry), rx));
        (
            Self {
                registry,
                commands: tx,
            },
            handle,
        )
    }

    fn encode(event: &RealtimeEvent) -> Result<Arc<str>, HubError> {
        serde_json::to_string(event)
            .map(Arc::from)
            .map_err(|err| HubError::Encode(err.to_string()))
    }
}

async fn run_loop(registry: Arc<RwLock<Registry>>, mut commands: mpsc::Receiver<HubCommand>) {
    while let Some(command) = commands.recv().await {
        match command {
            HubCommand::Register { conn, ack } => {
                let (user_id, conn_id, device) = (conn.user_id, conn.id, conn.device.clone());
                let mut reg = registry.write().await;
                reg.insert(conn);
                tracing::info!(
                    user_id = %user_id,
                    conn_id = %conn_id,
                    device = %device,
                    online_users = reg.users.len(),
                    connections = reg.connection_count(),
                    "连接已注册"
                );
                let _ = ack.send(());
            }
            HubCommand::Unregister {
                conn_id,
                user_id,
                ack,
            } => {
                let mut reg = registry.write().await;
                if reg.remove(conn_id, user_id) {
                    tracing::info!(
                        user_id = %user_id,
                        conn_id = %conn_id,
                        online_users = reg.users.len(),
                        connections = reg.connection_count(),
                        "连接已注销"
                    );
                }
                let _ = ack.send(());
            }
            HubCommand::Broadcast { payload, ack } => {
                let reg = registry.read().await;
                let accepted = fan_out(reg.users.values().flat_map(HashMap::values), &payload);
                let _ = ack.send(accepted);
            }
        }
    }
    tracing::debug!("hub loop stopped");
}

fn fan_out<'a>(conns: impl Iterator<Item = &'a ConnectionHandle>, payload: &Arc<str>) -> usize {
    let mut accepted = 0;
    for conn in conns {
        match conn.try_enqueue(Arc::clone(payload)) {
            Ok(()) => accepted += 1,
            Err(EnqueueError::Full) => {
                tracing::warn!(
                    user_id = %conn.user_id,
                    conn_id = %conn.id,
                    "出站缓冲区已满，丢弃消息"
                );
            }
            Err(EnqueueError::Closed) => {
                tracing::debug!(user_id = %conn.user_id, conn_id = %conn.id, "connection already closed");
            }
        }
    }
    accepted
}

#[async_trait]
impl RealtimeHub for Hub {
    async fn register(&self, conn: ConnectionHandle) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(HubCommand::Register { conn, ack })
            .await
            .map_err(|_| HubError::Closed)?;
        done.await.map_err(|_| HubError::Closed)
    }

    async fn unregister(&self, conn_id: ConnectionId, user_id: UserId) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(HubCommand::Unregister {
                conn_id,
                user_id,
                ack,
            })
            .await
            .map_err(|_| HubError::Closed)?;
        done.await.map_err(|_| HubError::Closed)
    }

    async fn send_to_user(
        &self,
        user_id: UserId,
        event: &RealtimeEvent,
    ) -> Result<usize, HubError> {
        let payload = Self::encode(event)?;
        let reg = self.registry.read().await;
        match reg.users.get(&user_id) {
            Some(conns) => Ok(fan_out(conns.values(), &payload)),
            None => {
                tracing::debug!(user_id = %user_id, event = event.event_type(), "user offline, skip push");
                Ok(0)
            }
        }
    }

    async fn broadcast_to_all(&self, event: &RealtimeEvent) -> Result<usize, HubError> {
        let payload = Self::encode(event)?;
        let (ack, done) = oneshot::channel();
        self.commands
            .send(HubCommand::Broadcast { payload, ack })
            .await
            .map_err(|_| HubError::Closed)?;
        done.await.map_err(|_| HubError::Closed)
    }

    async fn is_online(&self, user_id: UserId) -> bool {
        self.registry.read().await.users.contains_key(&user_id)
    }

    async fn online_user_count(&self) -> usize {
        self.registry.read().await.users.len()
    }

    async fn total_connection_count(&self) -> usize {
        self.registry.read().await.connection_count()
    }

    async fn device_distribution(&self) -> HashMap<String, usize> {
        let reg = self.registry.read().await;
        let mut distribution = HashMap::new();
        for conn in reg.users.values().flat_map(HashMap::values) {
            *distribution
                .entry(conn.device.as_str().to_string())
                .or_insert(0) += 1;
        }
        distribution
    }
}
