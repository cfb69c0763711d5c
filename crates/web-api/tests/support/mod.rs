#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{
    memory::{
        MemoryConversationRepository, MemoryMessageRepository, MemoryOfflineQueue,
        MemoryUserDirectory, RecordingEventPublisher,
    },
    DeliveryPolicy, DeliveryService, DeliveryServiceDependencies, Hub, RateLimiter, RealtimeHub,
    SystemClock,
};
use config::{AppConfig, WebSocketConfig};
use domain::{AuthenticatedUser, DirectoryUser, UserId, UserRole};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::{net::TcpListener, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message as TungsteniteMessage},
    MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState, JwtConfig, JwtService};

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// 基于内存实现的完整服务，监听随机端口
pub struct TestApp {
    pub addr: SocketAddr,
    pub jwt: Arc<JwtService>,
    pub hub: Hub,
    pub users: Arc<MemoryUserDirectory>,
    pub messages: Arc<MemoryMessageRepository>,
    pub offline: Arc<MemoryOfflineQueue>,
    pub service: DeliveryService,
    pub http: reqwest::Client,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(None, AppConfig::default().websocket).await
    }

    pub async fn spawn_rate_limited(requests_per_minute: u32) -> Self {
        let limiter = Arc::new(RateLimiter::per_minute(requests_per_minute));
        Self::spawn_with(Some(limiter), AppConfig::default().websocket).await
    }

    /// 使用指定的连接参数（心跳周期、Origin 白名单等）
    pub async fn spawn_with_websocket(websocket: WebSocketConfig) -> Self {
        Self::spawn_with(None, websocket).await
    }

    pub async fn spawn_with(rate_limiter: Option<Arc<RateLimiter>>, websocket: WebSocketConfig) -> Self {
        let (hub, _hub_loop) = Hub::start(websocket.hub_queue_capacity);
        let users = Arc::new(MemoryUserDirectory::new());
        let messages = Arc::new(MemoryMessageRepository::new());
        let offline = Arc::new(MemoryOfflineQueue::default());

        let service = DeliveryService::new(DeliveryServiceDependencies {
            user_directory: users.clone(),
            conversation_repository: Arc::new(MemoryConversationRepository::new()),
            message_repository: messages.clone(),
            offline_queue: offline.clone(),
            event_publisher: Arc::new(RecordingEventPublisher::new()),
            hub: Arc::new(hub.clone()),
            clock: Arc::new(SystemClock),
            policy: DeliveryPolicy::default(),
        });

        let jwt = Arc::new(JwtService::new(JwtConfig {
            secret: "integration-test-secret-0123456789abcdef".to_string(),
            expiration_hours: 1,
        }));

        let state = AppState::new(service.clone(), jwt.clone(), rate_limiter, websocket);
        let app = router(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            jwt,
            hub,
            users,
            messages,
            offline,
            service,
            http: reqwest::Client::new(),
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, token: &str, device: Option<&str>) -> String {
        match device {
            Some(device) => format!("ws://{}/api/v1/ws?token={}&device_type={}", self.addr, token, device),
            None => format!("ws://{}/api/v1/ws?token={}", self.addr, token),
        }
    }

    /// 在目录中创建用户并签发 token
    pub async fn create_user(&self, username: &str, role: UserRole) -> (UserId, String) {
        let id = UserId::generate();
        self.users
            .insert(DirectoryUser {
                id,
                username: username.to_string(),
                role,
            })
            .await;
        let token = self
            .jwt
            .generate_token(&AuthenticatedUser {
                user_id: id,
                username: username.to_string(),
                role,
            })
            .expect("token");
        (id, token)
    }

    pub async fn connect(&self, token: &str, device: Option<&str>) -> WsClient {
        let (socket, _) = connect_async(self.ws_url(token, device)).await.expect("ws connect");
        socket
    }

    /// 带 Origin 头发起升级，失败时返回握手错误
    pub async fn connect_with_origin(
        &self,
        token: &str,
        origin: &str,
    ) -> Result<WsClient, tokio_tungstenite::tungstenite::Error> {
        let mut request = self.ws_url(token, None).into_client_request()?;
        request
            .headers_mut()
            .insert("origin", HeaderValue::from_str(origin).expect("origin header"));
        connect_async(request).await.map(|(socket, _)| socket)
    }

    /// 等待 Hub 中的连接数达到期望值
    pub async fn wait_for_connections(&self, expected: usize) {
        self.wait_for_connections_within(expected, Duration::from_secs(2)).await;
    }

    pub async fn wait_for_connections_within(&self, expected: usize, limit: Duration) {
        timeout(limit, async {
            while self.hub.total_connection_count().await != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connection count not reached");
    }

    /// 等待后台投递任务全部完成
    pub async fn settle(&self) {
        self.service.drain().await;
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// 读取下一条文本帧中的全部事件（同一帧可能包含多条以换行分隔的事件）
pub async fn next_events(socket: &mut WsClient) -> Vec<Value> {
    loop {
        let frame = timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream closed")
            .expect("frame error");
        if let TungsteniteMessage::Text(text) = frame {
            return text
                .as_str()
                .lines()
                .map(|line| serde_json::from_str(line).expect("event json"))
                .collect();
        }
    }
}

pub async fn next_event(socket: &mut WsClient) -> Value {
    let mut events = next_events(socket).await;
    assert_eq!(events.len(), 1, "expected a single event per frame: {events:?}");
    events.remove(0)
}

/// 断言短时间内没有收到文本帧
pub async fn expect_silence(socket: &mut WsClient) {
    let result = timeout(Duration::from_millis(200), async {
        loop {
            match socket.next().await {
                Some(Ok(TungsteniteMessage::Text(text))) => return Some(text),
                Some(Ok(_)) => continue,
                _ => return None,
            }
        }
    })
    .await;
    if let Ok(Some(text)) = result {
        panic!("unexpected frame: {}", text.as_str());
    }
}
