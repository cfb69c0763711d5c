use std::sync::Arc;
use std::time::Duration;

use application::ConnectionHandle;
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use config::WebSocketConfig;
use domain::{AuthenticatedUser, ClientFrame, DeviceLabel, RealtimeEvent};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant};

use crate::state::AppState;

/// 单个 WebSocket 连接
///
/// 升级成功后注册到 Hub，然后运行两个任务：
/// - 读任务：校验心跳期限，应答应用层 ping
/// - 写任务：批量写出出站缓冲区中的消息，并按周期发送 ping
///
/// 任一任务结束即视为连接断开，最后总会从 Hub 注销。
pub struct WebSocketConnection {
    state: AppState,
    user: AuthenticatedUser,
    device: DeviceLabel,
}

impl WebSocketConnection {
    pub fn new(state: AppState, user: AuthenticatedUser, device: DeviceLabel) -> Self {
        Self { state, user, device }
    }

    pub async fn run(self, socket: WebSocket) {
        let cfg = self.state.websocket.clone();
        let hub = Arc::clone(self.state.hub());
        let (handle, outbound) = ConnectionHandle::new(
            self.user.user_id,
            self.device.clone(),
            cfg.outbound_capacity,
        );
        let (conn_id, user_id) = (handle.id(), handle.user_id());

        if let Err(err) = hub.register(handle.clone()).await {
            tracing::error!(user_id = %user_id, error = %err, "注册连接失败");
            return;
        }

        let (sender, incoming) = socket.split();
        let mut send_task = tokio::spawn(write_pump(sender, outbound, cfg.clone()));
        let mut recv_task = tokio::spawn(read_pump(incoming, handle, cfg.pong_wait()));

        let recv_finished = tokio::select! {
            _ = &mut send_task => {
                tracing::debug!(conn_id = %conn_id, "WebSocket发送任务结束");
                recv_task.abort();
                false
            }
            _ = &mut recv_task => {
                tracing::debug!(conn_id = %conn_id, "WebSocket接收任务结束");
                true
            }
        };

        if let Err(err) = hub.unregister(conn_id, user_id).await {
            tracing::error!(user_id = %user_id, conn_id = %conn_id, error = %err, "注销连接失败");
        }

        // 注销后出站缓冲区的发送端全部释放，写任务会发出 Close 帧后退出
        if recv_finished && timeout(cfg.write_wait(), &mut send_task).await.is_err() {
            send_task.abort();
        }

        tracing::info!(user_id = %user_id, conn_id = %conn_id, device = %self.device, "WebSocket连接已断开");
    }
}

async fn read_pump(mut incoming: SplitStream<WebSocket>, handle: ConnectionHandle, pong_wait: Duration) {
    let mut deadline = Instant::now() + pong_wait;
    loop {
        let message = match timeout_at(deadline, incoming.next()).await {
            Err(_) => {
                tracing::info!(user_id = %handle.user_id(), conn_id = %handle.id(), "心跳超时，关闭连接");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                tracing::debug!(conn_id = %handle.id(), error = %err, "读取WebSocket消息失败");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            WsMessage::Close(_) => {
                tracing::debug!(conn_id = %handle.id(), "WebSocket收到关闭消息");
                break;
            }
            WsMessage::Pong(_) => {
                deadline = Instant::now() + pong_wait;
            }
            // 底层库会自动回复 pong
            WsMessage::Ping(_) => {}
            WsMessage::Text(text) => handle_client_frame(&handle, text.as_str()),
            WsMessage::Binary(_) => {
                tracing::debug!(conn_id = %handle.id(), "忽略二进制消息");
            }
        }
    }
}

fn handle_client_frame(handle: &ConnectionHandle, raw: &str) {
    let frame: ClientFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::debug!(conn_id = %handle.id(), error = %err, "无法解析的客户端消息");
            return;
        }
    };

    if !frame.is_ping() {
        tracing::debug!(conn_id = %handle.id(), kind = %frame.kind, "未知的客户端消息类型");
        return;
    }

    let pong = RealtimeEvent::pong(chrono::Utc::now());
    match serde_json::to_string(&pong) {
        Ok(payload) => {
            if let Err(err) = handle.try_enqueue(Arc::from(payload)) {
                tracing::warn!(conn_id = %handle.id(), error = %err, "pong入队失败");
            }
        }
        Err(err) => tracing::warn!(error = %err, "failed to serialize pong"),
    }
}

async fn write_pump(
    mut sender: SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::Receiver<Arc<str>>,
    cfg: WebSocketConfig,
) {
    let write_wait = cfg.write_wait();
    let mut ticker = tokio::time::interval_at(Instant::now() + cfg.ping_period(), cfg.ping_period());

    loop {
        let frame = tokio::select! {
            payload = outbound.recv() => match payload {
                Some(first) => WsMessage::Text(coalesce(first, &mut outbound, cfg.outbound_capacity).into()),
                None => {
                    let _ = timeout(write_wait, sender.send(WsMessage::Close(None))).await;
                    break;
                }
            },
            _ = ticker.tick() => WsMessage::Ping(Bytes::new()),
        };

        match timeout(write_wait, sender.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "写入WebSocket失败");
                break;
            }
            Err(_) => {
                tracing::info!("写超时，关闭连接");
                break;
            }
        }
    }
}

/// 把已经排队的消息合并为一帧，按换行分隔
fn coalesce(first: Arc<str>, outbound: &mut mpsc::Receiver<Arc<str>>, limit: usize) -> String {
    let mut batch = String::from(&*first);
    for _ in 1..limit {
        match outbound.try_recv() {
            Ok(next) => {
                batch.push('\n');
                batch.push_str(&next);
            }
            Err(_) => break,
        }
    }
    batch
}
