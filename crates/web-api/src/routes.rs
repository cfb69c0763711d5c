use std::collections::HashMap;

use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use application::{
    paging::{DEFAULT_LIST_PAGE_SIZE, DEFAULT_SEARCH_PAGE_SIZE},
    MessagePage, PageRequest, SendMessageRequest,
};
use domain::{Attachment, ConversationId, DeviceLabel, Message, MessageId, MessageType, RealtimeEvent, UserId};

use crate::{
    auth::CurrentUser, error::ApiError, rate_limit::rate_limit, state::AppState,
    ws_connection::WebSocketConnection,
};

#[derive(Debug, Deserialize)]
struct SendMessagePayload {
    receiver_id: Uuid,
    content: String,
    #[serde(rename = "type", default = "default_message_type")]
    message_type: MessageType,
    file_url: Option<String>,
    file_size: Option<i64>,
    duration: Option<i32>,
}

fn default_message_type() -> MessageType {
    MessageType::Text
}

impl SendMessagePayload {
    fn into_request(self, sender_id: UserId) -> SendMessageRequest {
        let attachment = self.file_url.map(|file_url| Attachment {
            file_url,
            file_size: self.file_size,
            duration: self.duration,
        });
        SendMessageRequest {
            sender_id,
            receiver_id: UserId::from(self.receiver_id),
            content: self.content,
            message_type: self.message_type,
            attachment,
        }
    }
}

#[derive(Debug, Serialize)]
struct OfflineMessages {
    count: usize,
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<i64>,
    page_size: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    before: Option<Uuid>,
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    keyword: String,
    page: Option<i64>,
    page_size: Option<i64>,
}

#[derive(Debug, Serialize)]
struct PagedMessages {
    total: u64,
    page: u32,
    page_size: u32,
    messages: Vec<Message>,
}

impl PagedMessages {
    fn new(page: PageRequest, result: MessagePage) -> Self {
        Self {
            total: result.total,
            page: page.page,
            page_size: page.page_size,
            messages: result.messages,
        }
    }
}

#[derive(Debug, Serialize)]
struct HistoryMessages {
    total: usize,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct MarkReadResult {
    updated: u64,
}

#[derive(Debug, Serialize)]
struct UnreadCount {
    unread: u64,
}

#[derive(Debug, Serialize)]
struct ConnectionStats {
    online_users: usize,
    total_connections: usize,
    device_distribution: HashMap<String, usize>,
}

/// 外部协作方推送的事件；缺省 `user_id` 时广播
#[derive(Debug, Deserialize)]
struct NotifyPayload {
    user_id: Option<Uuid>,
    event: RealtimeEvent,
}

#[derive(Debug, Serialize)]
struct NotifyResult {
    accepted: usize,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    device_type: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn_with_state(state.clone(), rate_limit)),
        )
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/messages", post(send_message))
        .route("/messages/offline", get(offline_messages))
        .route("/messages/search", get(search_messages))
        .route("/messages/{message_id}/recall", post(recall_message))
        .route("/conversations/{conversation_id}/messages", get(list_messages))
        .route("/conversations/{conversation_id}/history", get(history_messages))
        .route("/conversations/{conversation_id}/read", post(mark_as_read))
        .route("/conversations/{conversation_id}/unread", get(unread_count))
        .route("/system/connections", get(connection_stats))
        .route("/system/notify", post(notify))
        .route("/ws", get(websocket_upgrade))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn send_message(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<SendMessagePayload>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let message = state
        .delivery_service
        .send_message(payload.into_request(user.user_id()))
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

async fn recall_message(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(message_id): Path<Uuid>,
) -> Result<Json<Message>, ApiError> {
    let message = state
        .delivery_service
        .recall_message(MessageId::from(message_id), user.user_id())
        .await?;

    Ok(Json(message))
}

async fn mark_as_read(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<MarkReadResult>, ApiError> {
    let updated = state
        .delivery_service
        .mark_as_read(ConversationId::from(conversation_id), user.user_id())
        .await?;

    Ok(Json(MarkReadResult { updated }))
}

async fn unread_count(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<UnreadCount>, ApiError> {
    let unread = state
        .delivery_service
        .unread_count(ConversationId::from(conversation_id), user.user_id())
        .await?;

    Ok(Json(UnreadCount { unread }))
}

async fn list_messages(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> Result<Json<PagedMessages>, ApiError> {
    let page = PageRequest::new(query.page, query.page_size, DEFAULT_LIST_PAGE_SIZE);
    let result = state
        .delivery_service
        .list_messages(ConversationId::from(conversation_id), user.user_id(), page)
        .await?;

    Ok(Json(PagedMessages::new(page, result)))
}

async fn history_messages(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryMessages>, ApiError> {
    let messages = state
        .delivery_service
        .history_messages(
            ConversationId::from(conversation_id),
            user.user_id(),
            query.before.map(MessageId::from),
            query.limit,
        )
        .await?;

    Ok(Json(HistoryMessages {
        total: messages.len(),
        messages,
    }))
}

async fn search_messages(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<SearchQuery>,
) -> Result<Json<PagedMessages>, ApiError> {
    let page = PageRequest::new(query.page, query.page_size, DEFAULT_SEARCH_PAGE_SIZE);
    let result = state
        .delivery_service
        .search_messages(user.user_id(), &query.keyword, page)
        .await?;

    Ok(Json(PagedMessages::new(page, result)))
}

async fn offline_messages(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<OfflineMessages>, ApiError> {
    let messages = state
        .delivery_service
        .fetch_offline_messages(user.user_id())
        .await?;

    Ok(Json(OfflineMessages {
        count: messages.len(),
        messages,
    }))
}

async fn connection_stats(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ConnectionStats>, ApiError> {
    user.require_admin()?;
    let hub = state.hub();

    Ok(Json(ConnectionStats {
        online_users: hub.online_user_count().await,
        total_connections: hub.total_connection_count().await,
        device_distribution: hub.device_distribution().await,
    }))
}

async fn notify(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<NotifyPayload>,
) -> Result<Json<NotifyResult>, ApiError> {
    user.require_admin()?;
    let accepted = state
        .delivery_service
        .notify(payload.user_id.map(UserId::from), &payload.event)
        .await?;

    Ok(Json(NotifyResult { accepted }))
}

/// 认证失败返回 401，Origin 不在白名单返回 403，两种情况都不会升级连接
async fn websocket_upgrade(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let origin = headers
        .get(header::ORIGIN)
        .map(|value| value.to_str().map_err(|_| ApiError::forbidden("origin not allowed")))
        .transpose()?;
    if !state.websocket.allows_origin(origin) {
        tracing::warn!(user_id = %user.user_id(), origin = ?origin, "拒绝来自未授权 Origin 的 WebSocket 连接");
        return Err(ApiError::forbidden("origin not allowed"));
    }

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok());
    let device = DeviceLabel::infer(query.device_type.as_deref(), user_agent);
    let max_message_size = state.websocket.max_message_size;

    tracing::debug!(user_id = %user.user_id(), device = %device, "WebSocket升级请求");

    Ok(ws
        .max_message_size(max_message_size)
        .on_upgrade(move |socket| WebSocketConnection::new(state, user.0, device).run(socket)))
}
