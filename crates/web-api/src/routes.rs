use axum::{
    body::Bytes,
    extract::{ws::WebSocketUpgrade, DefaultBodyLimit, Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::Response,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use validator::Validate;

use application::{
    ApplicationError, BatchOutcome, CreateGroupRequest, MessagePage, RoomSummary, RoomView,
    SendTarget,
};
use domain::{Attachment, MessageId, RoomId, Timestamp, UserId};

use crate::{
    auth::authenticate, error::ApiError, state::AppState, ws_connection::WebSocketConnection,
};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreateGroupPayload {
    #[validate(length(min = 1, max = 100))]
    name: String,
    #[validate(length(min = 1))]
    member_ids: Vec<UserId>,
}

#[derive(Debug, Deserialize, Validate)]
struct RenameGroupPayload {
    #[validate(length(min = 1, max = 100))]
    name: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct AddMembersPayload {
    #[validate(length(min = 1))]
    member_ids: Vec<UserId>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct MarkReadPayload {
    #[validate(length(min = 1))]
    message_ids: Vec<MessageId>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct BatchSendPayload {
    #[validate(length(min = 1, max = 100))]
    targets: Vec<SendTarget>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    cursor: Option<Timestamp>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadResponse {
    room_id: RoomId,
    message_ids: Vec<MessageId>,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PresenceResponse {
    user_id: UserId,
    is_online: bool,
}

pub fn router(state: AppState) -> Router {
    let upload_limit = state.chat_service.settings().max_upload_bytes;
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes(upload_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes(upload_limit: usize) -> Router<AppState> {
    Router::new()
        .route("/ws", get(websocket_upgrade))
        .route("/rooms", get(list_rooms))
        .route("/rooms/{room_id}", get(get_room).delete(delete_room))
        .route("/rooms/{room_id}/messages", get(get_history))
        .route("/rooms/{room_id}/read", post(mark_read))
        .route("/groups", post(create_group))
        .route("/groups/{room_id}", put(rename_group))
        .route("/groups/{room_id}/members", post(add_members))
        .route("/groups/{room_id}/members/{member_id}", delete(remove_member))
        .route(
            "/groups/{room_id}/managers/{member_id}",
            post(promote_manager).delete(demote_manager),
        )
        .route("/groups/{room_id}/leave", post(leave_group))
        .route("/messages/batch", post(send_batch))
        .route(
            "/uploads",
            post(upload_attachment).layer(DefaultBodyLimit::max(upload_limit.saturating_add(1))),
        )
        .route("/presence/{user_id}", get(presence))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn current_user(state: &AppState, headers: &HeaderMap) -> Result<UserId, ApiError> {
    authenticate(state.credentials.as_ref(), headers, None).await
}

/// 认证失败时在升级前直接返回 401
async fn websocket_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let user_id =
        authenticate(state.credentials.as_ref(), &headers, query.token.as_deref()).await?;
    Ok(ws.on_upgrade(move |socket| WebSocketConnection::new(state, user_id).run(socket)))
}

async fn list_rooms(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<RoomSummary>>, ApiError> {
    let user_id = current_user(&state, &headers).await?;
    let rooms = state.chat_service.list_rooms(user_id).await?;
    Ok(Json(rooms))
}

async fn get_room(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<RoomView>, ApiError> {
    let user_id = current_user(&state, &headers).await?;
    let room = state.chat_service.get_room(user_id, room_id).await?;
    Ok(Json(room))
}

async fn delete_room(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
) -> Result<StatusCode, ApiError> {
    let user_id = current_user(&state, &headers).await?;
    state.chat_service.delete_room(user_id, room_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// 不带游标的首屏加载会顺带把别人发的消息标为已读
async fn get_history(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<MessagePage>, ApiError> {
    let user_id = current_user(&state, &headers).await?;
    let page = state
        .chat_service
        .history(user_id, room_id, query.cursor, query.limit)
        .await?;
    Ok(Json(page))
}

async fn mark_read(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Json(payload): Json<MarkReadPayload>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let user_id = current_user(&state, &headers).await?;
    payload.validate()?;
    let message_ids = state
        .chat_service
        .mark_read(user_id, room_id, &payload.message_ids)
        .await?;
    Ok(Json(MarkReadResponse {
        room_id,
        message_ids,
    }))
}

async fn create_group(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(payload): Json<CreateGroupPayload>,
) -> Result<(StatusCode, Json<RoomView>), ApiError> {
    let creator_id = current_user(&state, &headers).await?;
    payload.validate()?;
    let room = state
        .chat_service
        .create_group(CreateGroupRequest {
            creator_id,
            name: payload.name,
            member_ids: payload.member_ids,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(room)))
}

async fn rename_group(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Json(payload): Json<RenameGroupPayload>,
) -> Result<Json<RoomView>, ApiError> {
    let user_id = current_user(&state, &headers).await?;
    payload.validate()?;
    let room = state
        .chat_service
        .rename_group(user_id, room_id, payload.name)
        .await?;
    Ok(Json(room))
}

async fn add_members(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Json(payload): Json<AddMembersPayload>,
) -> Result<Json<RoomView>, ApiError> {
    let user_id = current_user(&state, &headers).await?;
    payload.validate()?;
    let room = state
        .chat_service
        .add_members(user_id, room_id, payload.member_ids)
        .await?;
    Ok(Json(room))
}

async fn remove_member(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path((room_id, member_id)): Path<(RoomId, UserId)>,
) -> Result<Json<RoomView>, ApiError> {
    let user_id = current_user(&state, &headers).await?;
    let room = state
        .chat_service
        .remove_member(user_id, room_id, member_id)
        .await?;
    Ok(Json(room))
}

async fn promote_manager(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path((room_id, member_id)): Path<(RoomId, UserId)>,
) -> Result<Json<RoomView>, ApiError> {
    let user_id = current_user(&state, &headers).await?;
    let room = state
        .chat_service
        .promote_manager(user_id, room_id, member_id)
        .await?;
    Ok(Json(room))
}

async fn demote_manager(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path((room_id, manager_id)): Path<(RoomId, UserId)>,
) -> Result<Json<RoomView>, ApiError> {
    let user_id = current_user(&state, &headers).await?;
    let room = state
        .chat_service
        .demote_manager(user_id, room_id, manager_id)
        .await?;
    Ok(Json(room))
}

async fn leave_group(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
) -> Result<StatusCode, ApiError> {
    let user_id = current_user(&state, &headers).await?;
    state.chat_service.leave_group(user_id, room_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn send_batch(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(payload): Json<BatchSendPayload>,
) -> Result<Json<Vec<BatchOutcome>>, ApiError> {
    let user_id = current_user(&state, &headers).await?;
    payload.validate()?;
    let outcomes = state
        .chat_service
        .send_many(user_id, payload.targets, payload.content, payload.attachments)
        .await?;
    Ok(Json(outcomes))
}

async fn upload_attachment(
    headers: HeaderMap,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    current_user(&state, &headers).await?;
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream");
    let url = state
        .uploader
        .upload(body.to_vec(), content_type)
        .await
        .map_err(ApplicationError::from)?;
    Ok((StatusCode::CREATED, Json(UploadResponse { url })))
}

async fn presence(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<PresenceResponse>, ApiError> {
    current_user(&state, &headers).await?;
    Ok(Json(PresenceResponse {
        user_id,
        is_online: state.chat_service.is_online(user_id),
    }))
}
