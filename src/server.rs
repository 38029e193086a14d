// ABOUTME: Shared application state and the HTTP surface (rooms CRUD, history, models, health).
// ABOUTME: The WebSocket chat endpoint lives in ws.rs; both share AppState.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use styx_core::history::MessageStore;
use styx_core::message::ChatMessage;
use styx_core::orchestrator::ChatOrchestrator;
use styx_core::policy::{AccessPolicy, Role};
use styx_core::registry::ConnectionRegistry;
use styx_core::rooms::{NewRoom, Room, RoomPatch, RoomStore};
use styx_core::traits::{AuthenticatedUser, Authenticator};

use crate::ai::AiClient;
use crate::config::Config;
use crate::metrics;

/// Everything the HTTP and WebSocket handlers need. Collaborators are
/// injected at startup; handlers never construct services themselves.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ConnectionRegistry>,
    pub store: Arc<MessageStore>,
    pub rooms: RoomStore,
    pub policy: AccessPolicy,
    pub orchestrator: Arc<ChatOrchestrator>,
    pub auth: Arc<dyn Authenticator>,
    pub ai: Arc<AiClient>,
    pub metrics: PrometheusHandle,
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.allowed_origins);
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/models", get(list_models))
        .route("/rooms", get(list_rooms).post(create_room))
        .route(
            "/rooms/{room_id}",
            get(get_room).put(update_room).delete(delete_room),
        )
        .route(
            "/rooms/{room_id}/messages",
            get(room_messages).delete(clear_room_messages),
        )
        .route("/rooms/{room_id}/assign-users", post(assign_users))
        .route("/rooms/{room_id}/access-check", get(access_check))
        .route("/ws/{room_id}", get(crate::ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Skipping unparsable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

// =============================================================================
// Error plumbing
// =============================================================================

pub struct ApiError(StatusCode, String);

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorBody { error: self.1 })).into_response()
    }
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self(status, message.into())
    }

    fn internal(err: anyhow::Error) -> Self {
        metrics::record_error("http_internal");
        tracing::error!(error = %err, "Internal error serving request");
        Self(StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn require_user(state: &AppState, headers: &HeaderMap) -> ApiResult<AuthenticatedUser> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Missing bearer token"))?;
    match state.auth.authenticate(token).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(ApiError::new(StatusCode::UNAUTHORIZED, "Invalid token")),
        Err(e) => Err(ApiError::internal(e)),
    }
}

fn require_admin(user: &AuthenticatedUser, action: &str) -> ApiResult<()> {
    if user.role != Role::Admin {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            format!("Only admin can {}", action),
        ));
    }
    Ok(())
}

// =============================================================================
// Health and metrics
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
    })
}

async fn metrics_endpoint(State(state): State<AppState>) -> String {
    state.metrics.render()
}

// =============================================================================
// Models
// =============================================================================

#[derive(Serialize)]
struct ModelsResponse {
    models: Vec<String>,
}

async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    match state.ai.list_models().await {
        Ok(models) => Json(ModelsResponse { models }),
        Err(e) => {
            tracing::warn!(error = %e, "Model list unavailable, returning default");
            Json(ModelsResponse {
                models: vec![state.ai.default_model().to_string()],
            })
        }
    }
}

// =============================================================================
// Rooms
// =============================================================================

#[derive(Serialize)]
struct RoomSummary {
    #[serde(flatten)]
    room: Room,
    last_activity: DateTime<Utc>,
}

#[derive(Serialize)]
struct RoomListResponse {
    rooms: Vec<RoomSummary>,
}

async fn list_rooms(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<RoomListResponse>> {
    let user = require_user(&state, &headers).await?;
    let all = state.rooms.list_rooms().map_err(ApiError::internal)?;
    metrics::set_room_count(all.len() as u64);

    let accessible = state.policy.accessible_rooms(
        all,
        &user.user_id,
        user.role,
        user.is_restricted_account,
    );

    let mut rooms = Vec::with_capacity(accessible.len());
    for room in accessible {
        let last_activity = state
            .store
            .last_activity(&room.room_id)
            .await
            .unwrap_or(room.created_at);
        rooms.push(RoomSummary {
            room,
            last_activity,
        });
    }
    Ok(Json(RoomListResponse { rooms }))
}

#[derive(Deserialize)]
struct CreateRoomRequest {
    room_name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    ai_prompt: Option<String>,
    #[serde(default)]
    ai_model: Option<String>,
    #[serde(default = "default_voice_enabled")]
    voice_enabled: bool,
    #[serde(default)]
    voice_id: Option<String>,
    #[serde(default)]
    is_private: bool,
    #[serde(default)]
    assigned_users: Vec<String>,
}

fn default_voice_enabled() -> bool {
    true
}

/// Derive a URL-safe room id from a display name.
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_matches('-').to_string()
}

async fn create_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateRoomRequest>,
) -> ApiResult<(StatusCode, Json<Room>)> {
    let user = require_user(&state, &headers).await?;
    let name = body.room_name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "Room name is required"));
    }
    if user.is_restricted_account {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "Restricted accounts cannot create rooms",
        ));
    }
    if body.is_private && user.role != Role::Admin {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "Only admins can create private rooms",
        ));
    }

    let mut room_id = slugify(&name);
    if room_id.is_empty() {
        room_id = format!("room-{}", Utc::now().timestamp());
    }
    // Keep ids unique without failing the request.
    if state
        .rooms
        .get_room(&room_id)
        .map_err(ApiError::internal)?
        .is_some()
    {
        room_id = format!("{}-{}", room_id, Utc::now().timestamp());
    }

    let room = state
        .rooms
        .create_room(NewRoom {
            room_id,
            name,
            description: body.description.map(|d| d.trim().to_string()),
            is_private: body.is_private,
            assigned_users: body.assigned_users,
            ai_prompt: body.ai_prompt.filter(|p| !p.trim().is_empty()),
            ai_model: body.ai_model.filter(|m| !m.trim().is_empty()),
            voice_enabled: body.voice_enabled,
            voice_id: body.voice_id,
            created_by: Some(user.user_id),
        })
        .map_err(ApiError::internal)?;

    Ok((StatusCode::CREATED, Json(room)))
}

async fn get_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
) -> ApiResult<Json<Room>> {
    require_user(&state, &headers).await?;
    let room = state
        .rooms
        .get_room(&room_id)
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Room not found"))?;
    Ok(Json(room))
}

async fn update_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
    Json(patch): Json<RoomPatch>,
) -> ApiResult<Json<Room>> {
    let user = require_user(&state, &headers).await?;
    let room = state
        .rooms
        .get_room(&room_id)
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Room not found"))?;

    let is_creator = room.created_by.as_deref() == Some(user.user_id.as_str());
    if user.role != Role::Admin && !is_creator {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "Only admin or room creator can update room settings",
        ));
    }

    let updated = state
        .rooms
        .update_room(&room_id, patch)
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Room not found"))?;
    Ok(Json(updated))
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

async fn delete_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let user = require_user(&state, &headers).await?;
    require_admin(&user, "delete rooms")?;
    if room_id == state.config.chat.default_room_id {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "Cannot delete the default room",
        ));
    }
    let room = state
        .rooms
        .get_room(&room_id)
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Room not found"))?;

    // Live members are disconnected (with the usual leave events) before
    // the persisted state goes away.
    state
        .orchestrator
        .delete_room(&room_id)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(MessageResponse {
        message: format!("Room '{}' deleted successfully", room.name),
    }))
}

// =============================================================================
// Messages
// =============================================================================

#[derive(Deserialize)]
struct MessagesQuery {
    #[serde(default = "default_message_limit")]
    limit: usize,
}

fn default_message_limit() -> usize {
    50
}

#[derive(Serialize)]
struct MessagesResponse {
    messages: Vec<ChatMessage>,
}

async fn room_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> ApiResult<Json<MessagesResponse>> {
    require_user(&state, &headers).await?;
    let messages = state.store.get_recent(&room_id, query.limit).await;
    Ok(Json(MessagesResponse { messages }))
}

async fn clear_room_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let user = require_user(&state, &headers).await?;
    require_admin(&user, "clear room messages")?;
    let room = state
        .rooms
        .get_room(&room_id)
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Room not found"))?;

    let cleared = state.orchestrator.clear_messages(&room_id).await;
    Ok(Json(MessageResponse {
        message: format!("Cleared {} messages from room '{}'", cleared, room.name),
    }))
}

// =============================================================================
// Assignments and access checks
// =============================================================================

#[derive(Deserialize)]
struct AssignUsersRequest {
    user_ids: Vec<String>,
}

#[derive(Serialize)]
struct AssignUsersResponse {
    message: String,
    assigned_users: Vec<String>,
}

async fn assign_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
    Json(body): Json<AssignUsersRequest>,
) -> ApiResult<Json<AssignUsersResponse>> {
    let user = require_user(&state, &headers).await?;
    require_admin(&user, "assign users to rooms")?;
    let room = state
        .rooms
        .get_room(&room_id)
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Room not found"))?;

    let updated = state
        .rooms
        .update_room(
            &room_id,
            RoomPatch {
                assigned_users: Some(body.user_ids),
                ..RoomPatch::default()
            },
        )
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Room not found"))?;

    Ok(Json(AssignUsersResponse {
        message: format!("Users assigned to room '{}'", room.name),
        assigned_users: updated.assigned_users,
    }))
}

#[derive(Serialize)]
struct AccessCheckResponse {
    can_access: bool,
    room_id: String,
    is_private: bool,
    user_role: String,
    restricted: bool,
}

async fn access_check(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
) -> ApiResult<Json<AccessCheckResponse>> {
    let user = require_user(&state, &headers).await?;
    let room = state
        .rooms
        .get_room(&room_id)
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Room not found"))?;

    let can_access = state.policy.can_access(
        &room,
        &user.user_id,
        user.role,
        user.is_restricted_account,
    );
    Ok(Json(AccessCheckResponse {
        can_access,
        room_id,
        is_private: room.is_private,
        user_role: user.role.to_string(),
        restricted: user.is_restricted_account,
    }))
}
