use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use ojas_shared::api::{
    CreateAppointmentRequest, CreateSessionRequest, CreateUserRequest, MarkAllReadResponse,
    MessagePage, NotificationBatch, NotificationPage, ReminderRequest, SendMessageRequest,
    SessionResponse, UpdateAppointmentRequest,
};
use ojas_shared::clock;
use ojas_shared::constants::{
    APP_NAME, DEFAULT_MESSAGE_PAGE_LIMIT, DEFAULT_NOTIFICATION_PAGE_LIMIT,
};
use ojas_shared::models::{
    Appointment, ConversationSummary, Message, MessageWithSender, Notification, User,
};
use ojas_shared::session::SessionSigner;
use ojas_shared::{AppointmentId, MessageId, NotificationId, UserId};
use ojas_store::Database;

use crate::appointments;
use crate::auth::{verify_admin_token, AuthUser};
use crate::config::ServerConfig;
use crate::error::{NotFoundExt, ServerError};
use crate::messaging;
use crate::notifications;
use crate::registry::{spawn_registry, RegistryHandle};
use crate::relay;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub registry: RegistryHandle,
    pub sessions: Arc<SessionSigner>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Build the shared state and spawn the connection registry task.
    pub fn new(db: Database, sessions: SessionSigner, config: ServerConfig) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            registry: spawn_registry(),
            sessions: Arc::new(sessions),
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(relay::ws_handler))
        .route("/api/users/me", get(current_user))
        .route("/api/messages", post(send_message))
        .route("/api/messages/conversations", get(list_conversations))
        .route(
            "/api/messages/conversations/:id/read",
            put(mark_conversation_read),
        )
        .route("/api/messages/:id", get(conversation_messages))
        .route("/api/messages/:id/read", put(mark_message_read))
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/read-all", put(mark_all_notifications_read))
        .route("/api/notifications/:id/read", put(mark_notification_read))
        .route(
            "/api/appointments",
            get(list_appointments).post(create_appointment),
        )
        .route("/api/appointments/:id", put(update_appointment))
        .route("/api/appointments/:id/reminders", post(schedule_reminder))
        .route("/admin/users", post(admin_create_user))
        .route("/admin/sessions", post(admin_create_session))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    connections: usize,
}

#[derive(Deserialize)]
struct PageQuery {
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationQuery {
    page: Option<u32>,
    limit: Option<u32>,
    #[serde(default)]
    unread_only: bool,
}

/// Resolve `page`/`limit` with defaults. Pages start at 1.
fn page_params(
    page: Option<u32>,
    limit: Option<u32>,
    default_limit: u32,
) -> Result<(u32, u32), ServerError> {
    let limit = limit.unwrap_or(default_limit);
    if limit == 0 {
        return Err(ServerError::Validation("limit must be positive".into()));
    }
    Ok((page.unwrap_or(1).max(1), limit))
}

fn parse_path_id<T: std::str::FromStr>(raw: &str, what: &'static str) -> Result<T, ServerError> {
    raw.parse()
        .map_err(|_| ServerError::Validation(format!("Invalid {what} id")))
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: APP_NAME,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        connections: state.registry.connection_count().await,
    })
}

async fn current_user(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

// ─── Messages ───

async fn send_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageWithSender>), ServerError> {
    let message = messaging::send_message(
        &state,
        &user.summary(),
        req.receiver_id.as_deref(),
        req.content.as_deref(),
        req.message_type,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn list_conversations(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<ConversationSummary>>, ServerError> {
    Ok(Json(messaging::conversations(&state, &user.id).await?))
}

async fn conversation_messages(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(conversation_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<MessagePage>, ServerError> {
    let (page, limit) = page_params(query.page, query.limit, DEFAULT_MESSAGE_PAGE_LIMIT)?;
    let messages =
        messaging::conversation_page(&state, &user.id, &conversation_id, page, limit).await?;
    Ok(Json(messages))
}

async fn mark_message_read(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Message>, ServerError> {
    let id: MessageId = parse_path_id(&id, "message")?;
    Ok(Json(messaging::mark_read(&state, &user.id, id).await?))
}

async fn mark_conversation_read(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(conversation_id): Path<String>,
) -> Result<Json<MarkAllReadResponse>, ServerError> {
    let updated = messaging::mark_conversation_read(&state, &user.id, &conversation_id).await?;
    Ok(Json(MarkAllReadResponse { updated }))
}

// ─── Notifications ───

async fn list_notifications(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<NotificationPage>, ServerError> {
    let (page, limit) = page_params(query.page, query.limit, DEFAULT_NOTIFICATION_PAGE_LIMIT)?;
    let list =
        notifications::list_for_user(&state, &user.id, query.unread_only, page, limit).await?;
    Ok(Json(list))
}

async fn mark_notification_read(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Notification>, ServerError> {
    let id: NotificationId = parse_path_id(&id, "notification")?;
    Ok(Json(notifications::mark_read(&state, &user.id, id).await?))
}

async fn mark_all_notifications_read(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<MarkAllReadResponse>, ServerError> {
    let updated = notifications::mark_all_read(&state, &user.id).await?;
    Ok(Json(MarkAllReadResponse { updated }))
}

// ─── Appointments ───

async fn list_appointments(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<Appointment>>, ServerError> {
    Ok(Json(appointments::list(&state, &user).await?))
}

async fn create_appointment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<Appointment>), ServerError> {
    let appointment = appointments::create(&state, &user, req).await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

async fn update_appointment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateAppointmentRequest>,
) -> Result<Json<Appointment>, ServerError> {
    let id: AppointmentId = parse_path_id(&id, "appointment")?;
    Ok(Json(appointments::update(&state, &user, id, req).await?))
}

async fn schedule_reminder(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(req): Json<ReminderRequest>,
) -> Result<(StatusCode, Json<NotificationBatch>), ServerError> {
    let id: AppointmentId = parse_path_id(&id, "appointment")?;
    let notifications = appointments::schedule_reminder(&state, &user, id, req.phase).await?;
    Ok((StatusCode::CREATED, Json(NotificationBatch { notifications })))
}

// ─── Admin ───

async fn admin_create_user(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let name = req.name.trim();
    let email = req.email.trim().to_ascii_lowercase();
    if name.is_empty() {
        return Err(ServerError::Validation("Name is required".into()));
    }
    if !email.contains('@') {
        return Err(ServerError::Validation("A valid email is required".into()));
    }

    let user = User {
        id: UserId::generate(),
        name: name.to_string(),
        email,
        role: req.role,
        created_at: clock::now(),
    };
    state.db.lock().await.insert_user(&user)?;
    info!(user = %user.id, role = %user.role, "Admin created user");

    notifications::publish(&state, vec![notifications::welcome(&user, clock::now())]).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn admin_create_session(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<SessionResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let user = state
        .db
        .lock()
        .await
        .get_user(&req.user_id)
        .or_not_found("User")?;

    let now = clock::now();
    let token = state
        .sessions
        .issue(&user.id, now)
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    let claims = state.sessions.verify(&token, now)?;
    info!(user = %user.id, "Admin issued session");

    Ok(Json(SessionResponse {
        token,
        expires_at: claims.expires_at,
        user,
    }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
