//! REST API server
//!
//! Exposes chat sessions over HTTP for the web client. Each session key maps
//! to one `Conversation`; turns for the same session are serialized.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::stable_uuid_from_string;
use crate::confirmation::Choice;
use crate::conversational::{Conversation, Services};
use crate::models::{GroupContext, UserContext};

/// =============================
/// Request Models
/// =============================

/// Who is talking. Ids that are not UUIDs are hashed into one.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct ApiUser {
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub group_id: Option<String>,
    pub group_name: Option<String>,
}

impl ApiUser {
    pub fn into_context(self) -> UserContext {
        let seed = self.email.clone().unwrap_or_else(|| "anonymous-user".to_string());
        let user_id = parse_or_stable_uuid(self.user_id.as_deref(), &seed);

        let group = self
            .group_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .map(|id| GroupContext {
                id: parse_or_stable_uuid(Some(id), "group-fallback"),
                name: self.group_name.clone().unwrap_or_else(|| "Group".to_string()),
            });

        UserContext {
            user_id,
            email: self.email.filter(|v| !v.trim().is_empty()),
            name: self.name.filter(|v| !v.trim().is_empty()),
            group,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub text: String,
    #[serde(default)]
    pub user: ApiUser,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceRequest {
    pub pending_id: Uuid,
    pub choice: Choice,
    #[serde(default)]
    pub user: ApiUser,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

/// Sessions untouched this long are dropped from the cache; their timelines
/// are already persisted.
pub const SESSION_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

struct CachedSession {
    conversation: Arc<Mutex<Conversation>>,
    last_used: Instant,
}

impl CachedSession {
    /// Busy sessions and sessions holding a pending batch stay cached.
    fn evictable(&self, idle_ttl: Duration) -> bool {
        if self.last_used.elapsed() < idle_ttl {
            return false;
        }
        match self.conversation.try_lock() {
            Ok(conversation) => conversation.state().pending.is_none(),
            Err(_) => false,
        }
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub services: Services,
    sessions: Arc<RwLock<HashMap<String, CachedSession>>>,
    idle_ttl: Duration,
}

impl ApiState {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            idle_ttl: SESSION_IDLE_TTL,
        }
    }

    pub fn with_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }

    /// Open the session on first use. Two racing opens keep the first one.
    async fn conversation(&self, session: &str) -> Arc<Mutex<Conversation>> {
        if let Some(cached) = self.sessions.write().await.get_mut(session) {
            cached.last_used = Instant::now();
            return cached.conversation.clone();
        }

        let opened = Conversation::open(session, self.services.clone()).await;

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, cached| !cached.evictable(self.idle_ttl));
        if sessions.len() < before {
            debug!(evicted = before - sessions.len(), "Dropped idle sessions");
        }

        let cached = sessions
            .entry(session.to_string())
            .or_insert_with(|| CachedSession {
                conversation: Arc::new(Mutex::new(opened)),
                last_used: Instant::now(),
            });
        cached.last_used = Instant::now();
        cached.conversation.clone()
    }

    async fn forget(&self, session: &str) {
        self.sessions.write().await.remove(session);
    }
}

fn parse_or_stable_uuid(value: Option<&str>, fallback_seed: &str) -> Uuid {
    match value {
        Some(v) if !v.trim().is_empty() => {
            Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v))
        }
        _ => stable_uuid_from_string(fallback_seed),
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Timeline Endpoints
/// =============================

async fn get_timeline(
    State(state): State<ApiState>,
    Path(session): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let conversation = state.conversation(&session).await;
    let conversation = conversation.lock().await;
    let current = conversation.state();

    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "session": session,
            "messages": current.timeline,
            "stage": current.stage(),
            "pending_id": current.pending.as_ref().map(|p| p.id),
        }))),
    )
}

async fn clear_timeline(
    State(state): State<ApiState>,
    Path(session): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let conversation = state.conversation(&session).await;
    let cleared = conversation.lock().await.clear().await;

    match cleared {
        Ok(()) => {
            state.forget(&session).await;
            (
                StatusCode::OK,
                Json(ApiResponse::success(serde_json::json!({ "session": session }))),
            )
        }
        Err(e) => {
            error!(session = %session, "Failed to clear timeline: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(format!("Failed to clear timeline: {}", e))),
            )
        }
    }
}

/// =============================
/// Turn Endpoints
/// =============================

async fn post_message(
    State(state): State<ApiState>,
    Path(session): Path<String>,
    Json(req): Json<MessageRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if req.text.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Message text is empty".into())),
        );
    }

    info!(session = %session, "Received message");
    let user = req.user.into_context();

    let conversation = state.conversation(&session).await;
    let turn = conversation.lock().await.submit(&user, &req.text).await;

    (StatusCode::OK, Json(ApiResponse::success(turn)))
}

async fn post_choice(
    State(state): State<ApiState>,
    Path(session): Path<String>,
    Json(req): Json<ChoiceRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!(session = %session, pending_id = %req.pending_id, "Received choice");
    let user = req.user.into_context();

    let conversation = state.conversation(&session).await;
    let turn = conversation
        .lock()
        .await
        .choose(&user, req.pending_id, req.choice)
        .await;

    // A stale choice is not an error; the response just carries no messages
    (StatusCode::OK, Json(ApiResponse::success(turn)))
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/sessions/:session/timeline",
            get(get_timeline).delete(clear_timeline),
        )
        .route("/api/sessions/:session/messages", post(post_message))
        .route("/api/sessions/:session/choices", post(post_choice))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    services: Services,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(ApiState::new(services));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
