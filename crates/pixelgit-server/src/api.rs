use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{Method, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use pixelgit_store::{
    AttachmentKind, Attachment, Chat, ChatOrigin, ErrorKind, Message, NewMessage, Profile, Store,
    StoreError,
};

use crate::auth::{AuthUser, TokenIssuer};
use crate::config::{ServerConfig, StorageKind};
use crate::error::ApiError;

/// Request bodies may carry a full attachment plus JSON overhead; the
/// attachment ceiling itself is enforced by the store.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub tokens: TokenIssuer,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(store: Store, config: ServerConfig) -> Self {
        Self {
            store: Arc::new(store),
            tokens: TokenIssuer::new(&config.secret_key, config.token_ttl_hours),
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/users", get(list_users))
        .route("/chats", post(create_chat))
        // Both chat routes share one parameter name at this position.
        .route("/chats/:id", get(user_chats))
        .route("/chats/:id/key", get(get_key).post(set_key))
        .route("/messages", post(send_message))
        .route("/messages/:chat_id", get(chat_messages))
        .route("/delete-message/:message_id", delete(delete_message))
        .route("/delete-chat/:chat_id", delete(delete_chat))
        .route("/update-username", post(update_username))
        .route("/update-password", post(update_password))
        .route("/update-avatar", post(update_avatar))
        .route("/delete-account", delete(delete_account))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run a store operation on the blocking pool.
async fn with_store<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Store) -> pixelgit_store::Result<T> + Send + 'static,
{
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || op(&store))
        .await
        .map_err(|e| ApiError::Internal(format!("store task failed: {e}")))?
        .map_err(ApiError::from)
}

fn require_member(store: &Store, chat_id: Uuid, handle: &str) -> pixelgit_store::Result<Chat> {
    let chat = store.get_chat(chat_id)?;
    if !chat.has_participant(handle) {
        return Err(StoreError::Forbidden(format!(
            "User '{handle}' is not in chat {chat_id}"
        )));
    }
    Ok(chat)
}

fn parse_id(raw: &str, what: &str) -> Result<Uuid, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid {what} id")))
}

fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

// ─── Wire types ───

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    storage: StorageKind,
}

#[derive(Deserialize)]
struct RegisterRequest {
    username: Option<String>,
    password: Option<String>,
    email: Option<String>,
    avatar: Option<String>,
}

#[derive(Deserialize)]
struct LoginRequest {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize)]
struct UsersQuery {
    current: Option<String>,
}

#[derive(Serialize)]
struct UserView {
    id: Uuid,
    username: String,
    avatar: Option<String>,
}

#[derive(Deserialize)]
struct CreateChatRequest {
    user1: Option<String>,
    user2: Option<String>,
}

#[derive(Serialize)]
struct ChatView {
    id: Uuid,
    with_user: String,
    last_message: Option<String>,
    last_message_time: Option<DateTime<Utc>>,
    avatar: Option<String>,
}

#[derive(Deserialize)]
struct KeyRequest {
    key: Option<String>,
}

#[derive(Deserialize)]
struct SendMessageRequest {
    #[serde(rename = "chatId")]
    chat_id: Option<String>,
    sender: Option<String>,
    text: Option<String>,
    file_type: Option<String>,
    file_data: Option<String>,
}

#[derive(Serialize)]
struct MessageView {
    id: Uuid,
    chat_id: Uuid,
    sender: String,
    text: Option<String>,
    timestamp: DateTime<Utc>,
    file_type: Option<AttachmentKind>,
    file_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    avatar: Option<String>,
}

impl MessageView {
    fn new(message: Message, avatar: Option<String>) -> Self {
        let (file_type, file_data) = match message.attachment {
            Some(Attachment { kind, data }) => (Some(kind), Some(data)),
            None => (None, None),
        };
        Self {
            id: message.id,
            chat_id: message.chat_id,
            sender: message.sender,
            text: message.text,
            timestamp: message.timestamp,
            file_type,
            file_data,
            avatar,
        }
    }
}

#[derive(Deserialize)]
struct UpdateUsernameRequest {
    #[serde(rename = "currentUsername")]
    current_username: Option<String>,
    #[serde(rename = "newUsername")]
    new_username: Option<String>,
}

#[derive(Deserialize)]
struct UpdatePasswordRequest {
    username: Option<String>,
    #[serde(rename = "currentPassword")]
    current_password: Option<String>,
    #[serde(rename = "newPassword")]
    new_password: Option<String>,
}

#[derive(Deserialize)]
struct UpdateAvatarRequest {
    username: Option<String>,
    avatar: Option<String>,
}

#[derive(Deserialize)]
struct DeleteAccountRequest {
    username: Option<String>,
    password: Option<String>,
}

// ─── Handlers ───

async fn index() -> &'static str {
    "PixelGit API is running"
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        storage: state.config.storage,
    })
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let (Some(username), Some(password)) = (required(req.username), required(req.password))
    else {
        return Err(ApiError::BadRequest(
            "Username and password are required".into(),
        ));
    };

    let profile = Profile {
        avatar: req.avatar,
        email: req.email,
    };
    let user = with_store(&state, move |store| {
        store.register(&username, &password, profile)?;
        store.get_user(&username)
    })
    .await?;

    let token = state.tokens.issue(&user.handle, user.id)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "User registered successfully",
            "token": token,
            "userId": user.id,
            "avatar": user.avatar,
        })),
    ))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<Value>, ApiError> {
    let (Some(username), Some(password)) = (required(req.username), required(req.password))
    else {
        return Err(ApiError::BadRequest(
            "Username and password are required".into(),
        ));
    };

    let user = with_store(&state, move |store| {
        store.authenticate(&username, &password)?;
        store.get_user(&username)
    })
    .await
    .map_err(|e| match e {
        // Unknown handles are reported like bad passwords.
        ApiError::Store(ref inner) if inner.kind() == ErrorKind::NotFound => {
            ApiError::Unauthorized("User not found".into())
        }
        other => other,
    })?;

    let token = state.tokens.issue(&user.handle, user.id)?;
    info!(handle = %user.handle, "user logged in");
    Ok(Json(json!({
        "success": true,
        "token": token,
        "username": user.handle,
        "avatar": user.avatar,
    })))
}

async fn list_users(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<UsersQuery>,
) -> Result<Json<Vec<UserView>>, ApiError> {
    let excluding = required(query.current).unwrap_or(auth.0);
    let users = with_store(&state, move |store| store.list_users(Some(&excluding))).await?;
    Ok(Json(
        users
            .into_iter()
            .map(|u| UserView {
                id: u.id,
                username: u.handle,
                avatar: u.avatar,
            })
            .collect(),
    ))
}

async fn create_chat(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateChatRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let (Some(user1), Some(user2)) = (required(req.user1), required(req.user2)) else {
        return Err(ApiError::BadRequest("Both users are required".into()));
    };
    if auth.0 != user1 && auth.0 != user2 {
        return Err(ApiError::Forbidden(
            "Chats can only be opened by a participant".into(),
        ));
    }

    let (chat_id, origin) =
        with_store(&state, move |store| store.get_or_create_chat(&user1, &user2)).await?;

    let (status, message) = match origin {
        ChatOrigin::Created => (StatusCode::CREATED, "Chat created successfully"),
        ChatOrigin::Existing => (StatusCode::OK, "Chat already exists"),
    };
    Ok((
        status,
        Json(json!({
            "success": true,
            "message": message,
            "chatId": chat_id,
        })),
    ))
}

async fn user_chats(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(username): Path<String>,
) -> Result<Json<Value>, ApiError> {
    auth.require(&username)?;
    let chats = with_store(&state, move |store| store.list_chats_for_user(&username)).await?;
    let chats: Vec<ChatView> = chats
        .into_iter()
        .map(|c| ChatView {
            id: c.chat_id,
            with_user: c.peer_handle,
            last_message: c.last_message,
            last_message_time: c.last_message_at,
            avatar: c.peer_avatar,
        })
        .collect();
    Ok(Json(json!({ "success": true, "chats": chats })))
}

async fn get_key(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(chat_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let chat_id = parse_id(&chat_id, "chat")?;
    let key = with_store(&state, move |store| {
        require_member(store, chat_id, &auth.0)?;
        store.get_key(chat_id)
    })
    .await?;
    Ok(Json(json!({ "success": true, "key": key })))
}

async fn set_key(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(chat_id): Path<String>,
    Json(req): Json<KeyRequest>,
) -> Result<Json<Value>, ApiError> {
    let chat_id = parse_id(&chat_id, "chat")?;
    let Some(key) = required(req.key) else {
        return Err(ApiError::BadRequest("Key is required".into()));
    };
    with_store(&state, move |store| {
        require_member(store, chat_id, &auth.0)?;
        store.set_key(chat_id, &key)
    })
    .await?;
    Ok(Json(json!({ "success": true, "message": "Encryption key saved" })))
}

async fn send_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let (Some(chat_id), Some(sender)) = (required(req.chat_id), required(req.sender)) else {
        return Err(ApiError::BadRequest("Missing required fields".into()));
    };
    let chat_id = parse_id(&chat_id, "chat")?;
    auth.require(&sender)?;

    let attachment = match required(req.file_data) {
        Some(data) => {
            let kind = match required(req.file_type) {
                Some(raw) => raw.parse::<AttachmentKind>().map_err(ApiError::BadRequest)?,
                None => AttachmentKind::File,
            };
            Some(Attachment { kind, data })
        }
        None => None,
    };
    let body = NewMessage {
        text: req.text,
        attachment,
    };

    let message =
        with_store(&state, move |store| store.append_message(chat_id, &sender, body)).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": MessageView::new(message, None),
        })),
    ))
}

async fn chat_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(chat_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let chat_id = parse_id(&chat_id, "chat")?;
    let messages = with_store(&state, move |store| {
        require_member(store, chat_id, &auth.0)?;
        let messages = store.list_messages(chat_id)?;

        let mut avatars: HashMap<String, Option<String>> = HashMap::new();
        let mut views = Vec::with_capacity(messages.len());
        for message in messages {
            if !avatars.contains_key(&message.sender) {
                // Senders that have since been renamed or deleted have no avatar.
                let avatar = match store.get_user(&message.sender) {
                    Ok(user) => user.avatar,
                    Err(e) if e.kind() == ErrorKind::NotFound => None,
                    Err(e) => return Err(e),
                };
                avatars.insert(message.sender.clone(), avatar);
            }
            let avatar = avatars.get(&message.sender).cloned().flatten();
            views.push(MessageView::new(message, Some(avatar.unwrap_or_default())));
        }
        Ok(views)
    })
    .await?;

    Ok(Json(json!({ "success": true, "messages": messages })))
}

async fn delete_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(message_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let message_id = parse_id(&message_id, "message")?;
    with_store(&state, move |store| {
        let message = match store.get_message(message_id) {
            Ok(message) => message,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        require_member(store, message.chat_id, &auth.0)?;
        store.delete_message(message_id)
    })
    .await?;
    Ok(Json(json!({ "success": true, "message": "Message deleted" })))
}

async fn delete_chat(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(chat_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let chat_id = parse_id(&chat_id, "chat")?;
    with_store(&state, move |store| {
        match require_member(store, chat_id, &auth.0) {
            Ok(_) => store.delete_chat(chat_id),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    })
    .await?;
    Ok(Json(json!({ "success": true, "message": "Chat deleted" })))
}

async fn update_username(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<UpdateUsernameRequest>,
) -> Result<Json<Value>, ApiError> {
    let (Some(current), Some(new)) = (
        required(req.current_username),
        required(req.new_username),
    ) else {
        return Err(ApiError::BadRequest("Both usernames are required".into()));
    };
    auth.require(&current)?;

    let handle = new.clone();
    let user = with_store(&state, move |store| {
        store.rename_user(&current, &handle)?;
        store.get_user(&handle)
    })
    .await?;

    let token = state.tokens.issue(&user.handle, user.id)?;
    Ok(Json(json!({
        "success": true,
        "message": "Username updated successfully",
        "token": token,
        "username": new,
    })))
}

async fn update_password(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<UpdatePasswordRequest>,
) -> Result<Json<Value>, ApiError> {
    let (Some(username), Some(current), Some(new)) = (
        required(req.username),
        required(req.current_password),
        required(req.new_password),
    ) else {
        return Err(ApiError::BadRequest("All fields are required".into()));
    };
    auth.require(&username)?;

    with_store(&state, move |store| {
        store.update_credential(&username, &current, &new)
    })
    .await?;
    Ok(Json(json!({
        "success": true,
        "message": "Password updated successfully",
    })))
}

async fn update_avatar(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<UpdateAvatarRequest>,
) -> Result<Json<Value>, ApiError> {
    let (Some(username), Some(avatar)) = (required(req.username), required(req.avatar)) else {
        return Err(ApiError::BadRequest(
            "Username and avatar are required".into(),
        ));
    };
    auth.require(&username)?;

    let profile = Profile {
        avatar: Some(avatar),
        email: None,
    };
    with_store(&state, move |store| store.update_profile(&username, profile)).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Avatar updated successfully",
    })))
}

async fn delete_account(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<DeleteAccountRequest>,
) -> Result<Json<Value>, ApiError> {
    let (Some(username), Some(password)) = (required(req.username), required(req.password))
    else {
        return Err(ApiError::BadRequest(
            "Username and password are required".into(),
        ));
    };
    auth.require(&username)?;

    with_store(&state, move |store| store.delete_user(&username, &password)).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Account deleted successfully",
    })))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use pixelgit_store::SqliteBackend;
    use tower::ServiceExt;

    fn app() -> Router {
        let store = Store::new(Arc::new(SqliteBackend::open_in_memory().unwrap()));
        build_router(AppState::new(store, ServerConfig::default()))
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn signup(app: &Router, username: &str) -> String {
        let (status, body) = call(
            app,
            Method::POST,
            "/register",
            None,
            Some(json!({ "username": username, "password": format!("{username}-pw") })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["token"].as_str().unwrap().to_string()
    }

    async fn open_chat(app: &Router, token: &str, a: &str, b: &str) -> String {
        let (_, body) = call(
            app,
            Method::POST,
            "/chats",
            Some(token),
            Some(json!({ "user1": a, "user2": b })),
        )
        .await;
        body["chatId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_is_public() {
        let (status, body) = call(&app(), Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["storage"], "sqlite");
    }

    #[tokio::test]
    async fn register_and_login() {
        let app = app();
        signup(&app, "alice").await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/register",
            None,
            Some(json!({ "username": "alice", "password": "again" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);

        let (status, body) = call(
            &app,
            Method::POST,
            "/login",
            None,
            Some(json!({ "username": "alice", "password": "alice-pw" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "alice");
        assert!(body["token"].is_string());

        let (status, _) = call(
            &app,
            Method::POST,
            "/login",
            None,
            Some(json!({ "username": "alice", "password": "wrong" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(
            &app,
            Method::POST,
            "/login",
            None,
            Some(json!({ "username": "nobody", "password": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&app, Method::POST, "/login", None, Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn protected_routes_need_a_token() {
        let app = app();
        let (status, _) = call(&app, Method::GET, "/users", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&app, Method::GET, "/users", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn user_directory_excludes_caller() {
        let app = app();
        let alice = signup(&app, "alice").await;
        signup(&app, "bob").await;

        let (status, body) = call(&app, Method::GET, "/users", Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|u| u["username"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["bob"]);
    }

    #[tokio::test]
    async fn chat_and_message_flow() {
        let app = app();
        let alice = signup(&app, "alice").await;
        let bob = signup(&app, "bob").await;
        let eve = signup(&app, "eve").await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/chats",
            Some(&alice),
            Some(json!({ "user1": "alice", "user2": "bob" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let chat_id = body["chatId"].as_str().unwrap().to_string();

        let (status, body) = call(
            &app,
            Method::POST,
            "/chats",
            Some(&bob),
            Some(json!({ "user1": "bob", "user2": "alice" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["chatId"], chat_id.as_str());

        let (status, _) = call(
            &app,
            Method::POST,
            "/chats",
            Some(&eve),
            Some(json!({ "user1": "alice", "user2": "bob" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(
            &app,
            Method::POST,
            "/messages",
            Some(&alice),
            Some(json!({ "chatId": chat_id, "sender": "alice", "text": "hi bob" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["message"]["text"], "hi bob");

        let (status, _) = call(
            &app,
            Method::POST,
            "/messages",
            Some(&bob),
            Some(json!({
                "chatId": chat_id,
                "sender": "bob",
                "file_type": "image",
                "file_data": "iVBORw0KGgo=",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        // Impersonation and outsiders are rejected.
        let (status, _) = call(
            &app,
            Method::POST,
            "/messages",
            Some(&bob),
            Some(json!({ "chatId": chat_id, "sender": "alice", "text": "fake" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = call(
            &app,
            Method::POST,
            "/messages",
            Some(&eve),
            Some(json!({ "chatId": chat_id, "sender": "eve", "text": "hey" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let uri = format!("/messages/{chat_id}");
        let (status, body) = call(&app, Method::GET, &uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::OK);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["sender"], "alice");
        assert_eq!(messages[1]["file_type"], "image");
        assert!(messages[0]["avatar"].is_string());

        let (status, _) = call(&app, Method::GET, &uri, Some(&eve), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(&app, Method::GET, "/chats/alice", Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["chats"][0]["with_user"], "bob");
        assert_eq!(body["chats"][0]["last_message"], "📷 Photo");

        let (status, _) = call(&app, Method::GET, "/chats/alice", Some(&bob), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn empty_and_missing_chats_differ() {
        let app = app();
        let alice = signup(&app, "alice").await;
        signup(&app, "bob").await;
        let chat_id = open_chat(&app, &alice, "alice", "bob").await;

        let (status, body) =
            call(&app, Method::GET, &format!("/messages/{chat_id}"), Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["messages"], json!([]));

        let missing = format!("/messages/{}", Uuid::new_v4());
        let (status, _) = call(&app, Method::GET, &missing, Some(&alice), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, Method::GET, "/messages/not-a-uuid", Some(&alice), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_attachment_is_rejected() {
        let app = app();
        let alice = signup(&app, "alice").await;
        signup(&app, "bob").await;
        let chat_id = open_chat(&app, &alice, "alice", "bob").await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/messages",
            Some(&alice),
            Some(json!({
                "chatId": chat_id,
                "sender": "alice",
                "file_type": "video",
                "file_data": "a".repeat(4 * 1024 * 1024 + 1),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn encryption_keys() {
        let app = app();
        let alice = signup(&app, "alice").await;
        let bob = signup(&app, "bob").await;
        let eve = signup(&app, "eve").await;
        let chat_id = open_chat(&app, &alice, "alice", "bob").await;
        let uri = format!("/chats/{chat_id}/key");

        let (status, _) = call(&app, Method::GET, &uri, Some(&alice), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, Method::POST, &uri, Some(&alice), Some(json!({ "key": "k1" })))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, Method::GET, &uri, Some(&bob), None).await;
        assert_eq!(body["key"], "k1");

        let (status, _) = call(&app, Method::GET, &uri, Some(&eve), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(&app, Method::POST, &uri, Some(&alice), Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn deletes_are_idempotent() {
        let app = app();
        let alice = signup(&app, "alice").await;
        let bob = signup(&app, "bob").await;
        let eve = signup(&app, "eve").await;
        let chat_id = open_chat(&app, &alice, "alice", "bob").await;

        let (_, body) = call(
            &app,
            Method::POST,
            "/messages",
            Some(&alice),
            Some(json!({ "chatId": chat_id, "sender": "alice", "text": "oops" })),
        )
        .await;
        let message_id = body["message"]["id"].as_str().unwrap().to_string();
        let uri = format!("/delete-message/{message_id}");

        let (status, _) = call(&app, Method::DELETE, &uri, Some(&eve), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        for _ in 0..2 {
            let (status, _) = call(&app, Method::DELETE, &uri, Some(&bob), None).await;
            assert_eq!(status, StatusCode::OK);
        }

        let uri = format!("/delete-chat/{chat_id}");
        for _ in 0..2 {
            let (status, _) = call(&app, Method::DELETE, &uri, Some(&alice), None).await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, _) = call(
            &app,
            Method::GET,
            &format!("/messages/{chat_id}"),
            Some(&alice),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn account_management() {
        let app = app();
        let alice = signup(&app, "alice").await;
        let bob = signup(&app, "bob").await;
        open_chat(&app, &alice, "alice", "bob").await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/update-username",
            Some(&alice),
            Some(json!({ "currentUsername": "alice", "newUsername": "alicia" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let alicia = body["token"].as_str().unwrap().to_string();

        let (_, body) = call(&app, Method::GET, "/chats/bob", Some(&bob), None).await;
        assert_eq!(body["chats"][0]["with_user"], "alicia");

        let (status, _) = call(
            &app,
            Method::POST,
            "/update-username",
            Some(&bob),
            Some(json!({ "currentUsername": "bob", "newUsername": "alicia" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(
            &app,
            Method::POST,
            "/update-password",
            Some(&alicia),
            Some(json!({
                "username": "alicia",
                "currentPassword": "alice-pw",
                "newPassword": "new-pw",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(
            &app,
            Method::POST,
            "/update-avatar",
            Some(&alicia),
            Some(json!({ "username": "alicia", "avatar": "data:image/png;base64,AA==" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(
            &app,
            Method::DELETE,
            "/delete-account",
            Some(&alicia),
            Some(json!({ "username": "alicia", "password": "alice-pw" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(
            &app,
            Method::DELETE,
            "/delete-account",
            Some(&alicia),
            Some(json!({ "username": "alicia", "password": "new-pw" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, Method::GET, "/chats/bob", Some(&bob), None).await;
        assert_eq!(body["chats"], json!([]));
    }

    #[tokio::test]
    async fn stale_token_does_not_follow_a_reused_handle() {
        let app = app();
        let old = signup(&app, "alice").await;
        let bob = signup(&app, "bob").await;

        let (status, _) = call(
            &app,
            Method::POST,
            "/update-username",
            Some(&old),
            Some(json!({ "currentUsername": "alice", "newUsername": "alicia" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let mallory = signup(&app, "alice").await;
        let chat = open_chat(&app, &mallory, "alice", "bob").await;
        let (status, _) = call(
            &app,
            Method::POST,
            "/messages",
            Some(&mallory),
            Some(json!({ "chatId": chat, "sender": "alice", "text": "private" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) =
            call(&app, Method::GET, &format!("/messages/{chat}"), Some(&old), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) =
            call(&app, Method::GET, &format!("/messages/{chat}"), Some(&bob), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["messages"][0]["text"], "private");
    }

    #[tokio::test]
    async fn token_dies_with_its_account() {
        let app = app();
        let alice = signup(&app, "alice").await;

        let (status, _) = call(
            &app,
            Method::DELETE,
            "/delete-account",
            Some(&alice),
            Some(json!({ "username": "alice", "password": "alice-pw" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&app, Method::GET, "/users", Some(&alice), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        signup(&app, "alice").await;
        let (status, _) = call(&app, Method::GET, "/chats/alice", Some(&alice), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
