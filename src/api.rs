use crate::config::Config;
use crate::model::{ImageMeta, MessageOut, RoomSummary, User};
use crate::presence::Presence;
use crate::router::ConnectionRouter;
use crate::{auth, db, files, housekeeping, messages, rooms, users, ws};
use anyhow::Result;
use axum::extract::ws::WebSocketUpgrade;
use axum::{
    extract::{Extension, Multipart, Path, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use time::Duration;
use uuid::Uuid;

/// Shared state: the connection pool and the in-memory presence and routing
/// maps (initialized at process start, owned here for the process lifetime).
#[derive(Clone)]
pub struct AppState {
    pub pool: db::DbPool,
    pub router: Arc<ConnectionRouter>,
    pub presence: Arc<Presence>,
    pub file_dir: PathBuf,
    pub config: Config,
    pub jwt_secret: Arc<Vec<u8>>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self> {
        let file_dir = config.data_dir.join("uploads");
        tokio::fs::create_dir_all(&file_dir).await?;
        let pool = db::open_pool_with_retry(config.db_path(), config.db_retry_backoff()).await;
        let conn = pool.get()?;
        rooms::seed_default_rooms(&conn)?;
        let jwt_secret =
            auth::load_or_create_secret(&config.data_dir.join("session_secret")).await?;
        Ok(Self {
            pool,
            router: Arc::new(ConnectionRouter::new()),
            presence: Arc::new(Presence::new()),
            file_dir,
            config,
            jwt_secret: Arc::new(jwt_secret),
        })
    }
}

/// Identity of the session behind a request, set by the auth middleware.
#[derive(Clone, Copy, Debug)]
pub struct AuthedUser(pub Uuid);

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/auth/user", get(current_user))
        .route("/api/rooms", get(list_rooms).post(create_room))
        .route("/api/rooms/:id/messages", get(room_messages))
        .route("/api/rooms/:id/join", post(join_room))
        .route("/api/rooms/:id/leave", post(leave_room))
        .route("/api/upload", post(upload_image))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(axum::extract::DefaultBodyLimit::max(
            state.config.max_upload_bytes() as usize,
        ));
    Router::new()
        .route("/api/health", get(health))
        .route("/auth/session", post(create_session))
        .route("/uploads/:id", get(download_upload))
        .route("/ws", get(ws_handler))
        .merge(protected)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn auth_middleware<B>(
    State(state): State<AppState>,
    mut req: axum::http::Request<B>,
    next: Next<B>,
) -> Result<Response, (StatusCode, Json<ErrorResp>)> {
    if let Some(value) = req.headers().get(header::AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                if let Ok(claims) = auth::verify_token(&state.jwt_secret, token) {
                    if let Ok(user_id) = claims.sub.parse::<Uuid>() {
                        req.extensions_mut().insert(AuthedUser(user_id));
                        return Ok(next.run(req).await);
                    }
                }
            }
        }
    }
    Err(err(StatusCode::UNAUTHORIZED, "Not authenticated"))
}

#[derive(Serialize)]
struct ErrorResp {
    error: String,
}

fn err(status: StatusCode, msg: &str) -> (StatusCode, Json<ErrorResp>) {
    (status, Json(ErrorResp { error: msg.into() }))
}

/// Map domain error codes onto HTTP statuses.
fn map_domain(e: anyhow::Error) -> (StatusCode, Json<ErrorResp>) {
    match e.to_string().as_str() {
        "not_found" => err(StatusCode::NOT_FOUND, "Room not found"),
        "empty_message" => err(
            StatusCode::BAD_REQUEST,
            "Message must have content or an image",
        ),
        "not_an_image" => err(StatusCode::BAD_REQUEST, "Only image files are allowed"),
        "file_too_large" => err(StatusCode::PAYLOAD_TOO_LARGE, "File too large"),
        _ => {
            tracing::error!(error = %e, "request failed");
            err(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

type ApiResult<T> = Result<T, (StatusCode, Json<ErrorResp>)>;

#[derive(Deserialize)]
struct SessionReq {
    provider_id: String,
    name: String,
    #[serde(default)]
    avatar_url: Option<String>,
}

#[derive(Serialize)]
struct SessionResp {
    token: String,
    user: User,
}

/// External-identity boundary: the OAuth callback hands a verified identity
/// here, which provisions the user on first sight and mints a session token.
async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<SessionReq>,
) -> ApiResult<Json<SessionResp>> {
    if req.provider_id.trim().is_empty() || req.name.trim().is_empty() {
        return Err(err(StatusCode::BAD_REQUEST, "Missing identity fields"));
    }
    let conn = state.pool.get().map_err(|e| map_domain(e.into()))?;
    let user = users::upsert_user(
        &conn,
        req.provider_id.trim(),
        req.name.trim(),
        req.avatar_url.as_deref(),
    )
    .map_err(map_domain)?;
    let token = auth::issue_token(&state.jwt_secret, &user.id.to_string(), Duration::days(7))
        .map_err(map_domain)?;
    Ok(Json(SessionResp { token, user }))
}

async fn current_user(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
) -> ApiResult<Json<User>> {
    let conn = state.pool.get().map_err(|e| map_domain(e.into()))?;
    match users::get_user(&conn, &user_id).map_err(map_domain)? {
        Some(user) => Ok(Json(user)),
        None => Err(err(StatusCode::UNAUTHORIZED, "Not authenticated")),
    }
}

async fn list_rooms(State(state): State<AppState>) -> ApiResult<Json<Vec<RoomSummary>>> {
    let conn = state.pool.get().map_err(|e| map_domain(e.into()))?;
    let rooms = rooms::list_rooms(&conn).map_err(map_domain)?;
    Ok(Json(rooms))
}

#[derive(Deserialize)]
struct CreateRoomReq {
    name: String,
    #[serde(default)]
    description: String,
}

async fn create_room(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Json(req): Json<CreateRoomReq>,
) -> ApiResult<(StatusCode, Json<RoomSummary>)> {
    if req.name.trim().is_empty() {
        return Err(err(StatusCode::BAD_REQUEST, "Room name is required"));
    }
    let conn = state.pool.get().map_err(|e| map_domain(e.into()))?;
    let room = rooms::create_room(&conn, req.name.trim(), &req.description, &user_id)
        .map_err(map_domain)?;
    let summary = rooms::room_summary(&conn, room).map_err(map_domain)?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn room_messages(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(room_id): Path<Uuid>,
) -> ApiResult<Json<Vec<MessageOut>>> {
    let conn = state.pool.get().map_err(|e| map_domain(e.into()))?;
    if rooms::get_room(&conn, &room_id).map_err(map_domain)?.is_none() {
        return Err(err(StatusCode::NOT_FOUND, "Room not found"));
    }
    if !rooms::is_member(&conn, &room_id, &user_id).map_err(map_domain)? {
        return Err(err(
            StatusCode::FORBIDDEN,
            "You must join the room to view messages",
        ));
    }
    let msgs = messages::list_messages(&conn, &room_id, 100).map_err(map_domain)?;
    Ok(Json(msgs))
}

#[derive(Serialize)]
struct JoinResp {
    message: String,
    room: RoomSummary,
}

async fn join_room(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(room_id): Path<Uuid>,
) -> ApiResult<Json<JoinResp>> {
    let conn = state.pool.get().map_err(|e| map_domain(e.into()))?;
    let room = rooms::join_room(&conn, &room_id, &user_id).map_err(map_domain)?;
    let summary = rooms::room_summary(&conn, room).map_err(map_domain)?;
    Ok(Json(JoinResp {
        message: "Joined room successfully".into(),
        room: summary,
    }))
}

#[derive(Serialize)]
struct LeaveResp {
    message: String,
    room_deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    room: Option<RoomSummary>,
}

async fn leave_room(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(room_id): Path<Uuid>,
) -> ApiResult<Json<LeaveResp>> {
    let conn = state.pool.get().map_err(|e| map_domain(e.into()))?;
    let outcome = rooms::leave_room(&conn, &room_id, &user_id).map_err(map_domain)?;
    if outcome.deleted {
        return Ok(Json(LeaveResp {
            message: "Left room successfully and room was deleted (empty)".into(),
            room_deleted: true,
            room: None,
        }));
    }
    let room = match outcome.room {
        Some(room) => Some(rooms::room_summary(&conn, room).map_err(map_domain)?),
        None => None,
    };
    Ok(Json(LeaveResp {
        message: "Left room successfully".into(),
        room_deleted: false,
        room,
    }))
}

async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<ImageMeta>> {
    let field = match multipart.next_field().await {
        Ok(Some(field)) => field,
        _ => return Err(err(StatusCode::BAD_REQUEST, "No file uploaded")),
    };
    let name = field
        .file_name()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "image".into());
    let declared = field.content_type().map(|m| m.to_string());
    let data = field
        .bytes()
        .await
        .map_err(|_| err(StatusCode::BAD_REQUEST, "No file uploaded"))?;
    let mime = files::validate_image(
        &name,
        declared.as_deref(),
        &data,
        state.config.max_upload_bytes(),
    )
    .map_err(map_domain)?;
    let size = data.len() as i64;
    let file_id = files::save_file(&state.file_dir, data)
        .await
        .map_err(map_domain)?;
    Ok(Json(ImageMeta {
        url: format!("/uploads/{file_id}"),
        filename: file_id,
        original_name: name,
        mimetype: mime,
        size,
    }))
}

/// Serve a stored upload. The content type is sniffed from the bytes on
/// every request, so downloads stay correct across restarts without any
/// in-memory bookkeeping.
async fn download_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let path = files::file_path(&state.file_dir, &id).ok_or(StatusCode::NOT_FOUND)?;
    let data = tokio::fs::read(path)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    let mime = infer::get(&data)
        .map(|kind| kind.mime_type())
        .unwrap_or("application/octet-stream");
    Ok(([(header::CONTENT_TYPE, mime)], data))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws::handle_socket(socket, state))
}

/// Run the HTTP server bound to the configured address.
pub async fn run_http_server(config: Config) -> Result<()> {
    let addr: SocketAddr = config.bind.parse()?;
    let state = AppState::new(config).await?;
    housekeeping::spawn_sweeper(state.clone());
    tracing::info!(%addr, "server listening");
    axum::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .await?;
    Ok(())
}
