//! HTTP and WebSocket handlers for the Huddle server.
//!
//! Every route is a thin wrapper over [`Hub`]: parse the request, call one
//! hub operation, render the result as JSON.

use crate::config::Config;
use crate::ids;
use crate::metrics::{self, ConnectionMetricsGuard, MeteredConnection};
use anyhow::{Context, Result};
use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use huddle_core::member::validate_member_id;
use huddle_core::{Hub, HubError, Identity, RegistryError, RoomError};
use huddle_protocol::api::{
    CreateRoomRequest, CreateRoomResponse, ErrorResponse, JoinQuery, MembersResponse,
    RegisterRequest, RegisterResponse, RoomsResponse, RosterResponse,
};
use huddle_transport::WebSocketConnection;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    /// The room hub.
    pub hub: Arc<Hub>,
    /// Server configuration.
    pub config: Arc<Config>,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            hub: Arc::new(Hub::with_config(config.hub_config())),
            config: Arc::new(config),
        }
    }
}

/// Errors returned to HTTP clients as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request was malformed or missing fields.
    #[error("{0}")]
    BadRequest(String),

    /// A hub operation failed.
    #[error(transparent)]
    Hub(#[from] HubError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Hub(HubError::Registry(e)) => match e {
                RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
                RegistryError::InvalidRoomId(_) => StatusCode::BAD_REQUEST,
                RegistryError::AlreadyExists(_) => StatusCode::CONFLICT,
                RegistryError::CapacityReached(_) | RegistryError::IdSpaceExhausted(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            },
            ApiError::Hub(HubError::Room(e)) => match e {
                RoomError::InvalidMember(_) => StatusCode::BAD_REQUEST,
                RoomError::MemberExists(_) => StatusCode::CONFLICT,
                RoomError::Full(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            ApiError::Hub(HubError::ShuttingDown) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Hub(e) if e.is_not_found() => "Room not found".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            metrics::record_error("api");
        }
        (status, Json(ErrorResponse::new(self.message()))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// Build the HTTP router.
pub fn build_router(state: AppState) -> Router {
    let cors = state.config.http.cors;

    let router = Router::new()
        .route("/register", post(register_handler))
        .route("/create-room", post(create_room_handler))
        .route("/join-room/:room_id", get(join_room_handler))
        .route("/list-members/:room_id", get(list_members_handler))
        .route("/rooms", get(rooms_handler))
        .route("/rooms/:room_id", get(roster_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

/// Run the HTTP/WebSocket server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let state = AppState::new(config);
    let hub = Arc::clone(&state.hub);
    let app = build_router(state);

    // Bind and serve
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Huddle server listening on {}", addr);

    tokio::spawn(watch_ctrl_c(Arc::clone(&hub)));

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(stopped(hub.shutdown_token()))
    .await?;

    info!("Huddle server stopped");
    Ok(())
}

async fn watch_ctrl_c(hub: Arc<Hub>) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received");
            hub.shutdown();
        }
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}

async fn stopped(token: CancellationToken) {
    token.cancelled().await;
}

/// Health check handler.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "rooms": state.hub.registry().len(),
    }))
}

/// Issue a fresh user id for a display name.
async fn register_handler(
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let Json(request) = body?;
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Invalid name provided".into()));
    }

    let user_id = ids::generate();
    debug!(user = %user_id, name = %name, "User registered");

    Ok(Json(RegisterResponse {
        message: "User registered successfully".into(),
        user_id,
        name: name.to_string(),
    }))
}

/// Create an empty room under a generated id.
async fn create_room_handler(
    State(state): State<AppState>,
    body: Result<Json<CreateRoomRequest>, JsonRejection>,
) -> Result<Json<CreateRoomResponse>, ApiError> {
    let Json(request) = body?;
    if request.user_id.trim().is_empty() || request.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Invalid user or name provided".into()));
    }

    let room = state.hub.create_room_with(ids::generate)?;
    metrics::record_room_created();
    debug!(room = %room.id(), user = %request.user_id, "Room created by user");

    Ok(Json(CreateRoomResponse {
        message: "Room created successfully".into(),
        room_id: room.id().to_string(),
    }))
}

/// Validate the join request, then upgrade and hand the socket to the hub.
async fn join_room_handler(
    ws: Option<WebSocketUpgrade>,
    Path(room_id): Path<String>,
    Query(query): Query<JoinQuery>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let user_id = query.user_id.filter(|s| !s.is_empty());
    let name = query.name.filter(|s| !s.is_empty());
    let (Some(user_id), Some(name)) = (user_id, name) else {
        return Err(ApiError::BadRequest(
            "Missing room ID, user ID, or name".into(),
        ));
    };

    validate_member_id(&user_id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid user ID: {e}")))?;

    // Unknown rooms are refused before upgrading; rooms are never removed
    state.hub.lookup(&room_id)?;
    if state.hub.is_shutting_down() {
        return Err(HubError::ShuttingDown.into());
    }

    let Some(ws) = ws else {
        return Err(ApiError::BadRequest("Expected a WebSocket upgrade".into()));
    };

    // The size limit is enforced by the connection, not the upgrade
    Ok(ws.on_upgrade(move |socket| {
        handle_websocket(
            socket,
            state,
            room_id,
            Identity::with_name(user_id, name),
            remote,
        )
    }))
}

/// Drive one upgraded connection until its relay finishes.
async fn handle_websocket(
    socket: WebSocket,
    state: AppState,
    room_id: String,
    identity: Identity,
    remote: SocketAddr,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let conn = WebSocketConnection::new(socket)
        .with_remote_addr(remote)
        .with_max_message_size(state.config.limits.max_message_size);
    let conn = MeteredConnection::new(Box::new(conn));

    debug!(room = %room_id, member = %identity.id, remote = %remote, "WebSocket connected");

    let member = identity.id.clone();
    let relay = match state.hub.join(&room_id, identity, Box::new(conn)).await {
        Ok(relay) => relay,
        Err(e) => {
            warn!(room = %room_id, member = %member, error = %e, "Join refused after upgrade");
            metrics::record_error("join");
            return;
        }
    };
    metrics::record_join();

    match relay.await {
        Ok(exit) => metrics::record_relay_exit(exit.reason()),
        Err(e) => {
            error!(room = %room_id, member = %member, error = %e, "Relay task failed");
            metrics::record_error("relay_panic");
        }
    }
}

/// Ids of every room, sorted.
async fn rooms_handler(State(state): State<AppState>) -> Json<RoomsResponse> {
    let mut rooms = state.hub.registry().room_ids();
    rooms.sort();
    Json(RoomsResponse { rooms })
}

/// Current member ids of a room.
async fn list_members_handler(
    Path(room_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<MembersResponse>, ApiError> {
    let members = state.hub.list_members(&room_id).await?;
    Ok(Json(MembersResponse { members }))
}

/// Current members of a room with display names and join times.
async fn roster_handler(
    Path(room_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<RosterResponse>, ApiError> {
    let members = state.hub.roster(&room_id).await?;
    Ok(Json(RosterResponse { room_id, members }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message;

    struct TestServer {
        addr: SocketAddr,
        state: AppState,
    }

    async fn spawn_server(config: Config) -> TestServer {
        let state = AppState::new(config);
        let app = build_router(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        TestServer { addr, state }
    }

    async fn http(
        addr: SocketAddr,
        method: &str,
        path: &str,
        body: Option<&str>,
    ) -> (u16, serde_json::Value) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let body = body.unwrap_or("");
        let request = format!(
            "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();

        let status = raw[9..12].parse().unwrap();
        let (_, payload) = raw.split_once("\r\n\r\n").unwrap();
        let json = serde_json::from_str(payload).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    async fn create_room(addr: SocketAddr) -> String {
        let (status, body) = http(
            addr,
            "POST",
            "/create-room",
            Some(r#"{"userID":"u1","name":"Alice"}"#),
        )
        .await;
        assert_eq!(status, 200);
        body["roomID"].as_str().unwrap().to_string()
    }

    async fn next_text<S>(ws: &mut S) -> String
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for message")
                .expect("stream ended")
                .expect("websocket error");
            if let Message::Text(text) = msg {
                return text;
            }
        }
    }

    async fn wait_for_members(state: &AppState, room: &str, expected: usize) {
        for _ in 0..100 {
            if state.hub.list_members(room).await.unwrap().len() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("room {room} never reached {expected} members");
    }

    #[tokio::test]
    async fn test_register_and_create_room() {
        let server = spawn_server(Config::default()).await;

        let (status, body) = http(server.addr, "POST", "/register", Some(r#"{"name":"Alice"}"#)).await;
        assert_eq!(status, 200);
        assert_eq!(body["name"], "Alice");
        assert_eq!(body["userID"].as_str().unwrap().len(), ids::ID_LENGTH);

        let (status, body) = http(server.addr, "POST", "/register", Some(r#"{"name":""}"#)).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "Invalid name provided");

        let room = create_room(server.addr).await;
        assert_eq!(room.len(), ids::ID_LENGTH);
        assert!(server.state.hub.registry().contains(&room));

        let (status, _) = http(server.addr, "POST", "/create-room", Some(r#"{"name":"x"}"#)).await;
        assert_eq!(status, 400);

        let (status, body) = http(server.addr, "GET", "/health", None).await;
        assert_eq!(status, 200);
        assert_eq!(body["rooms"], 1);

        let (status, body) = http(server.addr, "GET", "/rooms", None).await;
        assert_eq!(status, 200);
        assert_eq!(body["rooms"], serde_json::json!([room]));
    }

    #[tokio::test]
    async fn test_unknown_room_and_missing_params() {
        let server = spawn_server(Config::default()).await;

        let (status, body) = http(server.addr, "GET", "/list-members/zzz", None).await;
        assert_eq!(status, 404);
        assert_eq!(body["error"], "Room not found");

        let (status, _) = http(server.addr, "GET", "/join-room/zzz?userID=u1&name=A", None).await;
        assert_eq!(status, 404);

        let room = create_room(server.addr).await;
        let (status, _) = http(server.addr, "GET", &format!("/join-room/{room}?name=A"), None).await;
        assert_eq!(status, 400);
    }

    #[tokio::test]
    async fn test_chat_over_websocket() {
        let server = spawn_server(Config::default()).await;
        let room = create_room(server.addr).await;

        let url = |user: &str, name: &str| {
            format!("ws://{}/join-room/{room}?userID={user}&name={name}", server.addr)
        };

        let (mut alice, _) = tokio_tungstenite::connect_async(url("u1", "alice"))
            .await
            .unwrap();
        wait_for_members(&server.state, &room, 1).await;

        let (mut bob, _) = tokio_tungstenite::connect_async(url("u2", "bob"))
            .await
            .unwrap();
        wait_for_members(&server.state, &room, 2).await;
        assert_eq!(next_text(&mut alice).await, "bob joined the room!");

        alice.send(Message::Text("hi".into())).await.unwrap();
        assert_eq!(next_text(&mut bob).await, "alice: hi");
        assert_eq!(next_text(&mut alice).await, "alice: hi");

        let (status, body) = http(server.addr, "GET", &format!("/list-members/{room}"), None).await;
        assert_eq!(status, 200);
        let mut members: Vec<String> = serde_json::from_value(body["members"].clone()).unwrap();
        members.sort();
        assert_eq!(members, vec!["u1", "u2"]);

        alice.close(None).await.unwrap();
        assert_eq!(next_text(&mut bob).await, "alice left the room!");
        wait_for_members(&server.state, &room, 1).await;

        let (status, body) = http(server.addr, "GET", &format!("/rooms/{room}"), None).await;
        assert_eq!(status, 200);
        assert_eq!(body["members"][0]["name"], "bob");
    }

    #[tokio::test]
    async fn test_oversized_message_disconnects_sender() {
        let mut config = Config::default();
        config.limits.max_message_size = 16;
        let server = spawn_server(config).await;
        let room = create_room(server.addr).await;

        let url = |user: &str, name: &str| {
            format!("ws://{}/join-room/{room}?userID={user}&name={name}", server.addr)
        };

        let (mut alice, _) = tokio_tungstenite::connect_async(url("u1", "alice"))
            .await
            .unwrap();
        wait_for_members(&server.state, &room, 1).await;
        let (mut bob, _) = tokio_tungstenite::connect_async(url("u2", "bob"))
            .await
            .unwrap();
        wait_for_members(&server.state, &room, 2).await;
        assert_eq!(next_text(&mut alice).await, "bob joined the room!");

        alice
            .send(Message::Text("x".repeat(100)))
            .await
            .unwrap();

        // The oversized message is never relayed; its sender is dropped instead
        assert_eq!(next_text(&mut bob).await, "alice left the room!");
        wait_for_members(&server.state, &room, 1).await;
    }

    #[test]
    fn test_error_status_mapping() {
        let not_found = ApiError::from(HubError::from(RegistryError::NotFound("x".into())));
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
        assert_eq!(not_found.message(), "Room not found");

        let full = ApiError::from(HubError::from(RoomError::Full(2)));
        assert_eq!(full.status(), StatusCode::SERVICE_UNAVAILABLE);

        let taken = ApiError::from(HubError::from(RoomError::MemberExists("u1".into())));
        assert_eq!(taken.status(), StatusCode::CONFLICT);

        assert_eq!(
            ApiError::from(HubError::ShuttingDown).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
