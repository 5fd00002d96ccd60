use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderValue, Method},
    response::{Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::config::Config;
use crate::protocol::Framing;
use crate::relay::{BroadcastStats, ConnectionRegistry, RoomBroadcaster};

pub mod handler;

pub use handler::WebSocketHandler;

/// Axum state wrapper for the relay
#[derive(Clone)]
pub struct RelayState {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<RoomBroadcaster>,
    default_room: Option<String>,
    started_at: DateTime<Utc>,
}

impl RelayState {
    /// Create relay state around an existing registry
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            broadcaster: Arc::new(RoomBroadcaster::new(registry.clone())),
            registry,
            default_room: None,
            started_at: Utc::now(),
        }
    }

    /// Create relay state with the registry limits and default room from `config`
    pub fn from_config(config: &Config) -> Self {
        let registry = Arc::new(match config.max_room_id_len {
            Some(max_len) => ConnectionRegistry::with_max_room_id_len(max_len),
            None => ConnectionRegistry::new(),
        });
        let state = Self::new(registry);

        match config.default_room() {
            Some(room_id) => state.with_default_room(room_id),
            None => state,
        }
    }

    /// Have every new connection join `room_id` on admission
    pub fn with_default_room(mut self, room_id: impl Into<String>) -> Self {
        self.default_room = Some(room_id.into());
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Arc<RoomBroadcaster> {
        &self.broadcaster
    }

    pub fn default_room(&self) -> Option<&str> {
        self.default_room.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// Query parameters accepted on the WebSocket upgrade request
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    #[serde(default)]
    pub framing: Framing,
}

/// Body of the status endpoint
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub connections: usize,
    pub rooms: usize,
    #[serde(flatten)]
    pub traffic: BroadcastStats,
    pub started_at: DateTime<Utc>,
}

/// Create a router with the relay WebSocket endpoint at `ws_path`, plus `/` and `/status`
pub fn router_with_relay(state: RelayState, ws_path: &str) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/status", get(status))
        .route(ws_path, get(websocket_handler))
        .with_state(state)
}

/// The full application: relay routes wrapped in tracing and CORS layers
pub fn app(state: RelayState, config: &Config) -> Router {
    router_with_relay(state, &config.ws_path).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(config)),
    )
}

/// CORS for the configured origins, or any origin when none are configured
pub fn cors_layer(config: &Config) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods([Method::GET, Method::POST]);

    match config.allowed_origins() {
        Some(origins) if !origins.iter().any(|origin| origin == "*") => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| match origin.parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(e) => {
                        warn!("Ignoring invalid CORS origin '{}': {}", origin, e);
                        None
                    }
                })
                .collect();
            cors.allow_origin(AllowOrigin::list(origins))
        }
        _ => cors.allow_origin(Any),
    }
}

/// Liveness endpoint, answers unconditionally
async fn liveness() -> &'static str {
    debug!("Liveness check requested");
    "doc-relay is running"
}

/// Connection and traffic counters
async fn status(State(state): State<RelayState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        connections: state.registry().connection_count().await,
        rooms: state.registry().room_count().await,
        traffic: state.broadcaster().stats(),
        started_at: state.started_at(),
    })
}

/// WebSocket handler endpoint
async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<RelayState>,
) -> Response {
    ws.on_upgrade(move |socket| WebSocketHandler::new(socket, state, params.framing).handle())
}
