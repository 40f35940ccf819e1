//! WebSocket upgrade handler for the chat relay.

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::llm::LlmClient;

use super::relay::RelaySession;

/// Default mount point of the relay route.
pub const DEFAULT_ROUTE: &str = "/ws/chat";

/// Relay route configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Path the relay is served on.
    pub route: String,
    /// Allowed `Origin` header values. Empty allows every origin.
    /// Requests without an `Origin` header (non-browser clients) are accepted.
    pub allowed_origins: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            route: DEFAULT_ROUTE.to_string(),
            allowed_origins: Vec::new(),
        }
    }
}

impl RelayConfig {
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        let Some(origin) = origin else {
            return true;
        };
        self.allowed_origins
            .iter()
            .any(|allowed| allowed.trim_end_matches('/') == origin.trim_end_matches('/'))
    }
}

/// Shared state of the relay route.
#[derive(Clone)]
pub struct RelayState {
    pub client: Arc<LlmClient>,
    pub config: Arc<RelayConfig>,
}

/// WebSocket upgrade handler.
///
/// GET /ws/chat
pub async fn chat_ws_handler(
    State(state): State<RelayState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());
    if !state.config.origin_allowed(origin) {
        warn!("Rejected chat relay upgrade from origin {:?}", origin);
        return StatusCode::FORBIDDEN.into_response();
    }

    info!("Chat relay upgrade request");
    let client = state.client.clone();
    ws.on_upgrade(move |socket| RelaySession::run(socket, client))
}

/// Router serving the relay at `config.route`.
pub fn router(client: Arc<LlmClient>, config: RelayConfig) -> Router {
    let route = config.route.clone();
    Router::new()
        .route(&route, get(chat_ws_handler))
        .with_state(RelayState {
            client,
            config: Arc::new(config),
        })
}
