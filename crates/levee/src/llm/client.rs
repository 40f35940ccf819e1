//! Lazily connected LLM client.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use tokio::sync::Mutex;

use levee_protocol::pb;
use levee_protocol::{ChatRequest, ChatResponse, Role, StartChat, StreamChunk};

use super::error::{CallError, ConnectError, SessionError, SessionResult};
use super::grpc::GrpcConnector;
use super::session::ChatSession;
use super::types::{GrpcTarget, LlmConfig};
use super::{ChatStream, Connector, LlmBackend};

/// Path of the discovery endpoint, relative to the base URL.
pub const CONFIG_PATH: &str = "/sdk/v1/llm/config";

/// Header carrying the API key on HTTP calls.
pub const API_KEY_HEADER: &str = "X-API-Key";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

enum ConnectionState {
    Disconnected,
    Ready(Arc<dyn LlmBackend>),
    Failed(String),
}

struct ConnectorState {
    connection: ConnectionState,
    /// Explicit or discovered `host:port`; discovery runs at most once.
    address: Option<String>,
}

/// Client for the Levee LLM gateway.
///
/// One client per configuration; share it behind an `Arc`. The gRPC connection
/// is opened on first use and reused by every call and session.
pub struct LlmClient {
    api_key: String,
    /// Base URL for HTTP API calls (e.g. "https://levee.example.com").
    base_url: String,
    /// Derived from the base URL scheme.
    use_tls: bool,
    http: Client,
    connector: Arc<dyn Connector>,
    state: Mutex<ConnectorState>,
}

impl LlmClient {
    /// Create a client.
    ///
    /// TLS is chosen from the URL scheme: `https://` encrypts, `http://` is
    /// plaintext and meant for development only. The gRPC port is discovered
    /// through `/sdk/v1/llm/config` unless set with [`with_grpc_address`].
    ///
    /// [`with_grpc_address`]: LlmClient::with_grpc_address
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            api_key: api_key.into(),
            use_tls: base_url.starts_with("https://"),
            base_url,
            http,
            connector: Arc::new(GrpcConnector),
            state: Mutex::new(ConnectorState {
                connection: ConnectionState::Disconnected,
                address: None,
            }),
        }
    }

    /// Use a fixed gRPC address (`host:port`) and skip discovery.
    pub fn with_grpc_address(mut self, address: impl Into<String>) -> Self {
        let address = address.into();
        self.state.get_mut().address = (!address.is_empty()).then_some(address);
        self
    }

    /// Use a custom HTTP client for the config lookup.
    pub fn with_http_client(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    /// Replace the transport.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the LLM configuration for this API key.
    pub async fn fetch_config(&self) -> Result<LlmConfig, ConnectError> {
        if self.base_url.is_empty() {
            return Err(ConnectError::MissingBaseUrl);
        }

        let url = format!("{}{}", self.base_url, CONFIG_PATH);
        let response = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectError::LookupStatus {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ConnectError::ParseError(e.to_string()))
    }

    /// Ensure the gRPC connection exists. Safe to call before every operation.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        self.backend().await.map(|_| ())
    }

    /// Whether a connection is currently cached.
    pub async fn is_connected(&self) -> bool {
        matches!(self.state.lock().await.connection, ConnectionState::Ready(_))
    }

    /// Drop the cached connection. A later call reconnects.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if matches!(state.connection, ConnectionState::Ready(_)) {
            tracing::debug!("Closing LLM gateway connection");
        }
        state.connection = ConnectionState::Disconnected;
    }

    /// Connected backend, connecting first if needed.
    ///
    /// The state lock is held for the whole connect so concurrent callers
    /// wait for the first attempt instead of starting their own.
    pub(crate) async fn backend(&self) -> Result<Arc<dyn LlmBackend>, ConnectError> {
        let mut state = self.state.lock().await;
        if let ConnectionState::Ready(backend) = &state.connection {
            return Ok(backend.clone());
        }
        if let ConnectionState::Failed(reason) = &state.connection {
            tracing::debug!(%reason, "Retrying LLM gateway connection after earlier failure");
        }

        let result = self.establish(&mut state).await;
        state.connection = match &result {
            Ok(backend) => ConnectionState::Ready(backend.clone()),
            Err(e) => {
                tracing::warn!("LLM gateway connection failed: {e}");
                ConnectionState::Failed(e.to_string())
            }
        };
        result
    }

    async fn establish(
        &self,
        state: &mut ConnectorState,
    ) -> Result<Arc<dyn LlmBackend>, ConnectError> {
        let address = match &state.address {
            Some(address) => address.clone(),
            None => {
                let address = self.discover_address().await?;
                state.address = Some(address.clone());
                address
            }
        };

        let target = GrpcTarget::new(address, self.use_tls);
        self.connector.connect(&target).await
    }

    async fn discover_address(&self) -> Result<String, ConnectError> {
        let config = self.fetch_config().await?;
        if !config.available {
            return Err(ConnectError::Unavailable);
        }

        let url = Url::parse(&self.base_url).map_err(|e| ConnectError::InvalidBaseUrl {
            url: self.base_url.clone(),
            message: e.to_string(),
        })?;
        let host = url.host_str().ok_or_else(|| ConnectError::InvalidBaseUrl {
            url: self.base_url.clone(),
            message: "missing host".to_string(),
        })?;

        let address = format!("{host}:{}", config.grpc_port);
        tracing::info!(%address, provider = %config.default_provider, "Discovered LLM gateway");
        Ok(address)
    }

    /// Send a non-streaming chat request.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, CallError> {
        let backend = self.backend().await?;
        let response = backend
            .simple_chat(pb::SimpleChatRequest::from_request(&self.api_key, request))
            .await?;
        Ok(response.into())
    }

    /// Open a raw chat stream with the given start envelope.
    pub async fn open_chat(&self, start: StartChat) -> SessionResult<ChatStream> {
        let backend = self.backend().await?;
        backend.open_chat(start).await.map_err(SessionError::Open)
    }

    /// Start a bidirectional chat session. `request.messages` seeds the context.
    pub async fn new_session(&self, request: &ChatRequest) -> SessionResult<ChatSession> {
        let stream = self
            .open_chat(StartChat::from_request(&self.api_key, request))
            .await?;
        Ok(ChatSession::new(stream))
    }

    /// Send the last message of `request` on a fresh session and stream the reply.
    ///
    /// Only the model parameters are sent in the start envelope; the last
    /// message must come from the user. The session is closed afterwards.
    pub async fn chat_stream<F>(&self, request: &ChatRequest, on_chunk: F) -> SessionResult<ChatResponse>
    where
        F: FnMut(StreamChunk) -> anyhow::Result<()> + Send,
    {
        let last = request.messages.last().ok_or(SessionError::EmptyConversation)?;
        if last.role != Role::User {
            return Err(SessionError::LastMessageNotUser);
        }

        let params = ChatRequest {
            messages: Vec::new(),
            ..request.clone()
        };
        let session = self.new_session(&params).await?;
        let result = session.send_with(last.content.clone(), on_chunk).await;
        session.close().await?;
        result
    }
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.base_url)
            .field("use_tls", &self.use_tls)
            .finish_non_exhaustive()
    }
}
