//! Levee LLM gateway client.
//!
//! [`LlmClient`] owns the (lazily established) gRPC connection and offers the
//! one-shot [`LlmClient::chat`] call. Multi-turn conversations go through a
//! [`ChatSession`], which drives one bidirectional stream.
//!
//! The transport sits behind two traits so that tests and alternative
//! transports can stand in for gRPC:
//!
//! ```text
//! LlmClient ──connect()──▶ Connector ──▶ Arc<dyn LlmBackend>
//!                                          ├─ simple_chat()
//!                                          └─ open_chat() ──▶ ChatStream
//! ```

mod client;
mod error;
mod grpc;
mod session;
mod types;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc;

use levee_protocol::pb;
use levee_protocol::{ChatCommand, ChatEvent, StartChat};

pub use client::LlmClient;
pub use error::{CallError, ConnectError, SessionError, SessionResult};
pub use grpc::{GrpcBackend, GrpcConnector};
pub use session::ChatSession;
pub use types::{GrpcTarget, LlmConfig};

/// Backend events for one stream, ending when the backend closes it.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ChatEvent, tonic::Status>> + Send>>;

/// An open bidirectional chat stream.
///
/// Dropping `commands` closes the send side of the stream.
pub struct ChatStream {
    pub commands: mpsc::Sender<ChatCommand>,
    pub events: EventStream,
}

impl std::fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStream")
            .field("closed", &self.commands.is_closed())
            .finish_non_exhaustive()
    }
}

/// A connected LLM gateway.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Single request, single response.
    async fn simple_chat(
        &self,
        request: pb::SimpleChatRequest,
    ) -> Result<pb::SimpleChatResponse, tonic::Status>;

    /// Open a chat stream whose first outbound message is `start`.
    async fn open_chat(&self, start: StartChat) -> Result<ChatStream, tonic::Status>;
}

/// Establishes backend connections for [`LlmClient`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &GrpcTarget) -> Result<Arc<dyn LlmBackend>, ConnectError>;
}
