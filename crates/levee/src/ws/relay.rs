//! Relay between one browser WebSocket and one backend chat stream.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use levee_protocol::ChatCommand;
use levee_protocol::relay::{
    AbortPayload, Envelope, ServerMessage, StartPayload, ToolResultPayload, UserMessagePayload,
    TYPE_ABORT, TYPE_MESSAGE, TYPE_START, TYPE_TOOL_RESULT, codes,
};

use crate::llm::{ChatStream, EventStream, LlmClient, SessionError};

/// Serialized write side of the socket, shared by the read loop and the
/// forwarding task.
#[derive(Clone)]
struct SocketWriter {
    sink: Arc<Mutex<SplitSink<WebSocket, Message>>>,
}

impl SocketWriter {
    /// Returns false once the socket can no longer be written.
    async fn send(&self, message: &ServerMessage) -> bool {
        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize relay message: {}", e);
                return true;
            }
        };
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(json.into())).await.is_ok()
    }

    async fn error(&self, code: &str, message: impl Into<String>, retryable: bool) -> bool {
        self.send(&ServerMessage::error(code, message, retryable))
            .await
    }

    async fn close(&self) {
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            debug!("Closing relay socket: {}", e);
        }
    }
}

/// State of one relay connection.
pub struct RelaySession {
    client: Arc<LlmClient>,
    writer: SocketWriter,
    /// Present once `start` succeeded.
    commands: Option<mpsc::Sender<ChatCommand>>,
    forwarder: Option<JoinHandle<()>>,
}

impl RelaySession {
    fn new(client: Arc<LlmClient>, sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            client,
            writer: SocketWriter {
                sink: Arc::new(Mutex::new(sink)),
            },
            commands: None,
            forwarder: None,
        }
    }

    pub fn started(&self) -> bool {
        self.commands.is_some()
    }

    /// Serve one socket until the client disconnects.
    pub async fn run(socket: WebSocket, client: Arc<LlmClient>) {
        let (sink, mut receiver) = socket.split();
        let mut session = RelaySession::new(client, sink);

        while let Some(msg_result) = receiver.next().await {
            match msg_result {
                Ok(Message::Text(text)) => session.handle_text(text.as_str()).await,
                Ok(Message::Binary(_)) => {
                    debug!("Ignoring binary frame on chat relay");
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(_)) => {
                    debug!("Chat relay client closed the socket");
                    break;
                }
                Err(e) => {
                    debug!("Chat relay socket error: {}", e);
                    break;
                }
            }
        }

        session.shutdown().await;
    }

    async fn handle_text(&mut self, text: &str) {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(_) => {
                self.writer
                    .error(codes::INVALID_JSON, "Invalid JSON message", false)
                    .await;
                return;
            }
        };

        match envelope.kind.as_str() {
            TYPE_START => self.handle_start(&envelope).await,
            TYPE_MESSAGE => self.handle_message(&envelope).await,
            TYPE_ABORT => self.handle_abort(&envelope).await,
            TYPE_TOOL_RESULT => self.handle_tool_result(&envelope).await,
            other => {
                self.writer
                    .error(
                        codes::UNKNOWN_TYPE,
                        format!("Unknown message type: {other}"),
                        false,
                    )
                    .await;
            }
        }
    }

    async fn handle_start(&mut self, envelope: &Envelope) {
        if self.started() {
            self.writer
                .error(codes::ALREADY_STARTED, "Session already started", false)
                .await;
            return;
        }

        let payload: StartPayload = match envelope.payload() {
            Ok(payload) => payload,
            Err(_) => {
                self.writer
                    .error(codes::INVALID_DATA, "Invalid start request", false)
                    .await;
                return;
            }
        };

        if let Err(e) = self.client.connect().await {
            self.writer
                .error(codes::CONNECTION_FAILED, e.to_string(), true)
                .await;
            return;
        }

        let start = payload.into_start(self.client.api_key());
        let ChatStream { commands, events } = match self.client.open_chat(start).await {
            Ok(stream) => stream,
            Err(e) => {
                let code = match &e {
                    SessionError::Connect(_) => codes::CONNECTION_FAILED,
                    _ => codes::STREAM_FAILED,
                };
                self.writer.error(code, e.to_string(), true).await;
                return;
            }
        };

        self.commands = Some(commands);
        self.forwarder = Some(tokio::spawn(forward_events(events, self.writer.clone())));
        info!("Chat relay session started");
    }

    async fn handle_message(&mut self, envelope: &Envelope) {
        if !self.started() {
            self.writer
                .error(codes::NOT_STARTED, "Session not started", false)
                .await;
            return;
        }

        let payload: UserMessagePayload = match envelope.payload() {
            Ok(payload) => payload,
            Err(_) => {
                self.writer
                    .error(codes::INVALID_DATA, "Invalid message", false)
                    .await;
                return;
            }
        };

        self.forward(ChatCommand::Message {
            content: payload.content,
        })
        .await;
    }

    async fn handle_abort(&mut self, envelope: &Envelope) {
        let Some(commands) = &self.commands else {
            return;
        };

        let payload: AbortPayload = envelope.payload().unwrap_or_default();
        if commands
            .send(ChatCommand::Abort {
                reason: payload.reason,
            })
            .await
            .is_err()
        {
            debug!("Dropping abort: backend stream is closed");
        }
    }

    async fn handle_tool_result(&mut self, envelope: &Envelope) {
        if !self.started() {
            self.writer
                .error(codes::NOT_STARTED, "Session not started", false)
                .await;
            return;
        }

        let payload: ToolResultPayload = match envelope.payload() {
            Ok(payload) => payload,
            Err(_) => {
                self.writer
                    .error(codes::INVALID_DATA, "Invalid tool result", false)
                    .await;
                return;
            }
        };

        self.forward(ChatCommand::ToolResult {
            tool_call_id: payload.tool_call_id,
            result: payload.result,
            is_error: payload.is_error,
        })
        .await;
    }

    async fn forward(&self, command: ChatCommand) {
        let Some(commands) = &self.commands else {
            return;
        };
        if commands.send(command).await.is_err() {
            self.writer
                .error(codes::SEND_FAILED, "Backend stream is closed", true)
                .await;
        }
    }

    async fn shutdown(mut self) {
        // Closing the send side lets the backend end the stream.
        self.commands.take();
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        self.writer.close().await;
        info!("Chat relay connection closed");
    }
}

/// Drain backend events into the socket until the stream ends.
async fn forward_events(mut events: EventStream, writer: SocketWriter) {
    while let Some(item) = events.next().await {
        match item {
            Ok(event) => {
                if !writer.send(&ServerMessage::from(event)).await {
                    debug!("Chat relay socket gone, stopping event forwarding");
                    return;
                }
            }
            Err(status) => {
                warn!("Backend chat stream failed: {}", status);
                writer
                    .error(codes::STREAM_ERROR, status.message(), false)
                    .await;
                return;
            }
        }
    }
    debug!("Backend chat stream ended");
}
