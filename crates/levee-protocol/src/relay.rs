//! WebSocket relay wire protocol.
//!
//! Every frame is a JSON text message `{"type": "...", "data": {...}}`.
//! Clients send `start`, `message`, `abort` and `tool_result`; the relay sends
//! `started`, `chunk`, `tool_call`, `completion` and `error`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::{ChatEvent, StartChat};
use crate::messages::{ChatMessage, ChatRequest};

/// Client message types.
pub const TYPE_START: &str = "start";
pub const TYPE_MESSAGE: &str = "message";
pub const TYPE_ABORT: &str = "abort";
pub const TYPE_TOOL_RESULT: &str = "tool_result";

/// Error codes sent in `error` frames.
pub mod codes {
    pub const INVALID_JSON: &str = "invalid_json";
    pub const INVALID_DATA: &str = "invalid_data";
    pub const UNKNOWN_TYPE: &str = "unknown_type";
    pub const ALREADY_STARTED: &str = "already_started";
    pub const NOT_STARTED: &str = "not_started";
    pub const CONNECTION_FAILED: &str = "connection_failed";
    pub const STREAM_FAILED: &str = "stream_failed";
    pub const SEND_FAILED: &str = "send_failed";
    pub const STREAM_ERROR: &str = "stream_error";
    pub const ABORTED: &str = "aborted";
}

/// Inbound envelope. `data` is decoded only after the type is known, so a
/// malformed payload can be told apart from a malformed envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Decode the payload into `T`.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

/// `start` payload. Every field is optional; the gateway fills defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub messages: Vec<ChatMessage>,
}

impl StartPayload {
    pub fn into_start(self, api_key: impl Into<String>) -> StartChat {
        StartChat {
            api_key: api_key.into(),
            system_prompt: self.system_prompt,
            model: self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: self.messages,
        }
    }
}

impl From<&ChatRequest> for StartPayload {
    fn from(request: &ChatRequest) -> Self {
        Self {
            system_prompt: request.system_prompt.clone(),
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: request.messages.clone(),
        }
    }
}

/// `message` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessagePayload {
    pub content: String,
}

/// `abort` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbortPayload {
    pub reason: String,
}

/// `tool_result` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultPayload {
    pub tool_call_id: String,
    pub result: String,
    #[serde(default)]
    pub is_error: bool,
}

/// Messages sent from the relay to the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Started {
        session_id: String,
        provider: String,
        model: String,
    },
    Chunk {
        content: String,
        index: u32,
    },
    ToolCall {
        tool_call_id: String,
        name: String,
        arguments_json: String,
    },
    Completion {
        full_content: String,
        stop_reason: String,
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
        latency_ms: u64,
    },
    Error {
        code: String,
        message: String,
        retryable: bool,
    },
}

impl ServerMessage {
    pub fn error(code: &str, message: impl Into<String>, retryable: bool) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            message: message.into(),
            retryable,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<ChatEvent> for ServerMessage {
    fn from(event: ChatEvent) -> Self {
        match event {
            ChatEvent::SessionStarted {
                session_id,
                provider,
                model,
            } => ServerMessage::Started {
                session_id,
                provider,
                model,
            },
            ChatEvent::Chunk(chunk) => ServerMessage::Chunk {
                content: chunk.content,
                index: chunk.index,
            },
            ChatEvent::ToolCall {
                tool_call_id,
                name,
                arguments_json,
            } => ServerMessage::ToolCall {
                tool_call_id,
                name,
                arguments_json,
            },
            ChatEvent::Completion(done) => ServerMessage::Completion {
                full_content: done.full_content,
                stop_reason: done.stop_reason,
                input_tokens: done.input_tokens,
                output_tokens: done.output_tokens,
                cost_usd: done.cost_usd,
                latency_ms: done.latency_ms,
            },
            ChatEvent::Error {
                code,
                message,
                retryable,
            } => ServerMessage::Error {
                code,
                message,
                retryable,
            },
            ChatEvent::Aborted { reason } => ServerMessage::Error {
                code: codes::ABORTED.to_string(),
                message: reason,
                retryable: false,
            },
        }
    }
}
