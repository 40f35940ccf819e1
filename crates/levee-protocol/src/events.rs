//! Commands and events exchanged over a bidirectional chat stream.
//!
//! The gRPC layer models both directions as protobuf `oneof`s. Everything above
//! the transport works with the closed enums below instead, so every consumer
//! matches exhaustively on the variant.

use crate::messages::{ChatMessage, ChatRequest, Completion, StreamChunk};
use crate::pb;

/// Payload of the start envelope that opens a streaming session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartChat {
    pub api_key: String,
    pub system_prompt: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Seed messages placed in the context before the first turn.
    pub messages: Vec<ChatMessage>,
}

impl StartChat {
    pub fn from_request(api_key: impl Into<String>, request: &ChatRequest) -> Self {
        Self {
            api_key: api_key.into(),
            system_prompt: request.system_prompt.clone(),
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: request.messages.clone(),
        }
    }
}

/// Client -> backend messages after the stream is open.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    Start(StartChat),
    Message {
        content: String,
    },
    Abort {
        reason: String,
    },
    ToolResult {
        tool_call_id: String,
        result: String,
        is_error: bool,
    },
}

/// Backend -> client events.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    SessionStarted {
        session_id: String,
        provider: String,
        model: String,
    },
    Chunk(StreamChunk),
    ToolCall {
        tool_call_id: String,
        name: String,
        arguments_json: String,
    },
    Completion(Completion),
    Error {
        code: String,
        message: String,
        retryable: bool,
    },
    Aborted {
        reason: String,
    },
}

impl ChatEvent {
    /// Convert a wire response. Returns `None` when the backend sent an empty
    /// envelope (unset `oneof`), which carries no information.
    pub fn from_pb(response: pb::ChatResponse) -> Option<Self> {
        use pb::chat_response::Response;

        let event = match response.response? {
            Response::SessionStarted(started) => ChatEvent::SessionStarted {
                session_id: started.session_id,
                provider: started.provider,
                model: started.model,
            },
            Response::Chunk(chunk) => ChatEvent::Chunk(StreamChunk {
                content: chunk.content,
                index: non_negative_u32(chunk.index),
            }),
            Response::ToolCall(call) => ChatEvent::ToolCall {
                tool_call_id: call.tool_call_id,
                name: call.name,
                arguments_json: call.arguments_json,
            },
            Response::Completion(done) => ChatEvent::Completion(Completion {
                full_content: done.full_content,
                stop_reason: done.stop_reason,
                input_tokens: non_negative_u64(done.input_tokens),
                output_tokens: non_negative_u64(done.output_tokens),
                cost_usd: done.cost_usd.max(0.0),
                latency_ms: non_negative_u64(done.latency_ms),
            }),
            Response::Error(err) => ChatEvent::Error {
                code: err.code,
                message: err.message,
                retryable: err.retryable,
            },
            Response::Aborted(aborted) => ChatEvent::Aborted {
                reason: aborted.reason,
            },
        };
        Some(event)
    }

    /// True for events that end the current turn.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChatEvent::Completion(_) | ChatEvent::Error { .. } | ChatEvent::Aborted { .. }
        )
    }
}

impl From<&ChatMessage> for pb::Message {
    fn from(message: &ChatMessage) -> Self {
        pb::Message {
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
        }
    }
}

/// Convert a message list into wire messages, preserving order.
pub fn to_pb_messages(messages: &[ChatMessage]) -> Vec<pb::Message> {
    messages.iter().map(pb::Message::from).collect()
}

impl From<ChatCommand> for pb::ChatRequest {
    fn from(command: ChatCommand) -> Self {
        use pb::chat_request::Request;

        let request = match command {
            ChatCommand::Start(start) => Request::Start(pb::StartChatRequest {
                api_key: start.api_key,
                system_prompt: start.system_prompt.unwrap_or_default(),
                model: start.model,
                max_tokens: clamp_i32(start.max_tokens),
                temperature: start.temperature,
                messages: to_pb_messages(&start.messages),
            }),
            ChatCommand::Message { content } => Request::Message(pb::UserMessage { content }),
            ChatCommand::Abort { reason } => Request::Abort(pb::AbortRequest { reason }),
            ChatCommand::ToolResult {
                tool_call_id,
                result,
                is_error,
            } => Request::ToolResult(pb::ToolResult {
                tool_call_id,
                result,
                is_error,
            }),
        };
        pb::ChatRequest {
            request: Some(request),
        }
    }
}

impl pb::SimpleChatRequest {
    pub fn from_request(api_key: impl Into<String>, request: &ChatRequest) -> Self {
        Self {
            api_key: api_key.into(),
            messages: to_pb_messages(&request.messages),
            system_prompt: request.system_prompt.clone().unwrap_or_default(),
            model: request.model.clone(),
            max_tokens: clamp_i32(request.max_tokens),
            temperature: request.temperature,
        }
    }
}

impl From<pb::SimpleChatResponse> for crate::messages::ChatResponse {
    fn from(response: pb::SimpleChatResponse) -> Self {
        Self {
            content: response.content,
            model: response.model,
            input_tokens: non_negative_u64(response.input_tokens),
            output_tokens: non_negative_u64(response.output_tokens),
            cost_usd: response.cost_usd.max(0.0),
            latency_ms: non_negative_u64(response.latency_ms),
            stop_reason: response.stop_reason,
        }
    }
}

fn clamp_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn non_negative_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn non_negative_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Role;

    #[test]
    fn start_command_carries_parameters_and_seed_messages() {
        let request = ChatRequest::new("sonnet")
            .with_system_prompt("be brief")
            .with_max_tokens(256)
            .with_temperature(0.3)
            .with_message(ChatMessage::user("Hi"))
            .with_message(ChatMessage::assistant("Hello"));

        let wire: pb::ChatRequest = ChatCommand::Start(StartChat::from_request("key", &request)).into();
        let Some(pb::chat_request::Request::Start(start)) = wire.request else {
            panic!("expected start envelope");
        };

        assert_eq!(start.api_key, "key");
        assert_eq!(start.system_prompt, "be brief");
        assert_eq!(start.model, "sonnet");
        assert_eq!(start.max_tokens, 256);
        assert_eq!(start.messages.len(), 2);
        assert_eq!(start.messages[0].role, "user");
        assert_eq!(start.messages[1].role, "assistant");
        assert_eq!(start.messages[1].content, "Hello");
    }

    #[test]
    fn empty_envelope_is_dropped() {
        assert!(ChatEvent::from_pb(pb::ChatResponse { response: None }).is_none());
    }

    #[test]
    fn completion_clamps_negative_counters() {
        let wire = pb::ChatResponse {
            response: Some(pb::chat_response::Response::Completion(
                pb::CompletionResponse {
                    full_content: "ok".to_string(),
                    stop_reason: "end_turn".to_string(),
                    input_tokens: -1,
                    output_tokens: 7,
                    cost_usd: 0.5,
                    latency_ms: 40,
                },
            )),
        };

        let event = ChatEvent::from_pb(wire).unwrap();
        assert!(event.is_terminal());
        let ChatEvent::Completion(done) = event else {
            panic!("expected completion");
        };
        assert_eq!(done.input_tokens, 0);
        assert_eq!(done.output_tokens, 7);
    }

    #[test]
    fn simple_request_preserves_message_order() {
        let request = ChatRequest::new("haiku")
            .with_message(ChatMessage::system("rules"))
            .with_message(ChatMessage::user("one"))
            .with_message(ChatMessage::user("two"));

        let wire = pb::SimpleChatRequest::from_request("key", &request);
        let contents: Vec<_> = wire.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["rules", "one", "two"]);
        assert_eq!(wire.messages[0].role, Role::System.as_str());
        assert!(wire.system_prompt.is_empty());
    }
}
