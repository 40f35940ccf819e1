//! Levee SDK: LLM chat client and WebSocket chat relay.

pub mod llm;
pub mod ws;

pub use levee_protocol as protocol;
pub use levee_protocol::{ChatMessage, ChatRequest, ChatResponse, Role, StreamChunk};
