//! Levee protocol types.
//!
//! Four modules share one vocabulary:
//! - [`messages`]: chat message model used by every API.
//! - [`pb`]: gRPC wire messages and client for `llm.LLMService`.
//! - [`events`]: closed command/event enums for bidirectional chat streams.
//! - [`relay`]: JSON frames spoken by the browser-facing WebSocket relay.

pub mod events;
pub mod messages;
pub mod pb;
pub mod relay;

pub use events::{ChatCommand, ChatEvent, StartChat};
pub use messages::{ChatMessage, ChatRequest, ChatResponse, Completion, Role, StreamChunk};
