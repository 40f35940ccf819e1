//! Browser-facing WebSocket relay for LLM chat.
//!
//! Each accepted socket gets a [`RelaySession`] that translates the JSON
//! frame protocol in [`levee_protocol::relay`] into backend stream commands and
//! forwards every backend event back to the browser.

mod handler;
mod relay;

pub use handler::{DEFAULT_ROUTE, RelayConfig, RelayState, chat_ws_handler, router};
pub use relay::RelaySession;
