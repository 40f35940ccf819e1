//! Bidirectional chat session.

use std::sync::atomic::{AtomicBool, Ordering};

use futures::stream::Fuse;
use futures::{FutureExt, StreamExt};
use tokio::sync::{Mutex, RwLock, mpsc};

use levee_protocol::{ChatCommand, ChatEvent, ChatResponse, StreamChunk};

use super::error::{SessionError, SessionResult};
use super::{ChatStream, EventStream};

/// Read side of the stream plus the bookkeeping that keeps turns apart.
struct TurnState {
    events: Fuse<EventStream>,
    /// Messages sent whose terminal event has not been read yet. Non-zero
    /// after a turn returned early (callback failure, cancelled `send`).
    open_turns: usize,
}

impl TurnState {
    /// Consume what earlier turns left behind so the next turn starts clean.
    ///
    /// Waits for the terminal event of every open turn, then drops whatever
    /// else is already queued (trailing chunks, late acknowledgements).
    async fn settle(&mut self) {
        while self.open_turns > 0 {
            match self.events.next().await {
                Some(Ok(event)) if event.is_terminal() => self.open_turns -= 1,
                Some(Ok(event)) => {
                    tracing::debug!(?event, "Discarding event of an unfinished turn");
                }
                Some(Err(_)) | None => self.open_turns = 0,
            }
        }
        self.discard_ready();
    }

    fn finish(&mut self) {
        self.open_turns = self.open_turns.saturating_sub(1);
        self.discard_ready();
    }

    fn discard_ready(&mut self) {
        while let Some(Some(item)) = self.events.next().now_or_never() {
            tracing::debug!(?item, "Discarding event received after turn end");
        }
    }
}

/// A multi-turn conversation over one backend stream.
///
/// The start envelope has already been sent when a session exists. Turns are
/// serialized: a second [`send`](Self::send) waits until the first resolves.
/// Open separate sessions for concurrent conversations.
///
/// Each turn only sees its own events. A turn that returned before its
/// terminal event is drained by the next `send` before that one transmits.
pub struct ChatSession {
    /// `None` once closed; dropping the sender closes the stream's send side.
    commands: RwLock<Option<mpsc::Sender<ChatCommand>>>,
    /// Turn lock. Only the turn holding it reads the stream.
    turn: Mutex<TurnState>,
    closed: AtomicBool,
}

impl ChatSession {
    pub(crate) fn new(stream: ChatStream) -> Self {
        Self {
            commands: RwLock::new(Some(stream.commands)),
            turn: Mutex::new(TurnState {
                events: stream.events.fuse(),
                open_turns: 0,
            }),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Send a user message and wait for the turn to finish.
    pub async fn send(&self, content: impl Into<String>) -> SessionResult<ChatResponse> {
        self.send_with(content, |_| Ok(())).await
    }

    /// Send a user message, calling `on_chunk` for every streamed chunk.
    ///
    /// Returns the completion's content and usage. If the backend ends the
    /// stream without a completion, the accumulated chunk text is returned with
    /// zeroed metadata. An error from `on_chunk` ends the turn and is returned.
    pub async fn send_with<F>(
        &self,
        content: impl Into<String>,
        mut on_chunk: F,
    ) -> SessionResult<ChatResponse>
    where
        F: FnMut(StreamChunk) -> anyhow::Result<()> + Send,
    {
        let mut turn = self.turn.lock().await;
        if self.is_closed() {
            return Err(SessionError::Closed);
        }

        turn.settle().await;
        self.command(
            ChatCommand::Message {
                content: content.into(),
            },
            "message",
        )
        .await?;
        turn.open_turns += 1;

        let mut full_content = String::new();
        loop {
            let Some(item) = turn.events.next().await else {
                break;
            };
            let event = match item {
                Ok(event) => event,
                Err(status) => {
                    turn.open_turns = 0;
                    return Err(SessionError::Stream(status));
                }
            };
            match event {
                ChatEvent::SessionStarted { session_id, .. } => {
                    tracing::debug!(%session_id, "Chat session started");
                }
                ChatEvent::Chunk(chunk) => {
                    full_content.push_str(&chunk.content);
                    // The turn stays open; the next send drains it.
                    on_chunk(chunk).map_err(SessionError::Callback)?;
                }
                ChatEvent::ToolCall { name, .. } => {
                    tracing::debug!(tool = %name, "Ignoring tool call on plain chat session");
                }
                ChatEvent::Completion(completion) => {
                    turn.finish();
                    return Ok(completion.into());
                }
                ChatEvent::Error {
                    code,
                    message,
                    retryable,
                } => {
                    turn.finish();
                    return Err(SessionError::Backend {
                        code,
                        message,
                        retryable,
                    });
                }
                ChatEvent::Aborted { reason } => {
                    turn.finish();
                    return Err(SessionError::Aborted { reason });
                }
            }
        }

        turn.open_turns = 0;
        Ok(ChatResponse {
            content: full_content,
            ..Default::default()
        })
    }

    /// Ask the backend to stop the current generation.
    ///
    /// Does not wait for the turn lock: an in-flight [`send`](Self::send)
    /// observes the resulting `aborted` event and returns it as its error.
    /// With no generation running nothing is sent.
    pub async fn abort(&self, reason: impl Into<String>) -> SessionResult<()> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        let idle = self
            .turn
            .try_lock()
            .is_ok_and(|turn| turn.open_turns == 0);
        if idle {
            tracing::debug!("No turn in flight, abort not sent");
            return Ok(());
        }
        self.command(
            ChatCommand::Abort {
                reason: reason.into(),
            },
            "abort",
        )
        .await
    }

    /// Close the session. Idempotent.
    pub async fn close(&self) -> SessionResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.commands.write().await.take();
        Ok(())
    }

    async fn command(&self, command: ChatCommand, what: &'static str) -> SessionResult<()> {
        let sender = self
            .commands
            .read()
            .await
            .clone()
            .ok_or(SessionError::Closed)?;
        sender
            .send(command)
            .await
            .map_err(|_| SessionError::Send(what))
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
