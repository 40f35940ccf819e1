//! Test utilities: a scripted in-process LLM backend.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use levee::llm::{ChatStream, ConnectError, Connector, GrpcTarget, LlmBackend, LlmClient};
use levee::protocol::pb;
use levee::protocol::{ChatCommand, ChatEvent, Completion, StartChat, StreamChunk};

pub const TEST_API_KEY: &str = "lv_test_key";
pub const TEST_ADDRESS: &str = "127.0.0.1:50051";

/// One scripted backend reaction.
#[derive(Debug, Clone)]
pub enum Step {
    Event(ChatEvent),
    Fail(tonic::Status),
    /// Close the event stream.
    End,
}

pub fn chunk(content: &str, index: u32) -> Step {
    Step::Event(ChatEvent::Chunk(StreamChunk {
        content: content.to_string(),
        index,
    }))
}

pub fn completion(full_content: &str) -> Step {
    Step::Event(ChatEvent::Completion(Completion {
        full_content: full_content.to_string(),
        stop_reason: "end_turn".to_string(),
        input_tokens: 12,
        output_tokens: 7,
        cost_usd: 0.0004,
        latency_ms: 250,
    }))
}

pub fn backend_error(code: &str, message: &str, retryable: bool) -> Step {
    Step::Event(ChatEvent::Error {
        code: code.to_string(),
        message: message.to_string(),
        retryable,
    })
}

/// Backend that answers each user message with the next scripted turn.
///
/// Every opened stream emits `session_started` first. `abort` is answered with
/// an `aborted` event. Turns are shared across streams in FIFO order.
#[derive(Default)]
pub struct ScriptedBackend {
    turns: Arc<Mutex<VecDeque<Vec<Step>>>>,
    pub starts: Mutex<Vec<StartChat>>,
    pub commands: Arc<Mutex<Vec<ChatCommand>>>,
    pub simple_requests: Mutex<Vec<pb::SimpleChatRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_turns(turns: Vec<Vec<Step>>) -> Arc<Self> {
        let backend = Self::default();
        *backend.turns.lock().unwrap() = turns.into();
        Arc::new(backend)
    }

    pub fn push_turn(&self, steps: Vec<Step>) {
        self.turns.lock().unwrap().push_back(steps);
    }

    pub fn start_count(&self) -> usize {
        self.starts.lock().unwrap().len()
    }

    pub fn recorded_commands(&self) -> Vec<ChatCommand> {
        self.commands.lock().unwrap().clone()
    }
}

/// Unscripted messages get an empty completion.
fn next_turn(turns: &Mutex<VecDeque<Vec<Step>>>) -> Vec<Step> {
    turns
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| vec![completion("")])
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn simple_chat(
        &self,
        request: pb::SimpleChatRequest,
    ) -> Result<pb::SimpleChatResponse, tonic::Status> {
        let model = request.model.clone();
        self.simple_requests.lock().unwrap().push(request);
        Ok(pb::SimpleChatResponse {
            content: "Hello! How can I help you today?".to_string(),
            model,
            input_tokens: 9,
            output_tokens: 11,
            cost_usd: 0.0002,
            latency_ms: 180,
            stop_reason: "end_turn".to_string(),
        })
    }

    async fn open_chat(&self, start: StartChat) -> Result<ChatStream, tonic::Status> {
        let session_number = {
            let mut starts = self.starts.lock().unwrap();
            starts.push(start.clone());
            starts.len()
        };

        let (commands, mut command_rx) = mpsc::channel::<ChatCommand>(32);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let _ = event_tx.send(Ok(ChatEvent::SessionStarted {
            session_id: format!("sess-{session_number}"),
            provider: "anthropic".to_string(),
            model: start.model,
        }));

        let recorded = self.commands.clone();
        let turns = self.turns.clone();

        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                recorded.lock().unwrap().push(command.clone());
                match command {
                    ChatCommand::Message { .. } => {
                        for step in next_turn(&turns) {
                            match step {
                                Step::Event(event) => {
                                    let _ = event_tx.send(Ok(event));
                                }
                                Step::Fail(status) => {
                                    let _ = event_tx.send(Err(status));
                                }
                                Step::End => return,
                            }
                        }
                    }
                    ChatCommand::Abort { reason } => {
                        let _ = event_tx.send(Ok(ChatEvent::Aborted { reason }));
                    }
                    ChatCommand::Start(_) | ChatCommand::ToolResult { .. } => {}
                }
            }
        });

        Ok(ChatStream {
            commands,
            events: Box::pin(UnboundedReceiverStream::new(event_rx)),
        })
    }
}

/// Connector handing out one shared backend, counting connection attempts.
pub struct CountingConnector {
    backend: Arc<ScriptedBackend>,
    delay: Duration,
    fail: bool,
    connects: AtomicUsize,
    pub targets: Mutex<Vec<GrpcTarget>>,
}

impl CountingConnector {
    pub fn new(backend: Arc<ScriptedBackend>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            delay: Duration::from_millis(20),
            fail: false,
            connects: AtomicUsize::new(0),
            targets: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            backend: ScriptedBackend::new(),
            delay: Duration::ZERO,
            fail: true,
            connects: AtomicUsize::new(0),
            targets: Mutex::new(Vec::new()),
        })
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for CountingConnector {
    async fn connect(&self, target: &GrpcTarget) -> Result<Arc<dyn LlmBackend>, ConnectError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.targets.lock().unwrap().push(target.clone());
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(ConnectError::ConnectionFailed {
                address: target.address.clone(),
                message: "connection refused".to_string(),
            });
        }
        Ok(self.backend.clone())
    }
}

/// Client wired to `backend` with a fixed address, so no discovery happens.
pub fn scripted_client(backend: Arc<ScriptedBackend>) -> (LlmClient, Arc<CountingConnector>) {
    let connector = CountingConnector::new(backend);
    let client = LlmClient::new(TEST_API_KEY, "http://127.0.0.1:1")
        .with_grpc_address(TEST_ADDRESS)
        .with_connector(connector.clone());
    (client, connector)
}
