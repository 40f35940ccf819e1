//! Streaming chat session tests against a scripted backend.

use std::sync::Arc;

use anyhow::anyhow;
use levee::llm::SessionError;
use levee::protocol::{ChatCommand, StreamChunk};
use levee::{ChatMessage, ChatRequest};

mod common;
use common::{
    CountingConnector, ScriptedBackend, Step, TEST_API_KEY, backend_error, chunk, completion,
    scripted_client,
};

fn request() -> ChatRequest {
    ChatRequest::new("sonnet")
        .with_max_tokens(1024)
        .with_temperature(0.7)
}

#[tokio::test]
async fn start_envelope_is_sent_once_per_session() {
    let backend = ScriptedBackend::with_turns(vec![
        vec![completion("first")],
        vec![completion("second")],
    ]);
    let (client, _) = scripted_client(backend.clone());

    let session = client
        .new_session(
            &request()
                .with_system_prompt("be brief")
                .with_message(ChatMessage::user("context")),
        )
        .await
        .unwrap();

    assert_eq!(session.send("one").await.unwrap().content, "first");
    assert_eq!(session.send("two").await.unwrap().content, "second");

    assert_eq!(backend.start_count(), 1);
    let start = backend.starts.lock().unwrap()[0].clone();
    assert_eq!(start.api_key, TEST_API_KEY);
    assert_eq!(start.model, "sonnet");
    assert_eq!(start.max_tokens, 1024);
    assert_eq!(start.system_prompt.as_deref(), Some("be brief"));
    assert_eq!(start.messages, vec![ChatMessage::user("context")]);

    assert_eq!(
        backend.recorded_commands(),
        vec![
            ChatCommand::Message {
                content: "one".to_string()
            },
            ChatCommand::Message {
                content: "two".to_string()
            },
        ]
    );
}

#[tokio::test]
async fn chunks_reach_callback_in_order_before_completion() {
    let backend = ScriptedBackend::with_turns(vec![vec![
        chunk("Hel", 0),
        chunk("lo", 1),
        completion("Hello"),
    ]]);
    let (client, _) = scripted_client(backend);
    let session = client.new_session(&request()).await.unwrap();

    let mut seen: Vec<StreamChunk> = Vec::new();
    let response = session
        .send_with("Hi", |chunk| {
            seen.push(chunk);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].content, "Hel");
    assert_eq!(seen[0].index, 0);
    assert_eq!(seen[1].content, "lo");
    assert_eq!(seen[1].index, 1);

    assert_eq!(response.content, "Hello");
    assert_eq!(response.stop_reason, "end_turn");
    assert_eq!(response.input_tokens, 12);
    assert_eq!(response.output_tokens, 7);
}

#[tokio::test]
async fn end_of_stream_returns_accumulated_text() {
    let backend = ScriptedBackend::with_turns(vec![vec![
        chunk("par", 0),
        chunk("tial", 1),
        Step::End,
    ]]);
    let (client, _) = scripted_client(backend);
    let session = client.new_session(&request()).await.unwrap();

    let response = session.send("Hi").await.unwrap();
    assert_eq!(response.content, "partial");
    assert_eq!(response.input_tokens, 0);
    assert_eq!(response.output_tokens, 0);
    assert!(response.stop_reason.is_empty());

    let err = session.send("again").await.unwrap_err();
    assert!(matches!(err, SessionError::Send(_)), "got {err:?}");
}

#[tokio::test]
async fn backend_error_event_carries_code_and_message() {
    let backend = ScriptedBackend::with_turns(vec![vec![
        chunk("ignored", 0),
        backend_error("rate_limited", "slow down", true),
    ]]);
    let (client, _) = scripted_client(backend);
    let session = client.new_session(&request()).await.unwrap();

    match session.send("Hi").await {
        Err(SessionError::Backend {
            code,
            message,
            retryable,
        }) => {
            assert_eq!(code, "rate_limited");
            assert_eq!(message, "slow down");
            assert!(retryable);
        }
        other => panic!("expected backend error, got {other:?}"),
    }
}

#[tokio::test]
async fn transport_failure_surfaces_as_stream_error() {
    let backend = ScriptedBackend::with_turns(vec![vec![Step::Fail(tonic::Status::unavailable(
        "gateway went away",
    ))]]);
    let (client, _) = scripted_client(backend);
    let session = client.new_session(&request()).await.unwrap();

    let err = session.send("Hi").await.unwrap_err();
    match err {
        SessionError::Stream(status) => assert_eq!(status.message(), "gateway went away"),
        other => panic!("expected stream error, got {other:?}"),
    }
}

#[tokio::test]
async fn abort_ends_the_turn_in_flight() {
    // No completion: the turn stays open until the abort lands.
    let backend = ScriptedBackend::with_turns(vec![vec![chunk("thinking", 0)]]);
    let (client, _) = scripted_client(backend.clone());
    let session = Arc::new(client.new_session(&request()).await.unwrap());

    let (first_chunk_tx, mut first_chunk_rx) = tokio::sync::mpsc::unbounded_channel();
    let turn = tokio::spawn({
        let session = session.clone();
        async move {
            session
                .send_with("write a novel", move |chunk| {
                    let _ = first_chunk_tx.send(chunk.content);
                    Ok(())
                })
                .await
        }
    });

    assert_eq!(first_chunk_rx.recv().await.as_deref(), Some("thinking"));
    session.abort("user cancelled").await.unwrap();

    match turn.await.unwrap() {
        Err(SessionError::Aborted { reason }) => assert_eq!(reason, "user cancelled"),
        other => panic!("expected aborted, got {other:?}"),
    }
    assert!(backend.recorded_commands().contains(&ChatCommand::Abort {
        reason: "user cancelled".to_string()
    }));
}

#[tokio::test]
async fn callback_error_ends_the_turn() {
    let backend = ScriptedBackend::with_turns(vec![vec![chunk("a", 0), completion("a")]]);
    let (client, _) = scripted_client(backend);
    let session = client.new_session(&request()).await.unwrap();

    let err = session
        .send_with("Hi", |_| Err(anyhow!("display closed")))
        .await
        .unwrap_err();
    match err {
        SessionError::Callback(e) => assert_eq!(e.to_string(), "display closed"),
        other => panic!("expected callback error, got {other:?}"),
    }
}

#[tokio::test]
async fn closed_session_rejects_without_io() {
    let backend = ScriptedBackend::new();
    let (client, _) = scripted_client(backend.clone());
    let session = client.new_session(&request()).await.unwrap();

    session.close().await.unwrap();
    session.close().await.unwrap();
    assert!(session.is_closed());

    let err = session.send("Hi").await.unwrap_err();
    assert!(err.is_closed());
    assert!(session.abort("stop").await.unwrap_err().is_closed());

    assert!(backend.recorded_commands().is_empty());
}

#[tokio::test]
async fn concurrent_sends_are_serialized() {
    let backend = ScriptedBackend::with_turns(vec![
        vec![chunk("o", 0), chunk("ne", 1), completion("one")],
        vec![chunk("tw", 0), chunk("o", 1), completion("two")],
    ]);
    let (client, _) = scripted_client(backend.clone());
    let session = Arc::new(client.new_session(&request()).await.unwrap());

    let a = tokio::spawn({
        let session = session.clone();
        async move { session.send("a").await }
    });
    let b = tokio::spawn({
        let session = session.clone();
        async move { session.send("b").await }
    });

    let mut replies = vec![
        a.await.unwrap().unwrap().content,
        b.await.unwrap().unwrap().content,
    ];
    replies.sort();
    assert_eq!(replies, vec!["one".to_string(), "two".to_string()]);
    assert_eq!(backend.recorded_commands().len(), 2);
}

#[tokio::test]
async fn session_open_fails_when_connect_fails() {
    let client = levee::llm::LlmClient::new(TEST_API_KEY, "http://127.0.0.1:1")
        .with_grpc_address("127.0.0.1:1")
        .with_connector(CountingConnector::failing());

    let err = client.new_session(&request()).await.unwrap_err();
    assert!(matches!(err, SessionError::Connect(_)), "got {err:?}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn chat_stream_validates_before_connecting() {
    let backend = ScriptedBackend::new();
    let (client, connector) = scripted_client(backend.clone());

    let err = client.chat_stream(&request(), |_| Ok(())).await.unwrap_err();
    assert!(matches!(err, SessionError::EmptyConversation));

    let err = client
        .chat_stream(
            &request()
                .with_message(ChatMessage::user("Hi"))
                .with_message(ChatMessage::assistant("Hello")),
            |_| Ok(()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::LastMessageNotUser));

    assert_eq!(connector.connect_count(), 0);
    assert_eq!(backend.start_count(), 0);
}

#[tokio::test]
async fn chat_stream_sends_last_user_message() {
    let backend = ScriptedBackend::with_turns(vec![vec![
        chunk("Hi ", 0),
        chunk("there", 1),
        completion("Hi there"),
    ]]);
    let (client, _) = scripted_client(backend.clone());

    let history = request()
        .with_message(ChatMessage::user("earlier"))
        .with_message(ChatMessage::assistant("reply"))
        .with_message(ChatMessage::user("Hi"));

    let mut streamed = String::new();
    let response = client
        .chat_stream(&history, |chunk| {
            streamed.push_str(&chunk.content);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(streamed, "Hi there");
    assert_eq!(response.content, "Hi there");

    let start = backend.starts.lock().unwrap()[0].clone();
    assert!(start.messages.is_empty());
    assert_eq!(start.model, "sonnet");
    assert_eq!(
        backend.recorded_commands(),
        vec![ChatCommand::Message {
            content: "Hi".to_string()
        }]
    );
}

#[tokio::test]
async fn turn_after_callback_failure_gets_its_own_reply() {
    let backend = ScriptedBackend::with_turns(vec![
        vec![chunk("a", 0), completion("first answer")],
        vec![chunk("b", 0), completion("second answer")],
    ]);
    let (client, _) = scripted_client(backend);
    let session = client.new_session(&request()).await.unwrap();

    let err = session
        .send_with("one", |_| Err(anyhow!("display closed")))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Callback(_)), "got {err:?}");

    let mut seen = Vec::new();
    let response = session
        .send_with("two", |chunk| {
            seen.push(chunk.content);
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(response.content, "second answer");
    assert_eq!(seen, vec!["b".to_string()]);
}

#[tokio::test]
async fn events_after_completion_do_not_leak_into_next_turn() {
    let backend = ScriptedBackend::with_turns(vec![
        vec![chunk("a", 0), completion("a"), chunk("trailing", 1)],
        vec![chunk("b", 0), completion("b")],
    ]);
    let (client, _) = scripted_client(backend);
    let session = client.new_session(&request()).await.unwrap();

    assert_eq!(session.send("one").await.unwrap().content, "a");

    let mut seen = Vec::new();
    let response = session
        .send_with("two", |chunk| {
            seen.push(chunk.content);
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(response.content, "b");
    assert_eq!(seen, vec!["b".to_string()]);
}

#[tokio::test]
async fn abort_while_idle_leaves_next_turn_intact() {
    let backend = ScriptedBackend::with_turns(vec![vec![completion("fine")]]);
    let (client, _) = scripted_client(backend.clone());
    let session = client.new_session(&request()).await.unwrap();

    session.abort("nothing running").await.unwrap();
    assert_eq!(session.send("Hi").await.unwrap().content, "fine");

    assert_eq!(
        backend.recorded_commands(),
        vec![ChatCommand::Message {
            content: "Hi".to_string()
        }]
    );
}

#[tokio::test]
async fn abort_stops_a_turn_abandoned_by_its_caller() {
    // First turn never completes on its own.
    let backend = ScriptedBackend::with_turns(vec![
        vec![chunk("a", 0)],
        vec![completion("second answer")],
    ]);
    let (client, _) = scripted_client(backend.clone());
    let session = client.new_session(&request()).await.unwrap();

    let err = session
        .send_with("one", |_| Err(anyhow!("stop reading")))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Callback(_)));

    session.abort("caller gave up").await.unwrap();
    assert_eq!(session.send("two").await.unwrap().content, "second answer");

    assert!(backend.recorded_commands().contains(&ChatCommand::Abort {
        reason: "caller gave up".to_string()
    }));
}
