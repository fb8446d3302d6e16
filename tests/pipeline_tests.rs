// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use txing::channel::{Channel, ChannelSelector, InMemoryChannelStore};
use txing::chat::connection::CollectingSink;
use txing::chat::pipeline::{DEFAULT_RESP_MESSAGE, GENERIC_FAILURE_MESSAGE};
use txing::chat::{handle_chat, ChatDispatcher, PipelineOptions, TurnStatus};
use txing::llm::mock_provider::{MockFactory, MockFailure, MockRequester, MockStep};
use txing::llm::retry::RetryConfig;
use txing::llm::{AdapterRegistry, ChatConfig, Message};

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        base_delay_ms: 1,
        max_delay_ms: 2,
        jitter: 0.0,
    }
}

fn dispatcher(channels: Vec<Channel>, requester: MockRequester) -> Arc<ChatDispatcher> {
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(MockFactory::new("mock").with_requester(requester)));
    Arc::new(ChatDispatcher::new(
        ChannelSelector::new(Arc::new(InMemoryChannelStore::new(channels))),
        Arc::new(registry),
        fast_retry(),
    ))
}

fn mock_channel() -> Channel {
    Channel::new(1, "mock").with_models(["deepseek-v3"]).with_secret("k")
}

fn config() -> ChatConfig {
    ChatConfig::new("deepseek-v3", vec![Message::user("hello")])
}

// ===== End-to-End Turn Tests =====

#[tokio::test]
async fn test_two_partials_then_terminal() {
    let requester = MockRequester::replying(["He", "llo"]);
    let dispatcher = dispatcher(vec![mock_channel()], requester.clone());
    let sink = CollectingSink::new();

    let outcome = handle_chat(
        dispatcher,
        &PipelineOptions::default(),
        12,
        config(),
        CancellationToken::new(),
        &sink,
    )
    .await;

    let sent = sink.messages();
    assert_eq!(sent.len(), 3);
    assert_eq!((sent[0].content.as_str(), sent[0].end), ("He", false));
    assert_eq!((sent[1].content.as_str(), sent[1].end), ("llo", false));
    assert!(sent[2].end);
    assert!(sent[2].content.is_empty());
    assert!(sent.iter().all(|m| m.conversation_id == 12));

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.content, "Hello");
    assert_eq!(requester.call_count(), 1);
}

#[tokio::test]
async fn test_reasoning_is_relayed_separately() {
    let requester = MockRequester::new().then(vec![
        MockStep::reasoning("let me think"),
        MockStep::content("42"),
    ]);
    let sink = CollectingSink::new();

    let outcome = handle_chat(
        dispatcher(vec![mock_channel()], requester),
        &PipelineOptions::default(),
        1,
        config(),
        CancellationToken::new(),
        &sink,
    )
    .await;

    let sent = sink.messages();
    assert_eq!(sent[0].reasoning_content, "let me think");
    assert!(sent[0].content.is_empty());
    assert_eq!(sent[1].content, "42");
    assert_eq!(outcome.reasoning_content, "let me think");
    assert_eq!(outcome.content, "42");
}

#[tokio::test]
async fn test_empty_reply_gets_fallback_text() {
    let requester = MockRequester::new().then(vec![]);
    let sink = CollectingSink::new();

    let outcome = handle_chat(
        dispatcher(vec![mock_channel()], requester),
        &PipelineOptions::default(),
        1,
        config(),
        CancellationToken::new(),
        &sink,
    )
    .await;

    let sent = sink.messages();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].end);
    assert_eq!(sent[0].content, DEFAULT_RESP_MESSAGE);
    assert_eq!(outcome.status, TurnStatus::Completed);
}

// ===== Failure Tests =====

#[tokio::test]
async fn test_unknown_model_fails_with_generic_text() {
    let sink = CollectingSink::new();
    let outcome = handle_chat(
        dispatcher(vec![mock_channel()], MockRequester::replying(["x"])),
        &PipelineOptions::default(),
        1,
        ChatConfig::new("no-such-model", vec![Message::user("hi")]),
        CancellationToken::new(),
        &sink,
    )
    .await;

    let sent = sink.messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].content, GENERIC_FAILURE_MESSAGE);
    assert_eq!(outcome.status, TurnStatus::Failed);
    assert!(!outcome.should_persist());
}

#[tokio::test]
async fn test_retry_before_first_chunk_recovers() {
    let requester = MockRequester::new()
        .then(vec![MockStep::Fail(MockFailure::server(503, "busy"))])
        .then(vec![MockStep::content("ok")]);
    let channel = mock_channel().with_retry(2);
    let sink = CollectingSink::new();

    let outcome = handle_chat(
        dispatcher(vec![channel], requester.clone()),
        &PipelineOptions::default(),
        1,
        config(),
        CancellationToken::new(),
        &sink,
    )
    .await;

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.content, "ok");
    assert_eq!(requester.call_count(), 2);
    assert_eq!(sink.messages().len(), 2);
}

#[tokio::test]
async fn test_no_retry_after_partial_output() {
    let requester = MockRequester::new()
        .then(vec![
            MockStep::content("half"),
            MockStep::Fail(MockFailure::Stream("reset".to_string())),
        ])
        .then(vec![MockStep::content("should not be sent")]);
    let channel = mock_channel().with_retry(3);
    let sink = CollectingSink::new();

    let outcome = handle_chat(
        dispatcher(vec![channel], requester.clone()),
        &PipelineOptions::default(),
        1,
        config(),
        CancellationToken::new(),
        &sink,
    )
    .await;

    assert_eq!(outcome.status, TurnStatus::Failed);
    assert_eq!(requester.call_count(), 1);
    let sent = sink.messages();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].content, "half");
    assert_eq!(sent[1].content, GENERIC_FAILURE_MESSAGE);
}

#[tokio::test]
async fn test_client_gone_sends_no_terminal() {
    let requester = MockRequester::replying(["a", "b", "c", "d"]);
    let sink = CollectingSink::failing_after(1);

    let outcome = handle_chat(
        dispatcher(vec![mock_channel()], requester),
        &PipelineOptions::default(),
        1,
        config(),
        CancellationToken::new(),
        &sink,
    )
    .await;

    assert_eq!(outcome.status, TurnStatus::ClientGone);
    let sent = sink.messages();
    assert_eq!(sent.len(), 1);
    assert!(!sent[0].end);
}

// ===== Cancellation Tests =====

#[tokio::test]
async fn test_stop_mid_stream_ends_with_bare_terminal() {
    let requester = MockRequester::new().then(vec![MockStep::content("partial"), MockStep::WaitForCancel]);
    let sink = CollectingSink::new();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    let options = PipelineOptions::default();
    let turn = handle_chat(
        dispatcher(vec![mock_channel()], requester),
        &options,
        1,
        config(),
        cancel,
        &sink,
    );
    let stopper = async move {
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        trigger.cancel();
    };
    let (outcome, ()) = tokio::join!(turn, stopper);

    assert_eq!(outcome.status, TurnStatus::Cancelled);
    assert!(outcome.should_persist());
    let last = sink.messages().pop().unwrap();
    assert!(last.end);
    assert!(last.content.is_empty());
}
