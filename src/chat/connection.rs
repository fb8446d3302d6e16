// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! One client connection
//!
//! A reader task pulls requests off the transport. `stop` cancels the running
//! turn right away and `ping` is dropped; chat requests go through a bounded
//! [`InboundQueue`] to the handler, which runs one turn at a time.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::chat::conversation::{extract_conversation, Conversation, ConversationStore, NEW_CONVERSATION_ID};
use crate::chat::dispatch::ChatDispatcher;
use crate::chat::pipeline::{handle_chat, PipelineOptions, TurnOutcome, TurnStatus};
use crate::chat::wire::{MessageKind, WsMessageRequest, WsMessageResponse};
use crate::config::{ConcurrentTurnPolicy, GatewayConfig};
use crate::error::{Result, TxingError};

/// Reply to a chat request that arrives while another turn is running
pub const BUSY_MESSAGE: &str = "a reply is already in progress";

fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!(target: "txing.chat.connection", "connection lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Inbound half of a transport
#[async_trait]
pub trait MessageSource: Send {
    /// Next request, or `None` once the client is done.
    async fn recv(&mut self) -> Result<Option<WsMessageRequest>>;
}

/// Outbound half of a transport
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, message: WsMessageResponse) -> Result<()>;
}

/// Source fed from an in-process channel
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<WsMessageRequest>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<WsMessageRequest>) -> Self {
        Self { rx }
    }

    /// A connected sender and source
    pub fn pair(capacity: usize) -> (mpsc::Sender<WsMessageRequest>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn recv(&mut self) -> Result<Option<WsMessageRequest>> {
        Ok(self.rx.recv().await)
    }
}

/// Sink that forwards into an in-process channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<WsMessageResponse>,
}

impl ChannelSink {
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<WsMessageResponse>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn send(&self, message: WsMessageResponse) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| TxingError::Delivery("client receiver dropped".to_string()))
    }
}

/// Sink that keeps everything it is sent
#[derive(Debug, Default)]
pub struct CollectingSink {
    messages: Mutex<Vec<WsMessageResponse>>,
    fail_after: Option<usize>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `n` messages, then fail as a disconnected client would.
    pub fn failing_after(n: usize) -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fail_after: Some(n),
        }
    }

    pub fn messages(&self) -> Vec<WsMessageResponse> {
        lock(&self.messages).clone()
    }
}

#[async_trait]
impl MessageSink for CollectingSink {
    async fn send(&self, message: WsMessageResponse) -> Result<()> {
        let mut messages = lock(&self.messages);
        if self.fail_after.is_some_and(|limit| messages.len() >= limit) {
            return Err(TxingError::Delivery("connection closed".to_string()));
        }
        messages.push(message);
        Ok(())
    }
}

/// Bounded request queue that drops the oldest entry when full
#[derive(Debug)]
pub struct InboundQueue {
    items: Mutex<VecDeque<WsMessageRequest>>,
    capacity: usize,
    closed: AtomicBool,
    notify: Notify,
}

impl InboundQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Enqueue `message`, returning the entry evicted to make room.
    pub fn push(&self, message: WsMessageRequest) -> Option<WsMessageRequest> {
        let dropped = {
            let mut items = lock(&self.items);
            let dropped = if items.len() >= self.capacity {
                items.pop_front()
            } else {
                None
            };
            items.push_back(message);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    /// No more pushes; `pop` drains what is left and then returns `None`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn pop(&self) -> Option<WsMessageRequest> {
        loop {
            {
                let mut items = lock(&self.items);
                if let Some(message) = items.pop_front() {
                    return Some(message);
                }
                if self.is_closed() {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Next message along with a started turn token. Both happen under the
    /// queue lock, so a message is always either queued or running.
    async fn pop_turn(&self, control: &TurnControl) -> Option<(WsMessageRequest, CancellationToken)> {
        loop {
            {
                let mut items = lock(&self.items);
                if let Some(message) = items.pop_front() {
                    return Some((message, control.begin()));
                }
                if self.is_closed() {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// A turn is running or waiting
    fn is_busy(&self, control: &TurnControl) -> bool {
        let items = lock(&self.items);
        !items.is_empty() || control.is_busy()
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared view of the running turn
#[derive(Debug)]
struct TurnControl {
    current: Mutex<Option<CancellationToken>>,
    conversation_id: AtomicI64,
}

impl TurnControl {
    fn new(conversation_id: i64) -> Self {
        Self {
            current: Mutex::new(None),
            conversation_id: AtomicI64::new(conversation_id),
        }
    }

    fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *lock(&self.current) = Some(token.clone());
        token
    }

    fn finish(&self) {
        *lock(&self.current) = None;
    }

    /// Cancel the running turn. False when nothing is running.
    fn stop(&self) -> bool {
        match lock(&self.current).as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn is_busy(&self) -> bool {
        lock(&self.current).is_some()
    }

    fn conversation_id(&self) -> i64 {
        self.conversation_id.load(Ordering::SeqCst)
    }

    fn set_conversation_id(&self, id: i64) {
        self.conversation_id.store(id, Ordering::SeqCst);
    }
}

async fn read_loop<S: MessageSource>(
    mut source: S,
    queue: Arc<InboundQueue>,
    control: Arc<TurnControl>,
    sink: Arc<dyn MessageSink>,
    policy: ConcurrentTurnPolicy,
) {
    loop {
        let message = match source.recv().await {
            Ok(Some(message)) => message,
            Ok(None) => {
                tracing::debug!(target: "txing.chat.connection", "client closed input");
                break;
            }
            Err(err) => {
                tracing::warn!(target: "txing.chat.connection", error = %err, "read failed, closing connection");
                break;
            }
        };

        match message.kind() {
            MessageKind::Stop => {
                if control.stop() {
                    tracing::info!(target: "txing.chat.connection", "stop requested, cancelling turn");
                } else {
                    tracing::debug!(target: "txing.chat.connection", "stop with no turn running");
                }
            }
            MessageKind::Ping => {}
            MessageKind::Chat => {
                if policy == ConcurrentTurnPolicy::Reject && queue.is_busy(&control) {
                    let reply = WsMessageResponse::terminal_with(control.conversation_id(), BUSY_MESSAGE);
                    if let Err(err) = sink.send(reply).await {
                        tracing::debug!(target: "txing.chat.connection", error = %err, "busy reply not delivered");
                    }
                    continue;
                }
                if let Some(dropped) = queue.push(message) {
                    tracing::warn!(
                        target: "txing.chat.connection",
                        dropped_chars = dropped.content.chars().count(),
                        "inbound queue full, dropped oldest message"
                    );
                }
            }
            MessageKind::Unknown => {
                tracing::warn!(
                    target: "txing.chat.connection",
                    message_type = %message.message_type,
                    "ignoring message of unknown type"
                );
            }
        }
    }
    queue.close();
}

/// Serves chat turns for one client.
pub struct Connection {
    dispatcher: Arc<ChatDispatcher>,
    conversations: Arc<dyn ConversationStore>,
    options: PipelineOptions,
    queue_capacity: usize,
    policy: ConcurrentTurnPolicy,
    user_id: i64,
    requested_id: i64,
    conversation: Option<Conversation>,
    control: Arc<TurnControl>,
}

impl Connection {
    /// An anonymous connection starting a new conversation
    pub fn new(
        dispatcher: Arc<ChatDispatcher>,
        conversations: Arc<dyn ConversationStore>,
        gateway: &GatewayConfig,
    ) -> Self {
        Self {
            dispatcher,
            conversations,
            options: PipelineOptions::from(gateway),
            queue_capacity: gateway.inbound_queue_capacity,
            policy: gateway.concurrent_turn_policy,
            user_id: crate::chat::conversation::ANONYMOUS_USER_ID,
            requested_id: NEW_CONVERSATION_ID,
            conversation: None,
            control: Arc::new(TurnControl::new(NEW_CONVERSATION_ID)),
        }
    }

    /// Attach the connection to a signed-in user and, optionally, an
    /// existing conversation.
    pub fn for_user(mut self, user_id: i64, conversation_id: i64) -> Self {
        self.user_id = user_id;
        self.requested_id = conversation_id;
        self.control.set_conversation_id(conversation_id);
        self
    }

    /// The conversation as it stands after the last turn
    pub fn conversation(&self) -> Option<&Conversation> {
        self.conversation.as_ref()
    }

    /// Run until the source ends and every queued turn has been handled, or
    /// until the client stops accepting replies.
    pub async fn serve<S>(&mut self, source: S, sink: Arc<dyn MessageSink>) -> Result<()>
    where
        S: MessageSource + 'static,
    {
        let queue = Arc::new(InboundQueue::new(self.queue_capacity));
        let reader = tokio::spawn(read_loop(
            source,
            Arc::clone(&queue),
            Arc::clone(&self.control),
            Arc::clone(&sink),
            self.policy,
        ));

        while let Some((message, cancel)) = queue.pop_turn(&self.control).await {
            let result = self.run_turn(message, cancel, sink.as_ref()).await;
            self.control.finish();
            match result {
                Ok(outcome) if outcome.status == TurnStatus::ClientGone => {
                    tracing::info!(
                        target: "txing.chat.connection",
                        abandoned = queue.len(),
                        "client gone, dropping queued turns"
                    );
                    queue.close();
                    reader.abort();
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(target: "txing.chat.connection", error = %err, "turn not started");
                }
            }
        }

        match reader.await {
            Ok(()) => Ok(()),
            Err(err) if err.is_panic() => Err(TxingError::Panicked("connection reader panicked".to_string())),
            Err(_) => Ok(()),
        }
    }

    async fn run_turn(
        &mut self,
        message: WsMessageRequest,
        cancel: CancellationToken,
        sink: &dyn MessageSink,
    ) -> Result<TurnOutcome> {
        let mut conversation = match self.conversation.take() {
            Some(conversation) => conversation,
            None => match extract_conversation(self.conversations.as_ref(), self.requested_id, self.user_id).await {
                Ok(conversation) => conversation,
                Err(err) => {
                    self.send_failure(sink, self.control.conversation_id()).await;
                    return Err(err);
                }
            },
        };

        let turn_id = Uuid::new_v4();
        if let Err(err) = conversation.handle_message(&message) {
            self.send_failure(sink, conversation.id).await;
            self.conversation = Some(conversation);
            return Err(err);
        }
        self.control.set_conversation_id(conversation.id);
        tracing::debug!(
            target: "txing.chat.connection",
            %turn_id,
            conversation_id = conversation.id,
            model = %conversation.model,
            "turn started"
        );

        let outcome = handle_chat(
            Arc::clone(&self.dispatcher),
            &self.options,
            conversation.id,
            conversation.chat_config(),
            cancel,
            sink,
        )
        .await;

        tracing::debug!(target: "txing.chat.connection", %turn_id, status = ?outcome.status, "turn ended");
        if outcome.should_persist() {
            conversation.save_response(&outcome.content, &outcome.reasoning_content);
        }
        if !conversation.is_anonymous() {
            if let Err(err) = self.conversations.save(&conversation).await {
                tracing::error!(
                    target: "txing.chat.connection",
                    conversation_id = conversation.id,
                    error = %err,
                    "failed to save conversation"
                );
            }
        }
        self.conversation = Some(conversation);
        Ok(outcome)
    }

    async fn send_failure(&self, sink: &dyn MessageSink, conversation_id: i64) {
        let reply = WsMessageResponse::terminal_with(conversation_id, self.options.failure_message.clone());
        if let Err(err) = sink.send(reply).await {
            tracing::debug!(target: "txing.chat.connection", error = %err, "failure reply not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    // ===== InboundQueue Tests =====

    #[test]
    fn test_queue_drops_oldest_when_full() {
        let queue = InboundQueue::new(2);
        assert!(queue.push(WsMessageRequest::chat("one")).is_none());
        assert!(queue.push(WsMessageRequest::chat("two")).is_none());
        let dropped = queue.push(WsMessageRequest::chat("three")).unwrap();
        assert_eq!(dropped.content, "one");
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_queue_drains_after_close() {
        let queue = InboundQueue::new(10);
        queue.push(WsMessageRequest::chat("a"));
        queue.push(WsMessageRequest::chat("b"));
        queue.close();

        assert_eq!(queue.pop().await.unwrap().content, "a");
        assert_eq!(queue.pop().await.unwrap().content, "b");
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_queue_pop_waits_for_push() {
        let queue = Arc::new(InboundQueue::new(10));
        let producer = Arc::clone(&queue);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.push(WsMessageRequest::chat("late"));
        });

        let message = tokio::time::timeout(Duration::from_secs(2), queue.pop())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.content, "late");
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let queue = InboundQueue::new(0);
        queue.push(WsMessageRequest::chat("a"));
        let dropped = queue.push(WsMessageRequest::chat("b"));
        assert_eq!(dropped.map(|m| m.content).as_deref(), Some("a"));
    }

    // ===== TurnControl Tests =====

    #[test]
    fn test_stop_cancels_running_turn() {
        let control = TurnControl::new(NEW_CONVERSATION_ID);
        assert!(!control.stop());

        let token = control.begin();
        assert!(control.is_busy());
        assert!(control.stop());
        assert!(token.is_cancelled());

        control.finish();
        assert!(!control.is_busy());
    }

    #[tokio::test]
    async fn test_pop_turn_starts_turn_before_releasing_message() {
        let queue = InboundQueue::new(4);
        let control = TurnControl::new(NEW_CONVERSATION_ID);
        assert!(!queue.is_busy(&control));

        queue.push(WsMessageRequest::chat("a"));
        assert!(queue.is_busy(&control));

        let (message, token) = queue.pop_turn(&control).await.unwrap();
        assert_eq!(message.content, "a");
        assert!(queue.is_empty());
        // the popped message is already a running turn
        assert!(queue.is_busy(&control));
        assert!(control.stop());
        assert!(token.is_cancelled());

        control.finish();
        assert!(!queue.is_busy(&control));
    }

    #[tokio::test]
    async fn test_pop_turn_none_after_close() {
        let queue = InboundQueue::new(4);
        let control = TurnControl::new(NEW_CONVERSATION_ID);
        queue.close();
        assert!(queue.pop_turn(&control).await.is_none());
        assert!(!control.is_busy());
    }

    // ===== Sink Tests =====

    #[tokio::test]
    async fn test_channel_sink_reports_dropped_receiver() {
        let (sink, rx) = ChannelSink::pair();
        sink.send(WsMessageResponse::terminal(1)).await.unwrap();
        drop(rx);
        assert!(sink.send(WsMessageResponse::terminal(1)).await.is_err());
    }
}
