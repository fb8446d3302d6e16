// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat turns
//!
//! Conversation state, channel dispatch, the per-turn streaming pipeline and
//! the client connection that ties them together.

pub mod buffer;
pub mod connection;
pub mod conversation;
pub mod dispatch;
pub mod pipeline;
pub mod wire;

pub use buffer::ChatRespBuffer;
pub use connection::{Connection, InboundQueue, MessageSink, MessageSource};
pub use conversation::{extract_conversation, Conversation, ConversationStore, InMemoryConversationStore};
pub use dispatch::ChatDispatcher;
pub use pipeline::{handle_chat, stream_turn, PipelineOptions, TurnOutcome, TurnStatus};
pub use wire::{AgentStreamEvent, WsMessageRequest, WsMessageResponse};
