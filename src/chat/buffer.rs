// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Accumulated reply of one chat turn

use chrono::{DateTime, Utc};

use crate::llm::chunk::Chunk;

/// Collects streamed chunks for persistence and the end-of-turn check.
#[derive(Debug, Clone)]
pub struct ChatRespBuffer {
    content: String,
    reasoning_content: String,
    last: Option<Chunk>,
    count: usize,
    start_time: DateTime<Utc>,
}

impl Default for ChatRespBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatRespBuffer {
    pub fn new() -> Self {
        Self {
            content: String::new(),
            reasoning_content: String::new(),
            last: None,
            count: 0,
            start_time: Utc::now(),
        }
    }

    /// Append a chunk and return its (content, reasoning) parts.
    pub fn write_chunk(&mut self, chunk: &Chunk) -> (String, String) {
        self.write(&chunk.content, &chunk.reasoning_content);
        self.last = Some(chunk.clone());
        (chunk.content.clone(), chunk.reasoning_content.clone())
    }

    pub fn write(&mut self, content: &str, reasoning: &str) {
        self.content.push_str(content);
        self.reasoning_content.push_str(reasoning);
        self.count += 1;
    }

    /// True until some content or reasoning text arrives
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.reasoning_content.is_empty()
    }

    /// The accumulated content, or `fallback` when nothing was written.
    pub fn get_or_default<'a>(&'a self, fallback: &'a str) -> &'a str {
        if self.is_empty() {
            fallback
        } else {
            &self.content
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn reasoning_content(&self) -> &str {
        &self.reasoning_content
    }

    pub fn last(&self) -> Option<&Chunk> {
        self.last.as_ref()
    }

    /// Chunks written so far
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.start_time
    }

    /// Consume into (content, reasoning)
    pub fn into_parts(self) -> (String, String) {
        (self.content, self.reasoning_content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_is_empty() {
        let buffer = ChatRespBuffer::new();
        assert!(buffer.is_empty());
        assert_eq!(buffer.count(), 0);
        assert_eq!(buffer.get_or_default("fallback"), "fallback");
    }

    #[test]
    fn test_write_chunk_accumulates() {
        let mut buffer = ChatRespBuffer::new();
        let parts = buffer.write_chunk(&Chunk::content("He"));
        assert_eq!(parts, ("He".to_string(), String::new()));
        buffer.write_chunk(&Chunk::content("llo"));
        buffer.write_chunk(&Chunk::reasoning("thinking"));

        assert_eq!(buffer.content(), "Hello");
        assert_eq!(buffer.reasoning_content(), "thinking");
        assert_eq!(buffer.count(), 3);
        assert_eq!(buffer.last().map(|c| c.reasoning_content.as_str()), Some("thinking"));
        assert_eq!(buffer.get_or_default("fallback"), "Hello");
    }

    #[test]
    fn test_reasoning_only_is_not_empty() {
        let mut buffer = ChatRespBuffer::new();
        buffer.write("", "hmm");
        assert!(!buffer.is_empty());
        assert_eq!(buffer.get_or_default("fallback"), "");
    }

    #[test]
    fn test_into_parts() {
        let mut buffer = ChatRespBuffer::new();
        buffer.write("a", "b");
        assert_eq!(buffer.into_parts(), ("a".to_string(), "b".to_string()));
    }
}
