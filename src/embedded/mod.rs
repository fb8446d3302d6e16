// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Embedded mode for process integration
//!
//! `txing serve-stdio` reads one JSON request per line from stdin and writes
//! one JSON response per line to stdout, so a host process can drive a
//! connection without a socket. Agent output uses SSE framing instead.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines, Stdin, Stdout};
use tokio::sync::Mutex;

use crate::chat::connection::{MessageSink, MessageSource};
use crate::chat::wire::{AgentStreamEvent, WsMessageRequest, WsMessageResponse};
use crate::error::{Result, TxingError};
use crate::llm::chunk::{Chunk, Hook};

/// JSONL request reader
pub struct JsonLSource<R> {
    lines: Lines<R>,
    line_no: usize,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> MessageSource for JsonLSource<R> {
    /// Blank lines are skipped and malformed lines are logged and skipped.
    async fn recv(&mut self) -> Result<Option<WsMessageRequest>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_no += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<WsMessageRequest>(line) {
                Ok(request) => return Ok(Some(request)),
                Err(err) => {
                    tracing::warn!(
                        target: "txing.embedded",
                        line = self.line_no,
                        error = %err,
                        "skipping malformed request line"
                    );
                }
            }
        }
        Ok(None)
    }
}

/// JSONL response writer
pub struct JsonLSink<W> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> JsonLSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MessageSink for JsonLSink<W> {
    async fn send(&self, message: WsMessageResponse) -> Result<()> {
        let mut line = serde_json::to_string(&message)?;
        line.push('\n');
        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| TxingError::Delivery(format!("write failed: {}", e)))?;
        writer
            .flush()
            .await
            .map_err(|e| TxingError::Delivery(format!("flush failed: {}", e)))
    }
}

pub type StdioSource = JsonLSource<BufReader<Stdin>>;
pub type StdioSink = JsonLSink<Stdout>;

/// Source and sink over the process's stdin and stdout
pub fn stdio() -> (StdioSource, StdioSink) {
    (
        JsonLSource::new(BufReader::new(tokio::io::stdin())),
        JsonLSink::new(tokio::io::stdout()),
    )
}

/// Hook that renders each chunk as an SSE frame
pub struct SseHook<W> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> SseHook<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    async fn write_frame(&self, frame: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| TxingError::Delivery(format!("write failed: {}", e)))?;
        writer
            .flush()
            .await
            .map_err(|e| TxingError::Delivery(format!("flush failed: {}", e)))
    }

    /// Final `end` frame on success, error frame otherwise
    pub async fn finish<T>(&self, result: &Result<T>, failure_message: &str) -> Result<()> {
        match result {
            Ok(_) => self.write_frame(&AgentStreamEvent::end().to_sse()?).await,
            Err(err) => {
                tracing::error!(target: "txing.embedded", error = %err, "agent run failed");
                self.write_frame(&AgentStreamEvent::error_frame(failure_message)).await
            }
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Hook for SseHook<W> {
    async fn on_chunk(&self, chunk: Chunk) -> Result<()> {
        let frame = AgentStreamEvent::from(&chunk).to_sse()?;
        self.write_frame(&frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===== Source Tests =====

    #[tokio::test]
    async fn test_source_reads_requests() {
        let input = b"{\"type\":\"chat\",\"content\":\"hi\",\"model\":\"deepseek-v3\"}\n\n{\"type\":\"stop\"}\n";
        let mut source = JsonLSource::new(&input[..]);

        let first = source.recv().await.unwrap().unwrap();
        assert_eq!(first.content, "hi");
        assert_eq!(first.model, "deepseek-v3");
        let second = source.recv().await.unwrap().unwrap();
        assert_eq!(second.message_type, "stop");
        assert!(source.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_source_skips_malformed_lines() {
        let input = b"not json\n{\"type\":\"ping\"}\n";
        let mut source = JsonLSource::new(&input[..]);
        let request = source.recv().await.unwrap().unwrap();
        assert_eq!(request.message_type, "ping");
        assert!(source.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_source_joins_line_split_across_reads() {
        let reader = tokio_test::io::Builder::new()
            .read(b"{\"type\":\"chat\",\"con")
            .read(b"tent\":\"split\"}\n")
            .build();
        let mut source = JsonLSource::new(BufReader::new(reader));
        let request = source.recv().await.unwrap().unwrap();
        assert_eq!(request.content, "split");
        assert!(source.recv().await.unwrap().is_none());
    }

    // ===== Sink Tests =====

    #[tokio::test]
    async fn test_sink_write_error_is_delivery_error() {
        let writer = tokio_test::io::Builder::new()
            .write_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
            .build();
        let sink = JsonLSink::new(writer);
        let err = sink.send(WsMessageResponse::terminal(1)).await.unwrap_err();
        assert!(matches!(err, TxingError::Delivery(_)));
    }

    #[tokio::test]
    async fn test_sink_writes_lines() {
        let sink = JsonLSink::new(Vec::new());
        sink.send(WsMessageResponse::from_chunk(7, &Chunk::content("He"))).await.unwrap();
        sink.send(WsMessageResponse::terminal(7)).await.unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["conversationId"], 7);
        assert_eq!(lines[0]["content"], "He");
        assert_eq!(lines[1]["end"], true);
    }

    // ===== SSE Tests =====

    #[tokio::test]
    async fn test_sse_hook_frames() {
        let hook = SseHook::new(Vec::new());
        hook.on_chunk(Chunk::tool_request("c1", "web_search_tool", "{}", "Web search: x"))
            .await
            .unwrap();
        hook.finish(&Ok(()), "failed").await.unwrap();

        let output = String::from_utf8(hook.into_inner()).unwrap();
        let frames: Vec<&str> = output.split("\n\n").filter(|f| !f.is_empty()).collect();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].starts_with("data: "));
        assert!(frames[0].contains("\"toolCallId\":\"c1\""));
        assert!(frames[0].contains("\"showMsg\":\"Web search: x\""));
        assert_eq!(frames[1], "data: {\"end\":true}");
    }

    #[tokio::test]
    async fn test_sse_hook_error_frame() {
        let hook = SseHook::new(Vec::new());
        let result: Result<()> = Err(TxingError::Agent("boom".to_string()));
        hook.finish(&result, "Sorry, something went wrong.").await.unwrap();

        let output = String::from_utf8(hook.into_inner()).unwrap();
        let body: serde_json::Value =
            serde_json::from_str(output.trim().trim_start_matches("data: ")).unwrap();
        assert_eq!(body["error"], "Sorry, something went wrong.");
        assert_eq!(body["end"], true);
    }
}
