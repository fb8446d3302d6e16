// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, Result, TxingError};
use crate::llm::chunk::{Chunk, Hook};

/// Parse token counts from an arbitrary message by extracting the first numeric tokens.
pub(crate) fn parse_numeric_token_counts(message: &str) -> (u32, u32) {
    let numbers: Vec<u32> = message
        .split(|c: char| !c.is_ascii_digit())
        .filter_map(|s| s.parse().ok())
        .collect();

    match numbers.as_slice() {
        [current, limit, ..] => (*current, *limit),
        [single] => (*single, 0),
        _ => (0, 0),
    }
}

/// Parse numeric Retry-After header (seconds).
pub(crate) fn parse_retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default, rename = "type")]
    error_type: Option<String>,
}

/// Map a non-success HTTP response to an [`ApiError`].
///
/// Unrecognized bodies become `ServerError` carrying the status and the raw
/// body text.
pub(crate) fn parse_error(status: u16, retry_after: Option<u64>, body: &str) -> TxingError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let (message, code) = match &parsed {
        Some(envelope) => {
            let code = envelope
                .error
                .code
                .as_ref()
                .and_then(|c| c.as_str().map(str::to_string))
                .or_else(|| envelope.error.error_type.clone())
                .unwrap_or_default();
            (envelope.error.message.clone(), code)
        }
        None => (body.to_string(), String::new()),
    };

    let api_error = match (status, code.as_str()) {
        (401 | 403, _) | (_, "invalid_api_key" | "authentication_error") => {
            ApiError::AuthenticationFailed
        }
        (429, _) | (_, "rate_limit_exceeded") => {
            let secs = retry_after.unwrap_or(60).min(u32::MAX as u64) as u32;
            ApiError::RateLimited(secs)
        }
        (_, "context_length_exceeded") => {
            let (current, limit) = parse_numeric_token_counts(&message);
            ApiError::ContextTooLong { current, limit }
        }
        (_, "model_not_found") => ApiError::ModelNotFound(message),
        (404, _) if message.contains("model") => ApiError::ModelNotFound(message),
        _ => ApiError::ServerError {
            status,
            message: if parsed.is_some() { message } else { body.to_string() },
        },
    };

    TxingError::Api(api_error)
}

/// Splits a byte stream into lines, holding back an unterminated tail.
///
/// Works on bytes so a multi-byte character split across reads is decoded
/// only once the whole line has arrived.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).trim().to_string());
        }
        lines
    }

    /// Whatever is left once the body ends.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        (!rest.is_empty()).then_some(rest)
    }
}

/// One decoded server-sent event
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SseFrame {
    /// A `data:` payload that parsed as JSON
    Data(serde_json::Value),
    /// The `[DONE]` sentinel
    Done,
}

/// Upper bound on a held lenient-mode payload
pub(crate) const MAX_PARTIAL_FRAME: usize = 64 * 1024;

/// Turns SSE lines into frames.
///
/// In lenient mode a payload that ends early is held and joined with the
/// following `data:` lines until the concatenation parses. Text that can
/// never become JSON is logged and dropped, and the line that exposed it is
/// decoded on its own. Otherwise a bad payload is a stream error.
#[derive(Debug)]
pub(crate) struct FrameDecoder {
    lenient: bool,
    partial: String,
}

impl FrameDecoder {
    pub(crate) fn new(lenient: bool) -> Self {
        Self {
            lenient,
            partial: String::new(),
        }
    }

    pub(crate) fn decode(&mut self, line: &str) -> Result<Option<SseFrame>> {
        if line.is_empty() || line.starts_with(':') {
            return Ok(None);
        }

        let Some(data) = line
            .strip_prefix("data:")
            .map(|d| d.strip_prefix(' ').unwrap_or(d))
        else {
            // event:, id:, retry: and anything else carry nothing we use
            return Ok(None);
        };

        if data == "[DONE]" {
            return Ok(Some(SseFrame::Done));
        }

        self.decode_data(data)
    }

    fn decode_data(&mut self, data: &str) -> Result<Option<SseFrame>> {
        let candidate = if self.partial.is_empty() {
            data.to_string()
        } else {
            format!("{}{}", self.partial, data)
        };

        let err = match serde_json::from_str::<serde_json::Value>(&candidate) {
            Ok(value) => {
                self.partial.clear();
                return Ok(Some(SseFrame::Data(value)));
            }
            Err(err) => err,
        };

        if !self.lenient {
            return Err(TxingError::Api(ApiError::StreamError(format!(
                "malformed stream frame: {}",
                err
            ))));
        }

        if err.is_eof() && candidate.len() <= MAX_PARTIAL_FRAME {
            tracing::debug!(
                target: "txing.llm.sse",
                buffered = candidate.len(),
                "incomplete frame, buffering"
            );
            self.partial = candidate;
            return Ok(None);
        }

        if self.partial.is_empty() {
            tracing::warn!(
                target: "txing.llm.sse",
                dropped = candidate.len(),
                error = %err,
                "discarding unparseable frame"
            );
            return Ok(None);
        }

        let held = std::mem::take(&mut self.partial);
        tracing::warn!(
            target: "txing.llm.sse",
            dropped = held.len(),
            error = %err,
            "discarding held frame that cannot be completed"
        );
        self.decode_data(data)
    }

    /// Bytes still waiting for the rest of a frame
    pub(crate) fn leftover(&self) -> usize {
        self.partial.len()
    }
}

/// Decode a streaming response body into SSE frames.
///
/// The stream ends after `[DONE]` or when the body ends, whichever comes
/// first. A transport error mid-body is yielded as a stream error.
pub(crate) fn sse_frames(
    response: reqwest::Response,
    lenient: bool,
) -> impl Stream<Item = Result<SseFrame>> + Send {
    async_stream::try_stream! {
        let mut body = response.bytes_stream();
        let mut lines = LineBuffer::default();
        let mut decoder = FrameDecoder::new(lenient);
        let mut finished = false;

        'read: while let Some(next) = body.next().await {
            let bytes = next.map_err(|e| TxingError::Api(ApiError::StreamError(e.to_string())))?;
            for line in lines.push(&bytes) {
                if let Some(frame) = decoder.decode(&line)? {
                    finished = frame == SseFrame::Done;
                    yield frame;
                    if finished {
                        break 'read;
                    }
                }
            }
        }

        if !finished {
            if let Some(line) = lines.finish() {
                if let Some(frame) = decoder.decode(&line)? {
                    yield frame;
                }
            }
            if decoder.leftover() > 0 {
                tracing::warn!(
                    target: "txing.llm.sse",
                    leftover = decoder.leftover(),
                    "stream ended inside an incomplete frame"
                );
            }
        }
    }
}

/// Next JSON payload, or `None` once the stream is over.
pub(crate) async fn next_payload<S>(
    cancel: &CancellationToken,
    frames: &mut S,
) -> Result<Option<serde_json::Value>>
where
    S: Stream<Item = Result<SseFrame>> + Unpin,
{
    let next = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(TxingError::Cancelled),
        next = frames.next() => next,
    };

    match next {
        None | Some(Ok(SseFrame::Done)) => Ok(None),
        Some(Ok(SseFrame::Data(value))) => Ok(Some(value)),
        Some(Err(err)) => Err(err),
    }
}

/// Hand a chunk to the hook unless the turn is cancelled first.
pub(crate) async fn deliver(cancel: &CancellationToken, hook: &dyn Hook, chunk: Chunk) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TxingError::Cancelled),
        delivered = hook.on_chunk(chunk) => delivered,
    }
}
