//! Pull-based chunk streams.
//!
//! A producer task parses network frames and pushes `StreamChunk`s into a
//! bounded channel of capacity one, so it never runs more than one chunk ahead
//! of the consumer. Dropping the `ChunkStream` aborts the producer, which drops
//! the HTTP response and releases the connection.

use crate::error::ProviderError;
use crate::types::{ChatResponse, ContentBlock, StopReason, StreamChunk, Usage};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Consumer side of a chunk stream.
///
/// Yields at most one terminal chunk and ends right after it.
pub struct ChunkStream {
    rx: mpsc::Receiver<StreamChunk>,
    task: Option<JoinHandle<()>>,
    finished: bool,
}

impl ChunkStream {
    /// Run `producer` on the runtime and stream what it sends.
    ///
    /// A `done` chunk is synthesized if the producer returns without sending a
    /// terminal chunk.
    pub fn spawn<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(ChunkSender) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        let terminated = Arc::new(AtomicBool::new(false));
        let sender = ChunkSender {
            tx: tx.clone(),
            terminated: Arc::clone(&terminated),
        };
        let fut = producer(sender);

        let task = tokio::spawn(async move {
            fut.await;
            if !terminated.swap(true, Ordering::AcqRel) {
                let _ = tx.send(StreamChunk::done()).await;
            }
        });

        Self {
            rx,
            task: Some(task),
            finished: false,
        }
    }

    /// A stream over fixed chunks. Anything after the first terminal chunk is
    /// dropped, and a `done` is appended if none is present.
    pub fn from_chunks(chunks: impl IntoIterator<Item = StreamChunk>) -> Self {
        let mut buffered = Vec::new();
        for chunk in chunks {
            let terminal = chunk.is_terminal();
            buffered.push(chunk);
            if terminal {
                break;
            }
        }
        if !buffered.last().is_some_and(StreamChunk::is_terminal) {
            buffered.push(StreamChunk::done());
        }

        let (tx, rx) = mpsc::channel(buffered.len());
        for chunk in buffered {
            let _ = tx.try_send(chunk);
        }

        Self {
            rx,
            task: None,
            finished: false,
        }
    }

    /// A stream holding a single `error` chunk.
    pub fn error(message: impl Into<String>) -> Self {
        Self::from_chunks([StreamChunk::error(message)])
    }

    /// Drain the stream into a `ChatResponse`.
    ///
    /// Text runs become text blocks and finished tool calls become tool-use
    /// blocks, in arrival order. An `error` chunk becomes `ProviderError::Stream`.
    pub async fn collect_response(
        mut self,
        model: impl Into<String>,
    ) -> Result<ChatResponse, ProviderError> {
        use futures::StreamExt;

        let mut content = Vec::new();
        let mut text = String::new();
        let mut stop_reason = None;
        let mut usage = Usage::default();

        while let Some(chunk) = self.next().await {
            match chunk {
                StreamChunk::Text { text: delta } => text.push_str(&delta),
                StreamChunk::ToolUseEnd { id, name, input } => {
                    if !text.is_empty() {
                        content.push(ContentBlock::text(std::mem::take(&mut text)));
                    }
                    let input = parse_tool_input(&id, &input)?;
                    content.push(ContentBlock::ToolUse { id, name, input });
                }
                StreamChunk::ToolUseStart { .. } | StreamChunk::ToolUseDelta { .. } => {}
                StreamChunk::Error { error } => return Err(ProviderError::Stream(error)),
                StreamChunk::Done {
                    stop_reason: reason,
                    usage: done_usage,
                } => {
                    stop_reason = reason;
                    if let Some(done_usage) = done_usage {
                        usage = done_usage;
                    }
                }
            }
        }

        if !text.is_empty() {
            content.push(ContentBlock::text(text));
        }

        let stop_reason = stop_reason.unwrap_or_else(|| {
            if content.iter().any(|b| matches!(b, ContentBlock::ToolUse { .. })) {
                StopReason::ToolUse
            } else {
                StopReason::EndTurn
            }
        });

        Ok(ChatResponse {
            id: ulid::Ulid::new().to_string(),
            model: model.into(),
            content,
            stop_reason,
            usage,
        })
    }
}

impl Stream for ChunkStream {
    type Item = StreamChunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => {
                if chunk.is_terminal() {
                    this.finished = true;
                }
                Poll::Ready(Some(chunk))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Producer side of a chunk stream.
pub struct ChunkSender {
    tx: mpsc::Sender<StreamChunk>,
    terminated: Arc<AtomicBool>,
}

impl ChunkSender {
    /// Send one chunk, waiting for the consumer to make room.
    ///
    /// Returns `false` when the producer should stop: the consumer is gone, or
    /// a terminal chunk has been sent (including this one).
    pub async fn send(&self, chunk: StreamChunk) -> bool {
        if self.terminated.load(Ordering::Acquire) {
            return false;
        }
        let terminal = chunk.is_terminal();
        if terminal {
            self.terminated.store(true, Ordering::Release);
        }
        self.tx.send(chunk).await.is_ok() && !terminal
    }

    /// Send chunks in order until one returns `false`.
    pub async fn send_all(&self, chunks: Vec<StreamChunk>) -> bool {
        for chunk in chunks {
            if !self.send(chunk).await {
                return false;
            }
        }
        true
    }

    /// Whether a terminal chunk has gone out.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Whether the consumer dropped its end.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Parse accumulated tool arguments. Blank input is an empty object; anything
/// else must be complete JSON.
pub(crate) fn parse_tool_input(id: &str, raw: &str) -> Result<serde_json::Value, ProviderError> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(raw)
        .map_err(|e| ProviderError::Parse(format!("tool call {id} arguments: {e}")))
}
