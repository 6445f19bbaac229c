use super::error::ProviderError;
use super::logging::emit_sse_parse_error;
use crate::types::StreamEvent;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProviderError>> + Send>>;

/// Receiving half of a provider stream. Capacity one: the producer is never
/// more than a single chunk ahead of the consumer.
pub type CompletionStream = mpsc::Receiver<StreamEvent>;

/// One server-sent event: optional `event:` name plus joined `data:` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE framer over raw body bytes.
///
/// Frames are decoded as UTF-8 only once their terminating blank line has
/// arrived, so characters and `\r\n` pairs split across network chunks
/// survive intact. Line endings are normalised to `\n` as bytes come in.
#[derive(Default)]
pub struct StreamParser {
    buffer: Vec<u8>,
    pending_cr: bool,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.push_normalized(chunk);
        let mut frames = Vec::new();
        let mut start = 0;

        while let Some(end) = find_blank_line(&self.buffer[start..]) {
            let frame_end = start + end + 2;
            let text = String::from_utf8_lossy(&self.buffer[start..frame_end]);
            if let Some(frame) = parse_frame(&text) {
                frames.push(frame);
            }
            start = frame_end;
        }

        if start > 0 {
            self.buffer.drain(..start);
        }

        frames
    }

    /// Parses whatever is left once the body ends without a trailing blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if std::mem::take(&mut self.pending_cr) {
            self.buffer.push(b'\n');
        }
        let rest = std::mem::take(&mut self.buffer);
        parse_frame(&String::from_utf8_lossy(&rest))
    }

    // A trailing `\r` is held back until the next byte shows whether it
    // starts a `\r\n` pair.
    fn push_normalized(&mut self, chunk: &[u8]) {
        self.buffer.reserve(chunk.len());
        for &byte in chunk {
            if std::mem::take(&mut self.pending_cr) {
                self.buffer.push(b'\n');
                if byte == b'\n' {
                    continue;
                }
            }
            if byte == b'\r' {
                self.pending_cr = true;
            } else {
                self.buffer.push(byte);
            }
        }
    }
}

fn find_blank_line(bytes: &[u8]) -> Option<usize> {
    bytes.windows(2).position(|pair| pair == b"\n\n")
}

fn parse_frame(text: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut data: Option<String> = None;

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            match &mut data {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(rest);
                }
                None => data = Some(rest.to_string()),
            }
        }
    }

    data.map(|data| SseFrame {
        event,
        data: data.trim().to_string(),
    })
}

/// What a backend makes of one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameAction {
    Emit(String),
    Skip,
    Done,
}

/// Producer side of a [`CompletionStream`]. Guarantees a single final event.
pub struct ChunkSink {
    tx: mpsc::Sender<StreamEvent>,
    finished: bool,
    chunks: usize,
}

impl ChunkSink {
    /// Forwards one delta. Returns false once the consumer is gone.
    pub async fn delta(&mut self, content: String) -> bool {
        if self.finished {
            return false;
        }
        if content.is_empty() {
            return true;
        }
        self.chunks += 1;
        self.tx.send(StreamEvent::delta(content)).await.is_ok()
    }

    pub async fn done(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let _ = self.tx.send(StreamEvent::done()).await;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Runs `produce` on its own task. If it returns without signalling
/// completion the final event is synthesized, so the consumer never hangs.
pub fn spawn_producer<F, Fut>(provider: &'static str, produce: F) -> CompletionStream
where
    F: FnOnce(ChunkSink) -> Fut,
    Fut: Future<Output = ChunkSink> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);
    let sink = ChunkSink {
        tx,
        finished: false,
        chunks: 0,
    };
    let task = produce(sink);
    tokio::spawn(async move {
        let mut sink = task.await;
        if !sink.is_finished() {
            tracing::debug!(provider, "stream ended without done marker");
        }
        sink.done().await;
        tracing::debug!(provider, chunks = sink.chunks, "stream closed");
    });
    rx
}

/// Reads an SSE body, letting `interpret` decide per frame.
///
/// A transport error ends the stream immediately with a final event.
pub async fn pump_sse<F>(
    provider: &'static str,
    mut bytes: ByteStream,
    mut sink: ChunkSink,
    mut interpret: F,
) -> ChunkSink
where
    F: FnMut(&SseFrame) -> FrameAction + Send,
{
    let mut parser = StreamParser::new();

    while let Some(item) = bytes.next().await {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(error) => {
                tracing::warn!(provider, %error, "stream read failed");
                sink.done().await;
                return sink;
            }
        };

        for frame in parser.process(&chunk) {
            match interpret(&frame) {
                FrameAction::Emit(text) => {
                    if !sink.delta(text).await {
                        return sink;
                    }
                }
                FrameAction::Skip => {}
                FrameAction::Done => {
                    sink.done().await;
                    return sink;
                }
            }
        }
    }

    if let Some(frame) = parser.finish() {
        if let FrameAction::Emit(text) = interpret(&frame) {
            sink.delta(text).await;
        }
    }
    sink
}

/// Decodes a frame payload, reporting (and tolerating) malformed JSON.
pub fn decode_frame<T: serde::de::DeserializeOwned>(frame: &SseFrame) -> Option<T> {
    match serde_json::from_str::<T>(&frame.data) {
        Ok(value) => Some(value),
        Err(error) => {
            emit_sse_parse_error(frame.event.as_deref(), &frame.data, &error);
            None
        }
    }
}
