//! Streaming decoder.
//!
//! A live response body is consumed by exactly one spawned worker:
//!
//! 1. [`LineSplitter`] cuts raw chunks into lines;
//! 2. [`StreamDecoder`] recognizes `data:` frames, asks the provider to decode
//!    them, keeps non-empty assistant deltas and drops consecutive duplicates;
//! 3. increments are published on a capacity-1 channel that the caller drains
//!    through [`ChatStream`].
//!
//! Malformed frames are skipped and counted.  An error object embedded in a
//! frame is fatal: it is delivered as the last item and the stream ends.  A
//! body read failure ends the stream quietly, like a normal close.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::provider::{ChatProvider, FrameEvent};
use crate::transport::ByteStream;
use crate::types::{ChatResponse, Role};

/// Prefix of an event line.
pub const DATA_PREFIX: &str = "data:";

// ---------------------------------------------------------------------------
// Line splitting
// ---------------------------------------------------------------------------

/// Reassembles lines from arbitrarily split byte chunks.
///
/// Bytes are buffered until a `\n` arrives, so a multi-byte UTF-8 sequence
/// split across two chunks decodes intact.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buffer: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every line it completed, without the line
    /// terminator.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            lines.push(decode_line(&self.buffer[start..end]));
            start = end + 1;
        }
        self.buffer.drain(..start);
        lines
    }

    /// Flush whatever is left once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

// ---------------------------------------------------------------------------
// Decoder state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Reading,
    Done,
    Errored,
}

/// Turns lines into canonical increments for one stream.
#[derive(Debug)]
pub struct StreamDecoder {
    provider: Arc<dyn ChatProvider>,
    state: DecoderState,
    last: String,
    frames: u64,
    emitted: u64,
    skipped_frames: u64,
}

impl StreamDecoder {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self {
            provider,
            state: DecoderState::Reading,
            last: String::new(),
            frames: 0,
            emitted: 0,
            skipped_frames: 0,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Frames that failed to parse and were skipped.
    pub fn skipped_frames(&self) -> u64 {
        self.skipped_frames
    }

    /// Feed one line.
    ///
    /// Returns the increments it produced.  Deltas with empty content, or
    /// with the same content as the previous increment, are dropped.  An
    /// embedded provider error is returned as a single `Err` item and moves
    /// the decoder to [`DecoderState::Errored`]; after that, and after
    /// [`finish`], every line is ignored.
    ///
    /// [`finish`]: StreamDecoder::finish
    pub fn feed(&mut self, line: &str) -> Vec<Result<ChatResponse>> {
        if self.state != DecoderState::Reading {
            return Vec::new();
        }
        let Some(data) = line.strip_prefix(DATA_PREFIX) else {
            tracing::trace!(line, "ignoring non-event line");
            return Vec::new();
        };
        let data = data.trim();
        self.frames += 1;

        match self.provider.decode_frame(data) {
            Ok(FrameEvent::Deltas(deltas)) => deltas
                .into_iter()
                .filter(|d| d.role == Role::Assistant && !d.content.is_empty())
                .filter_map(|d| {
                    if self.last == d.content {
                        return None;
                    }
                    self.last.clone_from(&d.content);
                    self.emitted += 1;
                    Some(Ok(ChatResponse {
                        role: d.role,
                        content: d.content,
                    }))
                })
                .collect(),
            Ok(FrameEvent::Error(err)) => {
                tracing::warn!(provider = %self.provider.kind(), error = %err, "stream carried provider error");
                self.state = DecoderState::Errored;
                vec![Err(err)]
            }
            Err(e) => {
                self.skipped_frames += 1;
                tracing::debug!(
                    provider = %self.provider.kind(),
                    error = %e,
                    skipped_frames = self.skipped_frames,
                    "skipping malformed stream frame"
                );
                Vec::new()
            }
        }
    }

    /// Mark the stream as ended.  An errored decoder stays errored.
    pub fn finish(&mut self) {
        if self.state == DecoderState::Reading {
            self.state = DecoderState::Done;
        }
        tracing::debug!(
            provider = %self.provider.kind(),
            state = ?self.state,
            frames = self.frames,
            emitted = self.emitted,
            skipped_frames = self.skipped_frames,
            "stream finished"
        );
    }
}

// ---------------------------------------------------------------------------
// ChatStream
// ---------------------------------------------------------------------------

/// Ordered, finite sequence of increments from one streaming call.
///
/// Dropping the stream cancels the worker, which then releases the body.
#[derive(Debug)]
pub struct ChatStream {
    rx: mpsc::Receiver<Result<ChatResponse>>,
    cancel: CancellationToken,
}

impl ChatStream {
    /// Start the worker for `body`.  `cancel` may be shared with the caller.
    pub fn spawn(
        provider: Arc<dyn ChatProvider>,
        body: ByteStream,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(run_worker(
            StreamDecoder::new(provider),
            body,
            tx,
            cancel.clone(),
        ));
        Self { rx, cancel }
    }

    /// Ask the worker to stop.  Increments already queued can still be read.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Receive the next increment; `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<Result<ChatResponse>> {
        self.rx.recv().await
    }
}

impl Stream for ChatStream {
    type Item = Result<ChatResponse>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for ChatStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

async fn run_worker(
    mut decoder: StreamDecoder,
    mut body: ByteStream,
    tx: mpsc::Sender<Result<ChatResponse>>,
    cancel: CancellationToken,
) {
    let mut lines = LineSplitter::new();

    'read: loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("stream cancelled by caller");
                break 'read;
            }
            next = body.next() => next,
        };

        let (pending, at_end) = match next {
            Some(Ok(chunk)) => (lines.push(&chunk), false),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "stream read failed; closing stream");
                (Vec::new(), true)
            }
            None => (lines.finish().into_iter().collect(), true),
        };

        for line in pending {
            for item in decoder.feed(&line) {
                if !publish(&tx, &cancel, item).await {
                    break 'read;
                }
            }
            if decoder.state() == DecoderState::Errored {
                break 'read;
            }
        }

        if at_end {
            break;
        }
    }

    drop(body);
    decoder.finish();
}

/// Send one item, giving up if the caller cancels or goes away.
async fn publish(
    tx: &mpsc::Sender<Result<ChatResponse>>,
    cancel: &CancellationToken,
    item: Result<ChatResponse>,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}
