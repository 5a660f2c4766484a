use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::Bytes;
use bytes::BytesMut;
use futures::Stream;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use crate::error::PilotErr;
use crate::error::Result;
use testpilot_protocol::StreamEvent;

/// One reassembled SSE frame: `event:`/`data:`/`id:` lines up to the
/// blank-line terminator, with multiple `data:` lines joined by `\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawFrame {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental byte-to-frame reassembly. Bytes are buffered until a full
/// line is available, so a chunk boundary inside a multi-byte UTF-8
/// sequence or in the middle of a `data:` line never corrupts the frame.
#[derive(Default)]
pub(crate) struct FrameDecoder {
    buf: BytesMut,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk; returns every frame completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<RawFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line = self.buf.split_to(pos + 1);
            let mut line = &line[..line.len() - 1];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            if line.is_empty() {
                if let Some(frame) = self.flush() {
                    frames.push(frame);
                }
                continue;
            }
            let text = String::from_utf8_lossy(line);
            self.accept_line(&text);
        }
        frames
    }

    fn accept_line(&mut self, line: &str) {
        if line.starts_with(':') {
            // Keep-alive comment.
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            // `retry` and unknown fields are ignored per the SSE grammar.
            _ => {}
        }
    }

    /// Blank line reached: emit the accumulated frame, if it carried data.
    fn flush(&mut self) -> Option<RawFrame> {
        let event = self.event.take();
        let id = self.id.take();
        if self.data.is_empty() {
            return None;
        }
        let data = self.data.join("\n");
        self.data.clear();
        Some(RawFrame { event, data, id })
    }
}

/// Turn one frame into a typed event. The frame's `event` name is folded
/// into the payload's `type` tag when the payload doesn't carry one.
/// Malformed JSON and unrecognized event types are dropped with a
/// diagnostic — forward compatibility, never a crash.
pub(crate) fn parse_frame(frame: &RawFrame) -> Option<StreamEvent> {
    let mut value: Value = match serde_json::from_str(&frame.data) {
        Ok(value) => value,
        Err(e) => {
            let mut excerpt = frame.data.clone();
            const MAX: usize = 300;
            if excerpt.len() > MAX {
                excerpt.truncate(MAX);
            }
            debug!("failed to parse SSE frame data: {e}, data: {excerpt}");
            return None;
        }
    };

    if let Some(name) = frame.event.as_deref()
        && let Some(obj) = value.as_object_mut()
        && !obj.contains_key("type")
    {
        obj.insert("type".to_string(), Value::String(name.to_string()));
    }

    match serde_json::from_value::<StreamEvent>(value) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(event = ?frame.event, "dropping unrecognized stream event: {e}");
            None
        }
    }
}

/// Drive one streaming response body to completion: reassemble frames,
/// parse them, and dispatch events in wire order. Dispatch stops the
/// moment the session epoch moves past `my_epoch` (a `close()` raced a
/// pending read) or the cancellation token fires.
pub(crate) async fn process_sse<S>(
    mut stream: S,
    tx_event: mpsc::Sender<Result<StreamEvent>>,
    idle_timeout: Duration,
    epoch: Arc<AtomicU64>,
    my_epoch: u64,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let mut decoder = FrameDecoder::new();
    loop {
        let next_chunk = tokio::select! {
            _ = cancel.cancelled() => return,
            next = timeout(idle_timeout, stream.next()) => next,
        };

        let chunk = match next_chunk {
            Ok(Some(Ok(chunk))) => chunk,
            Ok(Some(Err(e))) => {
                debug!("SSE transport error: {e:#}");
                if is_live(&epoch, my_epoch, &cancel) {
                    let _ = tx_event
                        .send(Err(PilotErr::Stream(format!("[transport] {e}"))))
                        .await;
                }
                return;
            }
            // Server closed the stream; the subscriber observes the
            // channel closing.
            Ok(None) => return,
            Err(_) => {
                if is_live(&epoch, my_epoch, &cancel) {
                    let _ = tx_event.send(Err(PilotErr::Timeout)).await;
                }
                return;
            }
        };

        for frame in decoder.push(&chunk) {
            trace!(event = ?frame.event, data = %frame.data, "SSE frame");
            let Some(event) = parse_frame(&frame) else {
                continue;
            };
            if !is_live(&epoch, my_epoch, &cancel) {
                return;
            }
            if tx_event.send(Ok(event)).await.is_err() {
                return;
            }
        }
    }
}

fn is_live(epoch: &AtomicU64, my_epoch: u64, cancel: &CancellationToken) -> bool {
    epoch.load(Ordering::SeqCst) == my_epoch && !cancel.is_cancelled()
}
