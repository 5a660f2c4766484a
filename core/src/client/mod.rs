//! One logical streaming request/response against the chat backend.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::task::Context;
use std::task::Poll;

use futures::Stream;
use futures::TryStreamExt;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::backend_info::BackendInfo;
use crate::error::PilotErr;
use crate::error::Result;
use crate::util::backoff;
use testpilot_protocol::StreamEvent;

mod sse;
pub(crate) use sse::FrameDecoder;
pub(crate) use sse::RawFrame;
pub(crate) use sse::parse_frame;


const EVENT_CHANNEL_CAPACITY: usize = 1600;

/// Subscriber side of an open session: parsed events in wire order,
/// terminated by either channel close (server finished) or a single
/// terminal `Err` (transport failure / idle timeout).
#[derive(Debug)]
pub struct EventStream {
    rx_event: ReceiverStream<Result<StreamEvent>>,
}

impl Stream for EventStream {
    type Item = Result<StreamEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx_event).poll_next(cx)
    }
}

/// Owns at most one live streaming connection. `open` issues the request
/// and spawns the read task; `close` aborts promptly and guarantees that
/// a read resolving afterwards dispatches nothing — stale deliveries are
/// keyed out by a monotonically incrementing session epoch.
pub struct StreamSession {
    client: reqwest::Client,
    backend: BackendInfo,
    epoch: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl StreamSession {
    pub fn new(backend: BackendInfo) -> Self {
        Self {
            client: reqwest::Client::new(),
            backend,
            epoch: Arc::new(AtomicU64::new(0)),
            cancel: CancellationToken::new(),
        }
    }

    /// Send one message payload and start streaming the reply. The
    /// initial request is retried with jittered exponential backoff on
    /// 429/5xx up to the configured budget; the final failure surfaces as
    /// an error value. Mid-stream reconnect policy belongs to the caller.
    pub async fn open(&mut self, payload: Value) -> Result<EventStream> {
        self.close();
        self.cancel = CancellationToken::new();
        let my_epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let url = self.backend.base_url()?.to_string();
        let max_retries = self.backend.request_max_retries();
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            let builder = self
                .client
                .post(&url)
                .header(ACCEPT, "text/event-stream")
                .json(&payload);
            let builder = self.backend.apply_headers(builder);

            match builder.send().await {
                Ok(resp) if resp.status().is_success() => {
                    let (tx_event, rx_event) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
                    let stream = resp.bytes_stream().map_err(PilotErr::Reqwest);
                    tokio::spawn(sse::process_sse(
                        stream,
                        tx_event,
                        self.backend.stream_idle_timeout(),
                        Arc::clone(&self.epoch),
                        my_epoch,
                        self.cancel.clone(),
                    ));
                    return Ok(EventStream {
                        rx_event: ReceiverStream::new(rx_event),
                    });
                }
                Ok(resp) => {
                    let status = resp.status();
                    if !retriable_status(status) || attempt > max_retries {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(PilotErr::UnexpectedStatus { status, body });
                    }
                    warn!(%status, attempt, "stream request rejected, retrying");
                }
                Err(e) => {
                    if attempt > max_retries {
                        return Err(e.into());
                    }
                    debug!(attempt, "stream request failed, retrying: {e}");
                }
            }
            tokio::time::sleep(backoff(attempt)).await;
        }
    }

    /// Abort the in-flight request and invalidate every callback of the
    /// current logical stream. Idempotent.
    pub fn close(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

fn retriable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
