use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use axum::response::sse::Event;
use futures::Stream;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::frames::Frame;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("client disconnected")]
    Disconnected,
}

/// Where a stream session writes its frames
#[async_trait]
pub trait FrameSink: Send {
    /// Write one frame, waiting while the client's buffer is full
    async fn send(&mut self, frame: Frame) -> Result<(), SinkError>;
}

/// Sink feeding an SSE response body through a bounded channel
pub struct SseSink {
    sender: mpsc::Sender<Result<Event, Infallible>>,
}

#[async_trait]
impl FrameSink for SseSink {
    async fn send(&mut self, frame: Frame) -> Result<(), SinkError> {
        self.sender
            .send(Ok(frame.into_sse_event()))
            .await
            .map_err(|_| SinkError::Disconnected)
    }
}

/// Response body of one stream session
///
/// Dropping it (the HTTP layer does so when the client goes away) cancels
/// the session's token.
pub struct SessionStream {
    receiver: ReceiverStream<Result<Event, Infallible>>,
    _abort: DropGuard,
}

impl Stream for SessionStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().receiver).poll_next(cx)
    }
}

/// Creates the writer and reader halves of a session's SSE body
///
/// `cancel` is cancelled when the returned stream is dropped.
pub fn sse_channel(buffer: usize, cancel: &CancellationToken) -> (SseSink, SessionStream) {
    let (sender, receiver) = mpsc::channel(buffer.max(1));
    let stream = SessionStream {
        receiver: ReceiverStream::new(receiver),
        _abort: cancel.clone().drop_guard(),
    };
    (SseSink { sender }, stream)
}
