use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;

use iris_core::errors::TransportError;

/// Body chunk stream with an idle timeout.
///
/// If no chunk arrives within `idle_duration` the stream yields
/// `TransportError::Timeout` and ends. Any error ends the stream.
pub struct ChunkStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
    done: bool,
}

impl ChunkStream {
    pub fn new(
        inner: impl Stream<Item = Result<Bytes, TransportError>> + Send + 'static,
        idle_duration: Duration,
    ) -> Self {
        Self {
            inner: Box::pin(inner),
            idle_deadline: Box::pin(tokio::time::sleep(idle_duration)),
            idle_duration,
            done: false,
        }
    }
}

impl Stream for ChunkStream {
    type Item = Result<Bytes, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let next = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(next);
                    if bytes.is_empty() {
                        continue;
                    }
                    return Poll::Ready(Some(Ok(bytes)));
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => {
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        self.done = true;
                        let idle = self.idle_duration;
                        return Poll::Ready(Some(Err(TransportError::Timeout(idle))));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}
