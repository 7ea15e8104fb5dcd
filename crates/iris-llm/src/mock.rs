use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use iris_core::errors::TransportError;
use iris_core::transport::{ByteStream, ChatRequest, ChatTransport};

/// Scripted replies for deterministic exchanges without a backend.
pub enum MockResponse {
    /// Yield these chunks, then end.
    Chunks(Vec<Bytes>),
    /// Yield these chunks, then fail mid-body.
    ChunksThenError(Vec<Bytes>, TransportError),
    /// Fail before any body arrives.
    Error(TransportError),
    /// Sleep before each chunk.
    Paced(Duration, Vec<Bytes>),
    /// Yield these chunks, then never finish.
    Hang(Vec<Bytes>),
    /// Chunks are fed by the test through the matching sender.
    Channel(mpsc::Receiver<Result<Bytes, TransportError>>),
    /// Wait, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn chunks(chunks: &[&str]) -> Self {
        Self::Chunks(to_bytes(chunks))
    }

    /// One chunk per whitespace-separated word, each followed by a space.
    pub fn words(text: &str) -> Self {
        Self::Chunks(
            text.split(' ')
                .map(|w| Bytes::from(format!("{w} ")))
                .collect(),
        )
    }

    pub fn chunks_then_error(chunks: &[&str], error: TransportError) -> Self {
        Self::ChunksThenError(to_bytes(chunks), error)
    }

    pub fn paced(every: Duration, chunks: &[&str]) -> Self {
        Self::Paced(every, to_bytes(chunks))
    }

    pub fn hang(chunks: &[&str]) -> Self {
        Self::Hang(to_bytes(chunks))
    }

    /// A response driven by the returned sender.
    pub fn channel() -> (mpsc::Sender<Result<Bytes, TransportError>>, Self) {
        let (tx, rx) = mpsc::channel(64);
        (tx, Self::Channel(rx))
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

fn to_bytes(chunks: &[&str]) -> Vec<Bytes> {
    chunks.iter().map(|c| Bytes::from(c.to_string())).collect()
}

/// Transport that replays scripted responses in order.
pub struct MockTransport {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<ChatRequest>>,
    call_count: AtomicUsize,
}

impl MockTransport {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, response: MockResponse) {
        self.responses.lock().push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Every request seen so far, oldest first.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.requests.lock().last().map(|r| r.prompt.clone())
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open(&self, request: &ChatRequest) -> Result<ByteStream, TransportError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let Some(mut current) = self.responses.lock().pop_front() else {
            return Err(TransportError::InvalidRequest(format!(
                "MockTransport: no response configured for call {idx}"
            )));
        };

        // Nested delays are unrolled iteratively.
        loop {
            match current {
                MockResponse::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
                MockResponse::Error(e) => return Err(e),
                MockResponse::Chunks(chunks) => {
                    let body = stream::iter(chunks.into_iter().map(Ok::<Bytes, TransportError>));
                    return Ok(Box::pin(body));
                }
                MockResponse::ChunksThenError(chunks, error) => {
                    let body = stream::iter(chunks.into_iter().map(Ok::<Bytes, TransportError>))
                        .chain(stream::once(async move { Err(error) }));
                    return Ok(Box::pin(body));
                }
                MockResponse::Paced(every, chunks) => {
                    let body = stream::iter(chunks).then(move |chunk| async move {
                        tokio::time::sleep(every).await;
                        Ok::<_, TransportError>(chunk)
                    });
                    return Ok(Box::pin(body));
                }
                MockResponse::Hang(chunks) => {
                    let body = stream::iter(chunks.into_iter().map(Ok::<Bytes, TransportError>))
                        .chain(stream::pending());
                    return Ok(Box::pin(body));
                }
                MockResponse::Channel(rx) => return Ok(Box::pin(ReceiverStream::new(rx))),
            }
        }
    }
}
