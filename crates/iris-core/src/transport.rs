use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::errors::TransportError;

/// Body of the outbound generation request.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatRequest {
    pub prompt: String,
}

impl ChatRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self { prompt: prompt.into() }
    }
}

/// Incrementally readable response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Opens one generation exchange with the backend.
///
/// `open` resolves once the response head is in: a non-2xx status or a
/// body-less response is an `Err`. Body chunks arrive through the stream.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    fn name(&self) -> &str;

    async fn open(&self, request: &ChatRequest) -> Result<ByteStream, TransportError>;
}
