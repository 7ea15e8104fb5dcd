use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument, warn};

use iris_core::errors::TransportError;
use iris_core::transport::{ByteStream, ChatRequest, ChatTransport};
use iris_settings::BackendSettings;

use crate::chunks::ChunkStream;

/// Streams replies from the generation backend over HTTP.
pub struct HttpTransport {
    client: Client,
    url: String,
    connect_timeout: Duration,
    idle_timeout: Duration,
}

impl HttpTransport {
    pub fn new(settings: &BackendSettings) -> Result<Self, TransportError> {
        Self::with_url(
            settings.stream_url(),
            settings.connect_timeout(),
            settings.idle_timeout(),
        )
    }

    pub fn with_url(
        url: impl Into<String>,
        connect_timeout: Duration,
        idle_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let url = url.into();
        reqwest::Url::parse(&url)
            .map_err(|e| TransportError::InvalidRequest(format!("bad backend url {url}: {e}")))?;
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        Ok(Self {
            client,
            url,
            connect_timeout,
            idle_timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn map_send_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.connect_timeout)
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self, request), fields(url = %self.url, prompt_len = request.prompt.len()))]
    async fn open(&self, request: &ChatRequest) -> Result<ByteStream, TransportError> {
        // Headers must arrive within the idle window too; the body stream
        // only starts timing once they have.
        let send = self.client.post(&self.url).json(request).send();
        let resp = tokio::time::timeout(self.idle_timeout, send)
            .await
            .map_err(|_| {
                warn!(idle_timeout = ?self.idle_timeout, "no response headers from backend");
                TransportError::Timeout(self.idle_timeout)
            })?
            .map_err(|e| self.map_send_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "backend rejected stream request");
            return Err(TransportError::from_status(status.as_u16(), body));
        }
        if status == StatusCode::NO_CONTENT || status == StatusCode::RESET_CONTENT {
            return Err(TransportError::from_status(status.as_u16(), String::new()));
        }
        debug!(status = status.as_u16(), "stream opened");

        let body = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::StreamInterrupted(e.to_string())));
        Ok(Box::pin(ChunkStream::new(body, self.idle_timeout)))
    }
}
