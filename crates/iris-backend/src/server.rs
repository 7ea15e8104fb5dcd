use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use iris_settings::ServerSettings;

use crate::reply::{prompt_from_body, render_reply, reply_tokens};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    pub token_delay: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::from_settings(&ServerSettings::default())
    }
}

impl BackendConfig {
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            token_delay: Duration::from_millis(settings.token_delay_ms),
        }
    }
}

#[derive(Clone)]
struct AppState {
    token_delay: Duration,
}

/// Build the Axum router with all routes.
pub fn build_router(config: &BackendConfig) -> Router {
    let state = AppState {
        token_delay: config.token_delay,
    };
    Router::new()
        .route("/", get(root_handler))
        .route("/api/chat/stream", post(chat_stream_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind and start serving. Port 0 picks a free port.
pub async fn start(config: BackendConfig) -> Result<BackendHandle, std::io::Error> {
    let router = build_router(&config);
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let addr = listener.local_addr()?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone().cancelled_owned();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await
    });

    info!(%addr, "demo backend started");
    Ok(BackendHandle {
        addr,
        shutdown,
        server,
    })
}

/// Handle returned by `start()`. Dropping it leaves the server running.
pub struct BackendHandle {
    addr: SocketAddr,
    shutdown: CancellationToken,
    server: JoinHandle<Result<(), std::io::Error>>,
}

impl BackendHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop accepting connections and wait for in-flight ones to drain.
    pub async fn shutdown(self) -> Result<(), std::io::Error> {
        self.shutdown.cancel();
        match self.server.await {
            Ok(result) => result,
            Err(e) => Err(std::io::Error::other(e)),
        }
    }
}

async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "message": "IrisArc backend running 🚀",
    }))
}

async fn chat_stream_handler(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let prompt = prompt_from_body(&body);
    let tokens = reply_tokens(&render_reply(&prompt));
    debug!(prompt_len = prompt.len(), tokens = tokens.len(), "streaming reply");

    let delay = state.token_delay;
    let body = stream::iter(tokens.into_iter().enumerate()).then(move |(i, token)| async move {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok::<_, Infallible>(token)
    });

    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(body),
    )
}
