use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use iris_core::errors::TransportError;
use iris_core::events::{ExchangeOutcome, SessionEvent};
use iris_core::ids::{ExchangeId, MessageId, ThreadId};
use iris_core::messages::Message;
use iris_core::transport::{ChatRequest, ChatTransport};
use iris_llm::Utf8ChunkDecoder;
use iris_store::EntityStore;

use crate::error::EngineError;

pub const DEFAULT_BATCH_SIZE: usize = 8;
pub const DEFAULT_ERROR_NOTICE: &str = "⚠️ Connection error. Please retry.";

/// Caller-side view of one exchange. Clones share the same cancellation
/// token and outcome.
#[derive(Clone, Debug)]
pub struct StreamHandle {
    pub exchange_id: ExchangeId,
    pub thread_id: ThreadId,
    pub message_id: MessageId,
    cancel: CancellationToken,
    outcome: watch::Receiver<Option<ExchangeOutcome>>,
}

impl StreamHandle {
    /// Ask the exchange to stop. Text already written stays.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// Wait for the terminal outcome.
    pub async fn wait(&self) -> ExchangeOutcome {
        let mut rx = self.outcome.clone();
        let _ = rx.wait_for(Option::is_some).await;
        let settled = rx.borrow().clone();
        settled.unwrap_or_else(|| ExchangeOutcome::Failed {
            error: "exchange task ended without an outcome".into(),
        })
    }
}

/// Read-only snapshot of the global stream state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    pub is_streaming: bool,
    pub current_assistant_message_id: Option<MessageId>,
    pub thread_id: Option<ThreadId>,
}

#[derive(Default)]
struct StreamState {
    active: Option<StreamHandle>,
}

/// Drives at most one generation exchange across the whole session.
pub struct StreamController {
    store: EntityStore,
    transport: Arc<dyn ChatTransport>,
    batch_size: usize,
    error_notice: String,
    state: Arc<Mutex<StreamState>>,
    events: broadcast::Sender<SessionEvent>,
}

impl StreamController {
    pub fn new(
        store: EntityStore,
        transport: Arc<dyn ChatTransport>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            store,
            transport,
            batch_size: DEFAULT_BATCH_SIZE,
            error_notice: DEFAULT_ERROR_NOTICE.to_string(),
            state: Arc::new(Mutex::new(StreamState::default())),
            events,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_error_notice(mut self, notice: impl Into<String>) -> Self {
        self.error_notice = notice.into();
        self
    }

    /// Start streaming a reply into a fresh assistant message.
    ///
    /// While another exchange is active this returns that exchange's handle
    /// and starts nothing. Must be called from within a tokio runtime.
    #[instrument(skip(self, prompt), fields(thread_id = %thread_id))]
    pub fn start_exchange(&self, thread_id: &ThreadId, prompt: &str) -> Result<StreamHandle, EngineError> {
        let runtime = require_runtime()?;

        let mut state = self.state.lock();
        if let Some(active) = &state.active {
            debug!(exchange_id = %active.exchange_id, "exchange already active");
            return Ok(active.clone());
        }

        let placeholder = Message::assistant_text(thread_id.clone(), "");
        let message_id = self.store.append_message(thread_id, placeholder)?;
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let handle = StreamHandle {
            exchange_id: ExchangeId::new(),
            thread_id: thread_id.clone(),
            message_id,
            cancel: CancellationToken::new(),
            outcome: outcome_rx,
        };
        state.active = Some(handle.clone());
        drop(state);

        emit(
            &self.events,
            SessionEvent::ExchangeStarted {
                exchange_id: handle.exchange_id.clone(),
                thread_id: handle.thread_id.clone(),
                message_id: handle.message_id.clone(),
            },
        );

        let exchange = Exchange {
            store: self.store.clone(),
            transport: Arc::clone(&self.transport),
            events: self.events.clone(),
            state: Arc::clone(&self.state),
            batch_size: self.batch_size,
            error_notice: self.error_notice.clone(),
            handle: handle.clone(),
            outcome_tx,
        };
        let _ = runtime.spawn(exchange.run(prompt.to_string()));
        Ok(handle)
    }

    /// Cancel the active exchange, if any, and clear the stream state.
    pub fn stop(&self) -> bool {
        let active = self.state.lock().active.take();
        match active {
            Some(handle) => {
                info!(exchange_id = %handle.exchange_id, "stopping exchange");
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.state.lock().active.is_some()
    }

    pub fn active_handle(&self) -> Option<StreamHandle> {
        self.state.lock().active.clone()
    }

    pub fn status(&self) -> StreamStatus {
        let state = self.state.lock();
        match &state.active {
            Some(h) => StreamStatus {
                is_streaming: true,
                current_assistant_message_id: Some(h.message_id.clone()),
                thread_id: Some(h.thread_id.clone()),
            },
            None => StreamStatus::default(),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

/// The runtime exchanges are spawned on. Callers that mutate history before
/// starting an exchange check this first so a failed start changes nothing.
pub(crate) fn require_runtime() -> Result<tokio::runtime::Handle, EngineError> {
    tokio::runtime::Handle::try_current().map_err(|_| EngineError::NoRuntime)
}

fn emit(events: &broadcast::Sender<SessionEvent>, event: SessionEvent) {
    // Nobody listening is fine.
    let _ = events.send(event);
}

/// Running whitespace-token count that reports batch boundary crossings.
#[derive(Debug)]
struct TokenCounter {
    count: usize,
    batch: usize,
}

impl TokenCounter {
    fn new(batch: usize) -> Self {
        Self {
            count: 0,
            batch: batch.max(1),
        }
    }

    /// Returns the new count when this chunk crossed a multiple of the batch.
    fn advance(&mut self, chunk: &str) -> Option<usize> {
        let before = self.count;
        self.count += chunk.split_whitespace().count();
        (self.count / self.batch > before / self.batch).then_some(self.count)
    }
}

/// State owned by the spawned task of one exchange.
struct Exchange {
    store: EntityStore,
    transport: Arc<dyn ChatTransport>,
    events: broadcast::Sender<SessionEvent>,
    state: Arc<Mutex<StreamState>>,
    batch_size: usize,
    error_notice: String,
    handle: StreamHandle,
    outcome_tx: watch::Sender<Option<ExchangeOutcome>>,
}

impl Exchange {
    #[instrument(
        name = "exchange",
        skip_all,
        fields(
            exchange_id = %self.handle.exchange_id,
            thread_id = %self.handle.thread_id,
            transport = self.transport.name(),
        )
    )]
    async fn run(self, prompt: String) {
        let outcome = self.drive(prompt).await;
        info!(outcome = outcome.as_str(), "exchange finished");
        self.finish(outcome);
    }

    async fn drive(&self, prompt: String) -> ExchangeOutcome {
        let cancel = &self.handle.cancel;
        let request = ChatRequest::new(prompt);

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ExchangeOutcome::Cancelled,
            opened = self.transport.open(&request) => opened,
        };
        let mut body = match opened {
            Ok(body) => body,
            Err(e) => return self.fail(e),
        };

        let mut decoder = Utf8ChunkDecoder::new();
        let mut buffer = String::new();
        let mut tokens = TokenCounter::new(self.batch_size);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return ExchangeOutcome::Cancelled,
                next = body.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    let text = decoder.decode(&chunk);
                    if text.is_empty() {
                        continue;
                    }
                    buffer.push_str(&text);
                    self.write_buffer(&buffer);
                    if let Some(index) = tokens.advance(&text) {
                        emit(
                            &self.events,
                            SessionEvent::TokenProgress {
                                index,
                                batch: self.batch_size,
                            },
                        );
                    }
                }
                Some(Err(e)) => return self.fail(e),
                None => {
                    let tail = decoder.finish();
                    if !tail.is_empty() {
                        buffer.push_str(&tail);
                        self.write_buffer(&buffer);
                    }
                    return ExchangeOutcome::Completed;
                }
            }
        }
    }

    /// Last-write-wins: the whole buffer replaces the message text.
    fn write_buffer(&self, buffer: &str) {
        let h = &self.handle;
        if self.store.replace_message_text(&h.thread_id, &h.message_id, buffer) {
            emit(
                &self.events,
                SessionEvent::ContentUpdated {
                    thread_id: h.thread_id.clone(),
                    message_id: h.message_id.clone(),
                    length: buffer.len(),
                },
            );
        }
    }

    fn fail(&self, error: TransportError) -> ExchangeOutcome {
        if error.is_cancelled() {
            return ExchangeOutcome::Cancelled;
        }
        warn!(error_kind = error.error_kind(), error = %error, "transport failure");

        let h = &self.handle;
        if self.store.mark_truncated(&h.thread_id, &h.message_id).is_err() {
            debug!(message_id = %h.message_id, "assistant message removed before failure");
        }
        let notice = Message::system_text(h.thread_id.clone(), &self.error_notice);
        if let Err(e) = self.store.append_message(&h.thread_id, notice) {
            warn!(error = %e, "could not append error notice");
        }
        ExchangeOutcome::Failed {
            error: error.to_string(),
        }
    }

    fn finish(self, outcome: ExchangeOutcome) {
        {
            let mut state = self.state.lock();
            let still_ours = state
                .active
                .as_ref()
                .is_some_and(|a| a.exchange_id == self.handle.exchange_id);
            if still_ours {
                state.active = None;
            }
        }
        emit(
            &self.events,
            SessionEvent::ExchangeFinished {
                exchange_id: self.handle.exchange_id.clone(),
                thread_id: self.handle.thread_id.clone(),
                message_id: self.handle.message_id.clone(),
                outcome: outcome.clone(),
            },
        );
        self.outcome_tx.send_replace(Some(outcome));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::Bytes;
    use iris_core::Role;
    use iris_llm::{MockResponse, MockTransport};

    struct Fixture {
        store: EntityStore,
        thread: ThreadId,
        transport: Arc<MockTransport>,
        controller: StreamController,
        events: broadcast::Receiver<SessionEvent>,
    }

    fn fixture(responses: Vec<MockResponse>) -> Fixture {
        let store = EntityStore::new();
        let thread = store.create_thread("New chat", None);
        let transport = Arc::new(MockTransport::new(responses));
        let (tx, events) = broadcast::channel(256);
        let controller = StreamController::new(store.clone(), transport.clone(), tx);
        Fixture {
            store,
            thread,
            transport,
            controller,
            events,
        }
    }

    fn text_of(store: &EntityStore, id: &MessageId) -> String {
        store.read(|s| s.message(id).map(Message::text_content).unwrap_or_default())
    }

    fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(evt) = rx.try_recv() {
            out.push(evt);
        }
        out
    }

    async fn next_content_update(rx: &mut broadcast::Receiver<SessionEvent>) {
        loop {
            if let SessionEvent::ContentUpdated { .. } = rx.recv().await.unwrap() {
                return;
            }
        }
    }

    #[tokio::test]
    async fn streams_chunks_into_assistant_message() {
        let mut f = fixture(vec![MockResponse::chunks(&["Hel", "lo ", "world"])]);
        let handle = f.controller.start_exchange(&f.thread, "hi").unwrap();
        assert!(f.controller.is_streaming());
        assert_eq!(
            f.controller.status().current_assistant_message_id,
            Some(handle.message_id.clone())
        );

        assert_eq!(handle.wait().await, ExchangeOutcome::Completed);
        assert!(!f.controller.is_streaming());
        assert_eq!(text_of(&f.store, &handle.message_id), "Hello world");
        assert_eq!(f.transport.last_prompt().as_deref(), Some("hi"));

        let lengths: Vec<usize> = drain(&mut f.events)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::ContentUpdated { length, .. } => Some(length),
                _ => None,
            })
            .collect();
        assert_eq!(lengths, vec![3, 6, 11]);
    }

    #[tokio::test]
    async fn event_order_is_started_updates_finished() {
        let mut f = fixture(vec![MockResponse::chunks(&["a"])]);
        let handle = f.controller.start_exchange(&f.thread, "x").unwrap();
        handle.wait().await;
        let kinds: Vec<_> = drain(&mut f.events).iter().map(|e| e.event_type()).collect();
        assert_eq!(kinds, vec!["exchange_started", "content_updated", "exchange_finished"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_starts_share_one_exchange() {
        const CALLERS: usize = 32;
        let f = fixture(vec![MockResponse::hang(&["busy "])]);
        let controller = Arc::new(f.controller);
        let barrier = Arc::new(tokio::sync::Barrier::new(CALLERS));

        let tasks: Vec<_> = (0..CALLERS)
            .map(|_| {
                let controller = Arc::clone(&controller);
                let barrier = Arc::clone(&barrier);
                let thread = f.thread.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    controller.start_exchange(&thread, "race").unwrap()
                })
            })
            .collect();

        let mut exchange_ids = std::collections::HashSet::new();
        let mut message_ids = std::collections::HashSet::new();
        for task in tasks {
            let handle = task.await.unwrap();
            exchange_ids.insert(handle.exchange_id);
            message_ids.insert(handle.message_id);
        }
        assert_eq!(exchange_ids.len(), 1);
        assert_eq!(message_ids.len(), 1);

        let placeholders = f
            .store
            .messages(&f.thread)
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .count();
        assert_eq!(placeholders, 1);
        assert!(f.transport.call_count() <= 1);

        assert!(controller.stop());
        assert!(!controller.is_streaming());
    }

    #[tokio::test]
    async fn second_start_returns_active_handle() {
        let mut f = fixture(vec![MockResponse::hang(&["partial"])]);
        let first = f.controller.start_exchange(&f.thread, "one").unwrap();
        let second = f.controller.start_exchange(&f.thread, "two").unwrap();
        assert_eq!(first.exchange_id, second.exchange_id);

        next_content_update(&mut f.events).await;
        assert_eq!(f.transport.call_count(), 1);
        let assistants = f
            .store
            .messages(&f.thread)
            .iter()
            .filter(|m| m.is_assistant())
            .count();
        assert_eq!(assistants, 1);

        assert!(f.controller.stop());
        assert_eq!(first.wait().await, ExchangeOutcome::Cancelled);
    }

    #[tokio::test]
    async fn stop_keeps_partial_text_unmarked() {
        let (tx, response) = MockResponse::channel();
        let mut f = fixture(vec![response]);
        let handle = f.controller.start_exchange(&f.thread, "go").unwrap();

        tx.send(Ok(Bytes::from("partial answer"))).await.unwrap();
        next_content_update(&mut f.events).await;

        assert!(f.controller.stop());
        assert!(!f.controller.is_streaming());
        tx.send(Ok(Bytes::from(" never written"))).await.ok();

        assert_eq!(handle.wait().await, ExchangeOutcome::Cancelled);
        let msgs = f.store.messages(&f.thread);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].text_content(), "partial answer");
        assert!(!msgs[0].truncated);
    }

    #[tokio::test]
    async fn stop_before_any_chunk_leaves_empty_text() {
        let f = fixture(vec![MockResponse::hang(&[])]);
        let handle = f.controller.start_exchange(&f.thread, "go").unwrap();
        f.controller.stop();
        assert_eq!(handle.wait().await, ExchangeOutcome::Cancelled);
        assert_eq!(text_of(&f.store, &handle.message_id), "");
    }

    #[tokio::test]
    async fn cancel_while_opening() {
        tokio::time::pause();
        let f = fixture(vec![MockResponse::delayed(
            Duration::from_secs(30),
            MockResponse::chunks(&["late"]),
        )]);
        let handle = f.controller.start_exchange(&f.thread, "go").unwrap();
        handle.cancel();
        assert_eq!(handle.wait().await, ExchangeOutcome::Cancelled);
        assert_eq!(text_of(&f.store, &handle.message_id), "");
        assert!(!f.controller.is_streaming());
    }

    #[tokio::test]
    async fn mid_stream_failure_marks_truncated_and_appends_notice() {
        let f = fixture(vec![MockResponse::chunks_then_error(
            &["half an "],
            TransportError::StreamInterrupted("connection reset".into()),
        )]);
        let handle = f.controller.start_exchange(&f.thread, "go").unwrap();
        let outcome = handle.wait().await;
        assert!(matches!(outcome, ExchangeOutcome::Failed { ref error } if error.contains("connection reset")));

        let msgs = f.store.messages(&f.thread);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].text_content(), "half an ");
        assert!(msgs[0].truncated);
        assert_eq!(msgs[1].role, Role::System);
        assert_eq!(msgs[1].text_content(), DEFAULT_ERROR_NOTICE);
        assert!(!f.controller.is_streaming());
    }

    #[tokio::test]
    async fn open_failure_appends_notice() {
        let f = fixture(vec![MockResponse::Error(TransportError::Http {
            status: 500,
            body: "boom".into(),
        })]);
        let f = Fixture {
            controller: f.controller.with_error_notice("backend down"),
            ..f
        };
        let handle = f.controller.start_exchange(&f.thread, "go").unwrap();
        assert!(matches!(handle.wait().await, ExchangeOutcome::Failed { .. }));
        let msgs = f.store.messages(&f.thread);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].text_content(), "");
        assert_eq!(msgs[1].text_content(), "backend down");
    }

    #[tokio::test]
    async fn idle_timeout_surfaces_as_failure() {
        let f = fixture(vec![MockResponse::chunks_then_error(
            &["slow "],
            TransportError::Timeout(Duration::from_secs(90)),
        )]);
        let handle = f.controller.start_exchange(&f.thread, "go").unwrap();
        assert!(matches!(handle.wait().await, ExchangeOutcome::Failed { .. }));
        assert_eq!(f.store.messages(&f.thread).len(), 2);
    }

    #[tokio::test]
    async fn cancelled_transport_error_is_not_a_failure() {
        let f = fixture(vec![MockResponse::Error(TransportError::Cancelled)]);
        let handle = f.controller.start_exchange(&f.thread, "go").unwrap();
        assert_eq!(handle.wait().await, ExchangeOutcome::Cancelled);
        assert_eq!(f.store.messages(&f.thread).len(), 1);
    }

    #[tokio::test]
    async fn progress_fires_on_batch_crossings() {
        let words: Vec<String> = (0..20).map(|i| format!("w{i} ")).collect();
        let refs: Vec<&str> = words.iter().map(String::as_str).collect();
        let mut f = fixture(vec![MockResponse::chunks(&refs)]);
        let handle = f.controller.start_exchange(&f.thread, "go").unwrap();
        handle.wait().await;

        let progress: Vec<(usize, usize)> = drain(&mut f.events)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::TokenProgress { index, batch } => Some((index, batch)),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![(8, 8), (16, 8)]);
    }

    #[tokio::test]
    async fn custom_batch_size() {
        let f = fixture(vec![MockResponse::chunks(&["a b c", " d e f g"])]);
        let mut f = Fixture {
            controller: f.controller.with_batch_size(3),
            ..f
        };
        assert_eq!(f.controller.batch_size(), 3);
        let handle = f.controller.start_exchange(&f.thread, "go").unwrap();
        handle.wait().await;
        let indices: Vec<usize> = drain(&mut f.events)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::TokenProgress { index, .. } => Some(index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, vec![3, 7]);
    }

    #[tokio::test]
    async fn split_utf8_and_carriage_returns() {
        let bytes = "naïve\r\nline".as_bytes();
        let cut = 3;
        let f = fixture(vec![MockResponse::Chunks(vec![
            Bytes::copy_from_slice(&bytes[..cut]),
            Bytes::copy_from_slice(&bytes[cut..]),
        ])]);
        let handle = f.controller.start_exchange(&f.thread, "go").unwrap();
        handle.wait().await;
        assert_eq!(text_of(&f.store, &handle.message_id), "naïve\nline");
    }

    #[tokio::test]
    async fn message_deleted_mid_stream_is_tolerated() {
        let (tx, response) = MockResponse::channel();
        let mut f = fixture(vec![response]);
        let handle = f.controller.start_exchange(&f.thread, "go").unwrap();
        tx.send(Ok(Bytes::from("one "))).await.unwrap();
        next_content_update(&mut f.events).await;

        assert!(f.store.remove_message(&f.thread, &handle.message_id));
        tx.send(Ok(Bytes::from("two"))).await.unwrap();
        drop(tx);

        assert_eq!(handle.wait().await, ExchangeOutcome::Completed);
        assert!(f.store.messages(&f.thread).is_empty());
    }

    #[tokio::test]
    async fn stop_when_idle_is_harmless() {
        let f = fixture(vec![]);
        assert!(!f.controller.stop());
        assert_eq!(f.controller.status(), StreamStatus::default());
    }

    #[tokio::test]
    async fn finished_old_exchange_does_not_clear_new_one() {
        // The first exchange is cancelled before its task first runs, so it
        // never opens a request and the only scripted response is the second's.
        let (tx, second_response) = MockResponse::channel();
        let f = fixture(vec![second_response]);

        let first = f.controller.start_exchange(&f.thread, "one").unwrap();
        f.controller.stop();
        let second = f.controller.start_exchange(&f.thread, "two").unwrap();
        assert_ne!(first.exchange_id, second.exchange_id);

        assert_eq!(first.wait().await, ExchangeOutcome::Cancelled);
        assert_eq!(
            f.controller.status().current_assistant_message_id,
            Some(second.message_id.clone())
        );

        drop(tx);
        assert_eq!(second.wait().await, ExchangeOutcome::Completed);
        assert!(!f.controller.is_streaming());
    }

    #[tokio::test]
    async fn unknown_thread_is_an_error() {
        let f = fixture(vec![]);
        let err = f.controller.start_exchange(&ThreadId::new(), "x").unwrap_err();
        assert!(matches!(err, EngineError::Store(_)));
        assert!(!f.controller.is_streaming());
    }

    #[test]
    fn start_outside_runtime_is_an_error() {
        let f = fixture(vec![]);
        let err = f.controller.start_exchange(&f.thread, "x").unwrap_err();
        assert!(matches!(err, EngineError::NoRuntime));
        assert!(f.store.messages(&f.thread).is_empty());
    }

    #[test]
    fn token_counter_crossings() {
        let mut c = TokenCounter::new(8);
        assert_eq!(c.advance("one two three"), None);
        assert_eq!(c.advance("four five six seven"), None);
        assert_eq!(c.advance(" eight nine"), Some(9));
        assert_eq!(c.advance("   "), None);
        assert_eq!(c.advance("a b c d e f g h i j"), Some(19));
    }

    #[test]
    fn zero_batch_is_clamped() {
        let mut c = TokenCounter::new(0);
        assert_eq!(c.advance("x"), Some(1));
    }
}
