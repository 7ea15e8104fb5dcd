//! Drives the session engine against the demo backend over real HTTP.

use std::sync::Arc;
use std::time::Duration;

use iris_backend::{render_reply, BackendConfig, BackendHandle, NO_PROMPT};
use iris_core::{ExchangeOutcome, Role, SessionEvent};
use iris_engine::{EngineConfig, SessionEngine};
use iris_llm::HttpTransport;
use iris_settings::SessionSettings;
use iris_store::EntityStore;

async fn backend(token_delay: Duration) -> BackendHandle {
    iris_backend::start(BackendConfig {
        host: "127.0.0.1".into(),
        port: 0,
        token_delay,
    })
    .await
    .unwrap()
}

fn engine_for(handle: &BackendHandle) -> SessionEngine {
    let transport = HttpTransport::with_url(
        format!("{}/api/chat/stream", handle.base_url()),
        Duration::from_secs(5),
        Duration::from_secs(5),
    )
    .unwrap();
    SessionEngine::new(
        EntityStore::seeded(&SessionSettings::default()),
        Arc::new(transport),
        EngineConfig::default(),
    )
}

fn last_text(engine: &SessionEngine) -> (Role, String) {
    let tid = engine.store().current_thread_id().unwrap();
    let last = engine.store().messages(&tid).pop().unwrap();
    (last.role, last.text_content())
}

#[tokio::test]
async fn full_reply_lands_in_assistant_message() {
    let server = backend(Duration::ZERO).await;
    let engine = engine_for(&server);
    let mut events = engine.subscribe();

    let handle = engine.send("hello iris").unwrap();
    assert_eq!(handle.wait().await, ExchangeOutcome::Completed);
    assert!(!engine.is_streaming());

    let (role, text) = last_text(&engine);
    assert_eq!(role, Role::Assistant);
    assert_eq!(text, format!("{} ", render_reply("hello iris")));

    let mut saw_progress = false;
    let mut saw_finish = false;
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::TokenProgress { batch, .. } => {
                assert_eq!(batch, 8);
                saw_progress = true;
            }
            SessionEvent::ExchangeFinished { .. } => saw_finish = true,
            _ => {}
        }
    }
    assert!(saw_progress);
    assert!(saw_finish);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn stop_mid_stream_keeps_prefix() {
    let server = backend(Duration::from_millis(20)).await;
    let engine = engine_for(&server);
    let mut events = engine.subscribe();

    let handle = engine.send("slow please").unwrap();
    loop {
        if let SessionEvent::ContentUpdated { .. } = events.recv().await.unwrap() {
            break;
        }
    }
    assert!(engine.stop());
    assert!(!engine.is_streaming());
    assert_eq!(handle.wait().await, ExchangeOutcome::Cancelled);

    let (role, text) = last_text(&engine);
    assert_eq!(role, Role::Assistant);
    let full = format!("{} ", render_reply("slow please"));
    assert!(!text.is_empty());
    assert!(full.starts_with(&text));
    assert!(text.len() < full.len());

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn edit_restreams_with_new_prompt() {
    let server = backend(Duration::ZERO).await;
    let engine = engine_for(&server);

    engine.send("first").unwrap().wait().await;
    let tid = engine.store().current_thread_id().unwrap();
    let user_id = engine.store().messages(&tid)[1].id.clone();

    let handle = engine.edit_message(&user_id, "second").unwrap().unwrap();
    assert_eq!(handle.wait().await, ExchangeOutcome::Completed);

    let messages = engine.store().messages(&tid);
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].text_content(), "second");
    assert!(messages[2].text_content().contains("**You said:** second"));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn regenerate_reuses_last_user_prompt() {
    let server = backend(Duration::ZERO).await;
    let engine = engine_for(&server);

    engine.send("   ").err().unwrap();
    engine.send("ping").unwrap().wait().await;
    let handle = engine.regenerate_last().unwrap().unwrap();
    assert_eq!(handle.wait().await, ExchangeOutcome::Completed);

    let (role, text) = last_text(&engine);
    assert_eq!(role, Role::Assistant);
    assert!(text.contains("**You said:** ping"));
    assert!(!text.contains(NO_PROMPT));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn unreachable_backend_appends_notice() {
    let server = backend(Duration::ZERO).await;
    let engine = engine_for(&server);
    server.shutdown().await.unwrap();

    let handle = engine.send("anyone there?").unwrap();
    assert!(matches!(handle.wait().await, ExchangeOutcome::Failed { .. }));

    let tid = engine.store().current_thread_id().unwrap();
    let messages = engine.store().messages(&tid);
    let reply = &messages[messages.len() - 2];
    assert_eq!(reply.role, Role::Assistant);
    assert!(reply.truncated);
    assert_eq!(
        last_text(&engine),
        (Role::System, SessionSettings::default().connection_error_notice)
    );
}
