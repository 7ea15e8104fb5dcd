use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, instrument};

use iris_core::attachments::{attachments_from_files, FileInfo};
use iris_core::entities::Attachment;
use iris_core::events::SessionEvent;
use iris_core::ids::{AttachmentId, MessageId, ProjectId, ThreadId};
use iris_core::messages::{Message, MessagePart, Role};
use iris_core::transport::ChatTransport;
use iris_settings::{IrisSettings, SessionSettings};
use iris_store::{EntityStore, StoreState};

use crate::error::EngineError;
use crate::search::{self, SearchHit};
use crate::stream::{require_runtime, StreamController, StreamHandle, StreamStatus, DEFAULT_BATCH_SIZE};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub batch_size: usize,
    pub session: SessionSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            session: SessionSettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_settings(settings: &IrisSettings) -> Self {
        Self {
            batch_size: settings.stream.batch_size,
            session: settings.session.clone(),
        }
    }
}

/// Public operations of a chat session.
///
/// Validation no-ops (editing a non-user message, regenerating a non-assistant
/// one, unknown ids) return `Ok(None)`, `false` or `0` and leave state as it
/// was.
pub struct SessionEngine {
    store: EntityStore,
    stream: StreamController,
    events: broadcast::Sender<SessionEvent>,
    config: EngineConfig,
}

impl SessionEngine {
    pub fn new(store: EntityStore, transport: Arc<dyn ChatTransport>, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let stream = StreamController::new(store.clone(), transport, events.clone())
            .with_batch_size(config.batch_size)
            .with_error_notice(config.session.connection_error_notice.clone());
        Self {
            store,
            stream,
            events,
            config,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn snapshot(&self) -> StoreState {
        self.store.snapshot()
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_streaming()
    }

    pub fn stream_status(&self) -> StreamStatus {
        self.stream.status()
    }

    pub fn active_stream(&self) -> Option<StreamHandle> {
        self.stream.active_handle()
    }

    // ── Exchanges ───────────────────────────────────────────────────────

    /// Append a user message (with staged drafts as attachment parts) to the
    /// current thread, clear the drafts and start an exchange seeded with
    /// `text`.
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    pub fn send(&self, text: &str) -> Result<StreamHandle, EngineError> {
        require_runtime()?;
        let thread_id = self.store.current_thread_id().ok_or(EngineError::NoCurrentThread)?;
        if text.trim().is_empty() && self.store.draft_count() == 0 {
            return Err(EngineError::EmptyMessage);
        }

        let drafts = self.store.take_draft_files();
        let mut parts = vec![MessagePart::text(text)];
        parts.extend(drafts.into_iter().map(|a| MessagePart::Attachment { attachment_id: a.id }));
        let message = Message::new(thread_id.clone(), Role::User, parts);
        let message_id = self.store.append_message(&thread_id, message)?;
        debug!(thread_id = %thread_id, message_id = %message_id, "user message appended");

        self.stream.start_exchange(&thread_id, text)
    }

    /// Rewrite a user message, drop everything after it and stream a fresh
    /// reply seeded with `new_text`.
    #[instrument(skip(self, new_text), fields(message_id = %message_id))]
    pub fn edit_message(&self, message_id: &MessageId, new_text: &str) -> Result<Option<StreamHandle>, EngineError> {
        require_runtime()?;
        let Some((thread_id, role)) = self.locate(message_id) else {
            debug!("edit target not found");
            return Ok(None);
        };
        if role != Role::User {
            debug!(?role, "edit target is not a user message");
            return Ok(None);
        }

        if !self.store.edit_message_text(&thread_id, message_id, new_text) {
            return Ok(None);
        }
        let removed = self.store.truncate_after(&thread_id, message_id);
        info!(thread_id = %thread_id, removed, "conversation forked at edited message");

        self.stream.start_exchange(&thread_id, new_text).map(Some)
    }

    /// Drop an assistant message and everything after it, then stream a
    /// replacement seeded with the last user message before it.
    #[instrument(skip(self), fields(message_id = %message_id))]
    pub fn regenerate_message(&self, message_id: &MessageId) -> Result<Option<StreamHandle>, EngineError> {
        require_runtime()?;
        let Some((thread_id, role)) = self.locate(message_id) else {
            debug!("regenerate target not found");
            return Ok(None);
        };
        if role != Role::Assistant {
            debug!(?role, "regenerate target is not an assistant message");
            return Ok(None);
        }

        let removed = self.store.truncate_from(&thread_id, message_id);
        let prompt = self.store.read(|s| {
            s.messages(&thread_id)
                .iter()
                .rev()
                .find(|m| m.is_user())
                .map(Message::text_content)
                .unwrap_or_default()
        });
        info!(thread_id = %thread_id, removed, "regenerating reply");

        self.stream.start_exchange(&thread_id, &prompt).map(Some)
    }

    /// Regenerate the most recent assistant message of the current thread.
    pub fn regenerate_last(&self) -> Result<Option<StreamHandle>, EngineError> {
        let Some(thread_id) = self.store.current_thread_id() else {
            return Ok(None);
        };
        let last = self.store.read(|s| {
            s.messages(&thread_id)
                .iter()
                .rev()
                .find(|m| m.is_assistant())
                .map(|m| m.id.clone())
        });
        match last {
            Some(id) => self.regenerate_message(&id),
            None => Ok(None),
        }
    }

    /// Remove exactly one message.
    pub fn delete_message(&self, message_id: &MessageId) -> bool {
        match self.locate(message_id) {
            Some((thread_id, _)) => self.store.remove_message(&thread_id, message_id),
            None => false,
        }
    }

    /// Remove a message and everything after it. Returns how many went.
    pub fn delete_from_here(&self, message_id: &MessageId) -> usize {
        match self.locate(message_id) {
            Some((thread_id, _)) => self.store.truncate_from(&thread_id, message_id),
            None => 0,
        }
    }

    /// Cancel the active exchange. Always leaves the stream state idle.
    pub fn stop(&self) -> bool {
        self.stream.stop()
    }

    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        self.store.read(|s| search::search(s, query))
    }

    // ── Threads and projects ────────────────────────────────────────────

    pub fn new_thread(&self, project_id: Option<ProjectId>) -> ThreadId {
        self.store
            .create_thread(&self.config.session.default_thread_title, project_id)
    }

    pub fn set_current_thread(&self, thread_id: &ThreadId) -> Result<(), EngineError> {
        Ok(self.store.set_current_thread(thread_id)?)
    }

    pub fn create_project(&self, name: &str) -> ProjectId {
        self.store.create_project(name)
    }

    pub fn rename_project(&self, project_id: &ProjectId, name: &str) -> Result<(), EngineError> {
        Ok(self.store.rename_project(project_id, name)?)
    }

    pub fn delete_project(&self, project_id: &ProjectId) -> Result<usize, EngineError> {
        Ok(self.store.delete_project(project_id)?)
    }

    pub fn assign_thread_to_project(
        &self,
        thread_id: &ThreadId,
        project_id: Option<&ProjectId>,
    ) -> Result<(), EngineError> {
        Ok(self.store.assign_thread_to_project(thread_id, project_id)?)
    }

    pub fn set_project_filter(&self, project_id: Option<&ProjectId>) -> Result<(), EngineError> {
        Ok(self.store.set_project_filter(project_id)?)
    }

    // ── Draft attachments ───────────────────────────────────────────────

    /// Stage picked files, within the remaining draft room. Returns the
    /// attachments actually added.
    pub fn add_draft_files(&self, files: &[FileInfo]) -> Vec<Attachment> {
        let accepted = attachments_from_files(
            files,
            self.store.draft_count(),
            self.config.session.max_draft_files,
        );
        if accepted.len() < files.len() {
            debug!(offered = files.len(), accepted = accepted.len(), "some files were not staged");
        }
        self.store.add_draft_files(accepted.clone());
        accepted
    }

    pub fn remove_draft_file(&self, id: &AttachmentId) -> bool {
        self.store.remove_draft_file(id)
    }

    pub fn draft_files(&self) -> Vec<Attachment> {
        self.store.draft_files()
    }

    fn locate(&self, message_id: &MessageId) -> Option<(ThreadId, Role)> {
        self.store.read(|s| {
            let (thread_id, idx) = s.locate_message(message_id)?;
            let role = s.messages(&thread_id).get(idx)?.role;
            Some((thread_id, role))
        })
    }
}
