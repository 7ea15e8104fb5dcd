use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, instrument};

use iris_core::entities::{Project, Thread};
use iris_core::ids::{MessageId, ProjectId, ThreadId};
use iris_core::messages::{Message, MessagePart};
use iris_settings::SessionSettings;

use crate::error::StoreError;
use crate::state::StoreState;

/// Thread-safe handle to the session's entity collections.
///
/// Cloning shares the same state. Locks are never held across an await.
#[derive(Clone, Default)]
pub struct EntityStore {
    state: Arc<RwLock<StoreState>>,
}

impl EntityStore {
    /// An empty store with no current thread.
    pub fn new() -> Self {
        Self::default()
    }

    /// One thread holding the assistant welcome message, made current, and
    /// one default project.
    pub fn seeded(settings: &SessionSettings) -> Self {
        let store = Self::new();
        let _ = store.create_project(&settings.default_project_name);
        let tid = store.create_thread(&settings.default_thread_title, None);
        {
            let mut state = store.state.write();
            state
                .messages
                .entry(tid.clone())
                .or_default()
                .push(Message::assistant_text(tid, &settings.welcome_message));
        }
        store
    }

    /// Run `f` under the read lock.
    pub fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> R {
        f(&self.state.read())
    }

    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut StoreState) -> R) -> R {
        f(&mut self.state.write())
    }

    pub fn snapshot(&self) -> StoreState {
        self.state.read().clone()
    }

    pub fn current_thread_id(&self) -> Option<ThreadId> {
        self.state.read().current_thread_id.clone()
    }

    pub fn messages(&self, thread_id: &ThreadId) -> Vec<Message> {
        self.state.read().messages(thread_id).to_vec()
    }

    pub fn threads(&self) -> Vec<Thread> {
        self.state.read().threads.clone()
    }

    pub fn projects(&self) -> Vec<Project> {
        self.state.read().projects.clone()
    }

    // ── Threads ─────────────────────────────────────────────────────────

    /// Insert a new empty thread at the front of the list and make it current.
    /// Draft attachments are cleared.
    #[instrument(skip(self))]
    pub fn create_thread(&self, title: &str, project_id: Option<ProjectId>) -> ThreadId {
        let thread = Thread::new(title, project_id);
        let id = thread.id.clone();
        self.write(|s| {
            s.threads.insert(0, thread);
            s.messages.insert(id.clone(), Vec::new());
            s.current_thread_id = Some(id.clone());
            s.draft_files.clear();
        });
        debug!(thread_id = %id, "thread created");
        id
    }

    pub fn set_current_thread(&self, thread_id: &ThreadId) -> Result<(), StoreError> {
        self.write(|s| {
            if s.thread(thread_id).is_none() {
                return Err(StoreError::ThreadNotFound(thread_id.clone()));
            }
            s.current_thread_id = Some(thread_id.clone());
            Ok(())
        })
    }

    // ── Messages ────────────────────────────────────────────────────────

    /// Append to the thread's sequence and bump the thread's `updated_at`.
    pub fn append_message(&self, thread_id: &ThreadId, mut message: Message) -> Result<MessageId, StoreError> {
        self.write(|s| {
            let thread = s
                .threads
                .iter_mut()
                .find(|t| &t.id == thread_id)
                .ok_or_else(|| StoreError::ThreadNotFound(thread_id.clone()))?;
            thread.touch();
            message.thread_id = thread_id.clone();
            let id = message.id.clone();
            s.messages.entry(thread_id.clone()).or_default().push(message);
            Ok(id)
        })
    }

    /// Overwrite the first part of a message when it is a text part.
    ///
    /// Returns `false` when the message is gone or does not lead with text;
    /// a streaming write may race with a deletion and must not fail.
    pub fn replace_message_text(&self, thread_id: &ThreadId, message_id: &MessageId, text: &str) -> bool {
        self.update_message(thread_id, message_id, |m| match m.parts.first_mut() {
            Some(MessagePart::Text { text: current }) => {
                text.clone_into(current);
                true
            }
            _ => false,
        })
        .unwrap_or(false)
    }

    /// Replace the message's text with `text`, keeping attachment parts, and
    /// stamp `updated_at`.
    pub fn edit_message_text(&self, thread_id: &ThreadId, message_id: &MessageId, text: &str) -> bool {
        self.update_message(thread_id, message_id, |m| {
            let attachments = m
                .parts
                .drain(..)
                .filter(|p| matches!(p, MessagePart::Attachment { .. }));
            let mut parts = vec![MessagePart::text(text)];
            parts.extend(attachments);
            m.parts = parts;
            m.updated_at = Some(Utc::now());
        })
        .is_some()
    }

    /// Apply `f` to a message in place. `None` when it is not found.
    pub fn update_message<R>(
        &self,
        thread_id: &ThreadId,
        message_id: &MessageId,
        f: impl FnOnce(&mut Message) -> R,
    ) -> Option<R> {
        self.write(|s| {
            let message = s
                .messages
                .get_mut(thread_id)?
                .iter_mut()
                .find(|m| &m.id == message_id)?;
            Some(f(message))
        })
    }

    pub fn mark_truncated(&self, thread_id: &ThreadId, message_id: &MessageId) -> Result<(), StoreError> {
        self.update_message(thread_id, message_id, |m| m.truncated = true)
            .ok_or_else(|| StoreError::MessageNotFound(message_id.clone()))
    }

    /// Drop every message after `message_id`. Returns how many were removed;
    /// 0 when the message is not in the thread.
    pub fn truncate_after(&self, thread_id: &ThreadId, message_id: &MessageId) -> usize {
        self.truncate_at(thread_id, message_id, 1)
    }

    /// Drop `message_id` and everything after it.
    pub fn truncate_from(&self, thread_id: &ThreadId, message_id: &MessageId) -> usize {
        self.truncate_at(thread_id, message_id, 0)
    }

    fn truncate_at(&self, thread_id: &ThreadId, message_id: &MessageId, offset: usize) -> usize {
        let removed = self.write(|s| {
            let Some(list) = s.messages.get_mut(thread_id) else {
                return 0;
            };
            let Some(idx) = list.iter().position(|m| &m.id == message_id) else {
                return 0;
            };
            let keep = idx + offset;
            let removed = list.len() - keep;
            list.truncate(keep);
            removed
        });
        if removed > 0 {
            debug!(thread_id = %thread_id, message_id = %message_id, removed, "thread truncated");
        }
        removed
    }

    /// Remove exactly one message; the rest keep their order.
    pub fn remove_message(&self, thread_id: &ThreadId, message_id: &MessageId) -> bool {
        self.write(|s| {
            let Some(list) = s.messages.get_mut(thread_id) else {
                return false;
            };
            let before = list.len();
            list.retain(|m| &m.id != message_id);
            list.len() != before
        })
    }
}
