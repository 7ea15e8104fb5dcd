use std::collections::HashMap;

use serde::Serialize;

use iris_core::entities::{Attachment, Project, Thread};
use iris_core::ids::{AttachmentId, MessageId, ProjectId, ThreadId};
use iris_core::messages::Message;

/// The canonical collections. Cloned out as a snapshot for readers.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreState {
    /// Newest first.
    pub threads: Vec<Thread>,
    pub messages: HashMap<ThreadId, Vec<Message>>,
    /// Newest first.
    pub projects: Vec<Project>,
    pub attachments: HashMap<AttachmentId, Attachment>,
    pub draft_files: Vec<Attachment>,
    pub current_thread_id: Option<ThreadId>,
    pub project_filter: Option<ProjectId>,
}

impl StoreState {
    pub fn thread(&self, id: &ThreadId) -> Option<&Thread> {
        self.threads.iter().find(|t| &t.id == id)
    }

    pub fn project(&self, id: &ProjectId) -> Option<&Project> {
        self.projects.iter().find(|p| &p.id == id)
    }

    pub fn current_thread(&self) -> Option<&Thread> {
        self.current_thread_id.as_ref().and_then(|id| self.thread(id))
    }

    /// Message sequence of a thread, empty for unknown threads.
    pub fn messages(&self, thread_id: &ThreadId) -> &[Message] {
        self.messages.get(thread_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn message_index(&self, thread_id: &ThreadId, message_id: &MessageId) -> Option<usize> {
        self.messages(thread_id).iter().position(|m| &m.id == message_id)
    }

    /// Find a message in any thread.
    pub fn locate_message(&self, message_id: &MessageId) -> Option<(ThreadId, usize)> {
        self.messages.iter().find_map(|(tid, list)| {
            list.iter()
                .position(|m| &m.id == message_id)
                .map(|idx| (tid.clone(), idx))
        })
    }

    pub fn message(&self, message_id: &MessageId) -> Option<&Message> {
        let (tid, idx) = self.locate_message(message_id)?;
        self.messages.get(&tid).and_then(|list| list.get(idx))
    }

    /// Threads visible under the active project filter, in list order.
    pub fn visible_threads(&self) -> impl Iterator<Item = &Thread> {
        self.threads.iter().filter(move |t| match &self.project_filter {
            Some(pid) => t.project_id.as_ref() == Some(pid),
            None => true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_of_unknown_thread_is_empty() {
        let state = StoreState::default();
        assert!(state.messages(&ThreadId::new()).is_empty());
        assert!(state.current_thread().is_none());
    }

    #[test]
    fn locate_message_across_threads() {
        let mut state = StoreState::default();
        let a = Thread::new("a", None);
        let b = Thread::new("b", None);
        let m = Message::user_text(b.id.clone(), "hi");
        let mid = m.id.clone();
        state.messages.insert(a.id.clone(), vec![Message::user_text(a.id.clone(), "x")]);
        state.messages.insert(b.id.clone(), vec![Message::user_text(b.id.clone(), "y"), m]);
        state.threads = vec![b.clone(), a];

        assert_eq!(state.locate_message(&mid), Some((b.id.clone(), 1)));
        assert_eq!(state.message(&mid).and_then(Message::first_text), Some("hi"));
        assert_eq!(state.locate_message(&MessageId::new()), None);
    }

    #[test]
    fn visible_threads_honours_filter() {
        let project = Project::new("Work");
        let mut state = StoreState::default();
        state.threads = vec![
            Thread::new("in", Some(project.id.clone())),
            Thread::new("out", None),
        ];
        assert_eq!(state.visible_threads().count(), 2);
        state.project_filter = Some(project.id.clone());
        let titles: Vec<_> = state.visible_threads().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["in"]);
    }
}
