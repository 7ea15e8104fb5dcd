use iris_core::ids::{MessageId, ProjectId, ThreadId};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("thread not found: {0}")]
    ThreadNotFound(ThreadId),

    #[error("message not found: {0}")]
    MessageNotFound(MessageId),

    #[error("project not found: {0}")]
    ProjectNotFound(ProjectId),
}
