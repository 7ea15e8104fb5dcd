pub mod attachments;
pub mod entities;
pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod transport;

pub use entities::{AgentMode, Attachment, Project, Thread};
pub use errors::TransportError;
pub use events::{ExchangeOutcome, SessionEvent};
pub use ids::{AttachmentId, ExchangeId, MessageId, ProjectId, ThreadId};
pub use messages::{Message, MessagePart, Role};
pub use transport::{ByteStream, ChatRequest, ChatTransport};
