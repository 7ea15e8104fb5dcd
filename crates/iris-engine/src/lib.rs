//! Conversation session engine.
//!
//! [`SessionEngine`] is the surface presentation code talks to. It owns the
//! [`EntityStore`](iris_store::EntityStore) handle and a [`StreamController`]
//! that drives at most one streaming exchange at a time.

pub mod error;
pub mod search;
pub mod session;
pub mod stream;

pub use error::EngineError;
pub use search::{search, SearchHit};
pub use session::{EngineConfig, SessionEngine};
pub use stream::{StreamController, StreamHandle, StreamStatus};
