//! In-memory entity store for one chat session.
//!
//! Holds threads, messages by thread, projects, attachment metadata and the
//! draft attachment list. Every mutation goes through [`EntityStore`] and
//! runs under a single write lock.

pub mod drafts;
pub mod error;
pub mod projects;
pub mod state;
pub mod store;

pub use error::StoreError;
pub use state::StoreState;
pub use store::EntityStore;
