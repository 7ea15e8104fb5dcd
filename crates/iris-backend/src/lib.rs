//! Demo generation backend.
//!
//! Streams a canned markdown reply that embeds the prompt, one
//! space-terminated token at a time.

pub mod reply;
pub mod server;

pub use reply::{prompt_from_body, render_reply, reply_tokens, NO_PROMPT};
pub use server::{build_router, start, BackendConfig, BackendHandle};
