use serde::{Deserialize, Serialize};

use crate::ids::{ExchangeId, MessageId, ThreadId};

/// Terminal outcome of one exchange.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExchangeOutcome {
    Completed,
    Cancelled,
    Failed { error: String },
}

impl ExchangeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Events the engine emits for the presentation layer. Consumers may drop
/// any of them without affecting engine state.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum SessionEvent {
    #[serde(rename = "exchange_started")]
    ExchangeStarted {
        exchange_id: ExchangeId,
        thread_id: ThreadId,
        message_id: MessageId,
    },

    /// The assistant message text was replaced with a longer buffer.
    #[serde(rename = "content_updated")]
    ContentUpdated {
        thread_id: ThreadId,
        message_id: MessageId,
        length: usize,
    },

    /// Advisory autoscroll signal, once per `batch` tokens.
    #[serde(rename = "token_progress")]
    TokenProgress { index: usize, batch: usize },

    #[serde(rename = "exchange_finished")]
    ExchangeFinished {
        exchange_id: ExchangeId,
        thread_id: ThreadId,
        message_id: MessageId,
        outcome: ExchangeOutcome,
    },
}

impl SessionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ExchangeStarted { .. } => "exchange_started",
            Self::ContentUpdated { .. } => "content_updated",
            Self::TokenProgress { .. } => "token_progress",
            Self::ExchangeFinished { .. } => "exchange_finished",
        }
    }
}
