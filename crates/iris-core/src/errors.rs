use std::time::Duration;

/// Failures of the outbound streaming request.
///
/// The engine never retries on its own; every variant ends the exchange as a
/// transport failure except `Cancelled`, which is a deliberate stop.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("response has no body")]
    EmptyBody,
    #[error("network error: {0}")]
    Network(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("cancelled")]
    Cancelled,
}

impl TransportError {
    /// Short classification string for log fields.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Http { .. } => "http",
            Self::EmptyBody => "empty_body",
            Self::Network(_) => "network",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::Timeout(_) => "timeout",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Cancelled => "cancelled",
        }
    }

    /// Classify a non-2xx (or body-less) status.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            204 | 205 => Self::EmptyBody,
            _ => Self::Http { status, body },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_status_mapping() {
        assert_eq!(TransportError::from_status(204, String::new()), TransportError::EmptyBody);
        assert_eq!(TransportError::from_status(205, String::new()), TransportError::EmptyBody);
        assert!(matches!(
            TransportError::from_status(502, "bad gateway".into()),
            TransportError::Http { status: 502, .. }
        ));
        assert!(matches!(
            TransportError::from_status(404, "nope".into()),
            TransportError::Http { status: 404, .. }
        ));
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(TransportError::Cancelled.error_kind(), "cancelled");
        assert_eq!(TransportError::EmptyBody.error_kind(), "empty_body");
        assert_eq!(
            TransportError::Timeout(Duration::from_secs(1)).error_kind(),
            "timeout"
        );
    }

    #[test]
    fn display_includes_status() {
        let err = TransportError::Http { status: 500, body: "boom".into() };
        assert_eq!(err.to_string(), "http error 500: boom");
    }

    #[test]
    fn only_cancelled_is_cancelled() {
        assert!(TransportError::Cancelled.is_cancelled());
        assert!(!TransportError::Network("reset".into()).is_cancelled());
    }
}
