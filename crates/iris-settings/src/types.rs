//! Settings sections.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IrisSettings {
    pub backend: BackendSettings,
    pub stream: StreamSettings,
    pub session: SessionSettings,
    pub server: ServerSettings,
    pub logging: LoggingSettings,
}

impl IrisSettings {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.stream.batch_size == 0 {
            return Err(SettingsError::InvalidValue {
                key: "stream.batchSize",
                reason: "must be at least 1",
            });
        }
        if self.backend.base_url.trim().is_empty() {
            return Err(SettingsError::InvalidValue {
                key: "backend.baseUrl",
                reason: "must not be empty",
            });
        }
        Ok(())
    }
}

/// Where the generation backend lives.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendSettings {
    pub base_url: String,
    pub stream_path: String,
    pub connect_timeout_ms: u64,
    /// Maximum silence between two body chunks before the exchange fails.
    pub idle_timeout_ms: u64,
}

impl BackendSettings {
    pub fn stream_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.stream_path.trim_start_matches('/')
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            stream_path: "/api/chat/stream".to_string(),
            connect_timeout_ms: 30_000,
            idle_timeout_ms: 90_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    /// Tokens per advisory progress notification.
    pub batch_size: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self { batch_size: 8 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    pub welcome_message: String,
    pub default_thread_title: String,
    pub default_project_name: String,
    pub max_draft_files: usize,
    /// Text of the system notice appended when an exchange fails.
    pub connection_error_notice: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            welcome_message: "Hey! I’m Iris Arc. Ask me anything.".to_string(),
            default_thread_title: "New chat".to_string(),
            default_project_name: "General".to_string(),
            max_draft_files: 10,
            connection_error_notice: "⚠️ Connection error. Please retry.".to_string(),
        }
    }
}

/// Demo backend settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Delay between streamed tokens.
    pub token_delay_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            token_delay_ms: 30,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = IrisSettings::default();
        assert_eq!(s.backend.base_url, "http://localhost:8000");
        assert_eq!(s.stream.batch_size, 8);
        assert_eq!(s.session.default_thread_title, "New chat");
        assert_eq!(s.session.max_draft_files, 10);
        assert_eq!(s.server.port, 8000);
        assert_eq!(s.logging.format, LogFormat::Pretty);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn stream_url_joins_cleanly() {
        let mut b = BackendSettings::default();
        assert_eq!(b.stream_url(), "http://localhost:8000/api/chat/stream");
        b.base_url = "http://example.test/".into();
        b.stream_path = "chat".into();
        assert_eq!(b.stream_url(), "http://example.test/chat");
    }

    #[test]
    fn zero_batch_size_rejected() {
        let mut s = IrisSettings::default();
        s.stream.batch_size = 0;
        assert!(matches!(
            s.validate(),
            Err(SettingsError::InvalidValue { key: "stream.batchSize", .. })
        ));
    }

    #[test]
    fn empty_base_url_rejected() {
        let mut s = IrisSettings::default();
        s.backend.base_url = "  ".into();
        assert_eq!(s.validate().unwrap_err().key(), Some("backend.baseUrl"));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: IrisSettings =
            serde_json::from_str(r#"{"stream":{"batchSize":4},"logging":{"format":"json"}}"#)
                .unwrap();
        assert_eq!(s.stream.batch_size, 4);
        assert_eq!(s.logging.format, LogFormat::Json);
        assert_eq!(s.logging.level, "info");
        assert_eq!(s.backend.stream_path, "/api/chat/stream");
    }
}
