use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read settings file {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not JSON, or the merged result does not fit
    /// [`IrisSettings`](crate::IrisSettings).
    #[error("bad settings in {}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// `key` is the camelCase path as written in the file, e.g. `stream.batchSize`.
    #[error("invalid settings value {key}: {reason}")]
    InvalidValue { key: &'static str, reason: &'static str },
}

impl SettingsError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.to_path_buf(),
            source,
        }
    }

    /// The settings key a validation failure refers to.
    pub fn key(&self) -> Option<&'static str> {
        match self {
            Self::InvalidValue { key, .. } => Some(*key),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn io_names_the_file_and_keeps_the_cause() {
        let err = SettingsError::io(
            Path::new("/home/u/.iris/settings.json"),
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "cannot read settings file /home/u/.iris/settings.json");
        assert_eq!(err.source().unwrap().to_string(), "denied");
        assert_eq!(err.key(), None);
    }

    #[test]
    fn invalid_value_names_the_key() {
        let err = SettingsError::InvalidValue {
            key: "stream.batchSize",
            reason: "must be at least 1",
        };
        assert_eq!(err.to_string(), "invalid settings value stream.batchSize: must be at least 1");
        assert_eq!(err.key(), Some("stream.batchSize"));
    }
}
