//! Intake rules for draft attachments picked by the user.

use crate::entities::Attachment;
use crate::ids::AttachmentId;

/// MIME types accepted as draft attachments.
pub const ACCEPTED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "text/plain",
    "text/markdown",
    "text/csv",
    "image/png",
    "image/jpeg",
    "application/json",
];

pub const DEFAULT_MAX_DRAFT_FILES: usize = 10;

const FALLBACK_MIME: &str = "application/octet-stream";

/// A file offered by the picker, before it becomes an attachment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub mime: Option<String>,
    pub size: u64,
}

impl FileInfo {
    pub fn new(name: impl Into<String>, mime: Option<&str>, size: u64) -> Self {
        Self {
            name: name.into(),
            mime: mime.filter(|m| !m.is_empty()).map(str::to_owned),
            size,
        }
    }
}

pub fn is_accepted(file: &FileInfo) -> bool {
    let by_mime = file
        .mime
        .as_deref()
        .is_some_and(|m| ACCEPTED_MIME_TYPES.contains(&m));
    by_mime || file.name.ends_with(".md") || file.name.ends_with(".csv")
}

/// Convert picked files into draft attachments.
///
/// Only the first `max - current_draft_count` files are considered; rejected
/// types inside that window are dropped, not replaced by later files.
pub fn attachments_from_files(
    files: &[FileInfo],
    current_draft_count: usize,
    max: usize,
) -> Vec<Attachment> {
    let room = max.saturating_sub(current_draft_count);
    files
        .iter()
        .take(room)
        .filter(|f| is_accepted(f))
        .map(|f| Attachment {
            id: AttachmentId::new(),
            name: f.name.clone(),
            mime: f.mime.clone().unwrap_or_else(|| FALLBACK_MIME.to_string()),
            size: f.size,
            preview_url: None,
        })
        .collect()
}

/// Best-effort MIME guess from a file extension, for callers that only
/// have a path.
pub fn mime_from_name(name: &str) -> Option<&'static str> {
    let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some("application/pdf"),
        "txt" => Some("text/plain"),
        "md" => Some("text/markdown"),
        "csv" => Some("text/csv"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "json" => Some("application/json"),
        _ => None,
    }
}
