use iris_core::entities::Attachment;
use iris_core::ids::AttachmentId;

use crate::store::EntityStore;

impl EntityStore {
    /// Register attachments in the metadata table and stage them as drafts.
    pub fn add_draft_files(&self, files: Vec<Attachment>) {
        self.write(|s| {
            for file in files {
                s.attachments.insert(file.id.clone(), file.clone());
                s.draft_files.push(file);
            }
        });
    }

    /// Unstage one draft. Its metadata stays in the attachment table.
    pub fn remove_draft_file(&self, id: &AttachmentId) -> bool {
        self.write(|s| {
            let before = s.draft_files.len();
            s.draft_files.retain(|f| &f.id != id);
            s.draft_files.len() != before
        })
    }

    pub fn draft_files(&self) -> Vec<Attachment> {
        self.read(|s| s.draft_files.clone())
    }

    pub fn draft_count(&self) -> usize {
        self.read(|s| s.draft_files.len())
    }

    /// Empty the draft list, returning what was staged.
    pub fn take_draft_files(&self) -> Vec<Attachment> {
        self.write(|s| std::mem::take(&mut s.draft_files))
    }
}
