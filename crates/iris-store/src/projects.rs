use chrono::Utc;
use tracing::debug;

use iris_core::entities::Project;
use iris_core::ids::{ProjectId, ThreadId};

use crate::error::StoreError;
use crate::store::EntityStore;

impl EntityStore {
    /// New projects go to the front of the list.
    pub fn create_project(&self, name: &str) -> ProjectId {
        let project = Project::new(name);
        let id = project.id.clone();
        self.write(|s| s.projects.insert(0, project));
        debug!(project_id = %id, name, "project created");
        id
    }

    pub fn rename_project(&self, project_id: &ProjectId, name: &str) -> Result<(), StoreError> {
        self.write(|s| {
            let project = s
                .projects
                .iter_mut()
                .find(|p| &p.id == project_id)
                .ok_or_else(|| StoreError::ProjectNotFound(project_id.clone()))?;
            project.name = name.to_string();
            project.updated_at = Utc::now();
            Ok(())
        })
    }

    /// Remove the project label. Its threads stay, with `project_id` cleared,
    /// and a filter pointing at it is dropped.
    pub fn delete_project(&self, project_id: &ProjectId) -> Result<usize, StoreError> {
        let detached = self.write(|s| {
            let before = s.projects.len();
            s.projects.retain(|p| &p.id != project_id);
            if s.projects.len() == before {
                return Err(StoreError::ProjectNotFound(project_id.clone()));
            }
            let mut detached = 0;
            for thread in s.threads.iter_mut() {
                if thread.project_id.as_ref() == Some(project_id) {
                    thread.project_id = None;
                    detached += 1;
                }
            }
            if s.project_filter.as_ref() == Some(project_id) {
                s.project_filter = None;
            }
            Ok(detached)
        })?;
        debug!(project_id = %project_id, detached, "project deleted");
        Ok(detached)
    }

    /// Move a thread into a project, or out of any project with `None`.
    pub fn assign_thread_to_project(
        &self,
        thread_id: &ThreadId,
        project_id: Option<&ProjectId>,
    ) -> Result<(), StoreError> {
        self.write(|s| {
            if let Some(pid) = project_id {
                if s.project(pid).is_none() {
                    return Err(StoreError::ProjectNotFound(pid.clone()));
                }
            }
            let thread = s
                .threads
                .iter_mut()
                .find(|t| &t.id == thread_id)
                .ok_or_else(|| StoreError::ThreadNotFound(thread_id.clone()))?;
            thread.project_id = project_id.cloned();
            Ok(())
        })
    }

    pub fn set_project_filter(&self, project_id: Option<&ProjectId>) -> Result<(), StoreError> {
        self.write(|s| {
            if let Some(pid) = project_id {
                if s.project(pid).is_none() {
                    return Err(StoreError::ProjectNotFound(pid.clone()));
                }
            }
            s.project_filter = project_id.cloned();
            Ok(())
        })
    }
}
