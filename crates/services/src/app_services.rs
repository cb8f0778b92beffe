use std::sync::Arc;

use storage::repository::Storage;

use crate::Clock;
use crate::completion_recorder::CompletionRecorder;
use crate::course_admin::CourseAdminService;
use crate::error::AppServicesError;
use crate::grading_service::GradingService;
use crate::progress_view::ProgressViewService;

/// Assembles app-facing services over one storage backend.
#[derive(Clone)]
pub struct AppServices {
    recorder: Arc<CompletionRecorder>,
    grading: Arc<GradingService>,
    progress_view: Arc<ProgressViewService>,
    course_admin: Arc<CourseAdminService>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the database cannot be opened or migrated.
    pub async fn new_sqlite(db_url: &str, clock: Clock) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::from_storage(&storage, clock))
    }

    /// Build services over a fresh in-memory backend.
    #[must_use]
    pub fn in_memory(clock: Clock) -> Self {
        Self::from_storage(&Storage::in_memory(), clock)
    }

    #[must_use]
    pub fn from_storage(storage: &Storage, clock: Clock) -> Self {
        let recorder = Arc::new(CompletionRecorder::new(
            clock,
            Arc::clone(&storage.courses),
            Arc::clone(&storage.learners),
            Arc::clone(&storage.progress),
        ));
        let grading = Arc::new(GradingService::new(
            Arc::clone(&recorder),
            Arc::clone(&storage.learners),
        ));
        let progress_view = Arc::new(ProgressViewService::new(
            Arc::clone(&storage.courses),
            Arc::clone(&storage.learners),
        ));
        let course_admin = Arc::new(CourseAdminService::new(Arc::clone(&storage.courses)));

        Self {
            recorder,
            grading,
            progress_view,
            course_admin,
        }
    }

    #[must_use]
    pub fn recorder(&self) -> Arc<CompletionRecorder> {
        Arc::clone(&self.recorder)
    }

    #[must_use]
    pub fn grading(&self) -> Arc<GradingService> {
        Arc::clone(&self.grading)
    }

    #[must_use]
    pub fn progress_view(&self) -> Arc<ProgressViewService> {
        Arc::clone(&self.progress_view)
    }

    #[must_use]
    pub fn course_admin(&self) -> Arc<CourseAdminService> {
        Arc::clone(&self.course_admin)
    }
}
