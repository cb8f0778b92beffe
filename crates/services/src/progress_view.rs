use std::sync::Arc;

use mastermore_core::model::{Course, CourseId, GradeRecord, StructuralRef, UserId};
use mastermore_core::progression::{CourseOutline, outline};
use storage::repository::{CourseRepository, LearnerRepository, StorageError};

use crate::error::ProgressionError;

/// Read side for learners: catalog, outline with lock states, cached
/// percentage and grade history.
#[derive(Clone)]
pub struct ProgressViewService {
    courses: Arc<dyn CourseRepository>,
    learners: Arc<dyn LearnerRepository>,
}

impl ProgressViewService {
    #[must_use]
    pub fn new(courses: Arc<dyn CourseRepository>, learners: Arc<dyn LearnerRepository>) -> Self {
        Self { courses, learners }
    }

    /// Published courses in catalog order.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::Storage` if repository access fails.
    pub async fn catalog(&self) -> Result<Vec<Course>, ProgressionError> {
        let courses = self.courses.list_courses().await?;
        Ok(courses.into_iter().filter(Course::is_published).collect())
    }

    /// Outline of a course for an enrolled learner.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::StructuralNotFound` for an unknown course and
    /// `ProgressionError::NotEnrolled` if the learner has not enrolled.
    pub async fn course_outline(
        &self,
        user: UserId,
        course: CourseId,
    ) -> Result<CourseOutline, ProgressionError> {
        let tree = match self.courses.load_tree(course).await {
            Ok(tree) => tree,
            Err(StorageError::NotFound) => {
                return Err(ProgressionError::StructuralNotFound(StructuralRef::Course(
                    course,
                )));
            }
            Err(e) => return Err(e.into()),
        };
        if self.learners.get_enrollment(user, course).await?.is_none() {
            return Err(ProgressionError::NotEnrolled { user, course });
        }
        let records = self.learners.learner_records(user, course).await?;
        Ok(outline(&tree, &records))
    }

    /// Last stored percentage; 0 before any activity.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::Storage` if repository access fails.
    pub async fn cached_progress(
        &self,
        user: UserId,
        course: CourseId,
    ) -> Result<u8, ProgressionError> {
        let progress = self.learners.user_progress(user, course).await?;
        Ok(progress.map_or(0, |p| p.percentage))
    }

    /// # Errors
    ///
    /// Returns `ProgressionError::Storage` if repository access fails.
    pub async fn grade_history(&self, user: UserId) -> Result<Vec<GradeRecord>, ProgressionError> {
        Ok(self.learners.grade_history(user).await?)
    }
}
