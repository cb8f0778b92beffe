//! Shared error types for the services crate.

use std::fmt;

use thiserror::Error;

use mastermore_core::access::AccessError;
use mastermore_core::grading::GradingError;
use mastermore_core::model::{
    CourseId, ExamId, LessonId, ModuleId, StructuralRef, StructureError, UserId,
};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Which prerequisite is missing when a learner hits a locked node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReason {
    /// The module before this one is not completed.
    ModuleLocked(ModuleId),
    /// The lesson before this one is not completed.
    LessonLocked(LessonId),
    /// Lessons or practice questions of the exam's module are unfinished.
    ExamPrerequisites(ExamId),
    /// Not every module of the course is completed.
    FinalExamLocked(ExamId),
}

impl fmt::Display for LockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockReason::ModuleLocked(id) => write!(f, "module {id} is locked"),
            LockReason::LessonLocked(id) => write!(f, "lesson {id} is locked"),
            LockReason::ExamPrerequisites(id) => {
                write!(f, "exam {id} needs all module lessons and practice first")
            }
            LockReason::FinalExamLocked(id) => {
                write!(f, "final exam {id} needs every module completed")
            }
        }
    }
}

/// Errors emitted by the learner-facing progression services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressionError {
    #[error("user {user} is not enrolled in course {course}")]
    NotEnrolled { user: UserId, course: CourseId },

    #[error("access denied: {0}")]
    AccessDenied(LockReason),

    #[error("{0} was already submitted")]
    DuplicateSubmission(StructuralRef),

    #[error("{0} not found")]
    StructuralNotFound(StructuralRef),

    #[error(transparent)]
    Forbidden(#[from] AccessError),

    #[error(transparent)]
    Grading(#[from] GradingError),

    #[error(transparent)]
    Structure(#[from] StructureError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ProgressionError {
    /// Double submits are safe to show as a no-op success.
    #[must_use]
    pub fn is_duplicate_submission(&self) -> bool {
        matches!(self, ProgressionError::DuplicateSubmission(_))
    }

    /// Short text for learners. Locks read as "finish the prerequisite first"
    /// instead of a generic failure.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            ProgressionError::NotEnrolled { .. } => "Enroll in this course to continue.".into(),
            ProgressionError::AccessDenied(reason) => match reason {
                LockReason::ModuleLocked(_) => "Complete the previous module first.".into(),
                LockReason::LessonLocked(_) => "Complete the previous lesson first.".into(),
                LockReason::ExamPrerequisites(_) => {
                    "Finish every lesson and practice question in this module first.".into()
                }
                LockReason::FinalExamLocked(_) => {
                    "Complete every module before the final exam.".into()
                }
            },
            ProgressionError::DuplicateSubmission(_) => "Already submitted.".into(),
            ProgressionError::StructuralNotFound(node) => format!("Could not find {node}."),
            ProgressionError::Forbidden(_) => "You do not have permission to do that.".into(),
            ProgressionError::Grading(e) => e.to_string(),
            ProgressionError::Structure(e) => e.to_string(),
            ProgressionError::Storage(_) => "Something went wrong, please retry.".into(),
        }
    }

    /// A uniqueness conflict on a single-attempt insert means the learner
    /// already submitted `item`.
    pub(crate) fn from_commit(err: StorageError, item: StructuralRef) -> Self {
        match err {
            StorageError::Conflict => ProgressionError::DuplicateSubmission(item),
            other => ProgressionError::Storage(other),
        }
    }
}

/// Errors emitted by `CourseAdminService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CourseAdminError {
    #[error(transparent)]
    Forbidden(#[from] AccessError),

    #[error(transparent)]
    Structure(#[from] StructureError),

    #[error("{0} not found")]
    ParentNotFound(StructuralRef),

    #[error("position {position} is already used in {scope}")]
    PositionTaken { scope: StructuralRef, position: u32 },

    #[error("{0} already exists")]
    AlreadyExists(StructuralRef),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
