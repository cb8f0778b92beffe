use std::sync::Arc;

use tracing::debug;

use mastermore_core::access::{Actor, Capability, authorize};
use mastermore_core::model::{GradeRecord, ItemScore, SubmissionId};
use storage::repository::{LearnerRepository, PendingKind, PendingSubmission};

use crate::completion_recorder::CompletionRecorder;
use crate::error::ProgressionError;

/// Which submission a grade applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeTarget {
    Exam(SubmissionId),
    Project(SubmissionId),
}

/// Grader-facing queue and grade entry.
#[derive(Clone)]
pub struct GradingService {
    recorder: Arc<CompletionRecorder>,
    learners: Arc<dyn LearnerRepository>,
}

impl GradingService {
    #[must_use]
    pub fn new(recorder: Arc<CompletionRecorder>, learners: Arc<dyn LearnerRepository>) -> Self {
        Self { recorder, learners }
    }

    /// Ungraded submissions of one kind, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::Forbidden` for actors who cannot grade.
    pub async fn list_pending_grading(
        &self,
        actor: &Actor,
        kind: PendingKind,
    ) -> Result<Vec<PendingSubmission>, ProgressionError> {
        authorize(actor, Capability::GradeSubmissions)?;
        let pending = self.learners.pending_submissions(kind).await?;
        debug!(kind = kind.as_str(), count = pending.len(), "pending grading listed");
        Ok(pending)
    }

    /// Grade a submission and return the appended grade record.
    ///
    /// For exams, non-empty `item_scores` take precedence and `score` is
    /// ignored. Projects are graded on `score` alone.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError` if the grader lacks permission, the
    /// submission is unknown, or the scores do not fit the item.
    pub async fn apply_grade(
        &self,
        grader: &Actor,
        target: GradeTarget,
        score: u32,
        item_scores: &[ItemScore],
        feedback: Option<String>,
    ) -> Result<GradeRecord, ProgressionError> {
        match target {
            GradeTarget::Exam(id) if item_scores.is_empty() => Ok(self
                .recorder
                .record_exam_total(grader, id, score, feedback)
                .await?
                .grade),
            GradeTarget::Exam(id) => Ok(self
                .recorder
                .record_exam_grade(grader, id, item_scores, feedback)
                .await?
                .grade),
            GradeTarget::Project(id) => {
                self.recorder
                    .record_project_grade(grader, id, score, feedback)
                    .await
            }
        }
    }
}
