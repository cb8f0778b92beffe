use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use mastermore_core::access::{Actor, Capability, authorize};
use mastermore_core::grading::{
    PROJECT_PASS_PERCENT, ScoreSummary, auto_grade_exam, grade_practice_answer, itemized_total,
    merge_item_scores,
};
use mastermore_core::model::{
    Answer, Correctness, CourseId, CourseTree, Enrollment, Exam, ExamAnswer, ExamId,
    ExamLocation, ExamSubmission, GradeItemKind, GradeRecord, GradingFields, ItemScore,
    LearnerRecords, LessonCompletion, LessonId, LessonScope, PracticeSubmission, ProjectId,
    ProjectSubmission, QuestionId, StructuralRef, StructureError, SubmissionId, UserId,
};
use mastermore_core::progression::{
    Settlement, can_take_exam, is_final_exam_eligible, is_lesson_reachable, is_module_accessible,
};
use crate::Clock;
use storage::repository::{
    CommitReceipt, CourseRepository, ExamGrading, LearnerRepository, ProgressChanges,
    ProgressPersistence, ProjectGrading, SettleScope, StorageError,
};

use crate::error::{LockReason, ProgressionError};

//
// ─── RESULTS ───────────────────────────────────────────────────────────────────
//

/// Outcome of a practice answer. Coding answers come back `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PracticeResult {
    pub correctness: Correctness,
    pub points_awarded: u32,
}

/// Outcome of grading an exam submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamGradeOutcome {
    pub total_score: u32,
    pub max_score: u32,
    pub passed: bool,
    pub grade: GradeRecord,
}

/// A stored exam attempt. `graded` is set when every question could be
/// auto-graded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamAttempt {
    pub submission_id: SubmissionId,
    pub graded: Option<ExamGradeOutcome>,
}

/// One learner's course state, loaded before an event is applied.
struct CourseContext {
    tree: CourseTree,
    records: LearnerRecords,
    enrollment: Option<Enrollment>,
}

fn assigned(id: Option<SubmissionId>) -> Result<SubmissionId, ProgressionError> {
    id.ok_or_else(|| {
        ProgressionError::Storage(StorageError::Serialization(
            "storage did not assign a submission id".into(),
        ))
    })
}

fn settle_scope(user: UserId, course: CourseId, at: DateTime<Utc>) -> Option<SettleScope> {
    Some(SettleScope {
        user_id: user,
        course_id: course,
        at,
    })
}

/// The derived state storage computed for this commit.
fn settled(
    user: UserId,
    course: CourseId,
    receipt: &CommitReceipt,
) -> Result<&Settlement, ProgressionError> {
    let settlement = receipt.settlement.as_ref().ok_or_else(|| {
        ProgressionError::Storage(StorageError::Serialization(
            "storage did not settle the commit".into(),
        ))
    })?;
    for module in &settlement.completed_modules {
        info!(user = %user, module = %module, "module completed");
    }
    if settlement.course_completed {
        info!(user = %user, course = %course, "course completed");
    }
    Ok(settlement)
}

fn denied(user: UserId, reason: LockReason) -> ProgressionError {
    warn!(user = %user, %reason, "progression action rejected");
    ProgressionError::AccessDenied(reason)
}

fn duplicate(user: UserId, item: StructuralRef) -> ProgressionError {
    warn!(user = %user, %item, "duplicate submission");
    ProgressionError::DuplicateSubmission(item)
}

fn exam_item_kind(location: &ExamLocation<'_>) -> GradeItemKind {
    match location {
        ExamLocation::Module { .. } => GradeItemKind::ModuleExam,
        ExamLocation::Final(_) => GradeItemKind::FinalExam,
    }
}

//
// ─── SERVICE ───────────────────────────────────────────────────────────────────
//

/// Applies one learner or grader event and every piece of derived state it
/// implies (module completion, cached percentage, course completion) as a
/// single commit.
#[derive(Clone)]
pub struct CompletionRecorder {
    clock: Clock,
    courses: Arc<dyn CourseRepository>,
    learners: Arc<dyn LearnerRepository>,
    progress: Arc<dyn ProgressPersistence>,
}

impl CompletionRecorder {
    #[must_use]
    pub fn new(
        clock: Clock,
        courses: Arc<dyn CourseRepository>,
        learners: Arc<dyn LearnerRepository>,
        progress: Arc<dyn ProgressPersistence>,
    ) -> Self {
        Self {
            clock,
            courses,
            learners,
            progress,
        }
    }

    async fn course_of(&self, node: StructuralRef) -> Result<CourseId, ProgressionError> {
        self.courses
            .locate(node)
            .await?
            .ok_or(ProgressionError::StructuralNotFound(node))
    }

    async fn load_context(
        &self,
        user: UserId,
        course: CourseId,
    ) -> Result<CourseContext, ProgressionError> {
        let tree = self.courses.load_tree(course).await?;
        let records = self.learners.learner_records(user, course).await?;
        let enrollment = self.learners.get_enrollment(user, course).await?;
        Ok(CourseContext {
            tree,
            records,
            enrollment,
        })
    }

    /// Context for a learner action: the node must exist and the learner must
    /// be enrolled in its course.
    async fn learner_context(
        &self,
        user: UserId,
        node: StructuralRef,
    ) -> Result<CourseContext, ProgressionError> {
        let course = self.course_of(node).await?;
        let ctx = self.load_context(user, course).await?;
        if ctx.enrollment.is_none() {
            warn!(user = %user, course = %course, "action on a course without enrollment");
            return Err(ProgressionError::NotEnrolled { user, course });
        }
        Ok(ctx)
    }

    /// Enroll a learner in a published course. Enrolling twice returns the
    /// existing enrollment.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::StructuralNotFound` if the course is missing
    /// or unpublished.
    pub async fn enroll(
        &self,
        user: UserId,
        course: CourseId,
    ) -> Result<Enrollment, ProgressionError> {
        let node = StructuralRef::Course(course);
        let published = match self.courses.get_course(course).await {
            Ok(c) => c.is_published(),
            Err(StorageError::NotFound) => false,
            Err(e) => return Err(e.into()),
        };
        if !published {
            return Err(ProgressionError::StructuralNotFound(node));
        }

        if let Some(existing) = self.learners.get_enrollment(user, course).await? {
            return Ok(existing);
        }

        let now = self.clock.now();
        let changes = ProgressChanges {
            enrollment: Some(Enrollment::new(user, course, now)),
            settle: settle_scope(user, course, now),
            ..ProgressChanges::default()
        };
        let receipt = self.progress.commit(&changes).await?;
        settled(user, course, &receipt)?;

        // Of two racing enrollments only the first row is kept.
        let enrollment = self
            .learners
            .get_enrollment(user, course)
            .await?
            .ok_or(ProgressionError::Storage(StorageError::NotFound))?;
        info!(user = %user, course = %course, "enrolled");
        Ok(enrollment)
    }

    /// Mark a lesson done and return the new course percentage.
    ///
    /// Completing a lesson again only refreshes its timestamp.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError` if the lesson is unknown, the learner is not
    /// enrolled, or the lesson or its module is still locked.
    pub async fn record_lesson_completion(
        &self,
        user: UserId,
        lesson: LessonId,
    ) -> Result<u8, ProgressionError> {
        let node = StructuralRef::Lesson(lesson);
        let ctx = self.learner_context(user, node).await?;
        let location = ctx
            .tree
            .locate_lesson(lesson)
            .ok_or(ProgressionError::StructuralNotFound(node))?;

        if !is_lesson_reachable(&ctx.tree, location, &ctx.records) {
            let reason = match location.scope {
                LessonScope::Module(index)
                    if !is_module_accessible(&ctx.tree, index, &ctx.records) =>
                {
                    LockReason::ModuleLocked(ctx.tree.modules()[index].id())
                }
                _ => LockReason::LessonLocked(lesson),
            };
            return Err(denied(user, reason));
        }

        let now = self.clock.now();
        let course = ctx.tree.course().id();
        let changes = ProgressChanges {
            lesson_completions: vec![LessonCompletion {
                user_id: user,
                lesson_id: lesson,
                completed_at: now,
            }],
            settle: settle_scope(user, course, now),
            ..ProgressChanges::default()
        };
        let receipt = self.progress.commit(&changes).await?;
        let percentage = settled(user, course, &receipt)?.percentage;

        info!(user = %user, lesson = %lesson, percentage, "lesson completed");
        Ok(percentage)
    }

    /// Submit the single allowed answer to a practice question.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::DuplicateSubmission` on a second answer,
    /// `ProgressionError::AccessDenied` while the module is locked, or
    /// `ProgressionError::Grading` if the answer does not fit the question.
    pub async fn record_practice_submission(
        &self,
        user: UserId,
        question: QuestionId,
        answer: Answer,
    ) -> Result<PracticeResult, ProgressionError> {
        let node = StructuralRef::PracticeQuestion(question);
        let ctx = self.learner_context(user, node).await?;
        let (module_index, practice) = ctx
            .tree
            .locate_question(question)
            .ok_or(ProgressionError::StructuralNotFound(node))?;

        if !is_module_accessible(&ctx.tree, module_index, &ctx.records) {
            let module = ctx.tree.modules()[module_index].id();
            return Err(denied(user, LockReason::ModuleLocked(module)));
        }
        if ctx.records.has_submitted_practice(question) {
            return Err(duplicate(user, node));
        }

        let (correctness, points_awarded) = grade_practice_answer(practice, &answer)?;
        let max_points = practice.points();
        let now = self.clock.now();

        let course = ctx.tree.course().id();
        let mut changes = ProgressChanges {
            practice_submissions: vec![PracticeSubmission {
                user_id: user,
                question_id: question,
                answer,
                correctness,
                points_awarded,
                submitted_at: now,
            }],
            settle: settle_scope(user, course, now),
            ..ProgressChanges::default()
        };
        if correctness.is_settled() {
            let summary = ScoreSummary::evaluate(points_awarded, max_points, 100)?;
            changes.grade_records.push(GradeRecord {
                id: None,
                user_id: user,
                item_kind: GradeItemKind::PracticeQuestion,
                item_id: question.value(),
                score: summary.score,
                max_score: summary.max_score,
                percentage: summary.percentage,
                passed: correctness == Correctness::Correct,
                grader_id: None,
                feedback: None,
                recorded_at: now,
            });
        }

        let receipt = self
            .progress
            .commit(&changes)
            .await
            .map_err(|e| ProgressionError::from_commit(e, node))?;
        settled(user, course, &receipt)?;

        info!(user = %user, question = %question, correctness = correctness.as_str(), "practice submitted");
        Ok(PracticeResult {
            correctness,
            points_awarded,
        })
    }

    /// Submit the single allowed attempt at a module or final exam.
    ///
    /// Exams made only of choice questions are graded on the spot; anything
    /// with essay or coding questions waits in the grading queue.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::AccessDenied` when prerequisites are missing,
    /// `ProgressionError::DuplicateSubmission` on a second attempt, or
    /// `ProgressionError::Grading` for answers that do not fit the exam.
    pub async fn submit_exam(
        &self,
        user: UserId,
        exam_id: ExamId,
        answers: Vec<ExamAnswer>,
    ) -> Result<ExamAttempt, ProgressionError> {
        let node = StructuralRef::Exam(exam_id);
        let ctx = self.learner_context(user, node).await?;
        let location = ctx
            .tree
            .locate_exam(exam_id)
            .ok_or(ProgressionError::StructuralNotFound(node))?;

        if ctx.records.has_attempted_exam(exam_id) {
            return Err(duplicate(user, node));
        }
        match location {
            ExamLocation::Module { module_index, .. } => {
                let module = &ctx.tree.modules()[module_index];
                if !is_module_accessible(&ctx.tree, module_index, &ctx.records) {
                    return Err(denied(user, LockReason::ModuleLocked(module.id())));
                }
                if !can_take_exam(module, exam_id, &ctx.records) {
                    return Err(denied(user, LockReason::ExamPrerequisites(exam_id)));
                }
            }
            ExamLocation::Final(_) => {
                if !is_final_exam_eligible(&ctx.tree, &ctx.records) {
                    return Err(denied(user, LockReason::FinalExamLocked(exam_id)));
                }
            }
        }

        let exam = location.exam();
        let item_kind = exam_item_kind(&location);
        let auto = auto_grade_exam(exam, &answers)?;
        let now = self.clock.now();

        let mut grading = GradingFields::default();
        let mut outcome = None;
        if !auto.needs_manual {
            let summary = ScoreSummary::evaluate(auto.score, auto.max_score, exam.passing_score())?;
            grading = GradingFields {
                score: Some(summary.score),
                passed: Some(summary.passed),
                grader_id: None,
                graded_at: Some(now),
                feedback: None,
            };
            outcome = Some(ExamGradeOutcome {
                total_score: summary.score,
                max_score: summary.max_score,
                passed: summary.passed,
                grade: GradeRecord {
                    id: None,
                    user_id: user,
                    item_kind,
                    item_id: exam_id.value(),
                    score: summary.score,
                    max_score: summary.max_score,
                    percentage: summary.percentage,
                    passed: summary.passed,
                    grader_id: None,
                    feedback: None,
                    recorded_at: now,
                },
            });
        }

        let course = ctx.tree.course().id();
        let changes = ProgressChanges {
            exam_submission: Some(ExamSubmission {
                id: None,
                user_id: user,
                exam_id,
                answers,
                item_scores: auto.item_scores,
                max_score: auto.max_score,
                grading,
                submitted_at: now,
            }),
            grade_records: outcome.iter().map(|o| o.grade.clone()).collect(),
            settle: settle_scope(user, course, now),
            ..ProgressChanges::default()
        };

        let receipt = self
            .progress
            .commit(&changes)
            .await
            .map_err(|e| ProgressionError::from_commit(e, node))?;
        let submission_id = assigned(receipt.exam_submission_id)?;
        settled(user, course, &receipt)?;

        info!(
            user = %user,
            exam = %exam_id,
            submission = %submission_id,
            auto_graded = outcome.is_some(),
            "exam submitted"
        );
        Ok(ExamAttempt {
            submission_id,
            graded: outcome,
        })
    }

    /// Submit the single allowed attempt at a project. Projects are never
    /// locked.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::DuplicateSubmission` on a second attempt or
    /// `ProgressionError::Structure` for empty content.
    pub async fn submit_project(
        &self,
        user: UserId,
        project_id: ProjectId,
        content: &str,
    ) -> Result<SubmissionId, ProgressionError> {
        let node = StructuralRef::Project(project_id);
        let ctx = self.learner_context(user, node).await?;
        let project = ctx
            .tree
            .project(project_id)
            .ok_or(ProgressionError::StructuralNotFound(node))?;

        let content = content.trim();
        if content.is_empty() {
            return Err(StructureError::EmptySubmission.into());
        }
        if ctx.records.has_submitted_project(project_id) {
            return Err(duplicate(user, node));
        }

        let now = self.clock.now();
        let course = ctx.tree.course().id();
        let changes = ProgressChanges {
            project_submission: Some(ProjectSubmission {
                id: None,
                user_id: user,
                project_id,
                content: content.to_owned(),
                max_score: project.max_points(),
                grading: GradingFields::default(),
                submitted_at: now,
            }),
            settle: settle_scope(user, course, now),
            ..ProgressChanges::default()
        };

        let receipt = self
            .progress
            .commit(&changes)
            .await
            .map_err(|e| ProgressionError::from_commit(e, node))?;
        let submission_id = assigned(receipt.project_submission_id)?;
        settled(user, course, &receipt)?;
        info!(user = %user, project = %project_id, submission = %submission_id, "project submitted");
        Ok(submission_id)
    }

    /// Grade an exam from per-question scores.
    ///
    /// Grader scores replace the auto-graded ones for the same question; the
    /// total is the sum over all items.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::Forbidden` for non-graders,
    /// `ProgressionError::StructuralNotFound` for unknown submissions, or
    /// `ProgressionError::Grading` for invalid item scores.
    pub async fn record_exam_grade(
        &self,
        grader: &Actor,
        submission_id: SubmissionId,
        item_scores: &[ItemScore],
        feedback: Option<String>,
    ) -> Result<ExamGradeOutcome, ProgressionError> {
        self.grade_exam(grader, submission_id, ExamScoreInput::Itemized(item_scores), feedback)
            .await
    }

    /// Grade an exam from a single total score.
    ///
    /// # Errors
    ///
    /// Same as [`CompletionRecorder::record_exam_grade`]; a total above the
    /// exam's maximum is rejected.
    pub async fn record_exam_total(
        &self,
        grader: &Actor,
        submission_id: SubmissionId,
        score: u32,
        feedback: Option<String>,
    ) -> Result<ExamGradeOutcome, ProgressionError> {
        self.grade_exam(grader, submission_id, ExamScoreInput::Total(score), feedback)
            .await
    }

    async fn grade_exam(
        &self,
        grader: &Actor,
        submission_id: SubmissionId,
        input: ExamScoreInput<'_>,
        feedback: Option<String>,
    ) -> Result<ExamGradeOutcome, ProgressionError> {
        authorize(grader, Capability::GradeSubmissions)?;
        let node = StructuralRef::Submission(submission_id);
        let submission = match self.learners.exam_submission(submission_id).await {
            Ok(s) => s,
            Err(StorageError::NotFound) => return Err(ProgressionError::StructuralNotFound(node)),
            Err(e) => return Err(e.into()),
        };

        let user = submission.user_id;
        let exam_node = StructuralRef::Exam(submission.exam_id);
        let course = self.course_of(exam_node).await?;
        let tree = self.courses.load_tree(course).await?;
        let location = tree
            .locate_exam(submission.exam_id)
            .ok_or(ProgressionError::StructuralNotFound(exam_node))?;
        let exam: &Exam = location.exam();
        let item_kind = exam_item_kind(&location);

        let (total, items) = match input {
            ExamScoreInput::Itemized(manual) => {
                itemized_total(exam, manual)?;
                let merged = merge_item_scores(&submission.item_scores, manual);
                let total = merged.iter().map(|i| i.score).sum();
                (total, merged)
            }
            ExamScoreInput::Total(score) => (score, submission.item_scores.clone()),
        };
        let summary = ScoreSummary::evaluate(total, exam.max_score(), exam.passing_score())?;
        let now = self.clock.now();

        let grading = GradingFields {
            score: Some(summary.score),
            passed: Some(summary.passed),
            grader_id: Some(grader.user_id),
            graded_at: Some(now),
            feedback: feedback.clone(),
        };
        let grade = GradeRecord {
            id: None,
            user_id: user,
            item_kind,
            item_id: submission.exam_id.value(),
            score: summary.score,
            max_score: summary.max_score,
            percentage: summary.percentage,
            passed: summary.passed,
            grader_id: Some(grader.user_id),
            feedback,
            recorded_at: now,
        };

        let changes = ProgressChanges {
            exam_grading: Some(ExamGrading {
                submission_id,
                item_scores: items,
                grading,
            }),
            grade_records: vec![grade.clone()],
            settle: settle_scope(user, course, now),
            ..ProgressChanges::default()
        };
        let receipt = self.progress.commit(&changes).await?;
        settled(user, course, &receipt)?;

        info!(
            grader = %grader.user_id,
            submission = %submission_id,
            score = summary.score,
            passed = summary.passed,
            "exam graded"
        );
        Ok(ExamGradeOutcome {
            total_score: summary.score,
            max_score: summary.max_score,
            passed: summary.passed,
            grade,
        })
    }

    /// Grade a project. It passes at `PROJECT_PASS_PERCENT` of its max points.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::Forbidden` for non-graders,
    /// `ProgressionError::StructuralNotFound` for unknown submissions, or
    /// `ProgressionError::Grading` when the score exceeds the maximum.
    pub async fn record_project_grade(
        &self,
        grader: &Actor,
        submission_id: SubmissionId,
        score: u32,
        feedback: Option<String>,
    ) -> Result<GradeRecord, ProgressionError> {
        authorize(grader, Capability::GradeSubmissions)?;
        let node = StructuralRef::Submission(submission_id);
        let submission = match self.learners.project_submission(submission_id).await {
            Ok(s) => s,
            Err(StorageError::NotFound) => return Err(ProgressionError::StructuralNotFound(node)),
            Err(e) => return Err(e.into()),
        };

        let user = submission.user_id;
        let course = self
            .course_of(StructuralRef::Project(submission.project_id))
            .await?;
        let summary = ScoreSummary::evaluate(score, submission.max_score, PROJECT_PASS_PERCENT)?;
        let now = self.clock.now();

        let grade = GradeRecord {
            id: None,
            user_id: user,
            item_kind: GradeItemKind::Project,
            item_id: submission.project_id.value(),
            score: summary.score,
            max_score: summary.max_score,
            percentage: summary.percentage,
            passed: summary.passed,
            grader_id: Some(grader.user_id),
            feedback: feedback.clone(),
            recorded_at: now,
        };
        let changes = ProgressChanges {
            project_grading: Some(ProjectGrading {
                submission_id,
                grading: GradingFields {
                    score: Some(summary.score),
                    passed: Some(summary.passed),
                    grader_id: Some(grader.user_id),
                    graded_at: Some(now),
                    feedback,
                },
            }),
            grade_records: vec![grade.clone()],
            settle: settle_scope(user, course, now),
            ..ProgressChanges::default()
        };
        let receipt = self.progress.commit(&changes).await?;
        settled(user, course, &receipt)?;

        info!(
            grader = %grader.user_id,
            submission = %submission_id,
            score = summary.score,
            passed = summary.passed,
            "project graded"
        );
        Ok(grade)
    }
}

enum ExamScoreInput<'a> {
    Itemized(&'a [ItemScore]),
    Total(u32),
}
