use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::model::ids::{
    CourseId, ExamId, ExamQuestionId, LessonId, ModuleId, OptionId, ProjectId, QuestionId,
    SubmissionId, UserId,
};

//
// ─── ENROLLMENT / COMPLETIONS ──────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrollment {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub enrolled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Enrollment {
    #[must_use]
    pub fn new(user_id: UserId, course_id: CourseId, enrolled_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            course_id,
            enrolled_at,
            completed_at: None,
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonCompletion {
    pub user_id: UserId,
    pub lesson_id: LessonId,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleCompletion {
    pub user_id: UserId,
    pub module_id: ModuleId,
    pub completed_at: DateTime<Utc>,
}

/// Materialized course percentage, rewritten on every completion event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProgress {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub percentage: u8,
    pub updated_at: DateTime<Utc>,
}

//
// ─── ANSWERS ───────────────────────────────────────────────────────────────────
//

/// A learner's raw answer: a picked option for choice questions, free text
/// for essays and code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Answer {
    Choice(OptionId),
    Text(String),
}

/// Grading state of a practice answer.
///
/// Coding answers start as `Pending` until a human looks at them; pending is
/// never treated as wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Correctness {
    Pending,
    Correct,
    Incorrect,
}

impl Correctness {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Correctness::Pending => "pending",
            Correctness::Correct => "correct",
            Correctness::Incorrect => "incorrect",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "correct" => Some(Self::Correct),
            "incorrect" => Some(Self::Incorrect),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_settled(self) -> bool {
        !matches!(self, Correctness::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PracticeSubmission {
    pub user_id: UserId,
    pub question_id: QuestionId,
    pub answer: Answer,
    pub correctness: Correctness,
    pub points_awarded: u32,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamAnswer {
    pub question_id: ExamQuestionId,
    pub answer: Answer,
}

/// Points given to one exam question, either by auto-grading or by a grader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemScore {
    pub question_id: ExamQuestionId,
    pub score: u32,
}

//
// ─── SUBMISSIONS ───────────────────────────────────────────────────────────────
//

/// Grading fields shared by exam and project submissions.
///
/// `passed` stays `None` until the submission is graded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GradingFields {
    pub score: Option<u32>,
    pub passed: Option<bool>,
    pub grader_id: Option<UserId>,
    pub graded_at: Option<DateTime<Utc>>,
    pub feedback: Option<String>,
}

impl GradingFields {
    #[must_use]
    pub fn is_graded(&self) -> bool {
        self.passed.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamSubmission {
    /// Assigned by storage on insert.
    pub id: Option<SubmissionId>,
    pub user_id: UserId,
    pub exam_id: ExamId,
    pub answers: Vec<ExamAnswer>,
    pub item_scores: Vec<ItemScore>,
    pub max_score: u32,
    pub grading: GradingFields,
    pub submitted_at: DateTime<Utc>,
}

impl ExamSubmission {
    #[must_use]
    pub fn is_graded(&self) -> bool {
        self.grading.is_graded()
    }

    #[must_use]
    pub fn is_passing(&self) -> bool {
        self.grading.passed == Some(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSubmission {
    /// Assigned by storage on insert.
    pub id: Option<SubmissionId>,
    pub user_id: UserId,
    pub project_id: ProjectId,
    pub content: String,
    pub max_score: u32,
    pub grading: GradingFields,
    pub submitted_at: DateTime<Utc>,
}

impl ProjectSubmission {
    #[must_use]
    pub fn is_passing(&self) -> bool {
        self.grading.passed == Some(true)
    }
}

//
// ─── LEARNER RECORDS ───────────────────────────────────────────────────────────
//

/// One learner's completion and submission facts for one course.
///
/// This is the only learner-side input of the progression rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LearnerRecords {
    completed_lessons: HashSet<LessonId>,
    practice: HashMap<QuestionId, Correctness>,
    exams: HashMap<ExamId, Option<bool>>,
    projects: HashMap<ProjectId, Option<bool>>,
    completed_modules: HashSet<ModuleId>,
}

impl LearnerRecords {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from persisted records.
    #[must_use]
    pub fn from_records(
        lessons: &[LessonCompletion],
        practice: &[PracticeSubmission],
        exams: &[ExamSubmission],
        projects: &[ProjectSubmission],
        modules: &[ModuleCompletion],
    ) -> Self {
        let mut records = Self::new();
        for l in lessons {
            records.record_lesson(l.lesson_id);
        }
        for p in practice {
            records.record_practice(p.question_id, p.correctness);
        }
        for e in exams {
            records.record_exam(e.exam_id, e.grading.passed);
        }
        for p in projects {
            records.record_project(p.project_id, p.grading.passed);
        }
        for m in modules {
            records.record_module(m.module_id);
        }
        records
    }

    pub fn record_lesson(&mut self, id: LessonId) {
        self.completed_lessons.insert(id);
    }

    pub fn record_practice(&mut self, id: QuestionId, correctness: Correctness) {
        self.practice.insert(id, correctness);
    }

    /// `passed` is `None` while the attempt waits for a grader.
    pub fn record_exam(&mut self, id: ExamId, passed: Option<bool>) {
        self.exams.insert(id, passed);
    }

    pub fn record_project(&mut self, id: ProjectId, passed: Option<bool>) {
        self.projects.insert(id, passed);
    }

    pub fn record_module(&mut self, id: ModuleId) {
        self.completed_modules.insert(id);
    }

    #[must_use]
    pub fn has_completed_lesson(&self, id: LessonId) -> bool {
        self.completed_lessons.contains(&id)
    }

    #[must_use]
    pub fn practice_state(&self, id: QuestionId) -> Option<Correctness> {
        self.practice.get(&id).copied()
    }

    #[must_use]
    pub fn has_submitted_practice(&self, id: QuestionId) -> bool {
        self.practice.contains_key(&id)
    }

    #[must_use]
    pub fn has_attempted_exam(&self, id: ExamId) -> bool {
        self.exams.contains_key(&id)
    }

    /// `Some(passed)` once graded, `None` if not attempted or still pending.
    #[must_use]
    pub fn exam_result(&self, id: ExamId) -> Option<bool> {
        self.exams.get(&id).copied().flatten()
    }

    #[must_use]
    pub fn has_passed_exam(&self, id: ExamId) -> bool {
        self.exam_result(id) == Some(true)
    }

    #[must_use]
    pub fn has_submitted_project(&self, id: ProjectId) -> bool {
        self.projects.contains_key(&id)
    }

    #[must_use]
    pub fn has_passed_project(&self, id: ProjectId) -> bool {
        self.projects.get(&id).copied().flatten() == Some(true)
    }

    #[must_use]
    pub fn has_completed_module(&self, id: ModuleId) -> bool {
        self.completed_modules.contains(&id)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn pending_is_not_settled() {
        assert!(!Correctness::Pending.is_settled());
        assert!(Correctness::Incorrect.is_settled());
        assert_eq!(Correctness::parse("correct"), Some(Correctness::Correct));
        assert_eq!(Correctness::parse("maybe"), None);
    }

    #[test]
    fn records_distinguish_pending_and_passed_exams() {
        let now = fixed_now();
        let graded = ExamSubmission {
            id: Some(SubmissionId::new(1)),
            user_id: UserId::new(1),
            exam_id: ExamId::new(1),
            answers: Vec::new(),
            item_scores: Vec::new(),
            max_score: 10,
            grading: GradingFields {
                score: Some(8),
                passed: Some(true),
                ..GradingFields::default()
            },
            submitted_at: now,
        };
        let pending = ExamSubmission {
            id: Some(SubmissionId::new(2)),
            exam_id: ExamId::new(2),
            grading: GradingFields::default(),
            ..graded.clone()
        };

        let records = LearnerRecords::from_records(&[], &[], &[graded, pending], &[], &[]);

        assert!(records.has_passed_exam(ExamId::new(1)));
        assert!(records.has_attempted_exam(ExamId::new(2)));
        assert!(!records.has_passed_exam(ExamId::new(2)));
        assert_eq!(records.exam_result(ExamId::new(2)), None);
        assert!(!records.has_attempted_exam(ExamId::new(3)));
    }

    #[test]
    fn enrollment_starts_incomplete() {
        let e = Enrollment::new(UserId::new(1), CourseId::new(1), fixed_now());
        assert!(!e.is_completed());
    }
}
