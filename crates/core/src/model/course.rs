use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::model::ids::{
    CourseId, ExamId, ExamQuestionId, LessonId, ModuleId, OptionId, ProjectId, QuestionId,
    SubmissionId,
};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StructureError {
    #[error("{kind} title cannot be empty")]
    EmptyTitle { kind: &'static str },

    #[error("passing score must be within 0..=100, got {0}")]
    InvalidPassingScore(u8),

    #[error("exam time limit must be > 0")]
    InvalidTimeLimit,

    #[error("project max points must be > 0")]
    InvalidMaxPoints,

    #[error("exam {0} question points exceed the supported total")]
    PointsOverflow(ExamId),

    #[error("submission content cannot be empty")]
    EmptySubmission,

    #[error("choice question needs at least two options, got {0}")]
    TooFewOptions(usize),

    #[error("choice question needs exactly one correct option, got {0}")]
    CorrectOptionCount(usize),

    #[error("position {position} is already used in {scope}")]
    DuplicatePosition { scope: String, position: u32 },

    #[error("{child} does not belong to {parent}")]
    ForeignChild {
        child: StructuralRef,
        parent: StructuralRef,
    },
}

//
// ─── REFERENCES ────────────────────────────────────────────────────────────────
//

/// Typed pointer to any structural node (or submission) of a course.
///
/// Used by storage lookups and by "not found" errors so callers can tell what
/// was missing without parsing strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructuralRef {
    Course(CourseId),
    Module(ModuleId),
    Lesson(LessonId),
    PracticeQuestion(QuestionId),
    Exam(ExamId),
    Project(ProjectId),
    Submission(SubmissionId),
}

impl fmt::Display for StructuralRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructuralRef::Course(id) => write!(f, "course {id}"),
            StructuralRef::Module(id) => write!(f, "module {id}"),
            StructuralRef::Lesson(id) => write!(f, "lesson {id}"),
            StructuralRef::PracticeQuestion(id) => write!(f, "practice question {id}"),
            StructuralRef::Exam(id) => write!(f, "exam {id}"),
            StructuralRef::Project(id) => write!(f, "project {id}"),
            StructuralRef::Submission(id) => write!(f, "submission {id}"),
        }
    }
}

fn require_title(kind: &'static str, title: impl Into<String>) -> Result<String, StructureError> {
    let title = title.into();
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(StructureError::EmptyTitle { kind });
    }
    Ok(trimmed.to_owned())
}

//
// ─── COURSE ────────────────────────────────────────────────────────────────────
//

/// Top-level catalog entry. Learners can only enroll in published courses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Course {
    id: CourseId,
    name: String,
    description: Option<String>,
    position: u32,
    published: bool,
}

impl Course {
    /// Creates a new Course.
    ///
    /// # Errors
    ///
    /// Returns `StructureError::EmptyTitle` if name is empty or whitespace-only.
    pub fn new(
        id: CourseId,
        name: impl Into<String>,
        description: Option<String>,
        position: u32,
        published: bool,
    ) -> Result<Self, StructureError> {
        let description = description
            .map(|d| d.trim().to_owned())
            .filter(|d| !d.is_empty());

        Ok(Self {
            id,
            name: require_title("course", name)?,
            description,
            position,
            published,
        })
    }

    #[must_use]
    pub fn id(&self) -> CourseId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn position(&self) -> u32 {
        self.position
    }

    #[must_use]
    pub fn is_published(&self) -> bool {
        self.published
    }

    pub fn set_published(&mut self, published: bool) {
        self.published = published;
    }
}

//
// ─── MODULE ────────────────────────────────────────────────────────────────────
//

/// Ordered grouping of lessons, practice questions and exams; the unit of
/// sequential unlocking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    id: ModuleId,
    course_id: CourseId,
    position: u32,
    title: String,
    required_level: Option<String>,
}

impl Module {
    /// # Errors
    ///
    /// Returns `StructureError::EmptyTitle` if the title is blank.
    pub fn new(
        id: ModuleId,
        course_id: CourseId,
        position: u32,
        title: impl Into<String>,
        required_level: Option<String>,
    ) -> Result<Self, StructureError> {
        Ok(Self {
            id,
            course_id,
            position,
            title: require_title("module", title)?,
            required_level: required_level
                .map(|l| l.trim().to_owned())
                .filter(|l| !l.is_empty()),
        })
    }

    #[must_use]
    pub fn id(&self) -> ModuleId {
        self.id
    }

    #[must_use]
    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    #[must_use]
    pub fn position(&self) -> u32 {
        self.position
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn required_level(&self) -> Option<&str> {
        self.required_level.as_deref()
    }
}

//
// ─── LESSON ────────────────────────────────────────────────────────────────────
//

/// Where a lesson hangs in the course tree.
///
/// `Course` is the legacy flat layout; new content lives under modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LessonOwner {
    Course(CourseId),
    Module(ModuleId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lesson {
    id: LessonId,
    owner: LessonOwner,
    position: u32,
    title: String,
    body: String,
}

impl Lesson {
    /// # Errors
    ///
    /// Returns `StructureError::EmptyTitle` if the title is blank.
    pub fn new(
        id: LessonId,
        owner: LessonOwner,
        position: u32,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self, StructureError> {
        Ok(Self {
            id,
            owner,
            position,
            title: require_title("lesson", title)?,
            body: body.into(),
        })
    }

    #[must_use]
    pub fn id(&self) -> LessonId {
        self.id
    }

    #[must_use]
    pub fn owner(&self) -> LessonOwner {
        self.owner
    }

    #[must_use]
    pub fn position(&self) -> u32 {
        self.position
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }
}

//
// ─── QUESTIONS ─────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub id: OptionId,
    pub text: String,
    pub is_correct: bool,
}

impl AnswerOption {
    #[must_use]
    pub fn new(id: OptionId, text: impl Into<String>, is_correct: bool) -> Self {
        Self {
            id,
            text: text.into(),
            is_correct,
        }
    }
}

/// Answer format of a practice question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerType {
    MultipleChoice,
    TrueFalse,
    Coding,
}

impl AnswerType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AnswerType::MultipleChoice => "multiple_choice",
            AnswerType::TrueFalse => "true_false",
            AnswerType::Coding => "coding",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "multiple_choice" => Some(Self::MultipleChoice),
            "true_false" => Some(Self::TrueFalse),
            "coding" => Some(Self::Coding),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_choice(self) -> bool {
        matches!(self, AnswerType::MultipleChoice | AnswerType::TrueFalse)
    }
}

fn validate_choice_options(options: &[AnswerOption]) -> Result<(), StructureError> {
    if options.len() < 2 {
        return Err(StructureError::TooFewOptions(options.len()));
    }
    let correct = options.iter().filter(|o| o.is_correct).count();
    if correct != 1 {
        return Err(StructureError::CorrectOptionCount(correct));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PracticeQuestion {
    id: QuestionId,
    module_id: ModuleId,
    position: u32,
    prompt: String,
    answer_type: AnswerType,
    points: u32,
    options: Vec<AnswerOption>,
}

impl PracticeQuestion {
    /// Creates a practice question.
    ///
    /// Choice questions need at least two options with exactly one marked
    /// correct. Options on coding questions are dropped.
    ///
    /// # Errors
    ///
    /// Returns `StructureError` for a blank prompt or invalid options.
    pub fn new(
        id: QuestionId,
        module_id: ModuleId,
        position: u32,
        prompt: impl Into<String>,
        answer_type: AnswerType,
        points: u32,
        options: Vec<AnswerOption>,
    ) -> Result<Self, StructureError> {
        let prompt = require_title("practice question", prompt)?;
        let options = if answer_type.is_choice() {
            validate_choice_options(&options)?;
            options
        } else {
            Vec::new()
        };

        Ok(Self {
            id,
            module_id,
            position,
            prompt,
            answer_type,
            points,
            options,
        })
    }

    #[must_use]
    pub fn id(&self) -> QuestionId {
        self.id
    }

    #[must_use]
    pub fn module_id(&self) -> ModuleId {
        self.module_id
    }

    #[must_use]
    pub fn position(&self) -> u32 {
        self.position
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[must_use]
    pub fn answer_type(&self) -> AnswerType {
        self.answer_type
    }

    #[must_use]
    pub fn points(&self) -> u32 {
        self.points
    }

    #[must_use]
    pub fn options(&self) -> &[AnswerOption] {
        &self.options
    }

    #[must_use]
    pub fn correct_option(&self) -> Option<&AnswerOption> {
        self.options.iter().find(|o| o.is_correct)
    }
}

/// Kind of an exam question; essays and coding answers need a human grader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExamQuestionKind {
    MultipleChoice,
    TrueFalse,
    Essay,
    Coding,
}

impl ExamQuestionKind {
    #[must_use]
    pub fn is_choice(self) -> bool {
        matches!(
            self,
            ExamQuestionKind::MultipleChoice | ExamQuestionKind::TrueFalse
        )
    }

    #[must_use]
    pub fn requires_manual_grading(self) -> bool {
        !self.is_choice()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamQuestion {
    id: ExamQuestionId,
    position: u32,
    prompt: String,
    kind: ExamQuestionKind,
    points: u32,
    options: Vec<AnswerOption>,
}

impl ExamQuestion {
    /// # Errors
    ///
    /// Returns `StructureError` for a blank prompt or invalid choice options.
    pub fn new(
        id: ExamQuestionId,
        position: u32,
        prompt: impl Into<String>,
        kind: ExamQuestionKind,
        points: u32,
        options: Vec<AnswerOption>,
    ) -> Result<Self, StructureError> {
        let prompt = require_title("exam question", prompt)?;
        let options = if kind.is_choice() {
            validate_choice_options(&options)?;
            options
        } else {
            Vec::new()
        };
        Ok(Self {
            id,
            position,
            prompt,
            kind,
            points,
            options,
        })
    }

    #[must_use]
    pub fn id(&self) -> ExamQuestionId {
        self.id
    }

    #[must_use]
    pub fn position(&self) -> u32 {
        self.position
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[must_use]
    pub fn kind(&self) -> ExamQuestionKind {
        self.kind
    }

    #[must_use]
    pub fn points(&self) -> u32 {
        self.points
    }

    #[must_use]
    pub fn options(&self) -> &[AnswerOption] {
        &self.options
    }

    #[must_use]
    pub fn correct_option(&self) -> Option<&AnswerOption> {
        self.options.iter().find(|o| o.is_correct)
    }
}

//
// ─── EXAM ──────────────────────────────────────────────────────────────────────
//

/// What an exam gates: one module, or the whole course (final exam).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExamScope {
    Module(ModuleId),
    Final(CourseId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exam {
    id: ExamId,
    scope: ExamScope,
    title: String,
    passing_score: u8,
    time_limit_minutes: u32,
    questions: Vec<ExamQuestion>,
}

impl Exam {
    /// Creates an exam. Questions are sorted by position.
    ///
    /// # Errors
    ///
    /// Returns `StructureError` for a blank title, a passing score above 100,
    /// a zero time limit, two questions sharing a position, or question
    /// points that do not fit in a `u32` total.
    pub fn new(
        id: ExamId,
        scope: ExamScope,
        title: impl Into<String>,
        passing_score: u8,
        time_limit_minutes: u32,
        mut questions: Vec<ExamQuestion>,
    ) -> Result<Self, StructureError> {
        let title = require_title("exam", title)?;
        if passing_score > 100 {
            return Err(StructureError::InvalidPassingScore(passing_score));
        }
        if time_limit_minutes == 0 {
            return Err(StructureError::InvalidTimeLimit);
        }
        sort_by_position(&mut questions, StructuralRef::Exam(id), ExamQuestion::position)?;
        questions
            .iter()
            .try_fold(0u32, |total, q| total.checked_add(q.points()))
            .ok_or(StructureError::PointsOverflow(id))?;

        Ok(Self {
            id,
            scope,
            title,
            passing_score,
            time_limit_minutes,
            questions,
        })
    }

    #[must_use]
    pub fn id(&self) -> ExamId {
        self.id
    }

    #[must_use]
    pub fn scope(&self) -> ExamScope {
        self.scope
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Passing threshold as a percentage of `max_score`.
    #[must_use]
    pub fn passing_score(&self) -> u8 {
        self.passing_score
    }

    #[must_use]
    pub fn time_limit_minutes(&self) -> u32 {
        self.time_limit_minutes
    }

    #[must_use]
    pub fn questions(&self) -> &[ExamQuestion] {
        &self.questions
    }

    #[must_use]
    pub fn question(&self, id: ExamQuestionId) -> Option<&ExamQuestion> {
        self.questions.iter().find(|q| q.id() == id)
    }

    /// Sum of question points. `new` guarantees it fits.
    #[must_use]
    pub fn max_score(&self) -> u32 {
        self.questions
            .iter()
            .fold(0u32, |total, q| total.saturating_add(q.points()))
    }

    #[must_use]
    pub fn requires_manual_grading(&self) -> bool {
        self.questions
            .iter()
            .any(|q| q.kind().requires_manual_grading())
    }
}

//
// ─── PROJECT ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    id: ProjectId,
    course_id: CourseId,
    position: u32,
    title: String,
    max_points: u32,
}

impl Project {
    /// # Errors
    ///
    /// Returns `StructureError` for a blank title or zero max points.
    pub fn new(
        id: ProjectId,
        course_id: CourseId,
        position: u32,
        title: impl Into<String>,
        max_points: u32,
    ) -> Result<Self, StructureError> {
        let title = require_title("project", title)?;
        if max_points == 0 {
            return Err(StructureError::InvalidMaxPoints);
        }
        Ok(Self {
            id,
            course_id,
            position,
            title,
            max_points,
        })
    }

    #[must_use]
    pub fn id(&self) -> ProjectId {
        self.id
    }

    #[must_use]
    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    #[must_use]
    pub fn position(&self) -> u32 {
        self.position
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn max_points(&self) -> u32 {
        self.max_points
    }
}

//
// ─── ORDERING ──────────────────────────────────────────────────────────────────
//

/// Sorts one scope by position and rejects ties.
///
/// Positions may have gaps; they only need to be strictly increasing.
pub(crate) fn sort_by_position<T>(
    items: &mut [T],
    scope: StructuralRef,
    position: impl Fn(&T) -> u32,
) -> Result<(), StructureError> {
    items.sort_by_key(|item| position(item));
    for pair in items.windows(2) {
        let pos = position(&pair[0]);
        if pos == position(&pair[1]) {
            return Err(StructureError::DuplicatePosition {
                scope: scope.to_string(),
                position: pos,
            });
        }
    }
    Ok(())
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Vec<AnswerOption> {
        vec![
            AnswerOption::new(OptionId::new(1), "fn", true),
            AnswerOption::new(OptionId::new(2), "def", false),
        ]
    }

    #[test]
    fn course_rejects_blank_name_and_trims() {
        let err = Course::new(CourseId::new(1), "  ", None, 1, true).unwrap_err();
        assert_eq!(err, StructureError::EmptyTitle { kind: "course" });

        let course = Course::new(CourseId::new(1), " Rust ", Some("  ".into()), 1, false).unwrap();
        assert_eq!(course.name(), "Rust");
        assert_eq!(course.description(), None);
        assert!(!course.is_published());
    }

    #[test]
    fn choice_question_needs_single_correct_option() {
        let mut opts = options();
        opts[1].is_correct = true;
        let err = PracticeQuestion::new(
            QuestionId::new(1),
            ModuleId::new(1),
            1,
            "Keyword?",
            AnswerType::MultipleChoice,
            5,
            opts,
        )
        .unwrap_err();
        assert_eq!(err, StructureError::CorrectOptionCount(2));

        let err = PracticeQuestion::new(
            QuestionId::new(1),
            ModuleId::new(1),
            1,
            "Keyword?",
            AnswerType::TrueFalse,
            5,
            options()[..1].to_vec(),
        )
        .unwrap_err();
        assert_eq!(err, StructureError::TooFewOptions(1));
    }

    #[test]
    fn coding_question_drops_options() {
        let q = PracticeQuestion::new(
            QuestionId::new(1),
            ModuleId::new(1),
            1,
            "Write fizzbuzz",
            AnswerType::Coding,
            10,
            options(),
        )
        .unwrap();
        assert!(q.options().is_empty());
        assert!(q.correct_option().is_none());
    }

    #[test]
    fn exam_sorts_questions_and_rejects_ties() {
        let q = |id: u64, pos: u32| {
            ExamQuestion::new(
                ExamQuestionId::new(id),
                pos,
                format!("Q{id}"),
                ExamQuestionKind::Essay,
                10,
                Vec::new(),
            )
            .unwrap()
        };

        let exam = Exam::new(
            ExamId::new(1),
            ExamScope::Module(ModuleId::new(1)),
            "Quiz",
            70,
            30,
            vec![q(2, 20), q(1, 5)],
        )
        .unwrap();
        assert_eq!(exam.questions()[0].id(), ExamQuestionId::new(1));
        assert_eq!(exam.max_score(), 20);
        assert!(exam.requires_manual_grading());

        let err = Exam::new(
            ExamId::new(1),
            ExamScope::Module(ModuleId::new(1)),
            "Quiz",
            70,
            30,
            vec![q(1, 5), q(2, 5)],
        )
        .unwrap_err();
        assert!(matches!(err, StructureError::DuplicatePosition { position: 5, .. }));
    }

    #[test]
    fn exam_rejects_invalid_threshold_and_time_limit() {
        let err = Exam::new(
            ExamId::new(1),
            ExamScope::Final(CourseId::new(1)),
            "Final",
            101,
            30,
            Vec::new(),
        )
        .unwrap_err();
        assert_eq!(err, StructureError::InvalidPassingScore(101));

        let err = Exam::new(
            ExamId::new(1),
            ExamScope::Final(CourseId::new(1)),
            "Final",
            60,
            0,
            Vec::new(),
        )
        .unwrap_err();
        assert_eq!(err, StructureError::InvalidTimeLimit);
    }

    #[test]
    fn exam_rejects_points_past_u32() {
        let q = |id: u64, points: u32| {
            ExamQuestion::new(
                ExamQuestionId::new(id),
                u32::try_from(id).unwrap(),
                format!("Q{id}"),
                ExamQuestionKind::Essay,
                points,
                Vec::new(),
            )
            .unwrap()
        };

        let err = Exam::new(
            ExamId::new(9),
            ExamScope::Final(CourseId::new(1)),
            "Final",
            50,
            30,
            vec![q(1, u32::MAX), q(2, 1)],
        )
        .unwrap_err();
        assert_eq!(err, StructureError::PointsOverflow(ExamId::new(9)));

        let exam = Exam::new(
            ExamId::new(9),
            ExamScope::Final(CourseId::new(1)),
            "Final",
            50,
            30,
            vec![q(1, u32::MAX - 1), q(2, 1)],
        )
        .unwrap();
        assert_eq!(exam.max_score(), u32::MAX);
    }

    #[test]
    fn project_requires_points() {
        let err = Project::new(ProjectId::new(1), CourseId::new(1), 1, "Capstone", 0).unwrap_err();
        assert_eq!(err, StructureError::InvalidMaxPoints);
    }

    #[test]
    fn answer_type_round_trips_storage_names() {
        for t in [
            AnswerType::MultipleChoice,
            AnswerType::TrueFalse,
            AnswerType::Coding,
        ] {
            assert_eq!(AnswerType::parse(t.as_str()), Some(t));
        }
        assert_eq!(AnswerType::parse("essay"), None);
    }
}
