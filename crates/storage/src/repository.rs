use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mastermore_core::model::{
    Course, CourseId, CourseTree, Enrollment, Exam, ExamId, ExamScope, ExamSubmission,
    GradeRecord, GradingFields, ItemScore, LearnerRecords, Lesson, LessonCompletion, LessonId,
    LessonOwner, Module, ModuleCompletion, ModuleId, ModuleTree, PracticeQuestion,
    PracticeSubmission, Project, ProjectId, ProjectSubmission, QuestionId, StructuralRef,
    SubmissionId, UserId, UserProgress,
};
use mastermore_core::progression::{Settlement, settle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    /// A uniqueness rule was violated (duplicate id, position or
    /// single-attempt submission).
    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

//
// ─── WRITE SETS ────────────────────────────────────────────────────────────────
//

/// Grading fields to write onto an existing exam submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamGrading {
    pub submission_id: SubmissionId,
    pub item_scores: Vec<ItemScore>,
    pub grading: GradingFields,
}

/// Grading fields to write onto an existing project submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectGrading {
    pub submission_id: SubmissionId,
    pub grading: GradingFields,
}

/// Asks `commit` to recompute one learner's derived course state (module
/// completions, cached percentage, course completion) from the rows it sees
/// inside its own transaction, after the event's writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleScope {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub at: DateTime<Utc>,
}

/// Everything one learner or grader event writes. Committed all-or-nothing.
///
/// Write semantics per field:
/// - `enrollment`: create if absent.
/// - `lesson_completions`: upsert, refreshing the timestamp.
/// - `practice_submissions`, `exam_submission`, `project_submission`: insert;
///   an existing row for the same (user, item) fails with `Conflict`.
/// - `exam_grading`, `project_grading`: update grading fields only.
/// - `grade_records`: append.
/// - `settle`: applied last, serialized with every other commit. New module
///   completions are created, `UserProgress` is upserted and an open
///   enrollment is closed at 100%.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressChanges {
    pub enrollment: Option<Enrollment>,
    pub lesson_completions: Vec<LessonCompletion>,
    pub practice_submissions: Vec<PracticeSubmission>,
    pub exam_submission: Option<ExamSubmission>,
    pub project_submission: Option<ProjectSubmission>,
    pub exam_grading: Option<ExamGrading>,
    pub project_grading: Option<ProjectGrading>,
    pub grade_records: Vec<GradeRecord>,
    pub settle: Option<SettleScope>,
}

/// Ids assigned by storage while committing, and the derived state computed
/// for `ProgressChanges::settle`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    pub exam_submission_id: Option<SubmissionId>,
    pub project_submission_id: Option<SubmissionId>,
    pub settlement: Option<Settlement>,
}

//
// ─── PENDING QUEUE ─────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingKind {
    Project,
    ModuleExam,
    FinalExam,
}

impl PendingKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PendingKind::Project => "project",
            PendingKind::ModuleExam => "module_exam",
            PendingKind::FinalExam => "final_exam",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "project" => Some(Self::Project),
            "module_exam" => Some(Self::ModuleExam),
            "final_exam" => Some(Self::FinalExam),
            _ => None,
        }
    }
}

/// An ungraded submission waiting for a human grader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingSubmission {
    Exam(ExamSubmission),
    Project(ProjectSubmission),
}

impl PendingSubmission {
    #[must_use]
    pub fn id(&self) -> Option<SubmissionId> {
        match self {
            PendingSubmission::Exam(s) => s.id,
            PendingSubmission::Project(s) => s.id,
        }
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        match self {
            PendingSubmission::Exam(s) => s.user_id,
            PendingSubmission::Project(s) => s.user_id,
        }
    }

    #[must_use]
    pub fn submitted_at(&self) -> DateTime<Utc> {
        match self {
            PendingSubmission::Exam(s) => s.submitted_at,
            PendingSubmission::Project(s) => s.submitted_at,
        }
    }
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

/// Course structure: written by admins, read by everyone.
#[async_trait]
pub trait CourseRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the id is taken.
    async fn insert_course(&self, course: &Course) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the course does not exist.
    async fn set_course_published(&self, id: CourseId, published: bool)
    -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the course does not exist.
    async fn get_course(&self, id: CourseId) -> Result<Course, StorageError>;

    /// All courses ordered by position.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the query fails.
    async fn list_courses(&self) -> Result<Vec<Course>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::Conflict` on a taken id or position, or
    /// `StorageError::NotFound` if the parent course is missing.
    async fn insert_module(&self, module: &Module) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Same as [`CourseRepository::insert_module`], for the lesson's owner.
    async fn insert_lesson(&self, lesson: &Lesson) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Same as [`CourseRepository::insert_module`], for the owning module.
    async fn insert_practice_question(&self, question: &PracticeQuestion)
    -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::Conflict` on a taken id or a second final exam
    /// for the same course, `StorageError::NotFound` if the owner is missing.
    async fn insert_exam(&self, exam: &Exam) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Same as [`CourseRepository::insert_module`].
    async fn insert_project(&self, project: &Project) -> Result<(), StorageError>;

    /// Load the full ordered structure of a course.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the course does not exist.
    async fn load_tree(&self, id: CourseId) -> Result<CourseTree, StorageError>;

    /// Course owning a structural node, or `None` if the node does not exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the query fails.
    async fn locate(&self, node: StructuralRef) -> Result<Option<CourseId>, StorageError>;
}

/// Learner-side reads.
#[async_trait]
pub trait LearnerRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the query fails.
    async fn get_enrollment(
        &self,
        user: UserId,
        course: CourseId,
    ) -> Result<Option<Enrollment>, StorageError>;

    /// Completion and submission facts of one learner, limited to one course.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the query fails.
    async fn learner_records(
        &self,
        user: UserId,
        course: CourseId,
    ) -> Result<LearnerRecords, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the query fails.
    async fn user_progress(
        &self,
        user: UserId,
        course: CourseId,
    ) -> Result<Option<UserProgress>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the query fails.
    async fn practice_submission(
        &self,
        user: UserId,
        question: QuestionId,
    ) -> Result<Option<PracticeSubmission>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the submission does not exist.
    async fn exam_submission(&self, id: SubmissionId) -> Result<ExamSubmission, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the submission does not exist.
    async fn project_submission(&self, id: SubmissionId)
    -> Result<ProjectSubmission, StorageError>;

    /// Ungraded submissions of one kind, oldest first (ties by id).
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the query fails.
    async fn pending_submissions(
        &self,
        kind: PendingKind,
    ) -> Result<Vec<PendingSubmission>, StorageError>;

    /// Grade audit entries of one user, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the query fails.
    async fn grade_history(&self, user: UserId) -> Result<Vec<GradeRecord>, StorageError>;
}

/// Atomic application of a learner or grader event.
#[async_trait]
pub trait ProgressPersistence: Send + Sync {
    /// Apply every write in `changes` or none of them.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` when a single-attempt row already
    /// exists, `StorageError::NotFound` when a graded submission is missing,
    /// or other storage errors. Nothing is written on error.
    async fn commit(&self, changes: &ProgressChanges) -> Result<CommitReceipt, StorageError>;
}

//
// ─── IN-MEMORY BACKEND ─────────────────────────────────────────────────────────
//

#[derive(Debug, Default)]
struct MemoryState {
    courses: HashMap<CourseId, Course>,
    modules: HashMap<ModuleId, Module>,
    lessons: HashMap<LessonId, Lesson>,
    questions: HashMap<QuestionId, PracticeQuestion>,
    exams: HashMap<ExamId, Exam>,
    projects: HashMap<ProjectId, Project>,

    enrollments: HashMap<(UserId, CourseId), Enrollment>,
    lesson_completions: HashMap<(UserId, LessonId), LessonCompletion>,
    practice: HashMap<(UserId, QuestionId), PracticeSubmission>,
    exam_submissions: Vec<ExamSubmission>,
    project_submissions: Vec<ProjectSubmission>,
    module_completions: HashMap<(UserId, ModuleId), ModuleCompletion>,
    progress: HashMap<(UserId, CourseId), UserProgress>,
    grades: Vec<GradeRecord>,
}

impl MemoryState {
    fn course_of(&self, node: StructuralRef) -> Option<CourseId> {
        match node {
            StructuralRef::Course(id) => self.courses.contains_key(&id).then_some(id),
            StructuralRef::Module(id) => self.modules.get(&id).map(Module::course_id),
            StructuralRef::Lesson(id) => match self.lessons.get(&id)?.owner() {
                LessonOwner::Course(course) => Some(course),
                LessonOwner::Module(module) => self.course_of(StructuralRef::Module(module)),
            },
            StructuralRef::PracticeQuestion(id) => {
                let module = self.questions.get(&id)?.module_id();
                self.course_of(StructuralRef::Module(module))
            }
            StructuralRef::Exam(id) => match self.exams.get(&id)?.scope() {
                ExamScope::Final(course) => Some(course),
                ExamScope::Module(module) => self.course_of(StructuralRef::Module(module)),
            },
            StructuralRef::Project(id) => self.projects.get(&id).map(Project::course_id),
            StructuralRef::Submission(_) => None,
        }
    }

    fn in_course(&self, node: StructuralRef, course: CourseId) -> bool {
        self.course_of(node) == Some(course)
    }

    fn lesson_position_taken(&self, lesson: &Lesson) -> bool {
        self.lessons
            .values()
            .any(|l| l.owner() == lesson.owner() && l.position() == lesson.position())
    }

    fn tree(&self, id: CourseId) -> Result<CourseTree, StorageError> {
        let course = self.courses.get(&id).cloned().ok_or(StorageError::NotFound)?;

        let mut modules = Vec::new();
        for module in self.modules.values().filter(|m| m.course_id() == id) {
            let owner = LessonOwner::Module(module.id());
            let lessons = self
                .lessons
                .values()
                .filter(|l| l.owner() == owner)
                .cloned()
                .collect();
            let questions = self
                .questions
                .values()
                .filter(|q| q.module_id() == module.id())
                .cloned()
                .collect();
            let exams = self
                .exams
                .values()
                .filter(|e| e.scope() == ExamScope::Module(module.id()))
                .cloned()
                .collect();
            modules.push(
                ModuleTree::new(module.clone(), lessons, questions, exams)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?,
            );
        }

        let direct = self
            .lessons
            .values()
            .filter(|l| l.owner() == LessonOwner::Course(id))
            .cloned()
            .collect();
        let projects = self
            .projects
            .values()
            .filter(|p| p.course_id() == id)
            .cloned()
            .collect();
        let final_exam = self
            .exams
            .values()
            .find(|e| e.scope() == ExamScope::Final(id))
            .cloned();

        CourseTree::new(course, modules, direct, projects, final_exam)
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }

    fn records(&self, user: UserId, course: CourseId) -> LearnerRecords {
        let mut records = LearnerRecords::new();
        for c in self.lesson_completions.values() {
            if c.user_id == user && self.in_course(StructuralRef::Lesson(c.lesson_id), course) {
                records.record_lesson(c.lesson_id);
            }
        }
        for p in self.practice.values() {
            if p.user_id == user
                && self.in_course(StructuralRef::PracticeQuestion(p.question_id), course)
            {
                records.record_practice(p.question_id, p.correctness);
            }
        }
        for s in &self.exam_submissions {
            if s.user_id == user && self.in_course(StructuralRef::Exam(s.exam_id), course) {
                records.record_exam(s.exam_id, s.grading.passed);
            }
        }
        for s in &self.project_submissions {
            if s.user_id == user && self.in_course(StructuralRef::Project(s.project_id), course)
            {
                records.record_project(s.project_id, s.grading.passed);
            }
        }
        for m in self.module_completions.values() {
            if m.user_id == user && self.in_course(StructuralRef::Module(m.module_id), course) {
                records.record_module(m.module_id);
            }
        }
        records
    }

    /// Recompute and store one learner's derived course state.
    fn settle(&mut self, scope: SettleScope, tree: &CourseTree) -> Settlement {
        let SettleScope {
            user_id,
            course_id,
            at,
        } = scope;
        let mut records = self.records(user_id, course_id);
        let enrollment = self.enrollments.get_mut(&(user_id, course_id));
        let open = enrollment.as_ref().is_some_and(|e| !e.is_completed());
        let settlement = settle(tree, &mut records, open);

        if settlement.course_completed {
            if let Some(e) = enrollment {
                e.completed_at = Some(at);
            }
        }
        for module_id in &settlement.completed_modules {
            self.module_completions
                .entry((user_id, *module_id))
                .or_insert(ModuleCompletion {
                    user_id,
                    module_id: *module_id,
                    completed_at: at,
                });
        }
        self.progress.insert(
            (user_id, course_id),
            UserProgress {
                user_id,
                course_id,
                percentage: settlement.percentage,
                updated_at: at,
            },
        );
        settlement
    }

    /// Every check `commit` needs before it mutates anything.
    fn validate(&self, changes: &ProgressChanges) -> Result<(), StorageError> {
        for p in &changes.practice_submissions {
            if self.practice.contains_key(&(p.user_id, p.question_id)) {
                return Err(StorageError::Conflict);
            }
        }
        if let Some(new) = &changes.exam_submission {
            if self
                .exam_submissions
                .iter()
                .any(|s| s.user_id == new.user_id && s.exam_id == new.exam_id)
            {
                return Err(StorageError::Conflict);
            }
        }
        if let Some(new) = &changes.project_submission {
            if self
                .project_submissions
                .iter()
                .any(|s| s.user_id == new.user_id && s.project_id == new.project_id)
            {
                return Err(StorageError::Conflict);
            }
        }
        if let Some(g) = &changes.exam_grading {
            if !self
                .exam_submissions
                .iter()
                .any(|s| s.id == Some(g.submission_id))
            {
                return Err(StorageError::NotFound);
            }
        }
        if let Some(g) = &changes.project_grading {
            if !self
                .project_submissions
                .iter()
                .any(|s| s.id == Some(g.submission_id))
            {
                return Err(StorageError::NotFound);
            }
        }
        Ok(())
    }
}

fn next_submission_id(len: usize) -> Result<SubmissionId, StorageError> {
    u64::try_from(len + 1)
        .map(SubmissionId::new)
        .map_err(|_| StorageError::Serialization("submission id overflow".into()))
}

/// Simple in-memory repository implementation for testing and prototyping.
///
/// All state sits behind one lock so `commit` is atomic.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

#[async_trait]
impl CourseRepository for InMemoryRepository {
    async fn insert_course(&self, course: &Course) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if guard.courses.contains_key(&course.id()) {
            return Err(StorageError::Conflict);
        }
        guard.courses.insert(course.id(), course.clone());
        Ok(())
    }

    async fn set_course_published(
        &self,
        id: CourseId,
        published: bool,
    ) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let course = guard.courses.get_mut(&id).ok_or(StorageError::NotFound)?;
        course.set_published(published);
        Ok(())
    }

    async fn get_course(&self, id: CourseId) -> Result<Course, StorageError> {
        let guard = self.lock()?;
        guard.courses.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn list_courses(&self) -> Result<Vec<Course>, StorageError> {
        let guard = self.lock()?;
        let mut courses: Vec<Course> = guard.courses.values().cloned().collect();
        courses.sort_by_key(|c| (c.position(), c.id()));
        Ok(courses)
    }

    async fn insert_module(&self, module: &Module) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if !guard.courses.contains_key(&module.course_id()) {
            return Err(StorageError::NotFound);
        }
        let position_taken = guard
            .modules
            .values()
            .any(|m| m.course_id() == module.course_id() && m.position() == module.position());
        if guard.modules.contains_key(&module.id()) || position_taken {
            return Err(StorageError::Conflict);
        }
        guard.modules.insert(module.id(), module.clone());
        Ok(())
    }

    async fn insert_lesson(&self, lesson: &Lesson) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let owner_exists = match lesson.owner() {
            LessonOwner::Course(id) => guard.courses.contains_key(&id),
            LessonOwner::Module(id) => guard.modules.contains_key(&id),
        };
        if !owner_exists {
            return Err(StorageError::NotFound);
        }
        if guard.lessons.contains_key(&lesson.id()) || guard.lesson_position_taken(lesson) {
            return Err(StorageError::Conflict);
        }
        guard.lessons.insert(lesson.id(), lesson.clone());
        Ok(())
    }

    async fn insert_practice_question(
        &self,
        question: &PracticeQuestion,
    ) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if !guard.modules.contains_key(&question.module_id()) {
            return Err(StorageError::NotFound);
        }
        let position_taken = guard.questions.values().any(|q| {
            q.module_id() == question.module_id() && q.position() == question.position()
        });
        if guard.questions.contains_key(&question.id()) || position_taken {
            return Err(StorageError::Conflict);
        }
        guard.questions.insert(question.id(), question.clone());
        Ok(())
    }

    async fn insert_exam(&self, exam: &Exam) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let owner_exists = match exam.scope() {
            ExamScope::Module(id) => guard.modules.contains_key(&id),
            ExamScope::Final(id) => guard.courses.contains_key(&id),
        };
        if !owner_exists {
            return Err(StorageError::NotFound);
        }
        let second_final = matches!(exam.scope(), ExamScope::Final(_))
            && guard.exams.values().any(|e| e.scope() == exam.scope());
        if guard.exams.contains_key(&exam.id()) || second_final {
            return Err(StorageError::Conflict);
        }
        guard.exams.insert(exam.id(), exam.clone());
        Ok(())
    }

    async fn insert_project(&self, project: &Project) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if !guard.courses.contains_key(&project.course_id()) {
            return Err(StorageError::NotFound);
        }
        let position_taken = guard.projects.values().any(|p| {
            p.course_id() == project.course_id() && p.position() == project.position()
        });
        if guard.projects.contains_key(&project.id()) || position_taken {
            return Err(StorageError::Conflict);
        }
        guard.projects.insert(project.id(), project.clone());
        Ok(())
    }

    async fn load_tree(&self, id: CourseId) -> Result<CourseTree, StorageError> {
        self.lock()?.tree(id)
    }

    async fn locate(&self, node: StructuralRef) -> Result<Option<CourseId>, StorageError> {
        let guard = self.lock()?;
        Ok(guard.course_of(node))
    }
}

#[async_trait]
impl LearnerRepository for InMemoryRepository {
    async fn get_enrollment(
        &self,
        user: UserId,
        course: CourseId,
    ) -> Result<Option<Enrollment>, StorageError> {
        let guard = self.lock()?;
        Ok(guard.enrollments.get(&(user, course)).cloned())
    }

    async fn learner_records(
        &self,
        user: UserId,
        course: CourseId,
    ) -> Result<LearnerRecords, StorageError> {
        Ok(self.lock()?.records(user, course))
    }

    async fn user_progress(
        &self,
        user: UserId,
        course: CourseId,
    ) -> Result<Option<UserProgress>, StorageError> {
        let guard = self.lock()?;
        Ok(guard.progress.get(&(user, course)).cloned())
    }

    async fn practice_submission(
        &self,
        user: UserId,
        question: QuestionId,
    ) -> Result<Option<PracticeSubmission>, StorageError> {
        let guard = self.lock()?;
        Ok(guard.practice.get(&(user, question)).cloned())
    }

    async fn exam_submission(&self, id: SubmissionId) -> Result<ExamSubmission, StorageError> {
        let guard = self.lock()?;
        guard
            .exam_submissions
            .iter()
            .find(|s| s.id == Some(id))
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn project_submission(
        &self,
        id: SubmissionId,
    ) -> Result<ProjectSubmission, StorageError> {
        let guard = self.lock()?;
        guard
            .project_submissions
            .iter()
            .find(|s| s.id == Some(id))
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn pending_submissions(
        &self,
        kind: PendingKind,
    ) -> Result<Vec<PendingSubmission>, StorageError> {
        let guard = self.lock()?;
        let mut pending: Vec<PendingSubmission> = match kind {
            PendingKind::Project => guard
                .project_submissions
                .iter()
                .filter(|s| !s.grading.is_graded())
                .cloned()
                .map(PendingSubmission::Project)
                .collect(),
            PendingKind::ModuleExam | PendingKind::FinalExam => {
                let want_final = kind == PendingKind::FinalExam;
                guard
                    .exam_submissions
                    .iter()
                    .filter(|s| !s.is_graded())
                    .filter(|s| {
                        guard.exams.get(&s.exam_id).is_some_and(|e| {
                            matches!(e.scope(), ExamScope::Final(_)) == want_final
                        })
                    })
                    .cloned()
                    .map(PendingSubmission::Exam)
                    .collect()
            }
        };
        pending.sort_by_key(|p| (p.submitted_at(), p.id()));
        Ok(pending)
    }

    async fn grade_history(&self, user: UserId) -> Result<Vec<GradeRecord>, StorageError> {
        let guard = self.lock()?;
        let mut history: Vec<GradeRecord> = guard
            .grades
            .iter()
            .filter(|g| g.user_id == user)
            .cloned()
            .collect();
        history.sort_by_key(|g| (g.recorded_at, g.id));
        Ok(history)
    }
}

#[async_trait]
impl ProgressPersistence for InMemoryRepository {
    async fn commit(&self, changes: &ProgressChanges) -> Result<CommitReceipt, StorageError> {
        let mut guard = self.lock()?;
        guard.validate(changes)?;
        let tree = match &changes.settle {
            Some(scope) => Some(guard.tree(scope.course_id)?),
            None => None,
        };

        let mut receipt = CommitReceipt::default();
        let state = &mut *guard;

        if let Some(e) = &changes.enrollment {
            state
                .enrollments
                .entry((e.user_id, e.course_id))
                .or_insert_with(|| e.clone());
        }
        for c in &changes.lesson_completions {
            state
                .lesson_completions
                .insert((c.user_id, c.lesson_id), c.clone());
        }
        for p in &changes.practice_submissions {
            state.practice.insert((p.user_id, p.question_id), p.clone());
        }
        if let Some(new) = &changes.exam_submission {
            let id = next_submission_id(state.exam_submissions.len())?;
            state.exam_submissions.push(ExamSubmission {
                id: Some(id),
                ..new.clone()
            });
            receipt.exam_submission_id = Some(id);
        }
        if let Some(new) = &changes.project_submission {
            let id = next_submission_id(state.project_submissions.len())?;
            state.project_submissions.push(ProjectSubmission {
                id: Some(id),
                ..new.clone()
            });
            receipt.project_submission_id = Some(id);
        }
        if let Some(g) = &changes.exam_grading {
            if let Some(s) = state
                .exam_submissions
                .iter_mut()
                .find(|s| s.id == Some(g.submission_id))
            {
                s.item_scores.clone_from(&g.item_scores);
                s.grading = g.grading.clone();
            }
        }
        if let Some(g) = &changes.project_grading {
            if let Some(s) = state
                .project_submissions
                .iter_mut()
                .find(|s| s.id == Some(g.submission_id))
            {
                s.grading = g.grading.clone();
            }
        }
        for g in &changes.grade_records {
            let id = i64::try_from(state.grades.len() + 1)
                .map_err(|_| StorageError::Serialization("grade id overflow".into()))?;
            state.grades.push(GradeRecord {
                id: Some(id),
                ..g.clone()
            });
        }
        if let (Some(scope), Some(tree)) = (changes.settle, tree) {
            receipt.settlement = Some(state.settle(scope, &tree));
        }

        tracing::debug!(
            lessons = changes.lesson_completions.len(),
            practice = changes.practice_submissions.len(),
            grades = changes.grade_records.len(),
            "in-memory progress commit"
        );
        Ok(receipt)
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub courses: Arc<dyn CourseRepository>,
    pub learners: Arc<dyn LearnerRepository>,
    pub progress: Arc<dyn ProgressPersistence>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let courses: Arc<dyn CourseRepository> = Arc::new(repo.clone());
        let learners: Arc<dyn LearnerRepository> = Arc::new(repo.clone());
        let progress: Arc<dyn ProgressPersistence> = Arc::new(repo);
        Self {
            courses,
            learners,
            progress,
        }
    }
}
