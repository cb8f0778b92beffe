use std::sync::Arc;

use async_trait::async_trait;
use mastermore_core::access::Actor;
use mastermore_core::model::{
    Course, CourseId, Enrollment, ExamSubmission, GradeRecord, LearnerRecords, Lesson, LessonId,
    LessonOwner, Module, ModuleId, PracticeSubmission, ProjectSubmission, QuestionId,
    SubmissionId, UserId, UserProgress,
};
use mastermore_core::time::fixed_now;
use services::{AppServices, Clock};
use storage::repository::{
    LearnerRepository, PendingKind, PendingSubmission, Storage, StorageError,
};

const COURSE: CourseId = CourseId::new(1);
const MODULE: ModuleId = ModuleId::new(10);
const DIRECT_LESSON: LessonId = LessonId::new(1);
const MODULE_LESSON: LessonId = LessonId::new(101);

/// Hands control back to the scheduler after every records read, so two
/// events in flight both act on the same snapshot.
struct InterleavingLearners {
    inner: Arc<dyn LearnerRepository>,
}

#[async_trait]
impl LearnerRepository for InterleavingLearners {
    async fn get_enrollment(
        &self,
        user: UserId,
        course: CourseId,
    ) -> Result<Option<Enrollment>, StorageError> {
        self.inner.get_enrollment(user, course).await
    }

    async fn learner_records(
        &self,
        user: UserId,
        course: CourseId,
    ) -> Result<LearnerRecords, StorageError> {
        let records = self.inner.learner_records(user, course).await;
        tokio::task::yield_now().await;
        records
    }

    async fn user_progress(
        &self,
        user: UserId,
        course: CourseId,
    ) -> Result<Option<UserProgress>, StorageError> {
        self.inner.user_progress(user, course).await
    }

    async fn practice_submission(
        &self,
        user: UserId,
        question: QuestionId,
    ) -> Result<Option<PracticeSubmission>, StorageError> {
        self.inner.practice_submission(user, question).await
    }

    async fn exam_submission(&self, id: SubmissionId) -> Result<ExamSubmission, StorageError> {
        self.inner.exam_submission(id).await
    }

    async fn project_submission(
        &self,
        id: SubmissionId,
    ) -> Result<ProjectSubmission, StorageError> {
        self.inner.project_submission(id).await
    }

    async fn pending_submissions(
        &self,
        kind: PendingKind,
    ) -> Result<Vec<PendingSubmission>, StorageError> {
        self.inner.pending_submissions(kind).await
    }

    async fn grade_history(&self, user: UserId) -> Result<Vec<GradeRecord>, StorageError> {
        self.inner.grade_history(user).await
    }
}

/// One direct lesson and one module with a single lesson.
async fn seed_course(app: &AppServices) {
    let admin_svc = app.course_admin();
    let actor = Actor::admin(UserId::new(1));
    admin_svc
        .create_course(&actor, Course::new(COURSE, "Rust", None, 1, true).unwrap())
        .await
        .unwrap();
    admin_svc
        .create_module(
            &actor,
            Module::new(MODULE, COURSE, 1, "Ownership", None).unwrap(),
        )
        .await
        .unwrap();
    for (id, owner) in [
        (DIRECT_LESSON, LessonOwner::Course(COURSE)),
        (MODULE_LESSON, LessonOwner::Module(MODULE)),
    ] {
        let lesson = Lesson::new(id, owner, 1, format!("Lesson {id}"), "").unwrap();
        admin_svc.create_lesson(&actor, lesson).await.unwrap();
    }
}

#[tokio::test]
async fn concurrent_lesson_completions_both_count() {
    let base = Storage::in_memory();
    let storage = Storage {
        courses: Arc::clone(&base.courses),
        learners: Arc::new(InterleavingLearners {
            inner: Arc::clone(&base.learners),
        }),
        progress: Arc::clone(&base.progress),
    };
    let app = AppServices::from_storage(&storage, Clock::fixed(fixed_now()));
    seed_course(&app).await;

    let user = UserId::new(7);
    let recorder = app.recorder();
    recorder.enroll(user, COURSE).await.unwrap();

    let (direct, in_module) = tokio::join!(
        recorder.record_lesson_completion(user, DIRECT_LESSON),
        recorder.record_lesson_completion(user, MODULE_LESSON),
    );
    let mut percentages = [direct.unwrap(), in_module.unwrap()];
    percentages.sort_unstable();
    assert_eq!(percentages, [50, 100]);

    assert_eq!(
        app.progress_view()
            .cached_progress(user, COURSE)
            .await
            .unwrap(),
        100
    );
    let records = base.learners.learner_records(user, COURSE).await.unwrap();
    assert!(records.has_completed_module(MODULE));
    let enrollment = base
        .learners
        .get_enrollment(user, COURSE)
        .await
        .unwrap()
        .expect("enrolled");
    assert_eq!(enrollment.completed_at, Some(fixed_now()));
}
