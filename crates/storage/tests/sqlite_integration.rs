use chrono::Duration;
use mastermore_core::model::{
    Answer, AnswerOption, AnswerType, Correctness, Course, CourseId, Enrollment, Exam, ExamAnswer,
    ExamId, ExamQuestion, ExamQuestionId, ExamQuestionKind, ExamScope, ExamSubmission,
    GradeItemKind, GradeRecord, GradingFields, ItemScore, Lesson, LessonCompletion, LessonId,
    LessonOwner, Module, ModuleId, OptionId, PracticeQuestion, PracticeSubmission, Project,
    ProjectId, ProjectSubmission, QuestionId, StructuralRef, UserId,
};
use mastermore_core::time::fixed_now;
use storage::repository::{
    CourseRepository, ExamGrading, LearnerRepository, PendingKind, PendingSubmission,
    ProgressChanges, ProgressPersistence, SettleScope, StorageError,
};
use storage::sqlite::SqliteRepository;

async fn connect(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:memdb_{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

fn tf_options() -> Vec<AnswerOption> {
    vec![
        AnswerOption::new(OptionId::new(1), "true", true),
        AnswerOption::new(OptionId::new(2), "false", false),
    ]
}

async fn seed_course(repo: &SqliteRepository) {
    let course = Course::new(CourseId::new(1), "Go Programming", None, 1, true).unwrap();
    repo.insert_course(&course).await.unwrap();

    let intro = Lesson::new(
        LessonId::new(1),
        LessonOwner::Course(course.id()),
        1,
        "Welcome",
        "Read me first",
    )
    .unwrap();
    repo.insert_lesson(&intro).await.unwrap();

    for (id, position) in [(10, 1), (11, 2)] {
        let module = Module::new(
            ModuleId::new(id),
            course.id(),
            position,
            format!("Module {position}"),
            Some("beginner".into()),
        )
        .unwrap();
        repo.insert_module(&module).await.unwrap();
    }

    let lesson = Lesson::new(
        LessonId::new(100),
        LessonOwner::Module(ModuleId::new(10)),
        1,
        "Variables",
        "var x int",
    )
    .unwrap();
    repo.insert_lesson(&lesson).await.unwrap();

    let question = PracticeQuestion::new(
        QuestionId::new(5),
        ModuleId::new(10),
        1,
        "Go is statically typed",
        AnswerType::TrueFalse,
        3,
        tf_options(),
    )
    .unwrap();
    repo.insert_practice_question(&question).await.unwrap();

    let exam = Exam::new(
        ExamId::new(20),
        ExamScope::Module(ModuleId::new(10)),
        "Module 1 exam",
        70,
        15,
        vec![
            ExamQuestion::new(
                ExamQuestionId::new(1),
                1,
                "Zero value of int is 0",
                ExamQuestionKind::TrueFalse,
                40,
                tf_options(),
            )
            .unwrap(),
            ExamQuestion::new(
                ExamQuestionId::new(2),
                2,
                "Explain slices",
                ExamQuestionKind::Essay,
                60,
                Vec::new(),
            )
            .unwrap(),
        ],
    )
    .unwrap();
    repo.insert_exam(&exam).await.unwrap();

    let project = Project::new(ProjectId::new(30), course.id(), 1, "CLI todo app", 100).unwrap();
    repo.insert_project(&project).await.unwrap();
}

#[tokio::test]
async fn sqlite_tree_round_trips_structure() {
    let repo = connect("tree").await;
    seed_course(&repo).await;

    let tree = repo.load_tree(CourseId::new(1)).await.expect("tree");
    assert_eq!(tree.direct_lessons().len(), 1);
    assert_eq!(tree.modules().len(), 2);
    assert_eq!(tree.modules()[0].lessons().len(), 1);
    assert_eq!(tree.modules()[0].practice_questions()[0].options().len(), 2);
    assert_eq!(tree.modules()[0].exams()[0].max_score(), 100);
    assert!(tree.modules()[1].lessons().is_empty());
    assert_eq!(tree.projects().len(), 1);
    assert!(tree.final_exam().is_none());
    assert_eq!(
        tree.modules()[0].module().required_level(),
        Some("beginner")
    );

    assert_eq!(
        repo.locate(StructuralRef::Lesson(LessonId::new(100)))
            .await
            .unwrap(),
        Some(CourseId::new(1))
    );
    assert_eq!(
        repo.locate(StructuralRef::Exam(ExamId::new(20))).await.unwrap(),
        Some(CourseId::new(1))
    );
    assert_eq!(
        repo.locate(StructuralRef::Lesson(LessonId::new(999)))
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn sqlite_rejects_duplicate_positions() {
    let repo = connect("positions").await;
    seed_course(&repo).await;

    let clash = Module::new(ModuleId::new(12), CourseId::new(1), 2, "Dup", None).unwrap();
    assert!(matches!(
        repo.insert_module(&clash).await,
        Err(StorageError::Conflict)
    ));

    let orphan = Module::new(ModuleId::new(13), CourseId::new(99), 1, "Orphan", None).unwrap();
    assert!(matches!(
        repo.insert_module(&orphan).await,
        Err(StorageError::NotFound)
    ));
}

#[tokio::test]
async fn sqlite_commit_is_atomic_and_single_attempt() {
    let repo = connect("commit").await;
    seed_course(&repo).await;
    let user = UserId::new(7);
    let now = fixed_now();

    let practice = PracticeSubmission {
        user_id: user,
        question_id: QuestionId::new(5),
        answer: Answer::Choice(OptionId::new(1)),
        correctness: Correctness::Correct,
        points_awarded: 3,
        submitted_at: now,
    };
    let receipt = repo
        .commit(&ProgressChanges {
            enrollment: Some(Enrollment::new(user, CourseId::new(1), now)),
            practice_submissions: vec![practice.clone()],
            settle: Some(SettleScope {
                user_id: user,
                course_id: CourseId::new(1),
                at: now,
            }),
            ..ProgressChanges::default()
        })
        .await
        .expect("first commit");
    // The second module has nothing to do, so it completes straight away.
    let settlement = receipt.settlement.expect("settled");
    assert_eq!(settlement.completed_modules, vec![ModuleId::new(11)]);
    assert_eq!(settlement.percentage, 0);
    assert_eq!(
        repo.user_progress(user, CourseId::new(1))
            .await
            .unwrap()
            .map(|p| p.percentage),
        Some(0)
    );

    let second = ProgressChanges {
        lesson_completions: vec![LessonCompletion {
            user_id: user,
            lesson_id: LessonId::new(1),
            completed_at: now,
        }],
        practice_submissions: vec![PracticeSubmission {
            points_awarded: 0,
            correctness: Correctness::Incorrect,
            ..practice
        }],
        ..ProgressChanges::default()
    };
    assert!(matches!(
        repo.commit(&second).await,
        Err(StorageError::Conflict)
    ));

    let records = repo.learner_records(user, CourseId::new(1)).await.unwrap();
    assert!(!records.has_completed_lesson(LessonId::new(1)));
    assert_eq!(
        records.practice_state(QuestionId::new(5)),
        Some(Correctness::Correct)
    );
    let stored = repo
        .practice_submission(user, QuestionId::new(5))
        .await
        .unwrap()
        .expect("stored");
    assert_eq!(stored.points_awarded, 3);
    assert!(repo
        .get_enrollment(user, CourseId::new(1))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn sqlite_pending_queue_and_grading() {
    let repo = connect("grading").await;
    seed_course(&repo).await;
    let now = fixed_now();

    let mut exam_ids = Vec::new();
    for (user, offset) in [(2_u64, 5_i64), (1, 0)] {
        let receipt = repo
            .commit(&ProgressChanges {
                exam_submission: Some(ExamSubmission {
                    id: None,
                    user_id: UserId::new(user),
                    exam_id: ExamId::new(20),
                    answers: vec![ExamAnswer {
                        question_id: ExamQuestionId::new(2),
                        answer: Answer::Text("views over arrays".into()),
                    }],
                    item_scores: vec![ItemScore {
                        question_id: ExamQuestionId::new(1),
                        score: 40,
                    }],
                    max_score: 100,
                    grading: GradingFields::default(),
                    submitted_at: now + Duration::minutes(offset),
                }),
                ..ProgressChanges::default()
            })
            .await
            .unwrap();
        exam_ids.push(receipt.exam_submission_id.expect("assigned id"));
    }

    let pending = repo
        .pending_submissions(PendingKind::ModuleExam)
        .await
        .unwrap();
    let users: Vec<u64> = pending.iter().map(|p| p.user_id().value()).collect();
    assert_eq!(users, vec![1, 2]);
    assert!(repo
        .pending_submissions(PendingKind::FinalExam)
        .await
        .unwrap()
        .is_empty());

    let receipt = repo
        .commit(&ProgressChanges {
            exam_grading: Some(ExamGrading {
                submission_id: exam_ids[1],
                item_scores: vec![
                    ItemScore {
                        question_id: ExamQuestionId::new(1),
                        score: 40,
                    },
                    ItemScore {
                        question_id: ExamQuestionId::new(2),
                        score: 40,
                    },
                ],
                grading: GradingFields {
                    score: Some(80),
                    passed: Some(true),
                    grader_id: Some(UserId::new(99)),
                    graded_at: Some(now),
                    feedback: Some("good".into()),
                },
            }),
            lesson_completions: vec![LessonCompletion {
                user_id: UserId::new(1),
                lesson_id: LessonId::new(100),
                completed_at: now,
            }],
            practice_submissions: vec![PracticeSubmission {
                user_id: UserId::new(1),
                question_id: QuestionId::new(5),
                answer: Answer::Choice(OptionId::new(2)),
                correctness: Correctness::Incorrect,
                points_awarded: 0,
                submitted_at: now,
            }],
            settle: Some(SettleScope {
                user_id: UserId::new(1),
                course_id: CourseId::new(1),
                at: now,
            }),
            grade_records: vec![GradeRecord {
                id: None,
                user_id: UserId::new(1),
                item_kind: GradeItemKind::ModuleExam,
                item_id: 20,
                score: 80,
                max_score: 100,
                percentage: 80,
                passed: true,
                grader_id: Some(UserId::new(99)),
                feedback: Some("good".into()),
                recorded_at: now,
            }],
            ..ProgressChanges::default()
        })
        .await
        .unwrap();
    let settlement = receipt.settlement.expect("settled");
    assert_eq!(
        settlement.completed_modules,
        vec![ModuleId::new(10), ModuleId::new(11)]
    );
    assert_eq!(settlement.percentage, 50);

    let graded = repo.exam_submission(exam_ids[1]).await.unwrap();
    assert!(graded.is_passing());
    assert_eq!(graded.item_scores.len(), 2);

    let remaining = repo
        .pending_submissions(PendingKind::ModuleExam)
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(matches!(&remaining[0], PendingSubmission::Exam(s) if s.user_id == UserId::new(2)));

    let records = repo
        .learner_records(UserId::new(1), CourseId::new(1))
        .await
        .unwrap();
    assert!(records.has_passed_exam(ExamId::new(20)));
    assert!(records.has_completed_module(ModuleId::new(10)));

    let history = repo.grade_history(UserId::new(1)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].id.is_some());
}

#[tokio::test]
async fn sqlite_project_submission_is_single_attempt() {
    let repo = connect("project").await;
    seed_course(&repo).await;

    let submission = ProjectSubmission {
        id: None,
        user_id: UserId::new(3),
        project_id: ProjectId::new(30),
        content: "https://example.com/repo".into(),
        max_score: 100,
        grading: GradingFields::default(),
        submitted_at: fixed_now(),
    };
    let changes = ProgressChanges {
        project_submission: Some(submission),
        ..ProgressChanges::default()
    };
    let receipt = repo.commit(&changes).await.unwrap();
    let id = receipt.project_submission_id.expect("assigned id");
    assert_eq!(
        repo.project_submission(id).await.unwrap().content,
        "https://example.com/repo"
    );
    assert!(matches!(
        repo.commit(&changes).await,
        Err(StorageError::Conflict)
    ));
}

#[tokio::test]
async fn sqlite_concurrent_commits_settle_on_fresh_rows() {
    let path = std::env::temp_dir().join(format!(
        "mastermore_settle_{}.sqlite3",
        std::process::id()
    ));
    let _ = std::fs::remove_file(&path);
    let url = format!("sqlite://{}?mode=rwc", path.display());
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    seed_course(&repo).await;

    let user = UserId::new(4);
    let course = CourseId::new(1);
    let now = fixed_now();
    let scope = SettleScope {
        user_id: user,
        course_id: course,
        at: now,
    };
    repo.commit(&ProgressChanges {
        enrollment: Some(Enrollment::new(user, course, now)),
        settle: Some(scope),
        ..ProgressChanges::default()
    })
    .await
    .unwrap();

    let complete = |lesson: u64| ProgressChanges {
        lesson_completions: vec![LessonCompletion {
            user_id: user,
            lesson_id: LessonId::new(lesson),
            completed_at: now,
        }],
        settle: Some(scope),
        ..ProgressChanges::default()
    };
    let (direct, module) = (complete(1), complete(100));
    let (a, b) = tokio::join!(repo.commit(&direct), repo.commit(&module));
    let mut seen = vec![
        a.unwrap().settlement.expect("settled").percentage,
        b.unwrap().settlement.expect("settled").percentage,
    ];
    seen.sort_unstable();
    assert_eq!(seen, vec![50, 100]);

    let progress = repo.user_progress(user, course).await.unwrap().expect("cached");
    assert_eq!(progress.percentage, 100);
    let enrollment = repo.get_enrollment(user, course).await.unwrap().expect("enrolled");
    assert_eq!(enrollment.completed_at, Some(now));

    drop(repo);
    let _ = std::fs::remove_file(&path);
}
