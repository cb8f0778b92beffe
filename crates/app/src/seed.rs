use mastermore_core::access::Actor;
use mastermore_core::model::{
    AnswerOption, AnswerType, Course, CourseId, Exam, ExamId, ExamQuestion, ExamQuestionId,
    ExamQuestionKind, ExamScope, Lesson, LessonId, LessonOwner, Module, ModuleId, OptionId,
    PracticeQuestion, Project, ProjectId, QuestionId, StructuralRef, StructureError,
};
use services::{AppServices, CourseAdminError};
use tracing::{info, warn};

pub const DEMO_COURSE: CourseId = CourseId::new(1);

fn true_false() -> Vec<AnswerOption> {
    vec![
        AnswerOption::new(OptionId::new(1), "True", true),
        AnswerOption::new(OptionId::new(2), "False", false),
    ]
}

fn module_lessons(
    module: ModuleId,
    first_id: u64,
    titles: &[&str],
) -> Result<Vec<Lesson>, StructureError> {
    titles
        .iter()
        .zip(1_u32..)
        .zip(first_id..)
        .map(|((title, position), id)| {
            Lesson::new(
                LessonId::new(id),
                LessonOwner::Module(module),
                position,
                *title,
                format!("# {title}"),
            )
        })
        .collect()
}

/// What `seed_demo_course` found and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    Created,
    /// An earlier run stopped before publishing; the missing nodes were added.
    Resumed,
    AlreadyPresent,
}

/// Nodes written by an interrupted run are left as they are.
fn keep_existing<T>(result: Result<T, CourseAdminError>) -> Result<(), CourseAdminError> {
    match result {
        Ok(_)
        | Err(CourseAdminError::AlreadyExists(_) | CourseAdminError::PositionTaken { .. }) => {
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Create the demo "Go Programming" course. The course is published last, so
/// an unpublished demo course is an interrupted seed and gets completed.
///
/// # Errors
///
/// Returns `CourseAdminError` if any authoring step fails.
pub async fn seed_demo_course(
    app: &AppServices,
    admin: &Actor,
) -> Result<SeedOutcome, CourseAdminError> {
    let admin_svc = app.course_admin();
    let course = Course::new(
        DEMO_COURSE,
        "Go Programming",
        Some("From variables to goroutines".into()),
        1,
        false,
    )?;
    let outcome = match admin_svc.create_course(admin, course).await {
        Ok(_) => SeedOutcome::Created,
        Err(CourseAdminError::AlreadyExists(StructuralRef::Course(_))) => {
            let published = admin_svc
                .list_courses(admin)
                .await?
                .iter()
                .any(|c| c.id() == DEMO_COURSE && c.is_published());
            if published {
                info!(course = %DEMO_COURSE, "demo course already present");
                return Ok(SeedOutcome::AlreadyPresent);
            }
            warn!(course = %DEMO_COURSE, "resuming incomplete demo course");
            SeedOutcome::Resumed
        }
        Err(e) => return Err(e),
    };

    let welcome = Lesson::new(
        LessonId::new(1),
        LessonOwner::Course(DEMO_COURSE),
        1,
        "Welcome",
        "How this course works",
    )?;
    keep_existing(admin_svc.create_lesson(admin, welcome).await)?;

    let basics = ModuleId::new(10);
    let concurrency = ModuleId::new(11);
    for (id, position, title, level) in [
        (basics, 1, "Basics", "beginner"),
        (concurrency, 2, "Concurrency", "intermediate"),
    ] {
        let module = Module::new(id, DEMO_COURSE, position, title, Some(level.into()))?;
        keep_existing(admin_svc.create_module(admin, module).await)?;
    }

    for lesson in module_lessons(basics, 100, &["Variables", "Control flow", "Slices"])? {
        keep_existing(admin_svc.create_lesson(admin, lesson).await)?;
    }
    for lesson in module_lessons(concurrency, 200, &["Goroutines", "Channels"])? {
        keep_existing(admin_svc.create_lesson(admin, lesson).await)?;
    }

    let questions = [
        PracticeQuestion::new(
            QuestionId::new(1),
            basics,
            1,
            "A slice shares its backing array",
            AnswerType::TrueFalse,
            5,
            true_false(),
        )?,
        PracticeQuestion::new(
            QuestionId::new(2),
            basics,
            2,
            "Write a function that reverses a slice",
            AnswerType::Coding,
            10,
            Vec::new(),
        )?,
    ];
    for question in questions {
        keep_existing(admin_svc.create_practice_question(admin, question).await)?;
    }

    let basics_exam = Exam::new(
        ExamId::new(20),
        ExamScope::Module(basics),
        "Basics checkpoint",
        70,
        20,
        vec![
            ExamQuestion::new(
                ExamQuestionId::new(1),
                1,
                "The zero value of an int is 0",
                ExamQuestionKind::TrueFalse,
                50,
                true_false(),
            )?,
            ExamQuestion::new(
                ExamQuestionId::new(2),
                2,
                "`len` of a nil slice panics",
                ExamQuestionKind::TrueFalse,
                50,
                vec![
                    AnswerOption::new(OptionId::new(1), "True", false),
                    AnswerOption::new(OptionId::new(2), "False", true),
                ],
            )?,
        ],
    )?;
    keep_existing(admin_svc.create_exam(admin, basics_exam).await)?;

    let final_exam = Exam::new(
        ExamId::new(21),
        ExamScope::Final(DEMO_COURSE),
        "Final exam",
        60,
        60,
        vec![ExamQuestion::new(
            ExamQuestionId::new(3),
            1,
            "Design a worker pool with channels",
            ExamQuestionKind::Essay,
            100,
            Vec::new(),
        )?],
    )?;
    keep_existing(admin_svc.create_exam(admin, final_exam).await)?;

    let project = Project::new(
        ProjectId::new(30),
        DEMO_COURSE,
        1,
        "Concurrent web crawler",
        100,
    )?;
    keep_existing(admin_svc.create_project(admin, project).await)?;
    admin_svc.publish_course(admin, DEMO_COURSE, true).await?;

    info!(course = %DEMO_COURSE, ?outcome, "demo course seeded");
    Ok(outcome)
}
