use chrono::{DateTime, Utc};
use mastermore_core::model::{
    AnswerOption, AnswerType, Course, CourseId, Correctness, Exam, ExamId, ExamQuestion, ExamScope,
    ExamSubmission, GradeItemKind, GradeRecord, GradingFields, Lesson, LessonId, LessonOwner,
    Module, ModuleId, PracticeQuestion, PracticeSubmission, Project, ProjectId,
    ProjectSubmission, QuestionId, SubmissionId, UserId,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Unique violations become `Conflict`, a missing row `NotFound`, anything
/// else a connection error.
pub(crate) fn db_err(e: sqlx::Error) -> StorageError {
    match &e {
        sqlx::Error::RowNotFound => StorageError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Conflict,
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => StorageError::NotFound,
        _ => StorageError::Connection(e.to_string()),
    }
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

fn i64_to_u32(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(ser)
}

pub(crate) fn from_json<T: DeserializeOwned>(raw: &str) -> Result<T, StorageError> {
    serde_json::from_str(raw).map_err(ser)
}

fn get_u64(row: &SqliteRow, field: &'static str) -> Result<u64, StorageError> {
    i64_to_u64(field, row.try_get::<i64, _>(field).map_err(ser)?)
}

fn get_u32(row: &SqliteRow, field: &'static str) -> Result<u32, StorageError> {
    i64_to_u32(field, row.try_get::<i64, _>(field).map_err(ser)?)
}

fn get_opt_u64(row: &SqliteRow, field: &'static str) -> Result<Option<u64>, StorageError> {
    row.try_get::<Option<i64>, _>(field)
        .map_err(ser)?
        .map(|v| i64_to_u64(field, v))
        .transpose()
}

//
// ─── STRUCTURE ─────────────────────────────────────────────────────────────────
//

pub(crate) fn map_course_row(row: &SqliteRow) -> Result<Course, StorageError> {
    Course::new(
        CourseId::new(get_u64(row, "id")?),
        row.try_get::<String, _>("name").map_err(ser)?,
        row.try_get("description").map_err(ser)?,
        get_u32(row, "position")?,
        row.try_get::<bool, _>("published").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_module_row(row: &SqliteRow) -> Result<Module, StorageError> {
    Module::new(
        ModuleId::new(get_u64(row, "id")?),
        CourseId::new(get_u64(row, "course_id")?),
        get_u32(row, "position")?,
        row.try_get::<String, _>("title").map_err(ser)?,
        row.try_get("required_level").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn lesson_owner_columns(
    owner: LessonOwner,
) -> Result<(Option<i64>, Option<i64>), StorageError> {
    Ok(match owner {
        LessonOwner::Course(id) => (Some(id_i64("course_id", id.value())?), None),
        LessonOwner::Module(id) => (None, Some(id_i64("module_id", id.value())?)),
    })
}

pub(crate) fn map_lesson_row(row: &SqliteRow) -> Result<Lesson, StorageError> {
    let owner = match (get_opt_u64(row, "course_id")?, get_opt_u64(row, "module_id")?) {
        (Some(course), None) => LessonOwner::Course(CourseId::new(course)),
        (None, Some(module)) => LessonOwner::Module(ModuleId::new(module)),
        _ => {
            return Err(StorageError::Serialization(
                "lesson must have exactly one owner".into(),
            ));
        }
    };
    Lesson::new(
        LessonId::new(get_u64(row, "id")?),
        owner,
        get_u32(row, "position")?,
        row.try_get::<String, _>("title").map_err(ser)?,
        row.try_get::<String, _>("body").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_practice_question_row(row: &SqliteRow) -> Result<PracticeQuestion, StorageError> {
    let answer_type: String = row.try_get("answer_type").map_err(ser)?;
    let answer_type = AnswerType::parse(&answer_type)
        .ok_or_else(|| StorageError::Serialization(format!("invalid answer_type: {answer_type}")))?;
    let options: Vec<AnswerOption> =
        from_json(&row.try_get::<String, _>("options").map_err(ser)?)?;

    PracticeQuestion::new(
        QuestionId::new(get_u64(row, "id")?),
        ModuleId::new(get_u64(row, "module_id")?),
        get_u32(row, "position")?,
        row.try_get::<String, _>("prompt").map_err(ser)?,
        answer_type,
        get_u32(row, "points")?,
        options,
    )
    .map_err(ser)
}

pub(crate) fn exam_scope_columns(
    scope: ExamScope,
) -> Result<(Option<i64>, Option<i64>), StorageError> {
    Ok(match scope {
        ExamScope::Module(id) => (Some(id_i64("module_id", id.value())?), None),
        ExamScope::Final(id) => (None, Some(id_i64("course_id", id.value())?)),
    })
}

pub(crate) fn map_exam_row(row: &SqliteRow) -> Result<Exam, StorageError> {
    let scope = match (get_opt_u64(row, "module_id")?, get_opt_u64(row, "course_id")?) {
        (Some(module), None) => ExamScope::Module(ModuleId::new(module)),
        (None, Some(course)) => ExamScope::Final(CourseId::new(course)),
        _ => {
            return Err(StorageError::Serialization(
                "exam must have exactly one owner".into(),
            ));
        }
    };
    let passing: i64 = row.try_get("passing_score").map_err(ser)?;
    let passing = u8::try_from(passing)
        .map_err(|_| StorageError::Serialization(format!("invalid passing_score: {passing}")))?;
    let questions: Vec<ExamQuestion> =
        from_json(&row.try_get::<String, _>("questions").map_err(ser)?)?;

    Exam::new(
        ExamId::new(get_u64(row, "id")?),
        scope,
        row.try_get::<String, _>("title").map_err(ser)?,
        passing,
        get_u32(row, "time_limit_minutes")?,
        questions,
    )
    .map_err(ser)
}

pub(crate) fn map_project_row(row: &SqliteRow) -> Result<Project, StorageError> {
    Project::new(
        ProjectId::new(get_u64(row, "id")?),
        CourseId::new(get_u64(row, "course_id")?),
        get_u32(row, "position")?,
        row.try_get::<String, _>("title").map_err(ser)?,
        get_u32(row, "max_points")?,
    )
    .map_err(ser)
}

//
// ─── LEARNER RECORDS ───────────────────────────────────────────────────────────
//

pub(crate) fn parse_correctness(s: &str) -> Result<Correctness, StorageError> {
    Correctness::parse(s)
        .ok_or_else(|| StorageError::Serialization(format!("invalid correctness: {s}")))
}

pub(crate) fn map_practice_row(row: &SqliteRow) -> Result<PracticeSubmission, StorageError> {
    let correctness: String = row.try_get("correctness").map_err(ser)?;
    Ok(PracticeSubmission {
        user_id: UserId::new(get_u64(row, "user_id")?),
        question_id: QuestionId::new(get_u64(row, "question_id")?),
        answer: from_json(&row.try_get::<String, _>("answer").map_err(ser)?)?,
        correctness: parse_correctness(&correctness)?,
        points_awarded: get_u32(row, "points_awarded")?,
        submitted_at: row.try_get("submitted_at").map_err(ser)?,
    })
}

fn map_grading(row: &SqliteRow) -> Result<GradingFields, StorageError> {
    Ok(GradingFields {
        score: row
            .try_get::<Option<i64>, _>("score")
            .map_err(ser)?
            .map(|v| i64_to_u32("score", v))
            .transpose()?,
        passed: row.try_get("passed").map_err(ser)?,
        grader_id: get_opt_u64(row, "grader_id")?.map(UserId::new),
        graded_at: row.try_get("graded_at").map_err(ser)?,
        feedback: row.try_get("feedback").map_err(ser)?,
    })
}

pub(crate) fn map_exam_submission_row(row: &SqliteRow) -> Result<ExamSubmission, StorageError> {
    Ok(ExamSubmission {
        id: Some(SubmissionId::new(get_u64(row, "id")?)),
        user_id: UserId::new(get_u64(row, "user_id")?),
        exam_id: ExamId::new(get_u64(row, "exam_id")?),
        answers: from_json(&row.try_get::<String, _>("answers").map_err(ser)?)?,
        item_scores: from_json(&row.try_get::<String, _>("item_scores").map_err(ser)?)?,
        max_score: get_u32(row, "max_score")?,
        grading: map_grading(row)?,
        submitted_at: row.try_get("submitted_at").map_err(ser)?,
    })
}

pub(crate) fn map_project_submission_row(
    row: &SqliteRow,
) -> Result<ProjectSubmission, StorageError> {
    Ok(ProjectSubmission {
        id: Some(SubmissionId::new(get_u64(row, "id")?)),
        user_id: UserId::new(get_u64(row, "user_id")?),
        project_id: ProjectId::new(get_u64(row, "project_id")?),
        content: row.try_get("content").map_err(ser)?,
        max_score: get_u32(row, "max_score")?,
        grading: map_grading(row)?,
        submitted_at: row.try_get("submitted_at").map_err(ser)?,
    })
}

pub(crate) fn map_grade_row(row: &SqliteRow) -> Result<GradeRecord, StorageError> {
    let kind: String = row.try_get("item_kind").map_err(ser)?;
    let percentage: i64 = row.try_get("percentage").map_err(ser)?;
    let recorded_at: DateTime<Utc> = row.try_get("recorded_at").map_err(ser)?;
    Ok(GradeRecord {
        id: Some(row.try_get("id").map_err(ser)?),
        user_id: UserId::new(get_u64(row, "user_id")?),
        item_kind: GradeItemKind::parse(&kind)
            .ok_or_else(|| StorageError::Serialization(format!("invalid item_kind: {kind}")))?,
        item_id: get_u64(row, "item_id")?,
        score: get_u32(row, "score")?,
        max_score: get_u32(row, "max_score")?,
        percentage: u8::try_from(percentage).map_err(|_| {
            StorageError::Serialization(format!("invalid percentage: {percentage}"))
        })?,
        passed: row.try_get("passed").map_err(ser)?,
        grader_id: get_opt_u64(row, "grader_id")?.map(UserId::new),
        feedback: row.try_get("feedback").map_err(ser)?,
        recorded_at,
    })
}

pub(crate) fn opt_id_i64(field: &'static str, v: Option<u64>) -> Result<Option<i64>, StorageError> {
    v.map(|v| id_i64(field, v)).transpose()
}
