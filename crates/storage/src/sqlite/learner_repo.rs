use mastermore_core::model::{
    CourseId, Enrollment, ExamId, ExamSubmission, GradeRecord, LearnerRecords, LessonId,
    ModuleId, PracticeSubmission, ProjectId, ProjectSubmission, QuestionId, SubmissionId, UserId,
    UserProgress,
};
use sqlx::{Row, SqliteConnection};

use super::SqliteRepository;
use super::mapping::{
    db_err, id_i64, map_exam_submission_row, map_grade_row, map_practice_row,
    map_project_submission_row, parse_correctness, ser,
};
use crate::repository::{LearnerRepository, PendingKind, PendingSubmission, StorageError};

fn row_u64(row: &sqlx::sqlite::SqliteRow, idx: usize) -> Result<u64, StorageError> {
    let v: i64 = row.try_get(idx).map_err(ser)?;
    u64::try_from(v).map_err(|_| StorageError::Serialization("id sign overflow".into()))
}

const EXAM_SUBMISSION_COLUMNS: &str = r"
    s.id, s.user_id, s.exam_id, s.answers, s.item_scores, s.max_score,
    s.score, s.passed, s.grader_id, s.graded_at, s.feedback, s.submitted_at
";

const PROJECT_SUBMISSION_COLUMNS: &str = r"
    s.id, s.user_id, s.project_id, s.content, s.max_score,
    s.score, s.passed, s.grader_id, s.graded_at, s.feedback, s.submitted_at
";

pub(super) async fn fetch_enrollment(
    conn: &mut SqliteConnection,
    user: UserId,
    course: CourseId,
) -> Result<Option<Enrollment>, StorageError> {
    let row = sqlx::query(
        r"
        SELECT enrolled_at, completed_at FROM enrollments
        WHERE user_id = ?1 AND course_id = ?2
        ",
    )
    .bind(id_i64("user_id", user.value())?)
    .bind(id_i64("course_id", course.value())?)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)?;

    row.map(|row| {
        Ok(Enrollment {
            user_id: user,
            course_id: course,
            enrolled_at: row.try_get("enrolled_at").map_err(ser)?,
            completed_at: row.try_get("completed_at").map_err(ser)?,
        })
    })
    .transpose()
}

/// One learner's records for one course, read through `conn`.
pub(super) async fn load_records_on(
    conn: &mut SqliteConnection,
    user: UserId,
    course: CourseId,
) -> Result<LearnerRecords, StorageError> {
    let user_id = id_i64("user_id", user.value())?;
    let course_id = id_i64("course_id", course.value())?;
    let mut records = LearnerRecords::new();

    let lessons = sqlx::query(
        r"
        SELECT c.lesson_id
        FROM lesson_completions c
        JOIN lessons l ON l.id = c.lesson_id
        LEFT JOIN modules m ON m.id = l.module_id
        WHERE c.user_id = ?1 AND (l.course_id = ?2 OR m.course_id = ?2)
        ",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)?;
    for row in &lessons {
        records.record_lesson(LessonId::new(row_u64(row, 0)?));
    }

    let practice = sqlx::query(
        r"
        SELECT s.question_id, s.correctness
        FROM practice_submissions s
        JOIN practice_questions q ON q.id = s.question_id
        JOIN modules m ON m.id = q.module_id
        WHERE s.user_id = ?1 AND m.course_id = ?2
        ",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)?;
    for row in &practice {
        let correctness: String = row.try_get(1).map_err(ser)?;
        records.record_practice(
            QuestionId::new(row_u64(row, 0)?),
            parse_correctness(&correctness)?,
        );
    }

    let exams = sqlx::query(
        r"
        SELECT s.exam_id, s.passed
        FROM exam_submissions s
        JOIN exams e ON e.id = s.exam_id
        LEFT JOIN modules m ON m.id = e.module_id
        WHERE s.user_id = ?1 AND (e.course_id = ?2 OR m.course_id = ?2)
        ",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)?;
    for row in &exams {
        let passed: Option<bool> = row.try_get(1).map_err(ser)?;
        records.record_exam(ExamId::new(row_u64(row, 0)?), passed);
    }

    let projects = sqlx::query(
        r"
        SELECT s.project_id, s.passed
        FROM project_submissions s
        JOIN projects p ON p.id = s.project_id
        WHERE s.user_id = ?1 AND p.course_id = ?2
        ",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)?;
    for row in &projects {
        let passed: Option<bool> = row.try_get(1).map_err(ser)?;
        records.record_project(ProjectId::new(row_u64(row, 0)?), passed);
    }

    let modules = sqlx::query(
        r"
        SELECT c.module_id
        FROM module_completions c
        JOIN modules m ON m.id = c.module_id
        WHERE c.user_id = ?1 AND m.course_id = ?2
        ",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)?;
    for row in &modules {
        records.record_module(ModuleId::new(row_u64(row, 0)?));
    }

    tracing::debug!(user = %user, course = %course, "loaded learner records");
    Ok(records)
}

#[async_trait::async_trait]
impl LearnerRepository for SqliteRepository {
    async fn get_enrollment(
        &self,
        user: UserId,
        course: CourseId,
    ) -> Result<Option<Enrollment>, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        fetch_enrollment(&mut conn, user, course).await
    }

    async fn learner_records(
        &self,
        user: UserId,
        course: CourseId,
    ) -> Result<LearnerRecords, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        load_records_on(&mut conn, user, course).await
    }

    async fn user_progress(
        &self,
        user: UserId,
        course: CourseId,
    ) -> Result<Option<UserProgress>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT percentage, updated_at FROM user_progress
            WHERE user_id = ?1 AND course_id = ?2
            ",
        )
        .bind(id_i64("user_id", user.value())?)
        .bind(id_i64("course_id", course.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|row| {
            let percentage: i64 = row.try_get("percentage").map_err(ser)?;
            Ok(UserProgress {
                user_id: user,
                course_id: course,
                percentage: u8::try_from(percentage).map_err(|_| {
                    StorageError::Serialization(format!("invalid percentage: {percentage}"))
                })?,
                updated_at: row.try_get("updated_at").map_err(ser)?,
            })
        })
        .transpose()
    }

    async fn practice_submission(
        &self,
        user: UserId,
        question: QuestionId,
    ) -> Result<Option<PracticeSubmission>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT user_id, question_id, answer, correctness, points_awarded, submitted_at
            FROM practice_submissions
            WHERE user_id = ?1 AND question_id = ?2
            ",
        )
        .bind(id_i64("user_id", user.value())?)
        .bind(id_i64("question_id", question.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(map_practice_row).transpose()
    }

    async fn exam_submission(&self, id: SubmissionId) -> Result<ExamSubmission, StorageError> {
        let sql = format!("SELECT {EXAM_SUBMISSION_COLUMNS} FROM exam_submissions s WHERE s.id = ?1");
        let row = sqlx::query(&sql)
            .bind(id_i64("submission_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(StorageError::NotFound)?;
        map_exam_submission_row(&row)
    }

    async fn project_submission(
        &self,
        id: SubmissionId,
    ) -> Result<ProjectSubmission, StorageError> {
        let sql =
            format!("SELECT {PROJECT_SUBMISSION_COLUMNS} FROM project_submissions s WHERE s.id = ?1");
        let row = sqlx::query(&sql)
            .bind(id_i64("submission_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(StorageError::NotFound)?;
        map_project_submission_row(&row)
    }

    async fn pending_submissions(
        &self,
        kind: PendingKind,
    ) -> Result<Vec<PendingSubmission>, StorageError> {
        let pending = match kind {
            PendingKind::Project => {
                let sql = format!(
                    "SELECT {PROJECT_SUBMISSION_COLUMNS} FROM project_submissions s
                     WHERE s.passed IS NULL ORDER BY s.submitted_at, s.id"
                );
                let rows = sqlx::query(&sql)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(db_err)?;
                rows.iter()
                    .map(|r| map_project_submission_row(r).map(PendingSubmission::Project))
                    .collect::<Result<Vec<_>, _>>()?
            }
            PendingKind::ModuleExam | PendingKind::FinalExam => {
                let scope = if kind == PendingKind::FinalExam {
                    "e.course_id IS NOT NULL"
                } else {
                    "e.module_id IS NOT NULL"
                };
                let sql = format!(
                    "SELECT {EXAM_SUBMISSION_COLUMNS} FROM exam_submissions s
                     JOIN exams e ON e.id = s.exam_id
                     WHERE s.passed IS NULL AND {scope}
                     ORDER BY s.submitted_at, s.id"
                );
                let rows = sqlx::query(&sql)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(db_err)?;
                rows.iter()
                    .map(|r| map_exam_submission_row(r).map(PendingSubmission::Exam))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        tracing::debug!(kind = kind.as_str(), count = pending.len(), "pending submissions");
        Ok(pending)
    }

    async fn grade_history(&self, user: UserId) -> Result<Vec<GradeRecord>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, user_id, item_kind, item_id, score, max_score, percentage, passed,
                   grader_id, feedback, recorded_at
            FROM grades
            WHERE user_id = ?1
            ORDER BY recorded_at, id
            ",
        )
        .bind(id_i64("user_id", user.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(map_grade_row).collect()
    }
}
